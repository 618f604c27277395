//! Group folder ACL permission bitmask

use serde::{Deserialize, Serialize};

/// One bit of an ACL permission mask
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Bit 0
    Read,
    /// Bit 1
    Write,
    /// Bit 2
    Create,
    /// Bit 3
    Delete,
    /// Bit 4
    Share,
    /// Bit 5
    Sync,
}

impl Permission {
    pub const ALL: [Permission; 6] = [
        Permission::Read,
        Permission::Write,
        Permission::Create,
        Permission::Delete,
        Permission::Share,
        Permission::Sync,
    ];

    pub fn bit(self) -> u32 {
        1 << (self as u32)
    }
}

/// Permissions set in `bits`, lowest bit first. Unknown high bits are ignored.
pub fn decode(bits: u32) -> Vec<Permission> {
    Permission::ALL
        .iter()
        .copied()
        .filter(|p| bits & p.bit() != 0)
        .collect()
}

pub fn grants_read(bits: u32) -> bool {
    bits & Permission::Read.bit() != 0
}
