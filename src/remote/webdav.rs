//! WebDAV PROPFIND bodies and multistatus parsing

use std::collections::BTreeMap;

use percent_encoding::percent_decode_str;
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::Result;
use crate::types::{FileMetadata, GrantScope, MappingType, PermissionGrant};

/// Properties needed for listing and metadata
pub const FILE_PROPS: &str = r#"<?xml version="1.0"?>
<d:propfind xmlns:d="DAV:" xmlns:oc="http://owncloud.org/ns" xmlns:nc="http://nextcloud.org/ns">
  <d:prop>
    <d:getlastmodified/>
    <d:getcontentlength/>
    <d:getcontenttype/>
    <d:getetag/>
    <d:resourcetype/>
    <d:creationdate/>
    <oc:fileid/>
    <oc:size/>
    <nc:creation_time/>
  </d:prop>
</d:propfind>"#;

/// Only the identifiers, for the cheap stable id lookup
pub const ID_PROPS: &str = r#"<?xml version="1.0"?>
<d:propfind xmlns:d="DAV:" xmlns:oc="http://owncloud.org/ns" xmlns:nc="http://nextcloud.org/ns">
  <d:prop>
    <oc:fileid/>
    <oc:id/>
    <d:resourcetype/>
  </d:prop>
</d:propfind>"#;

/// Group folder ACL properties
pub const ACL_PROPS: &str = r#"<?xml version="1.0"?>
<d:propfind xmlns:d="DAV:" xmlns:nc="http://nextcloud.org/ns">
  <d:prop>
    <nc:acl-list/>
    <nc:inherited-acl-list/>
    <nc:group-folder-id/>
    <nc:acl-enabled/>
  </d:prop>
</d:propfind>"#;

/// One `<d:response>` of a multistatus document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DavResponse {
    pub href: String,
    /// Non-empty property values keyed by local name
    pub props: BTreeMap<String, String>,
    pub is_collection: bool,
    pub acl: Vec<PermissionGrant>,
}

impl DavResponse {
    pub fn prop(&self, name: &str) -> Option<&str> {
        self.props.get(name).map(String::as_str)
    }

    /// `oc:fileid`, falling back to `oc:id`
    pub fn stable_id(&self) -> Option<String> {
        self.prop("fileid")
            .or_else(|| self.prop("id"))
            .map(str::to_string)
    }

    pub fn metadata(&self) -> FileMetadata {
        let size = self
            .prop("getcontentlength")
            .or_else(|| self.prop("size"))
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(0);

        let created = self.prop("creationdate").map(str::to_string).or_else(|| {
            self.prop("creation_time")
                .and_then(|s| s.parse::<i64>().ok())
                .filter(|secs| *secs > 0)
                .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
                .map(|dt| dt.to_rfc3339())
        });

        FileMetadata {
            size,
            modified: self.prop("getlastmodified").map(str::to_string),
            created,
            content_type: self.prop("getcontenttype").map(str::to_string),
            file_id: self.stable_id(),
            etag: self
                .prop("getetag")
                .map(|e| e.trim_matches('"').to_string())
                .filter(|e| !e.is_empty()),
            is_dir: self.is_collection,
        }
    }
}

#[derive(Default)]
struct AclBuilder {
    mapping_type: Option<String>,
    mapping_id: Option<String>,
    permissions: Option<String>,
}

impl AclBuilder {
    fn build(self, scope: GrantScope) -> Option<PermissionGrant> {
        let mapping_type = match self.mapping_type.as_deref() {
            Some("user") => MappingType::User,
            Some("group") => MappingType::Group,
            other => {
                tracing::debug!("Ignoring ACL entry with mapping type {:?}", other);
                return None;
            }
        };
        Some(PermissionGrant {
            principal: self.mapping_id?,
            mapping_type,
            permission_bits: self
                .permissions
                .and_then(|p| p.trim().parse().ok())
                .unwrap_or(0),
            scope,
        })
    }
}

/// Parse a `207 Multi-Status` body
pub fn parse_multistatus(xml: &str) -> Result<Vec<DavResponse>> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut stack: Vec<String> = Vec::new();
    let mut responses = Vec::new();
    let mut current: Option<DavResponse> = None;
    let mut acl_scope: Option<GrantScope> = None;
    let mut acl_entry: Option<AclBuilder> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                match name.as_str() {
                    "response" => current = Some(DavResponse::default()),
                    "collection" => mark_collection(&mut current, &stack),
                    "acl-list" => acl_scope = Some(GrantScope::Direct),
                    "inherited-acl-list" => acl_scope = Some(GrantScope::Inherited),
                    "acl" if acl_scope.is_some() => acl_entry = Some(AclBuilder::default()),
                    _ => {}
                }
                stack.push(name);
            }
            Event::Empty(e) => {
                if e.local_name().as_ref() == b"collection" {
                    mark_collection(&mut current, &stack);
                }
            }
            Event::Text(t) => {
                let text = t.unescape()?.trim().to_string();
                if text.is_empty() {
                    continue;
                }
                let Some(top) = stack.last().map(String::as_str) else {
                    continue;
                };
                if let Some(entry) = acl_entry.as_mut() {
                    match top {
                        "acl-mapping-type" => entry.mapping_type = Some(text),
                        "acl-mapping-id" => entry.mapping_id = Some(text),
                        "acl-permissions" => entry.permissions = Some(text),
                        _ => {}
                    }
                } else if let Some(resp) = current.as_mut() {
                    if top == "href" {
                        resp.href = text;
                    } else if stack.iter().any(|s| s == "prop") {
                        resp.props.insert(top.to_string(), text);
                    }
                }
            }
            Event::End(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                stack.pop();
                match name.as_str() {
                    "acl" => {
                        if let (Some(entry), Some(scope)) = (acl_entry.take(), acl_scope) {
                            if let (Some(grant), Some(resp)) = (entry.build(scope), current.as_mut())
                            {
                                resp.acl.push(grant);
                            }
                        }
                    }
                    "acl-list" | "inherited-acl-list" => acl_scope = None,
                    "response" => {
                        if let Some(resp) = current.take() {
                            responses.push(resp);
                        }
                    }
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(responses)
}

fn mark_collection(current: &mut Option<DavResponse>, stack: &[String]) {
    if stack.last().map(String::as_str) == Some("resourcetype") {
        if let Some(resp) = current.as_mut() {
            resp.is_collection = true;
        }
    }
}

/// Map an href back to the path below `marker`, percent-decoded, with a
/// single leading slash and no trailing slash
pub fn href_to_path(href: &str, marker: &str) -> Option<String> {
    let idx = href.find(marker)?;
    let rest = &href[idx + marker.len()..];
    let decoded = percent_decode_str(rest).decode_utf8_lossy();
    let trimmed = decoded.trim_matches('/');
    Some(format!("/{}", trimmed))
}
