use crate::types::Paragraph;

/// Split text on blank lines into trimmed, non-empty, zero-indexed paragraphs
pub fn segment(text: &str) -> Vec<Paragraph> {
    text.replace("\r\n", "\n")
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .enumerate()
        .map(|(index, text)| Paragraph {
            index,
            text: text.to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment() {
        let paragraphs = segment("  First line\nstill first  \r\n\r\n\n\nSecond\n\n   \n\nThird ");
        let texts: Vec<_> = paragraphs.iter().map(|p| p.text.as_str()).collect();
        assert_eq!(texts, vec!["First line\nstill first", "Second", "Third"]);
        assert_eq!(paragraphs[2].index, 2);
    }

    #[test]
    fn test_empty_text() {
        assert!(segment("").is_empty());
        assert!(segment("\n\n  \n\n").is_empty());
    }
}
