use super::{DocumentParser, DocumentSource, Element, ElementKind, ParseError};
use async_trait::async_trait;

/// Plain text: one narrative element per blank-line separated paragraph.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextParser;

#[async_trait]
impl DocumentParser for TextParser {
    async fn partition(&self, source: &DocumentSource<'_>) -> Result<Vec<Element>, ParseError> {
        let text = std::str::from_utf8(source.bytes)
            .map_err(|error| ParseError::malformed(source.key, error))?;
        let normalized = text.replace("\r\n", "\n");

        Ok(normalized
            .split("\n\n")
            .map(str::trim)
            .filter(|paragraph| !paragraph.is_empty())
            .map(|paragraph| Element::new(ElementKind::NarrativeText, paragraph))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn paragraphs_become_elements() {
        let source = DocumentSource {
            key: "notes.txt",
            bytes: b"first line\r\nstill first\r\n\r\n\r\nsecond\n\n  \n",
            last_update_date: "",
        };
        let elements = TextParser.partition(&source).await.unwrap();
        assert_eq!(elements.len(), 2);
        assert_eq!(elements[0].text, "first line\nstill first");
        assert_eq!(elements[1].kind, ElementKind::NarrativeText);
    }

    #[tokio::test]
    async fn invalid_utf8_is_malformed() {
        let source = DocumentSource {
            key: "bin.txt",
            bytes: &[0xff, 0xfe, 0x00],
            last_update_date: "",
        };
        assert!(matches!(
            TextParser.partition(&source).await,
            Err(ParseError::Malformed { .. })
        ));
    }
}
