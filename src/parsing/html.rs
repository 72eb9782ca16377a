use super::{DocumentParser, DocumentSource, Element, ElementKind, ParseError};
use async_trait::async_trait;
use scraper::{ElementRef, Html, Node, Selector};

const BLOCK_TAGS: &str = "h1, h2, h3, h4, h5, h6, header, p, li, td, pre, blockquote";

/// Tags that break words apart even when no whitespace surrounds them in the source.
const SEPARATING_TAGS: &[&str] = &["br", "div", "tr", "ul", "ol", "table"];

/// HTML partitioner built on `scraper`.
pub struct HtmlParser {
    blocks: Selector,
}

impl HtmlParser {
    /// Build the parser with its block selector.
    pub fn new() -> Self {
        Self {
            blocks: Selector::parse(BLOCK_TAGS).expect("block selector"),
        }
    }

    fn classify(name: &str) -> ElementKind {
        match name {
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => ElementKind::Title,
            "header" => ElementKind::Header,
            "p" | "li" | "td" | "pre" | "blockquote" => ElementKind::NarrativeText,
            _ => ElementKind::Other,
        }
    }

    /// Blocks nested in another selected block are covered by their ancestor's text.
    fn is_nested(element: &ElementRef<'_>) -> bool {
        element.ancestors().any(|node| {
            node.value()
                .as_element()
                .is_some_and(|parent| Self::classify(parent.name()) != ElementKind::Other)
        })
    }

    /// Text of `element` with whitespace collapsed. Inline markup joins its neighbours directly;
    /// nested blocks are separated by a space.
    fn block_text(element: &ElementRef<'_>) -> String {
        let mut raw = String::new();
        for node in element.descendants() {
            match node.value() {
                Node::Text(text) => raw.push_str(text),
                Node::Element(child)
                    if Self::classify(child.name()) != ElementKind::Other
                        || SEPARATING_TAGS.contains(&child.name()) =>
                {
                    raw.push(' ')
                }
                _ => {}
            }
        }
        raw.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    fn partition_html(&self, html: &str) -> Vec<Element> {
        let document = Html::parse_document(html);
        document
            .select(&self.blocks)
            .filter(|element| !Self::is_nested(element))
            .filter_map(|element| {
                let text = Self::block_text(&element);
                (!text.is_empty())
                    .then(|| Element::new(Self::classify(element.value().name()), text))
            })
            .collect()
    }
}

impl Default for HtmlParser {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentParser for HtmlParser {
    async fn partition(&self, source: &DocumentSource<'_>) -> Result<Vec<Element>, ParseError> {
        let html = String::from_utf8_lossy(source.bytes);
        Ok(self.partition_html(&html))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_blocks_in_document_order() {
        let html = r#"
            <html><body>
              <header><h1>Site name</h1><p>Nav</p></header>
              <h2>Getting started</h2>
              <p>Install   the <b>tool</b>.</p>
              <ul><li>Step <p>one</p></li></ul>
              <script>ignored()</script>
            </body></html>"#;
        let elements = HtmlParser::new().partition_html(html);
        let kinds: Vec<_> = elements.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ElementKind::Header,
                ElementKind::Title,
                ElementKind::NarrativeText,
                ElementKind::NarrativeText
            ]
        );
        assert_eq!(elements[0].text, "Site name Nav");
        assert_eq!(elements[2].text, "Install the tool.");
        assert_eq!(elements[3].text, "Step one");
    }

    #[test]
    fn inline_markup_does_not_split_words() {
        let html = "<p><b>un</b>known <i>value</i>s here</p>\
                    <li>Step<em>wise</em></li>\
                    <table><tr><td>Line<br>break</td></tr></table>";
        let elements = HtmlParser::new().partition_html(html);
        assert_eq!(elements.len(), 3);
        assert_eq!(elements[0].text, "unknown values here");
        assert_eq!(elements[1].text, "Stepwise");
        assert_eq!(elements[2].text, "Line break");
    }
}
