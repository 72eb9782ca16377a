//! Title-delimited segmentation of element streams.

use super::{DocumentSource, Element, ElementKind};
use crate::pipeline::results::Page;

const ELEMENT_SEPARATOR: &str = "\n\n";

struct Section {
    text: String,
    chars: usize,
    page_number: Option<u32>,
}

impl Section {
    fn start(element: &Element) -> Self {
        Self {
            text: element.text.clone(),
            chars: element.text.chars().count(),
            page_number: element.page_number,
        }
    }

    fn extend(&mut self, element: &Element) {
        self.text.push_str(ELEMENT_SEPARATOR);
        self.text.push_str(&element.text);
        self.chars += ELEMENT_SEPARATOR.len() + element.text.chars().count();
        self.page_number = self.page_number.or(element.page_number);
    }

    fn into_page(self, source: &DocumentSource<'_>) -> Page {
        let page_label = self
            .page_number
            .map(|page| page.to_string())
            .unwrap_or_default();
        let text = format!(
            "{{File name: {}, page: {}, content: {}}}",
            source.key, page_label, self.text
        );
        Page::new(text, source.metadata(self.page_number.unwrap_or(0)))
    }
}

/// Drop headers, then group elements into sections.
///
/// A section closes before every title and before any element that would push it past
/// `chunk_size` characters. A single element longer than `chunk_size` becomes its own section.
pub fn segment_by_title(
    elements: Vec<Element>,
    source: &DocumentSource<'_>,
    chunk_size: usize,
) -> Vec<Page> {
    let mut pages = Vec::new();
    let mut current: Option<Section> = None;

    for element in elements {
        if element.kind == ElementKind::Header || element.text.trim().is_empty() {
            continue;
        }

        current = Some(match current.take() {
            None => Section::start(&element),
            Some(mut section) => {
                let incoming = ELEMENT_SEPARATOR.len() + element.text.chars().count();
                if element.kind == ElementKind::Title || section.chars + incoming > chunk_size {
                    pages.push(section.into_page(source));
                    Section::start(&element)
                } else {
                    section.extend(&element);
                    section
                }
            }
        });
    }

    pages.extend(current.map(|section| section.into_page(source)));
    pages
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> DocumentSource<'static> {
        DocumentSource {
            key: "kb/guide.pdf",
            bytes: b"",
            last_update_date: "2024-05-01 10:00:00.000000",
        }
    }

    fn el(kind: ElementKind, text: &str, page: u32) -> Element {
        Element {
            kind,
            text: text.into(),
            page_number: Some(page),
        }
    }

    #[test]
    fn titles_start_sections_and_headers_are_dropped() {
        let elements = vec![
            el(ElementKind::Header, "ACME Confidential", 1),
            el(ElementKind::Title, "Intro", 1),
            el(ElementKind::NarrativeText, "Welcome.", 1),
            el(ElementKind::Title, "Usage", 2),
            el(ElementKind::NarrativeText, "Run it.", 2),
        ];
        let pages = segment_by_title(elements, &source(), 1000);

        assert_eq!(pages.len(), 2);
        assert_eq!(
            pages[0].text,
            "{File name: kb/guide.pdf, page: 1, content: Intro\n\nWelcome.}"
        );
        assert_eq!(pages[1].metadata.page_number, 2);
        assert!(pages.iter().all(|page| !page.text.contains("Confidential")));
    }

    #[test]
    fn long_sections_split_at_threshold() {
        let paragraph = "x".repeat(40);
        let elements = (0..5)
            .map(|_| el(ElementKind::NarrativeText, &paragraph, 3))
            .collect();
        let pages = segment_by_title(elements, &source(), 100);

        // Two 40-char paragraphs plus a separator fit; a third would not.
        assert_eq!(pages.len(), 3);
        assert!(pages.iter().all(|page| page.chunk_index.is_none()));
    }

    #[test]
    fn missing_page_numbers_default_to_zero() {
        let pages = segment_by_title(
            vec![Element::new(ElementKind::NarrativeText, "body")],
            &source(),
            1000,
        );
        assert_eq!(pages[0].metadata.page_number, 0);
        assert_eq!(pages[0].text, "{File name: kb/guide.pdf, page: , content: body}");
    }
}
