use super::{DocumentSource, ParseError, TabularParser};
use crate::pipeline::results::Page;
use calamine::{Reader, Xlsx, open_workbook_from_rs};
use csv::ReaderBuilder;
use serde_json::{Map, Value};
use std::io::Cursor;

/// CSV with a header row; every record becomes a page on page 0.
#[derive(Debug, Default, Clone, Copy)]
pub struct CsvParser;

impl TabularParser for CsvParser {
    fn parse_rows(&self, source: &DocumentSource<'_>) -> Result<Vec<Page>, ParseError> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(source.bytes);

        let headers = reader
            .headers()
            .map_err(|error| {
                ParseError::malformed(source.key, format!("failed to read headers: {error}"))
            })?
            .clone();

        let mut pages = Vec::new();
        for (line, record) in reader.records().enumerate() {
            let record = record.map_err(|error| {
                // +2 for the header row and 0-indexing.
                ParseError::malformed(source.key, format!("line {}: {error}", line + 2))
            })?;
            if record.iter().all(|field| field.trim().is_empty()) {
                continue;
            }
            let row = headers
                .iter()
                .zip(record.iter())
                .map(|(header, value)| (header.to_string(), Value::String(value.to_string())))
                .collect::<Map<_, _>>();
            pages.push(source.row_page(0, row));
        }
        Ok(pages)
    }
}

/// XLSX workbooks; the first row of each sheet is its header and `page_number` is the sheet
/// index.
#[derive(Debug, Default, Clone, Copy)]
pub struct XlsxParser;

impl TabularParser for XlsxParser {
    fn parse_rows(&self, source: &DocumentSource<'_>) -> Result<Vec<Page>, ParseError> {
        let mut workbook: Xlsx<_> = open_workbook_from_rs(Cursor::new(source.bytes))
            .map_err(|error| ParseError::malformed(source.key, error))?;

        let mut pages = Vec::new();
        for (sheet_index, name) in workbook.sheet_names().into_iter().enumerate() {
            let range = workbook
                .worksheet_range(&name)
                .map_err(|error| {
                    ParseError::malformed(source.key, format!("sheet '{name}': {error}"))
                })?;
            let mut rows = range.rows();
            let Some(header_row) = rows.next() else {
                continue;
            };
            let headers: Vec<String> = header_row.iter().map(ToString::to_string).collect();
            let page_number = u32::try_from(sheet_index).unwrap_or(u32::MAX);

            for row in rows {
                let cells: Vec<String> = row.iter().map(ToString::to_string).collect();
                if cells.iter().all(|cell| cell.trim().is_empty()) {
                    continue;
                }
                let row = headers
                    .iter()
                    .zip(cells)
                    .map(|(header, value)| (header.clone(), Value::String(value)))
                    .collect::<Map<_, _>>();
                pages.push(source.row_page(page_number, row));
            }
        }
        Ok(pages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_rows_become_json_pages() {
        let source = DocumentSource {
            key: "kb/people.csv",
            bytes: b"name,city\nAda,London\n,\nLin,Taipei\n",
            last_update_date: "2024-05-01 10:00:00.000000",
        };
        let pages = CsvParser.parse_rows(&source).unwrap();
        assert_eq!(pages.len(), 2);

        let text: Value = serde_json::from_str(&pages[0].text).unwrap();
        assert_eq!(text["file"], "kb/people.csv");
        assert_eq!(text["data"]["name"], "Ada");
        assert_eq!(text["data"]["city"], "London");
        assert_eq!(pages[1].metadata.page_number, 0);
        assert_eq!(pages[1].metadata.last_update_date, "2024-05-01 10:00:00.000000");
    }

    #[test]
    fn invalid_workbook_is_malformed() {
        let source = DocumentSource {
            key: "kb/broken.xlsx",
            bytes: b"definitely not a zip archive",
            last_update_date: "",
        };
        assert!(matches!(
            XlsxParser.parse_rows(&source),
            Err(ParseError::Malformed { .. })
        ));
    }
}
