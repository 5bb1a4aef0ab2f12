//! Text extraction for Office Open XML packages (docx, pptx, xlsx).

use std::io::{Cursor, Read};

use quick_xml::escape::resolve_predefined_entity;
use quick_xml::events::Event;
use quick_xml::Reader;
use zip::ZipArchive;

type Archive<'a> = ZipArchive<Cursor<&'a [u8]>>;

fn open_archive(bytes: &[u8]) -> Result<Archive<'_>, String> {
    ZipArchive::new(Cursor::new(bytes)).map_err(|err| format!("Failed to open archive: {err}"))
}

fn read_entry(archive: &mut Archive<'_>, name: &str) -> Result<String, String> {
    let mut entry = archive
        .by_name(name)
        .map_err(|err| format!("Missing {name}: {err}"))?;
    let mut xml = String::new();
    entry
        .read_to_string(&mut xml)
        .map_err(|err| format!("Failed to read {name}: {err}"))?;
    Ok(xml)
}

/// Collects text runs grouped by a block element (`p` for paragraphs, `si`/`c` for cells).
///
/// Returns one string per block, in document order. Entity references are resolved.
fn collect_blocks(xml: &str, text_tag: &[u8], block_tag: &[u8]) -> Result<Vec<String>, String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    let mut blocks = Vec::new();
    let mut current = String::new();
    let mut in_block = false;
    let mut in_text = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = e.local_name();
                if name.as_ref() == block_tag {
                    in_block = true;
                    current.clear();
                } else if name.as_ref() == text_tag {
                    in_text = true;
                }
            }
            Ok(Event::Empty(e)) if e.local_name().as_ref() == block_tag => {
                blocks.push(String::new());
            }
            Ok(Event::Text(e)) if in_text => {
                current.push_str(&String::from_utf8_lossy(e.as_ref()));
            }
            Ok(Event::GeneralRef(e)) if in_text => {
                let entity = String::from_utf8_lossy(e.as_ref()).into_owned();
                if let Ok(Some(ch)) = e.resolve_char_ref() {
                    current.push(ch);
                } else if let Some(resolved) = resolve_predefined_entity(&entity) {
                    current.push_str(resolved);
                }
            }
            Ok(Event::End(e)) => {
                let name = e.local_name();
                if name.as_ref() == text_tag {
                    in_text = false;
                } else if name.as_ref() == block_tag && in_block {
                    in_block = false;
                    blocks.push(std::mem::take(&mut current));
                }
            }
            Ok(Event::Eof) => break,
            Err(err) => {
                return Err(format!(
                    "XML error at position {}: {err}",
                    reader.error_position()
                ))
            }
            _ => {}
        }
    }

    Ok(blocks)
}

/// Paragraph texts of `word/document.xml`, joined with newlines.
pub fn docx_text(bytes: &[u8]) -> Result<String, String> {
    let mut archive = open_archive(bytes)?;
    let xml = read_entry(&mut archive, "word/document.xml")?;
    let paragraphs = collect_blocks(&xml, b"t", b"p")?;
    Ok(paragraphs.join("\n"))
}

/// Text of every slide in slide order, one line per paragraph.
pub fn pptx_text(bytes: &[u8]) -> Result<String, String> {
    let mut archive = open_archive(bytes)?;
    let mut slides: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|name| {
            let number = name
                .strip_prefix("ppt/slides/slide")?
                .strip_suffix(".xml")?
                .parse::<u32>()
                .ok()?;
            Some((number, name.to_string()))
        })
        .collect();
    slides.sort_by_key(|(number, _)| *number);

    let mut lines = Vec::new();
    for (_, name) in slides {
        let xml = read_entry(&mut archive, &name)?;
        lines.extend(
            collect_blocks(&xml, b"t", b"p")?
                .into_iter()
                .filter(|line| !line.trim().is_empty()),
        );
    }
    Ok(lines.join("\n"))
}

/// First worksheet rendered as CSV text.
pub fn xlsx_csv(bytes: &[u8]) -> Result<String, String> {
    let mut archive = open_archive(bytes)?;

    let shared_strings = if archive.by_name("xl/sharedStrings.xml").is_ok() {
        let xml = read_entry(&mut archive, "xl/sharedStrings.xml")?;
        collect_blocks(&xml, b"t", b"si")?
    } else {
        Vec::new()
    };

    let mut sheets: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|name| {
            let number = name
                .strip_prefix("xl/worksheets/sheet")?
                .strip_suffix(".xml")?
                .parse::<u32>()
                .ok()?;
            Some((number, name.to_string()))
        })
        .collect();
    sheets.sort_by_key(|(number, _)| *number);
    let (_, first_sheet) = sheets
        .into_iter()
        .next()
        .ok_or_else(|| "Workbook has no worksheets".to_string())?;

    let xml = read_entry(&mut archive, &first_sheet)?;
    let rows = read_sheet_rows(&xml, &shared_strings)?;

    Ok(rows
        .iter()
        .map(|row| {
            row.iter()
                .map(|cell| csv_field(cell))
                .collect::<Vec<_>>()
                .join(",")
        })
        .collect::<Vec<_>>()
        .join("\n"))
}

/// Widest sheet a workbook may declare (`XFD`).
const MAX_COLUMNS: usize = 16_384;

fn read_sheet_rows(xml: &str, shared_strings: &[String]) -> Result<Vec<Vec<String>>, String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    let mut rows = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut cell_column: Option<usize> = None;
    let mut cell_is_shared = false;
    let mut value = String::new();
    let mut in_value = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => row.clear(),
                b"c" => {
                    value.clear();
                    cell_is_shared = false;
                    cell_column = None;
                    for attr in e.attributes().flatten() {
                        match attr.key.local_name().as_ref() {
                            b"t" => cell_is_shared = attr.value.as_ref() == b"s",
                            b"r" => {
                                cell_column =
                                    column_index(&String::from_utf8_lossy(attr.value.as_ref()))?
                            }
                            _ => {}
                        }
                    }
                }
                b"v" | b"t" => in_value = true,
                _ => {}
            },
            Ok(Event::Text(e)) if in_value => {
                value.push_str(&String::from_utf8_lossy(e.as_ref()));
            }
            Ok(Event::GeneralRef(e)) if in_value => {
                let entity = String::from_utf8_lossy(e.as_ref()).into_owned();
                if let Some(resolved) = resolve_predefined_entity(&entity) {
                    value.push_str(resolved);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => {
                    let text = if cell_is_shared {
                        value
                            .trim()
                            .parse::<usize>()
                            .ok()
                            .and_then(|idx| shared_strings.get(idx).cloned())
                            .unwrap_or_default()
                    } else {
                        value.clone()
                    };
                    let column = cell_column.unwrap_or(row.len());
                    if row.len() < column {
                        row.resize(column, String::new());
                    }
                    row.push(text);
                }
                b"row" => rows.push(std::mem::take(&mut row)),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(err) => {
                return Err(format!(
                    "XML error at position {}: {err}",
                    reader.error_position()
                ))
            }
            _ => {}
        }
    }

    Ok(rows)
}

/// Zero-based column index from a cell reference such as `C7`.
fn column_index(reference: &str) -> Result<Option<usize>, String> {
    let letters: String = reference
        .chars()
        .take_while(|ch| ch.is_ascii_alphabetic())
        .collect();
    if letters.is_empty() {
        return Ok(None);
    }
    let mut index = 0usize;
    for ch in letters.chars() {
        let digit = ch.to_ascii_uppercase() as usize - 'A' as usize + 1;
        index = index
            .checked_mul(26)
            .and_then(|value| value.checked_add(digit))
            .filter(|value| *value <= MAX_COLUMNS)
            .ok_or_else(|| format!("Cell reference {reference} is beyond column XFD"))?;
    }
    Ok(Some(index - 1))
}

fn csv_field(cell: &str) -> String {
    if cell.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::io::Write;

    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    /// Builds an in-memory zip package from `(entry name, content)` pairs.
    pub fn package(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = ZipWriter::new(std::io::Cursor::new(Vec::new()));
        for (name, content) in entries {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .expect("start entry");
            writer.write_all(content.as_bytes()).expect("write entry");
        }
        writer.finish().expect("finish zip").into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::package;
    use super::*;

    #[test]
    fn docx_paragraphs_are_joined_by_newline() {
        let xml = r#"<w:document xmlns:w="w"><w:body>
            <w:p><w:r><w:t>Hello </w:t></w:r><w:r><w:t>world</w:t></w:r></w:p>
            <w:p><w:r><w:t>Tom &amp; Jerry</w:t></w:r></w:p>
        </w:body></w:document>"#;
        let bytes = package(&[("word/document.xml", xml)]);

        assert_eq!(docx_text(&bytes).expect("docx"), "Hello world\nTom & Jerry");
    }

    #[test]
    fn docx_without_document_part_fails() {
        let bytes = package(&[("word/other.xml", "<x/>")]);
        let err = docx_text(&bytes).expect_err("missing part");
        assert!(err.contains("word/document.xml"));
    }

    #[test]
    fn pptx_slides_follow_numeric_order() {
        let slide = |text: &str| {
            format!(r#"<p:sld xmlns:a="a" xmlns:p="p"><a:p><a:r><a:t>{text}</a:t></a:r></a:p></p:sld>"#)
        };
        let slide2 = slide("second");
        let slide10 = slide("tenth");
        let slide1 = slide("first");
        let bytes = package(&[
            ("ppt/slides/slide10.xml", slide10.as_str()),
            ("ppt/slides/slide2.xml", slide2.as_str()),
            ("ppt/slides/slide1.xml", slide1.as_str()),
        ]);

        assert_eq!(pptx_text(&bytes).expect("pptx"), "first\nsecond\ntenth");
    }

    #[test]
    fn xlsx_first_sheet_becomes_csv() {
        let shared = r#"<sst><si><t>name</t></si><si><t>Smith, J</t></si></sst>"#;
        let sheet = r#"<worksheet><sheetData>
            <row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1"><v>42</v></c></row>
            <row r="2"><c r="A2" t="s"><v>1</v></c><c r="C2"><v>7</v></c></row>
        </sheetData></worksheet>"#;
        let bytes = package(&[
            ("xl/sharedStrings.xml", shared),
            ("xl/worksheets/sheet1.xml", sheet),
        ]);

        assert_eq!(
            xlsx_csv(&bytes).expect("xlsx"),
            "name,42\n\"Smith, J\",,7"
        );
    }

    #[test]
    fn column_letters_convert_to_indexes() {
        assert_eq!(column_index("A1"), Ok(Some(0)));
        assert_eq!(column_index("Z9"), Ok(Some(25)));
        assert_eq!(column_index("AA3"), Ok(Some(26)));
        assert_eq!(column_index("XFD1"), Ok(Some(16_383)));
        assert_eq!(column_index("12"), Ok(None));
        assert!(column_index("XFE1").is_err());
    }

    #[test]
    fn oversized_cell_reference_is_rejected() {
        let sheet = r#"<worksheet><sheetData>
            <row r="1"><c r="A1"><v>1</v></c><c r="ZZZZZZZZZZZZZZZ1"><v>2</v></c></row>
        </sheetData></worksheet>"#;
        let bytes = package(&[("xl/worksheets/sheet1.xml", sheet)]);

        let err = xlsx_csv(&bytes).expect_err("column out of range");
        assert!(err.contains("beyond column XFD"));
    }

    #[test]
    fn garbage_is_not_an_archive() {
        assert!(docx_text(b"nope").is_err());
    }
}
