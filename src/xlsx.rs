use anyhow::{anyhow, Context};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;
use std::io::{BufReader, Cursor, Read};
use zip::ZipArchive;

use crate::sheet::{Cell, Table};

struct SheetEntry {
    name: String,
    path: String,
}

#[derive(Default)]
struct Relationships {
    worksheets: HashMap<String, String>,
    shared_strings: Option<String>,
}

/// Cell values of an .xlsx package. Styles, formulas and drawings are ignored;
/// a formula cell yields its cached value.
pub struct Workbook {
    archive: ZipArchive<Cursor<Vec<u8>>>,
    sheets: Vec<SheetEntry>,
    shared_strings: Vec<String>,
}

impl Workbook {
    pub fn open(bytes: Vec<u8>) -> anyhow::Result<Workbook> {
        let mut archive = ZipArchive::new(Cursor::new(bytes)).context("not an xlsx (zip) file")?;
        let rels = parse_relationships(&mut archive)?;
        let sheets = parse_sheet_entries(&mut archive, &rels.worksheets)?;
        let shared_strings = parse_shared_strings(
            &mut archive,
            rels.shared_strings.as_deref().unwrap_or("xl/sharedStrings.xml"),
        )?;
        Ok(Workbook {
            archive,
            sheets,
            shared_strings,
        })
    }

    pub fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|s| s.name.clone()).collect()
    }

    pub fn has_sheet(&self, name: &str) -> bool {
        self.sheets.iter().any(|s| s.name == name)
    }

    pub fn read_sheet(&mut self, name: &str) -> anyhow::Result<Table> {
        let path = self
            .sheets
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.path.clone())
            .ok_or_else(|| anyhow!("sheet not found: {}", name))?;
        let file = self
            .archive
            .by_name(&path)
            .with_context(|| format!("missing worksheet part {}", path))?;
        parse_sheet_cells(BufReader::new(file), &self.shared_strings)
            .with_context(|| format!("failed to parse sheet {}", name))
    }
}

fn attr_value(e: &BytesStart, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key || a.key.local_name().as_ref() == key)
        .map(|a| String::from_utf8_lossy(&a.value).to_string())
}

fn parse_relationships(archive: &mut ZipArchive<Cursor<Vec<u8>>>) -> anyhow::Result<Relationships> {
    let mut rels = Relationships::default();
    let Ok(file) = archive.by_name("xl/_rels/workbook.xml.rels") else {
        return Ok(rels);
    };
    let mut xml = Reader::from_reader(BufReader::new(file));
    xml.trim_text(true);
    let mut buf = Vec::new();
    loop {
        match xml.read_event_into(&mut buf).context("bad workbook relationships")? {
            Event::Empty(ref e) | Event::Start(ref e)
                if e.local_name().as_ref() == b"Relationship" =>
            {
                let id = attr_value(e, b"Id").unwrap_or_default();
                let target = attr_value(e, b"Target").unwrap_or_default();
                let rel_type = attr_value(e, b"Type").unwrap_or_default();
                let full_path = match target.strip_prefix('/') {
                    Some(stripped) => stripped.to_string(),
                    None => format!("xl/{}", target),
                };
                if rel_type.ends_with("/worksheet") && !id.is_empty() {
                    rels.worksheets.insert(id, full_path);
                } else if rel_type.ends_with("/sharedStrings") {
                    rels.shared_strings = Some(full_path);
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(rels)
}

fn parse_sheet_entries(
    archive: &mut ZipArchive<Cursor<Vec<u8>>>,
    worksheets: &HashMap<String, String>,
) -> anyhow::Result<Vec<SheetEntry>> {
    let file = archive
        .by_name("xl/workbook.xml")
        .context("xlsx missing xl/workbook.xml")?;
    let mut xml = Reader::from_reader(BufReader::new(file));
    xml.trim_text(true);
    let mut sheets = Vec::new();
    let mut buf = Vec::new();
    loop {
        match xml.read_event_into(&mut buf).context("bad workbook.xml")? {
            Event::Empty(ref e) | Event::Start(ref e) if e.local_name().as_ref() == b"sheet" => {
                let name = attr_value(e, b"name").unwrap_or_default();
                let r_id = attr_value(e, b"id").unwrap_or_default();
                if !name.is_empty() {
                    let path = worksheets.get(&r_id).cloned().unwrap_or_else(|| {
                        format!("xl/worksheets/sheet{}.xml", sheets.len() + 1)
                    });
                    sheets.push(SheetEntry { name, path });
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(sheets)
}

fn parse_shared_strings(
    archive: &mut ZipArchive<Cursor<Vec<u8>>>,
    path: &str,
) -> anyhow::Result<Vec<String>> {
    let Ok(file) = archive.by_name(path) else {
        return Ok(Vec::new());
    };
    let mut xml = Reader::from_reader(BufReader::new(file));
    xml.trim_text(false);

    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_t = false;
    // Phonetic runs (<rPh>) repeat the text in another script; skip them.
    let mut in_phonetic = false;
    let mut buf = Vec::new();
    loop {
        match xml.read_event_into(&mut buf).context("bad sharedStrings.xml")? {
            Event::Start(ref e) => match e.local_name().as_ref() {
                b"si" => current.clear(),
                b"rPh" => in_phonetic = true,
                b"t" if !in_phonetic => in_t = true,
                _ => {}
            },
            Event::Empty(ref e) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Event::Text(ref e) if in_t => current.push_str(&e.unescape()?),
            Event::End(ref e) => match e.local_name().as_ref() {
                b"si" => strings.push(std::mem::take(&mut current)),
                b"rPh" => in_phonetic = false,
                b"t" => in_t = false,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Widest sheet the format allows (`XFD`).
const MAX_COLUMNS: usize = 16_384;

/// `"AB12"` -> 27 (zero based). `None` when the reference has no column letters.
fn column_index(cell_ref: &str) -> anyhow::Result<Option<usize>> {
    let mut idx = 0usize;
    let mut seen = false;
    for ch in cell_ref.chars() {
        if !ch.is_ascii_alphabetic() {
            break;
        }
        seen = true;
        let digit = ch.to_ascii_uppercase() as usize - 'A' as usize + 1;
        idx = idx
            .checked_mul(26)
            .and_then(|v| v.checked_add(digit))
            .filter(|v| *v <= MAX_COLUMNS)
            .ok_or_else(|| anyhow!("cell reference out of range: {}", cell_ref))?;
    }
    Ok(seen.then(|| idx - 1))
}

fn cell_from_raw(kind: &str, raw: &str, shared_strings: &[String]) -> Cell {
    match kind {
        "s" => raw
            .trim()
            .parse::<usize>()
            .ok()
            .and_then(|i| shared_strings.get(i))
            .map(|s| Cell::from_json(&serde_json::Value::String(s.clone())))
            .unwrap_or(Cell::Empty),
        "b" => Cell::Text(if raw.trim() == "1" { "TRUE" } else { "FALSE" }.to_string()),
        "str" | "inlineStr" | "e" => Cell::from_json(&serde_json::Value::String(raw.to_string())),
        _ => match raw.trim().parse::<f64>() {
            Ok(v) => Cell::Number(v),
            Err(_) if raw.trim().is_empty() => Cell::Empty,
            Err(_) => Cell::Text(raw.trim().to_string()),
        },
    }
}

fn parse_sheet_cells<R: Read>(reader: BufReader<R>, shared_strings: &[String]) -> anyhow::Result<Table> {
    let mut xml = Reader::from_reader(reader);
    xml.trim_text(false);

    let mut rows: Vec<Vec<Cell>> = Vec::new();
    let mut row: Vec<Cell> = Vec::new();
    let mut col = 0usize;
    let mut kind = String::new();
    let mut value = String::new();
    let mut in_value = false;
    let mut buf = Vec::new();

    loop {
        match xml.read_event_into(&mut buf)? {
            Event::Start(ref e) => match e.local_name().as_ref() {
                b"row" => row = Vec::new(),
                b"c" => {
                    col = match attr_value(e, b"r") {
                        Some(r) => column_index(&r)?.unwrap_or(row.len()),
                        None => row.len(),
                    };
                    kind = attr_value(e, b"t").unwrap_or_default();
                    value.clear();
                }
                b"v" | b"t" => in_value = true,
                _ => {}
            },
            Event::Empty(ref e) if e.local_name().as_ref() == b"row" => rows.push(Vec::new()),
            Event::Text(ref e) if in_value => value.push_str(&e.unescape()?),
            Event::End(ref e) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => {
                    if row.len() <= col {
                        row.resize(col + 1, Cell::Empty);
                    }
                    row[col] = cell_from_raw(&kind, &value, shared_strings);
                }
                b"row" => rows.push(std::mem::take(&mut row)),
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(Table::new(rows))
}
