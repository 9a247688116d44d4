//! Spreadsheet output.
//!
//! Writes a SpreadsheetML 2003 workbook (plain XML that Excel and LibreOffice
//! open directly) with one worksheet per query.
//!
//! # Worksheet layout
//!
//! ```text
//! row 1 | Sentimentos das notícias/declarações: <query>   (merged, green)
//! row 2 | Título | Data | URL | Positivo | Negativo | Neutro [| Resumo | Chave usada]
//! row 3+| one row per article
//! ```
//!
//! The summary columns appear only when at least one row of the worksheet
//! carries a summary.

use crate::aggregate::{QueryTable, ResultTable};
use crate::error::ExportError;
use crate::utils::{clip_chars, sanitize_sheet_name};
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesPI, BytesStart, BytesText, Event};
use std::collections::HashSet;
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};

const NS: &str = "urn:schemas-microsoft-com:office:spreadsheet";
const TITLE: &str = "Sentimentos das notícias/declarações";
const BASE_HEADERS: [&str; 6] = ["Título", "Data", "URL", "Positivo", "Negativo", "Neutro"];
const SUMMARY_HEADERS: [&str; 2] = ["Resumo", "Chave usada"];

type XmlWriter = Writer<Vec<u8>>;

/// Render `table` and write it to `path`.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn write_workbook(table: &ResultTable, path: &Path) -> Result<(), ExportError> {
    let bytes = render_workbook(table)?;
    fs::write(path, bytes).await?;
    info!(sheets = table.tables.len().max(1), rows = table.total_rows(), "Wrote workbook");
    Ok(())
}

/// Serialize `table` as a SpreadsheetML document.
pub fn render_workbook(table: &ResultTable) -> Result<Vec<u8>, ExportError> {
    let mut w = Writer::new(Vec::new());
    w.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    w.write_event(Event::PI(BytesPI::new(r#"mso-application progid="Excel.Sheet""#)))?;
    w.write_event(Event::Start(
        BytesStart::new("Workbook").with_attributes([("xmlns", NS), ("xmlns:ss", NS)]),
    ))?;
    write_styles(&mut w)?;

    let names = sheet_names(table);
    if table.tables.is_empty() {
        // A workbook needs at least one worksheet.
        write_sheet(&mut w, "Sheet", None)?;
    }
    for (query_table, name) in table.tables.iter().zip(&names) {
        write_sheet(&mut w, name, Some(query_table))?;
    }

    w.write_event(Event::End(BytesEnd::new("Workbook")))?;
    Ok(w.into_inner())
}

fn write_styles(w: &mut XmlWriter) -> Result<(), ExportError> {
    w.write_event(Event::Start(BytesStart::new("Styles")))?;

    w.write_event(Event::Start(BytesStart::new("Style").with_attributes([("ss:ID", "title")])))?;
    w.write_event(Event::Empty(
        BytesStart::new("Alignment")
            .with_attributes([("ss:Horizontal", "Center"), ("ss:Vertical", "Center")]),
    ))?;
    w.write_event(Event::Empty(BytesStart::new("Font").with_attributes([("ss:Bold", "1")])))?;
    w.write_event(Event::Empty(
        BytesStart::new("Interior")
            .with_attributes([("ss:Color", "#00FF00"), ("ss:Pattern", "Solid")]),
    ))?;
    w.write_event(Event::End(BytesEnd::new("Style")))?;

    w.write_event(Event::Start(BytesStart::new("Style").with_attributes([("ss:ID", "header")])))?;
    w.write_event(Event::Empty(BytesStart::new("Font").with_attributes([("ss:Bold", "1")])))?;
    w.write_event(Event::End(BytesEnd::new("Style")))?;

    w.write_event(Event::End(BytesEnd::new("Styles")))?;
    Ok(())
}

fn write_sheet(
    w: &mut XmlWriter,
    name: &str,
    table: Option<&QueryTable>,
) -> Result<(), ExportError> {
    let with_summaries = table.is_some_and(QueryTable::has_summaries);
    let mut headers: Vec<&str> = BASE_HEADERS.to_vec();
    if with_summaries {
        headers.extend(SUMMARY_HEADERS);
    }

    w.write_event(Event::Start(BytesStart::new("Worksheet").with_attributes([("ss:Name", name)])))?;
    w.write_event(Event::Start(BytesStart::new("Table")))?;

    let title = match table {
        Some(t) => format!("{TITLE}: {}", t.query),
        None => TITLE.to_string(),
    };
    let merge_across = (headers.len() - 1).to_string();
    w.write_event(Event::Start(BytesStart::new("Row")))?;
    w.write_event(Event::Start(
        BytesStart::new("Cell").with_attributes([
            ("ss:MergeAcross", merge_across.as_str()),
            ("ss:StyleID", "title"),
        ]),
    ))?;
    write_data(w, &title)?;
    w.write_event(Event::End(BytesEnd::new("Cell")))?;
    w.write_event(Event::End(BytesEnd::new("Row")))?;

    write_row(w, &headers, Some("header"))?;

    if let Some(table) = table {
        let c = table.columns();
        for i in 0..table.len() {
            let mut cells = vec![
                c.titles[i].as_str(),
                c.dates[i].as_str(),
                c.urls[i].as_str(),
                c.positive[i].as_str(),
                c.negative[i].as_str(),
                c.neutral[i].as_str(),
            ];
            if with_summaries {
                cells.push(c.summaries[i].as_deref().unwrap_or(""));
                cells.push(c.credentials[i].as_deref().unwrap_or(""));
            }
            write_row(w, &cells, None)?;
        }
    }

    w.write_event(Event::End(BytesEnd::new("Table")))?;
    w.write_event(Event::End(BytesEnd::new("Worksheet")))?;
    Ok(())
}

fn write_row(w: &mut XmlWriter, cells: &[&str], style: Option<&str>) -> Result<(), ExportError> {
    w.write_event(Event::Start(BytesStart::new("Row")))?;
    for value in cells {
        let mut cell = BytesStart::new("Cell");
        if let Some(style) = style {
            cell.push_attribute(("ss:StyleID", style));
        }
        w.write_event(Event::Start(cell))?;
        write_data(w, value)?;
        w.write_event(Event::End(BytesEnd::new("Cell")))?;
    }
    w.write_event(Event::End(BytesEnd::new("Row")))?;
    Ok(())
}

fn write_data(w: &mut XmlWriter, value: &str) -> Result<(), ExportError> {
    w.write_event(Event::Start(BytesStart::new("Data").with_attributes([("ss:Type", "String")])))?;
    w.write_event(Event::Text(BytesText::new(value)))?;
    w.write_event(Event::End(BytesEnd::new("Data")))?;
    Ok(())
}

/// Sanitized worksheet names, made unique case-insensitively by suffixing
/// ` (2)`, ` (3)`, ... within the 31-character limit.
fn sheet_names(table: &ResultTable) -> Vec<String> {
    let mut seen = HashSet::new();
    table
        .tables
        .iter()
        .map(|t| {
            let base = sanitize_sheet_name(t.query.as_str());
            let mut name = base.clone();
            let mut n = 2;
            while !seen.insert(name.to_lowercase()) {
                let suffix = format!(" ({n})");
                let room = 31 - suffix.chars().count();
                name = format!("{}{}", clip_chars(&base, room).trim_end(), suffix);
                n += 1;
            }
            name
        })
        .collect()
}
