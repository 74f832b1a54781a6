use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use tracing::debug;

use crate::models::{Label, TradeRecord, TradeType};

/// A table cell carrying its column label, e.g. `<td data-label="S/L">1.2345</td>`.
static CELL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<td\b[^>]*?\bdata-label\s*=\s*["']([^"']+)["'][^>]*>(.*?)</td\s*>"#)
        .expect("Invalid cell pattern regex")
});

static TAG_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<[^>]*>").expect("Invalid tag pattern regex"));

static NBSP_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)&nbsp;|&#160;|&#xa0;").expect("Invalid nbsp pattern regex"));

static WHITESPACE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("Invalid whitespace pattern regex"));

/// Pulls trade rows out of the provider's signal page.
///
/// The page is rendered by a browser-facing frontend and its markup drifts,
/// so rows are located by the nearest enclosing `<tr`/`</tr>` around a
/// recognized Type cell instead of by parsing the document tree.
#[derive(Debug, Default, Clone)]
pub struct TradeExtractor;

impl TradeExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Trade records in document order. Returns an empty list when the
    /// table has not been published yet.
    pub fn extract(&self, content: &str) -> Vec<TradeRecord> {
        // ASCII lowercasing keeps byte offsets identical to `content`
        let lower = content.to_ascii_lowercase();

        let Some((body_start, body_end)) = table_body(&lower) else {
            debug!("No table body in page");
            return Vec::new();
        };
        let body = &content[body_start..body_end];

        let mut seen_rows = HashSet::new();
        let mut records = Vec::new();

        for caps in CELL_PATTERN.captures_iter(body) {
            if Label::from_markup(&caps[1]) != Some(Label::Type) {
                continue;
            }
            let Ok(trade_type) = normalize(&caps[2]).parse::<TradeType>() else {
                continue;
            };

            let Some(cell) = caps.get(0) else {
                continue;
            };
            let cell_start = body_start + cell.start();
            let cell_end = body_start + cell.end();

            let Some(row_start) = rfind_row_open(&lower[body_start..cell_start]) else {
                continue;
            };
            let row_start = body_start + row_start;
            let Some(row_len) = lower[cell_end..body_end].find("</tr") else {
                continue;
            };
            let row_end = cell_end + row_len;

            if !seen_rows.insert(row_start) {
                continue;
            }

            records.push(TradeRecord::new(
                trade_type,
                row_cells(&content[row_start..row_end]),
            ));
        }

        debug!("Extracted {} trade rows", records.len());
        records
    }
}

/// Byte range of the first `<tbody ...>` ... `</tbody>` content.
fn table_body(lower: &str) -> Option<(usize, usize)> {
    let open = lower.find("<tbody")?;
    let start = open + lower[open..].find('>')? + 1;
    let end = start + lower[start..].find("</tbody")?;
    Some((start, end))
}

/// Position of the last `<tr` opening tag in `haystack`, skipping tags
/// that merely start with `tr` such as `<track>`.
fn rfind_row_open(haystack: &str) -> Option<usize> {
    let mut end = haystack.len();
    while let Some(pos) = haystack[..end].rfind("<tr") {
        match haystack.as_bytes().get(pos + 3) {
            Some(b'>') | Some(b' ') | Some(b'\t') | Some(b'\n') | Some(b'\r') | Some(b'/') => {
                return Some(pos)
            }
            _ => end = pos,
        }
    }
    None
}

/// Labeled cells of one row; the first occurrence of a label wins.
fn row_cells(row: &str) -> Vec<(Label, String)> {
    let mut seen = HashSet::new();
    CELL_PATTERN
        .captures_iter(row)
        .filter_map(|caps| {
            let label = Label::from_markup(&caps[1])?;
            seen.insert(label).then(|| (label, normalize(&caps[2])))
        })
        .collect()
}

/// Strips inner markup, turns non-breaking spaces into spaces and collapses
/// whitespace runs.
pub fn normalize(raw: &str) -> String {
    let text = TAG_PATTERN.replace_all(raw, " ");
    let text = NBSP_PATTERN.replace_all(&text, " ");
    let text = text.replace('\u{a0}', " ").replace("&amp;", "&");
    WHITESPACE_PATTERN
        .replace_all(&text, " ")
        .trim()
        .to_string()
}
