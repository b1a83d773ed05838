use regex::Regex;
use std::sync::OnceLock;

fn cell_row_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\$?[A-Za-z]*\$?(\d+)$").expect("valid cell regex"))
}

fn cell_row(reference: &str) -> Option<usize> {
    let caps = cell_row_regex().captures(reference.trim())?;
    caps.get(1)?.as_str().parse().ok()
}

/// Parse the first and last row from an A1 range such as `'Audit'!A12:L14`.
pub fn parse_updated_range(range: &str) -> Option<(usize, usize)> {
    let body = match range.rsplit_once('!') {
        Some((_, body)) => body,
        None => range,
    };
    if body.trim().is_empty() {
        return None;
    }
    let (start, end) = body.split_once(':').unwrap_or((body, body));
    let start = cell_row(start)?;
    let end = cell_row(end)?;
    if end < start {
        return None;
    }
    Some((start, end))
}
