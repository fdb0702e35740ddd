//! Page-break markers and the canonical pagination splitter.
//!
//! A page break is an atomic, non-editable `<hr>` carrying a fixed class and
//! `data-page-break="true"`. Markers are the only valid split points of a
//! document; they carry no content.
//!
//! Both consumers of pagination go through [`split_pages`]:
//!
//! * the raster export wants every segment, empty ones included, so that the
//!   page count always equals `markers + 1`;
//! * [`inspect_pages`] is a debugging view that trims each segment and drops
//!   the empty ones while keeping the original indices, so its keys are not
//!   guaranteed to be contiguous.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

/// CSS class carried by every page-break marker.
pub const PAGE_BREAK_CLASS: &str = "page-break";

/// Attribute that identifies a page-break marker; its value is always `"true"`.
pub const PAGE_BREAK_ATTR: &str = "data-page-break";

/// Wire form of a page-break marker.
pub const PAGE_BREAK_HTML: &str = r#"<hr class="page-break" data-page-break="true">"#;

// Attribute order, quoting and self-closing slashes vary between serialisers.
static RE_PAGE_BREAK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<hr\b[^>]*?\bdata-page-break\s*=\s*(?:"true"|'true'|true\b)[^>]*>"#).unwrap()
});

/// A contiguous slice of markup between two markers (or document boundaries).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageFragment {
    /// 0-based position of the segment in the split result.
    pub index: usize,
    /// Raw markup of the segment, untrimmed.
    pub markup: String,
}

impl PageFragment {
    /// True when the segment holds nothing but whitespace.
    pub fn is_blank(&self) -> bool {
        self.markup.trim().is_empty()
    }
}

/// Split markup on page-break markers, keeping every segment.
///
/// A document with N markers always yields N + 1 fragments; empty segments
/// (two adjacent markers, a leading or trailing marker) stay at their
/// position.
pub fn split_pages(markup: &str) -> Vec<PageFragment> {
    RE_PAGE_BREAK
        .split(markup)
        .enumerate()
        .map(|(index, segment)| PageFragment {
            index,
            markup: segment.to_string(),
        })
        .collect()
}

/// Trimmed, non-empty fragments keyed by their position in [`split_pages`].
///
/// Indices of dropped (blank) segments are skipped, not reused.
pub fn inspect_pages(markup: &str) -> BTreeMap<usize, String> {
    split_pages(markup)
        .into_iter()
        .filter_map(|f| {
            let trimmed = f.markup.trim();
            (!trimmed.is_empty()).then(|| (f.index, trimmed.to_string()))
        })
        .collect()
}

/// Number of page-break markers in the markup.
pub fn count_page_breaks(markup: &str) -> usize {
    RE_PAGE_BREAK.find_iter(markup).count()
}

/// Join page blocks into one document, with a marker after every block but the last.
pub fn join_with_breaks<I, S>(blocks: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = String::new();
    for (i, block) in blocks.into_iter().enumerate() {
        if i > 0 {
            out.push_str(PAGE_BREAK_HTML);
        }
        out.push_str(block.as_ref());
    }
    out
}

/// True if an element with this tag and attributes is a page-break marker.
pub fn is_page_break_element<'a>(
    tag: &str,
    mut attrs: impl Iterator<Item = (&'a str, &'a str)>,
) -> bool {
    tag.eq_ignore_ascii_case("hr")
        && attrs.any(|(name, value)| name.eq_ignore_ascii_case(PAGE_BREAK_ATTR) && value == "true")
}

/// Escape text for inclusion in element content or a double-quoted attribute.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}
