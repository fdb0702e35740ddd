//! Word conversion: `.docx` package → editor markup.
//!
//! The import pipeline only needs "bytes in, markup out", so the converter
//! sits behind [`WordConverter`]. [`DocxConverter`] reads the main document
//! part of the OOXML package and maps the constructs the editor understands:
//!
//! | WordprocessingML                         | Markup                 |
//! |------------------------------------------|------------------------|
//! | paragraph, style `Heading1`..`Heading6`  | `<h1>`..`<h6>`         |
//! | paragraph, style `Title`                 | `<h1>`                 |
//! | other paragraphs                         | `<p>`                  |
//! | run with `b` / `i` / `u`                 | `<strong>` / `<em>` / `<u>` |
//! | `br type="page"`, `pageBreakBefore`      | page-break marker      |
//! | `br`, `tab`                              | `<br>`, tab character  |
//! | `tbl` / `tr` / `tc`                      | `<table>` / `<tr>` / `<td>` |
//!
//! Style ids are resolved through `word/styles.xml` when present, so
//! localised ids whose display name is "heading 2" still become `<h2>`.
//! Empty paragraphs are dropped. Deleted revisions and field instructions
//! are not text and never reach the output.

use crate::error::PagesmithError;
use crate::markup::{escape_html, PAGE_BREAK_HTML};
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::NsReader;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::io::{Cursor, Read};
use tracing::{debug, info};
use zip::result::ZipError;
use zip::ZipArchive;

/// Black-box Word converter: document bytes → editor markup.
pub trait WordConverter: Send + Sync {
    fn convert(&self, bytes: &[u8]) -> Result<String, PagesmithError>;
}

/// [`WordConverter`] for OOXML (`.docx`) packages.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocxConverter;

/// Compound File Binary header used by legacy `.doc` files.
const OLE_MAGIC: [u8; 4] = [0xD0, 0xCF, 0x11, 0xE0];

const W_NS: &[u8] = b"http://schemas.openxmlformats.org/wordprocessingml/2006/main";
const W_NS_STRICT: &[u8] = b"http://purl.oclc.org/ooxml/wordprocessingml/main";

impl WordConverter for DocxConverter {
    fn convert(&self, bytes: &[u8]) -> Result<String, PagesmithError> {
        if bytes.starts_with(&OLE_MAGIC) {
            return Err(PagesmithError::conversion(
                "Word",
                "legacy binary .doc files are not supported, save the file as .docx",
            ));
        }

        let mut archive = ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| PagesmithError::conversion("Word", format!("not a .docx package: {e}")))?;

        let document = read_part(&mut archive, "word/document.xml")?
            .ok_or_else(|| PagesmithError::conversion("Word", "package has no word/document.xml"))?;
        let styles = match read_part(&mut archive, "word/styles.xml")? {
            Some(xml) => parse_style_names(&xml)?,
            None => HashMap::new(),
        };
        debug!("docx: {} bytes of document.xml, {} named styles", document.len(), styles.len());

        let markup = document_to_markup(&document, &styles)?;
        info!("Converted Word document → {} bytes of markup", markup.len());
        Ok(markup)
    }
}

/// Read a package part, `None` if it does not exist.
fn read_part(
    archive: &mut ZipArchive<Cursor<&[u8]>>,
    name: &str,
) -> Result<Option<String>, PagesmithError> {
    let mut file = match archive.by_name(name) {
        Ok(file) => file,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(PagesmithError::conversion("Word", format!("{name}: {e}"))),
    };
    let mut content = String::new();
    file.read_to_string(&mut content)
        .map_err(|e| PagesmithError::conversion("Word", format!("{name}: {e}")))?;
    Ok(Some(content))
}

fn is_word_ns(ns: &ResolveResult<'_>) -> bool {
    matches!(ns, ResolveResult::Bound(Namespace(uri)) if *uri == W_NS || *uri == W_NS_STRICT)
}

fn xml_error(part: &str, position: usize, e: impl std::fmt::Display) -> PagesmithError {
    PagesmithError::conversion("Word", format!("{part} at byte {position}: {e}"))
}

/// Value of the attribute with the given local name.
fn attr(e: &BytesStart<'_>, local: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == local)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

/// OOXML toggle properties are on unless `val` says otherwise.
fn toggle_on(e: &BytesStart<'_>) -> bool {
    !matches!(attr(e, b"val").as_deref(), Some("0" | "false" | "off"))
}

/// Style id → lower-cased display name.
fn parse_style_names(xml: &str) -> Result<HashMap<String, String>, PagesmithError> {
    let mut reader = NsReader::from_str(xml);
    let mut names = HashMap::new();
    let mut current: Option<String> = None;

    loop {
        let position = reader.buffer_position();
        let (ns, event) = reader
            .read_resolved_event()
            .map_err(|e| xml_error("word/styles.xml", position, e))?;
        match event {
            Event::Start(e) | Event::Empty(e) if is_word_ns(&ns) => {
                match e.local_name().as_ref() {
                    b"style" => current = attr(&e, b"styleId"),
                    b"name" => {
                        if let (Some(id), Some(name)) = (current.as_ref(), attr(&e, b"val")) {
                            names.insert(id.clone(), name.to_ascii_lowercase());
                        }
                    }
                    _ => {}
                }
            }
            Event::End(e) if is_word_ns(&ns) && e.local_name().as_ref() == b"style" => {
                current = None;
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(names)
}

/// Heading level for a paragraph style, `Title` counting as level 1.
fn heading_level(style_id: &str, styles: &HashMap<String, String>) -> Option<u8> {
    let name = styles
        .get(style_id)
        .cloned()
        .unwrap_or_else(|| style_id.to_ascii_lowercase());
    if name == "title" {
        return Some(1);
    }
    let level: u8 = name.strip_prefix("heading")?.trim().parse().ok()?;
    (1..=6).contains(&level).then_some(level)
}

#[derive(Debug, Default, Clone, Copy)]
struct RunFormat {
    bold: bool,
    italic: bool,
    underline: bool,
}

/// A paragraph being read. Explicit page breaks inside it split the content
/// into `segments`; `current` is the segment after the last break.
#[derive(Debug, Default)]
struct ParagraphState {
    style: Option<String>,
    break_before: bool,
    segments: Vec<String>,
    current: String,
    in_run: bool,
    run_format: RunFormat,
    run_text: String,
}

impl ParagraphState {
    fn flush_run(&mut self) {
        if self.run_text.is_empty() {
            return;
        }
        let mut html = std::mem::take(&mut self.run_text);
        if self.run_format.underline {
            html = format!("<u>{html}</u>");
        }
        if self.run_format.italic {
            html = format!("<em>{html}</em>");
        }
        if self.run_format.bold {
            html = format!("<strong>{html}</strong>");
        }
        self.current.push_str(&html);
    }

    fn page_break(&mut self) {
        self.flush_run();
        self.segments.push(std::mem::take(&mut self.current));
    }
}

struct BodyWalker<'s> {
    styles: &'s HashMap<String, String>,
    // Text boxes nest whole paragraphs inside a run.
    paragraphs: Vec<ParagraphState>,
    in_text: bool,
    out: String,
}

impl<'s> BodyWalker<'s> {
    fn run_mut(&mut self) -> Option<&mut ParagraphState> {
        self.paragraphs.last_mut().filter(|p| p.in_run)
    }

    fn open(&mut self, e: &BytesStart<'_>) {
        match e.local_name().as_ref() {
            b"p" => self.paragraphs.push(ParagraphState::default()),
            b"pStyle" => {
                if let Some(p) = self.paragraphs.last_mut() {
                    p.style = attr(e, b"val");
                }
            }
            b"pageBreakBefore" => {
                if let Some(p) = self.paragraphs.last_mut() {
                    p.break_before = toggle_on(e);
                }
            }
            b"r" => {
                if let Some(p) = self.paragraphs.last_mut() {
                    p.in_run = true;
                    p.run_format = RunFormat::default();
                }
            }
            b"b" => {
                if let Some(p) = self.run_mut() {
                    p.run_format.bold = toggle_on(e);
                }
            }
            b"i" => {
                if let Some(p) = self.run_mut() {
                    p.run_format.italic = toggle_on(e);
                }
            }
            b"u" => {
                if let Some(p) = self.run_mut() {
                    p.run_format.underline = attr(e, b"val").as_deref() != Some("none");
                }
            }
            b"t" => self.in_text = self.run_mut().is_some(),
            b"tab" => {
                if let Some(p) = self.run_mut() {
                    p.run_text.push('\t');
                }
            }
            b"br" => {
                let page = attr(e, b"type").as_deref() == Some("page");
                if let Some(p) = self.run_mut() {
                    if page {
                        p.page_break();
                    } else {
                        p.run_text.push_str("<br>");
                    }
                }
            }
            b"tbl" => self.out.push_str("<table>"),
            b"tr" => self.out.push_str("<tr>"),
            b"tc" => self.out.push_str("<td>"),
            _ => {}
        }
    }

    fn close(&mut self, local: &[u8]) {
        match local {
            b"p" => {
                if let Some(mut p) = self.paragraphs.pop() {
                    p.flush_run();
                    self.emit(p);
                }
            }
            b"r" => {
                if let Some(p) = self.paragraphs.last_mut() {
                    p.flush_run();
                    p.in_run = false;
                }
            }
            b"t" => self.in_text = false,
            b"tbl" => self.out.push_str("</table>"),
            b"tr" => self.out.push_str("</tr>"),
            b"tc" => self.out.push_str("</td>"),
            _ => {}
        }
    }

    fn text(&mut self, text: &str) {
        if let Some(p) = self.run_mut() {
            p.run_text.push_str(&escape_html(text));
        }
    }

    fn emit(&mut self, p: ParagraphState) {
        let tag = match p.style.as_deref().and_then(|s| heading_level(s, self.styles)) {
            Some(level) => format!("h{level}"),
            None => "p".to_string(),
        };
        if p.break_before {
            self.out.push_str(PAGE_BREAK_HTML);
        }
        let ParagraphState {
            mut segments,
            current,
            ..
        } = p;
        segments.push(current);
        for (i, segment) in segments.iter().enumerate() {
            if i > 0 {
                self.out.push_str(PAGE_BREAK_HTML);
            }
            if !segment.trim().is_empty() {
                let _ = write!(self.out, "<{tag}>{segment}</{tag}>");
            }
        }
    }
}

fn document_to_markup(
    xml: &str,
    styles: &HashMap<String, String>,
) -> Result<String, PagesmithError> {
    let mut reader = NsReader::from_str(xml);
    let mut walker = BodyWalker {
        styles,
        paragraphs: Vec::new(),
        in_text: false,
        out: String::new(),
    };

    loop {
        let position = reader.buffer_position();
        let (ns, event) = reader
            .read_resolved_event()
            .map_err(|e| xml_error("word/document.xml", position, e))?;
        match event {
            Event::Start(e) if is_word_ns(&ns) => walker.open(&e),
            Event::Empty(e) if is_word_ns(&ns) => {
                walker.open(&e);
                walker.close(e.local_name().as_ref());
            }
            Event::End(e) if is_word_ns(&ns) => walker.close(e.local_name().as_ref()),
            Event::Text(t) if walker.in_text => {
                let text = t
                    .unescape()
                    .map_err(|e| xml_error("word/document.xml", position, e))?;
                walker.text(&text);
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(walker.out)
}
