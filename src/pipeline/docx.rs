//! Structured export: editor markup → WordprocessingML package.
//!
//! The markup is parsed with html5ever and walked depth-first into a flat
//! list of [`DocxParagraph`]s:
//!
//! * a text node with visible content becomes a paragraph with one run;
//! * a page-break marker becomes an empty paragraph with `pageBreakBefore`;
//! * `h1`/`h2`/`h3` become one bold run sized 32/28/24 half-points;
//! * a `p` becomes one run per descendant text node, styled from the text
//!   node's immediate parent only (`b`/`strong`, `em`/`i`, `u`);
//! * any other element is descended into.
//!
//! Formatting does not cascade: in `<strong><em>x</em></strong>` the run is
//! italic but not bold. A document without any text exports as a single
//! "Empty document" paragraph.

use crate::error::PagesmithError;
use crate::markup::is_page_break_element;
use crate::output::{ExportedFile, DOCX_FILE_NAME, DOCX_MIME_TYPE};
use crate::pipeline::dom::{attr_pairs, parse_markup};
use markup5ever_rcdom::{Handle, NodeData};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::{Cursor, Write};
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Text used when the document has nothing to export.
pub const EMPTY_DOCUMENT_TEXT: &str = "Empty document";

const W_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";

/// A4 portrait in twentieths of a point, with 10 mm (567 twip) margins.
const PAGE_W_TWIPS: &str = "11906";
const PAGE_H_TWIPS: &str = "16838";
const MARGIN_TWIPS: &str = "567";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocxRun {
    pub text: String,
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    /// Font size in half-points; `None` keeps the document default.
    pub size_half_points: Option<u32>,
}

impl DocxRun {
    fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocxParagraph {
    pub page_break_before: bool,
    pub runs: Vec<DocxRun>,
}

impl DocxParagraph {
    pub fn has_text(&self) -> bool {
        self.runs.iter().any(|r| !r.text.trim().is_empty())
    }
}

/// Walk the markup into paragraphs.
pub fn collect_paragraphs(markup: &str) -> Vec<DocxParagraph> {
    let dom = parse_markup(markup);
    let mut paragraphs = Vec::new();
    walk(&dom.document, &mut paragraphs);

    if !paragraphs.iter().any(DocxParagraph::has_text) {
        return vec![DocxParagraph {
            page_break_before: false,
            runs: vec![DocxRun::plain(EMPTY_DOCUMENT_TEXT)],
        }];
    }
    paragraphs
}

fn heading_size(tag: &str) -> Option<u32> {
    match tag {
        "h1" => Some(32),
        "h2" => Some(28),
        "h3" => Some(24),
        _ => None,
    }
}

fn walk(handle: &Handle, out: &mut Vec<DocxParagraph>) {
    match &handle.data {
        NodeData::Text { contents } => {
            let text = contents.borrow();
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                out.push(DocxParagraph {
                    page_break_before: false,
                    runs: vec![DocxRun::plain(trimmed)],
                });
            }
        }
        NodeData::Element { name, attrs, .. } => {
            let tag = name.local.to_string().to_ascii_lowercase();
            if matches!(tag.as_str(), "script" | "style" | "head" | "title") {
                return;
            }
            let pairs = attr_pairs(attrs);
            if is_page_break_element(&tag, pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))) {
                out.push(DocxParagraph {
                    page_break_before: true,
                    runs: Vec::new(),
                });
                return;
            }
            if let Some(size) = heading_size(&tag) {
                let mut text = String::new();
                text_content(handle, &mut text);
                let text = text.trim();
                if !text.is_empty() {
                    out.push(DocxParagraph {
                        page_break_before: false,
                        runs: vec![DocxRun {
                            text: text.to_string(),
                            bold: true,
                            size_half_points: Some(size),
                            ..Default::default()
                        }],
                    });
                }
                return;
            }
            if tag == "p" {
                let mut runs = Vec::new();
                styled_runs(handle, "p", &mut runs);
                if runs.iter().any(|r| !r.text.trim().is_empty()) {
                    out.push(DocxParagraph {
                        page_break_before: false,
                        runs,
                    });
                }
                return;
            }
            for child in handle.children.borrow().iter() {
                walk(child, out);
            }
        }
        NodeData::Document => {
            for child in handle.children.borrow().iter() {
                walk(child, out);
            }
        }
        _ => {}
    }
}

fn text_content(handle: &Handle, out: &mut String) {
    match &handle.data {
        NodeData::Text { contents } => out.push_str(&contents.borrow()),
        _ => {
            for child in handle.children.borrow().iter() {
                text_content(child, out);
            }
        }
    }
}

/// One run per descendant text node, flagged from `parent`, its direct parent tag.
fn styled_runs(handle: &Handle, parent: &str, out: &mut Vec<DocxRun>) {
    for child in handle.children.borrow().iter() {
        match &child.data {
            NodeData::Text { contents } => {
                let text = contents.borrow();
                if text.trim().is_empty() {
                    continue;
                }
                out.push(DocxRun {
                    text: text.to_string(),
                    bold: matches!(parent, "b" | "strong"),
                    italic: matches!(parent, "em" | "i"),
                    underline: parent == "u",
                    size_half_points: None,
                });
            }
            NodeData::Element { name, .. } => {
                let tag = name.local.to_string().to_ascii_lowercase();
                if tag == "br" {
                    continue;
                }
                styled_runs(child, &tag, out);
            }
            _ => {}
        }
    }
}

type XmlWriter = Writer<Cursor<Vec<u8>>>;

fn docx_err(e: impl std::fmt::Display) -> PagesmithError {
    PagesmithError::conversion("DOCX", e)
}

fn empty(writer: &mut XmlWriter, name: &str, attrs: &[(&str, &str)]) -> Result<(), PagesmithError> {
    let mut elem = BytesStart::new(name);
    for attr in attrs {
        elem.push_attribute(*attr);
    }
    writer.write_event(Event::Empty(elem)).map_err(docx_err)
}

fn start(writer: &mut XmlWriter, name: &str) -> Result<(), PagesmithError> {
    writer
        .write_event(Event::Start(BytesStart::new(name)))
        .map_err(docx_err)
}

fn end(writer: &mut XmlWriter, name: &str) -> Result<(), PagesmithError> {
    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .map_err(docx_err)
}

fn write_run(writer: &mut XmlWriter, run: &DocxRun) -> Result<(), PagesmithError> {
    start(writer, "w:r")?;
    let has_props = run.bold || run.italic || run.underline || run.size_half_points.is_some();
    if has_props {
        start(writer, "w:rPr")?;
        if run.bold {
            empty(writer, "w:b", &[])?;
        }
        if run.italic {
            empty(writer, "w:i", &[])?;
        }
        if run.underline {
            empty(writer, "w:u", &[("w:val", "single")])?;
        }
        if let Some(size) = run.size_half_points {
            let size = size.to_string();
            empty(writer, "w:sz", &[("w:val", size.as_str())])?;
            empty(writer, "w:szCs", &[("w:val", size.as_str())])?;
        }
        end(writer, "w:rPr")?;
    }
    let mut t = BytesStart::new("w:t");
    t.push_attribute(("xml:space", "preserve"));
    writer.write_event(Event::Start(t)).map_err(docx_err)?;
    writer
        .write_event(Event::Text(BytesText::new(&run.text)))
        .map_err(docx_err)?;
    end(writer, "w:t")?;
    end(writer, "w:r")
}

/// Serialise `word/document.xml`.
pub fn document_xml(paragraphs: &[DocxParagraph]) -> Result<Vec<u8>, PagesmithError> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))
        .map_err(docx_err)?;

    let mut root = BytesStart::new("w:document");
    root.push_attribute(("xmlns:w", W_NS));
    writer.write_event(Event::Start(root)).map_err(docx_err)?;
    start(&mut writer, "w:body")?;

    for paragraph in paragraphs {
        start(&mut writer, "w:p")?;
        if paragraph.page_break_before {
            start(&mut writer, "w:pPr")?;
            empty(&mut writer, "w:pageBreakBefore", &[])?;
            end(&mut writer, "w:pPr")?;
        }
        for run in &paragraph.runs {
            write_run(&mut writer, run)?;
        }
        end(&mut writer, "w:p")?;
    }

    start(&mut writer, "w:sectPr")?;
    empty(
        &mut writer,
        "w:pgSz",
        &[("w:w", PAGE_W_TWIPS), ("w:h", PAGE_H_TWIPS)],
    )?;
    empty(
        &mut writer,
        "w:pgMar",
        &[
            ("w:top", MARGIN_TWIPS),
            ("w:right", MARGIN_TWIPS),
            ("w:bottom", MARGIN_TWIPS),
            ("w:left", MARGIN_TWIPS),
            ("w:header", "0"),
            ("w:footer", "0"),
            ("w:gutter", "0"),
        ],
    )?;
    end(&mut writer, "w:sectPr")?;
    end(&mut writer, "w:body")?;
    end(&mut writer, "w:document")?;

    Ok(writer.into_inner().into_inner())
}

const CONTENT_TYPES_XML: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
    r#"<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">"#,
    r#"<Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>"#,
    r#"<Default Extension="xml" ContentType="application/xml"/>"#,
    r#"<Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/>"#,
    r#"</Types>"#
);

const PACKAGE_RELS_XML: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
    r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
    r#"<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/>"#,
    r#"</Relationships>"#
);

/// Package paragraphs into a `.docx` file.
pub fn write_docx(paragraphs: &[DocxParagraph]) -> Result<Vec<u8>, PagesmithError> {
    let document = document_xml(paragraphs)?;
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));

    let parts: [(&str, &[u8]); 3] = [
        ("[Content_Types].xml", CONTENT_TYPES_XML.as_bytes()),
        ("_rels/.rels", PACKAGE_RELS_XML.as_bytes()),
        ("word/document.xml", document.as_slice()),
    ];
    for (name, bytes) in parts {
        zip.start_file(name, options).map_err(docx_err)?;
        zip.write_all(bytes).map_err(docx_err)?;
    }

    let cursor = zip.finish().map_err(docx_err)?;
    debug!("docx package: {} paragraphs", paragraphs.len());
    Ok(cursor.into_inner())
}

/// Produce `document.docx` from the editor markup.
pub fn export_structured(markup: &str) -> Result<ExportedFile, PagesmithError> {
    let paragraphs = collect_paragraphs(markup);
    let bytes = write_docx(&paragraphs)?;
    info!(
        "Exported {} paragraphs → {} bytes of DOCX",
        paragraphs.len(),
        bytes.len()
    );
    Ok(ExportedFile {
        file_name: DOCX_FILE_NAME,
        mime_type: DOCX_MIME_TYPE,
        units: paragraphs.len(),
        bytes,
    })
}
