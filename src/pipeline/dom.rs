//! html5ever helpers shared by the export stages.
//!
//! Editor markup is an HTML fragment, so it is parsed as a full document and
//! walked from the root; the implied `html`/`head`/`body` elements carry no
//! content of their own.

use html5ever::tendril::TendrilSink as _;
use html5ever::tree_builder::TreeBuilderOpts;
use html5ever::{parse_document, Attribute, ParseOpts};
use markup5ever_rcdom::RcDom;
use std::cell::RefCell;

/// Parse an editor markup fragment into a DOM tree.
pub fn parse_markup(markup: &str) -> RcDom {
    let opts = ParseOpts {
        tree_builder: TreeBuilderOpts {
            exact_errors: false,
            scripting_enabled: false,
            ..TreeBuilderOpts::default()
        },
        ..ParseOpts::default()
    };
    parse_document(RcDom::default(), opts).one(markup)
}

/// Value of the attribute whose local name is `name`, namespace ignored.
pub fn attr(attrs: &RefCell<Vec<Attribute>>, name: &str) -> Option<String> {
    attrs
        .borrow()
        .iter()
        .find(|a| a.name.local.eq_str_ignore_ascii_case(name))
        .map(|a| a.value.to_string())
}

/// `(local name, value)` pairs of an element's attributes.
pub fn attr_pairs(attrs: &RefCell<Vec<Attribute>>) -> Vec<(String, String)> {
    attrs
        .borrow()
        .iter()
        .map(|a| (a.name.local.to_string(), a.value.to_string()))
        .collect()
}
