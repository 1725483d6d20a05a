//! HTML serialization of resolved tags.

use indexmap::IndexMap;

use super::tag::{AttributeValue, ResolvedChild, ResolvedTag};

/// Render a resolved child to HTML. Text is escaped.
pub fn render_tag(child: &ResolvedChild) -> String {
    match child {
        ResolvedChild::Text(text) => escape_text(text),
        ResolvedChild::Tag(tag) => render_element(tag),
    }
}

pub fn render_element(tag: &ResolvedTag) -> String {
    let inner: String = tag.children.iter().map(render_tag).collect();
    render_parts(&tag.tag, &tag.attributes, &inner, tag.is_self_closing)
}

/// Render an element from its parts. `inner_html` is inserted verbatim and
/// ignored for self-closing elements.
pub fn render_parts(
    name: &str,
    attributes: &IndexMap<String, AttributeValue>,
    inner_html: &str,
    self_closing: bool,
) -> String {
    let mut out = String::with_capacity(name.len() * 2 + inner_html.len() + 16);
    out.push('<');
    out.push_str(name);

    for (key, value) in attributes {
        match value {
            AttributeValue::Flag(false) => {}
            AttributeValue::Flag(true) => {
                out.push(' ');
                out.push_str(key);
            }
            AttributeValue::Text(text) => {
                out.push(' ');
                out.push_str(key);
                out.push_str("=\"");
                out.push_str(&escape_attribute(text));
                out.push('"');
            }
        }
    }

    out.push('>');
    if !self_closing {
        out.push_str(inner_html);
        out.push_str("</");
        out.push_str(name);
        out.push('>');
    }
    out
}

pub fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            c => out.push(c),
        }
    }
    out
}

pub fn escape_attribute(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            c => out.push(c),
        }
    }
    out
}
