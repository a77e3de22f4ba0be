//! HTML fragment parsing
//!
//! Parses with `scraper` and copies the resulting tree into the arena.
//! Comments, doctypes and processing instructions are dropped.

use scraper::{ElementRef, Html};

use super::document::{Document, NodeId};

/// Parse `html` into detached nodes of `doc`
///
/// Returns the top-level nodes in source order. Nesting depth is not bounded
/// by the call stack.
pub fn fragment(doc: &mut Document, html: &str) -> Vec<NodeId> {
    let parsed = Html::parse_fragment(html);

    let mut pending = Vec::new();
    let top = copy_children(doc, parsed.root_element(), &mut pending);
    while let Some((id, element)) = pending.pop() {
        for child in copy_children(doc, element, &mut pending) {
            doc.append_child(id, child);
        }
    }
    top
}

/// Copy the direct children of `parent`
///
/// Copied elements are queued on `pending` so their own children get copied
/// later.
fn copy_children<'a>(
    doc: &mut Document,
    parent: ElementRef<'a>,
    pending: &mut Vec<(NodeId, ElementRef<'a>)>,
) -> Vec<NodeId> {
    let mut out = Vec::new();
    for child in parent.children() {
        if let Some(text) = child.value().as_text() {
            out.push(doc.create_text(text));
        } else if let Some(element) = ElementRef::wrap(child) {
            let id = doc.create_element(element.value().name());
            for (name, value) in element.value().attrs() {
                // Only fails for text nodes
                let _ = doc.set_attribute(id, name, value);
            }
            pending.push((id, element));
            out.push(id);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragment_keeps_structure() {
        let mut doc = Document::new();
        let nodes = fragment(&mut doc, "<p class=\"x\">a<b>b</b></p>text<!-- c -->");
        assert_eq!(nodes.len(), 2);
        assert_eq!(doc.tag(nodes[0]), Some("p"));
        assert_eq!(doc.attribute(nodes[0], "class"), Some("x"));
        assert_eq!(doc.text(nodes[1]), Some("text"));
        assert_eq!(doc.outer_html(nodes[0]), "<p class=\"x\">a<b>b</b></p>");
    }

    #[test]
    fn test_attribute_names_are_lowercased() {
        let mut doc = Document::new();
        let nodes = fragment(
            &mut doc,
            "<input data-ampere=\"h1\" @Style.Background-Color='{{ \"red\" }}'>",
        );
        assert_eq!(doc.attribute(nodes[0], "data-ampere"), Some("h1"));
        assert_eq!(
            doc.attribute(nodes[0], "@style.background-color"),
            Some("{{ \"red\" }}")
        );
    }

    #[test]
    fn test_deep_markup_is_copied_iteratively() {
        let depth = 10_000;
        let html = format!("{}x{}", "<div>".repeat(depth), "</div>".repeat(depth));
        let mut doc = Document::new();
        let nodes = fragment(&mut doc, &html);

        assert_eq!(nodes.len(), 1);
        let all = doc.descendants(nodes[0]);
        assert_eq!(all.len(), depth + 1);
        assert_eq!(doc.text(all[depth]), Some("x"));
    }
}
