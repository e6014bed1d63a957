use super::document::{Document, NodeKey, NodeKind};

const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
    "track", "wbr",
];

const RAW_TEXT_TAGS: &[&str] = &["script", "style"];

impl Document {
    pub fn to_html(&self) -> String {
        let mut out = String::new();
        if self.element(self.root()).map(|e| e.is("html")).unwrap_or(false) {
            out.push_str("<!DOCTYPE html>\n");
        }
        self.write_node(self.root(), false, &mut out);
        out
    }

    fn write_node(&self, key: NodeKey, raw_text: bool, out: &mut String) {
        let Some(node) = self.node(key) else {
            return;
        };
        match &node.kind {
            NodeKind::Text(text) => {
                if raw_text {
                    out.push_str(text);
                } else {
                    out.push_str(&html_escape::encode_text(text));
                }
            }
            NodeKind::Element(el) => {
                out.push('<');
                out.push_str(&el.tag);
                for (name, value) in &el.attrs {
                    out.push(' ');
                    out.push_str(name);
                    out.push_str("=\"");
                    out.push_str(&html_escape::encode_double_quoted_attribute(value));
                    out.push('"');
                }
                out.push('>');

                if VOID_TAGS.iter().any(|t| el.is(t)) {
                    return;
                }

                let raw = RAW_TEXT_TAGS.iter().any(|t| el.is(t));
                for child in self.children(key) {
                    self.write_node(*child, raw, out);
                }

                out.push_str("</");
                out.push_str(&el.tag);
                out.push('>');
            }
        }
    }
}
