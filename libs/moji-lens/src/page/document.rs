use parking_lot::Mutex;
use slotmap::{new_key_type, SlotMap};
use std::path::Path;
use std::sync::Arc;

use super::types::{ElementData, ElementSnapshot, NodeSnapshot, PageError, PageSnapshot};

new_key_type! {
    /// Weak handle to a document node. Lookups fail once the node is removed.
    pub struct NodeKey;
}

/// Document shared between a page context and its scan workers.
pub type SharedDocument = Arc<Mutex<Document>>;

/// Tags whose text never contributes to the rendered page text.
const NON_RENDERED_TAGS: &[&str] = &["head", "script", "style", "noscript", "template"];

#[derive(Debug, Clone)]
pub enum NodeKind {
    Element(ElementData),
    Text(String),
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    parent: Option<NodeKey>,
    children: Vec<NodeKey>,
}

impl Node {
    fn new(kind: NodeKind, parent: Option<NodeKey>) -> Self {
        Self {
            kind,
            parent,
            children: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Document {
    url: Option<String>,
    nodes: SlotMap<NodeKey, Node>,
    root: NodeKey,
}

impl Document {
    pub fn new(url: Option<&str>, root: ElementData) -> Self {
        let mut nodes = SlotMap::with_key();
        let root = nodes.insert(Node::new(NodeKind::Element(root), None));
        Self {
            url: url.map(str::to_owned),
            nodes,
            root,
        }
    }

    pub fn from_snapshot(snapshot: PageSnapshot) -> Result<Self, PageError> {
        let root = match snapshot.root {
            NodeSnapshot::Element(root) => root,
            NodeSnapshot::Text(_) => {
                return Err(PageError::InvalidSnapshot(
                    "root node must be an element".to_string(),
                ))
            }
        };

        let ElementSnapshot {
            tag,
            attrs,
            rect,
            style,
            children,
        } = root;
        let mut data = ElementData::new(&tag).with_rect(rect.width, rect.height).with_style(style);
        data.attrs = attrs;

        let mut doc = Self::new(snapshot.url.as_deref(), data);
        let root = doc.root;
        doc.append_snapshots(root, children)?;
        Ok(doc)
    }

    pub fn from_json(json: &str) -> Result<Self, PageError> {
        let snapshot: PageSnapshot = serde_json::from_str(json)?;
        Self::from_snapshot(snapshot)
    }

    pub fn from_path(path: &Path) -> Result<Self, PageError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    fn append_snapshots(&mut self, parent: NodeKey, children: Vec<NodeSnapshot>) -> Result<(), PageError> {
        for child in children {
            match child {
                NodeSnapshot::Text(text) => {
                    self.append_text(parent, &text)?;
                }
                NodeSnapshot::Element(el) => {
                    let mut data = ElementData::new(&el.tag)
                        .with_rect(el.rect.width, el.rect.height)
                        .with_style(el.style);
                    data.attrs = el.attrs;
                    let key = self.append_element(parent, data)?;
                    self.append_snapshots(key, el.children)?;
                }
            }
        }
        Ok(())
    }

    pub fn into_shared(self) -> SharedDocument {
        Arc::new(Mutex::new(self))
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn root(&self) -> NodeKey {
        self.root
    }

    pub fn contains(&self, key: NodeKey) -> bool {
        self.nodes.contains_key(key)
    }

    pub fn node(&self, key: NodeKey) -> Option<&Node> {
        self.nodes.get(key)
    }

    pub fn element(&self, key: NodeKey) -> Option<&ElementData> {
        match self.nodes.get(key) {
            Some(Node {
                kind: NodeKind::Element(el),
                ..
            }) => Some(el),
            _ => None,
        }
    }

    pub fn element_mut(&mut self, key: NodeKey) -> Option<&mut ElementData> {
        match self.nodes.get_mut(key) {
            Some(Node {
                kind: NodeKind::Element(el),
                ..
            }) => Some(el),
            _ => None,
        }
    }

    pub fn parent(&self, key: NodeKey) -> Option<NodeKey> {
        self.nodes.get(key).and_then(|n| n.parent)
    }

    pub fn children(&self, key: NodeKey) -> &[NodeKey] {
        self.nodes
            .get(key)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    fn check_element(&self, key: NodeKey) -> Result<(), PageError> {
        match self.nodes.get(key) {
            None => Err(PageError::StaleNode),
            Some(Node {
                kind: NodeKind::Text(_),
                ..
            }) => Err(PageError::NotAnElement),
            Some(_) => Ok(()),
        }
    }

    fn insert_child(&mut self, parent: NodeKey, index: Option<usize>, kind: NodeKind) -> Result<NodeKey, PageError> {
        self.check_element(parent)?;
        let key = self.nodes.insert(Node::new(kind, Some(parent)));
        let siblings = &mut self.nodes[parent].children;
        match index {
            Some(i) if i < siblings.len() => siblings.insert(i, key),
            _ => siblings.push(key),
        }
        Ok(key)
    }

    pub fn append_element(&mut self, parent: NodeKey, data: ElementData) -> Result<NodeKey, PageError> {
        self.insert_child(parent, None, NodeKind::Element(data))
    }

    pub fn append_text(&mut self, parent: NodeKey, text: &str) -> Result<NodeKey, PageError> {
        self.insert_child(parent, None, NodeKind::Text(text.to_string()))
    }

    /// Insert a new element right after `sibling`, under the same parent.
    pub fn insert_after(&mut self, sibling: NodeKey, data: ElementData) -> Result<NodeKey, PageError> {
        let parent = match self.nodes.get(sibling) {
            None => return Err(PageError::StaleNode),
            Some(node) => node.parent.ok_or(PageError::Detached)?,
        };
        let index = self.children(parent).iter().position(|k| *k == sibling).map(|i| i + 1);
        self.insert_child(parent, index, NodeKind::Element(data))
    }

    pub fn next_element_sibling(&self, key: NodeKey) -> Option<NodeKey> {
        let parent = self.parent(key)?;
        let siblings = self.children(parent);
        let pos = siblings.iter().position(|k| *k == key)?;
        siblings[pos + 1..]
            .iter()
            .copied()
            .find(|k| self.element(*k).is_some())
    }

    /// Remove a node and its whole subtree. Handles into the subtree go stale.
    pub fn remove(&mut self, key: NodeKey) {
        if key == self.root {
            return;
        }
        if let Some(parent) = self.parent(key) {
            if let Some(node) = self.nodes.get_mut(parent) {
                node.children.retain(|k| *k != key);
            }
        }
        let mut stack = vec![key];
        while let Some(next) = stack.pop() {
            if let Some(node) = self.nodes.remove(next) {
                stack.extend(node.children);
            }
        }
    }

    /// All element keys under `from` (inclusive) in document order.
    pub fn descendant_elements(&self, from: NodeKey) -> Vec<NodeKey> {
        let mut out = Vec::new();
        let mut stack = vec![from];
        while let Some(key) = stack.pop() {
            if self.element(key).is_some() {
                out.push(key);
                stack.extend(self.children(key).iter().rev().copied());
            }
        }
        out
    }

    pub fn elements(&self) -> Vec<NodeKey> {
        self.descendant_elements(self.root)
    }

    pub fn find_first(&self, tag: &str) -> Option<NodeKey> {
        self.elements()
            .into_iter()
            .find(|k| self.element(*k).map(|e| e.is(tag)).unwrap_or(false))
    }

    pub fn find_by_id(&self, id: &str) -> Option<NodeKey> {
        self.elements()
            .into_iter()
            .find(|k| self.element(*k).and_then(|e| e.attr("id")) == Some(id))
    }

    /// Descendant element of `from` carrying `class`, excluding `from` itself.
    pub fn find_descendant_with_class(&self, from: NodeKey, class: &str) -> Option<NodeKey> {
        self.descendant_elements(from)
            .into_iter()
            .skip(1)
            .find(|k| self.element(*k).map(|e| e.has_class(class)).unwrap_or(false))
    }

    /// Visible text of the page body, one line per text node.
    pub fn inner_text(&self) -> String {
        let start = self.find_first("body").unwrap_or(self.root);
        let mut lines = Vec::new();
        self.collect_text(start, &mut lines);
        lines.join("\n")
    }

    fn collect_text<'a>(&'a self, key: NodeKey, out: &mut Vec<&'a str>) {
        let Some(node) = self.nodes.get(key) else {
            return;
        };
        match &node.kind {
            NodeKind::Text(text) => {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    out.push(trimmed);
                }
            }
            NodeKind::Element(el) => {
                if NON_RENDERED_TAGS.iter().any(|t| el.is(t)) {
                    return;
                }
                for child in &node.children {
                    self.collect_text(*child, out);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Document {
        Document::from_json(
            r#"{
                "url": "https://example.jp/index.html",
                "root": {
                    "tag": "html",
                    "children": [
                        { "tag": "head", "children": [ { "tag": "title", "children": ["ignored"] } ] },
                        { "tag": "body", "children": [
                            "こんにちは",
                            { "tag": "img", "attrs": { "src": "a.png" }, "rect": { "width": 100, "height": 50 } },
                            { "tag": "p", "children": [ "second" ] }
                        ] }
                    ]
                }
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_from_json_builds_tree() {
        let doc = sample();
        assert_eq!(doc.url(), Some("https://example.jp/index.html"));
        let img = doc.find_first("img").unwrap();
        let el = doc.element(img).unwrap();
        assert_eq!(el.attr("src"), Some("a.png"));
        assert_eq!(el.rect.width, 100.0);
        assert_eq!(doc.elements().len(), 6);
    }

    #[test]
    fn test_inner_text_skips_head() {
        let doc = sample();
        assert_eq!(doc.inner_text(), "こんにちは\nsecond");
    }

    #[test]
    fn test_text_root_is_rejected() {
        let result = Document::from_json(r#"{ "root": "just text" }"#);
        assert!(matches!(result, Err(PageError::InvalidSnapshot(_))));
    }

    #[test]
    fn test_insert_after_and_next_sibling() {
        let mut doc = sample();
        let img = doc.find_first("img").unwrap();
        let p = doc.find_first("p").unwrap();
        assert_eq!(doc.next_element_sibling(img), Some(p));

        let div = doc.insert_after(img, ElementData::new("div")).unwrap();
        assert_eq!(doc.next_element_sibling(img), Some(div));
        assert_eq!(doc.next_element_sibling(div), Some(p));
    }

    #[test]
    fn test_removed_handles_go_stale() {
        let mut doc = sample();
        let p = doc.find_first("p").unwrap();
        let text = doc.children(p)[0];
        doc.remove(p);

        assert!(!doc.contains(p));
        assert!(!doc.contains(text));
        assert!(doc.element(p).is_none());
        assert!(matches!(
            doc.append_element(p, ElementData::new("span")),
            Err(PageError::StaleNode)
        ));
    }
}
