//! Owned document tree for the sandbox surface.
//!
//! Handles are arena indices and stay valid for the life of the document.
//! Reconciliation edits retained nodes in place rather than replacing them,
//! so a handle held across an update keeps addressing the same logical node.
//! Removed ids are tombstoned and never reused.

use super::{DomError, EDITOR_CHROME_ID, POINTER_LOCAL_ID, POINTER_REMOTE_ID};

const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

const FORM_CONTROL_TAGS: &[&str] = &["input", "textarea", "select"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
pub enum NodeKind {
    Element {
        tag: String,
        attrs: Vec<(String, String)>,
    },
    Text(String),
}

#[derive(Debug, Clone)]
struct NodeSlot {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    kind: NodeKind,
}

#[derive(Debug, Clone)]
pub struct ReplicaDocument {
    slots: Vec<Option<NodeSlot>>,
    root: NodeId,
}

impl ReplicaDocument {
    pub fn new(root_tag: &str) -> Self {
        let mut doc = Self {
            slots: Vec::new(),
            root: NodeId(0),
        };
        doc.root = doc.create_element(root_tag);
        doc
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// The `<head>` mount point, if the document has one.
    pub fn head(&self) -> Option<NodeId> {
        self.root_child("head")
    }

    /// The `<body>` mount point, if the document has one.
    pub fn body(&self) -> Option<NodeId> {
        self.root_child("body")
    }

    fn root_child(&self, tag: &str) -> Option<NodeId> {
        self.children(self.root)
            .iter()
            .copied()
            .find(|id| self.tag(*id) == Some(tag))
    }

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.push_slot(NodeKind::Element {
            tag: tag.to_ascii_lowercase(),
            attrs: Vec::new(),
        })
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.push_slot(NodeKind::Text(text.to_owned()))
    }

    fn push_slot(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.slots.len());
        self.slots.push(Some(NodeSlot {
            parent: None,
            children: Vec::new(),
            kind,
        }));
        id
    }

    fn slot(&self, id: NodeId) -> Option<&NodeSlot> {
        self.slots.get(id.0).and_then(|slot| slot.as_ref())
    }

    fn slot_mut(&mut self, id: NodeId) -> Option<&mut NodeSlot> {
        self.slots.get_mut(id.0).and_then(|slot| slot.as_mut())
    }

    pub fn exists(&self, id: NodeId) -> bool {
        self.slot(id).is_some()
    }

    pub fn kind(&self, id: NodeId) -> Option<&NodeKind> {
        self.slot(id).map(|slot| &slot.kind)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.slot(id).and_then(|slot| slot.parent)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.slot(id).map(|slot| slot.children.as_slice()).unwrap_or(&[])
    }

    pub fn tag(&self, id: NodeId) -> Option<&str> {
        match self.kind(id)? {
            NodeKind::Element { tag, .. } => Some(tag),
            NodeKind::Text(_) => None,
        }
    }

    pub fn text(&self, id: NodeId) -> Option<&str> {
        match self.kind(id)? {
            NodeKind::Text(text) => Some(text),
            NodeKind::Element { .. } => None,
        }
    }

    pub fn set_text(&mut self, id: NodeId, value: &str) {
        if let Some(slot) = self.slot_mut(id) {
            if let NodeKind::Text(text) = &mut slot.kind {
                value.clone_into(text);
            }
        }
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        match self.kind(id)? {
            NodeKind::Element { attrs, .. } => attrs
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.as_str()),
            NodeKind::Text(_) => None,
        }
    }

    pub fn attrs(&self, id: NodeId) -> &[(String, String)] {
        match self.kind(id) {
            Some(NodeKind::Element { attrs, .. }) => attrs,
            _ => &[],
        }
    }

    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) {
        if let Some(NodeKind::Element { attrs, .. }) = self.slot_mut(id).map(|s| &mut s.kind) {
            match attrs.iter_mut().find(|(key, _)| key == name) {
                Some((_, slot)) => value.clone_into(slot),
                None => attrs.push((name.to_owned(), value.to_owned())),
            }
        }
    }

    pub fn remove_attr(&mut self, id: NodeId, name: &str) {
        if let Some(NodeKind::Element { attrs, .. }) = self.slot_mut(id).map(|s| &mut s.kind) {
            attrs.retain(|(key, _)| key != name);
        }
    }

    /// Replaces the whole attribute set, keeping declaration order.
    pub fn replace_attrs(&mut self, id: NodeId, new_attrs: Vec<(String, String)>) {
        if let Some(NodeKind::Element { attrs, .. }) = self.slot_mut(id).map(|s| &mut s.kind) {
            *attrs = new_attrs;
        }
    }

    pub fn dom_id(&self, id: NodeId) -> Option<&str> {
        self.attr(id, "id")
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        let index = self.children(parent).len();
        self.insert_child(parent, index, child);
    }

    pub fn insert_child(&mut self, parent: NodeId, index: usize, child: NodeId) {
        if !self.exists(parent) || !self.exists(child) {
            return;
        }
        self.detach(child);
        if let Some(slot) = self.slot_mut(child) {
            slot.parent = Some(parent);
        }
        if let Some(slot) = self.slot_mut(parent) {
            let index = index.min(slot.children.len());
            slot.children.insert(index, child);
        }
    }

    /// Unlinks `id` from its parent without destroying the subtree.
    pub fn detach(&mut self, id: NodeId) {
        let Some(parent) = self.parent(id) else {
            return;
        };
        if let Some(slot) = self.slot_mut(parent) {
            slot.children.retain(|child| *child != id);
        }
        if let Some(slot) = self.slot_mut(id) {
            slot.parent = None;
        }
    }

    /// Detaches `id` and tombstones every node underneath it.
    pub fn remove_subtree(&mut self, id: NodeId) {
        self.detach(id);
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if let Some(slot) = self.slots.get_mut(next.0).and_then(|slot| slot.take()) {
                stack.extend(slot.children);
            }
        }
    }

    /// All live nodes in document order, starting at `from`.
    pub fn descendants(&self, from: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![from];
        while let Some(id) = stack.pop() {
            if !self.exists(id) {
                continue;
            }
            out.push(id);
            for child in self.children(id).iter().rev() {
                stack.push(*child);
            }
        }
        out
    }

    pub fn find_by_dom_id(&self, dom_id: &str) -> Option<NodeId> {
        self.descendants(self.root)
            .into_iter()
            .find(|id| self.dom_id(*id) == Some(dom_id))
    }

    /// Ordinal position of `control` among the document's form controls, in
    /// document order. This is how form edits are addressed on the wire.
    pub fn form_control_index(&self, control: NodeId) -> Option<usize> {
        self.form_controls().iter().position(|id| *id == control)
    }

    pub fn form_control_at(&self, index: usize) -> Option<NodeId> {
        self.form_controls().get(index).copied()
    }

    fn form_controls(&self) -> Vec<NodeId> {
        self.descendants(self.root)
            .into_iter()
            .filter(|id| {
                self.tag(*id)
                    .is_some_and(|tag| FORM_CONTROL_TAGS.contains(&tag))
            })
            .collect()
    }

    /// Mounts the operator chrome under `<body>`: both pointer overlays and
    /// the chrome bar. Mounting twice is a no-op.
    pub fn mount_chrome(&mut self) -> Result<(), DomError> {
        let body = self.body().ok_or(DomError::MountNotFound("body"))?;
        for dom_id in [POINTER_LOCAL_ID, POINTER_REMOTE_ID, EDITOR_CHROME_ID] {
            if self.find_by_dom_id(dom_id).is_some() {
                continue;
            }
            let overlay = self.create_element("div");
            self.set_attr(overlay, "id", dom_id);
            if dom_id != EDITOR_CHROME_ID {
                self.set_attr(overlay, "style", "position:fixed;left:0px;top:0px");
            }
            self.append_child(body, overlay);
        }
        Ok(())
    }

    /// Moves a pointer overlay. Returns false when the overlay is missing.
    pub fn set_overlay_position(&mut self, dom_id: &str, x: f64, y: f64) -> bool {
        let Some(overlay) = self.find_by_dom_id(dom_id) else {
            return false;
        };
        let style = format!("position:fixed;left:{x}px;top:{y}px");
        self.set_attr(overlay, "style", &style);
        true
    }

    pub fn to_html(&self) -> String {
        self.html_of(self.root)
    }

    /// Serializes one subtree.
    pub fn html_of(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.write_node(id, &mut out);
        out
    }

    fn write_node(&self, id: NodeId, out: &mut String) {
        match self.kind(id) {
            None => {}
            Some(NodeKind::Text(text)) => out.push_str(&escape_text(text)),
            Some(NodeKind::Element { tag, attrs }) => {
                out.push('<');
                out.push_str(tag);
                for (name, value) in attrs {
                    out.push(' ');
                    out.push_str(name);
                    out.push_str("=\"");
                    out.push_str(&escape_attr(value));
                    out.push('"');
                }
                out.push('>');
                if VOID_TAGS.contains(&tag.as_str()) {
                    return;
                }
                for child in self.children(id) {
                    self.write_node(*child, out);
                }
                out.push_str("</");
                out.push_str(tag);
                out.push('>');
            }
        }
    }
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn escape_attr(value: &str) -> String {
    value.replace('&', "&amp;").replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document_with_body() -> (ReplicaDocument, NodeId) {
        let mut doc = ReplicaDocument::new("html");
        let head = doc.create_element("head");
        doc.append_child(doc.root(), head);
        let body = doc.create_element("body");
        doc.append_child(doc.root(), body);
        (doc, body)
    }

    #[test]
    fn handles_survive_sibling_removal() {
        let (mut doc, body) = document_with_body();
        let first = doc.create_element("p");
        let second = doc.create_element("p");
        doc.append_child(body, first);
        doc.append_child(body, second);

        doc.remove_subtree(first);
        assert!(!doc.exists(first));
        assert!(doc.exists(second));
        assert_eq!(doc.children(body), &[second]);
    }

    #[test]
    fn form_controls_are_counted_in_document_order() {
        let (mut doc, body) = document_with_body();
        let search = doc.create_element("input");
        doc.append_child(body, search);
        let wrapper = doc.create_element("div");
        doc.append_child(body, wrapper);
        let note = doc.create_element("textarea");
        doc.append_child(wrapper, note);
        let picker = doc.create_element("select");
        doc.append_child(body, picker);

        assert_eq!(doc.form_control_index(search), Some(0));
        assert_eq!(doc.form_control_index(note), Some(1));
        assert_eq!(doc.form_control_index(picker), Some(2));
        assert_eq!(doc.form_control_at(1), Some(note));
        assert_eq!(doc.form_control_index(wrapper), None);
    }

    #[test]
    fn chrome_mounts_once_under_body() {
        let (mut doc, body) = document_with_body();
        doc.mount_chrome().unwrap();
        doc.mount_chrome().unwrap();

        let ids: Vec<_> = doc
            .children(body)
            .iter()
            .filter_map(|id| doc.dom_id(*id))
            .collect();
        assert_eq!(ids, vec![POINTER_LOCAL_ID, POINTER_REMOTE_ID, EDITOR_CHROME_ID]);
    }

    #[test]
    fn chrome_mount_requires_a_body() {
        let mut doc = ReplicaDocument::new("html");
        assert!(matches!(
            doc.mount_chrome(),
            Err(DomError::MountNotFound("body"))
        ));
    }

    #[test]
    fn overlay_position_is_written_to_style() {
        let (mut doc, _) = document_with_body();
        doc.mount_chrome().unwrap();
        assert!(doc.set_overlay_position(POINTER_REMOTE_ID, 12.0, 21.0));
        let overlay = doc.find_by_dom_id(POINTER_REMOTE_ID).unwrap();
        assert_eq!(
            doc.attr(overlay, "style"),
            Some("position:fixed;left:12px;top:21px")
        );
        assert!(!doc.set_overlay_position("missing", 0.0, 0.0));
    }

    #[test]
    fn serialization_escapes_text_and_attributes() {
        let (mut doc, body) = document_with_body();
        let para = doc.create_element("p");
        doc.set_attr(para, "title", "a \"b\" & c");
        doc.append_child(body, para);
        let text = doc.create_text("1 < 2 & 3 > 2");
        doc.append_child(para, text);
        let img = doc.create_element("img");
        doc.set_attr(img, "src", "x.png");
        doc.append_child(body, img);

        assert_eq!(
            doc.to_html(),
            "<html><head></head><body>\
             <p title=\"a &quot;b&quot; &amp; c\">1 &lt; 2 &amp; 3 &gt; 2</p>\
             <img src=\"x.png\"></body></html>"
        );
    }
}
