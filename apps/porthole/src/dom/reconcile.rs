//! Snapshot-to-replica reconciliation.
//!
//! A patched canonical snapshot is parsed into a detached target tree, then
//! folded onto the live replica in three phases: head children, body
//! children, body attributes. Each phase returns a typed completion token
//! and an update only counts as applied when all three came back.
//!
//! Matching is positional. Nodes of the same shape are edited in place so
//! retained handles stay valid; shape changes swap the subtree out.

use scraper::{ElementRef, Html, Node};

use super::{DomError, NodeId, NodeKind, ReplicaDocument};

/// Completion token for the head phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeadUpdated;

/// Completion token for the body-children phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BodyUpdated;

/// Completion token for the body-attribute phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BodyAttributesUpdated;

/// Proof that every phase of one reconciliation ran to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub head: HeadUpdated,
    pub body: BodyUpdated,
    pub body_attrs: BodyAttributesUpdated,
}

/// Parses page markup into a detached replica tree.
///
/// Scripts are neutralized on the way in, so no tree built here can carry
/// executable content. The parser synthesizes `html`, `head` and `body`
/// mounts for fragment-ish input; only empty markup is rejected.
pub fn parse_document(markup: &str) -> Result<ReplicaDocument, DomError> {
    if markup.trim().is_empty() {
        return Err(DomError::Parse("empty markup"));
    }
    let parsed = Html::parse_document(markup);
    let root = parsed
        .tree
        .root()
        .children()
        .find_map(ElementRef::wrap)
        .ok_or(DomError::Parse("no document element"))?;

    let mut doc = ReplicaDocument::new(root.value().name());
    let doc_root = doc.root();
    for (name, value) in root.value().attrs() {
        doc.set_attr(doc_root, name, value);
    }
    copy_children(&mut doc, doc_root, root);
    neutralize_scripts(&mut doc);
    Ok(doc)
}

fn copy_children(doc: &mut ReplicaDocument, parent: NodeId, from: ElementRef<'_>) {
    for child in from.children() {
        match child.value() {
            Node::Element(_) => {
                if let Some(element) = ElementRef::wrap(child) {
                    let id = doc.create_element(element.value().name());
                    for (name, value) in element.value().attrs() {
                        doc.set_attr(id, name, value);
                    }
                    doc.append_child(parent, id);
                    copy_children(doc, id, element);
                }
            }
            Node::Text(text) => {
                let id = doc.create_text(text);
                doc.append_child(parent, id);
            }
            // comments, doctypes and processing instructions carry nothing
            // the replica renders
            _ => {}
        }
    }
}

/// Strips executable content from every script-bearing element.
///
/// Inline sources are dropped, `src` is blanked rather than removed, and
/// script preload links are disarmed. Runs on every parsed tree, the first
/// load included.
pub fn neutralize_scripts(doc: &mut ReplicaDocument) {
    for id in doc.descendants(doc.root()) {
        match doc.tag(id) {
            Some("script") => {
                doc.set_attr(id, "src", "");
                for child in doc.children(id).to_vec() {
                    doc.remove_subtree(child);
                }
            }
            Some("link") if doc.attr(id, "as") == Some("script") => {
                doc.set_attr(id, "href", "");
                doc.set_attr(id, "rel", "nofollow");
            }
            _ => {}
        }
    }
}

/// Folds `markup` onto the live replica.
///
/// All three phases run even when an earlier one fails its mount lookup;
/// the outcome is only returned when every token came back.
pub fn reconcile(
    live: &mut ReplicaDocument,
    markup: &str,
    exclusions: &[String],
) -> Result<ReconcileOutcome, DomError> {
    let target = parse_document(markup)?;
    let head = sync_head(live, &target, exclusions);
    let body = sync_body(live, &target, exclusions);
    let body_attrs = sync_body_attributes(live, &target);
    Ok(ReconcileOutcome {
        head: head?,
        body: body?,
        body_attrs: body_attrs?,
    })
}

fn sync_head(
    live: &mut ReplicaDocument,
    target: &ReplicaDocument,
    exclusions: &[String],
) -> Result<HeadUpdated, DomError> {
    let live_head = live.head().ok_or(DomError::MountNotFound("head"))?;
    let target_head = target.head().ok_or(DomError::MountNotFound("head"))?;
    live.replace_attrs(live_head, target.attrs(target_head).to_vec());
    morph_children(live, live_head, target, target_head, exclusions);
    Ok(HeadUpdated)
}

fn sync_body(
    live: &mut ReplicaDocument,
    target: &ReplicaDocument,
    exclusions: &[String],
) -> Result<BodyUpdated, DomError> {
    let live_body = live.body().ok_or(DomError::MountNotFound("body"))?;
    let target_body = target.body().ok_or(DomError::MountNotFound("body"))?;
    morph_children(live, live_body, target, target_body, exclusions);
    Ok(BodyUpdated)
}

fn sync_body_attributes(
    live: &mut ReplicaDocument,
    target: &ReplicaDocument,
) -> Result<BodyAttributesUpdated, DomError> {
    let live_body = live.body().ok_or(DomError::MountNotFound("body"))?;
    let target_body = target.body().ok_or(DomError::MountNotFound("body"))?;
    live.replace_attrs(live_body, target.attrs(target_body).to_vec());
    Ok(BodyAttributesUpdated)
}

/// Walks both child lists in step, editing matches in place.
///
/// Exclusion-listed elements are invisible here: live ones are skipped
/// without consuming a target position, and target ones are ignored
/// outright, so operator chrome can neither be removed nor spoofed by
/// remote markup.
fn morph_children(
    live: &mut ReplicaDocument,
    live_parent: NodeId,
    target: &ReplicaDocument,
    target_parent: NodeId,
    exclusions: &[String],
) {
    let target_children: Vec<NodeId> = target
        .children(target_parent)
        .iter()
        .copied()
        .filter(|id| !is_excluded(target, *id, exclusions))
        .collect();

    let mut cursor = 0usize;
    for target_child in target_children {
        while let Some(live_child) = live.children(live_parent).get(cursor).copied() {
            if is_excluded(live, live_child, exclusions) {
                cursor += 1;
            } else {
                break;
            }
        }

        match live.children(live_parent).get(cursor).copied() {
            None => {
                if let Some(built) = import_subtree(live, target, target_child, exclusions) {
                    live.append_child(live_parent, built);
                    cursor += 1;
                }
            }
            Some(existing) if same_shape(live, existing, target, target_child) => {
                morph_node(live, existing, target, target_child, exclusions);
                cursor += 1;
            }
            Some(existing) => {
                if let Some(built) = import_subtree(live, target, target_child, exclusions) {
                    live.insert_child(live_parent, cursor, built);
                    cursor += 1;
                }
                live.remove_subtree(existing);
            }
        }
    }

    let leftovers: Vec<NodeId> = live.children(live_parent)[cursor..]
        .iter()
        .copied()
        .filter(|id| !is_excluded(live, *id, exclusions))
        .collect();
    for id in leftovers {
        live.remove_subtree(id);
    }
}

fn same_shape(
    live: &ReplicaDocument,
    a: NodeId,
    target: &ReplicaDocument,
    b: NodeId,
) -> bool {
    match (live.kind(a), target.kind(b)) {
        (
            Some(NodeKind::Element { tag: live_tag, .. }),
            Some(NodeKind::Element { tag: target_tag, .. }),
        ) => live_tag == target_tag,
        (Some(NodeKind::Text(_)), Some(NodeKind::Text(_))) => true,
        _ => false,
    }
}

fn morph_node(
    live: &mut ReplicaDocument,
    existing: NodeId,
    target: &ReplicaDocument,
    target_node: NodeId,
    exclusions: &[String],
) {
    match target.kind(target_node) {
        Some(NodeKind::Text(text)) => {
            if live.text(existing) != Some(text) {
                live.set_text(existing, text);
            }
        }
        Some(NodeKind::Element { attrs, .. }) => {
            live.replace_attrs(existing, attrs.clone());
            morph_children(live, existing, target, target_node, exclusions);
        }
        None => {}
    }
}

fn import_subtree(
    live: &mut ReplicaDocument,
    target: &ReplicaDocument,
    node: NodeId,
    exclusions: &[String],
) -> Option<NodeId> {
    match target.kind(node)? {
        NodeKind::Text(text) => Some(live.create_text(text)),
        NodeKind::Element { tag, attrs } => {
            let id = live.create_element(tag);
            live.replace_attrs(id, attrs.clone());
            for child in target.children(node) {
                if is_excluded(target, *child, exclusions) {
                    continue;
                }
                if let Some(built) = import_subtree(live, target, *child, exclusions) {
                    live.append_child(id, built);
                }
            }
            Some(id)
        }
    }
}

fn is_excluded(doc: &ReplicaDocument, id: NodeId, exclusions: &[String]) -> bool {
    doc.dom_id(id)
        .is_some_and(|dom_id| exclusions.iter().any(|entry| entry == dom_id))
}
