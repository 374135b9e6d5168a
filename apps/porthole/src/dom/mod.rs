//! Replica document model and snapshot reconciliation.

use thiserror::Error;

pub mod reconcile;
pub mod replica;

pub use reconcile::{
    BodyAttributesUpdated, BodyUpdated, HeadUpdated, ReconcileOutcome, neutralize_scripts,
    parse_document, reconcile,
};
pub use replica::{NodeId, NodeKind, ReplicaDocument};

/// Overlay showing the operator's own pointer.
pub const POINTER_LOCAL_ID: &str = "pointer-local";
/// Overlay mirroring the remote peer's pointer.
pub const POINTER_REMOTE_ID: &str = "pointer-remote";
/// The session chrome bar.
pub const EDITOR_CHROME_ID: &str = "editorchrome";

/// Element ids reconciliation must never overwrite, morph into or remove.
pub fn chrome_exclusions() -> Vec<String> {
    vec![
        POINTER_LOCAL_ID.to_owned(),
        POINTER_REMOTE_ID.to_owned(),
        EDITOR_CHROME_ID.to_owned(),
    ]
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomError {
    #[error("could not parse page markup: {0}")]
    Parse(&'static str),
    #[error("mount point not found: {0}")]
    MountNotFound(&'static str),
}
