//! Context-anchored application of structural diffs.
//!
//! Patch records arrive with offsets and lengths counted in UTF-16 code
//! units, the unit the sending side measures strings in. The offsets are
//! treated as hints only: each record re-anchors on its own span text,
//! searching outward from the hinted position within a window proportional
//! to the anchor length, so the unit difference is absorbed like any other
//! drift. Declared lengths are validated in the sender's unit. A message
//! either applies as a whole or not at all.

use thiserror::Error;

use crate::protocol::{DiffOp, PatchRecord};

/// Smallest search window around the hinted offset, in bytes.
const MIN_ANCHOR_WINDOW: usize = 32;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PatchError {
    #[error("patch {index}: anchor not found near offset {expected}")]
    AnchorNotFound { index: usize, expected: usize },
    #[error("patch {index}: spans disagree with declared lengths")]
    LengthMismatch { index: usize },
    #[error("canonical text poisoned by earlier failure: {0}")]
    Poisoned(Box<PatchError>),
}

/// Applies a full patch message to `current`, returning the patched text.
///
/// Records are applied in order; a hint displacement discovered while
/// anchoring one record carries forward to the next. Any failure discards
/// the whole message and leaves the caller's text untouched.
pub fn apply_patches(current: &str, records: &[PatchRecord]) -> Result<String, PatchError> {
    let mut text = current.to_owned();
    let mut drift: isize = 0;
    for (index, record) in records.iter().enumerate() {
        let old_span = span_text(record, DiffOp::Delete);
        let new_span = span_text(record, DiffOp::Insert);
        if utf16_len(&old_span) != record.length1 || utf16_len(&new_span) != record.length2 {
            return Err(PatchError::LengthMismatch { index });
        }

        let hinted = record.start2 as isize + drift;
        let expected = hinted.clamp(0, text.len() as isize) as usize;
        let found = if old_span.is_empty() {
            snap_to_boundary(&text, expected)
        } else {
            locate_anchor(&text, &old_span, expected)
                .ok_or(PatchError::AnchorNotFound { index, expected })?
        };

        text.replace_range(found..found + old_span.len(), &new_span);
        drift = found as isize - record.start2 as isize;
    }
    Ok(text)
}

/// Length in UTF-16 code units, the unit the wire lengths count.
fn utf16_len(text: &str) -> usize {
    text.encode_utf16().count()
}

/// Concatenates the spans that describe the text before (`Delete`) or after
/// (`Insert`) the edit. `Equal` spans belong to both sides.
fn span_text(record: &PatchRecord, side: DiffOp) -> String {
    let mut out = String::new();
    for span in &record.diffs {
        if span.op() == DiffOp::Equal || span.op() == side {
            out.push_str(span.text());
        }
    }
    out
}

/// Finds the occurrence of `needle` closest to `expected`, or `None` when
/// every occurrence lies outside the tolerance window.
fn locate_anchor(haystack: &str, needle: &str, expected: usize) -> Option<usize> {
    let window = needle.len().saturating_mul(4).max(MIN_ANCHOR_WINDOW) as isize;
    let mut best: Option<(usize, isize)> = None;
    for (at, _) in haystack.match_indices(needle) {
        let distance = (at as isize - expected as isize).abs();
        match best {
            Some((_, closest)) if closest <= distance => {}
            _ => best = Some((at, distance)),
        }
    }
    match best {
        Some((at, distance)) if distance <= window => Some(at),
        _ => None,
    }
}

fn snap_to_boundary(text: &str, at: usize) -> usize {
    let mut at = at.min(text.len());
    while !text.is_char_boundary(at) {
        at -= 1;
    }
    at
}

/// The authoritative text snapshot a session folds patch messages into.
///
/// The first failed fold poisons the state: every later message is rejected
/// with an error naming the original failure, so the replica can never
/// silently drift past a skipped update.
#[derive(Debug, Clone)]
pub struct CanonicalDom {
    text: String,
    poisoned: Option<PatchError>,
}

impl CanonicalDom {
    pub fn new(snapshot: impl Into<String>) -> Self {
        Self {
            text: snapshot.into(),
            poisoned: None,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn poisoned(&self) -> Option<&PatchError> {
        self.poisoned.as_ref()
    }

    /// Folds one patch message into the canonical text and returns the new
    /// text on success.
    pub fn fold(&mut self, records: &[PatchRecord]) -> Result<&str, PatchError> {
        if let Some(original) = &self.poisoned {
            return Err(PatchError::Poisoned(Box::new(original.clone())));
        }
        match apply_patches(&self.text, records) {
            Ok(next) => {
                self.text = next;
                Ok(&self.text)
            }
            Err(err) => {
                self.poisoned = Some(err.clone());
                Err(err)
            }
        }
    }
}
