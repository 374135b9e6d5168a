//! Envelope types for the mirror channel.
//!
//! Every frame on the channel is one JSON-encoded envelope tagged by `type`.
//! Tag spellings are part of the wire contract and are matched exactly,
//! including the mixed-case acknowledgements.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Diff operation inside a patch span. Encoded as `-1`, `0` or `1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i8", into = "i8")]
pub enum DiffOp {
    Delete,
    Equal,
    Insert,
}

#[derive(Debug, Error)]
#[error("invalid diff op {0}, expected -1, 0 or 1")]
pub struct InvalidDiffOp(pub i8);

impl TryFrom<i8> for DiffOp {
    type Error = InvalidDiffOp;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(DiffOp::Delete),
            0 => Ok(DiffOp::Equal),
            1 => Ok(DiffOp::Insert),
            other => Err(InvalidDiffOp(other)),
        }
    }
}

impl From<DiffOp> for i8 {
    fn from(op: DiffOp) -> i8 {
        match op {
            DiffOp::Delete => -1,
            DiffOp::Equal => 0,
            DiffOp::Insert => 1,
        }
    }
}

/// One `[op, text]` pair inside a patch record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffSpan(pub DiffOp, pub String);

impl DiffSpan {
    pub fn op(&self) -> DiffOp {
        self.0
    }

    pub fn text(&self) -> &str {
        &self.1
    }
}

/// A context-anchored edit region.
///
/// `start1`/`length1` describe the region in the text the diff was computed
/// against, `start2`/`length2` the region after the edit. The offsets are
/// hints only; application re-anchors on the span text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchRecord {
    pub diffs: Vec<DiffSpan>,
    pub start1: usize,
    pub start2: usize,
    pub length1: usize,
    pub length2: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointerPayload {
    pub x: f64,
    pub y: f64,
}

/// A settled form edit, addressed by ordinal position among the page's
/// form controls rather than by any element id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormPayload {
    pub tagname: String,
    pub index: usize,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

/// Everything that travels on the mirror channel, both directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ActionEnvelope {
    #[serde(rename = "mousemoved")]
    MouseMoved { payload: PointerPayload },
    #[serde(rename = "mouseclick")]
    MouseClick { payload: PointerPayload },
    #[serde(rename = "windowscroll")]
    WindowScroll { payload: PointerPayload },
    #[serde(rename = "formaction")]
    FormAction { payload: FormPayload },
    #[serde(rename = "diff")]
    Diff { payload: Vec<PatchRecord> },
    #[serde(rename = "DOMpatched")]
    DomPatched,
    #[serde(rename = "listeningToDOMDiffs")]
    Listening,
    #[serde(rename = "error")]
    Error { payload: ErrorPayload },
    #[serde(other)]
    Unknown,
}

/// Out-of-band control messages for the interception proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProxyControl {
    #[serde(rename = "remoteUrl")]
    RemoteUrl { payload: String, currenturl: String },
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("encode error: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("decode error: {0}")]
    Decode(#[source] serde_json::Error),
}

pub fn encode_envelope(envelope: &ActionEnvelope) -> Result<String, ProtocolError> {
    serde_json::to_string(envelope).map_err(ProtocolError::Encode)
}

pub fn decode_envelope(text: &str) -> Result<ActionEnvelope, ProtocolError> {
    serde_json::from_str(text).map_err(ProtocolError::Decode)
}

pub fn encode_control(control: &ProxyControl) -> Result<String, ProtocolError> {
    serde_json::to_string(control).map_err(ProtocolError::Encode)
}

pub fn decode_control(text: &str) -> Result<ProxyControl, ProtocolError> {
    serde_json::from_str(text).map_err(ProtocolError::Decode)
}
