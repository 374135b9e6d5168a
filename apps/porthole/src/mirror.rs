//! Turn-taking between the local and remote pointer streams.
//!
//! Only mouse movement is arbitrated. Local pointer frames are buffered
//! while a window is open; each arriving remote frame closes the window,
//! releasing at most the newest buffered local frame ahead of it. Local
//! movement therefore never floods the channel while the remote side is
//! driving, and between any two forwarded local frames there is always a
//! remote one.

use crate::protocol::PointerPayload;

/// One frame of the merged pointer sequence, tagged by which side produced
/// it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MergedFrame {
    Local(PointerPayload),
    Remote(PointerPayload),
}

/// What one window handoff released.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Handoff {
    /// Newest local frame buffered during the window, cleared on release.
    pub forwarded: Option<PointerPayload>,
    pub remote: PointerPayload,
}

impl Handoff {
    /// The released frames in merge order: the forwarded local frame, if
    /// any, then the remote frame that closed the window.
    pub fn frames(&self) -> impl Iterator<Item = MergedFrame> + '_ {
        self.forwarded
            .map(MergedFrame::Local)
            .into_iter()
            .chain(std::iter::once(MergedFrame::Remote(self.remote)))
    }
}

#[derive(Debug, Default)]
pub struct MirrorWindow {
    pending_local: Option<PointerPayload>,
}

impl MirrorWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers a local frame. A newer frame replaces an older unforwarded
    /// one; nothing leaves until a remote frame closes the window.
    pub fn offer_local(&mut self, frame: PointerPayload) {
        self.pending_local = Some(frame);
    }

    /// Closes the window with a remote frame.
    pub fn close_window(&mut self, remote: PointerPayload) -> Handoff {
        Handoff {
            forwarded: self.pending_local.take(),
            remote,
        }
    }

    pub fn pending_local(&self) -> Option<PointerPayload> {
        self.pending_local
    }
}
