//! The mirror session engine.
//!
//! One task owns every piece of mutable session state: the canonical text,
//! the replica tree, the capture gates and the mirror window. Inbound
//! frames, UI samples and capture deadlines are multiplexed in a single
//! select loop, so no lock guards any of it.

pub mod retrieval;

use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::capture::{InteractionCapture, UiEvent};
use crate::config::SessionConfig;
use crate::dom::{self, DomError, POINTER_LOCAL_ID, POINTER_REMOTE_ID, ReplicaDocument};
use crate::mirror::MirrorWindow;
use crate::patch::CanonicalDom;
use crate::protocol::{
    ActionEnvelope, ErrorPayload, PatchRecord, PointerPayload, ProtocolError, decode_envelope,
    encode_envelope,
};
use crate::transport::{Transport, TransportError};

use retrieval::LoadedPage;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("session task failed: {0}")]
    Join(String),
}

pub struct MirrorSession {
    config: SessionConfig,
    canonical: CanonicalDom,
    replica: ReplicaDocument,
    capture: InteractionCapture,
    window: MirrorWindow,
}

impl MirrorSession {
    /// Builds session state from a loaded page.
    ///
    /// The replica is parsed, neutralized and gets its chrome mounted. The
    /// canonical text seeds from the raw snapshot: the peer computes diffs
    /// against what it sent, not against the neutralized replica.
    pub fn new(page: &LoadedPage, config: SessionConfig) -> Result<Self, DomError> {
        let mut replica = dom::parse_document(&page.dom_string)?;
        replica.mount_chrome()?;
        let capture = InteractionCapture::new(&config);
        Ok(Self {
            config,
            canonical: CanonicalDom::new(page.dom_string.clone()),
            replica,
            capture,
            window: MirrorWindow::new(),
        })
    }

    pub fn replica(&self) -> &ReplicaDocument {
        &self.replica
    }

    pub fn canonical_text(&self) -> &str {
        self.canonical.text()
    }

    /// Moves the session onto its own task. The handle is the only way to
    /// reach it afterwards; dropping the handle tears the session down.
    pub fn spawn(
        self,
        transport: Box<dyn Transport>,
        ui: mpsc::UnboundedReceiver<UiEvent>,
    ) -> SessionHandle {
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(self.run(transport, ui, stop_rx));
        SessionHandle {
            stop: Some(stop_tx),
            task,
        }
    }

    async fn run(
        mut self,
        mut transport: Box<dyn Transport>,
        mut ui: mpsc::UnboundedReceiver<UiEvent>,
        mut stop: oneshot::Receiver<()>,
    ) -> Result<(), SessionError> {
        transport
            .send(&encode_envelope(&ActionEnvelope::Listening)?)
            .await?;
        info!("session listening for diffs");

        loop {
            let deadline = self
                .capture
                .next_deadline()
                .map(tokio::time::Instant::from_std);
            tokio::select! {
                _ = &mut stop => {
                    debug!("session stop requested");
                    break;
                }
                frame = transport.recv() => {
                    match frame {
                        Some(text) => self.on_frame(&text, transport.as_ref()).await?,
                        None => {
                            info!("peer closed the channel");
                            break;
                        }
                    }
                }
                event = ui.recv() => {
                    match event {
                        Some(event) => self.on_ui_event(event, transport.as_ref()).await?,
                        None => {
                            debug!("host shell dropped its event stream");
                            break;
                        }
                    }
                }
                _ = sleep_until_deadline(deadline), if deadline.is_some() => {
                    self.flush_captures(transport.as_ref()).await?;
                }
            }
        }
        Ok(())
    }

    async fn on_frame(&mut self, text: &str, transport: &dyn Transport) -> Result<(), SessionError> {
        let envelope = match decode_envelope(text) {
            Ok(envelope) => envelope,
            Err(err) => {
                // tolerated: a bad frame never takes the stream down
                trace!(error = %err, "dropping undecodable frame");
                return Ok(());
            }
        };
        match envelope {
            ActionEnvelope::Diff { payload } => self.apply_diff(&payload, transport).await,
            ActionEnvelope::MouseMoved { payload } => {
                self.on_remote_pointer(payload, transport).await
            }
            other => {
                trace!(envelope = ?other, "ignoring inbound envelope");
                Ok(())
            }
        }
    }

    /// Folds one patch message into the canonical text and reconciles the
    /// replica. Success is acknowledged on the channel; any failure is
    /// reported there too and leaves the replica as it was.
    async fn apply_diff(
        &mut self,
        records: &[PatchRecord],
        transport: &dyn Transport,
    ) -> Result<(), SessionError> {
        let patched = match self.canonical.fold(records) {
            Ok(text) => text,
            Err(err) => {
                warn!(error = %err, "patch message rejected");
                return send_error(transport, err.to_string()).await;
            }
        };
        match dom::reconcile(&mut self.replica, patched, &self.config.chrome_exclusions) {
            Ok(_) => {
                debug!("replica updated");
                transport
                    .send(&encode_envelope(&ActionEnvelope::DomPatched)?)
                    .await?;
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "reconcile failed");
                send_error(transport, err.to_string()).await
            }
        }
    }

    async fn on_remote_pointer(
        &mut self,
        frame: PointerPayload,
        transport: &dyn Transport,
    ) -> Result<(), SessionError> {
        self.replica
            .set_overlay_position(POINTER_REMOTE_ID, frame.x, frame.y);
        let handoff = self.window.close_window(frame);
        if let Some(local) = handoff.forwarded {
            transport
                .send(&encode_envelope(&ActionEnvelope::MouseMoved { payload: local })?)
                .await?;
        }
        Ok(())
    }

    async fn on_ui_event(
        &mut self,
        event: UiEvent,
        transport: &dyn Transport,
    ) -> Result<(), SessionError> {
        if let UiEvent::PointerMoved { x, y } = &event {
            // the local overlay follows raw samples, ahead of any throttle
            self.replica.set_overlay_position(POINTER_LOCAL_ID, *x, *y);
        }
        if let Some(envelope) = self.capture.on_event(event, Instant::now()) {
            transport.send(&encode_envelope(&envelope)?).await?;
        }
        Ok(())
    }

    /// Releases everything due at the capture gates. Pointer frames go to
    /// the mirror window; scroll and form envelopes go straight out.
    async fn flush_captures(&mut self, transport: &dyn Transport) -> Result<(), SessionError> {
        let flush = self.capture.flush(Instant::now(), &self.replica);
        if let Some(pointer) = flush.pointer {
            self.window.offer_local(pointer);
        }
        for envelope in [flush.scroll, flush.form].into_iter().flatten() {
            transport.send(&encode_envelope(&envelope)?).await?;
        }
        Ok(())
    }
}

async fn send_error(transport: &dyn Transport, message: String) -> Result<(), SessionError> {
    let envelope = ActionEnvelope::Error {
        payload: ErrorPayload { message },
    };
    transport.send(&encode_envelope(&envelope)?).await?;
    Ok(())
}

async fn sleep_until_deadline(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Handle to a running session.
///
/// [`SessionHandle::shutdown`] is the orderly path: the loop drains, the
/// transport drops and its pump tasks die with it. Dropping the handle
/// aborts the task outright instead.
pub struct SessionHandle {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<(), SessionError>>,
}

impl SessionHandle {
    pub async fn shutdown(mut self) -> Result<(), SessionError> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        match (&mut self.task).await {
            Ok(result) => result,
            Err(err) if err.is_cancelled() => Ok(()),
            Err(err) => Err(SessionError::Join(err.to_string())),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
