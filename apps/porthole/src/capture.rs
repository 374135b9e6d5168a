//! Turns raw UI samples into outbound envelopes.
//!
//! Pointer and scroll samples are conflated: within one throttle window only
//! the newest sample survives, and it is released when the window closes.
//! Form edits settle instead, the timer restarting on every keystroke.
//! Clicks pass straight through. Rendering is expected to read the raw
//! samples before they get here; nothing in this module delays the screen.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::SessionConfig;
use crate::dom::{NodeId, ReplicaDocument};
use crate::protocol::{ActionEnvelope, FormPayload, PointerPayload};

/// Raw interaction samples as the host shell reports them.
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    PointerMoved { x: f64, y: f64 },
    PointerClicked { x: f64, y: f64 },
    Scrolled { x: f64, y: f64 },
    FormEdited { control: NodeId, value: String },
}

/// Keeps the newest sample of a window and releases it when the window
/// closes. The window opens with the first sample after an idle gap, so
/// emissions are always at least `interval` apart.
#[derive(Debug)]
pub struct SampleConflator<T> {
    interval: Duration,
    pending: Option<T>,
    deadline: Option<Instant>,
}

impl<T> SampleConflator<T> {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            pending: None,
            deadline: None,
        }
    }

    pub fn observe(&mut self, sample: T, now: Instant) {
        if self.pending.is_none() {
            self.deadline = Some(now + self.interval);
        }
        self.pending = Some(sample);
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn take_due(&mut self, now: Instant) -> Option<T> {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                self.pending.take()
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct FormSample {
    control: NodeId,
    value: String,
}

/// Debounce for form edits: the deadline moves on every sample, so a burst
/// of keystrokes yields one envelope carrying the final value.
#[derive(Debug)]
struct FormSettle {
    settle: Duration,
    pending: Option<FormSample>,
    deadline: Option<Instant>,
}

impl FormSettle {
    fn new(settle: Duration) -> Self {
        Self {
            settle,
            pending: None,
            deadline: None,
        }
    }

    fn observe(&mut self, sample: FormSample, now: Instant) {
        self.deadline = Some(now + self.settle);
        self.pending = Some(sample);
    }

    fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    fn take_due(&mut self, now: Instant) -> Option<FormSample> {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                self.pending.take()
            }
            _ => None,
        }
    }
}

/// Everything a flush released at once.
#[derive(Debug, Default)]
pub struct CaptureFlush {
    /// Conflated pointer position, bound for the mirror window rather than
    /// the channel.
    pub pointer: Option<PointerPayload>,
    pub scroll: Option<ActionEnvelope>,
    pub form: Option<ActionEnvelope>,
}

#[derive(Debug)]
pub struct InteractionCapture {
    pointer: SampleConflator<PointerPayload>,
    scroll: SampleConflator<PointerPayload>,
    form: FormSettle,
    click_chrome_offset: f64,
}

impl InteractionCapture {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            pointer: SampleConflator::new(config.pointer_interval),
            scroll: SampleConflator::new(config.scroll_interval),
            form: FormSettle::new(config.form_settle),
            click_chrome_offset: config.click_chrome_offset,
        }
    }

    /// Feeds one raw sample. Clicks come back immediately as envelopes;
    /// everything else waits for [`InteractionCapture::flush`].
    pub fn on_event(&mut self, event: UiEvent, now: Instant) -> Option<ActionEnvelope> {
        match event {
            UiEvent::PointerMoved { x, y } => {
                self.pointer.observe(PointerPayload { x, y }, now);
                None
            }
            UiEvent::Scrolled { x, y } => {
                self.scroll.observe(PointerPayload { x, y }, now);
                None
            }
            UiEvent::PointerClicked { x, y } => Some(ActionEnvelope::MouseClick {
                payload: PointerPayload {
                    x,
                    y: y - self.click_chrome_offset,
                },
            }),
            UiEvent::FormEdited { control, value } => {
                self.form.observe(FormSample { control, value }, now);
                None
            }
        }
    }

    /// Earliest instant at which a flush would release something.
    pub fn next_deadline(&self) -> Option<Instant> {
        [
            self.pointer.deadline(),
            self.scroll.deadline(),
            self.form.deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Releases everything whose window has closed by `now`.
    ///
    /// Settled form edits resolve the control's ordinal index against the
    /// replica at flush time; an edit whose control has left the tree is
    /// dropped.
    pub fn flush(&mut self, now: Instant, replica: &ReplicaDocument) -> CaptureFlush {
        let pointer = self.pointer.take_due(now);
        let scroll = self
            .scroll
            .take_due(now)
            .map(|payload| ActionEnvelope::WindowScroll { payload });
        let form = self.form.take_due(now).and_then(|sample| {
            let index = replica.form_control_index(sample.control);
            let tag = replica.tag(sample.control);
            match (index, tag) {
                (Some(index), Some(tag)) => Some(ActionEnvelope::FormAction {
                    payload: FormPayload {
                        tagname: tag.to_owned(),
                        index,
                        value: sample.value,
                    },
                }),
                _ => {
                    debug!(control = ?sample.control, "dropping settled edit for detached control");
                    None
                }
            }
        });
        CaptureFlush {
            pointer,
            scroll,
            form,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::parse_document;

    fn capture() -> InteractionCapture {
        InteractionCapture::new(&SessionConfig::default())
    }

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn pointer_window_releases_only_the_newest_sample() {
        let mut capture = capture();
        let replica = parse_document("<body></body>").unwrap();
        let start = Instant::now();

        assert!(capture
            .on_event(UiEvent::PointerMoved { x: 10.0, y: 20.0 }, start)
            .is_none());
        assert!(capture
            .on_event(UiEvent::PointerMoved { x: 12.0, y: 21.0 }, start + ms(5))
            .is_none());

        // window still open
        assert!(capture.flush(start + ms(30), &replica).pointer.is_none());

        let flush = capture.flush(start + ms(41), &replica);
        assert_eq!(flush.pointer, Some(PointerPayload { x: 12.0, y: 21.0 }));

        // nothing left behind
        assert!(capture.flush(start + ms(100), &replica).pointer.is_none());
    }

    #[test]
    fn pointer_emissions_are_spaced_by_the_interval() {
        let mut capture = capture();
        let replica = parse_document("<body></body>").unwrap();
        let start = Instant::now();

        capture.on_event(UiEvent::PointerMoved { x: 1.0, y: 1.0 }, start);
        assert_eq!(capture.next_deadline(), Some(start + ms(41)));
        capture.flush(start + ms(41), &replica);

        capture.on_event(UiEvent::PointerMoved { x: 2.0, y: 2.0 }, start + ms(42));
        assert_eq!(capture.next_deadline(), Some(start + ms(83)));
    }

    #[test]
    fn clicks_pass_through_with_the_chrome_offset() {
        let mut capture = capture();
        let start = Instant::now();
        let envelope = capture
            .on_event(UiEvent::PointerClicked { x: 100.0, y: 260.0 }, start)
            .unwrap();
        assert_eq!(
            envelope,
            ActionEnvelope::MouseClick {
                payload: PointerPayload { x: 100.0, y: 200.0 }
            }
        );
    }

    #[test]
    fn scroll_flushes_as_an_absolute_position() {
        let mut capture = capture();
        let replica = parse_document("<body></body>").unwrap();
        let start = Instant::now();

        capture.on_event(UiEvent::Scrolled { x: 0.0, y: 300.0 }, start);
        capture.on_event(UiEvent::Scrolled { x: 0.0, y: 450.0 }, start + ms(10));

        let flush = capture.flush(start + ms(80), &replica);
        assert_eq!(
            flush.scroll,
            Some(ActionEnvelope::WindowScroll {
                payload: PointerPayload { x: 0.0, y: 450.0 }
            })
        );
    }

    #[test]
    fn form_settle_restarts_on_every_keystroke() {
        let mut capture = capture();
        let replica = parse_document("<body><input></body>").unwrap();
        let control = replica.form_control_at(0).unwrap();
        let start = Instant::now();

        capture.on_event(
            UiEvent::FormEdited {
                control,
                value: "h".into(),
            },
            start,
        );
        capture.on_event(
            UiEvent::FormEdited {
                control,
                value: "hello".into(),
            },
            start + ms(900),
        );

        // first deadline has passed, but the second edit moved it
        assert!(capture.flush(start + ms(1000), &replica).form.is_none());

        let flush = capture.flush(start + ms(1900), &replica);
        assert_eq!(
            flush.form,
            Some(ActionEnvelope::FormAction {
                payload: FormPayload {
                    tagname: "input".into(),
                    index: 0,
                    value: "hello".into(),
                }
            })
        );
    }

    #[test]
    fn settled_edit_for_a_detached_control_is_dropped() {
        let mut capture = capture();
        let mut replica = parse_document("<body><input></body>").unwrap();
        let control = replica.form_control_at(0).unwrap();
        let start = Instant::now();

        capture.on_event(
            UiEvent::FormEdited {
                control,
                value: "orphaned".into(),
            },
            start,
        );
        replica.remove_subtree(control);

        let flush = capture.flush(start + ms(1000), &replica);
        assert!(flush.form.is_none());
    }

    #[test]
    fn next_deadline_is_the_earliest_gate() {
        let mut capture = capture();
        let start = Instant::now();
        assert!(capture.next_deadline().is_none());

        capture.on_event(UiEvent::Scrolled { x: 0.0, y: 1.0 }, start);
        capture.on_event(UiEvent::PointerMoved { x: 0.0, y: 0.0 }, start + ms(1));
        assert_eq!(capture.next_deadline(), Some(start + ms(42)));
    }
}
