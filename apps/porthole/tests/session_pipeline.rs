use std::time::Duration;

use serde_json::{Value, json};
use tokio::time::{sleep, timeout};
use uuid::Uuid;

use porthole::capture::UiEvent;
use porthole::config::SessionConfig;
use porthole::session::MirrorSession;
use porthole::session::retrieval::LoadedPage;
use porthole::transport::{InMemoryTransport, Transport, TransportPair};

const SNAPSHOT: &str = "<html><head><title>t</title></head><body><p>hi</p></body></html>";

fn page(markup: &str) -> LoadedPage {
    LoadedPage {
        id: Uuid::new_v4(),
        dom_string: markup.to_owned(),
    }
}

/// Short gates so tests spend milliseconds, not the production defaults.
fn fast_config() -> SessionConfig {
    SessionConfig {
        pointer_interval: Duration::from_millis(25),
        scroll_interval: Duration::from_millis(25),
        form_settle: Duration::from_millis(80),
        ..SessionConfig::default()
    }
}

/// One patch record in the dmp wire shape: keep `context`, swap `old`
/// for `new`, offsets pointing at the context in `base`.
fn diff_frame(base: &str, context: &str, old: &str, new: &str) -> String {
    let start = base.find(context).expect("context in base");
    json!({
        "type": "diff",
        "payload": [{
            "diffs": [[0, context], [-1, old], [1, new]],
            "start1": start,
            "start2": start,
            "length1": context.len() + old.len(),
            "length2": context.len() + new.len(),
        }],
    })
    .to_string()
}

async fn send_text(peer: &InMemoryTransport, text: String) {
    peer.send(&text).await.expect("peer send");
}

async fn expect_frame(peer: &mut InMemoryTransport) -> Value {
    let text = timeout(Duration::from_secs(5), peer.recv())
        .await
        .expect("frame before timeout")
        .expect("channel open");
    serde_json::from_str(&text).expect("frame is json")
}

async fn expect_type(peer: &mut InMemoryTransport, wire_type: &str) -> Value {
    let frame = expect_frame(peer).await;
    assert_eq!(frame["type"].as_str(), Some(wire_type), "frame: {frame}");
    frame
}

#[tokio::test]
async fn session_announces_then_acknowledges_patch_rounds() {
    let pair = TransportPair::new();
    let mut peer = pair.right;
    let session = MirrorSession::new(&page(SNAPSHOT), fast_config()).expect("session");
    let (_ui_tx, ui_rx) = tokio::sync::mpsc::unbounded_channel();
    let handle = session.spawn(Box::new(pair.left), ui_rx);

    expect_type(&mut peer, "listeningToDOMDiffs").await;

    send_text(&peer, diff_frame(SNAPSHOT, "<p>", "hi", "bye")).await;
    expect_type(&mut peer, "DOMpatched").await;

    // the second round patches the text the first round produced
    let patched = SNAPSHOT.replace("<p>hi", "<p>bye");
    send_text(&peer, diff_frame(&patched, "<p>", "bye", "ciao")).await;
    expect_type(&mut peer, "DOMpatched").await;

    handle.shutdown().await.expect("clean shutdown");
}

#[tokio::test]
async fn failed_patch_poisons_the_session() {
    let pair = TransportPair::new();
    let mut peer = pair.right;
    let session = MirrorSession::new(&page(SNAPSHOT), fast_config()).expect("session");
    let (_ui_tx, ui_rx) = tokio::sync::mpsc::unbounded_channel();
    let handle = session.spawn(Box::new(pair.left), ui_rx);

    expect_type(&mut peer, "listeningToDOMDiffs").await;

    // context "zz" appears nowhere in the snapshot
    send_text(&peer, diff_frame(SNAPSHOT, "<p>", "zz", "yy")).await;
    let first = expect_type(&mut peer, "error").await;
    let first_message = first["payload"]["message"].as_str().expect("message");
    assert!(first_message.contains("anchor not found"), "{first_message}");

    // a record that would have applied cleanly is refused after the failure
    send_text(&peer, diff_frame(SNAPSHOT, "<p>", "hi", "bye")).await;
    let second = expect_type(&mut peer, "error").await;
    let second_message = second["payload"]["message"].as_str().expect("message");
    assert!(second_message.contains("poisoned"), "{second_message}");
    assert!(second_message.contains("anchor not found"), "{second_message}");

    handle.shutdown().await.expect("clean shutdown");
}

#[tokio::test]
async fn garbage_frames_are_dropped_without_ending_the_session() {
    let pair = TransportPair::new();
    let mut peer = pair.right;
    let session = MirrorSession::new(&page(SNAPSHOT), fast_config()).expect("session");
    let (_ui_tx, ui_rx) = tokio::sync::mpsc::unbounded_channel();
    let handle = session.spawn(Box::new(pair.left), ui_rx);

    expect_type(&mut peer, "listeningToDOMDiffs").await;

    send_text(&peer, "{not json".to_owned()).await;
    send_text(&peer, json!({"type": "somethingnew"}).to_string()).await;

    // the channel still works afterwards
    send_text(&peer, diff_frame(SNAPSHOT, "<p>", "hi", "bye")).await;
    expect_type(&mut peer, "DOMpatched").await;

    handle.shutdown().await.expect("clean shutdown");
}

#[tokio::test]
async fn remote_pointer_frame_releases_the_buffered_local_pointer() {
    let pair = TransportPair::new();
    let mut peer = pair.right;
    let session = MirrorSession::new(&page(SNAPSHOT), fast_config()).expect("session");
    let (ui_tx, ui_rx) = tokio::sync::mpsc::unbounded_channel();
    let handle = session.spawn(Box::new(pair.left), ui_rx);

    expect_type(&mut peer, "listeningToDOMDiffs").await;

    // two samples in one window; only the newest survives the gate
    ui_tx
        .send(UiEvent::PointerMoved { x: 4.0, y: 4.0 })
        .expect("ui send");
    ui_tx
        .send(UiEvent::PointerMoved { x: 12.0, y: 21.0 })
        .expect("ui send");
    sleep(Duration::from_millis(120)).await;

    // a patch round acks first, proving no pointer frame left on its own
    send_text(&peer, diff_frame(SNAPSHOT, "<p>", "hi", "bye")).await;
    expect_type(&mut peer, "DOMpatched").await;

    send_text(
        &peer,
        json!({"type": "mousemoved", "payload": {"x": 3.0, "y": 9.0}}).to_string(),
    )
    .await;
    let forwarded = expect_type(&mut peer, "mousemoved").await;
    assert_eq!(forwarded["payload"]["x"].as_f64(), Some(12.0));
    assert_eq!(forwarded["payload"]["y"].as_f64(), Some(21.0));

    // the window is empty now, so another remote frame forwards nothing;
    // the next frame on the channel is the ack for a later patch round
    send_text(
        &peer,
        json!({"type": "mousemoved", "payload": {"x": 5.0, "y": 5.0}}).to_string(),
    )
    .await;
    let patched = SNAPSHOT.replace("<p>hi", "<p>bye");
    send_text(&peer, diff_frame(&patched, "<p>", "bye", "ciao")).await;
    expect_type(&mut peer, "DOMpatched").await;

    handle.shutdown().await.expect("clean shutdown");
}

#[tokio::test]
async fn clicks_bypass_the_pointer_gate_and_shed_the_chrome_offset() {
    let pair = TransportPair::new();
    let mut peer = pair.right;
    let session = MirrorSession::new(&page(SNAPSHOT), fast_config()).expect("session");
    let (ui_tx, ui_rx) = tokio::sync::mpsc::unbounded_channel();
    let handle = session.spawn(Box::new(pair.left), ui_rx);

    expect_type(&mut peer, "listeningToDOMDiffs").await;

    ui_tx
        .send(UiEvent::PointerClicked { x: 10.0, y: 260.0 })
        .expect("ui send");
    let click = expect_type(&mut peer, "mouseclick").await;
    assert_eq!(click["payload"]["x"].as_f64(), Some(10.0));
    assert_eq!(click["payload"]["y"].as_f64(), Some(200.0));

    handle.shutdown().await.expect("clean shutdown");
}

#[tokio::test]
async fn scroll_frames_flush_from_their_own_gate() {
    let pair = TransportPair::new();
    let mut peer = pair.right;
    let session = MirrorSession::new(&page(SNAPSHOT), fast_config()).expect("session");
    let (ui_tx, ui_rx) = tokio::sync::mpsc::unbounded_channel();
    let handle = session.spawn(Box::new(pair.left), ui_rx);

    expect_type(&mut peer, "listeningToDOMDiffs").await;

    ui_tx
        .send(UiEvent::Scrolled { x: 0.0, y: 150.0 })
        .expect("ui send");
    ui_tx
        .send(UiEvent::Scrolled { x: 0.0, y: 400.0 })
        .expect("ui send");

    let scroll = expect_type(&mut peer, "windowscroll").await;
    assert_eq!(scroll["payload"]["x"].as_f64(), Some(0.0));
    assert_eq!(scroll["payload"]["y"].as_f64(), Some(400.0));

    handle.shutdown().await.expect("clean shutdown");
}

#[tokio::test]
async fn settled_form_edit_reports_ordinal_index_and_final_value() {
    let markup = r#"<html><head></head><body><input id="name"><p>hi</p></body></html>"#;
    let pair = TransportPair::new();
    let mut peer = pair.right;
    let session = MirrorSession::new(&page(markup), fast_config()).expect("session");
    let control = session
        .replica()
        .form_control_at(0)
        .expect("input in replica");
    let (ui_tx, ui_rx) = tokio::sync::mpsc::unbounded_channel();
    let handle = session.spawn(Box::new(pair.left), ui_rx);

    expect_type(&mut peer, "listeningToDOMDiffs").await;

    ui_tx
        .send(UiEvent::FormEdited {
            control,
            value: "ad".to_owned(),
        })
        .expect("ui send");
    ui_tx
        .send(UiEvent::FormEdited {
            control,
            value: "ada".to_owned(),
        })
        .expect("ui send");

    let action = expect_type(&mut peer, "formaction").await;
    assert_eq!(action["payload"]["tagname"].as_str(), Some("input"));
    assert_eq!(action["payload"]["index"].as_u64(), Some(0));
    assert_eq!(action["payload"]["value"].as_str(), Some("ada"));

    handle.shutdown().await.expect("clean shutdown");
}

#[tokio::test]
async fn peer_close_ends_the_session_task() {
    let pair = TransportPair::new();
    let mut peer = pair.right;
    let session = MirrorSession::new(&page(SNAPSHOT), fast_config()).expect("session");
    let (_ui_tx, ui_rx) = tokio::sync::mpsc::unbounded_channel();
    let handle = session.spawn(Box::new(pair.left), ui_rx);

    expect_type(&mut peer, "listeningToDOMDiffs").await;
    drop(peer);

    let mut finished = false;
    for _ in 0..100 {
        if handle.is_finished() {
            finished = true;
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert!(finished, "session should end when the peer goes away");
    handle.shutdown().await.expect("clean shutdown");
}

#[tokio::test]
async fn shutdown_drops_the_transport() {
    let pair = TransportPair::new();
    let mut peer = pair.right;
    let session = MirrorSession::new(&page(SNAPSHOT), fast_config()).expect("session");
    let (_ui_tx, ui_rx) = tokio::sync::mpsc::unbounded_channel();
    let handle = session.spawn(Box::new(pair.left), ui_rx);

    expect_type(&mut peer, "listeningToDOMDiffs").await;
    handle.shutdown().await.expect("clean shutdown");

    let closed = timeout(Duration::from_secs(5), peer.recv())
        .await
        .expect("close before timeout");
    assert_eq!(closed, None);
}
