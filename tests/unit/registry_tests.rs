use handoff_desk::delivery::protocol::ServerFrame;
use handoff_desk::delivery::registry::ConnectionRegistry;
use tokio::sync::mpsc;

fn frame(text: &str) -> ServerFrame {
    ServerFrame::SystemMessage {
        session_id: "s1".into(),
        message: text.into(),
    }
}

#[test]
fn send_reaches_registered_connection() {
    let registry = ConnectionRegistry::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    registry.register("a", tx);

    assert!(registry.send("a", frame("hello")));
    assert_eq!(rx.try_recv().expect("frame"), frame("hello"));
    assert!(!registry.send("b", frame("nobody")));
}

#[test]
fn newer_connection_replaces_older() {
    let registry = ConnectionRegistry::new();
    let (old_tx, mut old_rx) = mpsc::unbounded_channel();
    let (new_tx, mut new_rx) = mpsc::unbounded_channel();
    let old_id = registry.register("a", old_tx);
    let new_id = registry.register("a", new_tx);
    assert_ne!(old_id, new_id);
    assert_eq!(registry.len(), 1);

    registry.send("a", frame("latest"));
    assert!(old_rx.try_recv().is_err());
    assert_eq!(new_rx.try_recv().expect("frame"), frame("latest"));

    // Late disconnect of the replaced socket.
    assert!(!registry.remove("a", old_id));
    assert!(registry.is_connected("a"));
    assert!(registry.remove("a", new_id));
    assert!(registry.is_empty());
}

#[test]
fn closed_receiver_is_dropped_on_send() {
    let registry = ConnectionRegistry::new();
    let (tx, rx) = mpsc::unbounded_channel();
    registry.register("a", tx);
    drop(rx);

    assert!(!registry.is_connected("a"));
    assert!(!registry.send("a", frame("lost")));
    assert!(registry.is_empty());
}

#[test]
fn broadcast_skips_sender() {
    let registry = ConnectionRegistry::new();
    let (a_tx, mut a_rx) = mpsc::unbounded_channel();
    let (b_tx, mut b_rx) = mpsc::unbounded_channel();
    let (c_tx, mut c_rx) = mpsc::unbounded_channel();
    registry.register("a", a_tx);
    registry.register("b", b_tx);
    registry.register("c", c_tx);

    assert_eq!(registry.broadcast(&frame("status"), Some("a")), 2);
    assert!(a_rx.try_recv().is_err());
    assert!(b_rx.try_recv().is_ok());
    assert!(c_rx.try_recv().is_ok());
}
