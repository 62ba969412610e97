//! Session and controller lifecycle against the loopback engine:
//! connection failures, the path registry, detach independence, and the
//! controller's converged-content guarantees.

use std::time::Duration;

use tandem_core::{BridgeError, MemoryHub, Session, SessionConfig};

async fn connect(hub: &MemoryHub, user: &str) -> Session {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    Session::connect(hub, SessionConfig::new(user, hub.address()))
        .await
        .expect("connect failed")
}

/// Poll `cond` until it holds or a 5 second deadline passes.
async fn eventually<F: Fn() -> bool>(cond: F) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

#[tokio::test]
async fn connect_rejects_malformed_address() {
    let hub = MemoryHub::spawn();
    let result = Session::connect(&hub, SessionConfig::new("alice", "http://nope")).await;
    assert!(matches!(result, Err(BridgeError::Connection(_))));
}

#[tokio::test]
async fn connect_rejects_unknown_address() {
    let hub = MemoryHub::spawn();
    let result =
        Session::connect(&hub, SessionConfig::new("alice", "mem://nothing-here")).await;
    assert!(matches!(result, Err(BridgeError::Connection(_))));
}

#[tokio::test]
async fn create_duplicate_path_fails() {
    let hub = MemoryHub::spawn();
    let session = connect(&hub, "alice").await;

    assert!(session.create("a.txt", "hello").await.unwrap());
    let result = session.create("a.txt", "other").await;
    assert!(matches!(result, Err(BridgeError::BufferExists(path)) if path == "a.txt"));

    // The seed content survived the rejected create.
    let controller = session.attach("a.txt").await.unwrap();
    assert_eq!(controller.content(), "hello");
}

#[tokio::test]
async fn attach_missing_path_fails() {
    let hub = MemoryHub::spawn();
    let session = connect(&hub, "alice").await;

    let result = session.attach("ghost.txt").await;
    assert!(matches!(result, Err(BridgeError::BufferNotFound(path)) if path == "ghost.txt"));
    assert!(session.buffers().await.is_empty());
}

#[tokio::test]
async fn attach_twice_returns_the_live_controller() {
    let hub = MemoryHub::spawn();
    let session = connect(&hub, "alice").await;
    session.create("a.txt", "abc").await.unwrap();

    let first = session.attach("a.txt").await.unwrap();
    let second = session.attach("a.txt").await.unwrap();
    assert_eq!(session.buffers().await, vec!["a.txt".to_string()]);

    // Both handles drive the same worker.
    second.apply(3, "!", 3).await.unwrap();
    assert_eq!(first.content(), "abc!");
    assert_eq!(first.rev(), second.rev());
}

#[tokio::test]
async fn apply_with_stale_offsets_is_a_conflict() {
    let hub = MemoryHub::spawn();
    let session = connect(&hub, "alice").await;
    session.create("a.txt", "hello").await.unwrap();
    let controller = session.attach("a.txt").await.unwrap();

    let result = controller.apply(10, "x", 12).await;
    assert!(matches!(result, Err(BridgeError::ApplyConflict(_))));

    // The rejection left the converged content untouched.
    assert_eq!(controller.content(), "hello");
    assert_eq!(controller.rev(), 0);
}

#[tokio::test]
async fn acknowledged_applies_match_the_reference_splice_model() {
    let hub = MemoryHub::spawn();
    let session = connect(&hub, "alice").await;
    session.create("a.txt", "hello").await.unwrap();
    let controller = session.attach("a.txt").await.unwrap();

    let mut model = "hello".to_string();
    let edits = [
        (5usize, " world", 5usize),
        (0, "H", 1),
        (10, "", 11),
        (5, ",", 5),
    ];
    for (start, text, end) in edits {
        controller.apply(start, text, end).await.unwrap();
        let chars: Vec<char> = model.chars().collect();
        let mut next: String = chars[..start].iter().collect();
        next.push_str(text);
        next.extend(&chars[end..]);
        model = next;
        assert_eq!(controller.content(), model);
    }
    assert_eq!(model, "Hello, worl");

    let audit = hub.audit("a.txt").await.unwrap();
    assert_eq!(audit.content, model);
    assert_eq!(audit.rev, edits.len() as u64);
}

#[tokio::test]
async fn detach_stops_one_buffer_without_affecting_others() {
    let hub = MemoryHub::spawn();

    let alice = connect(&hub, "alice").await;
    alice.create("a.txt", "aaa").await.unwrap();
    alice.create("b.txt", "bbb").await.unwrap();
    let a_ctrl = alice.attach("a.txt").await.unwrap();
    let b_ctrl = alice.attach("b.txt").await.unwrap();

    assert!(alice.detach("a.txt").await);
    assert!(!alice.detach("a.txt").await);
    assert_eq!(alice.buffers().await, vec!["b.txt".to_string()]);

    // The other buffer still converges.
    let bob = connect(&hub, "bob").await;
    let bob_b = bob.attach("b.txt").await.unwrap();
    bob_b.apply(3, "!", 3).await.unwrap();
    assert!(eventually(|| b_ctrl.content() == "bbb!").await);

    // The detached controller no longer follows the engine.
    let bob_a = bob.attach("a.txt").await.unwrap();
    bob_a.apply(3, "!", 3).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(a_ctrl.content(), "aaa");
}

#[tokio::test]
async fn stopped_controller_rejects_further_applies() {
    let hub = MemoryHub::spawn();
    let session = connect(&hub, "alice").await;
    session.create("a.txt", "hello").await.unwrap();
    let controller = session.attach("a.txt").await.unwrap();

    controller.stop();

    // The worker drains in-flight commands before exiting; keep probing
    // until the stop lands.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        match controller.apply(0, "x", 0).await {
            Err(BridgeError::ChannelClosed(_)) => break,
            Ok(_) => {
                assert!(
                    tokio::time::Instant::now() < deadline,
                    "worker kept accepting applies after stop"
                );
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            Err(e) => panic!("unexpected error after stop: {}", e),
        }
    }
}

#[tokio::test]
async fn listen_is_idempotent_per_session() {
    let hub = MemoryHub::spawn();

    let alice = connect(&hub, "alice").await;
    let first = alice.listen().unwrap();
    let second = alice.listen().unwrap();
    let mut sub_first = first.subscribe();
    let mut sub_second = second.subscribe();

    let bob = connect(&hub, "bob").await;
    let bob_cursors = bob.listen().unwrap();
    bob_cursors
        .send("a.txt", (1, 0).into(), (1, 4).into())
        .await;

    // The same logical channel feeds both handles.
    for sub in [&mut sub_first, &mut sub_second] {
        let event = tokio::time::timeout(Duration::from_secs(5), sub.recv())
            .await
            .expect("no cursor event")
            .unwrap();
        assert_eq!(event.user, "bob");
        assert_eq!(event.buffer, "a.txt");
    }
}

#[tokio::test]
async fn cursor_send_does_not_surface_failures() {
    let hub = MemoryHub::spawn();
    let alice = connect(&hub, "alice").await;
    let cursors = alice.listen().unwrap();

    // No other session is listening; best-effort means this simply
    // completes.
    cursors.send("a.txt", (1, 0).into(), (1, 0).into()).await;
}

#[tokio::test]
async fn two_sessions_on_one_engine_stay_independent() {
    let hub = MemoryHub::spawn();

    let alice = connect(&hub, "alice").await;
    let bob = connect(&hub, "bob").await;
    assert_ne!(alice.peer_id(), bob.peer_id());

    alice.create("a.txt", "shared").await.unwrap();
    let a_ctrl = alice.attach("a.txt").await.unwrap();
    let b_ctrl = bob.attach("a.txt").await.unwrap();

    a_ctrl.apply(6, "!", 6).await.unwrap();
    assert!(eventually(|| b_ctrl.content() == "shared!").await);

    // Alice's registry is hers alone.
    assert_eq!(alice.buffers().await, vec!["a.txt".to_string()]);
    assert_eq!(bob.buffers().await, vec!["a.txt".to_string()]);
}
