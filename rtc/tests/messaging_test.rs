//! Data-channel messaging tests.

mod helpers;

use bytes::Bytes;
use glossa_common::ParticipantId;
use glossa_rtc::SessionEvent;
use helpers::{harness, wait_for_event, wait_for_snapshot};

#[tokio::test]
async fn messages_deliver_only_once_the_channel_opens() {
    let h = harness();
    let a = ParticipantId::new();
    h.session.create_peer(a, None).await.unwrap();
    let channel = h.connector.peer(a).out_channel();

    // Channel exists but is still connecting.
    assert!(!h.session.send_message(a, Bytes::from_static(b"early")).await);
    assert!(channel.sent.lock().is_empty());

    channel.set_open(true);
    assert!(h.session.send_message(a, Bytes::from_static(b"hello")).await);
    assert_eq!(channel.sent.lock().as_slice(), [Bytes::from_static(b"hello")]);
}

#[tokio::test]
async fn channel_opening_flips_the_snapshot_flag() {
    let h = harness();
    let mut rx = h.session.subscribe();
    let a = ParticipantId::new();
    h.session.create_peer(a, None).await.unwrap();

    assert!(!h.session.snapshot().await.peers[&a].channel_open);

    h.connector.peer(a).out_channel().set_open(true);
    wait_for_snapshot(&mut rx, |s| {
        s.peers.get(&a).is_some_and(|p| p.channel_open)
    })
    .await;
}

#[tokio::test]
async fn sending_to_an_unknown_peer_reports_false() {
    let h = harness();
    assert!(
        !h.session
            .send_message(ParticipantId::new(), Bytes::from_static(b"x"))
            .await
    );
}

#[tokio::test]
async fn broadcast_skips_peers_whose_channel_is_not_open() {
    let h = harness();
    let a = ParticipantId::new();
    let b = ParticipantId::new();
    h.session.create_peer(a, None).await.unwrap();
    h.session.create_peer(b, None).await.unwrap();

    let open_channel = h.connector.peer(a).out_channel();
    open_channel.set_open(true);
    let closed_channel = h.connector.peer(b).out_channel();

    // Partial delivery is not a failure of the call.
    h.session.broadcast_message(Bytes::from_static(b"all")).await;

    assert_eq!(open_channel.sent.lock().as_slice(), [Bytes::from_static(b"all")]);
    assert!(closed_channel.sent.lock().is_empty());
}

#[tokio::test]
async fn inbound_messages_surface_as_events_with_opaque_payload() {
    let h = harness();
    let mut rx = h.session.subscribe();
    let a = ParticipantId::new();
    h.session.create_peer(a, None).await.unwrap();

    // Payload structure (chat JSON etc.) is the application's concern.
    let payload = Bytes::from_static(br#"{"kind":"chat","text":"bonjour"}"#);
    h.connector.peer(a).out_channel().receive(payload.clone());

    let event = wait_for_event(&mut rx, |e| {
        matches!(e, SessionEvent::MessageReceived { .. })
    })
    .await;
    match event {
        SessionEvent::MessageReceived { peer_id, payload: received } => {
            assert_eq!(peer_id, a);
            assert_eq!(received, payload);
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn remote_announced_channels_also_deliver_inbound_messages() {
    let h = harness();
    let mut rx = h.session.subscribe();
    let a = ParticipantId::new();
    h.session.create_peer(a, None).await.unwrap();

    let remote_channel = helpers::MockChannel::new("messages");
    remote_channel.set_open(true);
    h.connector.peer(a).announce_remote_channel(remote_channel.clone());

    remote_channel.receive(Bytes::from_static(b"from the far side"));

    let event = wait_for_event(&mut rx, |e| {
        matches!(e, SessionEvent::MessageReceived { .. })
    })
    .await;
    match event {
        SessionEvent::MessageReceived { peer_id, payload } => {
            assert_eq!(peer_id, a);
            assert_eq!(payload.as_ref(), b"from the far side");
        }
        other => panic!("unexpected event: {other:?}"),
    }
}
