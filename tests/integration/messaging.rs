use crate::*;

#[tokio::test]
async fn test_message_carries_text_sender_and_host() {
    if !skip_unless_ready() {
        return;
    }

    let a = TestNode::isolated("127.0.2.1", "Ms. Rao", Role::Teacher).await;
    let b = TestNode::isolated("127.0.2.2", "Priya", Role::Student).await;

    assert!(a.node.send_message(b.host, "Quiz moved to Friday").await);
    assert!(wait_until(Duration::from_secs(5), || b.seen.messages.lock().len() == 1).await);

    let got = b.seen.messages.lock()[0].clone();
    assert_eq!(got.text, "Quiz moved to Friday");
    assert_eq!(got.sender_name, "Ms. Rao");
    assert_eq!(got.sender_host, a.host);
    assert!(a.seen.errors.lock().is_empty());

    a.stop().await;
    b.stop().await;
}

/// Nothing listens on the target: one failure, one error, and the local
/// listener keeps working afterwards.
#[tokio::test]
async fn test_unreachable_peer_reports_one_error() {
    if !skip_unless_ready() {
        return;
    }

    let a = TestNode::isolated("127.0.2.11", "Ravi", Role::Student).await;
    let b = TestNode::isolated("127.0.2.12", "Priya", Role::Student).await;

    assert!(!a.node.send_message(ip("127.0.2.99"), "anyone?").await);
    assert_eq!(*a.seen.errors.lock(), vec![ErrorKind::TransientNetwork]);

    assert!(b.node.send_message(a.host, "still here").await);
    assert!(wait_until(Duration::from_secs(5), || a.seen.messages.lock().len() == 1).await);
    assert_eq!(a.seen.messages.lock()[0].sender_name, "Priya");

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn test_broadcast_message_reaches_every_peer() {
    if !skip_unless_ready() {
        return;
    }

    let a = TestNode::isolated("127.0.2.21", "Ms. Rao", Role::Teacher).await;
    let b = TestNode::isolated("127.0.2.22", "Priya", Role::Student).await;
    let c = TestNode::isolated("127.0.2.23", "Ravi", Role::Student).await;
    introduce(&[&a, &b, &c]);

    assert_eq!(a.node.broadcast_message("Lab starts now").await, 2);
    let delivered = wait_until(Duration::from_secs(5), || {
        b.seen.messages.lock().len() == 1 && c.seen.messages.lock().len() == 1
    })
    .await;
    assert!(delivered);
    assert!(a.seen.messages.lock().is_empty());

    a.stop().await;
    b.stop().await;
    c.stop().await;
}

/// A peer that went away still counts against the total, but the others
/// get the message.
#[tokio::test]
async fn test_broadcast_message_counts_partial_delivery() {
    if !skip_unless_ready() {
        return;
    }

    let a = TestNode::isolated("127.0.2.31", "Ms. Rao", Role::Teacher).await;
    let b = TestNode::isolated("127.0.2.32", "Priya", Role::Student).await;
    introduce(&[&a, &b]);
    a.node
        .registry()
        .record_peer(PeerAddress::new(ip("127.0.2.39"), DISCOVERY_PORT), Some("Gone"));

    assert_eq!(a.node.broadcast_message("Homework due").await, 1);
    assert_eq!(*a.seen.errors.lock(), vec![ErrorKind::TransientNetwork]);

    a.stop().await;
    b.stop().await;
}
