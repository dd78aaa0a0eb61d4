use crate::*;

/// Late joiner's broadcast reaches the first node, whose ack and name come
/// straight back: both sides end up knowing each other.
#[tokio::test]
async fn test_discovery_is_symmetric() {
    if !skip_unless_ready() {
        return;
    }

    let a = TestNode::start("127.0.1.1", "127.0.1.2", "Ms. Rao", Role::Teacher).await;
    let b = TestNode::start("127.0.1.2", "127.0.1.1", "Priya", Role::Student).await;

    let converged = wait_until(Duration::from_secs(5), || {
        a.node.registry().name_of(b.host) == "Priya"
            && b.node.registry().name_of(a.host) == "Ms. Rao"
    })
    .await;
    assert!(converged, "nodes did not learn each other's names");

    assert_eq!(a.node.registry().len(), 1);
    assert_eq!(b.node.registry().len(), 1);
    assert_eq!(a.node.registry().list_peers()[0].host, b.host);
    assert_eq!(b.node.registry().list_peers()[0].host, a.host);

    // One event per new host, however many datagrams arrived.
    assert_eq!(*a.seen.peers.lock(), vec![b.host]);
    assert_eq!(*b.seen.peers.lock(), vec![a.host]);

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn test_repeated_announcements_do_not_duplicate_peers() {
    if !skip_unless_ready() {
        return;
    }

    let a = TestNode::start("127.0.1.11", "127.0.1.12", "Ms. Rao", Role::Teacher).await;
    let b = TestNode::start("127.0.1.12", "127.0.1.11", "Ravi", Role::Student).await;
    assert!(wait_until(Duration::from_secs(5), || a.node.registry().len() == 1).await);

    for _ in 0..3 {
        b.node.announce().await;
        b.node.announce_name("Ravi").await;
    }
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(a.node.registry().len(), 1);
    assert_eq!(a.seen.peers.lock().len(), 1);
    assert_eq!(a.node.registry().name_of(b.host), "Ravi");

    a.stop().await;
    b.stop().await;
}

/// A name from a host that never sent DISCOVER_PEER still registers it.
#[tokio::test]
async fn test_name_alone_registers_peer() {
    if !skip_unless_ready() {
        return;
    }

    let a = TestNode::isolated("127.0.1.21", "Ms. Rao", Role::Teacher).await;

    let stranger = std::net::UdpSocket::bind((ip("127.0.1.22"), 0)).unwrap();
    stranger
        .send_to(b"NAME:Karan", (a.host, DISCOVERY_PORT))
        .unwrap();

    assert!(wait_until(Duration::from_secs(5), || a.node.registry().contains(ip("127.0.1.22"))).await);
    assert_eq!(a.node.registry().name_of(ip("127.0.1.22")), "Karan");
    // The stranger's ephemeral source port is recorded verbatim.
    assert_eq!(
        a.node.registry().list_peers()[0].port,
        stranger.local_addr().unwrap().port()
    );

    a.stop().await;
}
