use crate::*;

const MIB: usize = 1024 * 1024;

fn write_source(tag: &str, name: &str, data: &[u8]) -> PathBuf {
    let dir = scratch_dir(tag);
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, data).unwrap();
    path
}

/// Teacher file over a single peer: every chunk lands there and the file
/// is rebuilt byte for byte.
#[tokio::test]
async fn test_single_peer_receives_whole_file() {
    if !skip_unless_ready() {
        return;
    }

    let a = TestNode::isolated("127.0.3.1", "Ms. Rao", Role::Teacher).await;
    let b = TestNode::isolated("127.0.3.2", "Priya", Role::Student).await;
    introduce(&[&a, &b]);

    let data = patterned_bytes(5 * MIB / 2);
    let source = write_source("src-single", "slides.pdf", &data);

    let progress = Arc::new(Mutex::new(Vec::new()));
    let sink = progress.clone();
    let report = move |p: &classmesh_services::Progress| sink.lock().push(p.completed);
    let report: classmesh_services::SendProgress<'_> = &report;
    assert!(a.node.send_file(&source, Some(report)).await);
    assert_eq!(*progress.lock(), vec![1, 2, 3]);

    assert!(wait_until(Duration::from_secs(10), || b.seen.completed.lock().len() == 1).await);
    let done = b.seen.completed.lock()[0].clone();
    assert_eq!(done.file_name, "slides.pdf");
    assert_eq!(done.size_bytes, data.len() as u64);
    assert_eq!(done.sender_name, "Ms. Rao");
    assert_eq!(done.path, b.output_dir().join("slides.pdf"));
    assert_eq!(std::fs::read(&done.path).unwrap(), data);

    assert_eq!(b.seen.chunk_indices("slides.pdf"), vec![0, 1, 2]);
    assert!(b.node.reassembly().is_empty());

    let _ = std::fs::remove_dir_all(source.parent().unwrap());
    a.stop().await;
    b.stop().await;
}

/// Teacher chunks go round-robin and stay where they land: with two
/// receivers and three chunks, neither can finish.
#[tokio::test]
async fn test_teacher_chunks_are_not_relayed() {
    if !skip_unless_ready() {
        return;
    }

    let a = TestNode::isolated("127.0.3.11", "Ms. Rao", Role::Teacher).await;
    let b = TestNode::isolated("127.0.3.12", "Priya", Role::Student).await;
    let c = TestNode::isolated("127.0.3.13", "Ravi", Role::Student).await;
    introduce(&[&a, &b, &c]);

    let data = patterned_bytes(5 * MIB / 2);
    let source = write_source("src-teacher", "notes.zip", &data);
    assert!(a.node.send_file(&source, None).await);

    let arrived = wait_until(Duration::from_secs(10), || {
        b.seen.chunks.lock().len() == 2 && c.seen.chunks.lock().len() == 1
    })
    .await;
    assert!(arrived);
    // Give any stray relay time to show up.
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(b.seen.chunk_indices("notes.zip"), vec![0, 2]);
    assert_eq!(c.seen.chunk_indices("notes.zip"), vec![1]);
    assert!(b.seen.completed.lock().is_empty());
    assert!(c.seen.completed.lock().is_empty());
    assert_eq!(b.node.reassembly().missing_chunks("notes.zip"), Some(vec![1]));
    assert_eq!(c.node.reassembly().missing_chunks("notes.zip"), Some(vec![0, 2]));

    let _ = std::fs::remove_dir_all(source.parent().unwrap());
    a.stop().await;
    b.stop().await;
    c.stop().await;
}

/// Student chunks are relayed one hop to every other peer, so every
/// receiver finishes. The sender never gets its own chunks back.
#[tokio::test]
async fn test_student_relay_completes_file_everywhere() {
    if !skip_unless_ready() {
        return;
    }

    let a = TestNode::isolated("127.0.3.21", "Ravi", Role::Student).await;
    let b = TestNode::isolated("127.0.3.22", "Priya", Role::Student).await;
    let c = TestNode::isolated("127.0.3.23", "Karan", Role::Student).await;
    introduce(&[&a, &b, &c]);

    let data = patterned_bytes(5 * MIB / 2);
    let source = write_source("src-student", "homework.tar", &data);
    assert!(a.node.send_file(&source, None).await);

    let finished = wait_until(Duration::from_secs(10), || {
        b.seen.completed.lock().len() == 1 && c.seen.completed.lock().len() == 1
    })
    .await;
    assert!(finished, "relay did not complete the file on both receivers");

    for receiver in [&b, &c] {
        let done = receiver.seen.completed.lock()[0].clone();
        assert_eq!(done.sender_name, "Ravi");
        assert_eq!(std::fs::read(&done.path).unwrap(), data);
        assert_eq!(receiver.seen.chunk_indices("homework.tar"), vec![0, 1, 2]);
    }

    // Relayed chunks arrive from the relaying peer, not the originator.
    let relayed_from_c: Vec<u32> = b
        .seen
        .chunks
        .lock()
        .iter()
        .filter(|chunk| chunk.sender_host == c.host)
        .map(|chunk| chunk.chunk_index)
        .collect();
    assert_eq!(relayed_from_c, vec![1]);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(a.seen.chunks.lock().is_empty());
    assert!(a.seen.completed.lock().is_empty());

    let _ = std::fs::remove_dir_all(source.parent().unwrap());
    a.stop().await;
    b.stop().await;
    c.stop().await;
}

#[tokio::test]
async fn test_empty_file_is_one_empty_chunk() {
    if !skip_unless_ready() {
        return;
    }

    let a = TestNode::isolated("127.0.3.31", "Ms. Rao", Role::Teacher).await;
    let b = TestNode::isolated("127.0.3.32", "Priya", Role::Student).await;
    introduce(&[&a, &b]);

    let source = write_source("src-empty", "blank.txt", b"");
    assert!(a.node.send_file(&source, None).await);

    assert!(wait_until(Duration::from_secs(5), || b.seen.completed.lock().len() == 1).await);
    let done = b.seen.completed.lock()[0].clone();
    assert_eq!(done.size_bytes, 0);
    assert_eq!(std::fs::read(&done.path).unwrap(), b"");
    assert_eq!(b.seen.chunk_indices("blank.txt"), vec![0]);

    let _ = std::fs::remove_dir_all(source.parent().unwrap());
    a.stop().await;
    b.stop().await;
}

/// A dead peer in the rotation aborts the send at its first chunk.
#[tokio::test]
async fn test_send_aborts_on_unreachable_peer() {
    if !skip_unless_ready() {
        return;
    }

    let a = TestNode::isolated("127.0.3.41", "Ms. Rao", Role::Teacher).await;
    let b = TestNode::isolated("127.0.3.42", "Priya", Role::Student).await;
    introduce(&[&a, &b]);
    a.node
        .registry()
        .record_peer(PeerAddress::new(ip("127.0.3.49"), DISCOVERY_PORT), None);

    let data = patterned_bytes(5 * MIB / 2);
    let source = write_source("src-abort", "video.mp4", &data);
    assert!(!a.node.send_file(&source, None).await);
    assert_eq!(*a.seen.errors.lock(), vec![ErrorKind::TransientNetwork]);

    // Chunk 0 reached B before chunk 1 failed; chunk 2 was never sent.
    assert!(wait_until(Duration::from_secs(5), || b.seen.chunks.lock().len() == 1).await);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(b.seen.chunk_indices("video.mp4"), vec![0]);
    assert!(b.seen.completed.lock().is_empty());

    let _ = std::fs::remove_dir_all(source.parent().unwrap());
    a.stop().await;
    b.stop().await;
}
