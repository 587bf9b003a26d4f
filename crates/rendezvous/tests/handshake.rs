use std::fs::File;
use std::io::{IoSlice, Read, Seek, SeekFrom, Write};
use std::os::fd::{AsRawFd, OwnedFd};
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use dmabuf_core::{BufferMetadata, DmaBufHandle, FourCc};
use nix::sys::socket::{sendmsg, ControlMessage, MsgFlags};
use rendezvous::{CancelToken, ChannelError, Connector, Endpoint, Listener, RetryPolicy};

fn endpoints(dir: &Path) -> (Endpoint, Endpoint) {
    (
        Endpoint::new(dir.join("producer.sock")),
        Endpoint::new(dir.join("consumer.sock")),
    )
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        initial: Duration::from_millis(1),
        max: Duration::from_millis(20),
        multiplier: 2,
    }
}

fn handle_with(contents: &[u8]) -> DmaBufHandle {
    let mut file = tempfile::tempfile().unwrap();
    file.write_all(contents).unwrap();
    DmaBufHandle::from(OwnedFd::from(file))
}

fn read_handle(handle: DmaBufHandle) -> Vec<u8> {
    let mut file = File::from(handle.into_owned_fd());
    file.seek(SeekFrom::Start(0)).unwrap();
    let mut out = Vec::new();
    file.read_to_end(&mut out).unwrap();
    out
}

fn metadata() -> BufferMetadata {
    BufferMetadata::new(FourCc::ABGR8888, 0, 64).unwrap()
}

#[test]
fn handle_and_metadata_arrive_together() {
    let dir = tempfile::tempdir().unwrap();
    let (producer_ep, consumer_ep) = endpoints(dir.path());
    let listener = Listener::bind(&consumer_ep).unwrap();

    let producer = thread::spawn(move || {
        let handle = handle_with(b"pixels");
        let conn = Connector::bind(&producer_ep)
            .unwrap()
            .connect_until(&consumer_ep, &fast_retry(), &CancelToken::new())
            .unwrap();
        conn.send_handle(&handle, &metadata()).unwrap();
        // Close our copy right away; the receiver holds its own duplicate.
        drop(handle);
    });

    let conn = listener.accept().unwrap();
    let (handle, md) = conn.receive_handle().unwrap();
    producer.join().unwrap();

    assert_eq!(md, metadata());
    assert_eq!(read_handle(handle), b"pixels");
}

#[test]
fn peer_hanging_up_before_sending_reports_channel_closed() {
    let dir = tempfile::tempdir().unwrap();
    let (producer_ep, consumer_ep) = endpoints(dir.path());
    let listener = Listener::bind(&consumer_ep).unwrap();

    let producer = thread::spawn(move || {
        let conn = Connector::bind(&producer_ep)
            .unwrap()
            .connect_until(&consumer_ep, &fast_retry(), &CancelToken::new())
            .unwrap();
        drop(conn);
    });

    let conn = listener.accept().unwrap();
    producer.join().unwrap();
    assert!(matches!(conn.receive_handle(), Err(ChannelError::ChannelClosed)));
}

#[test]
fn payload_without_descriptor_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (producer_ep, consumer_ep) = endpoints(dir.path());
    let listener = Listener::bind(&consumer_ep).unwrap();

    let producer = thread::spawn(move || {
        let conn = Connector::bind(&producer_ep)
            .unwrap()
            .connect_until(&consumer_ep, &fast_retry(), &CancelToken::new())
            .unwrap();
        let payload = metadata().encode();
        sendmsg::<()>(
            conn.as_raw_fd(),
            &[IoSlice::new(&payload)],
            &[],
            MsgFlags::empty(),
            None,
        )
        .unwrap();
        conn
    });

    let conn = listener.accept().unwrap();
    let result = conn.receive_handle();
    drop(producer.join().unwrap());
    assert!(matches!(result, Err(ChannelError::MissingHandle)));
}

#[test]
fn wrong_payload_size_is_rejected_and_descriptor_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let (producer_ep, consumer_ep) = endpoints(dir.path());
    let listener = Listener::bind(&consumer_ep).unwrap();

    let producer = thread::spawn(move || {
        let conn = Connector::bind(&producer_ep)
            .unwrap()
            .connect_until(&consumer_ep, &fast_retry(), &CancelToken::new())
            .unwrap();
        let handle = handle_with(b"x");
        let fds = [handle.as_raw_fd()];
        let short = [0u8; 8];
        sendmsg::<()>(
            conn.as_raw_fd(),
            &[IoSlice::new(&short)],
            &[ControlMessage::ScmRights(&fds)],
            MsgFlags::empty(),
            None,
        )
        .unwrap();
        conn
    });

    let conn = listener.accept().unwrap();
    let result = conn.receive_handle();
    drop(producer.join().unwrap());
    assert!(matches!(result, Err(ChannelError::MalformedPayload(_))));
}

#[test]
fn binding_a_taken_address_fails_until_removed() {
    let dir = tempfile::tempdir().unwrap();
    let (_, consumer_ep) = endpoints(dir.path());

    let first = Listener::bind(&consumer_ep).unwrap();
    assert!(matches!(
        Listener::bind(&consumer_ep),
        Err(ChannelError::AddressInUse(_))
    ));

    // Dropping the listener unlinks its socket file.
    drop(first);
    assert!(!consumer_ep.path().exists());
    drop(Listener::bind(&consumer_ep).unwrap());

    // A socket file left by a crashed run blocks bind until removed.
    drop(std::os::unix::net::UnixListener::bind(consumer_ep.path()).unwrap());
    assert!(matches!(
        Listener::bind(&consumer_ep),
        Err(ChannelError::AddressInUse(_))
    ));
    assert!(consumer_ep.remove_stale().unwrap());
    Listener::bind(&consumer_ep).unwrap();
}

#[test]
fn connect_converges_once_the_listener_appears() {
    let dir = tempfile::tempdir().unwrap();
    let (producer_ep, consumer_ep) = endpoints(dir.path());
    let late = Duration::from_millis(150);
    let policy = fast_retry();

    let consumer_ep2 = consumer_ep.clone();
    let consumer = thread::spawn(move || {
        thread::sleep(late);
        let listener = Listener::bind(&consumer_ep2).unwrap();
        let conn = listener.accept().unwrap();
        conn.receive_handle().unwrap().1
    });

    let start = Instant::now();
    let conn = Connector::bind(&producer_ep)
        .unwrap()
        .connect_until(&consumer_ep, &policy, &CancelToken::new())
        .unwrap();
    let elapsed = start.elapsed();
    conn.send_handle(&handle_with(b"late"), &metadata()).unwrap();

    assert_eq!(consumer.join().unwrap(), metadata());
    assert!(elapsed >= late);
    // Generous slack for slow CI machines on top of one retry interval.
    assert!(elapsed < late + policy.max + Duration::from_secs(2));
}

#[test]
fn retry_loop_keeps_going_until_cancelled() {
    let dir = tempfile::tempdir().unwrap();
    let (producer_ep, consumer_ep) = endpoints(dir.path());
    let cancel = CancelToken::new();

    let canceller = {
        let cancel = cancel.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            cancel.cancel();
        })
    };

    let start = Instant::now();
    let result = Connector::bind(&producer_ep)
        .unwrap()
        .connect_until(&consumer_ep, &fast_retry(), &cancel);
    canceller.join().unwrap();

    assert!(matches!(result, Err(ChannelError::Cancelled(_))));
    assert!(start.elapsed() >= Duration::from_millis(200));
    // The connector's socket file is cleaned up with it.
    assert!(!producer_ep.path().exists());
}
