mod common;

use bcp::frame::{self, FrameHeader, FrameKind, Fsn};
use bcp::error::Result;
use bcp::{Error, OpenStatus, Port, Session, SessionInterface, Status, StdPort};
use crossbeam_channel::unbounded;
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_open_establishes_both_sides() {
    let a = common::endpoint(common::config(20, 2, 200));
    let b = common::endpoint(common::config(20, 2, 200));
    common::establish(&a, &b);

    assert_eq!(a.session.status(), Status::Done);
    assert_eq!(b.session.status(), Status::Done);
}

#[test]
fn test_either_side_may_send_after_one_open() {
    let a = common::endpoint(common::config(20, 2, 200));
    let b = common::endpoint(common::config(20, 2, 200));
    common::establish(&a, &b);

    // The passive side talks back without ever having called open.
    b.session.send(b"from the responder").expect("responder send");
    common::shuttle(&a, &b);
    let delivered = a
        .delivered_rx
        .recv_timeout(Duration::from_secs(2))
        .expect("responder message");
    assert_eq!(delivered, b"from the responder");
}

#[test]
fn test_open_requires_stopped_session() {
    let a = common::endpoint(common::config(20, 2, 200));
    let b = common::endpoint(common::config(20, 2, 200));
    common::establish(&a, &b);

    assert_eq!(a.session.open(100, |_| {}).unwrap_err(), Error::AlreadyOpen);
}

#[test]
fn test_send_requires_established_session() {
    let a = common::endpoint(common::config(20, 2, 200));
    assert_eq!(a.session.send(b"too early").unwrap_err(), Error::NotEstablished);
}

#[test]
fn test_stopped_session_refuses_data_but_accepts_sync_req() {
    let port = StdPort::new();
    let b = common::endpoint(common::config(20, 2, 200));

    // Data slices bounce while stopped.
    let data = [0u8; 12];
    assert_eq!(b.session.input(&data).unwrap_err(), Error::Stopped);

    // A handshake request goes through and establishes the session.
    let sync_req = frame::encode_sync_req(Fsn(9), 40, &port);
    b.session.input(&sync_req).expect("sync req while stopped");

    let responses = common::drain_wire(&b);
    assert_eq!(responses.len(), 1);
    let header = FrameHeader::parse(&responses[0]).expect("sync ack header");
    assert_eq!(header.kind, FrameKind::SyncAck);
    assert_eq!(header.fsn, Fsn(9), "sync ack echoes the request fsn");
    assert_eq!(b.session.status(), Status::Done);
}

#[test]
fn test_negotiated_peer_mfs_bounds_the_receiver() {
    let port = StdPort::new();
    let b = common::endpoint(common::config(20, 2, 200));

    // Handshake advertising a peer MFS of 40; rcv_next becomes 10.
    let sync_req = frame::encode_sync_req(Fsn(9), 40, &port);
    b.session.input(&sync_req).expect("sync req");
    common::drain_wire(&b);

    // An honest 40-byte frame is fine.
    let mut ok_frame = vec![0u8; 40];
    FrameHeader { kind: FrameKind::DataComplete, fsn: Fsn(10), payload_len: 32 }
        .write(&mut ok_frame);
    frame::seal(&mut ok_frame, &port);
    for slice in ok_frame.chunks(20) {
        common::feed(&b.session, slice);
    }
    let delivered = b.delivered_rx.recv_timeout(Duration::from_secs(2)).expect("delivery");
    assert_eq!(delivered.len(), 32);
    let control = common::drain_wire(&b);
    assert!(
        control
            .iter()
            .filter_map(|s| FrameHeader::parse(s))
            .any(|h| h.kind == FrameKind::Ack)
    );

    // A frame claiming more than the advertised MFS is refused with a NACK
    // before it can touch the 40-byte buffer.
    let mut oversize = vec![0u8; 68];
    FrameHeader { kind: FrameKind::DataComplete, fsn: Fsn(11), payload_len: 60 }
        .write(&mut oversize);
    frame::seal(&mut oversize, &port);
    common::feed(&b.session, &oversize[..20]);

    let control = common::drain_wire(&b);
    let nack = control
        .iter()
        .filter_map(|s| FrameHeader::parse(s))
        .find(|h| h.kind == FrameKind::Nack)
        .expect("nack for oversize frame");
    assert_eq!(nack.payload_len, 1);
}

#[test]
fn test_open_times_out_exactly_once() {
    let a = common::endpoint(common::config(20, 2, 200));
    let (opened_tx, opened_rx) = unbounded();
    a.session
        .open(200, move |status| {
            let _ = opened_tx.send(status);
        })
        .expect("open");

    // The SYNC_REQ goes out but nobody answers.
    let slices = common::drain_wire(&a);
    assert!(!slices.is_empty());

    let status = opened_rx.recv_timeout(Duration::from_secs(2)).expect("timeout callback");
    assert_eq!(status, OpenStatus::RspTimeout);
    assert_eq!(a.session.status(), Status::Handshake);

    // Exactly once: nothing else arrives.
    assert!(opened_rx.recv_timeout(Duration::from_millis(400)).is_err());

    // A handshake in progress cannot be reopened.
    assert_eq!(a.session.open(100, |_| {}).unwrap_err(), Error::AlreadyOpen);
}

struct DeadLink;

impl SessionInterface for DeadLink {
    fn output(&self, _data: &[u8]) -> Result<()> {
        Err(Error::OutputFailed)
    }

    fn data_listener(&self, _data: &[u8]) {}
}

#[test]
fn test_open_reports_send_failure() {
    let session = Session::create(
        common::config(20, 2, 200),
        Arc::new(DeadLink),
        Arc::new(StdPort::new()),
    )
    .expect("create");

    let (opened_tx, opened_rx) = unbounded();
    session
        .open(1_000, move |status| {
            let _ = opened_tx.send(status);
        })
        .expect("open");

    let status = opened_rx.recv_timeout(Duration::from_secs(2)).expect("callback");
    assert_eq!(status, OpenStatus::SendFail);
    assert_eq!(session.status(), Status::Stop);
}

#[test]
fn test_create_validates_configuration() {
    let iface: Arc<dyn SessionInterface> = Arc::new(DeadLink);
    let port: Arc<dyn Port> = Arc::new(StdPort::new());

    let bad_scale = common::config(20, 0, 200);
    assert!(matches!(
        Session::create(bad_scale, Arc::clone(&iface), Arc::clone(&port)),
        Err(Error::Config(_))
    ));

    let bad_mtu = common::config(0, 2, 200);
    assert!(matches!(
        Session::create(bad_mtu, Arc::clone(&iface), Arc::clone(&port)),
        Err(Error::Config(_))
    ));

    let mal_too_small = common::config(20, 2, 30);
    assert!(matches!(
        Session::create(mal_too_small, Arc::clone(&iface), Arc::clone(&port)),
        Err(Error::Config(_))
    ));

    let frame_too_small = common::config(4, 2, 64);
    assert!(matches!(
        Session::create(frame_too_small, Arc::clone(&iface), Arc::clone(&port)),
        Err(Error::Config(_))
    ));
}
