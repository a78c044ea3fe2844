#![allow(dead_code)]

use bcp::error::Result;
use bcp::{Error, OpenStatus, Session, SessionConfig, SessionInterface, StdPort, ThreadConfig};
use crossbeam_channel::{Receiver, Sender, unbounded};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Deterministic fake link: emitted slices and delivered messages land on
/// channels the test drains and ferries by hand.
pub struct ChannelLink {
    wire: Sender<Vec<u8>>,
    delivered: Sender<Vec<u8>>,
}

impl SessionInterface for ChannelLink {
    fn output(&self, data: &[u8]) -> Result<()> {
        self.wire.send(data.to_vec()).map_err(|_| Error::OutputFailed)
    }

    fn data_listener(&self, data: &[u8]) {
        let _ = self.delivered.send(data.to_vec());
    }
}

pub struct Endpoint {
    pub session: Session,
    /// Slices this endpoint pushed to the link.
    pub wire_rx: Receiver<Vec<u8>>,
    /// Messages delivered to the application.
    pub delivered_rx: Receiver<Vec<u8>>,
}

pub fn config(mtu: u16, mfs_scale: u8, mal: u32) -> SessionConfig {
    SessionConfig { mfs_scale, mtu, mal, thread: ThreadConfig::default() }
}

pub fn endpoint(config: SessionConfig) -> Endpoint {
    let (wire_tx, wire_rx) = unbounded();
    let (delivered_tx, delivered_rx) = unbounded();
    let link = Arc::new(ChannelLink { wire: wire_tx, delivered: delivered_tx });
    let session =
        Session::create(config, link, Arc::new(StdPort::new())).expect("session create");
    Endpoint { session, wire_rx, delivered_rx }
}

/// Feeds one slice, waiting out transient pool or queue pressure.
pub fn feed(target: &Session, slice: &[u8]) {
    for _ in 0..500 {
        match target.input(slice) {
            Ok(()) => return,
            Err(Error::PoolExhausted | Error::QueueFull) => {
                std::thread::sleep(Duration::from_millis(1));
            }
            Err(err) => panic!("input failed: {err}"),
        }
    }
    panic!("input kept failing under backpressure");
}

/// Ferries slices both ways until the wire stays quiet.
pub fn shuttle(a: &Endpoint, b: &Endpoint) {
    let mut idle = 0;
    while idle < 5 {
        let mut moved = false;
        while let Ok(slice) = a.wire_rx.try_recv() {
            feed(&b.session, &slice);
            moved = true;
        }
        while let Ok(slice) = b.wire_rx.try_recv() {
            feed(&a.session, &slice);
            moved = true;
        }
        if moved {
            idle = 0;
        } else {
            idle += 1;
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}

/// Opens `a` toward `b` and ferries the handshake to completion.
pub fn establish(a: &Endpoint, b: &Endpoint) {
    let (opened_tx, opened_rx) = unbounded();
    a.session
        .open(1_000, move |status| {
            let _ = opened_tx.send(status);
        })
        .expect("open");
    shuttle(a, b);
    let status = opened_rx
        .recv_timeout(Duration::from_secs(2))
        .expect("opened callback");
    assert_eq!(status, OpenStatus::Ok);
}

/// Sends, riding out pool pressure by ferrying outstanding acknowledgements.
pub fn send_with_retry(from: &Endpoint, to: &Endpoint, message: &[u8]) {
    for _ in 0..500 {
        match from.session.send(message) {
            Ok(()) => return,
            Err(Error::PoolExhausted | Error::QueueFull) => shuttle(from, to),
            Err(err) => panic!("send failed: {err}"),
        }
    }
    panic!("send kept failing under backpressure");
}

/// Drains every slice the endpoint emits until the wire goes quiet.
pub fn drain_wire(endpoint: &Endpoint) -> Vec<Vec<u8>> {
    let mut slices = Vec::new();
    while let Ok(slice) = endpoint.wire_rx.recv_timeout(Duration::from_millis(100)) {
        slices.push(slice);
    }
    slices
}

/// Ferries until `to` delivers one message, returning it. Faster than
/// [`shuttle`] for lockstep request/response loops.
pub fn pump_until_delivered(from: &Endpoint, to: &Endpoint) -> Vec<u8> {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let mut moved = false;
        while let Ok(slice) = from.wire_rx.try_recv() {
            feed(&to.session, &slice);
            moved = true;
        }
        while let Ok(slice) = to.wire_rx.try_recv() {
            feed(&from.session, &slice);
            moved = true;
        }
        if let Ok(message) = to.delivered_rx.try_recv() {
            return message;
        }
        if Instant::now() > deadline {
            panic!("no delivery before deadline");
        }
        if !moved {
            std::thread::sleep(Duration::from_micros(200));
        }
    }
}
