use bcp::event::{BoundedQueue, Event, EventQueue, Recv};
use bcp::pool::BlockPool;
use std::time::{Duration, Instant};

fn slice_event(pool: &BlockPool, marker: u8) -> Event {
    let mut block = pool.acquire().expect("block");
    block.write(&[marker]);
    Event::Slice(block)
}

fn slice_marker(recv: Recv) -> u8 {
    match recv {
        Recv::Event(Event::Slice(block)) => block[0],
        other => panic!("expected a slice event, got {other:?}"),
    }
}

#[test]
fn test_normal_events_are_fifo() {
    let pool = BlockPool::new(4, 8);
    let queue = BoundedQueue::new(8);
    for marker in 0..4 {
        queue.send(slice_event(&pool, marker), Some(Duration::ZERO)).expect("send");
    }
    for marker in 0..4 {
        assert_eq!(slice_marker(queue.recv(Some(Duration::ZERO))), marker);
    }
}

#[test]
fn test_priority_events_jump_the_queue() {
    let pool = BlockPool::new(4, 8);
    let queue = BoundedQueue::new(8);
    queue.send(slice_event(&pool, 1), Some(Duration::ZERO)).expect("send");
    queue.send(slice_event(&pool, 2), Some(Duration::ZERO)).expect("send");
    queue.send_prior(Event::SyncTimeout, Some(Duration::ZERO)).expect("send prior");

    assert!(matches!(queue.recv(Some(Duration::ZERO)), Recv::Event(Event::SyncTimeout)));
    assert_eq!(slice_marker(queue.recv(Some(Duration::ZERO))), 1);
    assert_eq!(slice_marker(queue.recv(Some(Duration::ZERO))), 2);
}

#[test]
fn test_priority_events_are_lifo_among_themselves() {
    let queue = BoundedQueue::new(8);
    queue.send_prior(Event::SyncTimeout, Some(Duration::ZERO)).expect("send prior");
    queue.send_prior(Event::Exit, Some(Duration::ZERO)).expect("send prior");

    assert!(matches!(queue.recv(Some(Duration::ZERO)), Recv::Event(Event::Exit)));
    assert!(matches!(queue.recv(Some(Duration::ZERO)), Recv::Event(Event::SyncTimeout)));
}

#[test]
fn test_nonblocking_send_fails_when_full() {
    let queue = BoundedQueue::new(2);
    queue.send(Event::Open, Some(Duration::ZERO)).expect("send");
    queue.send(Event::Open, Some(Duration::ZERO)).expect("send");
    assert!(queue.send(Event::Open, Some(Duration::ZERO)).is_err());
    assert!(queue.send_prior(Event::Exit, Some(Duration::ZERO)).is_err());
}

#[test]
fn test_recv_timeout_expires() {
    let queue = BoundedQueue::new(2);
    let start = Instant::now();
    assert!(matches!(queue.recv(Some(Duration::from_millis(30))), Recv::TimedOut));
    assert!(start.elapsed() >= Duration::from_millis(25));
}

#[test]
fn test_close_drains_backlog_then_reports_closed() {
    let queue = BoundedQueue::new(4);
    queue.send(Event::Open, Some(Duration::ZERO)).expect("send");
    queue.close();

    assert!(queue.send(Event::Open, Some(Duration::ZERO)).is_err());
    assert!(matches!(queue.recv(Some(Duration::ZERO)), Recv::Event(Event::Open)));
    assert!(matches!(queue.recv(Some(Duration::ZERO)), Recv::Closed));
}

#[test]
fn test_close_wakes_a_blocked_receiver() {
    let queue = std::sync::Arc::new(BoundedQueue::new(2));
    let receiver = {
        let queue = std::sync::Arc::clone(&queue);
        std::thread::spawn(move || matches!(queue.recv(None), Recv::Closed))
    };
    std::thread::sleep(Duration::from_millis(20));
    queue.close();
    assert!(receiver.join().expect("receiver thread"));
}

#[test]
fn test_blocking_send_waits_for_capacity() {
    let queue = std::sync::Arc::new(BoundedQueue::new(1));
    queue.send(Event::Open, Some(Duration::ZERO)).expect("send");

    let sender = {
        let queue = std::sync::Arc::clone(&queue);
        std::thread::spawn(move || queue.send(Event::SyncTimeout, None).is_ok())
    };
    std::thread::sleep(Duration::from_millis(20));
    assert!(matches!(queue.recv(Some(Duration::ZERO)), Recv::Event(Event::Open)));
    assert!(sender.join().expect("sender thread"));
    assert!(matches!(queue.recv(Some(Duration::ZERO)), Recv::Event(Event::SyncTimeout)));
}
