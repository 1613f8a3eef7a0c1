//! End-to-end scenarios for the barrier-free engine (S2-S5) plus the
//! quantified invariants that apply to it.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use exstack::transport::ThreadTransport;
use exstack::ExStack2;

fn run<F>(peers: usize, capacity: usize, item_size: usize, body: F)
where
    F: Fn(ExStack2<ThreadTransport>) + Send + Sync + Clone + 'static,
{
    let transports = ThreadTransport::new_vector(peers);
    let handles: Vec<_> = transports
        .into_iter()
        .map(|t| {
            let body = body.clone();
            thread::spawn(move || {
                let session = ExStack2::init(t, capacity, item_size).expect("matching init params");
                body(session);
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("peer thread panicked");
    }
}

#[test]
fn s2_four_peers_round_robin_conservation() {
    const PEERS: usize = 4;
    const PER_PEER: usize = 10;
    let popped: Arc<Mutex<Vec<(usize, usize)>>> = Arc::new(Mutex::new(Vec::new()));
    let transports = ThreadTransport::new_vector(PEERS);
    let handles: Vec<_> = transports
        .into_iter()
        .map(|t| {
            let popped = Arc::clone(&popped);
            thread::spawn(move || {
                let mut s = ExStack2::init(t, 2, 8).unwrap();
                for i in 0..PER_PEER {
                    let dest = i % PEERS;
                    let v = (s.index() as u64) << 32 | i as u64;
                    assert!(s.push(&v.to_le_bytes(), dest));
                    let mut buf = [0u8; 8];
                    while let Some(src) = s.pop(&mut buf) {
                        popped.lock().unwrap().push((src, s.index()));
                    }
                }
                loop {
                    let mut buf = [0u8; 8];
                    while let Some(src) = s.pop(&mut buf) {
                        popped.lock().unwrap().push((src, s.index()));
                    }
                    if !s.proceed(true) {
                        break;
                    }
                    thread::yield_now();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    let popped = popped.lock().unwrap();
    assert_eq!(popped.len(), PEERS * PER_PEER, "every pushed item is popped exactly once");
    for d in 0..PEERS {
        let count = popped.iter().filter(|&&(_, dest)| dest == d).count();
        assert_eq!(count, PER_PEER, "peer {d} receives exactly PER_PEER items across all sources");
    }
}

#[test]
fn s3_skew_sender_blocks_on_can_send_no_loss_no_overrun() {
    const ITEMS: u64 = 1000;
    let received = Arc::new(Mutex::new(Vec::new()));
    let transports = ThreadTransport::new_vector(2);
    let mut iter = transports.into_iter();
    let t0 = iter.next().unwrap();
    let t1 = iter.next().unwrap();

    let sender = thread::spawn(move || {
        let mut s = ExStack2::init(t0, 4, 8).unwrap();
        for v in 0..ITEMS {
            assert!(s.push(&v.to_le_bytes(), 1));
        }
        while s.proceed(true) {
            thread::yield_now();
        }
    });

    let received_clone = Arc::clone(&received);
    let receiver = thread::spawn(move || {
        let mut s = ExStack2::init(t1, 4, 8).unwrap();
        let mut buf = [0u8; 8];
        while (received_clone.lock().unwrap().len() as u64) < ITEMS {
            if let Some(src) = s.pop(&mut buf) {
                assert_eq!(src, 0);
                received_clone.lock().unwrap().push(u64::from_le_bytes(buf));
                thread::sleep(Duration::from_micros(1));
            } else {
                s.proceed(false);
                thread::yield_now();
            }
        }
        while s.proceed(true) {
            thread::yield_now();
        }
    });

    sender.join().unwrap();
    receiver.join().unwrap();

    let received = received.lock().unwrap();
    assert_eq!(received.len() as u64, ITEMS, "no items lost despite severe pop skew");
    assert_eq!(*received, (0..ITEMS).collect::<Vec<_>>(), "order within the (0,1) pair is preserved");
}

#[test]
fn s4_late_join_done_session_stays_active_until_every_peer_declares() {
    const PEERS: usize = 3;
    let transports = ThreadTransport::new_vector(PEERS);
    let handles: Vec<_> = transports
        .into_iter()
        .map(|t| {
            thread::spawn(move || {
                let mut s = ExStack2::init(t, 4, 8).unwrap();
                for d in 0..PEERS {
                    assert!(s.push(&(s.index() as u64).to_le_bytes(), d));
                }
                let declare_done_after = s.index(); // peer 0 declares immediately, others stagger
                let mut rounds = 0;
                loop {
                    let mut buf = [0u8; 8];
                    while s.pop(&mut buf).is_some() {}
                    let done = rounds >= declare_done_after;
                    if !s.proceed(done) {
                        break;
                    }
                    rounds += 1;
                    thread::yield_now();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().expect("no peer should deadlock or panic during staggered completion");
    }
}

#[test]
fn s5_push_to_self_single_peer_in_order() {
    run(1, 8, 8, |mut s| {
        let mut out = Vec::new();
        let mut buf = [0u8; 8];
        for v in 0u64..100 {
            assert!(s.push(&v.to_le_bytes(), 0));
            while let Some(_) = s.pop(&mut buf) {
                out.push(u64::from_le_bytes(buf));
            }
        }
        while s.proceed(true) {
            while let Some(_) = s.pop(&mut buf) {
                out.push(u64::from_le_bytes(buf));
            }
        }
        assert_eq!(out, (0u64..100).collect::<Vec<_>>());
    });
}

#[test]
fn boundary_capacity_one_every_push_auto_sends() {
    run(2, 1, 8, |mut s| {
        if s.index() == 0 {
            for v in 0u64..4 {
                assert!(s.push(&v.to_le_bytes(), 1));
            }
        }
        let mut out = Vec::new();
        let mut buf = [0u8; 8];
        loop {
            if s.index() == 1 {
                while let Some(_) = s.pop(&mut buf) {
                    out.push(u64::from_le_bytes(buf));
                }
            }
            if !s.proceed(true) {
                break;
            }
            thread::yield_now();
        }
        if s.index() == 1 {
            assert_eq!(out, vec![0, 1, 2, 3]);
        }
    });
}

#[test]
fn invariant_idempotent_proceed_after_done() {
    run(2, 2, 4, |mut s| {
        while s.proceed(true) {
            thread::yield_now();
        }
        assert!(!s.proceed(true), "proceed keeps returning false once DONE");
        assert!(!s.proceed(true));
    });
}
