//! Thread-to-event-loop hand-off for encoded units.
//!
//! Each camera's capture thread publishes into a [`DeliveryBridge`]; the
//! single-threaded delivery loop drains it. The bridge is the only state
//! shared between the two execution domains, guarded by a short critical
//! section around publish/take. An edge-triggered [`WakeSignal`] tells
//! the loop that a bridge went from empty to non-empty, so it never has
//! to busy-poll idle cameras.
//!
//! Backpressure: the queue is bounded. When the loop falls behind, the
//! **oldest** pending unit is evicted — live viewers want recency, and
//! dropping the newest would freeze them on stale frames. Every eviction
//! is counted and observable.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// One self-contained encoded access unit, free of start-code framing,
/// with the sequence position assigned at publish.
///
/// The payload is shared (`Arc`), so replicating a unit to many client
/// cursors never copies the bytes.
#[derive(Debug, Clone)]
pub struct EncodedUnit {
    seq: u64,
    data: Arc<[u8]>,
}

impl EncodedUnit {
    fn new(seq: u64, data: Vec<u8>) -> Self {
        Self {
            seq,
            data: data.into(),
        }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Edge-triggered cross-thread wake-up.
///
/// `notify` arms the signal and wakes a waiter only on the unarmed →
/// armed transition; repeated notifies while armed are no-ops. `notify`
/// may briefly take a lock and is safe from any thread, but NOT from a
/// signal handler — the shutdown flag has its own lock-free path.
pub struct WakeSignal {
    armed: AtomicBool,
    lock: Mutex<()>,
    cond: Condvar,
}

impl WakeSignal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            armed: AtomicBool::new(false),
            lock: Mutex::new(()),
            cond: Condvar::new(),
        })
    }

    pub fn notify(&self) {
        if !self.armed.swap(true, Ordering::AcqRel) {
            // Taking the lock orders this notify against a waiter that is
            // between its armed check and its wait.
            let _guard = self.lock.lock();
            self.cond.notify_one();
        }
    }

    /// Wait until notified or until `timeout` elapses, consuming the armed
    /// state. Returns true if the signal was armed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.armed.swap(false, Ordering::AcqRel) {
            return true;
        }
        let mut guard = self.lock.lock();
        if self.armed.swap(false, Ordering::AcqRel) {
            return true;
        }
        self.cond.wait_for(&mut guard, timeout);
        self.armed.swap(false, Ordering::AcqRel)
    }
}

struct PendingUnits {
    units: VecDeque<EncodedUnit>,
    next_seq: u64,
}

/// Bounded FIFO hand-off between one capture thread and the delivery loop.
pub struct DeliveryBridge {
    camera: String,
    pending: Mutex<PendingUnits>,
    capacity: usize,
    dropped: AtomicU64,
    wake: Arc<WakeSignal>,
}

impl DeliveryBridge {
    pub fn new(camera: &str, capacity: usize, wake: Arc<WakeSignal>) -> Arc<Self> {
        Arc::new(Self {
            camera: camera.to_string(),
            pending: Mutex::new(PendingUnits {
                units: VecDeque::new(),
                next_seq: 0,
            }),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
            wake,
        })
    }

    /// Append a freshly encoded unit. Called from the capture thread.
    ///
    /// Past the capacity cap the oldest pending unit is evicted (the unit
    /// just published is never the one dropped). Wakes the consumer once
    /// per empty → non-empty transition.
    pub fn publish(&self, data: Vec<u8>) {
        let was_empty;
        {
            let mut pending = self.pending.lock();
            let unit = EncodedUnit::new(pending.next_seq, data);
            pending.next_seq += 1;
            was_empty = pending.units.is_empty();
            pending.units.push_back(unit);
            if pending.units.len() > self.capacity {
                pending.units.pop_front();
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::debug!(
                    camera = %self.camera,
                    dropped,
                    "delivery queue full, evicted oldest unit"
                );
            }
        }
        if was_empty {
            self.wake.notify();
        }
    }

    /// Remove and return the oldest pending unit, if any. Called from the
    /// delivery loop.
    pub fn try_take(&self) -> Option<EncodedUnit> {
        self.pending.lock().units.pop_front()
    }

    pub fn pending(&self) -> usize {
        self.pending.lock().units.len()
    }

    /// Units evicted by the backpressure policy since creation.
    pub fn dropped_units(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn camera(&self) -> &str {
        &self.camera
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bridge(capacity: usize) -> Arc<DeliveryBridge> {
        DeliveryBridge::new("cam", capacity, WakeSignal::new())
    }

    #[test]
    fn strict_fifo_order() {
        let b = bridge(8);
        for i in 0..5u8 {
            b.publish(vec![i]);
        }
        for i in 0..5u8 {
            let unit = b.try_take().expect("unit");
            assert_eq!(unit.data(), &[i]);
            assert_eq!(unit.seq(), i as u64);
        }
        assert!(b.try_take().is_none());
    }

    #[test]
    fn overflow_evicts_oldest_and_counts() {
        let b = bridge(3);
        for i in 0..7u8 {
            b.publish(vec![i]);
        }
        assert_eq!(b.dropped_units(), 4);
        assert_eq!(b.pending(), 3);
        // Oldest survivors are 4, 5, 6 — the most recent publish is never
        // the victim.
        assert_eq!(b.try_take().unwrap().data(), &[4]);
        assert_eq!(b.try_take().unwrap().data(), &[5]);
        assert_eq!(b.try_take().unwrap().data(), &[6]);
    }

    #[test]
    fn sequence_survives_eviction() {
        let b = bridge(2);
        for i in 0..4u8 {
            b.publish(vec![i]);
        }
        assert_eq!(b.try_take().unwrap().seq(), 2);
        assert_eq!(b.try_take().unwrap().seq(), 3);
    }

    #[test]
    fn wake_fires_once_per_transition() {
        let wake = WakeSignal::new();
        let b = DeliveryBridge::new("cam", 8, wake.clone());

        b.publish(vec![1]);
        b.publish(vec![2]); // no new transition: still non-empty
        assert!(wake.wait_timeout(Duration::from_millis(10)));
        assert!(!wake.wait_timeout(Duration::from_millis(10)));

        // Drain, then a new publish is a new transition.
        while b.try_take().is_some() {}
        b.publish(vec![3]);
        assert!(wake.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn wake_crosses_threads() {
        let wake = WakeSignal::new();
        let b = DeliveryBridge::new("cam", 8, wake.clone());
        let producer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            b.publish(vec![9]);
        });
        assert!(wake.wait_timeout(Duration::from_secs(2)));
        producer.join().unwrap();
    }

    #[test]
    fn publishes_before_drain_are_not_lost() {
        let b = bridge(8);
        b.publish(vec![0]);
        b.publish(vec![1]);
        b.publish(vec![2]);
        let mut seen = Vec::new();
        while let Some(unit) = b.try_take() {
            seen.push(unit.data()[0]);
        }
        assert_eq!(seen, vec![0, 1, 2]);
    }
}
