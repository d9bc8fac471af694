//! Stream fan-out: many client cursors over one encoded stream.
//!
//! A [`Replicator`] sits on top of one camera's
//! [`DeliveryBridge`](crate::bridge::DeliveryBridge) and lets any number
//! of client sessions read the stream without the producer ever knowing
//! how many — N viewers never cause N encodes.
//!
//! Each attached [`ReplicaCursor`] gets a private bounded queue.
//! [`Replicator::pump`], called from the single-threaded delivery loop,
//! drains the bridge and broadcasts every unit into all open cursor
//! queues (a cheap `Arc` clone — the payload is shared, the read state
//! is not). Cursors therefore progress, overflow, and truncate fully
//! independently: a stalled viewer drops its own oldest units and never
//! slows anyone else down.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::bridge::{DeliveryBridge, EncodedUnit};

struct CursorQueue {
    pending: Mutex<VecDeque<EncodedUnit>>,
    dropped: AtomicU64,
}

/// Fan-out adapter for one camera's encoded stream.
pub struct Replicator {
    bridge: Arc<DeliveryBridge>,
    cursors: Mutex<HashMap<u64, Arc<CursorQueue>>>,
    next_cursor_id: AtomicU64,
    /// Bound on units pending per cursor before its oldest is evicted.
    queue_capacity: usize,
    /// Size of each cursor's delivery buffer; larger units are truncated.
    max_unit_size: usize,
}

impl Replicator {
    pub fn new(bridge: Arc<DeliveryBridge>, queue_capacity: usize, max_unit_size: usize) -> Self {
        Self {
            bridge,
            cursors: Mutex::new(HashMap::new()),
            next_cursor_id: AtomicU64::new(0),
            queue_capacity: queue_capacity.max(1),
            max_unit_size: max_unit_size.max(1),
        }
    }

    /// Open an independent read cursor. The cursor sees every unit
    /// published after this call, in publish order.
    pub fn attach(&self) -> ReplicaCursor {
        let id = self.next_cursor_id.fetch_add(1, Ordering::SeqCst);
        let queue = Arc::new(CursorQueue {
            pending: Mutex::new(VecDeque::new()),
            dropped: AtomicU64::new(0),
        });
        self.cursors.lock().insert(id, queue.clone());
        tracing::debug!(camera = %self.bridge.camera(), cursor = id, "cursor attached");
        ReplicaCursor {
            id,
            queue,
            delivery: Vec::new(),
            max_unit_size: self.max_unit_size,
            truncated_units: 0,
            truncated_bytes: 0,
        }
    }

    /// Close a cursor. Other open cursors and the underlying bridge are
    /// unaffected.
    pub fn detach(&self, cursor: ReplicaCursor) {
        self.cursors.lock().remove(&cursor.id);
        tracing::debug!(
            camera = %self.bridge.camera(),
            cursor = cursor.id,
            dropped = cursor.dropped_units(),
            truncated_bytes = cursor.truncated_bytes,
            "cursor detached"
        );
    }

    /// Drain the bridge, broadcasting each unit to every open cursor.
    /// Called from the delivery loop. Returns the number of units pumped.
    pub fn pump(&self) -> usize {
        let mut pumped = 0;
        while let Some(unit) = self.bridge.try_take() {
            let cursors = self.cursors.lock();
            for queue in cursors.values() {
                let mut pending = queue.pending.lock();
                pending.push_back(unit.clone());
                if pending.len() > self.queue_capacity {
                    pending.pop_front();
                    queue.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
            pumped += 1;
        }
        pumped
    }

    pub fn cursor_count(&self) -> usize {
        self.cursors.lock().len()
    }
}

/// One client session's private read position over a shared stream.
///
/// Holds its own pending queue, its own "currently delivering" buffer,
/// and its own drop/truncation counters. Cursors never share mutable
/// state with each other.
pub struct ReplicaCursor {
    id: u64,
    queue: Arc<CursorQueue>,
    delivery: Vec<u8>,
    max_unit_size: usize,
    truncated_units: u64,
    truncated_bytes: u64,
}

impl ReplicaCursor {
    /// Take the oldest pending unit, transferring ownership to the caller.
    pub fn take_next(&mut self) -> Option<EncodedUnit> {
        self.queue.pending.lock().pop_front()
    }

    /// Copy the oldest pending unit into this cursor's delivery buffer.
    ///
    /// A unit longer than the buffer capacity is truncated — a soft
    /// degradation recorded in the truncation counters, not an error.
    pub fn deliver_next(&mut self) -> Option<&[u8]> {
        let unit = self.take_next()?;
        let data = unit.data();
        let copied = data.len().min(self.max_unit_size);
        if copied < data.len() {
            let cut = (data.len() - copied) as u64;
            self.truncated_units += 1;
            self.truncated_bytes += cut;
            tracing::warn!(
                cursor = self.id,
                unit_len = data.len(),
                truncated = cut,
                "unit exceeds delivery buffer, truncated"
            );
        }
        self.delivery.clear();
        self.delivery.extend_from_slice(&data[..copied]);
        Some(&self.delivery)
    }

    pub fn pending(&self) -> usize {
        self.queue.pending.lock().len()
    }

    /// Units this cursor lost to its own backpressure bound.
    pub fn dropped_units(&self) -> u64 {
        self.queue.dropped.load(Ordering::Relaxed)
    }

    pub fn truncated_units(&self) -> u64 {
        self.truncated_units
    }

    pub fn truncated_bytes(&self) -> u64 {
        self.truncated_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::WakeSignal;

    fn replicator(queue_capacity: usize, max_unit_size: usize) -> Replicator {
        let bridge = DeliveryBridge::new("cam", 64, WakeSignal::new());
        Replicator::new(bridge, queue_capacity, max_unit_size)
    }

    fn publish_and_pump(r: &Replicator, payloads: &[&[u8]]) {
        for p in payloads {
            r.bridge.publish(p.to_vec());
        }
        r.pump();
    }

    #[test]
    fn each_cursor_sees_every_unit_in_order() {
        let r = replicator(16, 4096);
        let mut a = r.attach();
        let mut b = r.attach();

        publish_and_pump(&r, &[&[0], &[1], &[2]]);

        // Drive the cursors at different paces.
        assert_eq!(a.take_next().unwrap().data(), &[0]);
        assert_eq!(a.take_next().unwrap().data(), &[1]);
        assert_eq!(a.take_next().unwrap().data(), &[2]);
        assert!(a.take_next().is_none());

        assert_eq!(b.take_next().unwrap().data(), &[0]);
        assert_eq!(b.take_next().unwrap().data(), &[1]);
        assert_eq!(b.take_next().unwrap().data(), &[2]);
    }

    #[test]
    fn cursor_sees_only_units_after_attachment() {
        let r = replicator(16, 4096);
        let mut early = r.attach();
        publish_and_pump(&r, &[&[0]]);

        let mut late = r.attach();
        publish_and_pump(&r, &[&[1]]);

        assert_eq!(early.take_next().unwrap().data(), &[0]);
        assert_eq!(early.take_next().unwrap().data(), &[1]);
        assert_eq!(late.take_next().unwrap().data(), &[1]);
        assert!(late.take_next().is_none());
    }

    #[test]
    fn detach_leaves_other_cursor_untouched() {
        let r = replicator(16, 4096);
        let mut keep = r.attach();
        let gone = r.attach();

        publish_and_pump(&r, &[&[0], &[1]]);
        assert_eq!(keep.take_next().unwrap().data(), &[0]);

        r.detach(gone);
        assert_eq!(r.cursor_count(), 1);

        // The surviving cursor's next unit is unchanged.
        assert_eq!(keep.take_next().unwrap().data(), &[1]);

        publish_and_pump(&r, &[&[2]]);
        assert_eq!(keep.take_next().unwrap().data(), &[2]);
    }

    #[test]
    fn slow_cursor_drops_without_affecting_fast_one() {
        let r = replicator(2, 4096);
        let mut fast = r.attach();
        let mut slow = r.attach();

        for i in 0..3u8 {
            publish_and_pump(&r, &[&[i]]);
            // Fast cursor drains every round; slow never does.
            assert_eq!(fast.take_next().unwrap().data(), &[i]);
        }

        assert_eq!(fast.dropped_units(), 0);
        assert_eq!(slow.dropped_units(), 1);
        // Slow cursor kept the most recent two.
        assert_eq!(slow.take_next().unwrap().data(), &[1]);
        assert_eq!(slow.take_next().unwrap().data(), &[2]);
    }

    #[test]
    fn oversized_unit_is_truncated_and_counted() {
        let r = replicator(16, 4);
        let mut cursor = r.attach();

        publish_and_pump(&r, &[&[1, 2, 3, 4, 5, 6, 7]]);

        let delivered = cursor.deliver_next().unwrap();
        assert_eq!(delivered, &[1, 2, 3, 4]);
        assert_eq!(cursor.truncated_units(), 1);
        assert_eq!(cursor.truncated_bytes(), 3);

        // In-bounds units pass through unchanged.
        publish_and_pump(&r, &[&[8, 9]]);
        assert_eq!(cursor.deliver_next().unwrap(), &[8, 9]);
        assert_eq!(cursor.truncated_units(), 1);
    }

    #[test]
    fn pump_with_no_cursors_discards_quietly() {
        let r = replicator(16, 4096);
        publish_and_pump(&r, &[&[0], &[1]]);
        let mut cursor = r.attach();
        assert!(cursor.take_next().is_none());
    }
}
