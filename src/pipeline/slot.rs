//! Latest-wins single-frame exchange cell
//!
//! Not a queue: each publish replaces whatever frame the cell holds, and
//! readers peek without consuming, so any number of readers may observe the
//! same frame. The frame handle is swapped atomically, so readers never see
//! a partially written frame and never block the producer. The condition
//! variable is only used while the cell is empty (before the first frame) and
//! on close.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use crossbeam::utils::CachePadded;

use crate::Frame;

/// Outcome of [`LatestSlot::wait_latest`].
#[derive(Debug)]
pub enum SlotRead {
    Frame(Arc<Frame>),
    /// Still empty when the timeout expired.
    Empty,
    /// The slot was closed; no more frames will be served.
    Closed,
}

pub struct LatestSlot {
    cell: ArcSwapOption<Frame>,
    closed: AtomicBool,

    /// Guards nothing; pairs with `ready` for the empty -> full transition.
    gate: Mutex<()>,
    ready: Condvar,

    /// Statistics
    stats: CachePadded<Stats>,
}

#[derive(Default)]
struct Stats {
    published: AtomicUsize,
    replaced: AtomicUsize,
    reads: AtomicUsize,
}

impl Default for LatestSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl LatestSlot {
    pub fn new() -> Self {
        Self {
            cell: ArcSwapOption::empty(),
            closed: AtomicBool::new(false),
            gate: Mutex::new(()),
            ready: Condvar::new(),
            stats: CachePadded::new(Stats::default()),
        }
    }

    /// Producer: install `frame`, discarding the previous one.
    pub fn publish(&self, frame: Frame) {
        let previous = self.cell.swap(Some(Arc::new(frame)));
        self.stats.published.fetch_add(1, Ordering::Relaxed);

        match previous {
            Some(_) => {
                self.stats.replaced.fetch_add(1, Ordering::Relaxed);
            }
            None => {
                // Taking the gate orders this wake-up after any reader that
                // saw the cell empty has started waiting.
                let _gate = self.lock_gate();
                self.ready.notify_all();
            }
        }
    }

    /// Consumer: the current frame, without waiting.
    pub fn latest(&self) -> Option<Arc<Frame>> {
        if self.is_closed() {
            return None;
        }
        self.stats.reads.fetch_add(1, Ordering::Relaxed);
        self.cell.load_full()
    }

    /// Consumer: the current frame, waiting up to `timeout` while the slot is empty.
    pub fn wait_latest(&self, timeout: Duration) -> SlotRead {
        if let Some(read) = self.peek() {
            return read;
        }

        let deadline = Instant::now() + timeout;
        let mut gate = self.lock_gate();
        loop {
            if let Some(read) = self.peek() {
                return read;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return SlotRead::Empty;
            }

            gate = self
                .ready
                .wait_timeout(gate, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Stop serving frames and wake every waiting reader.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.cell.store(None);

        let _gate = self.lock_gate();
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// (published, replaced, reads)
    pub fn stats(&self) -> (usize, usize, usize) {
        (
            self.stats.published.load(Ordering::Relaxed),
            self.stats.replaced.load(Ordering::Relaxed),
            self.stats.reads.load(Ordering::Relaxed),
        )
    }

    fn peek(&self) -> Option<SlotRead> {
        // closed is checked first: a publish racing with close must not
        // resurrect the slot for readers
        if self.is_closed() {
            return Some(SlotRead::Closed);
        }
        let frame = self.cell.load_full()?;
        self.stats.reads.fetch_add(1, Ordering::Relaxed);
        Some(SlotRead::Frame(frame))
    }

    fn lock_gate(&self) -> MutexGuard<'_, ()> {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use image::RgbImage;

    use super::*;

    fn frame(sequence: u64) -> Frame {
        Frame::captured(RgbImage::new(2, 2), sequence)
    }

    fn sequence(read: SlotRead) -> u64 {
        match read {
            SlotRead::Frame(f) => f.sequence,
            other => panic!("expected a frame, got {:?}", other),
        }
    }

    #[test]
    fn empty_slot_times_out() {
        let slot = LatestSlot::new();
        let started = Instant::now();
        assert!(matches!(slot.wait_latest(Duration::from_millis(50)), SlotRead::Empty));
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn publish_replaces_previous_frame() {
        let slot = LatestSlot::new();
        slot.publish(frame(1));
        slot.publish(frame(2));
        slot.publish(frame(3));

        assert_eq!(sequence(slot.wait_latest(Duration::ZERO)), 3);
        let (published, replaced, _) = slot.stats();
        assert_eq!(published, 3);
        assert_eq!(replaced, 2);
    }

    #[test]
    fn reads_do_not_consume() {
        let slot = LatestSlot::new();
        slot.publish(frame(7));
        assert_eq!(sequence(slot.wait_latest(Duration::ZERO)), 7);
        assert_eq!(sequence(slot.wait_latest(Duration::ZERO)), 7);
        assert_eq!(slot.latest().map(|f| f.sequence), Some(7));
    }

    #[test]
    fn first_publish_wakes_waiting_reader() {
        let slot = Arc::new(LatestSlot::new());
        let reader = {
            let slot = Arc::clone(&slot);
            thread::spawn(move || {
                let started = Instant::now();
                let read = slot.wait_latest(Duration::from_secs(5));
                (sequence(read), started.elapsed())
            })
        };

        thread::sleep(Duration::from_millis(50));
        slot.publish(frame(1));

        let (seq, waited) = reader.join().unwrap();
        assert_eq!(seq, 1);
        assert!(waited < Duration::from_secs(5));
    }

    #[test]
    fn close_wakes_waiters_and_hides_frames() {
        let slot = Arc::new(LatestSlot::new());
        let reader = {
            let slot = Arc::clone(&slot);
            thread::spawn(move || slot.wait_latest(Duration::from_secs(5)))
        };

        thread::sleep(Duration::from_millis(50));
        slot.close();
        assert!(matches!(reader.join().unwrap(), SlotRead::Closed));

        // late publish from an in-flight producer iteration stays invisible
        slot.publish(frame(9));
        assert!(matches!(slot.wait_latest(Duration::ZERO), SlotRead::Closed));
        assert!(slot.latest().is_none());
    }
}
