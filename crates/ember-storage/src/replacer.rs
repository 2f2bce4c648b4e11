//! LRU-K page replacement.
//!
//! Approximates the backward K-distance policy with a two-queue refinement:
//! frames with fewer than K recorded accesses are "young" (their K-distance
//! is infinite) and are evicted first, in LRU-1 order among themselves;
//! frames with at least K accesses are "old" and are evicted in LRU order
//! thereafter. Under-sampled pages are treated as colder than well-observed
//! ones, which keeps one-off scans from flushing the working set.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use ember_common::prelude::*;

/// How an access was generated. Carried on `record_access` for future
/// policy refinements; the current policy treats all kinds alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessType {
    #[default]
    Unknown,
    Lookup,
    Scan,
    Index,
}

/// FIFO of frame ids with in-place promotion.
///
/// Front is the longest-waiting eviction candidate, back is the most
/// recently accessed. Operations scan linearly; queues never exceed the
/// pool size, so this stays cheap at realistic pool sizes.
#[derive(Debug, Default)]
struct LruQueue {
    entries: VecDeque<FrameId>,
}

impl LruQueue {
    fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    /// Removes and returns the frame that has waited longest.
    fn victim(&mut self) -> Option<FrameId> {
        self.entries.pop_front()
    }

    /// Removes `frame_id` from the queue if present.
    fn pin(&mut self, frame_id: FrameId) {
        if let Some(pos) = self.entries.iter().position(|&f| f == frame_id) {
            self.entries.remove(pos);
        }
    }

    /// Appends `frame_id` unless it is already queued.
    fn unpin(&mut self, frame_id: FrameId) {
        if !self.entries.contains(&frame_id) {
            self.entries.push_back(frame_id);
        }
    }

    /// Moves `frame_id` to the back (most recent) if present.
    fn access(&mut self, frame_id: FrameId) {
        if let Some(pos) = self.entries.iter().position(|&f| f == frame_id) {
            self.entries.remove(pos);
            self.entries.push_back(frame_id);
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Per-frame bookkeeping for the LRU-K policy.
#[derive(Debug)]
struct LruKNode {
    /// Last K access timestamps, oldest first.
    history: VecDeque<u64>,
    /// Maximum history size (K).
    k: usize,
    is_evictable: bool,
}

impl LruKNode {
    fn new(k: usize) -> Self {
        Self {
            history: VecDeque::with_capacity(k),
            k,
            is_evictable: false,
        }
    }

    /// Records an access timestamp, keeping only the K most recent.
    fn add_history(&mut self, timestamp: u64) {
        if self.history.len() == self.k {
            self.history.pop_front();
        }
        self.history.push_back(timestamp);
    }

    /// A frame belongs to the old bucket once K accesses are on record.
    fn is_old(&self) -> bool {
        self.history.len() >= self.k
    }
}

/// Thread-safe LRU-K replacer over buffer pool frames.
///
/// All state sits behind a single mutex, so the replacer is safe to share.
/// Inside the buffer pool this mutex is always taken while the pool latch is
/// held, never the other way around.
pub struct LruKReplacer {
    inner: Mutex<ReplacerInner>,
}

struct ReplacerInner {
    /// A frame is tracked iff it has a node here.
    nodes: HashMap<FrameId, LruKNode>,
    /// Frames with fewer than K recorded accesses.
    young: LruQueue,
    /// Frames with at least K recorded accesses.
    old: LruQueue,
    num_frames: usize,
    k: usize,
    current_timestamp: u64,
    /// Count of evictable frames; always equals `young.len() + old.len()`.
    evictable: usize,
}

impl LruKReplacer {
    /// Creates a replacer covering `num_frames` frames with the given K.
    pub fn new(num_frames: usize, k: usize) -> Self {
        Self {
            inner: Mutex::new(ReplacerInner {
                nodes: HashMap::with_capacity(num_frames),
                young: LruQueue::new(),
                old: LruQueue::new(),
                num_frames,
                k: k.max(1),
                current_timestamp: 0,
                evictable: 0,
            }),
        }
    }

    /// Selects, forgets, and returns the next victim: young frames first,
    /// then old frames, FIFO within each queue. Returns `None` when no frame
    /// is evictable.
    pub fn evict(&self) -> Option<FrameId> {
        self.inner.lock().evict()
    }

    /// Records an access to `frame_id` at the next timestamp.
    ///
    /// A first access creates the frame's node without queueing it; the
    /// frame only becomes an eviction candidate via `set_evictable`.
    pub fn record_access(&self, frame_id: FrameId, access_type: AccessType) {
        self.inner.lock().record_access(frame_id, access_type)
    }

    /// Marks a tracked frame as evictable or withdraws it from eviction.
    ///
    /// Marking an untracked frame evictable is a caller bug and fails with
    /// `StorageError::FrameNotTracked`; withdrawing keeps the node (and its
    /// access history) so the frame re-enters its bucket on the next unpin.
    pub fn set_evictable(&self, frame_id: FrameId, evictable: bool) -> Result<()> {
        self.inner.lock().set_evictable(frame_id, evictable)
    }

    /// Drops all bookkeeping for `frame_id`.
    ///
    /// Unknown frames are ignored; removing a frame that is tracked but not
    /// evictable means the caller still holds pins and fails with
    /// `StorageError::FramePinned`.
    pub fn remove(&self, frame_id: FrameId) -> Result<()> {
        self.inner.lock().remove(frame_id)
    }

    /// Number of evictable frames.
    pub fn size(&self) -> usize {
        self.inner.lock().evictable
    }
}

impl ReplacerInner {
    fn evict(&mut self) -> Option<FrameId> {
        if self.evictable == 0 {
            return None;
        }
        debug_assert_eq!(self.evictable, self.young.len() + self.old.len());

        let victim = if !self.young.is_empty() {
            self.young.victim()
        } else {
            self.old.victim()
        };
        let frame_id = match victim {
            Some(frame_id) => frame_id,
            None => panic!(
                "lru-k replacer corrupt: {} evictable frames but no queued victim",
                self.evictable
            ),
        };

        self.nodes.remove(&frame_id);
        self.evictable -= 1;
        Some(frame_id)
    }

    fn record_access(&mut self, frame_id: FrameId, _access_type: AccessType) {
        self.current_timestamp += 1;
        let ts = self.current_timestamp;
        let k = self.k;

        match self.nodes.entry(frame_id) {
            Entry::Vacant(slot) => {
                // First sighting: start the history. The frame joins a queue
                // only once set_evictable(true) is called for it.
                slot.insert(LruKNode::new(k)).add_history(ts);
            }
            Entry::Occupied(slot) => {
                let node = slot.into_mut();
                if !node.is_evictable {
                    node.add_history(ts);
                    return;
                }
                if node.is_old() {
                    node.add_history(ts);
                    self.old.access(frame_id);
                } else {
                    node.add_history(ts);
                    if node.is_old() {
                        // K-th access on record: promote young -> old.
                        self.young.pin(frame_id);
                        self.old.unpin(frame_id);
                    } else {
                        self.young.access(frame_id);
                    }
                }
            }
        }
    }

    fn set_evictable(&mut self, frame_id: FrameId, evictable: bool) -> Result<()> {
        if evictable {
            match self.nodes.get(&frame_id) {
                None => {
                    return Err(Error::Storage(StorageError::FrameNotTracked(frame_id)));
                }
                Some(node) if node.is_evictable => return Ok(()),
                Some(_) => {}
            }

            // Capacity guard: never track more eviction candidates than
            // frames exist. The victim's node goes with it.
            if self.evictable >= self.num_frames {
                let victim = match self.young.victim().or_else(|| self.old.victim()) {
                    Some(victim) => victim,
                    None => panic!(
                        "lru-k replacer corrupt: {} evictable frames but no queued victim",
                        self.evictable
                    ),
                };
                self.nodes.remove(&victim);
                self.evictable -= 1;
            }

            if let Some(node) = self.nodes.get_mut(&frame_id) {
                node.is_evictable = true;
                if node.is_old() {
                    self.old.unpin(frame_id);
                } else {
                    self.young.unpin(frame_id);
                }
                self.evictable += 1;
            }
            Ok(())
        } else {
            let node = match self.nodes.get_mut(&frame_id) {
                Some(node) => node,
                None => return Ok(()),
            };
            if !node.is_evictable {
                return Ok(());
            }
            // The node (and its history) is retained so the frame re-enters
            // the right bucket when it is unpinned again.
            node.is_evictable = false;
            if node.is_old() {
                self.old.pin(frame_id);
            } else {
                self.young.pin(frame_id);
            }
            self.evictable -= 1;
            Ok(())
        }
    }

    fn remove(&mut self, frame_id: FrameId) -> Result<()> {
        let node = match self.nodes.get(&frame_id) {
            Some(node) => node,
            None => return Ok(()),
        };
        if !node.is_evictable {
            return Err(Error::Storage(StorageError::FramePinned(frame_id)));
        }
        let is_old = node.is_old();

        self.nodes.remove(&frame_id);
        if is_old {
            self.old.pin(frame_id);
        } else {
            self.young.pin(frame_id);
        }
        self.evictable -= 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(replacer: &LruKReplacer, frame_id: FrameId) {
        replacer.record_access(frame_id, AccessType::Unknown);
    }

    fn make_evictable(replacer: &LruKReplacer, frame_id: FrameId) {
        touch(replacer, frame_id);
        replacer.set_evictable(frame_id, true).unwrap();
    }

    #[test]
    fn test_lru_queue_fifo_with_promotion() {
        let mut queue = LruQueue::new();
        queue.unpin(1);
        queue.unpin(2);
        queue.unpin(3);
        queue.unpin(2); // already present, no-op
        assert_eq!(queue.len(), 3);

        queue.access(1); // 1 moves to the back
        assert_eq!(queue.victim(), Some(2));

        queue.pin(3);
        assert_eq!(queue.victim(), Some(1));
        assert!(queue.is_empty());
        assert_eq!(queue.victim(), None);
    }

    #[test]
    fn test_lru_queue_access_absent_is_noop() {
        let mut queue = LruQueue::new();
        queue.access(7);
        queue.pin(7);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_node_history_bounded() {
        let mut node = LruKNode::new(2);
        assert!(!node.is_old());
        node.add_history(1);
        assert!(!node.is_old());
        node.add_history(2);
        assert!(node.is_old());
        node.add_history(3);
        assert_eq!(node.history.len(), 2);
        assert_eq!(node.history.front(), Some(&2));
    }

    #[test]
    fn test_evict_empty() {
        let replacer = LruKReplacer::new(4, 2);
        assert_eq!(replacer.evict(), None);
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn test_young_evicted_before_old() {
        let replacer = LruKReplacer::new(3, 2);

        // A, B, C, A: A reaches 2 accesses and moves to the old bucket,
        // B and C stay young.
        make_evictable(&replacer, 0); // A
        make_evictable(&replacer, 1); // B
        make_evictable(&replacer, 2); // C
        touch(&replacer, 0); // A again

        assert_eq!(replacer.size(), 3);
        assert_eq!(replacer.evict(), Some(1)); // B: young, FIFO
        assert_eq!(replacer.evict(), Some(2)); // C: young
        assert_eq!(replacer.evict(), Some(0)); // A: old
        assert_eq!(replacer.evict(), None);
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn test_old_bucket_is_lru_ordered() {
        let replacer = LruKReplacer::new(3, 2);
        make_evictable(&replacer, 0);
        make_evictable(&replacer, 1);
        touch(&replacer, 0); // 0 old
        touch(&replacer, 1); // 1 old
        touch(&replacer, 0); // 0 most recent

        assert_eq!(replacer.evict(), Some(1));
        assert_eq!(replacer.evict(), Some(0));
    }

    #[test]
    fn test_set_evictable_untracked_rejected() {
        let replacer = LruKReplacer::new(4, 2);
        let err = replacer.set_evictable(3, true).unwrap_err();
        assert!(matches!(
            err,
            Error::Storage(StorageError::FrameNotTracked(3))
        ));
    }

    #[test]
    fn test_set_evictable_is_idempotent() {
        let replacer = LruKReplacer::new(4, 2);
        make_evictable(&replacer, 0);
        replacer.set_evictable(0, true).unwrap();
        assert_eq!(replacer.size(), 1);

        replacer.set_evictable(0, false).unwrap();
        replacer.set_evictable(0, false).unwrap();
        assert_eq!(replacer.size(), 0);
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    fn test_history_survives_withdrawal() {
        let replacer = LruKReplacer::new(3, 2);

        // Frame 0 gathers K accesses while evictable, is withdrawn (as on a
        // pin), then re-admitted: it must land in the old bucket, so the
        // young frame 1 goes first.
        make_evictable(&replacer, 0);
        touch(&replacer, 0);
        replacer.set_evictable(0, false).unwrap();
        make_evictable(&replacer, 1);
        replacer.set_evictable(0, true).unwrap();

        assert_eq!(replacer.evict(), Some(1));
        assert_eq!(replacer.evict(), Some(0));
    }

    #[test]
    fn test_record_access_on_pinned_keeps_queues() {
        let replacer = LruKReplacer::new(3, 2);
        make_evictable(&replacer, 0);
        replacer.set_evictable(0, false).unwrap();

        // Accesses while withdrawn touch only the history.
        touch(&replacer, 0);
        touch(&replacer, 0);
        assert_eq!(replacer.size(), 0);
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let replacer = LruKReplacer::new(4, 2);
        replacer.remove(2).unwrap();
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn test_remove_pinned_fails() {
        let replacer = LruKReplacer::new(4, 2);
        touch(&replacer, 0);
        let err = replacer.remove(0).unwrap_err();
        assert!(matches!(err, Error::Storage(StorageError::FramePinned(0))));
    }

    #[test]
    fn test_remove_evictable() {
        let replacer = LruKReplacer::new(4, 2);
        make_evictable(&replacer, 0);
        make_evictable(&replacer, 1);
        replacer.remove(0).unwrap();
        assert_eq!(replacer.size(), 1);
        assert_eq!(replacer.evict(), Some(1));
    }

    #[test]
    fn test_capacity_guard_force_evicts() {
        let replacer = LruKReplacer::new(2, 2);
        make_evictable(&replacer, 0);
        make_evictable(&replacer, 1);
        assert_eq!(replacer.size(), 2);

        // Admitting a third candidate into a 2-frame replacer pushes out
        // the oldest young frame.
        make_evictable(&replacer, 2);
        assert_eq!(replacer.size(), 2);
        assert_eq!(replacer.evict(), Some(1));
        assert_eq!(replacer.evict(), Some(2));
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    fn test_promotion_with_larger_k() {
        let replacer = LruKReplacer::new(3, 3);

        // With K=3, two accesses keep the frame young.
        make_evictable(&replacer, 0);
        touch(&replacer, 0);
        make_evictable(&replacer, 1);
        touch(&replacer, 0); // third access: 0 promotes to old

        assert_eq!(replacer.evict(), Some(1));
        assert_eq!(replacer.evict(), Some(0));
    }

    #[test]
    fn test_timestamps_shared_across_frames() {
        let replacer = LruKReplacer::new(4, 2);
        make_evictable(&replacer, 0);
        make_evictable(&replacer, 1);
        touch(&replacer, 1); // 1 promotes first
        touch(&replacer, 0); // then 0

        // Both old; 1's K-th access is older.
        assert_eq!(replacer.evict(), Some(1));
        assert_eq!(replacer.evict(), Some(0));
    }
}
