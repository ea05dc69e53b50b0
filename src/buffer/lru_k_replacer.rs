use std::collections::{BTreeSet, HashMap, VecDeque};

use parking_lot::Mutex;

use crate::common::{FrameId, Timestamp};

/// Access history for a single frame
#[derive(Debug)]
struct LruKNode {
    /// Last k access timestamps, most recent at the back
    history: VecDeque<Timestamp>,
    /// Whether this frame may be evicted
    is_evictable: bool,
}

impl LruKNode {
    fn new() -> Self {
        Self {
            history: VecDeque::new(),
            is_evictable: false,
        }
    }

    /// Pushes a new access, keeping at most k timestamps.
    fn record(&mut self, timestamp: Timestamp, k: usize) {
        self.history.push_back(timestamp);
        while self.history.len() > k {
            self.history.pop_front();
        }
    }

    /// Timestamp of the k-th most recent access, or None with fewer than
    /// k accesses on record (backward k-distance of +inf).
    fn kth_recent(&self, k: usize) -> Option<Timestamp> {
        if self.history.len() < k {
            None
        } else {
            self.history.front().copied()
        }
    }

    /// Earliest access still on record. For a frame with fewer than k
    /// accesses nothing has been dropped, so this is its first access ever.
    fn earliest(&self) -> Timestamp {
        *self.history.front().expect("node has at least one access")
    }
}

#[derive(Default)]
struct ReplacerInner {
    node_store: HashMap<FrameId, LruKNode>,
    /// Frames with fewer than k accesses (+inf k-distance), ordered by
    /// first access: the front is the classical-LRU tie-break victim.
    cold: BTreeSet<(Timestamp, FrameId)>,
    /// Frames with at least k accesses, ordered by the k-th most recent
    /// access: the front has the largest backward k-distance.
    hot: BTreeSet<(Timestamp, FrameId)>,
    current_timestamp: Timestamp,
    curr_size: usize,
}

impl ReplacerInner {
    /// The ordering key of `frame_id` in whichever partition holds it.
    fn order_key(&self, frame_id: FrameId, k: usize) -> (bool, Timestamp) {
        let node = &self.node_store[&frame_id];
        match node.kth_recent(k) {
            Some(ts) => (true, ts),
            None => (false, node.earliest()),
        }
    }

    fn unlink(&mut self, frame_id: FrameId, k: usize) {
        let (hot, ts) = self.order_key(frame_id, k);
        if hot {
            self.hot.remove(&(ts, frame_id));
        } else {
            self.cold.remove(&(ts, frame_id));
        }
    }

    fn link(&mut self, frame_id: FrameId, k: usize) {
        let (hot, ts) = self.order_key(frame_id, k);
        if hot {
            self.hot.insert((ts, frame_id));
        } else {
            self.cold.insert((ts, frame_id));
        }
    }
}

/// LRU-K replacement policy.
///
/// Evicts the evictable frame with the largest backward k-distance, the
/// time since its k-th most recent access. Frames with fewer than k
/// recorded accesses count as infinitely distant and are preferred; ties
/// among those fall back to plain LRU on the earliest access.
///
/// A frame that is pinned (not evictable) is never chosen but keeps its
/// history, so it re-enters the eviction order at the right position once
/// it is unpinned.
pub struct LruKReplacer {
    /// K value for the LRU-K algorithm
    k: usize,
    /// Maximum number of frames the replacer can track
    max_frames: usize,
    inner: Mutex<ReplacerInner>,
}

impl LruKReplacer {
    /// Creates a new LRU-K replacer with the given k value and maximum
    /// frame count.
    pub fn new(k: usize, max_frames: usize) -> Self {
        assert!(k > 0);
        Self {
            k,
            max_frames,
            inner: Mutex::new(ReplacerInner::default()),
        }
    }

    /// Evicts the frame with the largest backward k-distance.
    /// Returns None if there are no evictable frames.
    pub fn evict(&self) -> Option<FrameId> {
        let mut inner = self.inner.lock();

        if inner.curr_size == 0 {
            return None;
        }

        // Scan each partition in order and take the first evictable frame;
        // pinned frames stay in place with their history intact.
        let victim = inner
            .cold
            .iter()
            .chain(inner.hot.iter())
            .map(|&(_, frame_id)| frame_id)
            .find(|frame_id| inner.node_store[frame_id].is_evictable)?;

        inner.unlink(victim, self.k);
        inner.node_store.remove(&victim);
        inner.curr_size -= 1;
        Some(victim)
    }

    /// Records an access to the given frame at the next timestamp.
    pub fn record_access(&self, frame_id: FrameId) {
        if frame_id.as_usize() >= self.max_frames {
            return;
        }

        let mut inner = self.inner.lock();
        let timestamp = inner.current_timestamp;
        inner.current_timestamp += 1;

        let known = inner.node_store.contains_key(&frame_id);
        if known {
            inner.unlink(frame_id, self.k);
        }
        inner
            .node_store
            .entry(frame_id)
            .or_insert_with(LruKNode::new)
            .record(timestamp, self.k);
        inner.link(frame_id, self.k);
    }

    /// Sets whether a frame is evictable. A frame's evictability flips to
    /// true when its pin count drops to zero and back to false when it is
    /// pinned again. Unknown frames are ignored.
    pub fn set_evictable(&self, frame_id: FrameId, is_evictable: bool) {
        if frame_id.as_usize() >= self.max_frames {
            return;
        }

        let mut inner = self.inner.lock();
        if let Some(node) = inner.node_store.get_mut(&frame_id) {
            if node.is_evictable != is_evictable {
                node.is_evictable = is_evictable;
                if is_evictable {
                    inner.curr_size += 1;
                } else {
                    inner.curr_size -= 1;
                }
            }
        }
    }

    /// Drops a frame and its history from the replacer entirely, e.g. when
    /// its page is deleted. Removing a pinned frame is a caller bug.
    pub fn remove(&self, frame_id: FrameId) {
        let mut inner = self.inner.lock();
        let Some(node) = inner.node_store.get(&frame_id) else {
            return;
        };
        assert!(
            node.is_evictable,
            "cannot remove pinned frame {} from the replacer",
            frame_id
        );

        inner.unlink(frame_id, self.k);
        inner.node_store.remove(&frame_id);
        inner.curr_size -= 1;
    }

    /// Returns the number of evictable frames.
    pub fn size(&self) -> usize {
        self.inner.lock().curr_size
    }

    /// Returns the k value of this replacer.
    pub fn k(&self) -> usize {
        self.k
    }
}
