use std::collections::{HashMap, VecDeque};
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::FrameId;

#[derive(Error, Debug)]
pub enum ReplacerError {
    #[error("Frame {0} is outside the replacer capacity")]
    InvalidFrame(FrameId),
    #[error("Frame {0} is not evictable")]
    FrameNotEvictable(FrameId),
}

/// Per-frame access record: up to K timestamps plus the evictable flag
struct FrameEntry {
    history: VecDeque<u64>,
    evictable: bool,
}

struct ReplacerInner {
    entries: HashMap<FrameId, FrameEntry>,
    current_timestamp: u64,
    evictable_count: usize,
}

/// LRU-K page replacement policy.
///
/// A frame with fewer than K recorded accesses has infinite backward
/// K-distance; those frames are evicted first, oldest first access winning.
/// Among frames with K or more accesses, the one whose K-th most recent
/// access is oldest is the victim.
pub struct LruKReplacer {
    k: usize,
    num_frames: usize,
    inner: Mutex<ReplacerInner>,
}

impl LruKReplacer {
    pub fn new(num_frames: usize, k: usize) -> Self {
        assert!(k >= 1, "k must be at least 1");
        Self {
            k,
            num_frames,
            inner: Mutex::new(ReplacerInner {
                entries: HashMap::with_capacity(num_frames),
                current_timestamp: 0,
                evictable_count: 0,
            }),
        }
    }

    /// Record an access to a frame at the current logical timestamp.
    ///
    /// A frame seen for the first time starts out non-evictable; the caller
    /// decides when it may be evicted via [`Self::set_evictable`].
    pub fn record_access(&self, frame_id: FrameId) -> Result<(), ReplacerError> {
        if frame_id as usize >= self.num_frames {
            return Err(ReplacerError::InvalidFrame(frame_id));
        }

        let mut inner = self.inner.lock();
        inner.current_timestamp += 1;
        let timestamp = inner.current_timestamp;
        let k = self.k;

        let entry = inner.entries.entry(frame_id).or_insert_with(|| FrameEntry {
            history: VecDeque::with_capacity(k),
            evictable: false,
        });
        entry.history.push_back(timestamp);
        // Only the K most recent accesses matter; the front is then the
        // K-th most recent one
        if entry.history.len() > k {
            entry.history.pop_front();
        }
        Ok(())
    }

    /// Flip a tracked frame's evictable flag. No-op for untracked frames.
    pub fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        let mut inner = self.inner.lock();
        let Some(entry) = inner.entries.get_mut(&frame_id) else {
            return;
        };
        if entry.evictable != evictable {
            entry.evictable = evictable;
            if evictable {
                inner.evictable_count += 1;
            } else {
                inner.evictable_count -= 1;
            }
        }
    }

    /// Pick and remove the eviction victim, if any frame is evictable.
    pub fn evict(&self) -> Option<FrameId> {
        let mut inner = self.inner.lock();
        if inner.evictable_count == 0 {
            return None;
        }

        // Frames with fewer than K accesses have infinite distance; classic
        // LRU on their first access breaks the tie
        let mut victim: Option<(FrameId, u64)> = None;
        for (&frame_id, entry) in &inner.entries {
            if !entry.evictable || entry.history.len() >= self.k {
                continue;
            }
            let Some(&first_access) = entry.history.front() else {
                continue;
            };
            if victim.map_or(true, |(_, t)| first_access < t) {
                victim = Some((frame_id, first_access));
            }
        }

        // Otherwise the largest backward K-distance wins, i.e. the smallest
        // K-th most recent timestamp
        if victim.is_none() {
            for (&frame_id, entry) in &inner.entries {
                if !entry.evictable {
                    continue;
                }
                let Some(&kth_recent) = entry.history.front() else {
                    continue;
                };
                if victim.map_or(true, |(_, t)| kth_recent < t) {
                    victim = Some((frame_id, kth_recent));
                }
            }
        }

        let (frame_id, _) = victim?;
        inner.entries.remove(&frame_id);
        inner.evictable_count -= 1;
        Some(frame_id)
    }

    /// Drop a frame's history entirely.
    ///
    /// Fails when the frame is tracked but currently pinned (non-evictable);
    /// untracked frames are a no-op.
    pub fn remove(&self, frame_id: FrameId) -> Result<(), ReplacerError> {
        if frame_id as usize >= self.num_frames {
            return Err(ReplacerError::InvalidFrame(frame_id));
        }

        let mut inner = self.inner.lock();
        let Some(entry) = inner.entries.get(&frame_id) else {
            return Ok(());
        };
        if !entry.evictable {
            return Err(ReplacerError::FrameNotEvictable(frame_id));
        }
        inner.entries.remove(&frame_id);
        inner.evictable_count -= 1;
        Ok(())
    }

    /// Number of frames currently evictable
    pub fn size(&self) -> usize {
        self.inner.lock().evictable_count
    }
}
