//! Bookkeeping for idle, active and in-flight resources
//!
//! Everything here is plain data; the pool guards a [`PoolIndex`] with its mutex
//! and never touches it otherwise.

use std::backtrace::Backtrace;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

/// Identity of a pooled resource, unique within its pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ResourceId(pub(crate) u64);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle metadata the pool keeps for every resource it knows about
#[derive(Debug, Clone)]
pub(crate) struct ResourceMeta {
    pub id: ResourceId,
    pub created_at: Instant,
    pub last_used: Instant,
    pub owner: Option<ThreadId>,
    pub deprecated: bool,
    pub trace: Option<Arc<Backtrace>>,
}

impl ResourceMeta {
    pub fn new(id: ResourceId) -> Self {
        let now = Instant::now();
        Self {
            id,
            created_at: now,
            last_used: now,
            owner: None,
            deprecated: false,
            trace: None,
        }
    }

    pub fn touch(&mut self) {
        self.last_used = Instant::now();
    }

    /// Stamp the calling thread as owner; the backtrace is only captured on request
    pub fn claim(&mut self, capture_trace: bool) {
        self.touch();
        self.owner = Some(thread::current().id());
        self.trace = capture_trace.then(|| Arc::new(Backtrace::force_capture()));
    }

    pub fn release_claim(&mut self) {
        self.touch();
        self.owner = None;
        self.trace = None;
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn unused_for(&self) -> Duration {
        self.last_used.elapsed()
    }
}

/// An idle resource together with its metadata
pub(crate) struct PooledData<T> {
    pub resource: T,
    pub meta: ResourceMeta,
}

impl<T> PooledData<T> {
    pub fn new(resource: T, meta: ResourceMeta) -> Self {
        Self { resource, meta }
    }
}

/// Idle / active / in-flight sets of one pool
///
/// A resource is in at most one of these at a time. Active entries hold only
/// metadata because the resource itself belongs to the caller until released.
pub(crate) struct PoolIndex<T> {
    idle: VecDeque<PooledData<T>>,
    active: HashMap<ResourceId, ResourceMeta>,
    by_thread: HashMap<ResourceId, ThreadId>,
    /// Resources being constructed, not yet indexed
    pub creating: usize,
    /// Idle resources taken out for validation by the reaper
    pub validating: usize,
    next_id: u64,
}

impl<T> PoolIndex<T> {
    pub fn new() -> Self {
        Self {
            idle: VecDeque::new(),
            active: HashMap::new(),
            by_thread: HashMap::new(),
            creating: 0,
            validating: 0,
            next_id: 0,
        }
    }

    pub fn next_id(&mut self) -> ResourceId {
        self.next_id += 1;
        ResourceId(self.next_id)
    }

    pub fn num_idle(&self) -> usize {
        self.idle.len()
    }

    pub fn num_active(&self) -> usize {
        self.active.len()
    }

    /// Resources counted against the active limit
    pub fn committed(&self) -> usize {
        self.active.len() + self.creating
    }

    /// Idle plus active: the pool's current footprint
    pub fn size(&self) -> usize {
        self.idle.len() + self.active.len()
    }

    pub fn active_meta(&self, id: ResourceId) -> Option<&ResourceMeta> {
        self.active.get(&id)
    }

    /// Oldest idle resource first
    pub fn pop_idle(&mut self) -> Option<PooledData<T>> {
        self.idle.pop_front()
    }

    pub fn push_idle(&mut self, data: PooledData<T>) {
        debug_assert!(!self.active.contains_key(&data.meta.id));
        self.idle.push_back(data);
    }

    pub fn drain_idle(&mut self) -> Vec<PooledData<T>> {
        self.idle.drain(..).collect()
    }

    /// Split the idle set: entries for which `evict` returns true are removed and returned
    pub fn extract_idle<F>(&mut self, mut evict: F) -> Vec<PooledData<T>>
    where
        F: FnMut(&PooledData<T>) -> bool,
    {
        let mut kept = VecDeque::with_capacity(self.idle.len());
        let mut removed = Vec::new();
        for data in self.idle.drain(..) {
            if evict(&data) {
                removed.push(data);
            } else {
                kept.push_back(data);
            }
        }
        self.idle = kept;
        removed
    }

    /// Remove the oldest idle entries until at most `max` remain
    pub fn trim_idle(&mut self, max: usize) -> Vec<PooledData<T>> {
        let excess = self.idle.len().saturating_sub(max);
        self.idle.drain(..excess).collect()
    }

    pub fn insert_active(&mut self, meta: ResourceMeta, track_thread: bool) {
        if track_thread && let Some(owner) = meta.owner {
            self.by_thread.insert(meta.id, owner);
        }
        self.active.insert(meta.id, meta);
    }

    pub fn remove_active(&mut self, id: ResourceId) -> Option<ResourceMeta> {
        self.by_thread.remove(&id);
        self.active.remove(&id)
    }

    /// Active resources already checked out by `thread`
    pub fn held_by(&self, thread: ThreadId) -> Vec<ResourceId> {
        self.by_thread
            .iter()
            .filter(|(_, owner)| **owner == thread)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Remove and return active entries matching `leaked`
    pub fn extract_active<F>(&mut self, mut leaked: F) -> Vec<ResourceMeta>
    where
        F: FnMut(&ResourceMeta) -> bool,
    {
        let ids: Vec<ResourceId> = self
            .active
            .values()
            .filter(|&meta| leaked(meta))
            .map(|meta| meta.id)
            .collect();
        ids.into_iter().filter_map(|id| self.remove_active(id)).collect()
    }

    /// Mark every known resource deprecated; returns how many were flagged
    pub fn deprecate_all(&mut self) -> usize {
        let mut count = 0;
        for data in self.idle.iter_mut() {
            data.meta.deprecated = true;
            count += 1;
        }
        for meta in self.active.values_mut() {
            meta.deprecated = true;
            count += 1;
        }
        count
    }

    pub fn deprecate(&mut self, id: ResourceId) -> bool {
        match self.active.get_mut(&id) {
            Some(meta) => {
                meta.deprecated = true;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idle_entry(index: &mut PoolIndex<u32>, value: u32) -> ResourceId {
        let id = index.next_id();
        index.push_idle(PooledData::new(value, ResourceMeta::new(id)));
        id
    }

    #[test]
    fn idle_is_handed_out_in_insertion_order() {
        let mut index = PoolIndex::new();
        idle_entry(&mut index, 1);
        idle_entry(&mut index, 2);
        assert_eq!(index.pop_idle().map(|d| d.resource), Some(1));
        assert_eq!(index.pop_idle().map(|d| d.resource), Some(2));
        assert!(index.pop_idle().is_none());
    }

    #[test]
    fn active_and_idle_are_disjoint() {
        let mut index = PoolIndex::new();
        let id = idle_entry(&mut index, 7);
        let mut data = index.pop_idle().unwrap();
        data.meta.claim(false);
        index.insert_active(data.meta.clone(), true);

        assert!(index.active_meta(id).is_some());
        assert_eq!(index.num_idle(), 0);
        assert_eq!(index.held_by(thread::current().id()), vec![id]);

        let meta = index.remove_active(id).unwrap();
        assert!(index.held_by(thread::current().id()).is_empty());
        index.push_idle(PooledData::new(data.resource, meta));
        assert!(index.active_meta(id).is_none());
        assert_eq!(index.size(), 1);
    }

    #[test]
    fn trim_removes_oldest_first() {
        let mut index = PoolIndex::new();
        for v in 0..5 {
            idle_entry(&mut index, v);
        }
        let removed: Vec<u32> = index.trim_idle(2).into_iter().map(|d| d.resource).collect();
        assert_eq!(removed, vec![0, 1, 2]);
        assert_eq!(index.num_idle(), 2);
    }

    #[test]
    fn deprecate_flags_idle_and_active() {
        let mut index = PoolIndex::new();
        idle_entry(&mut index, 1);
        let id = index.next_id();
        index.insert_active(ResourceMeta::new(id), false);
        assert_eq!(index.deprecate_all(), 2);
        assert!(index.active_meta(id).unwrap().deprecated);
    }
}
