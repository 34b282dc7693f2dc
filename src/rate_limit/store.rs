use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Counting bucket for one identifier within one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bucket {
    /// Admissions granted in the current window.
    pub count: u32,
    /// End of the window, epoch millis.
    pub window_end_millis: u64,
}

impl Bucket {
    /// An empty bucket whose window starts at `now_millis`.
    pub fn fresh(now_millis: u64, window_millis: u64) -> Self {
        Self { count: 0, window_end_millis: now_millis.saturating_add(window_millis) }
    }

    /// A bucket is replaced once `now` is strictly past its window end.
    pub fn is_expired(&self, now_millis: u64) -> bool {
        now_millis > self.window_end_millis
    }
}

/// Abstract storage interface for rate limit state.
///
/// Implementations must make [`update`](BucketStore::update) a single atomic step per
/// identifier: two concurrent updates for the same key must observe each other's
/// writes. Updates for different keys must not wait on each other for longer than a
/// short critical section. None of these methods may block on I/O.
pub trait BucketStore: Send + Sync + std::fmt::Debug {
    /// Fetch the bucket for `identifier`, if one exists.
    fn get(&self, identifier: &str) -> Option<Bucket>;

    /// Unconditionally replace the bucket for `identifier`.
    fn set(&self, identifier: &str, bucket: Bucket);

    /// Atomic read-modify-write. `f` sees the current bucket (or `None`) and may
    /// replace, mutate or clear it. Leaving the slot `None` removes the entry.
    fn update(&self, identifier: &str, f: &mut dyn FnMut(&mut Option<Bucket>));

    /// Drop every bucket whose window ended before `now_millis`. Returns how many went.
    fn sweep(&self, now_millis: u64) -> usize;

    /// Number of tracked identifiers.
    fn len(&self) -> usize;

    /// Whether no identifier is tracked.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Sharded in-memory bucket store.
///
/// Each identifier's read-modify-write happens under its shard's write lock, so
/// unrelated identifiers only contend when they hash to the same shard.
#[derive(Debug, Default)]
pub struct InMemoryBucketStore {
    buckets: DashMap<String, Bucket>,
}

impl InMemoryBucketStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BucketStore for InMemoryBucketStore {
    fn get(&self, identifier: &str) -> Option<Bucket> {
        self.buckets.get(identifier).map(|b| *b)
    }

    fn set(&self, identifier: &str, bucket: Bucket) {
        self.buckets.insert(identifier.to_string(), bucket);
    }

    fn update(&self, identifier: &str, f: &mut dyn FnMut(&mut Option<Bucket>)) {
        match self.buckets.entry(identifier.to_string()) {
            Entry::Occupied(mut occupied) => {
                let mut slot = Some(*occupied.get());
                f(&mut slot);
                match slot {
                    Some(bucket) => {
                        occupied.insert(bucket);
                    }
                    None => {
                        occupied.remove();
                    }
                }
            }
            Entry::Vacant(vacant) => {
                let mut slot = None;
                f(&mut slot);
                if let Some(bucket) = slot {
                    vacant.insert(bucket);
                }
            }
        }
    }

    fn sweep(&self, now_millis: u64) -> usize {
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| bucket.window_end_millis >= now_millis);
        before.saturating_sub(self.buckets.len())
    }

    fn len(&self) -> usize {
        self.buckets.len()
    }
}
