//! Tenant-tagged, owner-exclusive connection context pool.
//!
//! Every request-scoped operation acquires a context routed by tag to the
//! right backing store (untagged for the global instance, a host id for a
//! project collection). Contexts are reentrant within one owner and never
//! shared across owners concurrently. An owner is the running tokio task,
//! so two requests multiplexed onto the same worker thread still exclude
//! each other, and a task that migrates threads across an await keeps its
//! claim. Waiting for a slot is async; no runtime worker is pinned. Only
//! bookkeeping is serialized; the store connection itself is not held under
//! the pool lock.

use std::pin::pin;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::RegistryError;

/// Identity a context is exclusive to: the running task, or the thread
/// when called outside a task (startup code under `block_on`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OwnerId {
    Task(tokio::task::Id),
    Thread(ThreadId),
}

impl OwnerId {
    fn current() -> Self {
        match tokio::task::try_id() {
            Some(id) => OwnerId::Task(id),
            None => OwnerId::Thread(thread::current().id()),
        }
    }
}

#[derive(Debug)]
struct Slot {
    conn: String,
    tag: Option<String>,
    owner: Option<OwnerId>,
    refcount: u32,
}

#[derive(Debug, Default)]
struct PoolState {
    slots: Vec<Option<Slot>>,
    /// Tag that untagged (bootstrap) acquisitions resolve to after
    /// `retag_default` has run.
    default_tag: Option<String>,
}

/// Fixed-capacity pool of tagged store-connection contexts.
#[derive(Debug)]
pub struct ContextPool {
    state: Mutex<PoolState>,
    available: Notify,
}

fn tag_matches(slot_tag: &Option<String>, tag: Option<&str>, default_tag: &Option<String>) -> bool {
    match (tag, slot_tag) {
        (None, None) => true,
        (None, Some(st)) => default_tag.as_deref() == Some(st.as_str()),
        (Some(t), Some(st)) => t == st,
        (Some(_), None) => false,
    }
}

impl ContextPool {
    /// Creates a pool with `capacity` empty slots. The pool is constructed
    /// once at startup and passed by reference into everything that needs a
    /// context.
    pub fn new(capacity: usize) -> Result<Self, RegistryError> {
        if capacity < 1 {
            return Err(RegistryError::BadParameter(format!(
                "context count must be at least 1 (was {})",
                capacity
            )));
        }

        log::debug!("initialised context pool with size {}", capacity);

        Ok(Self {
            state: Mutex::new(PoolState {
                slots: (0..capacity).map(|_| None).collect(),
                default_tag: None,
            }),
            available: Notify::new(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().slots.len()
    }

    /// Number of slots holding a logical connection.
    pub fn allocated(&self) -> usize {
        self.state
            .lock()
            .slots
            .iter()
            .filter(|s| s.is_some())
            .count()
    }

    /// Claims the first empty slot for a new logical connection. Allocating
    /// the same connection string twice is a no-op reported as success.
    /// Returns false when the pool is full or the connection string is empty.
    pub fn allocate(&self, conn: &str, tag: Option<&str>) -> bool {
        if conn.is_empty() {
            return false;
        }

        let mut state = self.state.lock();

        if state
            .slots
            .iter()
            .flatten()
            .any(|slot| slot.conn == conn)
        {
            log::warn!("a context is already allocated for {}", conn);
            return true;
        }

        let Some(free) = state.slots.iter().position(|s| s.is_none()) else {
            log::warn!("all context slots are in use");
            return false;
        };

        state.slots[free] = Some(Slot {
            conn: conn.to_string(),
            tag: tag.map(str::to_string),
            owner: None,
            refcount: 0,
        });
        drop(state);

        log::debug!("allocated connection {} as context {}", conn, free);
        self.available.notify_waiters();
        true
    }

    /// Acquires an owner-exclusive context whose tag matches. Passing `None`
    /// resolves bootstrap contexts, transparently following the pool's
    /// default tag once `retag_default` has run.
    ///
    /// Waits until a matching slot is free; there is no timeout. The same
    /// owner may nest acquisitions and receives the same context each time.
    pub async fn acquire(&self, tag: Option<&str>) -> PoolContext<'_> {
        let owner = OwnerId::current();
        log::debug!("acquiring context with tag {:?}", tag);

        let mut notified = pin!(self.available.notified());
        loop {
            // register interest before checking, so a release between the
            // check and the await is not lost
            notified.as_mut().enable();
            if let Some(ctx) = self.try_acquire(owner, tag) {
                return ctx;
            }
            log::info!("no available context, waiting...");
            notified.as_mut().await;
            notified.set(self.available.notified());
        }
    }

    fn try_acquire(&self, owner: OwnerId, tag: Option<&str>) -> Option<PoolContext<'_>> {
        let mut state = self.state.lock();

        let reused = state.slots.iter().position(|s| match s {
            Some(slot) => {
                slot.owner == Some(owner) && tag_matches(&slot.tag, tag, &state.default_tag)
            }
            None => false,
        });
        if let Some(i) = reused {
            let slot = state.slots[i].as_mut().unwrap();
            slot.refcount += 1;
            log::debug!("got context {} (reused)", i);
            return Some(PoolContext {
                pool: self,
                conn: slot.conn.clone(),
                tag: slot.tag.clone(),
            });
        }

        let free = state.slots.iter().position(|s| match s {
            Some(slot) => slot.owner.is_none() && tag_matches(&slot.tag, tag, &state.default_tag),
            None => false,
        });
        if let Some(i) = free {
            let slot = state.slots[i].as_mut().unwrap();
            slot.owner = Some(owner);
            slot.refcount = 1;
            log::debug!("got context {}", i);
            return Some(PoolContext {
                pool: self,
                conn: slot.conn.clone(),
                tag: slot.tag.clone(),
            });
        }

        None
    }

    /// Releases one acquisition of the context holding `conn`. At refcount
    /// zero the owner is cleared and waiters are woken. Unknown connection
    /// strings are a silent no-op.
    fn release(&self, conn: &str) {
        let mut state = self.state.lock();

        let Some(i) = state
            .slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|slot| slot.conn == conn))
        else {
            return;
        };

        let slot = state.slots[i].as_mut().unwrap();
        if slot.refcount > 0 {
            slot.refcount -= 1;
        }

        if slot.refcount == 0 {
            slot.owner = None;
            drop(state);
            log::debug!("released context {}", i);
            self.available.notify_waiters();
        } else {
            log::debug!("context {} is still in use", i);
        }
    }

    /// Re-tags bootstrap slots once the instance identifier is known.
    ///
    /// Slots with no tag, or carrying the previous default tag, move to
    /// `new_tag`; explicitly-tagged slots are untouched. Untagged `acquire`
    /// calls resolve to the retagged slots from then on. This breaks the
    /// chicken-and-egg between reading the instance node and tagging the
    /// connections it is read through.
    pub fn retag_default(&self, new_tag: &str) -> bool {
        if new_tag.is_empty() {
            return false;
        }

        let mut state = self.state.lock();
        let previous = state.default_tag.clone();

        for slot in state.slots.iter_mut().flatten() {
            match &slot.tag {
                None => slot.tag = Some(new_tag.to_string()),
                Some(tag) if previous.as_deref() == Some(tag.as_str()) => {
                    slot.tag = Some(new_tag.to_string());
                }
                Some(_) => {}
            }
        }

        state.default_tag = Some(new_tag.to_string());
        drop(state);

        self.available.notify_waiters();
        true
    }
}

/// An acquired context. Dropping it releases the acquisition, so contexts
/// are never leaked on error paths.
#[derive(Debug)]
pub struct PoolContext<'a> {
    pool: &'a ContextPool,
    conn: String,
    tag: Option<String>,
}

impl PoolContext<'_> {
    /// Connection string of the backing store this context routes to.
    pub fn connection(&self) -> &str {
        &self.conn
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }
}

impl Drop for PoolContext<'_> {
    fn drop(&mut self) {
        self.pool.release(&self.conn);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn new_rejects_zero_capacity() {
        assert!(ContextPool::new(0).is_err());
    }

    #[test]
    fn allocate_is_idempotent_per_connection() {
        let pool = ContextPool::new(2).unwrap();
        assert!(pool.allocate("db=one", None));
        assert!(pool.allocate("db=one", None));
        assert_eq!(pool.allocated(), 1);
        assert!(pool.allocate("db=two", Some("tenant")));
        assert_eq!(pool.allocated(), 2);
        // pool is now full
        assert!(!pool.allocate("db=three", None));
    }

    #[tokio::test]
    async fn acquire_is_reentrant_within_one_task() {
        let pool = ContextPool::new(1).unwrap();
        pool.allocate("db=one", None);

        let first = pool.acquire(None).await;
        let second = pool.acquire(None).await;
        assert_eq!(first.connection(), second.connection());

        drop(second);
        {
            // still owned by this task; the slot must not be claimable as
            // fresh by anyone else, which we can observe via refcount
            // reaching zero only after the second release
            let state = pool.state.lock();
            let slot = state.slots[0].as_ref().unwrap();
            assert_eq!(slot.refcount, 1);
            assert!(slot.owner.is_some());
        }

        drop(first);
        let state = pool.state.lock();
        let slot = state.slots[0].as_ref().unwrap();
        assert_eq!(slot.refcount, 0);
        assert!(slot.owner.is_none());
    }

    // Two tasks scheduled on a single worker thread must still exclude each
    // other, including while the holder is suspended at an await point with
    // the context live.
    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn concurrent_tasks_on_one_worker_stay_exclusive() {
        let pool = Arc::new(ContextPool::new(1).unwrap());
        pool.allocate("db=one", None);

        let held = Arc::new(AtomicBool::new(false));
        let released = Arc::new(AtomicBool::new(false));

        let holder = {
            let pool = Arc::clone(&pool);
            let held = Arc::clone(&held);
            let released = Arc::clone(&released);
            tokio::spawn(async move {
                let ctx = pool.acquire(None).await;
                held.store(true, Ordering::SeqCst);
                // suspend mid-operation with the context still held
                tokio::time::sleep(Duration::from_millis(50)).await;
                released.store(true, Ordering::SeqCst);
                drop(ctx);
            })
        };

        while !held.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let waiter = {
            let pool = Arc::clone(&pool);
            let released = Arc::clone(&released);
            tokio::spawn(async move {
                let ctx = pool.acquire(None).await;
                assert!(released.load(Ordering::SeqCst));
                drop(ctx);
            })
        };

        holder.await.unwrap();
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn untagged_acquire_follows_retagged_default() {
        let pool = ContextPool::new(2).unwrap();
        pool.allocate("db=instance", None);
        pool.allocate("db=tenant", Some("tenant-a"));

        assert!(pool.retag_default("instance-1"));

        // both spellings resolve to the same slot now
        let by_default = pool.acquire(None).await;
        assert_eq!(by_default.connection(), "db=instance");
        drop(by_default);

        let by_name = pool.acquire(Some("instance-1")).await;
        assert_eq!(by_name.connection(), "db=instance");
        drop(by_name);
    }

    #[tokio::test]
    async fn second_retag_moves_only_previous_default() {
        let pool = ContextPool::new(2).unwrap();
        pool.allocate("db=instance", None);
        pool.allocate("db=tenant", Some("tenant-a"));

        assert!(pool.retag_default("first"));
        assert!(pool.retag_default("second"));

        let ctx = pool.acquire(Some("second")).await;
        assert_eq!(ctx.connection(), "db=instance");
        drop(ctx);

        // the explicitly-tagged slot kept its tag
        let ctx = pool.acquire(Some("tenant-a")).await;
        assert_eq!(ctx.connection(), "db=tenant");
        drop(ctx);
    }

    #[test]
    fn retag_rejects_empty_tag() {
        let pool = ContextPool::new(1).unwrap();
        assert!(!pool.retag_default(""));
    }

    #[tokio::test]
    async fn tagged_acquire_never_sees_untagged_slot() {
        let pool = ContextPool::new(2).unwrap();
        pool.allocate("db=instance", None);
        pool.allocate("db=tenant", Some("tenant-a"));

        let ctx = pool.acquire(Some("tenant-a")).await;
        assert_eq!(ctx.connection(), "db=tenant");
    }
}
