//! Per-path operation queues.
//!
//! The registry maps a path string to an [`OperationChain`]. Each chain keeps
//! the completion signal of the last operation enqueued for its path; a new
//! operation takes that signal, installs its own, and waits for the
//! predecessor before it runs. The swap happens under a short per-chain lock,
//! so appends from concurrent callers are never lost, and the operation
//! itself always runs with no lock held.
//!
//! Keys are compared as exact strings. `"./a.txt"` and `"a.txt"` name two
//! different queues even though they refer to the same file.

use std::fmt;
use std::future::Future;
use std::ops::Deref;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::config::Config;
use crate::encoding::Encoding;
use crate::error::{FileError, Result};

/// How an operation reacts to the failure of the operation before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChainPolicy {
    /// Run whether or not the predecessor failed.
    #[default]
    ContinueRegardless,
    /// Run only if the predecessor succeeded. Otherwise resolve with
    /// [`FileError::PredecessorFailed`] and count as failed for the next link.
    ContinueOnSuccess,
}

/// What happens to a path's entry once nothing uses it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RetentionPolicy {
    /// Drop the entry when it has no pending operations and no live handle.
    #[default]
    EvictIdle,
    /// Keep every entry for the lifetime of the registry.
    Retain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Succeeded,
    Failed,
}

/// The queue of one path.
#[derive(Debug)]
pub struct OperationChain {
    key: String,
    /// Completion signal of the most recently enqueued operation.
    /// `None` means everything enqueued so far has already been observed.
    tail: Mutex<Option<oneshot::Receiver<Outcome>>>,
    pending: AtomicUsize,
    handles: AtomicUsize,
}

impl OperationChain {
    fn new(key: String) -> Self {
        Self {
            key,
            tail: Mutex::new(None),
            pending: AtomicUsize::new(0),
            handles: AtomicUsize::new(0),
        }
    }

    /// Path key of this chain.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Number of operations enqueued but not yet finished.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// True when every enqueued operation has finished.
    pub fn is_idle(&self) -> bool {
        self.pending() == 0
    }

    fn is_evictable(&self) -> bool {
        self.is_idle() && self.handles.load(Ordering::Acquire) == 0
    }

    /// Take the current tail and install a new one.
    fn link(&self) -> (Option<oneshot::Receiver<Outcome>>, oneshot::Sender<Outcome>) {
        let (done_tx, done_rx) = oneshot::channel();
        let previous = self.tail.lock().replace(done_rx);
        (previous, done_tx)
    }
}

/// Defaults applied to handles created from a registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryOptions {
    /// Entry retention.
    pub retention: RetentionPolicy,
    /// Encoding used by handles that do not specify one.
    pub encoding: Encoding,
    /// Mode for directories created ahead of writes.
    pub dir_mode: Option<u32>,
}

impl RegistryOptions {
    /// Set the retention policy.
    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    /// Set the default encoding.
    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Set the mode for auto-created directories.
    pub fn with_dir_mode(mut self, mode: u32) -> Self {
        self.dir_mode = Some(mode);
        self
    }
}

#[derive(Debug)]
struct RegistryInner {
    chains: DashMap<String, Arc<OperationChain>>,
    options: RegistryOptions,
}

/// Mapping from path string to its operation chain.
///
/// Cloning is cheap and every clone shares the same queues. Separate
/// registries are fully isolated from each other, which is what tests want;
/// code that needs ordering across components must hand them the same one.
#[derive(Debug, Clone)]
pub struct PathQueueRegistry {
    inner: Arc<RegistryInner>,
}

impl Default for PathQueueRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PathQueueRegistry {
    /// Create an empty registry with default options.
    pub fn new() -> Self {
        Self::with_options(RegistryOptions::default())
    }

    /// Create an empty registry with the given options.
    pub fn with_options(options: RegistryOptions) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                chains: DashMap::new(),
                options,
            }),
        }
    }

    /// Create an empty registry configured from `config`.
    pub fn from_config(config: &Config) -> Self {
        Self::with_options(config.registry_options())
    }

    /// Options this registry was built with.
    pub fn options(&self) -> &RegistryOptions {
        &self.inner.options
    }

    /// Entry retention policy.
    pub fn retention(&self) -> RetentionPolicy {
        self.inner.options.retention
    }

    /// Return the chain for `path`, creating an idle one if absent.
    ///
    /// The returned reference pins the entry like a live handle does, so an
    /// entry created here is evicted once the reference and every operation
    /// on the path are gone.
    pub fn chain_for(&self, path: &str) -> ChainRef {
        ChainRef {
            registry: self.clone(),
            chain: self.attach_handle(path),
        }
    }

    /// Enqueue `operation` on the chain for `path`.
    ///
    /// The operation starts on a Tokio task as soon as its predecessor
    /// finishes, whether or not the returned future is polled. The future
    /// resolves with this operation's result only.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn extend<T, F>(&self, path: &str, policy: ChainPolicy, operation: F) -> Pending<T>
    where
        T: Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let chain = {
            let entry = self
                .inner
                .chains
                .entry(path.to_string())
                .or_insert_with(|| Arc::new(OperationChain::new(path.to_string())));
            // Reserved under the shard lock so eviction cannot race the lookup.
            entry.pending.fetch_add(1, Ordering::AcqRel);
            Arc::clone(entry.value())
        };
        self.spawn_link(chain, policy, operation)
    }

    /// Enqueue on a chain the caller keeps alive through a handle.
    pub(crate) fn enqueue<T, F>(
        &self,
        chain: &Arc<OperationChain>,
        policy: ChainPolicy,
        operation: F,
    ) -> Pending<T>
    where
        T: Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        chain.pending.fetch_add(1, Ordering::AcqRel);
        self.spawn_link(Arc::clone(chain), policy, operation)
    }

    fn spawn_link<T, F>(
        &self,
        chain: Arc<OperationChain>,
        policy: ChainPolicy,
        operation: F,
    ) -> Pending<T>
    where
        T: Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let (previous, done) = chain.link();
        let (result_tx, result_rx) = oneshot::channel();
        let path = chain.key().to_string();

        debug!(path = %path, pending = chain.pending(), policy = ?policy, "Enqueued operation");

        let guard = LinkGuard {
            registry: self.clone(),
            chain,
            done: Some(done),
            outcome: Outcome::Failed,
        };

        tokio::spawn(async move {
            let mut guard = guard;
            let predecessor = match previous {
                Some(rx) => rx.await.unwrap_or(Outcome::Failed),
                None => Outcome::Succeeded,
            };

            let result = if policy == ChainPolicy::ContinueOnSuccess
                && predecessor == Outcome::Failed
            {
                trace!(path = %guard.chain.key(), "Skipping operation after failed predecessor");
                Err(FileError::PredecessorFailed {
                    path: guard.chain.key().to_string(),
                })
            } else {
                trace!(path = %guard.chain.key(), "Running operation");
                operation.await
            };

            guard.outcome = if result.is_ok() {
                Outcome::Succeeded
            } else {
                Outcome::Failed
            };
            // Release the slot before reporting so the caller observes a
            // settled chain once its future resolves.
            drop(guard);
            let _ = result_tx.send(result);
        });

        Pending {
            path,
            rx: result_rx,
        }
    }

    /// Register a live handle on `path` and return its chain.
    pub(crate) fn attach_handle(&self, path: &str) -> Arc<OperationChain> {
        let entry = self
            .inner
            .chains
            .entry(path.to_string())
            .or_insert_with(|| Arc::new(OperationChain::new(path.to_string())));
        entry.handles.fetch_add(1, Ordering::AcqRel);
        Arc::clone(entry.value())
    }

    /// Count one more live handle on a chain that already has one.
    pub(crate) fn retain_handle(&self, chain: &OperationChain) {
        chain.handles.fetch_add(1, Ordering::AcqRel);
    }

    /// Forget a live handle and evict its chain if nothing else uses it.
    pub(crate) fn release_handle(&self, chain: &OperationChain) {
        chain.handles.fetch_sub(1, Ordering::AcqRel);
        self.evict_if_idle(chain.key());
    }

    fn evict_if_idle(&self, path: &str) {
        if self.inner.options.retention == RetentionPolicy::Retain {
            return;
        }
        if self
            .inner
            .chains
            .remove_if(path, |_, chain| chain.is_evictable())
            .is_some()
        {
            debug!(path = %path, "Evicted idle queue");
        }
    }

    /// Number of paths with an entry.
    pub fn len(&self) -> usize {
        self.inner.chains.len()
    }

    /// True if no path has an entry.
    pub fn is_empty(&self) -> bool {
        self.inner.chains.is_empty()
    }

    /// True if `path` has an entry.
    pub fn contains(&self, path: &str) -> bool {
        self.inner.chains.contains_key(path)
    }

    /// Operations enqueued on `path` that have not finished yet.
    pub fn pending(&self, path: &str) -> usize {
        self.inner
            .chains
            .get(path)
            .map(|chain| chain.pending())
            .unwrap_or(0)
    }
}

/// Counted reference to a path's [`OperationChain`].
///
/// Keeps the entry in the registry while alive.
pub struct ChainRef {
    registry: PathQueueRegistry,
    chain: Arc<OperationChain>,
}

impl ChainRef {
    /// True if both references point at the same chain.
    pub fn ptr_eq(a: &ChainRef, b: &ChainRef) -> bool {
        Arc::ptr_eq(&a.chain, &b.chain)
    }
}

impl Deref for ChainRef {
    type Target = OperationChain;

    fn deref(&self) -> &OperationChain {
        &self.chain
    }
}

impl Clone for ChainRef {
    fn clone(&self) -> Self {
        self.registry.retain_handle(&self.chain);
        Self {
            registry: self.registry.clone(),
            chain: Arc::clone(&self.chain),
        }
    }
}

impl Drop for ChainRef {
    fn drop(&mut self) {
        self.registry.release_handle(&self.chain);
    }
}

impl fmt::Debug for ChainRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ChainRef").field(&self.chain).finish()
    }
}

/// Bookkeeping for one enqueued operation.
///
/// Dropping it, including during a panic in the operation, frees the slot
/// and wakes the successor.
struct LinkGuard {
    registry: PathQueueRegistry,
    chain: Arc<OperationChain>,
    done: Option<oneshot::Sender<Outcome>>,
    outcome: Outcome,
}

impl Drop for LinkGuard {
    fn drop(&mut self) {
        self.chain.pending.fetch_sub(1, Ordering::AcqRel);
        if let Some(done) = self.done.take() {
            // The successor may have been the last thing holding the tail.
            let _ = done.send(self.outcome);
        }
        if std::thread::panicking() {
            warn!(path = %self.chain.key(), "Operation panicked");
        }
        self.registry.evict_if_idle(self.chain.key());
    }
}

/// Completion of one enqueued operation.
///
/// Dropping this does not cancel the operation.
#[derive(Debug)]
#[must_use = "the operation runs anyway, but its result is lost"]
pub struct Pending<T> {
    path: String,
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> Pending<T> {
    /// Path key the operation was enqueued on.
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl<T> Future for Pending<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(FileError::Aborted {
                path: this.path.clone(),
            })),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::time::Duration;

    fn failing() -> FileError {
        FileError::from_io("k", io::Error::from(io::ErrorKind::PermissionDenied))
    }

    #[test]
    fn test_chain_for_is_shared_per_key() {
        let registry = PathQueueRegistry::new();
        let a = registry.chain_for("a.txt");
        let b = registry.chain_for("a.txt");
        let c = registry.chain_for("./a.txt");

        assert!(ChainRef::ptr_eq(&a, &b));
        assert!(!ChainRef::ptr_eq(&a, &c));
        assert_eq!(registry.len(), 2);
        assert!(a.is_idle());
        assert_eq!(a.key(), "a.txt");
    }

    #[test]
    fn test_chain_for_entries_are_evicted_on_drop() {
        let registry = PathQueueRegistry::new();
        for i in 0..100 {
            drop(registry.chain_for(&format!("p{i}")));
        }
        assert!(registry.is_empty());

        let chain = registry.chain_for("kept");
        let copy = chain.clone();
        drop(chain);
        assert!(registry.contains("kept"));
        drop(copy);
        assert!(!registry.contains("kept"));
    }

    #[test]
    fn test_chain_for_entries_survive_under_retain() {
        let registry = PathQueueRegistry::with_options(
            RegistryOptions::default().with_retention(RetentionPolicy::Retain),
        );
        drop(registry.chain_for("p"));
        assert!(registry.contains("p"));
    }

    #[tokio::test]
    async fn test_chain_for_keeps_entry_across_operations() {
        let registry = PathQueueRegistry::new();
        let chain = registry.chain_for("k");
        registry
            .extend("k", ChainPolicy::ContinueRegardless, async { Ok(()) })
            .await
            .unwrap();
        assert!(registry.contains("k"));
        assert!(chain.is_idle());
        drop(chain);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_registries_are_isolated() {
        let one = PathQueueRegistry::new();
        let two = PathQueueRegistry::new();
        let _x = one.chain_for("x");
        assert!(one.contains("x"));
        assert!(!two.contains("x"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_operations_run_in_issue_order() {
        let registry = PathQueueRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let pendings: Vec<_> = (0..20u64)
            .map(|i| {
                let log = Arc::clone(&log);
                registry.extend("k", ChainPolicy::ContinueRegardless, async move {
                    // Earlier operations sleep longer; order must still hold.
                    tokio::time::sleep(Duration::from_millis(20 - i)).await;
                    log.lock().push(i);
                    Ok(i)
                })
            })
            .collect();

        for (i, pending) in pendings.into_iter().enumerate() {
            assert_eq!(pending.await.unwrap(), i as u64);
        }
        assert_eq!(*log.lock(), (0..20).collect::<Vec<_>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_operations_never_overlap() {
        let registry = PathQueueRegistry::new();
        let running = Arc::new(AtomicUsize::new(0));

        let pendings: Vec<_> = (0..16)
            .map(|_| {
                let running = Arc::clone(&running);
                registry.extend("k", ChainPolicy::ContinueRegardless, async move {
                    assert_eq!(running.fetch_add(1, Ordering::SeqCst), 0);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
            })
            .collect();

        for pending in pendings {
            pending.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_failure_does_not_block_queue() {
        let registry = PathQueueRegistry::new();
        let first: Pending<()> =
            registry.extend("k", ChainPolicy::ContinueRegardless, async { Err(failing()) });
        let second = registry.extend("k", ChainPolicy::ContinueRegardless, async { Ok(7) });

        assert!(first.await.is_err());
        assert_eq!(second.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_continue_on_success_skips_after_failure() {
        let registry = PathQueueRegistry::new();
        let ran = Arc::new(AtomicUsize::new(0));

        let first: Pending<()> =
            registry.extend("k", ChainPolicy::ContinueRegardless, async { Err(failing()) });
        let ran2 = Arc::clone(&ran);
        let second = registry.extend("k", ChainPolicy::ContinueOnSuccess, async move {
            ran2.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        // The skipped link counts as failed, so this one is skipped too.
        let ran3 = Arc::clone(&ran);
        let third = registry.extend("k", ChainPolicy::ContinueOnSuccess, async move {
            ran3.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let fourth = registry.extend("k", ChainPolicy::ContinueRegardless, async { Ok(()) });

        assert!(first.await.is_err());
        assert!(matches!(
            second.await,
            Err(FileError::PredecessorFailed { .. })
        ));
        assert!(matches!(third.await, Err(FileError::PredecessorFailed { .. })));
        assert!(fourth.await.is_ok());
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_continue_on_success_runs_after_success() {
        let registry = PathQueueRegistry::new();
        let first = registry.extend("k", ChainPolicy::ContinueRegardless, async { Ok(1) });
        let second = registry.extend("k", ChainPolicy::ContinueOnSuccess, async { Ok(2) });
        assert_eq!(first.await.unwrap(), 1);
        assert_eq!(second.await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_panic_reports_aborted_and_frees_queue() {
        let registry = PathQueueRegistry::new();
        let explode = true;
        let first: Pending<()> = registry.extend("k", ChainPolicy::ContinueRegardless, async move {
            if explode {
                panic!("boom");
            }
            Ok(())
        });
        let second = registry.extend("k", ChainPolicy::ContinueOnSuccess, async { Ok(()) });
        let third = registry.extend("k", ChainPolicy::ContinueRegardless, async { Ok(3) });

        assert!(matches!(first.await, Err(FileError::Aborted { .. })));
        assert!(matches!(
            second.await,
            Err(FileError::PredecessorFailed { .. })
        ));
        assert_eq!(third.await.unwrap(), 3);
        assert!(registry.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_distinct_paths_do_not_block_each_other() {
        let registry = PathQueueRegistry::new();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        // Blocks path "a" until released.
        let blocked = registry.extend("a", ChainPolicy::ContinueRegardless, async move {
            let _ = release_rx.await;
            Ok(())
        });
        let other = registry.extend("b", ChainPolicy::ContinueRegardless, async { Ok("b") });

        let done = tokio::time::timeout(Duration::from_secs(5), other)
            .await
            .expect("path b must not wait for path a");
        assert_eq!(done.unwrap(), "b");
        assert_eq!(registry.pending("a"), 1);

        release_tx.send(()).unwrap();
        blocked.await.unwrap();
    }

    #[tokio::test]
    async fn test_idle_entries_are_evicted() {
        let registry = PathQueueRegistry::new();
        let pending = registry.extend("k", ChainPolicy::ContinueRegardless, async { Ok(()) });
        assert!(registry.contains("k"));
        pending.await.unwrap();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_retain_policy_keeps_entries() {
        let registry = PathQueueRegistry::with_options(
            RegistryOptions::default().with_retention(RetentionPolicy::Retain),
        );
        for path in ["a", "b", "a"] {
            registry
                .extend(path, ChainPolicy::ContinueRegardless, async { Ok(()) })
                .await
                .unwrap();
        }
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.retention(), RetentionPolicy::Retain);
    }

    #[tokio::test]
    async fn test_live_handle_keeps_entry() {
        let registry = PathQueueRegistry::new();
        let chain = registry.attach_handle("k");
        registry
            .enqueue(&chain, ChainPolicy::ContinueRegardless, async { Ok(()) })
            .await
            .unwrap();
        assert!(registry.contains("k"));

        registry.release_handle(&chain);
        assert!(!registry.contains("k"));
    }

    #[tokio::test]
    async fn test_dropped_pending_still_runs() {
        let registry = PathQueueRegistry::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = Arc::clone(&ran);
        drop(registry.extend("k", ChainPolicy::ContinueRegardless, async move {
            ran2.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
        registry
            .extend("k", ChainPolicy::ContinueRegardless, async { Ok(()) })
            .await
            .unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
