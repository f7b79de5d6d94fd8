//! Host event loop abstraction used to run async producers.

use core::future::Future;
use core::pin::Pin;

use portable_atomic_util::Arc;

#[cfg(any(test, feature = "testing"))]
use spin::Mutex;

/// A spawner trait for executing futures on the host's event loop.
///
/// Containers hand every future and stream task to the spawner they were
/// created with, so you can drive them from whatever loop owns the UI
/// (tokio, async-std, a glib main context, etc.).
///
/// Function pointers and closures automatically implement this trait via the blanket implementation.
pub trait Spawner {
    /// Spawn a future on the host loop.
    fn spawn(&self, future: Pin<Box<dyn Future<Output = ()> + Send>>);
}

/// Implement Spawner for any callable type that matches the signature.
///
/// This includes function pointers, closures, and function items.
impl<F> Spawner for F
where
    F: Fn(Pin<Box<dyn Future<Output = ()> + Send>>),
{
    fn spawn(&self, future: Pin<Box<dyn Future<Output = ()> + Send>>) {
        self(future)
    }
}

/// Clonable spawner shared by a locator and every container it creates.
#[derive(Clone)]
pub(crate) struct SharedSpawner(Arc<Box<dyn Spawner + Send + Sync>>);

impl SharedSpawner {
    pub(crate) fn new(spawner: impl Spawner + Send + Sync + 'static) -> Self {
        Self(Arc::new(Box::new(spawner)))
    }
}

impl Spawner for SharedSpawner {
    fn spawn(&self, future: Pin<Box<dyn Future<Output = ()> + Send>>) {
        self.0.spawn(future)
    }
}

#[cfg(any(test, feature = "testing"))]
/// Test spawner function that executes futures synchronously.
///
/// This blocks on the future immediately rather than spawning it on an async runtime.
pub fn test_spawner_fn(fut: Pin<Box<dyn Future<Output = ()> + Send>>) {
    // Execute the future synchronously for deterministic testing
    futures::executor::block_on(fut);
}

#[cfg(any(test, feature = "testing"))]
/// Creates a test spawner that executes futures synchronously.
///
/// Futures complete inside the call that started them, so a `run_future`
/// with an already-resolved producer has settled by the time it returns.
/// Use a [`TestExecutor`] when the test needs to control completion order.
pub fn create_test_spawner() -> fn(Pin<Box<dyn Future<Output = ()> + Send>>) {
    test_spawner_fn
}

#[cfg(any(test, feature = "testing"))]
type QueuedTask = Pin<Box<dyn Future<Output = ()> + Send>>;

#[cfg(any(test, feature = "testing"))]
/// Spawner half of a [`TestExecutor`].
///
/// Only queues futures; nothing runs until the executor is driven.
#[derive(Clone)]
pub struct TestSpawner {
    queue: Arc<Mutex<Vec<QueuedTask>>>,
}

#[cfg(any(test, feature = "testing"))]
impl Spawner for TestSpawner {
    fn spawn(&self, future: Pin<Box<dyn Future<Output = ()> + Send>>) {
        self.queue.lock().push(future);
    }
}

#[cfg(any(test, feature = "testing"))]
/// Manually driven single-threaded executor for tests.
///
/// Only available with the `testing` feature or during tests.
///
/// Stands in for the host event loop: spawned futures are queued and only
/// polled when [`run_until_stalled`](Self::run_until_stalled) is called,
/// which gives tests precise control over when async producers resume.
///
/// ```rust
/// use oxide_reactive::{Container, TestExecutor};
///
/// let mut executor = TestExecutor::new();
/// let container = Container::new(0, executor.spawner());
///
/// container.run_future(|| async { Ok::<_, String>(42) }).unwrap();
/// assert!(container.status().unwrap().is_waiting());
///
/// executor.run_until_stalled();
/// assert_eq!(container.value().unwrap(), 42);
/// ```
pub struct TestExecutor {
    queue: Arc<Mutex<Vec<QueuedTask>>>,
    pool: futures::executor::LocalPool,
}

#[cfg(any(test, feature = "testing"))]
impl Default for TestExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(any(test, feature = "testing"))]
impl TestExecutor {
    pub fn new() -> Self {
        Self {
            queue: Arc::new(Mutex::new(Vec::new())),
            pool: futures::executor::LocalPool::new(),
        }
    }

    /// Get a spawner that feeds this executor.
    pub fn spawner(&self) -> TestSpawner {
        TestSpawner {
            queue: self.queue.clone(),
        }
    }

    /// Number of spawned futures not yet handed to the pool.
    pub fn queued(&self) -> usize {
        self.queue.lock().len()
    }

    /// Poll every spawned future until none of them can make progress.
    ///
    /// Futures spawned while running (e.g. a scheduled reinjection) are
    /// picked up in the same call.
    pub fn run_until_stalled(&mut self) {
        use futures::task::SpawnExt;

        loop {
            let tasks = core::mem::take(&mut *self.queue.lock());
            let spawner = self.pool.spawner();
            for task in tasks {
                spawner
                    .spawn(task)
                    .expect("local pool is owned by the executor and never shut down");
            }

            self.pool.run_until_stalled();

            if self.queue.lock().is_empty() {
                break;
            }
        }
    }
}
