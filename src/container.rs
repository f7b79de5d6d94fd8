//! The observable state container and its async adapter.

use core::fmt::Display;
use core::future::Future;

use flume::Receiver;
use futures::future::{AbortHandle, AbortRegistration, Abortable, BoxFuture, FutureExt};
use futures::stream::{BoxStream, Stream, StreamExt};
use portable_atomic_util::{Arc, Weak};
use spin::Mutex;

use crate::observer::Subscriptions;
use crate::spawner::SharedSpawner;
use crate::{
    DisposedError, Key, Observer, ObserverError, Snapshot, Spawner, State, Status, TransitionError,
};

type Factory<T> = Box<dyn Fn(Option<&T>) -> T + Send + Sync>;
type FutureProducer<T> = Box<dyn Fn() -> BoxFuture<'static, Result<T, TransitionError>> + Send + Sync>;
type StreamProducer<T> =
    Box<dyn Fn() -> BoxStream<'static, Result<T, TransitionError>> + Send + Sync>;

/// How a container was first built. Re-run by `refresh` and reinjection.
pub(crate) enum Creation<T> {
    Value(T),
    Factory(Factory<T>),
    Future {
        initial: T,
        producer: FutureProducer<T>,
    },
    Stream {
        initial: T,
        producer: StreamProducer<T>,
    },
}

enum Task<T> {
    Future(BoxFuture<'static, Result<T, TransitionError>>),
    Stream(BoxStream<'static, Result<T, TransitionError>>),
}

struct ModelState<T> {
    value: T,
    status: Status,
    error: Option<TransitionError>,
    /// Bumped by every async launch, reset and dispose. Completions carrying
    /// an older generation are discarded.
    generation: u64,
    /// Bumped by every write of `value`, `status` or `error`.
    revision: u64,
    active: Option<AbortHandle>,
    disposed: bool,
}

impl<T: Clone> ModelState<T> {
    fn snapshot(&self) -> Snapshot<T> {
        Snapshot {
            value: self.value.clone(),
            status: self.status,
            error: self.error.clone(),
        }
    }

    /// Invalidate whatever async task is in flight.
    fn supersede(&mut self) {
        self.generation += 1;
        if let Some(active) = self.active.take() {
            active.abort();
        }
    }
}

pub(crate) struct Inner<T> {
    state: Mutex<ModelState<T>>,
    subscriptions: Subscriptions<T>,
    creation: Creation<T>,
    spawner: SharedSpawner,
}

impl<T: State> Inner<T> {
    fn notify(&self, snapshot: &Snapshot<T>) {
        let delivered = self.subscriptions.notify(snapshot);
        tracing::trace!(status = ?snapshot.status, delivered, "container notified");
    }

    /// Apply the outcome of an async task if it is still current.
    ///
    /// Returns `false` once the task has been superseded or the container
    /// disposed, which ends a stream loop.
    fn settle(&self, generation: u64, outcome: Result<T, TransitionError>) -> bool {
        let snapshot = {
            let mut state = self.state.lock();
            if state.disposed || state.generation != generation {
                tracing::trace!(generation, current = state.generation, "discarding stale completion");
                return false;
            }
            match outcome {
                Ok(value) => {
                    state.value = value;
                    state.status = Status::Data;
                    state.error = None;
                }
                Err(error) => {
                    state.status = Status::Error;
                    state.error = Some(error);
                }
            }
            state.revision += 1;
            state.snapshot()
        };
        self.notify(&snapshot);
        true
    }

    fn settle_weak(
        inner: &Weak<Inner<T>>,
        generation: u64,
        outcome: Result<T, TransitionError>,
    ) -> bool {
        match inner.upgrade() {
            Some(inner) => inner.settle(generation, outcome),
            None => {
                tracing::trace!(generation, "container dropped; ending async transition");
                false
            }
        }
    }

    fn finish(&self, generation: u64) {
        let mut state = self.state.lock();
        if state.generation == generation {
            state.active = None;
        }
    }
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        if let Some(active) = self.state.get_mut().active.take() {
            active.abort();
        }
    }
}

/// An observable state holder.
///
/// Holds a value, a [`Status`] and the last [`TransitionError`]. Every
/// transition ends in exactly one notification of the subscribed
/// [`Observer`]s. Clones refer to the same container; dropping the last one
/// cancels any future or stream still running for it.
///
/// # Example
///
/// ```rust
/// use oxide_reactive::{create_test_spawner, Container, Status};
///
/// let counter = Container::new(0, create_test_spawner());
///
/// counter.set_state(|count| count + 1).unwrap();
/// counter.set_state(|count| count + 1).unwrap();
///
/// let snapshot = counter.snapshot().unwrap();
/// assert_eq!(snapshot.value, 2);
/// assert_eq!(snapshot.status, Status::Data);
/// ```
pub struct Container<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Container<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: State> Container<T> {
    /// Create an idle container holding `initial`.
    ///
    /// `spawner` runs the futures and streams started by
    /// [`run_future`](Self::run_future) and [`run_stream`](Self::run_stream).
    pub fn new(initial: T, spawner: impl Spawner + Send + Sync + 'static) -> Self {
        Self::create(Creation::Value(initial), SharedSpawner::new(spawner))
    }

    /// Create an idle container whose value comes from `factory`.
    ///
    /// [`refresh`](Self::refresh) runs the factory again.
    pub fn from_factory<F>(factory: F, spawner: impl Spawner + Send + Sync + 'static) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::create(
            Creation::Factory(Box::new(move |_: Option<&T>| factory())),
            SharedSpawner::new(spawner),
        )
    }

    /// Create a container holding `initial` and start `producer` right away.
    ///
    /// The container starts out [`Status::Waiting`]. [`refresh`](Self::refresh)
    /// resets it to `initial` and runs the producer again.
    pub fn from_future<P, Fut, E>(
        initial: T,
        producer: P,
        spawner: impl Spawner + Send + Sync + 'static,
    ) -> Self
    where
        P: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        Self::create(
            Creation::future(initial, producer),
            SharedSpawner::new(spawner),
        )
    }

    /// Create a container holding `initial` and subscribe to `producer`'s
    /// stream right away.
    pub fn from_stream<P, S, E>(
        initial: T,
        producer: P,
        spawner: impl Spawner + Send + Sync + 'static,
    ) -> Self
    where
        P: Fn() -> S + Send + Sync + 'static,
        S: Stream<Item = Result<T, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        Self::create(
            Creation::stream(initial, producer),
            SharedSpawner::new(spawner),
        )
    }

    pub(crate) fn create(creation: Creation<T>, spawner: SharedSpawner) -> Self {
        let (value, task) = match &creation {
            Creation::Value(initial) => (initial.clone(), None),
            Creation::Factory(factory) => (factory(None), None),
            Creation::Future { initial, producer } => {
                (initial.clone(), Some(Task::Future(producer())))
            }
            Creation::Stream { initial, producer } => {
                (initial.clone(), Some(Task::Stream(producer())))
            }
        };

        let container = Self {
            inner: Arc::new(Inner {
                state: Mutex::new(ModelState {
                    value,
                    status: Status::Idle,
                    error: None,
                    generation: 0,
                    revision: 0,
                    active: None,
                    disposed: false,
                }),
                subscriptions: Subscriptions::new(),
                creation,
                spawner,
            }),
        };

        if let Some(task) = task {
            // Nobody can be subscribed yet, so there is no one to notify.
            let (handle, registration) = AbortHandle::new_pair();
            {
                let mut state = container.inner.state.lock();
                state.status = Status::Waiting;
                state.active = Some(handle);
            }
            container.spawn(0, registration, task);
        }

        container
    }

    pub(crate) fn from_inner(inner: Arc<Inner<T>>) -> Self {
        Self { inner }
    }

    pub(crate) fn inner(&self) -> &Arc<Inner<T>> {
        &self.inner
    }

    /// Whether both handles refer to the same container.
    pub fn ptr_eq(&self, other: &Container<T>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.state.lock().disposed
    }

    /// The current `(value, status, error)` triple.
    pub fn snapshot(&self) -> Result<Snapshot<T>, DisposedError> {
        let state = self.inner.state.lock();
        if state.disposed {
            return Err(DisposedError);
        }
        Ok(state.snapshot())
    }

    pub fn value(&self) -> Result<T, DisposedError> {
        let state = self.inner.state.lock();
        if state.disposed {
            return Err(DisposedError);
        }
        Ok(state.value.clone())
    }

    pub fn status(&self) -> Result<Status, DisposedError> {
        let state = self.inner.state.lock();
        if state.disposed {
            return Err(DisposedError);
        }
        Ok(state.status)
    }

    pub fn error(&self) -> Result<Option<TransitionError>, DisposedError> {
        let state = self.inner.state.lock();
        if state.disposed {
            return Err(DisposedError);
        }
        Ok(state.error.clone())
    }

    /// A non-owning handle for imperative control of this container.
    pub fn key(&self) -> Key<T> {
        Key::new(self)
    }

    /// Attach an observer. Returns `false` if it was already attached.
    pub fn subscribe(&self, observer: &Observer<T>) -> Result<bool, DisposedError> {
        self.ensure_live()?;
        Ok(self.inner.subscriptions.subscribe(observer))
    }

    /// Detach an observer. Safe to call from inside a notification.
    pub fn unsubscribe(&self, observer: &Observer<T>) -> Result<bool, DisposedError> {
        self.ensure_live()?;
        Ok(self.inner.subscriptions.unsubscribe(observer))
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscriptions.len()
    }

    /// Failures reported by observers of this container.
    pub fn observer_errors(&self) -> Receiver<ObserverError> {
        self.inner.subscriptions.errors()
    }

    /// Notify every observer with the current snapshot.
    pub fn notify(&self) -> Result<(), DisposedError> {
        let snapshot = self.snapshot()?;
        self.inner.notify(&snapshot);
        Ok(())
    }

    /// Install the value returned by `mutator` and notify once.
    ///
    /// The mutator runs without the container locked, so it may read this or
    /// any other container. It must not write to this container: a write that
    /// lands between the read and the commit (from the mutator or from another
    /// thread) is overwritten by the mutator's result.
    pub fn set_state<F>(&self, mutator: F) -> Result<(), DisposedError>
    where
        F: FnOnce(&T) -> T,
    {
        self.try_set_state(|value| Ok::<_, core::convert::Infallible>(mutator(value)))
    }

    /// Like [`set_state`](Self::set_state) with a fallible mutator.
    ///
    /// An `Err` moves the container to [`Status::Error`] with the value left
    /// untouched; observers are notified either way. Only a disposed
    /// container makes this return `Err`.
    pub fn try_set_state<F, E>(&self, mutator: F) -> Result<(), DisposedError>
    where
        F: FnOnce(&T) -> Result<T, E>,
        E: Display,
    {
        let (current, read_at) = {
            let state = self.inner.state.lock();
            if state.disposed {
                return Err(DisposedError);
            }
            (state.value.clone(), state.revision)
        };
        let outcome = mutator(&current).map_err(TransitionError::new);

        let snapshot = {
            let mut state = self.inner.state.lock();
            if state.disposed {
                return Err(DisposedError);
            }
            if state.revision != read_at {
                tracing::warn!(
                    read_at,
                    current = state.revision,
                    "container changed while the mutator ran; overwriting that change"
                );
            }
            match outcome {
                Ok(value) => {
                    state.value = value;
                    state.status = Status::Data;
                    state.error = None;
                }
                Err(error) => {
                    tracing::trace!(%error, "mutator failed");
                    state.status = Status::Error;
                    state.error = Some(error);
                }
            }
            state.revision += 1;
            state.snapshot()
        };

        self.inner.notify(&snapshot);
        Ok(())
    }

    /// Move to [`Status::Waiting`], then install the future's result.
    ///
    /// A later `run_future`, `run_stream`, `refresh` or `dispose` supersedes
    /// this call: its result is discarded whenever it arrives.
    pub fn run_future<P, Fut, E>(&self, producer: P) -> Result<(), DisposedError>
    where
        P: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        self.ensure_live()?;
        let future = producer();
        self.launch(Task::Future(
            async move { future.await.map_err(TransitionError::new) }.boxed(),
        ))
    }

    /// Move to [`Status::Waiting`], then install every item of the stream.
    ///
    /// `Err` items move the container to [`Status::Error`]; the stream keeps
    /// being consumed. When the stream ends the last state stays in place.
    pub fn run_stream<P, S, E>(&self, producer: P) -> Result<(), DisposedError>
    where
        P: FnOnce() -> S,
        S: Stream<Item = Result<T, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        self.ensure_live()?;
        let stream = producer();
        self.launch(Task::Stream(
            stream.map(|item| item.map_err(TransitionError::new)).boxed(),
        ))
    }

    /// Reset to the state the creation logic produces and notify.
    ///
    /// Plain values and factories reset to [`Status::Idle`]; future and stream
    /// containers reset to their initial value and run their producer again.
    pub fn refresh(&self) -> Result<(), DisposedError> {
        self.ensure_live()?;
        match &self.inner.creation {
            Creation::Value(initial) => self.reset(initial.clone(), true),
            Creation::Factory(factory) => self.reset(factory(None), true),
            Creation::Future { initial, producer } => {
                self.reset(initial.clone(), false)?;
                self.launch(Task::Future(producer()))
            }
            Creation::Stream { initial, producer } => {
                self.reset(initial.clone(), false)?;
                self.launch(Task::Stream(producer()))
            }
        }
    }

    /// Re-run the factory after an upstream dependency changed.
    pub(crate) fn reinject(&self, carry_previous: bool, notify: bool) -> Result<(), DisposedError> {
        let Creation::Factory(factory) = &self.inner.creation else {
            return self.refresh();
        };

        let previous = if carry_previous {
            Some(self.value()?)
        } else {
            None
        };
        let value = factory(previous.as_ref());
        tracing::debug!(notify, "container reinjected");
        self.reset(value, notify)
    }

    /// Cancel any active task, drop every observer and make the container
    /// inert.
    pub fn dispose(&self) -> Result<(), DisposedError> {
        {
            let mut state = self.inner.state.lock();
            if state.disposed {
                return Err(DisposedError);
            }
            state.disposed = true;
            state.supersede();
        }
        self.inner.subscriptions.clear();
        tracing::debug!("container disposed");
        Ok(())
    }

    fn ensure_live(&self) -> Result<(), DisposedError> {
        if self.is_disposed() {
            return Err(DisposedError);
        }
        Ok(())
    }

    fn reset(&self, value: T, notify: bool) -> Result<(), DisposedError> {
        let snapshot = {
            let mut state = self.inner.state.lock();
            if state.disposed {
                return Err(DisposedError);
            }
            state.supersede();
            state.value = value;
            state.status = Status::Idle;
            state.error = None;
            state.revision += 1;
            state.snapshot()
        };
        if notify {
            self.inner.notify(&snapshot);
        }
        Ok(())
    }

    fn launch(&self, task: Task<T>) -> Result<(), DisposedError> {
        let (handle, registration) = AbortHandle::new_pair();
        let (generation, snapshot) = {
            let mut state = self.inner.state.lock();
            if state.disposed {
                return Err(DisposedError);
            }
            state.supersede();
            state.active = Some(handle);
            state.status = Status::Waiting;
            state.error = None;
            state.revision += 1;
            (state.generation, state.snapshot())
        };

        tracing::trace!(generation, "async transition started");
        self.inner.notify(&snapshot);
        self.spawn(generation, registration, task);
        Ok(())
    }

    fn spawn(&self, generation: u64, registration: AbortRegistration, task: Task<T>) {
        // The task must not keep the container alive once every handle is gone.
        let inner = Arc::downgrade(&self.inner);
        let work = async move {
            match task {
                Task::Future(future) => {
                    let outcome = future.await;
                    if !Inner::settle_weak(&inner, generation, outcome) {
                        return;
                    }
                }
                Task::Stream(mut stream) => {
                    while let Some(item) = stream.next().await {
                        if !Inner::settle_weak(&inner, generation, item) {
                            return;
                        }
                    }
                }
            }
            if let Some(inner) = inner.upgrade() {
                inner.finish(generation);
            }
        };

        let task = Abortable::new(work, registration);
        self.inner.spawner.spawn(Box::pin(async move {
            // Aborted means superseded or disposed; nothing left to do.
            let _ = task.await;
        }));
    }
}

impl<T: State> Creation<T> {
    pub(crate) fn future<P, Fut, E>(initial: T, producer: P) -> Self
    where
        P: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        Creation::Future {
            initial,
            producer: Box::new(move || {
                let future = producer();
                async move { future.await.map_err(TransitionError::new) }.boxed()
            }),
        }
    }

    pub(crate) fn stream<P, S, E>(initial: T, producer: P) -> Self
    where
        P: Fn() -> S + Send + Sync + 'static,
        S: Stream<Item = Result<T, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        Creation::Stream {
            initial,
            producer: Box::new(move || {
                producer()
                    .map(|item| item.map_err(TransitionError::new))
                    .boxed()
            }),
        }
    }
}
