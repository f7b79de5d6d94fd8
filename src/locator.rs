//! Keyed singleton store for containers with dependency reinjection.

use core::any::{type_name, Any, TypeId};
use core::fmt::Display;
use core::future::Future;
use core::sync::atomic::{AtomicBool, Ordering};
use std::collections::HashMap;

use futures::stream::Stream;
use portable_atomic_util::Arc;
use spin::{Mutex, Once};

use crate::container::Creation;
use crate::spawner::SharedSpawner;
use crate::{Container, DisposedError, Key, LocatorError, Observer, Snapshot, Spawner, State};

/// Controls how a dependent container reacts when an upstream notifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReinjectOptions {
    /// Notify the dependent's observers after each recreation.
    pub notify_on_reinject: bool,
    /// Pass the current value to the factory as the previous value.
    pub carry_previous: bool,
}

impl Default for ReinjectOptions {
    fn default() -> Self {
        Self {
            notify_on_reinject: true,
            carry_previous: true,
        }
    }
}

impl ReinjectOptions {
    /// Recreate silently; observers are not told about recreations.
    pub fn suppress_notify(mut self) -> Self {
        self.notify_on_reinject = false;
        self
    }

    /// Always call the factory with `None` as the previous value.
    pub fn without_previous(mut self) -> Self {
        self.carry_previous = false;
        self
    }
}

type Trigger = Box<dyn Fn() + Send + Sync>;
type Detach = Box<dyn FnOnce() + Send>;
type Attach =
    Box<dyn Fn(&Locator, Trigger) -> Result<(Detach, Arc<Node>), LocatorError> + Send + Sync>;

/// Recreation bookkeeping of one registration.
#[derive(Default)]
struct Node {
    /// Set while a recreation is scheduled but has not run yet.
    pending: AtomicBool,
    upstreams: Mutex<Vec<Arc<Node>>>,
}

impl Node {
    /// Whether any direct or transitive upstream still has a recreation
    /// scheduled.
    fn upstream_pending(&self) -> bool {
        let upstreams = self.upstreams.lock().clone();
        upstreams.iter().any(|upstream| {
            upstream.pending.load(Ordering::Acquire) || upstream.upstream_pending()
        })
    }
}

/// Upstream containers a dependent container is recreated from.
///
/// ```rust
/// use oxide_reactive::Dependencies;
///
/// let dependencies = Dependencies::new()
///     .on::<u32>(None)
///     .on::<String>(Some("locale"));
/// assert_eq!(dependencies.len(), 2);
/// ```
#[derive(Default)]
pub struct Dependencies {
    links: Vec<Attach>,
}

impl Dependencies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Depend on the container registered for `U` under `key`.
    pub fn on<U: State>(mut self, key: Option<&str>) -> Self {
        let key = key.map(str::to_owned);
        self.links.push(Box::new(move |locator: &Locator, trigger: Trigger| {
            let upstream = locator.get::<U>(key.as_deref())?;
            let node = locator.node::<U>(key.as_deref());
            let observer = Observer::new(move |_: &Snapshot<U>| trigger());
            upstream.subscribe(&observer)?;
            let detach = Box::new(move || {
                if upstream.unsubscribe(&observer).is_err() {
                    tracing::trace!(upstream = type_name::<U>(), "upstream already disposed");
                }
            }) as Detach;
            Ok((detach, node))
        }));
        self
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    fn attach<T: State>(
        &self,
        locator: &Locator,
        reinjector: &Reinjector<T>,
    ) -> Result<Vec<Detach>, LocatorError> {
        let mut attached = Vec::with_capacity(self.links.len());
        let mut upstreams = Vec::with_capacity(self.links.len());
        for link in &self.links {
            match link(locator, reinjector.trigger()) {
                Ok((detach, node)) => {
                    attached.push(detach);
                    upstreams.push(node);
                }
                Err(error) => {
                    attached.into_iter().for_each(|detach| detach());
                    return Err(error);
                }
            }
        }
        *reinjector.node.upstreams.lock() = upstreams;
        Ok(attached)
    }
}

/// Schedules recreation of a dependent container on the host loop.
///
/// Upstream notifications arriving before the scheduled task runs are merged
/// into that one recreation. The task waits until no upstream, direct or
/// transitive, has a recreation of its own pending, so a dependent is rebuilt
/// from settled inputs only.
struct Reinjector<T> {
    key: Key<T>,
    node: Arc<Node>,
    spawner: SharedSpawner,
    options: ReinjectOptions,
}

impl<T> Clone for Reinjector<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            node: self.node.clone(),
            spawner: self.spawner.clone(),
            options: self.options,
        }
    }
}

impl<T: State> Reinjector<T> {
    fn trigger(&self) -> Trigger {
        let reinjector = self.clone();
        Box::new(move || reinjector.schedule())
    }

    fn schedule(&self) {
        if self.node.pending.swap(true, Ordering::AcqRel) {
            tracing::trace!(dependent = type_name::<T>(), "reinjection already scheduled");
            return;
        }
        self.spawn_recreation();
    }

    fn spawn_recreation(&self) {
        let reinjector = self.clone();
        self.spawner.spawn(Box::pin(async move { reinjector.recreate() }));
    }

    fn recreate(&self) {
        if self.node.upstream_pending() {
            tracing::trace!(dependent = type_name::<T>(), "upstream recreation pending; deferring");
            self.spawn_recreation();
            return;
        }

        self.node.pending.store(false, Ordering::Release);
        let options = self.options;
        if let Err(error) = self
            .key
            .reinject(options.carry_previous, options.notify_on_reinject)
        {
            tracing::debug!(dependent = type_name::<T>(), %error, "skipping reinjection");
        }
    }
}

/// Object-safe view of a `Container<T>` stored in the locator.
trait StoredContainer: Send + Sync {
    fn as_any(&self) -> &dyn Any;

    fn dispose(&self) -> Result<(), DisposedError>;
}

impl<T: State> StoredContainer for Container<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn dispose(&self) -> Result<(), DisposedError> {
        Container::dispose(self)
    }
}

struct Built {
    container: Box<dyn StoredContainer>,
    detach: Vec<Detach>,
}

type Build = Box<dyn Fn(&Locator, &Arc<Node>) -> Result<Built, LocatorError> + Send + Sync>;

struct Entry {
    type_name: &'static str,
    build: Build,
    node: Arc<Node>,
    instance: Once<Box<dyn StoredContainer>>,
    detach: Mutex<Vec<Detach>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EntryKey {
    type_id: TypeId,
    key: Option<String>,
}

impl EntryKey {
    fn of<T: 'static>(key: Option<&str>) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            key: key.map(str::to_owned),
        }
    }
}

struct LocatorInner {
    entries: Mutex<HashMap<EntryKey, Arc<Entry>>>,
    spawner: SharedSpawner,
}

/// Keyed singleton store for containers.
///
/// Registration stores a lazy factory; the container is built on the first
/// [`get`](Self::get) and every later `get` for the same type and key
/// returns the same container until it is [`unregister`](Self::unregister)ed.
/// Clones share the same entries.
///
/// # Example
///
/// ```rust
/// use oxide_reactive::{create_test_spawner, Locator};
///
/// #[derive(Clone, Default)]
/// struct Counter { count: i32 }
///
/// let locator = Locator::new(create_test_spawner());
/// locator.register(None, Counter::default).unwrap();
///
/// let first = locator.get::<Counter>(None).unwrap();
/// first.set_state(|c| Counter { count: c.count + 1 }).unwrap();
///
/// let second = locator.get::<Counter>(None).unwrap();
/// assert!(first.ptr_eq(&second));
/// assert_eq!(second.value().unwrap().count, 1);
/// ```
#[derive(Clone)]
pub struct Locator {
    inner: Arc<LocatorInner>,
}

impl Locator {
    /// Create an empty locator. Every container it builds runs its async
    /// work on `spawner`.
    pub fn new(spawner: impl Spawner + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(LocatorInner {
                entries: Mutex::new(HashMap::new()),
                spawner: SharedSpawner::new(spawner),
            }),
        }
    }

    /// Register a factory for `T` under `key`. Nothing is built yet.
    pub fn register<T, F>(&self, key: Option<&str>, factory: F) -> Result<(), LocatorError>
    where
        T: State,
        F: Fn() -> T + Send + Sync + 'static,
    {
        let factory = Arc::new(factory);
        let spawner = self.inner.spawner.clone();
        self.insert::<T>(
            key,
            Box::new(move |_: &Locator, _: &Arc<Node>| {
                let factory = factory.clone();
                let container = Container::create(
                    Creation::Factory(Box::new(move |_: Option<&T>| factory())),
                    spawner.clone(),
                );
                Ok(Built::alone(container))
            }),
        )
    }

    /// Register a container that starts with `initial` and runs `producer`
    /// once it is first looked up.
    pub fn register_future<T, P, Fut, E>(
        &self,
        key: Option<&str>,
        initial: T,
        producer: P,
    ) -> Result<(), LocatorError>
    where
        T: State,
        P: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let producer = Arc::new(producer);
        let spawner = self.inner.spawner.clone();
        self.insert::<T>(
            key,
            Box::new(move |_: &Locator, _: &Arc<Node>| {
                let producer = producer.clone();
                let creation = Creation::future(initial.clone(), move || producer());
                Ok(Built::alone(Container::create(creation, spawner.clone())))
            }),
        )
    }

    /// Register a container that starts with `initial` and subscribes to
    /// `producer`'s stream once it is first looked up.
    pub fn register_stream<T, P, S, E>(
        &self,
        key: Option<&str>,
        initial: T,
        producer: P,
    ) -> Result<(), LocatorError>
    where
        T: State,
        P: Fn() -> S + Send + Sync + 'static,
        S: Stream<Item = Result<T, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let producer = Arc::new(producer);
        let spawner = self.inner.spawner.clone();
        self.insert::<T>(
            key,
            Box::new(move |_: &Locator, _: &Arc<Node>| {
                let producer = producer.clone();
                let creation = Creation::stream(initial.clone(), move || producer());
                Ok(Built::alone(Container::create(creation, spawner.clone())))
            }),
        )
    }

    /// Register a container recreated whenever one of `dependencies`
    /// notifies.
    ///
    /// `factory` receives the dependent's current value when
    /// [`ReinjectOptions::carry_previous`] is set, `None` on first build and
    /// on [`refresh`](Container::refresh). The upstream containers are looked
    /// up when the dependent is first built.
    pub fn register_dependent<T, F>(
        &self,
        key: Option<&str>,
        dependencies: Dependencies,
        options: ReinjectOptions,
        factory: F,
    ) -> Result<(), LocatorError>
    where
        T: State,
        F: Fn(Option<&T>) -> T + Send + Sync + 'static,
    {
        let factory = Arc::new(factory);
        let spawner = self.inner.spawner.clone();
        self.insert::<T>(
            key,
            Box::new(move |locator: &Locator, node: &Arc<Node>| {
                let factory = factory.clone();
                let container = Container::create(
                    Creation::Factory(Box::new(move |previous: Option<&T>| factory(previous))),
                    spawner.clone(),
                );
                let reinjector = Reinjector {
                    key: container.key(),
                    node: node.clone(),
                    spawner: spawner.clone(),
                    options,
                };
                let detach = dependencies.attach(locator, &reinjector)?;
                Ok(Built {
                    container: Box::new(container),
                    detach,
                })
            }),
        )
    }

    /// The container for `T` under `key`, built on first use.
    ///
    /// Concurrent first lookups wait for the same build, so the factory runs
    /// at most once per registration.
    pub fn get<T: State>(&self, key: Option<&str>) -> Result<Container<T>, LocatorError> {
        let entry = self
            .inner
            .entries
            .lock()
            .get(&EntryKey::of::<T>(key))
            .cloned()
            .ok_or_else(|| LocatorError::NotRegistered {
                type_name: type_name::<T>(),
                key: key.map(str::to_owned),
            })?;

        let stored = entry.instance.try_call_once(|| {
            tracing::debug!(type_name = entry.type_name, ?key, "building container");
            let built = (entry.build)(self, &entry.node)?;
            entry.detach.lock().extend(built.detach);
            Ok::<_, LocatorError>(built.container)
        })?;

        let container = stored
            .as_any()
            .downcast_ref::<Container<T>>()
            .cloned()
            .ok_or(LocatorError::TypeMismatch {
                type_name: entry.type_name,
            })?;
        if container.is_disposed() {
            return Err(DisposedError.into());
        }
        Ok(container)
    }

    /// Dispose the container for `T` under `key` and forget the registration.
    pub fn unregister<T: State>(&self, key: Option<&str>) -> Result<(), LocatorError> {
        let entry = self
            .inner
            .entries
            .lock()
            .remove(&EntryKey::of::<T>(key))
            .ok_or_else(|| LocatorError::NotRegistered {
                type_name: type_name::<T>(),
                key: key.map(str::to_owned),
            })?;

        let detach = core::mem::take(&mut *entry.detach.lock());
        detach.into_iter().for_each(|detach| detach());

        if let Some(container) = entry.instance.get() {
            if container.dispose().is_err() {
                tracing::trace!(type_name = entry.type_name, "container was already disposed");
            }
        }
        tracing::debug!(type_name = entry.type_name, ?key, "unregistered");
        Ok(())
    }

    pub fn contains<T: State>(&self, key: Option<&str>) -> bool {
        self.inner
            .entries
            .lock()
            .contains_key(&EntryKey::of::<T>(key))
    }

    /// Whether the container for `T` under `key` has been built.
    pub fn is_instantiated<T: State>(&self, key: Option<&str>) -> bool {
        self.inner
            .entries
            .lock()
            .get(&EntryKey::of::<T>(key))
            .is_some_and(|entry| entry.instance.is_completed())
    }

    /// Recreation bookkeeping of the registration for `U` under `key`.
    fn node<U: State>(&self, key: Option<&str>) -> Arc<Node> {
        self.inner
            .entries
            .lock()
            .get(&EntryKey::of::<U>(key))
            .map(|entry| entry.node.clone())
            .unwrap_or_else(|| Arc::new(Node::default()))
    }

    fn insert<T: State>(&self, key: Option<&str>, build: Build) -> Result<(), LocatorError> {
        let mut entries = self.inner.entries.lock();
        let entry_key = EntryKey::of::<T>(key);
        if entries.contains_key(&entry_key) {
            return Err(LocatorError::AlreadyRegistered {
                type_name: type_name::<T>(),
                key: key.map(str::to_owned),
            });
        }

        entries.insert(
            entry_key,
            Arc::new(Entry {
                type_name: type_name::<T>(),
                build,
                node: Arc::new(Node::default()),
                instance: Once::new(),
                detach: Mutex::new(Vec::new()),
            }),
        );
        tracing::debug!(type_name = type_name::<T>(), ?key, "registered");
        Ok(())
    }
}

impl Built {
    fn alone<T: State>(container: Container<T>) -> Self {
        Self {
            container: Box::new(container),
            detach: Vec::new(),
        }
    }
}
