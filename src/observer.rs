//! Observers and the per-container subscription registry.

use core::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

use flume::{Receiver, Sender, TrySendError};
use portable_atomic_util::Arc;
use spin::Mutex;

use crate::{ObserverError, Snapshot};

/// Capacity of the per-container observer error channel.
pub(crate) const OBSERVER_ERROR_CAPACITY: usize = 64;

type Callback<T> = Box<dyn Fn(&Snapshot<T>) -> Result<(), ObserverError> + Send + Sync>;

struct ObserverFn<T>(Callback<T>);

/// A callback attached to a container.
///
/// View components create one `Observer` when they mount and use the same
/// handle to subscribe and unsubscribe. Clones share identity: subscribing a
/// clone of an already subscribed observer is a no-op.
///
/// A callback that panics is treated like one that returned an
/// [`ObserverError`]: the panic is caught, reported on the container's error
/// channel, and the remaining observers are still notified.
///
/// # Example
///
/// ```rust
/// use oxide_reactive::{create_test_spawner, Container, Observer, Snapshot};
///
/// let container = Container::new(0, create_test_spawner());
/// let observer = Observer::new(|snapshot: &Snapshot<i32>| {
///     println!("rebuild with {}", snapshot.value)
/// });
///
/// container.subscribe(&observer).unwrap();
/// container.set_state(|count| count + 1).unwrap();
/// container.unsubscribe(&observer).unwrap();
/// ```
pub struct Observer<T> {
    callback: Arc<ObserverFn<T>>,
}

impl<T> Clone for Observer<T> {
    fn clone(&self) -> Self {
        Self {
            callback: self.callback.clone(),
        }
    }
}

impl<T: 'static> Observer<T> {
    /// Create an observer that cannot fail.
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&Snapshot<T>) + Send + Sync + 'static,
    {
        Self::fallible(move |snapshot| {
            callback(snapshot);
            Ok(())
        })
    }

    /// Create an observer whose failures are reported on the container's
    /// error channel instead of interrupting the notification pass.
    pub fn fallible<F>(callback: F) -> Self
    where
        F: Fn(&Snapshot<T>) -> Result<(), ObserverError> + Send + Sync + 'static,
    {
        Self {
            callback: Arc::new(ObserverFn(Box::new(callback))),
        }
    }
}

impl<T> Observer<T> {
    /// Whether both handles refer to the same observer.
    pub fn same(&self, other: &Observer<T>) -> bool {
        Arc::ptr_eq(&self.callback, &other.callback)
    }

    fn call(&self, snapshot: &Snapshot<T>) -> Result<(), ObserverError> {
        (self.callback.0)(snapshot)
    }
}

/// Ordered observer list of one container.
///
/// Insertion order is notification order.
pub(crate) struct Subscriptions<T> {
    observers: Mutex<Vec<Observer<T>>>,
    error_sender: Sender<ObserverError>,
    error_receiver: Receiver<ObserverError>,
}

impl<T> Subscriptions<T> {
    pub(crate) fn new() -> Self {
        let (error_sender, error_receiver) = flume::bounded(OBSERVER_ERROR_CAPACITY);
        Self {
            observers: Mutex::new(Vec::new()),
            error_sender,
            error_receiver,
        }
    }

    /// Returns `false` if the observer was already subscribed.
    pub(crate) fn subscribe(&self, observer: &Observer<T>) -> bool {
        let mut observers = self.observers.lock();
        if observers.iter().any(|existing| existing.same(observer)) {
            return false;
        }
        observers.push(observer.clone());
        true
    }

    /// Returns `false` if the observer was not subscribed.
    pub(crate) fn unsubscribe(&self, observer: &Observer<T>) -> bool {
        let mut observers = self.observers.lock();
        let before = observers.len();
        observers.retain(|existing| !existing.same(observer));
        observers.len() != before
    }

    pub(crate) fn contains(&self, observer: &Observer<T>) -> bool {
        self.observers
            .lock()
            .iter()
            .any(|existing| existing.same(observer))
    }

    pub(crate) fn len(&self) -> usize {
        self.observers.lock().len()
    }

    pub(crate) fn clear(&self) {
        self.observers.lock().clear();
    }

    pub(crate) fn errors(&self) -> Receiver<ObserverError> {
        self.error_receiver.clone()
    }

    /// Deliver `snapshot` to every subscribed observer once.
    ///
    /// Iterates the list as it was when the pass started. Observers removed
    /// mid-pass are skipped; observers added mid-pass wait for the next pass.
    /// Returns the number of observers that were called.
    pub(crate) fn notify(&self, snapshot: &Snapshot<T>) -> usize {
        let pass: Vec<Observer<T>> = self.observers.lock().clone();
        let mut delivered = 0;

        for observer in &pass {
            if !self.contains(observer) {
                continue;
            }
            delivered += 1;
            let outcome = catch_unwind(AssertUnwindSafe(|| observer.call(snapshot)))
                .unwrap_or_else(|payload| Err(ObserverError::new(panic_message(&*payload))));
            if let Err(error) = outcome {
                tracing::warn!(%error, "observer failed during notification");
                self.report(error);
            }
        }

        delivered
    }

    fn report(&self, error: ObserverError) {
        match self.error_sender.try_send(error) {
            Ok(()) => {}
            Err(TrySendError::Full(error)) => {
                tracing::warn!(%error, "observer error channel full; dropping report");
            }
            // The receiver lives as long as the sender does.
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("observer panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("observer panicked: {message}")
    } else {
        String::from("observer panicked")
    }
}

#[cfg(any(test, feature = "testing"))]
/// Test observer that captures every snapshot it is notified with.
///
/// Only available with the `testing` feature.
///
/// # Example
///
/// ```rust
/// use oxide_reactive::{create_test_spawner, Container, TestObserver};
///
/// let container = Container::new(0, create_test_spawner());
/// let observer = TestObserver::new();
/// container.subscribe(&observer.observer()).unwrap();
///
/// container.set_state(|count| count + 1).unwrap();
///
/// assert_eq!(observer.count(), 1);
/// observer.with_notifications(|notifications| {
///     assert_eq!(notifications[0].value, 1);
/// });
/// ```
pub struct TestObserver<T> {
    notifications: Arc<Mutex<Vec<Snapshot<T>>>>,
    observer: Observer<T>,
}

#[cfg(any(test, feature = "testing"))]
impl<T> Clone for TestObserver<T> {
    fn clone(&self) -> Self {
        Self {
            notifications: self.notifications.clone(),
            observer: self.observer.clone(),
        }
    }
}

#[cfg(any(test, feature = "testing"))]
impl<T: Clone + Send + 'static> Default for TestObserver<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(any(test, feature = "testing"))]
impl<T: Clone + Send + 'static> TestObserver<T> {
    pub fn new() -> Self {
        let notifications: Arc<Mutex<Vec<Snapshot<T>>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = notifications.clone();
        let observer = Observer::new(move |snapshot: &Snapshot<T>| {
            sink.lock().push(snapshot.clone());
        });
        Self {
            notifications,
            observer,
        }
    }

    /// The observer handle to subscribe. Always the same identity.
    pub fn observer(&self) -> Observer<T> {
        self.observer.clone()
    }

    /// Get the number of notifications received.
    pub fn count(&self) -> usize {
        self.notifications.lock().len()
    }

    /// The most recent snapshot, if any.
    pub fn last(&self) -> Option<Snapshot<T>> {
        self.notifications.lock().last().cloned()
    }

    /// Access the captured snapshots with a closure.
    pub fn with_notifications<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&Vec<Snapshot<T>>) -> R,
    {
        let notifications = self.notifications.lock();
        f(&notifications)
    }
}
