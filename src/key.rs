//! Non-owning handles for imperative control of a container.

use portable_atomic_util::{Arc, Weak};

use crate::container::Inner;
use crate::{Container, DisposedError, Snapshot, State};

/// A stable reference to a [`Container`] that does not keep it alive.
///
/// Keys let code outside the subscribe/observe path read, replace, refresh
/// or re-notify a container. Once the container is disposed (directly or via
/// [`Locator::unregister`](crate::Locator::unregister)) or dropped, every
/// operation fails with [`DisposedError`].
///
/// # Example
///
/// ```rust
/// use oxide_reactive::{create_test_spawner, Container};
///
/// let container = Container::from_factory(|| 10, create_test_spawner());
/// let key = container.key();
///
/// key.set_value(3).unwrap();
/// assert_eq!(key.value().unwrap(), 3);
///
/// key.refresh().unwrap();
/// assert_eq!(key.value().unwrap(), 10);
///
/// container.dispose().unwrap();
/// assert!(key.value().is_err());
/// ```
pub struct Key<T> {
    inner: Weak<Inner<T>>,
}

impl<T> Clone for Key<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: State> Key<T> {
    pub(crate) fn new(container: &Container<T>) -> Self {
        Self {
            inner: Arc::downgrade(container.inner()),
        }
    }

    /// The referenced container, if it is still alive and not disposed.
    pub fn container(&self) -> Result<Container<T>, DisposedError> {
        let container = self
            .inner
            .upgrade()
            .map(Container::from_inner)
            .ok_or(DisposedError)?;
        if container.is_disposed() {
            return Err(DisposedError);
        }
        Ok(container)
    }

    pub fn is_valid(&self) -> bool {
        self.container().is_ok()
    }

    pub fn value(&self) -> Result<T, DisposedError> {
        self.container()?.value()
    }

    pub fn snapshot(&self) -> Result<Snapshot<T>, DisposedError> {
        self.container()?.snapshot()
    }

    /// Replace the value as a `set_state` transition would.
    pub fn set_value(&self, value: T) -> Result<(), DisposedError> {
        self.container()?.set_state(move |_| value)
    }

    /// Re-run the container's creation logic, see [`Container::refresh`].
    pub fn refresh(&self) -> Result<(), DisposedError> {
        self.container()?.refresh()
    }

    /// Force a notification pass with the current state.
    pub fn notify(&self) -> Result<(), DisposedError> {
        self.container()?.notify()
    }

    pub(crate) fn reinject(&self, carry_previous: bool, notify: bool) -> Result<(), DisposedError> {
        self.container()?.reinject(carry_previous, notify)
    }
}
