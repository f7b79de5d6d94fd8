//! Error types shared by containers, keys and the locator.

use core::fmt::Display;

use thiserror::Error;

/// An operation was attempted on a disposed container.
///
/// Also returned by a [`Key`](crate::Key) whose container has been disposed,
/// unregistered or dropped.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("container has been disposed")]
pub struct DisposedError;

/// A mutator or async producer failed.
///
/// Stored in the container's `error` field and delivered to observers through
/// the normal notification path. It is never returned to the caller of
/// [`Container::set_state`](crate::Container::set_state) and friends.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("state transition failed: {message}")]
pub struct TransitionError {
    message: String,
}

impl TransitionError {
    pub fn new(cause: impl Display) -> Self {
        Self {
            message: cause.to_string(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// An observer failed while handling a notification.
///
/// Reported on the container's side channel, see
/// [`Container::observer_errors`](crate::Container::observer_errors).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("observer failed: {message}")]
pub struct ObserverError {
    message: String,
}

impl ObserverError {
    pub fn new(cause: impl Display) -> Self {
        Self {
            message: cause.to_string(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Service locator errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LocatorError {
    /// Nothing was registered for the type and key.
    #[error("no container registered for {type_name} (key: {key:?})")]
    NotRegistered {
        type_name: &'static str,
        key: Option<String>,
    },
    /// The type and key already have a registration.
    #[error("a container is already registered for {type_name} (key: {key:?})")]
    AlreadyRegistered {
        type_name: &'static str,
        key: Option<String>,
    },
    /// The stored container does not hold the requested type.
    #[error("registered container for {type_name} holds a different type")]
    TypeMismatch { type_name: &'static str },
    /// The registered container was disposed.
    #[error(transparent)]
    Disposed(#[from] DisposedError),
}
