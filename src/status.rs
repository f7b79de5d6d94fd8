//! Container status and the snapshot read by views.

use crate::TransitionError;

/// Values a container can hold.
///
/// Snapshots are cloned out of the container for every notification, and
/// async producers move the container across tasks.
pub trait State: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> State for T {}

/// Lifecycle phase of a container relative to its async operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    /// Created or reset, no transition applied yet.
    #[default]
    Idle,
    /// A future or stream is in flight.
    Waiting,
    /// The last transition installed a value.
    Data,
    /// The last transition failed.
    Error,
}

impl Status {
    pub fn is_idle(self) -> bool {
        self == Status::Idle
    }

    pub fn is_waiting(self) -> bool {
        self == Status::Waiting
    }

    pub fn has_data(self) -> bool {
        self == Status::Data
    }

    pub fn has_error(self) -> bool {
        self == Status::Error
    }
}

/// The `(value, status, error)` triple a view polls during its render pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<T> {
    pub value: T,
    pub status: Status,
    pub error: Option<TransitionError>,
}
