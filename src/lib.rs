//! Observable state containers for retained-mode UI hosts.
//!
//! Business objects live in [`Container`]s. View components attach
//! [`Observer`]s when they mount and detach them when they unmount; every
//! state transition ends in exactly one notification, so the host only
//! rebuilds what observes the changed container.
//!
//! Containers transition synchronously through
//! [`set_state`](Container::set_state), or asynchronously through
//! [`run_future`](Container::run_future) and
//! [`run_stream`](Container::run_stream) which move the container through
//! [`Status::Waiting`] and discard results of superseded calls. The
//! [`Locator`] owns keyed singleton containers and recreates dependent
//! containers when their upstream containers change.
//!
//! ## Example
//!
//! ```rust
//! use oxide_reactive::{Dependencies, Locator, Observer, ReinjectOptions, Snapshot, TestExecutor};
//!
//! #[derive(Clone, Default)]
//! struct Cart { items: Vec<String> }
//!
//! #[derive(Clone)]
//! struct Summary { line: String }
//!
//! let mut executor = TestExecutor::new();
//! let locator = Locator::new(executor.spawner());
//!
//! locator.register(None, Cart::default).unwrap();
//! let cart = locator.get::<Cart>(None).unwrap();
//!
//! let source = cart.key();
//! locator
//!     .register_dependent(
//!         None,
//!         Dependencies::new().on::<Cart>(None),
//!         ReinjectOptions::default(),
//!         move |_previous: Option<&Summary>| {
//!             let count = source.value().map(|cart| cart.items.len()).unwrap_or_default();
//!             Summary { line: format!("{count} items") }
//!         },
//!     )
//!     .unwrap();
//!
//! let summary = locator.get::<Summary>(None).unwrap();
//! summary
//!     .subscribe(&Observer::new(|snapshot: &Snapshot<Summary>| {
//!         println!("{}", snapshot.value.line)
//!     }))
//!     .unwrap();
//!
//! cart.set_state(|cart| {
//!     let mut items = cart.items.clone();
//!     items.push("tea".to_string());
//!     Cart { items }
//! })
//! .unwrap();
//!
//! // Recreation runs on the host loop.
//! executor.run_until_stalled();
//! assert_eq!(summary.value().unwrap().line, "1 items");
//! ```

// Module declarations
mod container;
mod error;
mod key;
mod locator;
mod observer;
mod spawner;
mod status;

// Public re-exports
pub use container::Container;
pub use error::{DisposedError, LocatorError, ObserverError, TransitionError};
pub use key::Key;
pub use locator::{Dependencies, Locator, ReinjectOptions};
pub use observer::Observer;
pub use spawner::Spawner;
pub use status::{Snapshot, State, Status};

// Test utilities (only available with 'testing' feature or during tests)
#[cfg(any(test, feature = "testing"))]
pub use observer::TestObserver;
#[cfg(any(test, feature = "testing"))]
pub use spawner::{create_test_spawner, TestExecutor, TestSpawner};
