mod simple_models;

use oxide_reactive::{Container, Locator, TestExecutor, TestObserver};
pub(crate) use simple_models::*;

mod container_tests;

/// A container driven by a manual executor, with one recording observer.
pub(crate) struct ContainerTest<T> {
    pub(crate) executor: TestExecutor,
    pub(crate) container: Container<T>,
    pub(crate) observer: TestObserver<T>,
}

pub(crate) fn given_an_observed_container<T>(initial: T) -> ContainerTest<T>
where
    T: Clone + Send + Sync + 'static,
{
    let executor = TestExecutor::new();
    let container = Container::new(initial, executor.spawner());
    let observer = TestObserver::new();
    container
        .subscribe(&observer.observer())
        .expect("fresh container is live");

    ContainerTest {
        executor,
        container,
        observer,
    }
}

pub(crate) struct LocatorTest {
    pub(crate) executor: TestExecutor,
    pub(crate) locator: Locator,
}

pub(crate) fn given_an_empty_locator() -> LocatorTest {
    let executor = TestExecutor::new();
    let locator = Locator::new(executor.spawner());

    LocatorTest { executor, locator }
}
