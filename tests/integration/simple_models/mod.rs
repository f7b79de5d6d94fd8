use oxide_reactive::{Container, Key};

#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct Counter {
    pub(crate) count: i32,
}

impl Counter {
    pub(crate) fn incremented(&self) -> Self {
        Counter {
            count: self.count + 1,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct Greeting {
    pub(crate) text: String,
}

/// Derived from a `Counter` and a `Greeting`.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct Banner {
    pub(crate) line: String,
    pub(crate) builds: u32,
}

#[cfg_attr(test, mockall::automock)]
pub(crate) trait CounterSource {
    fn initial_count(&self) -> i32;
}

#[cfg_attr(test, mockall::automock)]
pub(crate) trait BannerSource {
    fn compose(&self, count: i32, greeting: String) -> String;
}

pub(crate) fn read_count(key: &Key<Counter>) -> i32 {
    key.value().map(|counter| counter.count).unwrap_or_default()
}

pub(crate) fn read_text(key: &Key<Greeting>) -> String {
    key.value().map(|greeting| greeting.text).unwrap_or_default()
}

pub(crate) fn increment(container: &Container<Counter>) {
    container
        .set_state(Counter::incremented)
        .expect("container is live");
}
