use std::sync::{Arc, Mutex};

use oxide_reactive::{DisposedError, Observer, ObserverError, Snapshot, Status};

use super::{given_an_observed_container, increment, Counter};

#[test]
fn given_a_new_container_should_be_idle_with_initial_value() {
    let test = given_an_observed_container(Counter { count: 7 });

    let snapshot = test.container.snapshot().unwrap();
    assert_eq!(snapshot.value, Counter { count: 7 });
    assert_eq!(snapshot.status, Status::Idle);
    assert_eq!(snapshot.error, None);
    assert_eq!(test.observer.count(), 0);
}

#[test]
fn given_three_increments_should_fold_mutators_and_notify_three_times() {
    let test = given_an_observed_container(Counter::default());

    increment(&test.container);
    increment(&test.container);
    increment(&test.container);

    assert_eq!(test.container.value().unwrap().count, 3);
    assert_eq!(test.container.status().unwrap(), Status::Data);
    assert_eq!(test.observer.count(), 3);
    test.observer.with_notifications(|notifications| {
        let counts: Vec<i32> = notifications.iter().map(|n| n.value.count).collect();
        assert_eq!(counts, vec![1, 2, 3]);
    });
}

#[test]
fn given_mixed_mutators_should_apply_them_in_call_order() {
    let test = given_an_observed_container(1);

    test.container.set_state(|value| value + 2).unwrap();
    test.container.set_state(|value| value * 10).unwrap();
    test.container.set_state(|value| value - 5).unwrap();

    assert_eq!(test.container.value().unwrap(), 25);
    assert_eq!(test.observer.count(), 3);
}

#[test]
fn given_a_failing_mutator_should_store_error_keep_value_and_notify_once() {
    let test = given_an_observed_container(Counter { count: 4 });

    let result = test
        .container
        .try_set_state(|_| Err::<Counter, _>("quota exceeded"));

    assert!(result.is_ok());
    let snapshot = test.container.snapshot().unwrap();
    assert_eq!(snapshot.status, Status::Error);
    assert_eq!(snapshot.value.count, 4);
    assert_eq!(snapshot.error.unwrap().message(), "quota exceeded");
    assert_eq!(test.observer.count(), 1);
}

#[test]
fn given_an_error_state_when_mutator_succeeds_should_clear_error() {
    let test = given_an_observed_container(0);
    test.container
        .try_set_state(|_| Err::<i32, _>("nope"))
        .unwrap();

    test.container.set_state(|value| value + 1).unwrap();

    assert_eq!(test.container.status().unwrap(), Status::Data);
    assert_eq!(test.container.error().unwrap(), None);
}

#[test]
fn given_a_mutator_reading_its_own_container_should_not_deadlock() {
    let test = given_an_observed_container(5);
    let reader = test.container.clone();

    test.container
        .set_state(|value| value + reader.value().unwrap())
        .unwrap();

    assert_eq!(test.container.value().unwrap(), 10);
}

#[test]
fn given_the_same_observer_subscribed_twice_should_notify_once() {
    let test = given_an_observed_container(0);

    let added = test.container.subscribe(&test.observer.observer()).unwrap();
    increment_value(&test.container);

    assert!(!added);
    assert_eq!(test.container.subscriber_count(), 1);
    assert_eq!(test.observer.count(), 1);
}

fn increment_value(container: &oxide_reactive::Container<i32>) {
    container.set_state(|value| value + 1).unwrap();
}

#[test]
fn given_an_unsubscribed_observer_should_receive_no_more_notifications() {
    let test = given_an_observed_container(0);
    increment_value(&test.container);

    assert!(test.container.unsubscribe(&test.observer.observer()).unwrap());
    increment_value(&test.container);

    assert_eq!(test.observer.count(), 1);
}

#[test]
fn given_observers_should_notify_in_subscription_order() {
    let test = given_an_observed_container(0);
    let order = Arc::new(Mutex::new(Vec::new()));
    for name in ["header", "list", "footer"] {
        let order = order.clone();
        test.container
            .subscribe(&Observer::new(move |_: &Snapshot<i32>| {
                order.lock().unwrap().push(name)
            }))
            .unwrap();
    }

    increment_value(&test.container);

    assert_eq!(*order.lock().unwrap(), vec!["header", "list", "footer"]);
}

#[test]
fn given_an_observer_unsubscribing_itself_during_notification_should_deliver_the_rest() {
    let test = given_an_observed_container(0);
    let calls = Arc::new(Mutex::new(Vec::new()));

    let slot: Arc<Mutex<Option<Observer<i32>>>> = Arc::new(Mutex::new(None));
    let container = test.container.clone();
    let self_removing = {
        let calls = calls.clone();
        let slot = slot.clone();
        Observer::new(move |_: &Snapshot<i32>| {
            calls.lock().unwrap().push("self_removing");
            if let Some(me) = slot.lock().unwrap().as_ref() {
                container.unsubscribe(me).unwrap();
            }
        })
    };
    *slot.lock().unwrap() = Some(self_removing.clone());
    test.container.subscribe(&self_removing).unwrap();

    let after = {
        let calls = calls.clone();
        Observer::new(move |_: &Snapshot<i32>| calls.lock().unwrap().push("after"))
    };
    test.container.subscribe(&after).unwrap();

    increment_value(&test.container);
    increment_value(&test.container);

    // The recording observer subscribed first saw both passes.
    assert_eq!(test.observer.count(), 2);
    assert_eq!(
        *calls.lock().unwrap(),
        vec!["self_removing", "after", "after"]
    );
}

#[test]
fn given_an_observer_removing_a_later_one_during_notification_should_skip_it() {
    let test = given_an_observed_container(0);
    let later_calls = Arc::new(Mutex::new(0));

    let later = {
        let later_calls = later_calls.clone();
        Observer::new(move |_: &Snapshot<i32>| *later_calls.lock().unwrap() += 1)
    };
    let remover = {
        let container = test.container.clone();
        let later = later.clone();
        Observer::new(move |_: &Snapshot<i32>| {
            container.unsubscribe(&later).unwrap();
        })
    };
    test.container.subscribe(&remover).unwrap();
    test.container.subscribe(&later).unwrap();

    increment_value(&test.container);

    assert_eq!(*later_calls.lock().unwrap(), 0);
    assert_eq!(test.observer.count(), 1);
}

#[test]
fn given_a_failing_observer_should_report_error_and_still_notify_others() {
    let test = given_an_observed_container(0);
    test.container
        .subscribe(&Observer::fallible(|snapshot: &Snapshot<i32>| {
            Err(ObserverError::new(format!("cannot render {}", snapshot.value)))
        }))
        .unwrap();
    let after = super::TestObserver::new();
    test.container.subscribe(&after.observer()).unwrap();

    increment_value(&test.container);

    assert_eq!(test.observer.count(), 1);
    assert_eq!(after.count(), 1);
    let reported = test.container.observer_errors().try_recv().unwrap();
    assert_eq!(reported.message(), "cannot render 1");
}

#[test]
fn given_forced_notification_should_deliver_current_state() {
    let test = given_an_observed_container(Counter { count: 2 });

    test.container.notify().unwrap();

    assert_eq!(test.observer.count(), 1);
    assert_eq!(test.observer.last().unwrap().value.count, 2);
    assert_eq!(test.observer.last().unwrap().status, Status::Idle);
}

#[test]
fn given_a_disposed_container_every_operation_should_fail() {
    let test = given_an_observed_container(0);

    test.container.dispose().unwrap();

    assert!(test.container.is_disposed());
    assert_eq!(test.container.set_state(|value| value + 1), Err(DisposedError));
    assert_eq!(
        test.container.try_set_state(|_| Err::<i32, _>("late")),
        Err(DisposedError)
    );
    assert_eq!(
        test.container.run_future(|| async { Ok::<_, String>(1) }),
        Err(DisposedError)
    );
    assert_eq!(
        test.container
            .run_stream(|| futures::stream::iter(vec![Ok::<_, String>(1)])),
        Err(DisposedError)
    );
    assert_eq!(test.container.snapshot(), Err(DisposedError));
    assert_eq!(test.container.value(), Err(DisposedError));
    assert_eq!(test.container.notify(), Err(DisposedError));
    assert_eq!(test.container.refresh(), Err(DisposedError));
    assert_eq!(
        test.container.subscribe(&test.observer.observer()),
        Err(DisposedError)
    );
    assert_eq!(test.container.dispose(), Err(DisposedError));
    assert_eq!(test.observer.count(), 0);
}

#[test]
fn given_a_disposed_container_should_drop_its_observers() {
    let test = given_an_observed_container(0);

    test.container.dispose().unwrap();

    assert_eq!(test.container.subscriber_count(), 0);
}

#[test]
fn given_a_cloned_container_should_share_identity_and_state() {
    let test = given_an_observed_container(0);
    let clone = test.container.clone();

    increment_value(&clone);

    assert!(clone.ptr_eq(&test.container));
    assert_eq!(test.container.value().unwrap(), 1);
    assert_eq!(test.observer.count(), 1);
}

#[test]
fn given_a_mutator_writing_its_own_container_should_commit_mutator_result_last() {
    let test = given_an_observed_container(Counter::default());
    let same = test.container.clone();

    test.container
        .set_state(|counter| {
            same.set_state(|_| Counter { count: 100 }).unwrap();
            counter.incremented()
        })
        .unwrap();

    assert_eq!(test.container.value().unwrap().count, 1);
    test.observer.with_notifications(|notifications| {
        let counts: Vec<i32> = notifications.iter().map(|n| n.value.count).collect();
        assert_eq!(counts, vec![100, 1]);
    });
}
