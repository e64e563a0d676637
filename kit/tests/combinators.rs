use fate::prelude::*;
use parking_lot::Mutex;
use std::sync::Arc;

#[test]
fn test_when_all_negates_at_first_miss_with_its_identity() {
    let d1 = Deferral::<i32>::binary();
    let d2 = Deferral::<i32>::binary();
    let joined = when([&d1, &d2]).unwrap();

    d1.negate(vec![]);
    let resolution = joined.resolved().unwrap();
    assert!(joined.did("negate"));
    assert_eq!(resolution.args().len(), 1);
    assert!(resolution.args()[0].serves(&d1));
    assert!(!d2.is_resolved());
}

#[test]
fn test_when_all_affirms_once_both_match() {
    let d1 = Deferral::<i32>::binary();
    let d2 = Deferral::<i32>::binary();
    let joined = when([&d1, &d2]).unwrap();

    d2.affirm(vec![]);
    assert!(!joined.is_resolved());
    d1.affirm(vec![]);
    assert!(joined.did("affirm"));
}

#[test]
fn test_when_any_affirms_on_first_match() {
    let d1 = Deferral::<i32>::binary();
    let d2 = Deferral::<i32>::binary();
    let joined = when_any([&d1, &d2]).unwrap();

    d2.affirm(vec![]);
    let resolution = joined.resolved().unwrap();
    assert!(joined.did("affirm"));
    assert!(resolution.args()[0].serves(&d2));
    assert!(!d1.is_resolved());
}

#[test]
fn test_unless_none_is_the_mirror_of_when_any() {
    let d1 = Deferral::<i32>::binary();
    let d2 = Deferral::<i32>::binary();
    let joined = unless_none([&d1, &d2]).unwrap();
    d1.negate(vec![]);
    assert!(!joined.is_resolved());
    d2.negate(vec![]);
    assert!(joined.did("negate"));
}

#[test]
fn test_pipe_chain_with_plain_and_pending_stages() {
    let source = Deferral::<i32>::binary();
    let first = source.pipe_with(|r| Outcome::value(r.args()[0] + 1));
    let second = first.pipe_with(|r| Outcome::value(r.args()[0] * 3));

    source.affirm(vec![1]);
    assert_eq!(first.resolved().unwrap().args(), &[2]);
    assert_eq!(second.resolved().unwrap().args(), &[6]);

    let pending = Deferral::<i32>::binary();
    let handed = pending.promise();
    let source = Deferral::<i32>::binary();
    let hops = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&hops);
    let first = source.pipe_with(move |_| Outcome::from(handed));
    let second = first.pipe_with(move |r| {
        *counter.lock() += 1;
        Outcome::args(r.to_args())
    });

    source.affirm(vec![]);
    assert!(!first.is_resolved());
    assert_eq!(*hops.lock(), 0);
    pending.affirm(vec![10]);
    assert_eq!(*hops.lock(), 1);
    assert_eq!(second.resolved().unwrap().args(), &[10]);
}

#[test]
fn test_join_of_pipelines() {
    let fast = Pipeline::from_operations([Operation::new(|args: Vec<i32>| {
        Outcome::value(args[0] + 1)
    })]);
    let gate = Deferral::<i32>::binary();
    let gated = gate.promise();
    let slow = Pipeline::from_operations([Operation::new(move |_: Vec<i32>| {
        Outcome::from(gated)
    })]);

    let fast_done = fast.start(vec![0]).unwrap();
    let slow_done = slow.start(vec![0]).unwrap();
    let joined = when([&fast_done, &slow_done]).unwrap();
    assert!(!joined.is_resolved());

    gate.affirm(vec![5]);
    assert!(joined.did("affirm"));
    assert!(joined.resolved().unwrap().args()[1].same(&slow_done));
}
