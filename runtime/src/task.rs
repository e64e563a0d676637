//! Bridges from the tokio task queue into promises.

use fate_core::{Deferral, Payload, Promise};
use std::future::Future;
use std::time::Duration;

/// Run `future` on the tokio runtime and expose its result as a binary promise.
///
/// `Ok` affirms and `Err` negates, each with the carried arguments.
pub fn defer<A, F>(future: F) -> Promise<A>
where
    A: Payload,
    F: Future<Output = Result<Vec<A>, Vec<A>>> + Send + 'static,
{
    let deferral = Deferral::binary();
    let handle = deferral.clone();
    tokio::spawn(async move {
        match future.await {
            Ok(args) => handle.affirm(args),
            Err(args) => handle.negate(args),
        };
    });
    deferral.promise()
}

/// A promise affirmed with `args` once `duration` has elapsed.
pub fn delay<A: Payload>(duration: Duration, args: Vec<A>) -> Promise<A> {
    defer(async move {
        tokio::time::sleep(duration).await;
        Ok(args)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Pipeline;
    use crate::queue::Operation;
    use fate_core::Outcome;
    use fate_core::join::when;

    #[tokio::test(start_paused = true)]
    async fn test_delay_resolves_after_timer() {
        let promise = delay(Duration::from_millis(50), vec![1]);
        assert!(!promise.is_resolved());
        let resolution = promise.clone().await.unwrap();
        assert_eq!(resolution.args(), &[1]);
        assert!(promise.did("affirm"));
    }

    #[tokio::test]
    async fn test_defer_negates_on_err() {
        let promise = defer(async { Err::<Vec<i32>, _>(vec![-2]) });
        let resolution = promise.clone().await.unwrap();
        assert!(promise.did("negate"));
        assert_eq!(resolution.args(), &[-2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pipeline_over_timers() {
        let pipeline = Pipeline::from_operations([
            Operation::new(|args: Vec<u64>| {
                Outcome::from(delay(Duration::from_millis(args[0]), vec![args[0] * 2]))
            }),
            Operation::new(|args: Vec<u64>| {
                Outcome::from(delay(Duration::from_millis(args[0]), vec![args[0] + 1]))
            }),
        ]);
        let promise = pipeline.start(vec![10]).unwrap();
        let resolution = promise.await.unwrap();
        assert_eq!(resolution.args(), &[21]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_over_timers_completes_in_order() {
        let slow = delay(Duration::from_millis(30), vec!["slow"]);
        let fast = delay(Duration::from_millis(10), vec!["fast"]);
        let joined = when([&slow, &fast]).unwrap();

        let resolution = joined.await.unwrap();
        assert!(resolution.args()[0].same(&fast));
        assert!(resolution.args()[1].same(&slow));
    }
}
