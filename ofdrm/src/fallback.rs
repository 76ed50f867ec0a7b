use futures::future::BoxFuture;

use crate::error::Error;

/**
    A named way of producing a value, tried in order by [`first_success`].
*/
pub struct Strategy<'a, T> {
    pub name: &'static str,
    run: BoxFuture<'a, Result<T, Error>>,
}

impl<'a, T> Strategy<'a, T> {
    pub fn new(
        name: &'static str,
        run: impl Future<Output = Result<T, Error>> + Send + 'a,
    ) -> Self {
        Self {
            name,
            run: Box::pin(run),
        }
    }
}

/**
    Why [`first_success`] produced no value.
*/
#[derive(Debug)]
pub enum Failure {
    /// A strategy observed cancellation; the rest were not tried.
    Cancelled,
    /// Every strategy failed, in the order they were tried.
    Exhausted(Vec<(&'static str, Error)>),
}

impl Failure {
    /**
        The error to surface: the first captured failure, or `empty()` when
        there were no strategies at all.
    */
    pub fn into_error(self, empty: impl FnOnce() -> Error) -> Error {
        match self {
            Failure::Cancelled => Error::Cancelled,
            Failure::Exhausted(failures) => failures
                .into_iter()
                .next()
                .map(|(_, e)| e)
                .unwrap_or_else(empty),
        }
    }

    /// `name: error` for every failed strategy, joined with `; `.
    pub fn summary(&self) -> String {
        match self {
            Failure::Cancelled => Error::Cancelled.to_string(),
            Failure::Exhausted(failures) => failures
                .iter()
                .map(|(name, e)| format!("{name}: {e}"))
                .collect::<Vec<_>>()
                .join("; "),
        }
    }
}

/**
    Run strategies one after another and return the first success along
    with the name of the strategy that produced it.

    Later strategies are never polled once one succeeds. Cancellation stops
    the chain instead of advancing it.
*/
pub async fn first_success<'a, T>(
    strategies: impl IntoIterator<Item = Strategy<'a, T>>,
) -> Result<(&'static str, T), Failure> {
    let mut failures = Vec::new();
    for strategy in strategies {
        match strategy.run.await {
            Ok(value) => {
                tracing::debug!(strategy = strategy.name, "strategy succeeded");
                return Ok((strategy.name, value));
            }
            Err(e) if e.is_cancelled() => {
                tracing::debug!(strategy = strategy.name, "strategy cancelled");
                return Err(Failure::Cancelled);
            }
            Err(e) => {
                tracing::warn!(strategy = strategy.name, error = %e, "strategy failed");
                failures.push((strategy.name, e));
            }
        }
    }
    Err(Failure::Exhausted(failures))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn fail(msg: &str) -> Result<u32, Error> {
        Err(Error::License(msg.to_string()))
    }

    #[tokio::test]
    async fn first_ok_wins() {
        let polled = Arc::new(AtomicUsize::new(0));
        let counter = polled.clone();
        let result = first_success([
            Strategy::new("a", async { fail("a") }),
            Strategy::new("b", async { Ok(2) }),
            Strategy::new("c", async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(3)
            }),
        ])
        .await
        .unwrap();
        assert_eq!(result, ("b", 2));
        assert_eq!(polled.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn first_error_is_surfaced() {
        let failure = first_success([
            Strategy::new("local", async { fail("local") }),
            Strategy::new("relay", async {
                Err(Error::RelayExhausted("relay".to_string()))
            }),
        ])
        .await
        .unwrap_err();
        assert_eq!(failure.summary(), "local: license exchange failed: local; relay: relay attempts exhausted: relay");
        assert!(matches!(
            failure.into_error(|| Error::Cancelled),
            Error::License(msg) if msg == "local"
        ));
    }

    #[tokio::test]
    async fn cancellation_stops_the_chain() {
        let polled = Arc::new(AtomicUsize::new(0));
        let counter = polled.clone();
        let failure = first_success([
            Strategy::new("a", async { Err(Error::Cancelled) }),
            Strategy::new("b", async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            }),
        ])
        .await
        .unwrap_err();
        assert!(matches!(failure, Failure::Cancelled));
        assert_eq!(polled.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn no_strategies_uses_fallback_error() {
        let failure = first_success(Vec::<Strategy<'_, u32>>::new())
            .await
            .unwrap_err();
        assert!(matches!(
            failure.into_error(|| Error::DeviceUnavailable("none".into())),
            Error::DeviceUnavailable(_)
        ));
    }
}
