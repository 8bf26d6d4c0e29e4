use std::borrow::Cow;
use std::fmt;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::metric;
use crate::snapshot::Snapshot;

type ProduceFn<T, E> = dyn Fn(&CancellationToken) -> Result<T, E> + Send + Sync;

/// The refresh strategy a producer is driven by, used to tag logs and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Strategy {
    OnDemand,
    SoftHard,
}

impl Strategy {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::OnDemand => "on_demand",
            Self::SoftHard => "soft_hard",
        }
    }
}

/// The production function of a cache, together with the context it runs in.
///
/// Caches never run two productions of the same [`Producer`] at once, so the wrapped
/// function does not need to guard against being re-entered.
///
/// Every invocation receives its own child of the producer's [`CancellationToken`].
/// Cancelling the token given to [`cancel_on`](Self::cancel_on) cancels whichever production is
/// currently running and every future one, while a production can never cancel another.
/// What a cancelled production returns is cached like any other result, so a cancellation
/// surfacing as an error is retried after the failure period.
pub struct Producer<T, E> {
    name: Cow<'static, str>,
    cancel: CancellationToken,
    produce: Box<ProduceFn<T, E>>,
}

impl<T, E> Producer<T, E> {
    /// Wraps a production function that does not care about cancellation.
    pub fn new<F>(produce: F) -> Self
    where
        F: Fn() -> Result<T, E> + Send + Sync + 'static,
    {
        Self::with_cancellation(move |_| produce())
    }

    /// Wraps a production function that observes its cancellation token.
    pub fn with_cancellation<F>(produce: F) -> Self
    where
        F: Fn(&CancellationToken) -> Result<T, E> + Send + Sync + 'static,
    {
        Self {
            name: Cow::Borrowed("renewable"),
            cancel: CancellationToken::new(),
            produce: Box::new(produce),
        }
    }

    /// Sets the name reported in logs and metrics.
    pub fn named(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = name.into();
        self
    }

    /// Derives the tokens of all productions from `token`.
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The token all production tokens are derived from.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Runs the production function once and stamps its outcome.
    pub(crate) fn produce(&self, strategy: Strategy) -> Snapshot<T, E> {
        let token = self.cancel.child_token();

        tracing::debug!(name = %self.name, strategy = strategy.as_str(), "producing");
        let start = Instant::now();
        let result = (self.produce)(&token);
        let produced_at = Instant::now();
        let duration = produced_at - start;

        let outcome = if result.is_ok() { "ok" } else { "err" };
        tracing::debug!(
            name = %self.name,
            strategy = strategy.as_str(),
            outcome,
            ?duration,
            cancelled = token.is_cancelled(),
            "produced"
        );
        metric!(
            counter("renewable.produce") += 1,
            "name" => self.name(),
            "strategy" => strategy.as_str(),
            "outcome" => outcome,
        );
        metric!(
            timer("renewable.produce.duration") = duration,
            "name" => self.name(),
            "strategy" => strategy.as_str(),
            "outcome" => outcome,
        );

        Snapshot::new(result, produced_at)
    }
}

impl<T, E> fmt::Debug for Producer<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("name", &self.name)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}
