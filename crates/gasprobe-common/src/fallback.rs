//! Ordered endpoint failover guarded by circuit breakers.
//!
//! Each alternative gets its own breaker. A call goes to the first alternative whose
//! breaker is closed; it is attempted exactly once; retrying is left to the caller.

use std::sync::Arc;
use std::time::Duration;

use failsafe::backoff::Exponential;
use failsafe::failure_policy::{consecutive_failures, ConsecutiveFailures};
use failsafe::futures::CircuitBreaker;
pub use failsafe::FailurePredicate;
use failsafe::{backoff, Config, StateMachine};
use futures_core::TryFuture;

pub type Error<E> = failsafe::Error<E>;
type FailurePolicy = ConsecutiveFailures<Exponential>;

struct Fallback<T> {
    value: Arc<T>,
    state_machine: StateMachine<FailurePolicy, ()>,
}

impl<T> Clone for Fallback<T> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            state_machine: self.state_machine.clone(),
        }
    }
}

impl<E, T: FailurePredicate<E>> FailurePredicate<E> for &Fallback<T> {
    fn is_err(&self, err: &E) -> bool {
        self.value.is_err(err)
    }
}

impl<T> Fallback<T> {
    fn new(value: T) -> Self {
        Self {
            value: value.into(),

            state_machine: Config::new()
                .failure_policy(consecutive_failures(3, backoff::exponential(Duration::from_secs(10), Duration::from_secs(60))))
                .build(),
        }
    }

    async fn call<F>(&self, f: impl FnOnce(Arc<T>) -> F) -> Result<F::Ok, Error<F::Error>>
    where
        F: TryFuture,
        T: FailurePredicate<F::Error>,
    {
        self.state_machine.call_with(self, f(self.value.clone())).await
    }

    fn is_call_permitted(&self) -> bool {
        self.state_machine.is_call_permitted()
    }
}

#[derive(Clone)]
pub struct WithFallback<T> {
    values: Vec<Fallback<T>>,
}

impl<T> Default for WithFallback<T> {
    fn default() -> Self {
        Self { values: vec![] }
    }
}

impl<T> WithFallback<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, alternative: T) -> Self {
        self.values.push(Fallback::new(alternative));
        self
    }

    /// Number of alternatives, open breakers included.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Executes `f` once with the first alternative whose breaker is closed.
    ///
    /// Returns `Error::Rejected` when there is no alternative or every breaker is open.
    /// Errors for which [`FailurePredicate::is_err`] is false (e.g. a node-side rejection)
    /// do not count against the breaker and are returned as `Error::Inner`.
    pub async fn call<F>(&self, f: impl FnOnce(Arc<T>) -> F) -> Result<F::Ok, Error<F::Error>>
    where
        F: TryFuture,
        T: FailurePredicate<F::Error>,
    {
        for value in self.values.iter() {
            if value.is_call_permitted() {
                return value.call(f).await;
            }
        }

        Err(Error::Rejected)
    }
}
