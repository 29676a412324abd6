//! Evaluation modes and deferred results.
//!
//! Every engine validates its request first and only then hands the heavy
//! reduction to [`EvalMode::schedule`]. The mode decides when the reduction
//! runs and on which executor; it never changes the numbers produced.
//!
//! - `Lazy`: nothing runs until [`Deferred::materialize`]. Dropping the
//!   `Deferred` discards the work; there is no partial result to resume.
//! - `Persist`: runs now, spread over the rayon pool (`threading` feature).
//! - `Compute`: runs now on the calling thread.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvalMode {
    Lazy,
    Persist,
    #[default]
    Compute,
}

/// Executor a reduction kernel runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exec {
    Serial,
    Pooled,
}

impl EvalMode {
    /// Map the `eager` flag used by threshold estimation onto a mode.
    pub fn from_eager(eager: bool) -> Self {
        if eager { EvalMode::Compute } else { EvalMode::Lazy }
    }

    /// Executor used when this mode materializes.
    pub fn exec(self) -> Exec {
        match self {
            EvalMode::Compute => Exec::Serial,
            EvalMode::Lazy | EvalMode::Persist => Exec::Pooled,
        }
    }

    /// Run `job` now or wrap it for later, according to the mode.
    pub fn schedule<T, F>(self, job: F) -> Deferred<T>
    where
        F: FnOnce(Exec) -> T + Send + 'static,
        T: 'static,
    {
        let exec = self.exec();
        match self {
            EvalMode::Lazy => Deferred::pending(move || job(exec)),
            EvalMode::Persist | EvalMode::Compute => Deferred::ready(job(exec)),
        }
    }
}

enum State<T> {
    Ready(T),
    Pending(Box<dyn FnOnce() -> T + Send>),
}

/// A result that is either materialized or still an unevaluated closure.
pub struct Deferred<T> {
    state: State<T>,
}

impl<T: 'static> Deferred<T> {
    pub fn ready(value: T) -> Self {
        Self { state: State::Ready(value) }
    }

    pub fn pending<F>(job: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        Self { state: State::Pending(Box::new(job)) }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, State::Ready(_))
    }

    /// Evaluate if needed and return the value.
    pub fn materialize(self) -> T {
        match self.state {
            State::Ready(v) => v,
            State::Pending(job) => job(),
        }
    }

    /// Chain a transformation without forcing evaluation.
    pub fn map<U, F>(self, f: F) -> Deferred<U>
    where
        F: FnOnce(T) -> U + Send + 'static,
        T: Send,
        U: 'static,
    {
        match self.state {
            State::Ready(v) => Deferred::ready(f(v)),
            State::Pending(job) => Deferred::pending(move || f(job())),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.state {
            State::Ready(v) => f.debug_tuple("Ready").field(v).finish(),
            State::Pending(_) => f.write_str("Pending"),
        }
    }
}

/// Evaluate `f` at every index in `0..n`, on the requested executor.
pub(crate) fn map_indices<F>(exec: Exec, n: usize, f: F) -> Vec<f64>
where
    F: Fn(usize) -> f64 + Sync + Send,
{
    #[cfg(feature = "threading")]
    if exec == Exec::Pooled {
        use rayon::prelude::*;
        return (0..n).into_par_iter().map(f).collect();
    }
    #[cfg(not(feature = "threading"))]
    let _ = exec;
    (0..n).map(f).collect()
}

/// Like [`map_indices`] for kernels producing several outputs per index.
pub(crate) fn map_indices_with<T, F>(exec: Exec, n: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize) -> T + Sync + Send,
{
    #[cfg(feature = "threading")]
    if exec == Exec::Pooled {
        use rayon::prelude::*;
        return (0..n).into_par_iter().map(f).collect();
    }
    #[cfg(not(feature = "threading"))]
    let _ = exec;
    (0..n).map(f).collect()
}
