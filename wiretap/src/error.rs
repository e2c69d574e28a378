use std::{error::Error as StdError, fmt, panic::Location};
use thiserror::Error;
use wiretap_store::{Endpoint, Snapshot};

use crate::{
    expectation::{Measure, Range},
    matcher::{EndpointMatcher, Threads},
};

/// An expectation whose observed value fell outside its range.
///
/// Failures found by one [`Spy::verify`](crate::Spy::verify) are chained:
/// the first is returned and every later one hangs off [`source`](StdError::source).
#[derive(Debug, Clone)]
pub struct VerificationFailure {
    pub threads: Threads,
    pub endpoint: EndpointMatcher,
    pub measure: Measure,
    pub range: Range,
    pub observed: u64,
    /// Every call matching the expectation during the observation window.
    pub records: Snapshot,
    pub cause: Option<Box<VerificationFailure>>,
}

impl VerificationFailure {
    /// This failure followed by every chained cause.
    pub fn chain(&self) -> impl Iterator<Item = &VerificationFailure> {
        std::iter::successors(Some(self), |failure| failure.cause.as_deref())
    }

    fn subject(&self) -> String {
        let what = self.endpoint.describe();

        match self.measure {
            Measure::Invocations => what,
            measure => format!("{measure} of {what}"),
        }
    }
}

impl fmt::Display for VerificationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let subject = self.subject();

        writeln!(f, "Expected {}{} {subject}", self.range, self.threads.describe())?;
        write!(f, "Observed {} {subject} instead:", self.observed)?;

        for (key, stats) in self.records.iter() {
            write!(f, "\n  {}", key.endpoint)?;

            if let Some(thread) = &key.context.thread {
                write!(f, " [{thread}]")?;
            }

            match &key.endpoint {
                Endpoint::Statement(_) => write!(
                    f,
                    "; /* {} calls, {} rows */",
                    stats.invocations, stats.rows
                )?,
                Endpoint::Socket(_) => write!(
                    f,
                    " /* {} calls, {} bytes down, {} bytes up */",
                    stats.invocations, stats.bytes_down, stats.bytes_up
                )?,
            }
        }

        Ok(())
    }
}

impl StdError for VerificationFailure {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn StdError + 'static))
    }
}

#[derive(Debug, Clone, Copy, Error)]
#[error("spy is closed (closed at {closed_at})")]
pub struct SessionClosed {
    pub closed_at: &'static Location<'static>,
}

/// Contradictory expectation parameters, rejected when the expectation is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("an exact count cannot be combined with minimum or maximum bounds")]
    Ambiguous,
    #[error("minimum {min} is greater than maximum {max}")]
    Inverted { min: u64, max: u64 },
    #[error("expectation has no bounds")]
    MissingBounds,
    #[error("conflicting expectation parameters: {0}")]
    Conflicting(&'static str),
}

#[derive(Debug, Error)]
pub enum SpyError {
    #[error(transparent)]
    Verification(Box<VerificationFailure>),

    #[error(transparent)]
    Closed(#[from] SessionClosed),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

impl SpyError {
    pub fn verification(&self) -> Option<&VerificationFailure> {
        match self {
            Self::Verification(failure) => Some(&**failure),
            _ => None,
        }
    }
}

impl From<VerificationFailure> for SpyError {
    fn from(failure: VerificationFailure) -> Self {
        Self::Verification(Box::new(failure))
    }
}

/// Outcome of a callback run under [`Spy::execute`](crate::Spy::execute).
///
/// A failing callback stays the primary error; a verification failure found
/// afterwards is kept alongside it instead of replacing it.
#[derive(Debug, Error)]
pub enum GuardedError<E> {
    #[error("callback failed: {primary}")]
    Callback {
        #[source]
        primary: E,
        suppressed: Option<SpyError>,
    },

    #[error(transparent)]
    Spy(SpyError),
}

impl<E> GuardedError<E> {
    pub fn suppressed(&self) -> Option<&SpyError> {
        match self {
            Self::Callback { suppressed, .. } => suppressed.as_ref(),
            Self::Spy(_) => None,
        }
    }
}

impl<E> From<SpyError> for GuardedError<E> {
    fn from(error: SpyError) -> Self {
        Self::Spy(error)
    }
}
