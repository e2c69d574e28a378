use parse_display::Display;
use std::fmt;
use wiretap_store::{Grouping, Stats, StatementKind};

use crate::{
    error::{ConfigurationError, SpyError, VerificationFailure},
    matcher::{EndpointMatcher, Pattern, Threads},
    spy::Spy,
};

/// Inclusive bounds on an observed value. `u64::MAX` as `max` means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Range {
    pub min: u64,
    pub max: u64,
}

impl Range {
    pub fn exact(value: u64) -> Self {
        Self {
            min: value,
            max: value,
        }
    }

    pub fn never() -> Self {
        Self::exact(0)
    }

    pub fn at_least(min: u64) -> Self {
        Self { min, max: u64::MAX }
    }

    pub fn at_most(max: u64) -> Self {
        Self { min: 0, max }
    }

    pub fn between(min: u64, max: u64) -> Result<Self, ConfigurationError> {
        if min > max {
            return Err(ConfigurationError::Inverted { min, max });
        }

        Ok(Self { min, max })
    }

    pub fn contains(&self, observed: u64) -> bool {
        self.min <= observed && observed <= self.max
    }

    /// Combines the three ways a bound can be expressed.
    ///
    /// `Ok(None)` when nothing was given.
    pub fn parse(
        value: Option<u64>,
        min: Option<u64>,
        max: Option<u64>,
    ) -> Result<Option<Self>, ConfigurationError> {
        match (value, min, max) {
            (Some(_), Some(_), _) | (Some(_), _, Some(_)) => Err(ConfigurationError::Ambiguous),
            (Some(value), None, None) => Ok(Some(Self::exact(value))),
            (None, None, None) => Ok(None),
            (None, min, max) => Self::between(min.unwrap_or(0), max.unwrap_or(u64::MAX)).map(Some),
        }
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.min, self.max) {
            (min, max) if min == max => write!(f, "exactly {min}"),
            (min, u64::MAX) => write!(f, "at least {min}"),
            (min, max) => write!(f, "between {min} and {max}"),
        }
    }
}

/// The counter of [`Stats`] an expectation constrains.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Measure {
    #[display("invocations")]
    Invocations,
    #[display("rows")]
    Rows,
    #[display("bytes down")]
    BytesDown,
    #[display("bytes up")]
    BytesUp,
}

impl Measure {
    pub fn of(&self, stats: &Stats) -> u64 {
        match self {
            Self::Invocations => stats.invocations,
            Self::Rows => stats.rows,
            Self::BytesDown => stats.bytes_down,
            Self::BytesUp => stats.bytes_up,
        }
    }
}

/// A range check over the calls a [`Spy`] observes.
///
/// Built with [`Expectation::statements`], [`Expectation::sockets`] or
/// [`Expectation::any`]; bounds are only checked by [`Expectation::verify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expectation {
    /// `None` defers to the spy's configured default.
    pub threads: Option<Threads>,
    pub endpoint: EndpointMatcher,
    pub bounds: Vec<(Measure, Range)>,
}

impl Expectation {
    pub fn statements() -> ExpectationBuilder {
        ExpectationBuilder::new(EndpointMatcher::statements())
    }

    pub fn sockets() -> ExpectationBuilder {
        ExpectationBuilder::new(EndpointMatcher::sockets())
    }

    pub fn any() -> ExpectationBuilder {
        ExpectationBuilder::new(EndpointMatcher::Any)
    }

    /// Checks invocations first, then rows and bytes, stopping at the first failure.
    pub fn verify(&self, spy: &Spy) -> Result<(), SpyError> {
        spy.ensure_open()?;
        self.check(spy)
    }

    pub(crate) fn check(&self, spy: &Spy) -> Result<(), SpyError> {
        let threads = self.threads.unwrap_or_else(|| spy.default_threads());
        let totals = spy.window_totals(threads, &self.endpoint);

        for (measure, range) in &self.bounds {
            let observed = measure.of(&totals);

            if range.contains(observed) {
                continue;
            }

            let records = spy.window(threads, &self.endpoint, &Grouping::without_call_site());

            return Err(VerificationFailure {
                threads,
                endpoint: self.endpoint.clone(),
                measure: *measure,
                range: *range,
                observed,
                records,
                cause: None,
            }
            .into());
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Bound {
    value: Option<u64>,
    min: Option<u64>,
    max: Option<u64>,
}

impl Bound {
    fn parse(&self) -> Result<Option<Range>, ConfigurationError> {
        Range::parse(self.value, self.min, self.max)
    }
}

#[derive(Debug, Clone)]
pub struct ExpectationBuilder {
    threads: Option<Threads>,
    endpoint: EndpointMatcher,
    invocations: Bound,
    rows: Bound,
    bytes_down: Option<Range>,
    bytes_up: Option<Range>,
    conflict: Option<&'static str>,
}

impl ExpectationBuilder {
    fn new(endpoint: EndpointMatcher) -> Self {
        Self {
            threads: None,
            endpoint,
            invocations: Bound::default(),
            rows: Bound::default(),
            bytes_down: None,
            bytes_up: None,
            conflict: None,
        }
    }

    /// Keeps the first contradiction so that `build` can report it.
    fn conflict(mut self, reason: &'static str) -> Self {
        self.conflict.get_or_insert(reason);
        self
    }

    pub fn exact(mut self, count: u64) -> Self {
        self.invocations.value = Some(count);
        self
    }

    pub fn never(self) -> Self {
        self.exact(0)
    }

    pub fn at_least(mut self, count: u64) -> Self {
        self.invocations.min = Some(count);
        self
    }

    pub fn at_most(mut self, count: u64) -> Self {
        self.invocations.max = Some(count);
        self
    }

    pub fn between(self, min: u64, max: u64) -> Self {
        self.at_least(min).at_most(max)
    }

    pub fn rows(mut self, rows: u64) -> Self {
        self.rows.value = Some(rows);
        self
    }

    pub fn min_rows(mut self, rows: u64) -> Self {
        self.rows.min = Some(rows);
        self
    }

    pub fn max_rows(mut self, rows: u64) -> Self {
        self.rows.max = Some(rows);
        self
    }

    pub fn bytes_down(mut self, range: Range) -> Self {
        self.bytes_down = Some(range);
        self
    }

    pub fn bytes_up(mut self, range: Range) -> Self {
        self.bytes_up = Some(range);
        self
    }

    pub fn threads(mut self, threads: Threads) -> Self {
        self.threads = Some(threads);
        self
    }

    pub fn current_thread(self) -> Self {
        self.threads(Threads::Current)
    }

    pub fn other_threads(self) -> Self {
        self.threads(Threads::Others)
    }

    pub fn any_threads(self) -> Self {
        self.threads(Threads::Any)
    }

    /// Narrows statement expectations to one statement kind.
    pub fn kind(mut self, kind: StatementKind) -> Self {
        match self.endpoint.statement_kind() {
            Some(current) if current != kind => {
                return self.conflict("more than one statement kind");
            }
            _ => {}
        }

        match &mut self.endpoint {
            EndpointMatcher::Statements { kind: current, .. } => *current = Some(kind),
            _ => return self.conflict("a statement kind on a non-statement expectation"),
        }

        self
    }

    pub fn select(self) -> Self {
        self.kind(StatementKind::Select)
    }

    pub fn insert(self) -> Self {
        self.kind(StatementKind::Insert)
    }

    pub fn update(self) -> Self {
        self.kind(StatementKind::Update)
    }

    pub fn delete(self) -> Self {
        self.kind(StatementKind::Delete)
    }

    pub fn merge(self) -> Self {
        self.kind(StatementKind::Merge)
    }

    /// Statement text pattern for statement expectations, address pattern
    /// for socket ones.
    pub fn matching(mut self, pattern: Pattern) -> Self {
        match &mut self.endpoint {
            EndpointMatcher::Statements { text, .. } => *text = pattern,
            EndpointMatcher::Sockets(current) => *current = pattern,
            EndpointMatcher::Any => {
                return self.conflict("a pattern on an expectation over every endpoint");
            }
        }

        self
    }

    /// Exact socket address, either `host:port` or a bare host.
    ///
    /// Narrows a socket or catch-all expectation; a statement one is rejected.
    pub fn address<A: Into<String>>(mut self, address: A) -> Self {
        if let EndpointMatcher::Statements { .. } = self.endpoint {
            return self.conflict("a socket address on a statement expectation");
        }

        self.endpoint = EndpointMatcher::address(address);
        self
    }

    /// Replaces the endpoint filter altogether.
    pub fn endpoint(mut self, endpoint: EndpointMatcher) -> Self {
        self.endpoint = endpoint;
        self
    }

    pub fn build(self) -> Result<Expectation, ConfigurationError> {
        if let Some(reason) = self.conflict {
            return Err(ConfigurationError::Conflicting(reason));
        }

        let bounds = [
            (Measure::Invocations, self.invocations.parse()?),
            (Measure::Rows, self.rows.parse()?),
            (Measure::BytesDown, self.bytes_down),
            (Measure::BytesUp, self.bytes_up),
        ]
        .into_iter()
        .filter_map(|(measure, range)| range.map(|range| (measure, range)))
        .collect::<Vec<_>>();

        if bounds.is_empty() {
            return Err(ConfigurationError::MissingBounds);
        }

        Ok(Expectation {
            threads: self.threads,
            endpoint: self.endpoint,
            bounds,
        })
    }
}
