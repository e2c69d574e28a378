use parking_lot::{Mutex, RwLock};
use std::{
    collections::HashMap,
    fmt,
    panic::{self, AssertUnwindSafe, Location},
    sync::Arc,
    thread::{self, ThreadId},
    time::Duration,
};
use wiretap_store::{
    CallStore, Grouping, Packet, RecordKey, Snapshot, Stats, TrafficCapture,
};

use crate::{
    config::WiretapConfig,
    error::{GuardedError, SessionClosed, SpyError, VerificationFailure},
    expectation::{Expectation, Measure},
    matcher::{EndpointMatcher, Threads},
};

struct Baseline {
    calls: HashMap<RecordKey, Stats>,
    packets: HashMap<RecordKey, usize>,
}

impl Baseline {
    fn capture(store: &CallStore, traffic: &TrafficCapture) -> Self {
        Self {
            calls: store.baseline(),
            packets: traffic.watermarks(),
        }
    }
}

/// An observation window over a [`CallStore`].
///
/// A spy holds no counters of its own. Everything it reports is the live
/// store minus the baseline taken when the spy was created (or last reset),
/// so spies created at different times never see each other's history.
///
/// The thread that created the spy is its owner: [`Threads::Current`] counts
/// the owner's calls and [`Threads::Others`] everyone else's. Reading a spy
/// from another thread is allowed and does not change who the owner is.
pub struct Spy {
    store: Arc<CallStore>,
    traffic: Arc<TrafficCapture>,
    owner: ThreadId,
    default_threads: Threads,
    merge_threshold: Duration,
    baseline: RwLock<Baseline>,
    expectations: Mutex<Vec<Expectation>>,
    closed_at: Mutex<Option<&'static Location<'static>>>,
}

impl Spy {
    pub fn new(
        store: Arc<CallStore>,
        traffic: Arc<TrafficCapture>,
        config: &WiretapConfig,
    ) -> Self {
        let baseline = Baseline::capture(&store, &traffic);

        Self {
            store,
            traffic,
            owner: thread::current().id(),
            default_threads: config.default_threads,
            merge_threshold: config.packet_merge_threshold,
            baseline: RwLock::new(baseline),
            expectations: Mutex::new(Vec::new()),
            closed_at: Mutex::new(None),
        }
    }

    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    /// Thread scope of expectations that do not name one.
    pub fn default_threads(&self) -> Threads {
        self.default_threads
    }

    /// Calls recorded since the baseline, grouped for display.
    pub fn diff(
        &self,
        threads: Threads,
        endpoint: &EndpointMatcher,
        grouping: &Grouping,
    ) -> Result<Snapshot, SpyError> {
        self.ensure_open()?;

        Ok(self.window(threads, endpoint, grouping))
    }

    /// Sum of every call recorded since the baseline.
    ///
    /// `Others` is derived as `Any - Current` rather than filtered separately.
    pub fn totals(&self, threads: Threads, endpoint: &EndpointMatcher) -> Result<Stats, SpyError> {
        self.ensure_open()?;

        Ok(self.window_totals(threads, endpoint))
    }

    pub fn count(
        &self,
        threads: Threads,
        endpoint: &EndpointMatcher,
        measure: Measure,
    ) -> Result<u64, SpyError> {
        Ok(measure.of(&self.totals(threads, endpoint)?))
    }

    /// Socket payloads transferred since the baseline, merged into packets.
    pub fn traffic(
        &self,
        threads: Threads,
        endpoint: &EndpointMatcher,
        grouping: &Grouping,
    ) -> Result<Vec<(RecordKey, Vec<Packet>)>, SpyError> {
        self.ensure_open()?;

        let baseline = self.baseline.read();

        Ok(self.traffic.packets(
            |key| endpoint.matches(&key.endpoint) && threads.matches(&key.context, self.owner),
            grouping,
            Some(&baseline.packets),
            self.merge_threshold,
        ))
    }

    /// Registers an expectation checked by [`Spy::verify`] and [`Spy::close`].
    pub fn expect(&self, expectation: Expectation) -> Result<&Self, SpyError> {
        self.ensure_open()?;
        self.expectations.lock().push(expectation);

        Ok(self)
    }

    /// Checks a single expectation now, without registering it.
    pub fn verify_expectation(&self, expectation: &Expectation) -> Result<(), SpyError> {
        expectation.verify(self)
    }

    /// Checks every registered expectation in registration order.
    ///
    /// The first failure is returned and later ones are chained as its causes.
    pub fn verify(&self) -> Result<(), SpyError> {
        self.ensure_open()?;
        self.verify_all()
    }

    /// Moves the baseline to now and forgets every registered expectation.
    pub fn reset(&self) -> Result<(), SpyError> {
        self.ensure_open()?;
        *self.baseline.write() = Baseline::capture(&self.store, &self.traffic);
        self.expectations.lock().clear();

        Ok(())
    }

    /// Runs `callback` and verifies afterwards.
    ///
    /// When the callback fails, its error stays primary and a verification
    /// failure is attached to it as suppressed.
    pub fn execute<T, E, F>(&self, callback: F) -> Result<T, GuardedError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        self.ensure_open().map_err(SpyError::from)?;

        match callback() {
            Ok(value) => {
                self.verify_all()?;
                Ok(value)
            }
            Err(primary) => Err(GuardedError::Callback {
                primary,
                suppressed: self.verify_all().err(),
            }),
        }
    }

    /// Runs `callback` and verifies afterwards.
    ///
    /// A panic in the callback is resumed after verification; a verification
    /// failure found at that point is logged since it cannot be returned.
    pub fn run<T, F>(&self, callback: F) -> Result<T, SpyError>
    where
        F: FnOnce() -> T,
    {
        self.ensure_open()?;

        match panic::catch_unwind(AssertUnwindSafe(callback)) {
            Ok(value) => {
                self.verify_all()?;
                Ok(value)
            }
            Err(payload) => {
                if let Err(error) = self.verify_all() {
                    tracing::error!(error = %error, "verification failed while callback panicked");
                }

                panic::resume_unwind(payload)
            }
        }
    }

    /// Verifies and closes the spy for good.
    ///
    /// The spy is closed even when verification fails. Any later call,
    /// including a second `close`, fails with the location of this one.
    #[track_caller]
    pub fn close(&self) -> Result<(), SpyError> {
        let location = Location::caller();

        {
            let mut closed_at = self.closed_at.lock();

            if let Some(closed_at) = *closed_at {
                return Err(SessionClosed { closed_at }.into());
            }

            *closed_at = Some(location);
        }

        self.verify_all()
    }

    pub fn is_closed(&self) -> bool {
        self.closed_at.lock().is_some()
    }

    pub(crate) fn ensure_open(&self) -> Result<(), SessionClosed> {
        match *self.closed_at.lock() {
            Some(closed_at) => Err(SessionClosed { closed_at }),
            None => Ok(()),
        }
    }

    pub(crate) fn window(
        &self,
        threads: Threads,
        endpoint: &EndpointMatcher,
        grouping: &Grouping,
    ) -> Snapshot {
        let live = self.store.snapshot(
            |key| endpoint.matches(&key.endpoint) && threads.matches(&key.context, self.owner),
            &Grouping::full(),
        );

        let baseline = self.baseline.read();
        let mut diff = Snapshot::default();

        for (key, stats) in live {
            let delta = match baseline.calls.get(&key) {
                Some(before) => stats.saturating_sub(before),
                None => stats,
            };

            if !delta.is_empty() {
                diff.merge(key.coarsen(grouping), &delta);
            }
        }

        diff
    }

    pub(crate) fn window_totals(&self, threads: Threads, endpoint: &EndpointMatcher) -> Stats {
        let by_endpoint = Grouping::by_endpoint();

        match threads {
            Threads::Others => {
                let any = self.window(Threads::Any, endpoint, &by_endpoint).total();
                let current = self.window(Threads::Current, endpoint, &by_endpoint).total();

                any.saturating_sub(&current)
            }
            threads => self.window(threads, endpoint, &by_endpoint).total(),
        }
    }

    fn verify_all(&self) -> Result<(), SpyError> {
        let expectations = self.expectations.lock().clone();
        let mut failures = Vec::new();

        for expectation in &expectations {
            match expectation.check(self) {
                Ok(()) => {}
                Err(SpyError::Verification(failure)) => failures.push(*failure),
                Err(error) => return Err(error),
            }
        }

        let chained = failures
            .into_iter()
            .rev()
            .fold(None, |cause: Option<VerificationFailure>, mut failure| {
                failure.cause = cause.map(Box::new);
                Some(failure)
            });

        match chained {
            Some(failure) => Err(failure.into()),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Spy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Spy")
            .field("owner", &self.owner)
            .field("default_threads", &self.default_threads)
            .field("expectations", &self.expectations.lock().len())
            .field("closed_at", &*self.closed_at.lock())
            .finish()
    }
}

impl Drop for Spy {
    fn drop(&mut self) {
        let pending = self.expectations.get_mut().len();

        if pending > 0 && self.closed_at.get_mut().is_none() {
            tracing::warn!(expectations = pending, "spy dropped without being closed");
        }
    }
}
