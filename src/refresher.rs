//! Periodic bucket maintenance.
//!
//! Each cycle runs two strictly sequential phases against the messaging
//! collaborator: a ping sweep over the stalest of the contacts nearest to the
//! local identifier, then a FIND_NODE sweep over the table's refresh targets.
//! One operation is in flight at a time, which bounds the outstanding-request
//! load regardless of K or candidate-set size, at the cost of a cycle taking
//! up to the sum of the individual timeouts.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::{Mutex, RwLock};
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::{
    contact::Contact,
    error::Error,
    routing::SelectMode,
    settings::RefresherSettings,
    traits::Dht,
};

/// Mutable refresher configuration.
///
/// Clones share state, so the timeouts can be adjusted at any time,
/// independently of the refresher's lifecycle; each operation reads the
/// current value when it is issued.
#[derive(Clone)]
pub struct Config {
    inner: Arc<RwLock<Timeouts>>,
}

#[derive(Debug, Clone, Copy)]
struct Timeouts {
    ping_timeout: Duration,
    lookup_timeout: Duration,
}

impl Config {
    fn new(settings: &RefresherSettings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Timeouts {
                ping_timeout: settings.ping_timeout,
                lookup_timeout: settings.lookup_timeout,
            })),
        }
    }

    /// Returns the timeout applied to each ping.
    pub fn ping_timeout(&self) -> Duration {
        self.inner.read().ping_timeout
    }

    /// Sets the timeout applied to each ping.
    pub fn set_ping_timeout(&self, timeout: Duration) {
        self.inner.write().ping_timeout = timeout;
    }

    /// Returns the timeout applied to each lookup.
    pub fn lookup_timeout(&self) -> Duration {
        self.inner.read().lookup_timeout
    }

    /// Sets the timeout applied to each lookup.
    pub fn set_lookup_timeout(&self, timeout: Duration) {
        self.inner.write().lookup_timeout = timeout;
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let timeouts = *self.inner.read();
        f.debug_struct("Config")
            .field("ping_timeout", &timeouts.ping_timeout)
            .field("lookup_timeout", &timeouts.lookup_timeout)
            .finish()
    }
}

struct Tasks {
    scheduler: Option<JoinHandle<()>>,
    cycle: Option<JoinHandle<()>>,
    closed: bool,
}

// Releases the re-entrancy flag when the cycle task completes or is aborted
// (aborting drops the future, which runs this).
struct ActiveGuard(Arc<AtomicBool>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// The periodic maintenance loop over a [`Dht`] collaborator.
pub struct BucketRefresher<D> {
    dht: Arc<D>,
    settings: RefresherSettings,
    config: Config,
    // Lock-free test-and-set so overlapping ticks skip without blocking on an
    // in-progress cycle.
    active: Arc<AtomicBool>,
    tasks: Arc<Mutex<Tasks>>,
}

impl<D> Clone for BucketRefresher<D> {
    fn clone(&self) -> Self {
        Self {
            dht: Arc::clone(&self.dht),
            settings: self.settings.clone(),
            config: self.config.clone(),
            active: Arc::clone(&self.active),
            tasks: Arc::clone(&self.tasks),
        }
    }
}

impl<D: Dht> BucketRefresher<D> {
    /// Creates a refresher over the collaborator; the schedule is not armed
    /// until [`start`](Self::start).
    pub fn new(dht: Arc<D>, settings: RefresherSettings) -> Self {
        let config = Config::new(&settings);

        Self {
            dht,
            settings,
            config,
            active: Arc::new(AtomicBool::new(false)),
            tasks: Arc::new(Mutex::new(Tasks {
                scheduler: None,
                cycle: None,
                closed: false,
            })),
        }
    }

    /// Returns a shared handle to the mutable configuration.
    pub fn config(&self) -> Config {
        self.config.clone()
    }

    /// Returns `true` while the periodic schedule is armed.
    pub fn is_running(&self) -> bool {
        self.tasks.lock().scheduler.is_some()
    }

    /// Returns `true` while a refresh cycle is in flight.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Arms the periodic schedule. A no-op while already armed; fails once the
    /// refresher has been closed.
    pub fn start(&self) -> Result<(), Error> {
        let mut tasks = self.tasks.lock();

        if tasks.closed {
            return Err(Error::Closed);
        }
        if tasks.scheduler.is_some() {
            return Ok(());
        }

        let this = self.clone();
        let frequency = self.settings.frequency;
        tasks.scheduler = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(frequency).await;
                this.process();
            }
        }));

        Ok(())
    }

    /// Runs one refresh tick: claims the re-entrancy flag and spawns a
    /// Ping-then-Lookup cycle. Returns `false` when the tick was skipped,
    /// either because the collaborator is not ready or because a previous
    /// cycle is still in flight.
    pub fn process(&self) -> bool {
        if !self.dht.is_ready() {
            trace!("not bootstrapped, skipping refresh tick");
            return false;
        }

        // At most one Ping ∪ Lookup cycle is ever in flight, regardless of the
        // tick frequency.
        if self
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            trace!("previous refresh cycle still in flight, skipping tick");
            return false;
        }

        let this = self.clone();
        let cycle = tokio::spawn(async move {
            let _guard = ActiveGuard(Arc::clone(&this.active));
            this.ping_phase().await;
            this.lookup_phase().await;
        });
        self.tasks.lock().cycle = Some(cycle);

        true
    }

    /// Disarms the schedule and cancels any cycle in flight.
    ///
    /// Canceling a completed cycle is a harmless no-op; because the phases run
    /// one operation at a time, aborting the current operation halts the
    /// progression and no further step fires.
    pub fn stop(&self) {
        let mut tasks = self.tasks.lock();

        if let Some(scheduler) = tasks.scheduler.take() {
            scheduler.abort();
        }
        if let Some(cycle) = tasks.cycle.take() {
            cycle.abort();
        }
    }

    /// Stops the refresher and permanently disables `start`. Idempotent.
    pub fn close(&self) {
        self.tasks.lock().closed = true;
        self.stop();
    }

    // Pings the stalest of the K contacts nearest to the local identifier,
    // one at a time, in snapshot order.
    async fn ping_phase(&self) {
        let ping_nearest = self.settings.ping_nearest;
        if ping_nearest.is_zero() {
            return;
        }

        let table = self.dht.route_table();
        let local = self.dht.local_contact();
        let now = OffsetDateTime::now_utc();

        let candidates: Vec<Contact> = table
            .select_closest(&local.id(), table.k(), SelectMode::All)
            .into_iter()
            .filter(|contact| !contact.is_local() && *contact != local)
            .filter(|contact| match contact.time_stamp() {
                Some(time_stamp) => now - time_stamp >= ping_nearest,
                None => true,
            })
            .collect();

        debug!(candidates = candidates.len(), "ping phase");

        for contact in candidates {
            let timeout = self.config.ping_timeout();
            // Failures are swallowed here; the collaborator's own failure path
            // feeds them into the route table.
            match self.dht.ping(contact.clone(), timeout).await {
                Ok(result) => {
                    trace!(contact = %result.contact, rtt = ?result.round_trip_time, "ping ok")
                }
                Err(error) => trace!(contact = %contact, %error, "ping failed"),
            }
        }
    }

    // Looks up one random identifier per stale bucket, one at a time, in
    // snapshot order.
    async fn lookup_phase(&self) {
        let targets = self.dht.route_table().refresh_ids(false);

        debug!(targets = targets.len(), "lookup phase");

        for target in targets {
            let timeout = self.config.lookup_timeout();
            match self.dht.lookup(target, timeout).await {
                Ok(result) => {
                    trace!(target = %result.target, found = result.contacts.len(), "lookup ok")
                }
                Err(error) => trace!(target = %target, %error, "lookup failed"),
            }
        }
    }
}

impl<D> fmt::Debug for BucketRefresher<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tasks = self.tasks.lock();
        f.debug_struct("BucketRefresher")
            .field("running", &tasks.scheduler.is_some())
            .field("active", &self.active.load(Ordering::Acquire))
            .field("closed", &tasks.closed)
            .field("config", &self.config)
            .finish()
    }
}
