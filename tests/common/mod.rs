// Not every test binary uses every helper.
#![allow(dead_code)]

use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use kadroute::{
    error::DhtError,
    routing::{RouteTableEvent, RouteTableListener},
    settings::{RefresherSettings, RouteTableSettings},
    traits::{Dht, NodeResult, PingResult},
    Contact, ContactFactory, ContactFlags, Kuid, RoutingTable, SyncRouteTable, Vendor, Version,
};
use parking_lot::Mutex;
use tracing_subscriber::{fmt, EnvFilter};

pub fn enable_tracing() {
    fmt()
        .with_test_writer()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
}

pub fn localhost_with_port(port: u16) -> SocketAddr {
    format!("127.0.0.1:{port}").parse().unwrap()
}

pub fn local_contact(raw: u16) -> Contact {
    ContactFactory::new(false).local_contact_with_id(
        Vendor::UNKNOWN,
        Version::ZERO,
        Kuid::from_u16(raw),
        0,
        false,
    )
}

pub fn alive_contact(raw: u16) -> Contact {
    let addr = localhost_with_port(raw);
    ContactFactory::new(false).live_contact(
        addr,
        Vendor::UNKNOWN,
        Version::ZERO,
        Kuid::from_u16(raw),
        addr,
        0,
        ContactFlags::DEFAULT,
    )
}

pub fn unknown_contact(raw: u16) -> Contact {
    ContactFactory::new(false).unknown_contact(
        Vendor::UNKNOWN,
        Version::ZERO,
        Kuid::from_u16(raw),
        localhost_with_port(raw),
    )
}

/// Records every structural event the table fires.
pub struct EventLog(Mutex<Vec<RouteTableEvent>>);

impl EventLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self(Mutex::new(Vec::new())))
    }

    pub fn events(&self) -> Vec<RouteTableEvent> {
        self.0.lock().clone()
    }

    pub fn count(&self, matcher: impl Fn(&RouteTableEvent) -> bool) -> usize {
        self.0.lock().iter().filter(|event| matcher(event)).count()
    }
}

impl RouteTableListener for EventLog {
    fn handle_event(&self, event: &RouteTableEvent) {
        self.0.lock().push(event.clone());
    }
}

const PINGS_SENTINEL: usize = usize::MAX;

/// A scriptable stand-in for the messaging collaborator.
///
/// Pings and lookups are recorded in call order; pings can be stalled forever
/// or made to fail, and the readiness flag is toggleable.
pub struct FakeDht {
    ready: AtomicBool,
    stall_pings: AtomicBool,
    fail_pings: AtomicBool,
    table: SyncRouteTable,
    local: Contact,
    pub pings: Mutex<Vec<Kuid>>,
    pub lookups: Mutex<Vec<Kuid>>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    // Number of completed pings observed at the moment of the first lookup.
    pings_at_first_lookup: AtomicUsize,
}

impl FakeDht {
    /// Builds a fake around a table with the given number of never-contacted
    /// peers (identifiers 1..=count), all of them ping candidates.
    pub fn new(contact_count: u16) -> Arc<Self> {
        let local = local_contact(0);
        let table = SyncRouteTable::new(RoutingTable::new(
            local.clone(),
            RouteTableSettings::default(),
        ));

        for raw in 1..=contact_count {
            table.add(unknown_contact(raw));
        }

        Arc::new(Self {
            ready: AtomicBool::new(true),
            stall_pings: AtomicBool::new(false),
            fail_pings: AtomicBool::new(false),
            table,
            local,
            pings: Mutex::new(Vec::new()),
            lookups: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            pings_at_first_lookup: AtomicUsize::new(PINGS_SENTINEL),
        })
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn set_stall_pings(&self, stall: bool) {
        self.stall_pings.store(stall, Ordering::SeqCst);
    }

    pub fn set_fail_pings(&self, fail: bool) {
        self.fail_pings.store(fail, Ordering::SeqCst);
    }

    pub fn ping_count(&self) -> usize {
        self.pings.lock().len()
    }

    pub fn lookup_count(&self) -> usize {
        self.lookups.lock().len()
    }

    /// Completed pings observed when the lookup phase started, if it did.
    pub fn pings_before_first_lookup(&self) -> Option<usize> {
        match self.pings_at_first_lookup.load(Ordering::SeqCst) {
            PINGS_SENTINEL => None,
            count => Some(count),
        }
    }

    /// Refresher settings suited to driving ticks manually from tests.
    pub fn test_settings() -> RefresherSettings {
        RefresherSettings {
            frequency: Duration::from_secs(600),
            ping_nearest: Duration::from_millis(1),
            ping_timeout: Duration::from_secs(1),
            lookup_timeout: Duration::from_secs(1),
        }
    }
}

#[async_trait]
impl Dht for FakeDht {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn route_table(&self) -> SyncRouteTable {
        self.table.clone()
    }

    fn local_contact(&self) -> Contact {
        self.local.clone()
    }

    async fn ping(&self, contact: Contact, timeout: Duration) -> Result<PingResult, DhtError> {
        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        self.pings.lock().push(contact.id());

        if self.stall_pings.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        tokio::time::sleep(Duration::from_millis(2)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_pings.load(Ordering::SeqCst) {
            return Err(DhtError::Timeout(timeout));
        }

        Ok(PingResult {
            contact,
            round_trip_time: Duration::from_millis(1),
        })
    }

    async fn lookup(&self, id: Kuid, _timeout: Duration) -> Result<NodeResult, DhtError> {
        let _ = self.pings_at_first_lookup.compare_exchange(
            PINGS_SENTINEL,
            self.ping_count(),
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        self.lookups.lock().push(id);

        Ok(NodeResult {
            target: id,
            contacts: Vec::new(),
        })
    }
}
