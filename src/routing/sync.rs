use std::{net::SocketAddr, sync::Arc, time::Duration};

use parking_lot::RwLock;

use crate::{
    bucket::Bucket,
    contact::Contact,
    id::Kuid,
    routing::{RouteTable, RouteTableListener, RoutingTable, SelectMode},
    traits::ContactPinger,
};

/// A cheaply clonable, thread-safe handle to a [`RoutingTable`].
///
/// Network-receive threads and the refresher share the table through this
/// handle; every call serializes through one reader-writer lock, which keeps
/// structural mutations (splits) atomic with respect to concurrent lookups.
#[derive(Clone)]
pub struct SyncRouteTable {
    inner: Arc<RwLock<RoutingTable>>,
}

impl SyncRouteTable {
    /// Wraps a routing table into a shared handle.
    pub fn new(table: RoutingTable) -> Self {
        Self {
            inner: Arc::new(RwLock::new(table)),
        }
    }

    /// The replication parameter K the table was built with.
    pub fn k(&self) -> usize {
        self.inner.read().settings().k
    }

    /// See [`RouteTable::add`].
    pub fn add(&self, contact: Contact) {
        self.inner.write().add(contact)
    }

    /// See [`RouteTable::get`].
    pub fn get(&self, id: &Kuid) -> Option<Contact> {
        self.inner.read().get(id)
    }

    /// See [`RouteTable::select`].
    pub fn select(&self, id: &Kuid) -> Option<Contact> {
        self.inner.read().select(id)
    }

    /// See [`RouteTable::select_closest`].
    pub fn select_closest(&self, id: &Kuid, count: usize, mode: SelectMode) -> Vec<Contact> {
        self.inner.read().select_closest(id, count, mode)
    }

    /// See [`RouteTable::handle_failure`].
    pub fn handle_failure(&self, id: &Kuid, address: SocketAddr) {
        self.inner.write().handle_failure(id, address)
    }

    /// See [`RouteTable::refresh_ids`].
    pub fn refresh_ids(&self, bootstrapping: bool) -> Vec<Kuid> {
        self.inner.read().refresh_ids(bootstrapping)
    }

    /// See [`RouteTable::contacts`].
    pub fn contacts(&self) -> Vec<Contact> {
        self.inner.read().contacts()
    }

    /// See [`RouteTable::active_contacts`].
    pub fn active_contacts(&self) -> Vec<Contact> {
        self.inner.read().active_contacts()
    }

    /// See [`RouteTable::cached_contacts`].
    pub fn cached_contacts(&self) -> Vec<Contact> {
        self.inner.read().cached_contacts()
    }

    /// See [`RouteTable::buckets`].
    pub fn buckets(&self) -> Vec<Bucket> {
        self.inner.read().buckets()
    }

    /// See [`RouteTable::size`].
    pub fn size(&self) -> usize {
        self.inner.read().size()
    }

    /// See [`RouteTable::local_contact`].
    pub fn local_contact(&self) -> Contact {
        self.inner.read().local_contact()
    }

    /// See [`RoutingTable::is_local_bucket`].
    pub fn is_local_bucket(&self, id: &Kuid) -> bool {
        self.inner.read().is_local_bucket(id)
    }

    /// See [`RouteTable::purge`].
    pub fn purge(&self, elapsed: Option<Duration>) {
        self.inner.write().purge(elapsed)
    }

    /// See [`RouteTable::rebuild`].
    pub fn rebuild(&self, elapsed: Option<Duration>) {
        self.inner.write().rebuild(elapsed)
    }

    /// See [`RoutingTable::set_local_contact`].
    pub fn set_local_contact(&self, local: Contact) {
        self.inner.write().set_local_contact(local)
    }

    /// See [`RouteTable::clear`].
    pub fn clear(&self) {
        self.inner.write().clear()
    }

    /// See [`RouteTable::add_listener`].
    pub fn add_listener(&self, listener: Arc<dyn RouteTableListener>) {
        self.inner.write().add_listener(listener)
    }

    /// See [`RouteTable::remove_listener`].
    pub fn remove_listener(&self, listener: &Arc<dyn RouteTableListener>) {
        self.inner.write().remove_listener(listener)
    }

    /// See [`RouteTable::set_contact_pinger`].
    pub fn set_contact_pinger(&self, pinger: Arc<dyn ContactPinger>) {
        self.inner.write().set_contact_pinger(pinger)
    }
}

impl std::fmt::Debug for SyncRouteTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.inner.read().fmt(f)
    }
}
