//! Seams to the messaging collaborator this crate consumes.

use std::time::Duration;

use async_trait::async_trait;

use crate::{
    contact::Contact,
    error::DhtError,
    id::Kuid,
    routing::SyncRouteTable,
};

/// The outcome of a successful ping.
#[derive(Debug, Clone)]
pub struct PingResult {
    /// The contact that answered.
    pub contact: Contact,
    /// The measured round-trip time.
    pub round_trip_time: Duration,
}

/// The outcome of a successful FIND_NODE lookup.
#[derive(Debug, Clone)]
pub struct NodeResult {
    /// The identifier the lookup targeted.
    pub target: Kuid,
    /// Contacts close to the target, as reported by the network.
    pub contacts: Vec<Contact>,
}

/// The messaging/RPC collaborator the maintenance loop drives.
///
/// Implementations are expected to feed results back into the route table
/// themselves: a successful exchange ends in [`RouteTable::add`] (or the
/// contact's `alive()`), a failed one in [`RouteTable::handle_failure`]. The
/// refresher only sequences the traffic; it never does that accounting.
///
/// [`RouteTable::add`]: crate::routing::RouteTable::add
/// [`RouteTable::handle_failure`]: crate::routing::RouteTable::handle_failure
#[async_trait]
pub trait Dht: Send + Sync + 'static {
    /// Returns `true` once the node is bootstrapped enough to be maintained.
    fn is_ready(&self) -> bool;

    /// Returns a handle to the node's route table.
    fn route_table(&self) -> SyncRouteTable;

    /// Returns the local node's identity record.
    fn local_contact(&self) -> Contact;

    /// Sends a liveness probe to the contact.
    async fn ping(&self, contact: Contact, timeout: Duration) -> Result<PingResult, DhtError>;

    /// Runs a FIND_NODE lookup for the identifier.
    async fn lookup(&self, id: Kuid, timeout: Duration) -> Result<NodeResult, DhtError>;
}

/// Fire-and-forget liveness checks issued by the route table itself, e.g. to
/// probe an incumbent contact before a cached replacement may take its slot.
///
/// The implementation routes the outcome back through the regular
/// `add`/`handle_failure` paths; the route table does not wait for it.
pub trait ContactPinger: Send + Sync {
    /// Requests a liveness check of the contact.
    fn ping(&self, contact: &Contact);
}
