//! A Kademlia-style DHT routing core: contacts, buckets, the route table and
//! its periodic maintenance loop.
//!
//! This crate implements the membership layer of a Kademlia node, not its wire
//! protocol. The [`routing::RouteTable`] owns a full partition of the 160-bit
//! identifier space into buckets of up to K contacts plus per-bucket
//! replacement caches; [`refresher::BucketRefresher`] keeps the table alive by
//! periodically pinging the stalest nearby contacts and looking up a random
//! identifier inside every stale bucket.
//!
//! Network traffic is delegated to an embedder-supplied [`traits::Dht`]
//! collaborator. Its success path is expected to report contacts back through
//! [`routing::RouteTable::add`], its failure path through
//! [`routing::RouteTable::handle_failure`]; the refresher only sequences the
//! traffic.
//!
//! Notable properties:
//!
//! 1. At most one refresh cycle (ping phase plus lookup phase) is ever in
//!    flight, regardless of the tick frequency.
//! 2. Within a cycle, operations run strictly one at a time, bounding the
//!    outstanding-request load against the transport.
//! 3. Structural mutations of the table fire synchronous
//!    [`routing::RouteTableEvent`]s for persistence and diagnostics.

pub mod bucket;
pub mod contact;
pub mod error;
pub mod id;
pub mod refresher;
pub mod routing;
pub mod settings;
pub mod traits;
pub mod version;

pub use crate::{
    contact::{Contact, ContactFactory, ContactFlags, ContactState},
    id::{Distance, Kuid},
    routing::{RouteTable, RoutingTable, SelectMode, SyncRouteTable},
    version::{Vendor, Version},
};
