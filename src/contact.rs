//! The DHT peer record and its liveness state machine.

use std::{
    cmp,
    fmt,
    hash::{Hash, Hasher},
    net::{IpAddr, Ipv4Addr, SocketAddr},
    ops::BitOr,
    time::Duration,
};

use time::OffsetDateTime;
use tracing::warn;

use crate::{
    id::Kuid,
    settings::RouteTableSettings,
    version::{Vendor, Version},
};

/// The liveness classification of a contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactState {
    /// Referenced by a third party, never observed directly.
    Unknown,
    /// Responded to us recently.
    Alive,
    /// Crossed its failure threshold.
    Dead,
}

/// Network-addressing flags carried in a contact's message envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContactFlags(u8);

impl ContactFlags {
    /// No flags set.
    pub const DEFAULT: ContactFlags = ContactFlags(0);
    /// The contact cannot receive unsolicited messages.
    pub const FIREWALLED: ContactFlags = ContactFlags(1);
    /// The contact announced an orderly shutdown.
    pub const SHUTDOWN: ContactFlags = ContactFlags(1 << 1);

    /// Returns `true` if all flags in `other` are set in `self`.
    pub fn contains(self, other: ContactFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns these flags with all flags in `other` set.
    pub fn with(self, other: ContactFlags) -> ContactFlags {
        ContactFlags(self.0 | other.0)
    }

    /// Returns these flags with all flags in `other` cleared.
    pub fn without(self, other: ContactFlags) -> ContactFlags {
        ContactFlags(self.0 & !other.0)
    }
}

impl BitOr for ContactFlags {
    type Output = ContactFlags;

    fn bitor(self, rhs: ContactFlags) -> ContactFlags {
        self.with(rhs)
    }
}

// The local identity is a distinct variant: it never equals a remote record,
// even when a remote peer claims the same identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContactKind {
    Local,
    Remote,
}

/// A DHT peer record, either a remote participant or the local node's own identity.
#[derive(Debug, Clone)]
pub struct Contact {
    kind: ContactKind,
    id: Kuid,
    vendor: Vendor,
    version: Version,
    instance_id: u32,
    // The address the last message actually arrived from; runtime-only.
    source_address: Option<SocketAddr>,
    // The address future messages are sent to.
    contact_address: SocketAddr,
    round_trip_time: Option<Duration>,
    // None means the contact has never been alive.
    time_stamp: Option<OffsetDateTime>,
    last_failed: Option<OffsetDateTime>,
    failures: u32,
    state: ContactState,
    flags: ContactFlags,
}

impl Contact {
    /// Returns the contact's identifier.
    pub fn id(&self) -> Kuid {
        self.id
    }

    /// Returns the contact's vendor code.
    pub fn vendor(&self) -> Vendor {
        self.vendor
    }

    /// Returns the contact's protocol version.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Returns the contact's instance identifier.
    pub fn instance_id(&self) -> u32 {
        self.instance_id
    }

    /// Returns the address the contact's last message arrived from, if any.
    pub fn source_address(&self) -> Option<SocketAddr> {
        self.source_address
    }

    /// Returns the address future messages are sent to.
    pub fn contact_address(&self) -> SocketAddr {
        self.contact_address
    }

    /// Overrides the contact address (e.g. once the local node learns its
    /// externally visible address).
    pub fn set_contact_address(&mut self, address: SocketAddr) {
        self.contact_address = address;
    }

    /// Returns the measured round-trip time, if one is known.
    pub fn round_trip_time(&self) -> Option<Duration> {
        self.round_trip_time
    }

    /// Records a round-trip time measurement.
    pub fn set_round_trip_time(&mut self, rtt: Duration) {
        self.round_trip_time = Some(rtt);
    }

    /// Returns the time of the last successful exchange, `None` if there never was one.
    pub fn time_stamp(&self) -> Option<OffsetDateTime> {
        self.time_stamp
    }

    /// Returns the time of the last failure, if any.
    pub fn last_failed(&self) -> Option<OffsetDateTime> {
        self.last_failed
    }

    /// Returns the current failure count.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Returns the contact's flags.
    pub fn flags(&self) -> ContactFlags {
        self.flags
    }

    /// Returns `true` if this record is the local node's own identity.
    pub fn is_local(&self) -> bool {
        self.kind == ContactKind::Local
    }

    /// Returns `true` if the contact cannot receive unsolicited messages.
    pub fn is_firewalled(&self) -> bool {
        self.flags.contains(ContactFlags::FIREWALLED)
    }

    /// Returns `true` if the contact announced an orderly shutdown.
    pub fn is_shutdown(&self) -> bool {
        self.flags.contains(ContactFlags::SHUTDOWN)
    }

    /// Marks or unmarks the contact as administratively shut down.
    pub fn shutdown(&mut self, shutdown: bool) {
        self.flags = if shutdown {
            self.flags.with(ContactFlags::SHUTDOWN)
        } else {
            self.flags.without(ContactFlags::SHUTDOWN)
        };
    }

    /// Returns `true` if the contact is alive. The local contact always is.
    pub fn is_alive(&self) -> bool {
        self.is_local() || self.state == ContactState::Alive
    }

    /// Returns `true` if the contact has crossed its failure threshold.
    pub fn is_dead(&self) -> bool {
        self.state == ContactState::Dead
    }

    /// Returns `true` if the contact has never been observed directly.
    pub fn is_unknown(&self) -> bool {
        !self.is_local() && self.state == ContactState::Unknown
    }

    /// Returns `true` if the contact has at least one recorded failure.
    pub fn has_failed(&self) -> bool {
        self.failures > 0
    }

    /// Returns `true` if the last successful exchange is younger than the
    /// reconnection grace period.
    pub fn has_been_recently_alive(&self, settings: &RouteTableSettings) -> bool {
        match self.time_stamp {
            Some(time_stamp) => {
                OffsetDateTime::now_utc() - time_stamp < settings.min_reconnection_time
            }
            None => false,
        }
    }

    /// Records a successful exchange: resets failures, refreshes the time stamp
    /// and marks the contact alive.
    pub fn alive(&mut self) {
        self.failures = 0;
        self.time_stamp = Some(OffsetDateTime::now_utc());
        self.state = ContactState::Alive;
    }

    /// Demotes the contact to `Unknown` so it has to prove its liveness again,
    /// e.g. when it is promoted out of a replacement cache.
    pub fn set_unknown(&mut self) {
        if !self.is_local() {
            self.state = ContactState::Unknown;
        }
    }

    /// Resets the runtime-only subset of the record (state, RTT, source address)
    /// to safe defaults. Applied when a contact is carried over into a rebuilt
    /// table rather than learned live.
    pub fn reset_runtime_state(&mut self) {
        if !self.is_local() {
            self.state = ContactState::Unknown;
        }
        self.round_trip_time = None;
        self.source_address = None;
    }

    /// Records a failed exchange.
    ///
    /// The failure counter is incremented and the failure time stamped. Unless
    /// the contact announced a shutdown, it transitions to `Dead` once the
    /// counter reaches the threshold for its history: contacts that have been
    /// alive before get `max_alive_failures`, never-contacted ones the smaller
    /// `max_unknown_failures`.
    pub fn handle_failure(&mut self, settings: &RouteTableSettings) {
        if self.is_local() {
            return;
        }

        self.failures += 1;
        self.last_failed = Some(OffsetDateTime::now_utc());

        if self.is_shutdown() {
            return;
        }

        let threshold = if self.time_stamp.is_some() {
            settings.max_alive_failures
        } else {
            settings.max_unknown_failures
        };

        if self.failures >= threshold {
            self.state = ContactState::Dead;
        }
    }

    /// Merges the history of an `existing` record for the same identifier into
    /// this freshly learned one. Freshness never regresses: the RTT is adopted
    /// if unknown here, and if this record is not alive or is older, the
    /// existing time stamp, failure count and failure time are carried over.
    pub fn merge_with(&mut self, existing: &Contact) {
        debug_assert_eq!(self.id, existing.id);

        if self.round_trip_time.is_none() {
            self.round_trip_time = existing.round_trip_time;
        }

        if !self.is_alive() || self.time_stamp < existing.time_stamp {
            if existing.time_stamp > self.time_stamp {
                self.time_stamp = existing.time_stamp;
            }
            self.failures = existing.failures;
            self.last_failed = existing.last_failed;
            // The incumbent's classification stands; a third-hand record does
            // not demote an alive contact.
            if !self.is_local() {
                self.state = existing.state;
            }
        }
    }

    /// Derives a timeout for the next request to this contact.
    ///
    /// With a known RTT on an alive contact the timeout is
    /// `rtt_factor * rtt + failures * rtt`, clamped between the configured
    /// minimum and `default`: historically fast peers time out sooner, while
    /// accumulating failures inflate the allowance instead of failing hard.
    pub fn adaptive_timeout(&self, default: Duration, settings: &RouteTableSettings) -> Duration {
        match self.round_trip_time {
            Some(rtt) if self.is_alive() => {
                let derived = rtt * settings.rtt_factor + rtt * self.failures;
                cmp::min(default, cmp::max(settings.min_rtt_timeout, derived))
            }
            _ => default,
        }
    }
}

// Same kind, identifier and contact address; the transient fields don't factor in.
impl PartialEq for Contact {
    fn eq(&self, other: &Contact) -> bool {
        self.kind == other.kind
            && self.id == other.id
            && self.contact_address == other.contact_address
    }
}

impl Eq for Contact {}

// Hash by identifier only, so records differing only in a stale address still
// land in the same map slot.
impl Hash for Contact {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Contact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ContactKind::Local => write!(f, "local:{}({})", self.id, self.contact_address),
            ContactKind::Remote => write!(f, "{}({})", self.id, self.contact_address),
        }
    }
}

/// Builds [`Contact`] records, carrying the address-acceptance policy applied
/// to peer-supplied addressing data.
#[derive(Debug, Clone)]
pub struct ContactFactory {
    accept_private_addresses: bool,
}

impl ContactFactory {
    /// Creates a factory with the given private-address acceptance policy.
    pub fn new(accept_private_addresses: bool) -> Self {
        Self {
            accept_private_addresses,
        }
    }

    /// Creates a factory with the policy taken from the route table settings.
    pub fn from_settings(settings: &RouteTableSettings) -> Self {
        Self::new(settings.accept_private_addresses)
    }

    /// Constructs the local node's identity with a freshly generated identifier.
    pub fn local_contact(
        &self,
        vendor: Vendor,
        version: Version,
        instance_id: u32,
        firewalled: bool,
    ) -> Contact {
        self.local_contact_with_id(vendor, version, Kuid::rand(), instance_id, firewalled)
    }

    /// Constructs the local node's identity with the supplied identifier.
    ///
    /// The contact address starts out unspecified until the externally visible
    /// address is learned via [`Contact::set_contact_address`].
    pub fn local_contact_with_id(
        &self,
        vendor: Vendor,
        version: Version,
        id: Kuid,
        instance_id: u32,
        firewalled: bool,
    ) -> Contact {
        let flags = if firewalled {
            ContactFlags::FIREWALLED
        } else {
            ContactFlags::DEFAULT
        };

        Contact {
            kind: ContactKind::Local,
            id,
            vendor,
            version,
            instance_id,
            source_address: None,
            contact_address: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            round_trip_time: None,
            time_stamp: Some(OffsetDateTime::now_utc()),
            last_failed: None,
            failures: 0,
            state: ContactState::Alive,
            flags,
        }
    }

    /// Constructs a contact from a just-received message envelope.
    ///
    /// Peer-supplied addressing is corrected rather than rejected: a port-0
    /// contact address marks the peer firewalled, and an advertised host that
    /// differs from the observed source is overridden with the source host
    /// (unless the source is a private address and the policy forbids it).
    pub fn live_contact(
        &self,
        source_address: SocketAddr,
        vendor: Vendor,
        version: Version,
        id: Kuid,
        contact_address: SocketAddr,
        instance_id: u32,
        flags: ContactFlags,
    ) -> Contact {
        let mut flags = flags;
        let mut contact_address = contact_address;

        if contact_address.port() == 0 && !flags.contains(ContactFlags::FIREWALLED) {
            warn!(contact = %id, %contact_address, "port-0 contact address, marking firewalled");
            flags = flags.with(ContactFlags::FIREWALLED);
        }

        if contact_address.ip() != source_address.ip()
            && (self.accept_private_addresses || !is_private_address(&source_address.ip()))
        {
            warn!(
                contact = %id,
                advertised = %contact_address,
                observed = %source_address,
                "advertised host differs from source, using the observed host"
            );
            contact_address = SocketAddr::new(source_address.ip(), contact_address.port());
        }

        Contact {
            kind: ContactKind::Remote,
            id,
            vendor,
            version,
            instance_id,
            source_address: Some(source_address),
            contact_address,
            round_trip_time: None,
            time_stamp: Some(OffsetDateTime::now_utc()),
            last_failed: None,
            failures: 0,
            state: ContactState::Alive,
            flags,
        }
    }

    /// Constructs a contact that was referenced by a third party but never
    /// observed directly.
    pub fn unknown_contact(
        &self,
        vendor: Vendor,
        version: Version,
        id: Kuid,
        contact_address: SocketAddr,
    ) -> Contact {
        let flags = if contact_address.port() == 0 {
            ContactFlags::FIREWALLED
        } else {
            ContactFlags::DEFAULT
        };

        Contact {
            kind: ContactKind::Remote,
            id,
            vendor,
            version,
            instance_id: 0,
            source_address: None,
            contact_address,
            round_trip_time: None,
            time_stamp: None,
            last_failed: None,
            failures: 0,
            state: ContactState::Unknown,
            flags,
        }
    }
}

// Conservative "is this a LAN-ish host" check for the forced-address policy.
fn is_private_address(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback() || v4.is_link_local(),
        // fc00::/7 (unique local) and loopback.
        IpAddr::V6(v6) => v6.is_loopback() || (v6.segments()[0] & 0xfe00) == 0xfc00,
    }
}
