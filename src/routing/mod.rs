//! Core route table implementation.

use std::{collections::BTreeMap, fmt, net::SocketAddr, sync::Arc, time::Duration};

use time::OffsetDateTime;
use tracing::{debug, trace, warn};

use crate::{
    bucket::Bucket,
    contact::Contact,
    id::Kuid,
    settings::RouteTableSettings,
    traits::ContactPinger,
};

mod events;
mod sync;

pub use events::{RouteTableEvent, RouteTableListener};
pub use sync::SyncRouteTable;

/// Filters which contacts are eligible for a closeness selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectMode {
    /// Every active contact, regardless of state.
    All,
    /// Alive contacts only, excluding the local contact.
    Alive,
    /// Alive contacts with the local contact always included first.
    AliveWithLocal,
}

/// The authoritative view of the network: a full, disjoint partition of the
/// identifier space into buckets.
///
/// There is one production implementation, [`RoutingTable`]; the trait is the
/// seam other components depend on and tests substitute.
pub trait RouteTable {
    /// Inserts a contact, or updates the existing record for its identifier.
    fn add(&mut self, contact: Contact);

    /// Exact lookup by identifier; no network I/O.
    fn get(&self, id: &Kuid) -> Option<Contact>;

    /// Returns the single closest contact by XOR distance. `Some` whenever the
    /// table is non-empty.
    fn select(&self, id: &Kuid) -> Option<Contact>;

    /// Returns up to `count` contacts ordered by ascending XOR distance to `id`.
    fn select_closest(&self, id: &Kuid, count: usize, mode: SelectMode) -> Vec<Contact>;

    /// Records a failed exchange with the contact matching `id` and `address`.
    ///
    /// A best-effort no-op when no such pair exists: by the time a network
    /// failure callback fires, the contact may already be gone.
    fn handle_failure(&mut self, id: &Kuid, address: SocketAddr);

    /// Produces one random in-range identifier per refresh-eligible bucket;
    /// when `bootstrapping`, every bucket is eligible.
    fn refresh_ids(&self, bootstrapping: bool) -> Vec<Kuid>;

    /// Returns all contacts, active and cached.
    fn contacts(&self) -> Vec<Contact>;

    /// Returns all active contacts.
    fn active_contacts(&self) -> Vec<Contact>;

    /// Returns all cached contacts.
    fn cached_contacts(&self) -> Vec<Contact>;

    /// Returns a snapshot of all buckets.
    fn buckets(&self) -> Vec<Bucket>;

    /// Returns the number of contacts held, active and cached.
    fn size(&self) -> usize;

    /// Returns the local node's identity record.
    fn local_contact(&self) -> Contact;

    /// Drops all unknown and dead contacts; with `elapsed`, additionally all
    /// contacts not heard from within that window.
    fn purge(&mut self, elapsed: Option<Duration>);

    /// Rebuilds the bucket partition from scratch from the surviving contacts,
    /// resetting their runtime-only state.
    fn rebuild(&mut self, elapsed: Option<Duration>);

    /// Resets the table to a single empty bucket holding only the local contact.
    fn clear(&mut self);

    /// Registers a listener for structural events.
    fn add_listener(&mut self, listener: Arc<dyn RouteTableListener>);

    /// Unregisters a previously registered listener.
    fn remove_listener(&mut self, listener: &Arc<dyn RouteTableListener>);

    /// Plugs in the pinger used for liveness checks of incumbent contacts.
    fn set_contact_pinger(&mut self, pinger: Arc<dyn ContactPinger>);
}

/// The production [`RouteTable`] implementation.
pub struct RoutingTable {
    settings: RouteTableSettings,
    local: Contact,
    // Keyed by each bucket's low bound; the partition invariant makes
    // `range(..=id).next_back()` the owning-bucket lookup.
    buckets: BTreeMap<Kuid, Bucket>,
    consecutive_failures: u32,
    listeners: Vec<Arc<dyn RouteTableListener>>,
    pinger: Option<Arc<dyn ContactPinger>>,
}

impl RoutingTable {
    /// Creates a table owning the full identifier space, with the local
    /// contact in its single root bucket.
    pub fn new(local: Contact, settings: RouteTableSettings) -> Self {
        debug_assert!(local.is_local());

        let mut table = Self {
            settings,
            local,
            buckets: BTreeMap::new(),
            consecutive_failures: 0,
            listeners: Vec::new(),
            pinger: None,
        };
        table.init();

        table
    }

    /// Returns the settings this table was built with.
    pub fn settings(&self) -> &RouteTableSettings {
        &self.settings
    }

    /// Returns `true` if the bucket owning `id` also holds the local node's
    /// identifier.
    pub fn is_local_bucket(&self, id: &Kuid) -> bool {
        self.bucket_for(id).contains(&self.local.id())
    }

    /// Swaps the local identity and re-partitions the table around it.
    pub fn set_local_contact(&mut self, local: Contact) {
        debug_assert!(local.is_local());

        debug!(old = %self.local, new = %local, "local identity changed, rebuilding");
        self.local = local;
        self.rebuild(None);
    }

    fn init(&mut self) {
        self.buckets.clear();
        let mut root = Bucket::new(Kuid::MIN, 0);
        root.add_active(self.local.clone());
        self.buckets.insert(Kuid::MIN, root);
        self.consecutive_failures = 0;
    }

    fn fire(&self, event: RouteTableEvent) {
        for listener in &self.listeners {
            listener.handle_event(&event);
        }
    }

    fn bucket_prefix_for(&self, id: &Kuid) -> Kuid {
        self.buckets
            .range(..=*id)
            .next_back()
            .map(|(&prefix, _)| prefix)
            .expect("the partition covers the full identifier space")
    }

    fn bucket_for(&self, id: &Kuid) -> &Bucket {
        self.buckets
            .range(..=*id)
            .next_back()
            .map(|(_, bucket)| bucket)
            .expect("the partition covers the full identifier space")
    }

    // The local bucket may always split; others only while the depth
    // relaxation allows it.
    fn can_split(&self, bucket: &Bucket) -> bool {
        bucket.depth() < Kuid::BITS
            && (bucket.contains(&self.local.id())
                || bucket.depth() % self.settings.depth_limit != 0)
    }

    fn split_bucket(&mut self, prefix: Kuid) {
        let bucket = self
            .buckets
            .remove(&prefix)
            .expect("split target was just selected");
        let depth = bucket.depth();
        trace!(%bucket, "splitting");

        let (left, right) = bucket.split();
        self.buckets.insert(left.prefix(), left);
        self.buckets.insert(right.prefix(), right);

        self.fire(RouteTableEvent::SplitBucket { prefix, depth });
    }

    // Refresh of our own identity record, e.g. once the externally visible
    // address is learned.
    fn update_local_contact(&mut self, contact: Contact) {
        if contact.id() != self.local.id() {
            warn!(
                contact = %contact,
                "local identity changes must go through set_local_contact, ignoring"
            );
            return;
        }

        let old = self.local.clone();
        self.local = contact.clone();

        let prefix = self.bucket_prefix_for(&contact.id());
        let bucket = self
            .buckets
            .get_mut(&prefix)
            .expect("the partition covers the full identifier space");
        let replaced = bucket.update(contact.clone());
        debug_assert!(replaced.is_some());

        self.fire(RouteTableEvent::UpdateContact { old, new: contact });
    }

    fn update_contact(&mut self, prefix: Kuid, existing: Contact, mut node: Contact) {
        debug_assert_eq!(existing.id(), node.id());

        if !existing.is_alive() || existing == node {
            node.merge_with(&existing);

            let touch = node.is_alive();
            let bucket = self
                .buckets
                .get_mut(&prefix)
                .expect("the partition covers the full identifier space");
            let replaced = bucket.update(node.clone());
            debug_assert!(replaced.is_some());
            if touch {
                bucket.touch();
            }

            self.fire(RouteTableEvent::UpdateContact {
                old: existing,
                new: node,
            });
        } else if node.is_alive() && !existing.has_been_recently_alive(&self.settings) {
            // A record from a different address claims an identifier held by an
            // alive contact; check the incumbent's liveness before believing it.
            debug!(incumbent = %existing, claimant = %node, "address conflict, checking incumbent");
            self.check_contact(existing);
        } else {
            trace!(contact = %node, "dropping conflicting record for a recently alive contact");
        }
    }

    fn replace_or_cache(&mut self, prefix: Kuid, node: Contact) {
        let max_cache_size = self.settings.max_cache_size;

        // An alive contact may take the slot of a least-recently-seen incumbent
        // that never proved its liveness.
        if node.is_alive() {
            let bucket = self
                .buckets
                .get_mut(&prefix)
                .expect("the partition covers the full identifier space");
            let unproven = bucket
                .least_recently_seen_active()
                .filter(|lrs| lrs.is_unknown())
                .cloned();

            if let Some(lrs) = unproven {
                let removed = bucket.remove_active(&lrs.id());
                debug_assert!(removed.is_some());
                bucket.add_active(node.clone());
                bucket.touch();

                self.fire(RouteTableEvent::ReplaceContact {
                    old: lrs,
                    new: node,
                });
                return;
            }
        }

        trace!(contact = %node, "adding to replacement cache");

        let (evicted, check) = {
            let bucket = self
                .buckets
                .get_mut(&prefix)
                .expect("the partition covers the full identifier space");
            let evicted = bucket.add_cached(node.clone(), max_cache_size);
            let check = bucket.least_recently_seen_active().cloned();

            (evicted, check)
        };

        if let Some(evicted) = evicted {
            self.fire(RouteTableEvent::RemoveContact(evicted));
        }
        self.fire(RouteTableEvent::AddCachedContact(node));

        // Probe the least-recently-seen incumbent; its failure path is what
        // eventually promotes the cached contact.
        if let Some(check) = check {
            self.check_contact(check);
        }
    }

    fn check_contact(&self, contact: Contact) {
        if let Some(pinger) = &self.pinger {
            pinger.ping(&contact);
            self.fire(RouteTableEvent::ContactCheck(contact));
        }
    }

    // Resets the partition and re-adds the survivors through the regular
    // insertion path.
    fn partition_from(&mut self, survivors: Vec<Contact>) {
        self.init();
        for contact in survivors {
            self.add(contact);
        }
    }

    fn survivors(&self, elapsed: Option<Duration>) -> impl Iterator<Item = Contact> + '_ {
        let now = OffsetDateTime::now_utc();

        self.buckets
            .values()
            .flat_map(|bucket| {
                bucket
                    .active_contacts()
                    .iter()
                    .chain(bucket.cached_contacts().iter())
            })
            .filter(|contact| !contact.is_local())
            .filter(move |contact| match elapsed {
                None => true,
                Some(max) => match contact.time_stamp() {
                    Some(time_stamp) => now - time_stamp < max,
                    None => false,
                },
            })
            .cloned()
    }
}

impl RouteTable for RoutingTable {
    fn add(&mut self, contact: Contact) {
        if contact.is_local() {
            self.update_local_contact(contact);
            return;
        }

        if contact.id() == self.local.id() {
            warn!(contact = %contact, "remote contact claims our identifier, ignoring");
            return;
        }

        // Firewalled peers can't answer queries; they have no place in the table.
        if contact.is_firewalled() {
            trace!(contact = %contact, "ignoring firewalled contact");
            return;
        }

        self.consecutive_failures = 0;

        let id = contact.id();
        loop {
            let prefix = self.bucket_prefix_for(&id);
            let bucket = self
                .buckets
                .get_mut(&prefix)
                .expect("the partition covers the full identifier space");

            if let Some(existing) = bucket.get(&id).cloned() {
                self.update_contact(prefix, existing, contact);
                return;
            }

            if !bucket.is_active_full(self.settings.k) {
                bucket.add_active(contact.clone());
                if contact.is_alive() {
                    bucket.touch();
                }

                self.fire(RouteTableEvent::AddActiveContact(contact));
                return;
            }

            if self.can_split(self.bucket_for(&id)) {
                self.split_bucket(prefix);
                // Re-try against the bisected partition.
                continue;
            }

            self.replace_or_cache(prefix, contact);
            return;
        }
    }

    fn get(&self, id: &Kuid) -> Option<Contact> {
        self.bucket_for(id).get(id).cloned()
    }

    fn select(&self, id: &Kuid) -> Option<Contact> {
        self.select_closest(id, 1, SelectMode::All).into_iter().next()
    }

    fn select_closest(&self, id: &Kuid, count: usize, mode: SelectMode) -> Vec<Contact> {
        if count == 0 {
            return Vec::new();
        }

        let mut candidates: Vec<Contact> = self
            .buckets
            .values()
            .flat_map(|bucket| bucket.active_contacts().iter())
            .filter(|contact| match mode {
                SelectMode::All => true,
                SelectMode::Alive | SelectMode::AliveWithLocal => {
                    !contact.is_local() && contact.is_alive()
                }
            })
            .cloned()
            .collect();

        // The full XOR distance is a total order over distinct identifiers, so
        // the sort is deterministic.
        candidates.sort_unstable_by_key(|contact| contact.id().xor(id));

        match mode {
            SelectMode::AliveWithLocal => {
                candidates.truncate(count.saturating_sub(1));
                candidates.insert(0, self.local.clone());
            }
            _ => candidates.truncate(count),
        }

        candidates
    }

    fn handle_failure(&mut self, id: &Kuid, address: SocketAddr) {
        // Pings to address-only contacts come back without a known identifier;
        // and the local node never fails.
        if *id == self.local.id() {
            return;
        }

        // Failures arriving in an uninterrupted streak are a sign that we are
        // the ones who lost connectivity; stop tearing the table down.
        if self.consecutive_failures >= self.settings.max_consecutive_failures {
            trace!("ignoring failure, we appear to be disconnected");
            return;
        }

        let settings = self.settings.clone();
        let prefix = self.bucket_prefix_for(id);
        let mut events = Vec::new();

        {
            let bucket = self
                .buckets
                .get_mut(&prefix)
                .expect("the partition covers the full identifier space");

            let contact = match bucket.get_mut(id) {
                Some(contact) if contact.contact_address() == address => contact,
                // Neither active nor cached under this id+address pair.
                _ => return,
            };

            contact.handle_failure(&settings);

            if contact.is_dead() {
                let dead = contact.clone();

                if bucket.contains_active(id) {
                    // The dead contact keeps its slot until the cache can
                    // provide a replacement; an empty bucket routes worse than
                    // a stale one.
                    if let Some(mrs) = bucket.most_recently_seen_cached().cloned() {
                        let removed = bucket.remove_active(id);
                        debug_assert!(removed.is_some());

                        let mut promoted = bucket
                            .remove_cached(&mrs.id())
                            .expect("cached contact was just selected");
                        promoted.set_unknown();
                        bucket.add_active(promoted.clone());
                        bucket.touch();

                        events.push(RouteTableEvent::ReplaceContact {
                            old: dead,
                            new: promoted,
                        });
                    }
                } else {
                    let removed = bucket.remove_cached(id);
                    debug_assert!(removed.is_some());
                    events.push(RouteTableEvent::RemoveContact(dead));
                }
            }
        }

        self.consecutive_failures += 1;

        for event in events {
            self.fire(event);
        }
    }

    fn refresh_ids(&self, bootstrapping: bool) -> Vec<Kuid> {
        let mut ids = Vec::new();

        for bucket in self.buckets.values() {
            if bootstrapping || bucket.needs_refresh(self.settings.bucket_refresh_interval) {
                let id = bucket.random_id();
                trace!(%bucket, target = %id, "bucket is a refresh target");
                ids.push(id);
            }
        }

        ids
    }

    fn contacts(&self) -> Vec<Contact> {
        let mut contacts = self.active_contacts();
        contacts.extend(self.cached_contacts());
        contacts
    }

    fn active_contacts(&self) -> Vec<Contact> {
        self.buckets
            .values()
            .flat_map(|bucket| bucket.active_contacts().iter())
            .cloned()
            .collect()
    }

    fn cached_contacts(&self) -> Vec<Contact> {
        self.buckets
            .values()
            .flat_map(|bucket| bucket.cached_contacts().iter())
            .cloned()
            .collect()
    }

    fn buckets(&self) -> Vec<Bucket> {
        self.buckets.values().cloned().collect()
    }

    fn size(&self) -> usize {
        self.buckets.values().map(|bucket| bucket.len()).sum()
    }

    fn local_contact(&self) -> Contact {
        self.local.clone()
    }

    fn purge(&mut self, elapsed: Option<Duration>) {
        let survivors: Vec<Contact> = self
            .survivors(elapsed)
            .filter(|contact| !contact.is_dead() && !contact.is_unknown())
            .collect();

        debug!(kept = survivors.len(), "purging route table");
        self.partition_from(survivors);
    }

    fn rebuild(&mut self, elapsed: Option<Duration>) {
        let survivors: Vec<Contact> = self
            .survivors(elapsed)
            .map(|mut contact| {
                // Carried-over records have to prove themselves again.
                contact.reset_runtime_state();
                contact
            })
            .collect();

        debug!(kept = survivors.len(), "rebuilding route table");
        self.partition_from(survivors);
    }

    fn clear(&mut self) {
        self.init();
        self.fire(RouteTableEvent::Clear);
    }

    fn add_listener(&mut self, listener: Arc<dyn RouteTableListener>) {
        self.listeners.push(listener);
    }

    fn remove_listener(&mut self, listener: &Arc<dyn RouteTableListener>) {
        self.listeners
            .retain(|registered| !Arc::ptr_eq(registered, listener));
    }

    fn set_contact_pinger(&mut self, pinger: Arc<dyn ContactPinger>) {
        self.pinger = Some(pinger);
    }
}

impl fmt::Debug for RoutingTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutingTable")
            .field("local", &self.local)
            .field("buckets", &self.buckets.len())
            .field("size", &self.size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::{
        contact::{ContactFactory, ContactFlags},
        version::{Vendor, Version},
    };

    struct EventLog(Mutex<Vec<RouteTableEvent>>);

    impl EventLog {
        fn new() -> Arc<Self> {
            Arc::new(Self(Mutex::new(Vec::new())))
        }

        fn events(&self) -> Vec<RouteTableEvent> {
            self.0.lock().unwrap().clone()
        }
    }

    impl RouteTableListener for EventLog {
        fn handle_event(&self, event: &RouteTableEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    fn table_settings(k: usize, depth_limit: usize) -> RouteTableSettings {
        RouteTableSettings {
            k,
            depth_limit,
            ..Default::default()
        }
    }

    fn localhost_with_port(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    fn table(local_raw: u16, settings: RouteTableSettings) -> RoutingTable {
        let local = ContactFactory::new(false).local_contact_with_id(
            Vendor::UNKNOWN,
            Version::ZERO,
            Kuid::from_u16(local_raw),
            0,
            false,
        );

        RoutingTable::new(local, settings)
    }

    fn alive_contact(raw: u16) -> Contact {
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

    fn unknown_contact(raw: u16) -> Contact {
        ContactFactory::new(false).unknown_contact(
            Vendor::UNKNOWN,
            Version::ZERO,
            Kuid::from_u16(raw),
            localhost_with_port(raw),
        )
    }

    #[test]
    fn new_table_holds_the_local_contact() {
        let rt = table(0, table_settings(20, 4));

        assert_eq!(rt.size(), 1);
        assert_eq!(rt.buckets().len(), 1);
        assert_eq!(rt.get(&Kuid::from_u16(0)), Some(rt.local_contact()));
    }

    #[test]
    fn add_and_get() {
        let mut rt = table(0, table_settings(20, 4));

        rt.add(alive_contact(1));

        assert_eq!(rt.size(), 2);
        let contact = rt.get(&Kuid::from_u16(1)).unwrap();
        assert_eq!(contact.contact_address(), localhost_with_port(1));
    }

    #[test]
    fn add_is_idempotent_and_never_regresses_freshness() {
        let mut rt = table(0, table_settings(20, 4));

        rt.add(alive_contact(1));
        let first = rt.get(&Kuid::from_u16(1)).unwrap();

        // Same id and address, learned third-hand this time.
        rt.add(unknown_contact(1));

        assert_eq!(rt.size(), 2);
        let merged = rt.get(&Kuid::from_u16(1)).unwrap();
        assert!(merged.time_stamp() >= first.time_stamp());
        assert_eq!(merged.failures(), 0);
    }

    #[test]
    fn remote_claiming_the_local_id_is_ignored() {
        let mut rt = table(0, table_settings(20, 4));

        rt.add(alive_contact(0));

        assert_eq!(rt.size(), 1);
        assert!(rt.get(&Kuid::from_u16(0)).unwrap().is_local());
    }

    #[test]
    fn firewalled_contacts_are_ignored() {
        let mut rt = table(0, table_settings(20, 4));

        let mut contact = alive_contact(1);
        contact = {
            let factory = ContactFactory::new(false);
            factory.live_contact(
                contact.contact_address(),
                contact.vendor(),
                contact.version(),
                contact.id(),
                contact.contact_address(),
                0,
                ContactFlags::FIREWALLED,
            )
        };

        rt.add(contact);
        assert_eq!(rt.size(), 1);
    }

    #[test]
    fn full_local_bucket_splits() {
        let log = EventLog::new();
        let mut rt = table(0, table_settings(1, 4));
        rt.add_listener(log.clone());

        // ... 1000 -> other half of the space than the local id.
        rt.add(alive_contact(0b1000_0000_0000_0000));

        assert_eq!(rt.buckets().len(), 2);
        assert_eq!(rt.active_contacts().len(), 2);
        assert_eq!(
            log.events()
                .iter()
                .filter(|event| matches!(event, RouteTableEvent::SplitBucket { .. }))
                .count(),
            1
        );
    }

    #[test]
    fn overflow_lands_in_the_replacement_cache() {
        let log = EventLog::new();
        // depth_limit 1: non-local buckets never split.
        let mut rt = table(0, table_settings(1, 1));
        rt.add_listener(log.clone());

        rt.add(unknown_contact(0b1000_0000_0000_0000));
        rt.add(unknown_contact(0b1100_0000_0000_0000));

        assert_eq!(rt.active_contacts().len(), 2);
        assert_eq!(rt.cached_contacts().len(), 1);
        assert_eq!(rt.size(), 3);
        assert!(log
            .events()
            .iter()
            .any(|event| matches!(event, RouteTableEvent::AddCachedContact(_))));
    }

    #[test]
    fn alive_contact_replaces_an_unproven_incumbent() {
        let mut rt = table(0, table_settings(1, 1));

        rt.add(unknown_contact(0b1000_0000_0000_0000));
        rt.add(alive_contact(0b1100_0000_0000_0000));

        // The unknown incumbent lost its slot to the alive newcomer.
        let active = rt.active_contacts();
        assert!(active
            .iter()
            .any(|contact| contact.id() == Kuid::from_u16(0b1100_0000_0000_0000)));
        assert!(!active
            .iter()
            .any(|contact| contact.id() == Kuid::from_u16(0b1000_0000_0000_0000)));
        assert!(rt.cached_contacts().is_empty());
    }

    #[test]
    fn dead_active_contact_is_replaced_from_the_cache() {
        let log = EventLog::new();
        let mut rt = table(0, table_settings(1, 1));
        rt.add_listener(log.clone());

        let incumbent = alive_contact(0b1000_0000_0000_0000);
        let cached = alive_contact(0b1100_0000_0000_0000);
        rt.add(incumbent.clone());
        rt.add(cached.clone());

        assert!(rt.cached_contacts().len() == 1);

        let max_alive_failures = rt.settings().max_alive_failures;
        for _ in 0..max_alive_failures {
            rt.handle_failure(&incumbent.id(), incumbent.contact_address());
        }

        let active = rt.active_contacts();
        assert!(active.iter().any(|contact| contact.id() == cached.id()));
        assert!(!active.iter().any(|contact| contact.id() == incumbent.id()));
        assert!(rt.cached_contacts().is_empty());
        // The promoted contact has to prove itself again.
        assert!(rt.get(&cached.id()).unwrap().is_unknown());
        assert!(log
            .events()
            .iter()
            .any(|event| matches!(event, RouteTableEvent::ReplaceContact { .. })));
    }

    #[test]
    fn dead_contact_without_replacement_keeps_its_slot() {
        let mut rt = table(0, table_settings(1, 1));

        let incumbent = alive_contact(0b1000_0000_0000_0000);
        rt.add(incumbent.clone());

        for _ in 0..rt.settings().max_alive_failures {
            rt.handle_failure(&incumbent.id(), incumbent.contact_address());
        }

        let contact = rt.get(&incumbent.id()).unwrap();
        assert!(contact.is_dead());
        assert_eq!(rt.active_contacts().len(), 2);
    }

    #[test]
    fn failure_for_an_unknown_pair_is_a_noop() {
        let mut rt = table(0, table_settings(20, 4));
        rt.add(alive_contact(1));

        // Unknown id.
        rt.handle_failure(&Kuid::from_u16(42), localhost_with_port(42));
        // Known id, stale address.
        rt.handle_failure(&Kuid::from_u16(1), localhost_with_port(9));

        assert_eq!(rt.get(&Kuid::from_u16(1)).unwrap().failures(), 0);
    }

    #[test]
    fn failure_streaks_are_ignored_once_disconnected() {
        let mut rt = table(
            0,
            RouteTableSettings {
                max_consecutive_failures: 1,
                ..table_settings(20, 4)
            },
        );

        let a = alive_contact(1);
        let b = alive_contact(2);
        rt.add(a.clone());
        rt.add(b.clone());

        rt.handle_failure(&a.id(), a.contact_address());
        // The streak guard kicks in; this one is dropped.
        rt.handle_failure(&b.id(), b.contact_address());

        assert_eq!(rt.get(&a.id()).unwrap().failures(), 1);
        assert_eq!(rt.get(&b.id()).unwrap().failures(), 0);

        // A successful add resets the streak.
        rt.add(alive_contact(3));
        rt.handle_failure(&b.id(), b.contact_address());
        assert_eq!(rt.get(&b.id()).unwrap().failures(), 1);
    }

    #[test]
    fn select_is_some_on_a_non_empty_table() {
        let rt = table(0, table_settings(20, 4));
        assert!(rt.select(&Kuid::rand()).is_some());
    }

    #[test]
    fn select_orders_by_xor_distance() {
        let mut rt = table(0, table_settings(20, 4));

        rt.add(alive_contact(0x0100));
        rt.add(alive_contact(0x0200));
        rt.add(alive_contact(0x0300));

        // Distances to 0x0100: 0x0100 -> 0, 0x0300 -> 0x0200, 0x0200 -> 0x0300.
        // The full XOR distance is a total order, so this is deterministic.
        let target = Kuid::from_u16(0x0100);
        let selected = rt.select_closest(&target, 3, SelectMode::Alive);

        let ids: Vec<Kuid> = selected.iter().map(|contact| contact.id()).collect();
        assert_eq!(
            ids,
            vec![
                Kuid::from_u16(0x0100),
                Kuid::from_u16(0x0300),
                Kuid::from_u16(0x0200),
            ]
        );
    }

    #[test]
    fn select_modes_filter_by_state() {
        let settings = table_settings(20, 4);
        let mut rt = table(0, settings.clone());

        let alive = alive_contact(1);
        let unknown = unknown_contact(2);
        let dying = unknown_contact(3);
        rt.add(alive.clone());
        rt.add(unknown.clone());
        rt.add(dying.clone());

        for _ in 0..settings.max_unknown_failures {
            rt.handle_failure(&dying.id(), dying.contact_address());
        }
        assert!(rt.get(&dying.id()).unwrap().is_dead());

        let target = Kuid::from_u16(0);

        // All: local + alive + unknown + dead.
        assert_eq!(rt.select_closest(&target, 10, SelectMode::All).len(), 4);

        // Alive: only the alive remote.
        let selected = rt.select_closest(&target, 10, SelectMode::Alive);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].id(), alive.id());

        // AliveWithLocal: the local contact first, then the alive remote.
        let selected = rt.select_closest(&target, 10, SelectMode::AliveWithLocal);
        assert_eq!(selected.len(), 2);
        assert!(selected[0].is_local());
        assert_eq!(selected[1].id(), alive.id());
    }

    #[test]
    fn refresh_ids_targets_stale_buckets() {
        let mut rt = table(0, table_settings(1, 4));

        // A fresh table has never been refreshed; its single bucket is a target.
        assert_eq!(rt.refresh_ids(false).len(), 1);

        // An alive add touches the bucket.
        rt.add(alive_contact(0b1000_0000_0000_0000));
        let buckets = rt.buckets();
        assert_eq!(buckets.len(), 2);

        let stale: Vec<Kuid> = rt.refresh_ids(false);
        // Only buckets that never saw alive traffic remain targets.
        for id in &stale {
            let bucket = buckets.iter().find(|bucket| bucket.contains(id)).unwrap();
            assert!(bucket.last_refresh().is_none());
        }

        // Bootstrapping targets every bucket, fresh or not.
        assert_eq!(rt.refresh_ids(true).len(), buckets.len());
    }

    #[test]
    fn purge_drops_unknown_and_dead_contacts() {
        let settings = table_settings(20, 4);
        let mut rt = table(0, settings.clone());

        let alive = alive_contact(1);
        let unknown = unknown_contact(2);
        let dying = unknown_contact(3);
        rt.add(alive.clone());
        rt.add(unknown);
        rt.add(dying.clone());

        for _ in 0..settings.max_unknown_failures {
            rt.handle_failure(&dying.id(), dying.contact_address());
        }

        rt.purge(None);

        assert_eq!(rt.size(), 2);
        assert!(rt.get(&alive.id()).is_some());
    }

    #[test]
    fn rebuild_resets_runtime_state() {
        let mut rt = table(0, table_settings(20, 4));

        rt.add(alive_contact(1));
        rt.rebuild(None);

        assert_eq!(rt.size(), 2);
        let contact = rt.get(&Kuid::from_u16(1)).unwrap();
        assert!(contact.is_unknown());
        assert!(contact.round_trip_time().is_none());
        // The persistent subset survives the rebuild.
        assert!(contact.time_stamp().is_some());
    }

    #[test]
    fn clear_resets_to_the_initial_state() {
        let log = EventLog::new();
        let mut rt = table(0, table_settings(1, 4));
        rt.add_listener(log.clone());

        rt.add(alive_contact(0b1000_0000_0000_0000));
        rt.add(alive_contact(0b0100_0000_0000_0000));
        rt.clear();

        assert_eq!(rt.size(), 1);
        assert_eq!(rt.buckets().len(), 1);
        assert!(log
            .events()
            .iter()
            .any(|event| matches!(event, RouteTableEvent::Clear)));
    }

    #[test]
    fn listeners_can_be_removed() {
        let log = EventLog::new();
        let mut rt = table(0, table_settings(20, 4));

        let listener: Arc<dyn RouteTableListener> = log.clone();
        rt.add_listener(listener.clone());
        rt.remove_listener(&listener);

        rt.add(alive_contact(1));
        assert!(log.events().is_empty());
    }
}
