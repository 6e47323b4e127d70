//! A contiguous partition of the identifier space.

use std::{fmt, time::Duration};

use time::OffsetDateTime;

use crate::{contact::Contact, id::Kuid};

/// A bucket covers all identifiers sharing the first `depth` bits of its
/// prefix. It owns a bounded set of active contacts plus a replacement cache
/// for overflow, kept in least-recently-seen order.
#[derive(Debug, Clone)]
pub struct Bucket {
    // Low bound of the covered range; all bits beyond `depth` are zero.
    prefix: Kuid,
    depth: usize,
    active: Vec<Contact>,
    cache: Vec<Contact>,
    // None means the bucket has never been refreshed and is always a target.
    last_refresh: Option<OffsetDateTime>,
}

impl Bucket {
    pub(crate) fn new(prefix: Kuid, depth: usize) -> Self {
        Self {
            prefix,
            depth,
            active: Vec::new(),
            cache: Vec::new(),
            last_refresh: None,
        }
    }

    /// Returns the bucket's identifier prefix, which is also the low bound of
    /// its range.
    pub fn prefix(&self) -> Kuid {
        self.prefix
    }

    /// Returns the number of prefix bits that identify this bucket.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Returns the inclusive low bound of the covered range.
    pub fn low(&self) -> Kuid {
        self.prefix
    }

    /// Returns the inclusive high bound of the covered range.
    pub fn high(&self) -> Kuid {
        let mut high = self.prefix;
        for i in self.depth..Kuid::BITS {
            high = high.with_bit(i, true);
        }

        high
    }

    /// Returns `true` if the identifier falls within this bucket's range.
    pub fn contains(&self, id: &Kuid) -> bool {
        (0..self.depth).all(|i| id.bit(i) == self.prefix.bit(i))
    }

    /// Returns the active contacts, in insertion order.
    pub fn active_contacts(&self) -> &[Contact] {
        &self.active
    }

    /// Returns the cached overflow contacts.
    pub fn cached_contacts(&self) -> &[Contact] {
        &self.cache
    }

    /// Returns the number of contacts held, active and cached.
    pub fn len(&self) -> usize {
        self.active.len() + self.cache.len()
    }

    /// Returns `true` if the bucket holds no contacts at all.
    pub fn is_empty(&self) -> bool {
        self.active.is_empty() && self.cache.is_empty()
    }

    /// Returns the contact with the given identifier, active or cached.
    pub fn get(&self, id: &Kuid) -> Option<&Contact> {
        self.active
            .iter()
            .find(|contact| contact.id() == *id)
            .or_else(|| self.cache.iter().find(|contact| contact.id() == *id))
    }

    pub(crate) fn get_mut(&mut self, id: &Kuid) -> Option<&mut Contact> {
        if let Some(i) = self.active.iter().position(|contact| contact.id() == *id) {
            return self.active.get_mut(i);
        }

        let i = self.cache.iter().position(|contact| contact.id() == *id)?;
        self.cache.get_mut(i)
    }

    /// Returns `true` if an active contact with the identifier exists.
    pub fn contains_active(&self, id: &Kuid) -> bool {
        self.active.iter().any(|contact| contact.id() == *id)
    }

    /// Returns `true` if a cached contact with the identifier exists.
    pub fn contains_cached(&self, id: &Kuid) -> bool {
        self.cache.iter().any(|contact| contact.id() == *id)
    }

    /// Returns `true` if the active set is at capacity.
    pub fn is_active_full(&self, k: usize) -> bool {
        self.active.len() >= k
    }

    pub(crate) fn add_active(&mut self, contact: Contact) {
        debug_assert!(self.contains(&contact.id()));
        debug_assert!(!self.contains_active(&contact.id()));
        self.active.push(contact);
    }

    // Replaces the record with the same identifier in place, returning the
    // previous record.
    pub(crate) fn update(&mut self, contact: Contact) -> Option<Contact> {
        let slot = if let Some(i) = self
            .active
            .iter()
            .position(|existing| existing.id() == contact.id())
        {
            &mut self.active[i]
        } else {
            let i = self
                .cache
                .iter()
                .position(|existing| existing.id() == contact.id())?;
            &mut self.cache[i]
        };

        Some(std::mem::replace(slot, contact))
    }

    pub(crate) fn remove_active(&mut self, id: &Kuid) -> Option<Contact> {
        let i = self.active.iter().position(|contact| contact.id() == *id)?;
        Some(self.active.remove(i))
    }

    pub(crate) fn remove_cached(&mut self, id: &Kuid) -> Option<Contact> {
        let i = self.cache.iter().position(|contact| contact.id() == *id)?;
        Some(self.cache.remove(i))
    }

    // Adds a contact to the replacement cache. A record with the same
    // identifier is replaced in place; once the cache is at `max_cache_size`
    // the least-recently-seen entry is evicted and returned.
    pub(crate) fn add_cached(&mut self, contact: Contact, max_cache_size: usize) -> Option<Contact> {
        debug_assert!(self.contains(&contact.id()));

        if let Some(i) = self
            .cache
            .iter()
            .position(|existing| existing.id() == contact.id())
        {
            return Some(std::mem::replace(&mut self.cache[i], contact));
        }

        let evicted = if self.cache.len() >= max_cache_size {
            self.least_recently_seen_cached_index()
                .map(|i| self.cache.remove(i))
        } else {
            None
        };

        self.cache.push(contact);
        evicted
    }

    /// Returns the active contact with the oldest successful exchange. The
    /// local contact is never a candidate.
    pub fn least_recently_seen_active(&self) -> Option<&Contact> {
        self.active
            .iter()
            .filter(|contact| !contact.is_local())
            .min_by_key(|contact| contact.time_stamp())
    }

    /// Returns the cached contact with the freshest successful exchange.
    pub fn most_recently_seen_cached(&self) -> Option<&Contact> {
        self.cache.iter().max_by_key(|contact| contact.time_stamp())
    }

    fn least_recently_seen_cached_index(&self) -> Option<usize> {
        self.cache
            .iter()
            .enumerate()
            .min_by_key(|(_, contact)| contact.time_stamp())
            .map(|(i, _)| i)
    }

    /// Returns the time of the last refresh, `None` if there never was one.
    pub fn last_refresh(&self) -> Option<OffsetDateTime> {
        self.last_refresh
    }

    pub(crate) fn touch(&mut self) {
        self.last_refresh = Some(OffsetDateTime::now_utc());
    }

    /// Returns `true` if the bucket's last refresh is older than `interval`.
    pub fn needs_refresh(&self, interval: Duration) -> bool {
        match self.last_refresh {
            Some(last_refresh) => OffsetDateTime::now_utc() - last_refresh >= interval,
            None => true,
        }
    }

    /// Generates a random identifier within this bucket's range.
    pub fn random_id(&self) -> Kuid {
        Kuid::random_within(&self.prefix, self.depth)
    }

    // Bisects the covered range, redistributing active and cached contacts by
    // the bit just past the current prefix.
    pub(crate) fn split(self) -> (Bucket, Bucket) {
        debug_assert!(self.depth < Kuid::BITS);

        let depth = self.depth + 1;
        let mut left = Bucket::new(self.prefix, depth);
        let mut right = Bucket::new(self.prefix.with_bit(self.depth, true), depth);

        left.last_refresh = self.last_refresh;
        right.last_refresh = self.last_refresh;

        for contact in self.active {
            if contact.id().bit(self.depth) {
                right.active.push(contact);
            } else {
                left.active.push(contact);
            }
        }

        for contact in self.cache {
            if contact.id().bit(self.depth) {
                right.cache.push(contact);
            } else {
                left.cache.push(contact);
            }
        }

        (left, right)
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Bucket({}/{}, {} active, {} cached)",
            self.prefix,
            self.depth,
            self.active.len(),
            self.cache.len()
        )
    }
}
