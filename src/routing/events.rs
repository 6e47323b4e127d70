//! Structural route-table events and the listener seam.

use crate::{contact::Contact, id::Kuid};

/// A structural mutation of the route table.
#[derive(Debug, Clone)]
pub enum RouteTableEvent {
    /// A contact entered a bucket's active set.
    AddActiveContact(Contact),
    /// A contact entered a bucket's replacement cache.
    AddCachedContact(Contact),
    /// An existing record was updated in place.
    UpdateContact { old: Contact, new: Contact },
    /// A contact took over another contact's slot in the active set.
    ReplaceContact { old: Contact, new: Contact },
    /// A contact was dropped from the table.
    RemoveContact(Contact),
    /// A bucket was bisected into two children.
    SplitBucket { prefix: Kuid, depth: usize },
    /// A contact was handed to the pinger for a liveness check.
    ContactCheck(Contact),
    /// The table was reset to its initial state.
    Clear,
}

/// Observer of structural route-table mutations.
///
/// Events are delivered synchronously on the mutating thread, at the moment of
/// mutation. Implementations must not block and must not re-enter the route
/// table.
pub trait RouteTableListener: Send + Sync {
    /// Called for every structural mutation.
    fn handle_event(&self, event: &RouteTableEvent);
}
