//! Bookkeeping for optimistic toggle-style mutations.
//!
//! The cached value flips before the server answers; the ledger keeps the
//! previous value so a failure can restore it, and the mutation id ties the
//! eventual response back to exactly one pending entry. After a mutation
//! settles the cached value is either the server-confirmed value or the
//! original — never the optimistic guess.

use std::collections::HashMap;
use std::hash::Hash;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMutation<K, V> {
    pub resource_id: K,
    pub previous: V,
    pub proposed: V,
}

#[derive(Debug)]
pub struct MutationLedger<K, V> {
    pending: HashMap<String, PendingMutation<K, V>>,
}

impl<K, V> Default for MutationLedger<K, V> {
    fn default() -> Self {
        Self {
            pending: HashMap::new(),
        }
    }
}

impl<K, V> MutationLedger<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an applied optimistic change; returns the id the server
    /// response must settle with.
    pub fn begin(&mut self, resource_id: K, previous: V, proposed: V) -> String {
        let mutation_id = Uuid::new_v4().to_string();
        self.pending.insert(
            mutation_id.clone(),
            PendingMutation {
                resource_id,
                previous,
                proposed,
            },
        );
        mutation_id
    }

    /// The server confirmed: drop the entry. The caller applies whatever
    /// value the server reported, which may differ from `proposed`.
    pub fn commit(&mut self, mutation_id: &str) -> Option<PendingMutation<K, V>> {
        self.pending.remove(mutation_id)
    }

    /// The server call failed: the entry comes back so the caller can
    /// restore `previous`.
    pub fn rollback(&mut self, mutation_id: &str) -> Option<PendingMutation<K, V>> {
        self.pending.remove(mutation_id)
    }

    pub fn has_pending_for(&self, resource_id: &K) -> bool {
        self.pending.values().any(|m| &m.resource_id == resource_id)
    }

    pub fn pending_ids(&self) -> impl Iterator<Item = &str> {
        self.pending.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
