// src/storage/memory.rs
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::debug;
use crate::models::server::{Kind, ServerAddress, Snapshot};

/// Point-in-time copy of one registry slot, handed to `for_each` visitors.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub address: ServerAddress,
    pub kind: Kind,
    pub snapshot: Option<Snapshot>,
}

/// Latest snapshot per (address, kind). An address is refreshed for a kind
/// once it has been registered for it.
///
/// Locking is per shard inside the `DashMap`; readers only ever get clones.
#[derive(Default)]
pub struct Registry {
    entries: DashMap<(ServerAddress, Kind), Option<Snapshot>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Returns true if the address was not yet tracked for this kind.
    pub fn register(&self, address: &ServerAddress, kind: Kind) -> bool {
        match self.entries.entry((address.clone(), kind)) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(None);
                debug!("Registered {} for {} refreshes", address, kind);
                true
            }
        }
    }

    pub fn get(&self, address: &ServerAddress, kind: Kind) -> Option<Snapshot> {
        self.entries
            .get(&(address.clone(), kind))
            .and_then(|entry| entry.value().clone())
    }

    /// Last writer wins. Writing to a deleted address re-creates it.
    pub fn put(&self, address: &ServerAddress, snapshot: Snapshot) {
        self.entries
            .insert((address.clone(), snapshot.kind()), Some(snapshot));
    }

    /// Visits a copy of the entries taken before the first call to `visitor`,
    /// so the visitor may freely call back into the registry.
    pub fn for_each<F>(&self, mut visitor: F)
    where
        F: FnMut(&RegistryEntry),
    {
        let view: Vec<RegistryEntry> = self
            .entries
            .iter()
            .map(|r| RegistryEntry {
                address: r.key().0.clone(),
                kind: r.key().1,
                snapshot: r.value().clone(),
            })
            .collect();

        for entry in &view {
            visitor(entry);
        }
    }

    pub fn delete(&self, address: &ServerAddress) {
        for kind in Kind::ALL {
            self.entries.remove(&(address.clone(), kind));
        }
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
