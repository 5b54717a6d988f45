use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::types::{PeerId, PeerProfile, PeerRecord};

/// Concurrent table of known remote peers, keyed by peer id.
///
/// Profile and address live in the same record so they are always inserted
/// and removed together. The map is sharded: a write to one peer never
/// blocks reads of another.
#[derive(Clone, Debug, Default)]
pub struct PeerRegistry {
    peers: Arc<DashMap<PeerId, PeerRecord>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the record for `profile.id`.
    pub fn upsert(&self, profile: PeerProfile, address: SocketAddr) {
        self.peers
            .insert(profile.id, PeerRecord { profile, address });
    }

    /// Insert only if the id is unknown. Returns whether a record was added.
    pub fn insert_new(&self, profile: PeerProfile, address: SocketAddr) -> bool {
        match self.peers.entry(profile.id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(PeerRecord { profile, address });
                true
            }
        }
    }

    pub fn remove(&self, id: &PeerId) -> Option<PeerRecord> {
        self.peers.remove(id).map(|(_, record)| record)
    }

    pub fn get(&self, id: &PeerId) -> Option<PeerRecord> {
        self.peers.get(id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, id: &PeerId) -> bool {
        self.peers.contains_key(id)
    }

    /// Set a peer's nickname, returning the old one. Absent ids are left
    /// absent.
    pub fn rename_nick(&self, id: &PeerId, nickname: impl Into<String>) -> Option<String> {
        let mut entry = self.peers.get_mut(id)?;
        Some(std::mem::replace(
            &mut entry.profile.nickname,
            nickname.into(),
        ))
    }

    /// Point-in-time copy of every record, sorted by id.
    pub fn snapshot(&self) -> Vec<PeerRecord> {
        let mut records: Vec<PeerRecord> = self
            .peers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by_key(|record| record.profile.id);
        records
    }

    /// Visit a snapshot of the registry. `f` may freely mutate the registry.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&PeerRecord),
    {
        for record in self.snapshot() {
            f(&record);
        }
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn clear(&self) {
        self.peers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::thread;

    fn profile(nick: &str) -> PeerProfile {
        PeerProfile::new(PeerId::random(), nick, vec![0u8; 32])
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, 5], port))
    }

    #[test]
    fn insert_new_keeps_first_record() {
        let registry = PeerRegistry::new();
        let alice = profile("alice");
        assert!(registry.insert_new(alice.clone(), addr(9100)));
        let mut impostor = alice.clone();
        impostor.nickname = "mallory".into();
        assert!(!registry.insert_new(impostor, addr(9999)));
        let record = registry.get(&alice.id).expect("registered");
        assert_eq!(record.profile.nickname, "alice");
        assert_eq!(record.address, addr(9100));
    }

    #[test]
    fn upsert_replaces_address() {
        let registry = PeerRegistry::new();
        let alice = profile("alice");
        registry.upsert(alice.clone(), addr(1));
        registry.upsert(alice.clone(), addr(2));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&alice.id).map(|r| r.address), Some(addr(2)));
    }

    #[test]
    fn remove_reports_whether_peer_existed() {
        let registry = PeerRegistry::new();
        let alice = profile("alice");
        registry.upsert(alice.clone(), addr(1));
        assert!(registry.remove(&alice.id).is_some());
        assert!(registry.remove(&alice.id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn rename_nick_only_touches_known_peers() {
        let registry = PeerRegistry::new();
        let alice = profile("alice");
        registry.upsert(alice.clone(), addr(1));
        assert_eq!(
            registry.rename_nick(&alice.id, "alicia"),
            Some("alice".to_string())
        );
        assert_eq!(
            registry.get(&alice.id).map(|r| r.profile.nickname),
            Some("alicia".to_string())
        );
        assert_eq!(registry.rename_nick(&PeerId::random(), "ghost"), None);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn for_each_tolerates_mutation_from_callback() {
        let registry = PeerRegistry::new();
        for port in 0..8 {
            registry.upsert(profile("peer"), addr(port));
        }
        let mut visited = 0;
        registry.for_each(|record| {
            visited += 1;
            registry.remove(&record.profile.id);
            registry.upsert(profile("late"), record.address);
        });
        assert_eq!(visited, 8);
        assert_eq!(registry.len(), 8);
    }

    #[test]
    fn concurrent_inserts_from_many_threads() {
        let registry = PeerRegistry::new();
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let registry = registry.clone();
                thread::spawn(move || {
                    for i in 0..50u16 {
                        registry.insert_new(profile("peer"), addr(t * 100 + i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("thread");
        }
        assert_eq!(registry.len(), 400);
    }

    proptest! {
        #[test]
        fn size_tracks_distinct_ids(ids in proptest::collection::vec(0u8..32, 0..64)) {
            let registry = PeerRegistry::new();
            let mut seen = std::collections::HashSet::new();
            for raw in ids {
                let id = PeerId::from_bytes([raw; 16]);
                registry.insert_new(PeerProfile::new(id, "peer", Vec::new()), addr(u16::from(raw)));
                seen.insert(raw);
                prop_assert_eq!(registry.len(), seen.len());
            }
        }
    }
}
