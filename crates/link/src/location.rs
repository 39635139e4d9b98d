//! Local user location caches.
//!
//! Hints only: the locator stays authoritative, and entries are evicted
//! whenever a target reports it no longer holds the user.

use common::{Kind, LocationEvent, LocationEventKind};
use dashmap::DashMap;
use metrics::counter;
use std::collections::HashMap;
use tracing::debug;

/// Applies locator change events to a cache.
pub trait ApplyLocation: Send + Sync + 'static {
    fn apply(&self, event: &LocationEvent);
}

/// uid → gate instance id.
#[derive(Debug, Default)]
pub struct GateLocations {
    sources: DashMap<i64, String>,
}

impl GateLocations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&self, uid: i64) -> Option<String> {
        self.sources.get(&uid).map(|gid| gid.value().clone())
    }

    pub fn store(&self, uid: i64, gid: &str) {
        self.sources.insert(uid, gid.to_string());
    }

    pub fn evict(&self, uid: i64) -> Option<String> {
        self.sources.remove(&uid).map(|(_, gid)| gid)
    }

    /// Evict only if the cached gate is still `gid`.
    pub fn evict_stale(&self, uid: i64, gid: &str) -> bool {
        self.sources.remove_if(&uid, |_, cached| cached == gid).is_some()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl ApplyLocation for GateLocations {
    fn apply(&self, event: &LocationEvent) {
        if event.instance_kind != Kind::Gate {
            return;
        }
        match event.kind {
            LocationEventKind::Bind => self.store(event.uid, &event.instance_id),
            LocationEventKind::Unbind => {
                self.evict(event.uid);
            }
        }
        counter!("link_location_events_total", "kind" => "gate").increment(1);
        debug!(uid = event.uid, gid = %event.instance_id, "Applied gate location {:?}", event.kind);
    }
}

/// uid → (group → node instance id).
#[derive(Debug, Default)]
pub struct NodeLocations {
    sources: DashMap<i64, HashMap<String, String>>,
}

impl NodeLocations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&self, uid: i64, group: &str) -> Option<String> {
        self.sources
            .get(&uid)
            .and_then(|groups| groups.get(group).cloned())
    }

    pub fn store(&self, uid: i64, group: &str, nid: &str) {
        self.sources
            .entry(uid)
            .or_default()
            .insert(group.to_string(), nid.to_string());
    }

    /// Remove one group binding; the uid entry goes once its last group is gone.
    pub fn evict(&self, uid: i64, group: &str) -> Option<String> {
        let removed = self
            .sources
            .get_mut(&uid)
            .and_then(|mut groups| groups.remove(group));
        self.sources.remove_if(&uid, |_, groups| groups.is_empty());
        removed
    }

    /// Evict one group binding only if it still points at `nid`.
    pub fn evict_stale(&self, uid: i64, group: &str, nid: &str) -> bool {
        let removed = self
            .sources
            .get_mut(&uid)
            .map(|mut groups| {
                if groups.get(group).is_some_and(|cached| cached == nid) {
                    groups.remove(group);
                    true
                } else {
                    false
                }
            })
            .unwrap_or(false);
        self.sources.remove_if(&uid, |_, groups| groups.is_empty());
        removed
    }

    /// Groups the user currently has a cached binding in.
    pub fn groups(&self, uid: i64) -> Vec<String> {
        self.sources
            .get(&uid)
            .map(|groups| groups.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl ApplyLocation for NodeLocations {
    fn apply(&self, event: &LocationEvent) {
        if event.instance_kind != Kind::Node {
            return;
        }
        match event.kind {
            LocationEventKind::Bind => {
                self.store(event.uid, &event.instance_group, &event.instance_id)
            }
            LocationEventKind::Unbind => {
                self.evict(event.uid, &event.instance_group);
            }
        }
        counter!("link_location_events_total", "kind" => "node").increment(1);
        debug!(
            uid = event.uid,
            nid = %event.instance_id,
            group = %event.instance_group,
            "Applied node location {:?}",
            event.kind
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(uid: i64, kind: LocationEventKind, instance_kind: Kind, id: &str, group: &str) -> LocationEvent {
        LocationEvent {
            uid,
            kind,
            instance_id: id.to_string(),
            instance_kind,
            instance_group: group.to_string(),
        }
    }

    #[test]
    fn test_gate_store_and_evict() {
        let cache = GateLocations::new();
        assert!(cache.load(1).is_none());

        cache.store(1, "g1");
        cache.store(1, "g2");
        assert_eq!(cache.load(1).as_deref(), Some("g2"));
        assert!(!cache.evict_stale(1, "g1"));
        assert_eq!(cache.evict(1).as_deref(), Some("g2"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_node_groups_are_independent() {
        let cache = NodeLocations::new();
        cache.store(7, "game", "n1");
        cache.store(7, "chat", "n2");

        assert_eq!(cache.load(7, "game").as_deref(), Some("n1"));
        assert_eq!(cache.load(7, "chat").as_deref(), Some("n2"));
        assert!(cache.load(7, "mail").is_none());

        assert!(!cache.evict_stale(7, "game", "n9"));
        assert_eq!(cache.evict(7, "game").as_deref(), Some("n1"));
        assert_eq!(cache.groups(7), vec!["chat".to_string()]);
        assert_eq!(cache.len(), 1);

        cache.evict(7, "chat");
        assert!(cache.is_empty());
    }

    #[test]
    fn test_apply_filters_by_instance_kind() {
        let gates = GateLocations::new();
        let nodes = NodeLocations::new();

        let bind_gate = event(1, LocationEventKind::Bind, Kind::Gate, "g1", "");
        let bind_node = event(1, LocationEventKind::Bind, Kind::Node, "n1", "game");
        for e in [&bind_gate, &bind_node] {
            gates.apply(e);
            nodes.apply(e);
        }
        assert_eq!(gates.load(1).as_deref(), Some("g1"));
        assert_eq!(nodes.load(1, "game").as_deref(), Some("n1"));

        nodes.apply(&event(1, LocationEventKind::Unbind, Kind::Node, "n1", "game"));
        gates.apply(&event(1, LocationEventKind::Unbind, Kind::Gate, "g1", ""));
        assert!(gates.is_empty());
        assert!(nodes.is_empty());
    }
}
