//! Tab node pool
//!
//! Hands out the small integer slots ("tab nodes") that hold local tabs in
//! the replicated store. Every node is in exactly one of three states:
//!
//! ```text
//! unassociated ──reassociate──▶ associated ◀──allocate── free
//!       │                          │                     ▲
//!       └──delete_unassociated─────┴────────free─────────┘
//! ```
//!
//! Unassociated nodes were found in the store at merge time and wait for a
//! local tab to claim them. Free nodes are reused lowest id first; a new id
//! is only introduced when nothing is free, and ids are never renumbered.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use axiom_tabs::{TabId, TabNodeId};

use crate::change::{tab_node_tag, SyncChange, SyncChangeList, SyncData};
use crate::specifics::SessionSpecifics;
use crate::Result;

pub const DEFAULT_FREE_NODES_HIGH_WATERMARK: usize = 100;
pub const DEFAULT_FREE_NODES_LOW_WATERMARK: usize = 25;

#[derive(Debug, Clone)]
pub struct TabNodePool {
    machine_tag: String,
    associated: BTreeMap<TabNodeId, TabId>,
    tab_to_node: HashMap<TabId, TabNodeId>,
    /// Value is the tab id the node's record last held, if it held one
    unassociated: BTreeMap<TabNodeId, Option<TabId>>,
    free: BTreeSet<TabNodeId>,
    /// Highest id ever introduced; 0 before the first
    max_used: TabNodeId,
    high_watermark: usize,
    low_watermark: usize,
}

impl Default for TabNodePool {
    fn default() -> Self {
        Self::new(
            DEFAULT_FREE_NODES_HIGH_WATERMARK,
            DEFAULT_FREE_NODES_LOW_WATERMARK,
        )
    }
}

impl TabNodePool {
    pub fn new(high_watermark: usize, low_watermark: usize) -> Self {
        Self {
            machine_tag: String::new(),
            associated: BTreeMap::new(),
            tab_to_node: HashMap::new(),
            unassociated: BTreeMap::new(),
            free: BTreeSet::new(),
            max_used: 0,
            high_watermark,
            low_watermark: low_watermark.min(high_watermark),
        }
    }

    pub fn set_machine_tag(&mut self, machine_tag: impl Into<String>) {
        self.machine_tag = machine_tag.into();
    }

    pub fn machine_tag(&self) -> &str {
        &self.machine_tag
    }

    /// Register a node found in the store that no tab owns yet
    pub fn add_tab_node(&mut self, tab_node_id: TabNodeId, last_tab_id: Option<TabId>) {
        if tab_node_id <= 0 || self.associated.contains_key(&tab_node_id) {
            tracing::warn!(tab_node_id, "Ignoring invalid or already associated tab node");
            return;
        }
        self.free.remove(&tab_node_id);
        self.unassociated.insert(tab_node_id, last_tab_id);
        self.max_used = self.max_used.max(tab_node_id);
    }

    /// Bind `tab_id` to a node, reusing the lowest free node if there is one
    ///
    /// A brand new node is announced to the store with a placeholder add
    /// appended to `changes`. Allocating for a tab that already owns a node
    /// returns that node.
    pub fn allocate(&mut self, tab_id: TabId, changes: &mut SyncChangeList) -> Result<TabNodeId> {
        if let Some(&tab_node_id) = self.tab_to_node.get(&tab_id) {
            return Ok(tab_node_id);
        }

        let tab_node_id = match self.free.pop_first() {
            Some(tab_node_id) => tab_node_id,
            None => {
                let tab_node_id = self.max_used + 1;
                let tag = tab_node_tag(&self.machine_tag, tab_node_id);
                let specifics = SessionSpecifics::new_tab_node(&self.machine_tag, tab_node_id);
                changes.push(SyncChange::add(SyncData::local(&tag, &tag, &specifics)?));
                self.max_used = tab_node_id;

                tracing::debug!(tab_node_id, "Added tab node to pool");
                tab_node_id
            }
        };

        self.bind(tab_node_id, tab_id);
        Ok(tab_node_id)
    }

    /// Claim an unassociated node for `tab_id`; false if the node is not
    /// waiting to be claimed
    pub fn reassociate(&mut self, tab_node_id: TabNodeId, tab_id: TabId) -> bool {
        if self.unassociated.remove(&tab_node_id).is_none() {
            return false;
        }
        if let Some(previous) = self.tab_to_node.get(&tab_id).copied() {
            self.associated.remove(&previous);
            self.free.insert(previous);
        }
        self.bind(tab_node_id, tab_id);
        true
    }

    fn bind(&mut self, tab_node_id: TabNodeId, tab_id: TabId) {
        self.associated.insert(tab_node_id, tab_id);
        self.tab_to_node.insert(tab_id, tab_node_id);
    }

    /// Release the node owned by `tab_id`; unknown tabs are ignored
    pub fn free(&mut self, tab_id: TabId, changes: &mut SyncChangeList) -> Option<TabNodeId> {
        let tab_node_id = self.tab_to_node.remove(&tab_id)?;
        self.associated.remove(&tab_node_id);
        self.release(tab_node_id, changes);
        Some(tab_node_id)
    }

    fn release(&mut self, tab_node_id: TabNodeId, changes: &mut SyncChangeList) {
        self.free.insert(tab_node_id);

        if self.free.len() <= self.high_watermark {
            return;
        }

        // Trim from the top so low ids stay available for reuse
        while self.free.len() > self.low_watermark {
            let Some(tab_node_id) = self.free.pop_last() else {
                break;
            };
            let tag = tab_node_tag(&self.machine_tag, tab_node_id);
            changes.push(SyncChange::delete(SyncData::local_delete(tag)));
        }

        tracing::debug!(
            free = self.free.len(),
            "Free tab node pool over high watermark, trimmed"
        );
    }

    pub fn is_unassociated(&self, tab_node_id: TabNodeId) -> bool {
        self.unassociated.contains_key(&tab_node_id)
    }

    /// Unassociated node whose record last held `tab_id`
    pub fn unassociated_node_for_tab(&self, tab_id: TabId) -> Option<TabNodeId> {
        self.unassociated
            .iter()
            .find(|(_, last_tab_id)| **last_tab_id == Some(tab_id))
            .map(|(tab_node_id, _)| *tab_node_id)
    }

    /// Free every node that no local tab claimed
    pub fn delete_unassociated_tab_nodes(&mut self, changes: &mut SyncChangeList) {
        let orphans: Vec<TabNodeId> = self.unassociated.keys().copied().collect();
        self.unassociated.clear();
        for tab_node_id in orphans {
            tracing::debug!(tab_node_id, "Releasing orphaned tab node");
            self.release(tab_node_id, changes);
        }
    }

    /// Drop a node whose record was deleted elsewhere. The id is never
    /// handed out again; returns the tab that owned it, if any
    pub fn forget(&mut self, tab_node_id: TabNodeId) -> Option<TabId> {
        self.free.remove(&tab_node_id);
        self.unassociated.remove(&tab_node_id);
        let tab_id = self.associated.remove(&tab_node_id)?;
        self.tab_to_node.remove(&tab_id);
        Some(tab_id)
    }

    pub fn node_for_tab(&self, tab_id: TabId) -> Option<TabNodeId> {
        self.tab_to_node.get(&tab_id).copied()
    }

    pub fn tab_for_node(&self, tab_node_id: TabNodeId) -> Option<TabId> {
        self.associated.get(&tab_node_id).copied()
    }

    /// Nodes currently bound to a local tab
    pub fn associated_nodes(&self) -> impl Iterator<Item = TabNodeId> + '_ {
        self.associated.keys().copied()
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    pub fn unassociated_count(&self) -> usize {
        self.unassociated.len()
    }

    pub fn capacity(&self) -> usize {
        self.associated.len() + self.unassociated.len() + self.free.len()
    }

    /// Forget every node, e.g. before a full reassociation
    pub fn clear(&mut self) {
        self.associated.clear();
        self.tab_to_node.clear();
        self.unassociated.clear();
        self.free.clear();
        self.max_used = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::SyncChangeType;

    fn pool() -> TabNodePool {
        let mut pool = TabNodePool::default();
        pool.set_machine_tag("machine");
        pool
    }

    #[test]
    fn test_allocate_introduces_ids_in_order() {
        let mut pool = pool();
        let mut changes = SyncChangeList::new();

        assert_eq!(pool.allocate(10, &mut changes).unwrap(), 1);
        assert_eq!(pool.allocate(11, &mut changes).unwrap(), 2);
        // Same tab again keeps its node
        assert_eq!(pool.allocate(10, &mut changes).unwrap(), 1);

        assert_eq!(changes.len(), 2);
        let add = changes.get("machine 2").unwrap();
        assert_eq!(add.change_type, SyncChangeType::Add);
        let specifics = add.data.session_specifics().unwrap();
        assert_eq!(specifics.session_tag, "machine");
        assert_eq!(specifics.tab_node_id, Some(2));
    }

    #[test]
    fn test_freed_nodes_are_reused_first() {
        let mut pool = pool();
        let mut changes = SyncChangeList::new();
        for tab_id in [10, 11, 12] {
            pool.allocate(tab_id, &mut changes).unwrap();
        }

        assert_eq!(pool.free(12, &mut changes), Some(3));
        assert_eq!(pool.free(10, &mut changes), Some(1));
        assert_eq!(pool.free_count(), 2);

        let mut later = SyncChangeList::new();
        assert_eq!(pool.allocate(20, &mut later).unwrap(), 1);
        assert_eq!(pool.allocate(21, &mut later).unwrap(), 3);
        assert_eq!(pool.allocate(22, &mut later).unwrap(), 4);
        // Only the brand new node is announced
        assert_eq!(later.len(), 1);
        assert!(later.get("machine 4").is_some());
    }

    #[test]
    fn test_free_unknown_tab_is_noop() {
        let mut pool = pool();
        let mut changes = SyncChangeList::new();
        assert_eq!(pool.free(99, &mut changes), None);
        assert!(changes.is_empty());
        assert_eq!(pool.capacity(), 0);
    }

    #[test]
    fn test_reassociate_unassociated_node() {
        let mut pool = pool();
        pool.add_tab_node(5, Some(10));
        pool.add_tab_node(2, None);
        assert!(pool.is_unassociated(5));
        assert_eq!(pool.unassociated_node_for_tab(10), Some(5));

        assert!(pool.reassociate(5, 10));
        assert!(!pool.reassociate(5, 11));
        assert_eq!(pool.node_for_tab(10), Some(5));
        assert_eq!(pool.tab_for_node(5), Some(10));

        // New ids continue above the highest node seen
        let mut changes = SyncChangeList::new();
        assert_eq!(pool.allocate(11, &mut changes).unwrap(), 6);

        pool.delete_unassociated_tab_nodes(&mut changes);
        assert_eq!(pool.unassociated_count(), 0);
        assert_eq!(pool.allocate(12, &mut changes).unwrap(), 2);
    }

    #[test]
    fn test_high_watermark_trims_free_nodes() {
        let mut pool = TabNodePool::new(4, 2);
        pool.set_machine_tag("machine");
        let mut changes = SyncChangeList::new();
        for tab_id in 1..=5 {
            pool.allocate(tab_id, &mut changes).unwrap();
        }

        let mut frees = SyncChangeList::new();
        for tab_id in 1..=5 {
            pool.free(tab_id, &mut frees);
        }

        assert_eq!(pool.free_count(), 2);
        let deleted: Vec<&str> = frees
            .iter()
            .filter(|c| c.is_delete())
            .map(|c| c.tag())
            .collect();
        assert_eq!(deleted, vec!["machine 5", "machine 4", "machine 3"]);

        // Trimmed ids are never handed out again
        assert_eq!(pool.allocate(6, &mut changes).unwrap(), 1);
        assert_eq!(pool.allocate(7, &mut changes).unwrap(), 2);
        assert_eq!(pool.allocate(8, &mut changes).unwrap(), 6);
    }

    #[test]
    fn test_clear_resets_everything() {
        let mut pool = pool();
        let mut changes = SyncChangeList::new();
        pool.allocate(10, &mut changes).unwrap();
        pool.add_tab_node(7, None);

        pool.clear();
        assert_eq!(pool.capacity(), 0);
        assert_eq!(pool.node_for_tab(10), None);
        assert_eq!(pool.allocate(11, &mut changes).unwrap(), 1);
    }

    #[test]
    fn test_forgotten_node_is_not_reused() {
        let mut pool = pool();
        let mut changes = SyncChangeList::new();
        pool.allocate(10, &mut changes).unwrap();
        pool.allocate(11, &mut changes).unwrap();

        assert_eq!(pool.forget(1), Some(10));
        assert_eq!(pool.node_for_tab(10), None);
        assert_eq!(pool.allocate(10, &mut changes).unwrap(), 3);
        assert_eq!(pool.forget(99), None);
    }
}
