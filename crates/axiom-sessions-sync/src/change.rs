//! Change records exchanged with the sync transport
//!
//! The transport sees only `SyncData` (a client tag plus an opaque payload)
//! wrapped in `SyncChange`s. Header records use the machine tag as their
//! client tag; tab records use `"<machine tag> <tab node id>"`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use axiom_tabs::TabNodeId;

use crate::error::SyncError;
use crate::specifics::SessionSpecifics;
use crate::Result;

/// Client tag of the record holding tab node `tab_node_id`
pub fn tab_node_tag(machine_tag: &str, tab_node_id: TabNodeId) -> String {
    format!("{} {}", machine_tag, tab_node_id)
}

/// Split a tab node client tag back into machine tag and node id
pub fn parse_tab_node_tag(tag: &str) -> Option<(&str, TabNodeId)> {
    let (machine_tag, node) = tag.rsplit_once(' ')?;
    let tab_node_id = node.parse().ok()?;
    if machine_tag.is_empty() {
        return None;
    }
    Some((machine_tag, tab_node_id))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncData {
    /// Client tag, unique across the whole replicated store
    pub tag: String,
    /// Human-readable name for debugging tools
    pub title: String,
    /// Serialized `SessionSpecifics`; absent on local deletions
    pub specifics: Option<String>,
    /// Server-side modification time, set on records delivered remotely
    pub modified_time: Option<DateTime<Utc>>,
}

impl SyncData {
    pub fn local(
        tag: impl Into<String>,
        title: impl Into<String>,
        specifics: &SessionSpecifics,
    ) -> Result<Self> {
        Ok(Self {
            tag: tag.into(),
            title: title.into(),
            specifics: Some(specifics.to_json()?),
            modified_time: None,
        })
    }

    pub fn local_delete(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            title: String::new(),
            specifics: None,
            modified_time: None,
        }
    }

    /// Record as the transport delivers it from another device
    pub fn remote(
        tag: impl Into<String>,
        specifics: &SessionSpecifics,
        modified_time: DateTime<Utc>,
    ) -> Result<Self> {
        let tag = tag.into();
        Ok(Self {
            title: tag.clone(),
            tag,
            specifics: Some(specifics.to_json()?),
            modified_time: Some(modified_time),
        })
    }

    /// Decode the payload
    pub fn session_specifics(&self) -> Result<SessionSpecifics> {
        let payload = self
            .specifics
            .as_deref()
            .ok_or_else(|| SyncError::malformed(&self.tag, "record has no specifics"))?;

        SessionSpecifics::from_json(payload)
            .map_err(|e| SyncError::malformed(&self.tag, e.to_string()))
    }

    pub fn is_tab_node(&self) -> bool {
        parse_tab_node_tag(&self.tag).is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncChangeType {
    Add,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncChange {
    pub change_type: SyncChangeType,
    pub data: SyncData,
}

impl SyncChange {
    pub fn add(data: SyncData) -> Self {
        Self {
            change_type: SyncChangeType::Add,
            data,
        }
    }

    pub fn update(data: SyncData) -> Self {
        Self {
            change_type: SyncChangeType::Update,
            data,
        }
    }

    pub fn delete(data: SyncData) -> Self {
        Self {
            change_type: SyncChangeType::Delete,
            data,
        }
    }

    pub fn is_delete(&self) -> bool {
        self.change_type == SyncChangeType::Delete
    }

    pub fn tag(&self) -> &str {
        &self.data.tag
    }
}

/// Ordered outgoing batch, at most one change per client tag
///
/// A later change for a tag already in the batch is folded into the
/// earlier entry, so a freshly allocated node and its first contents
/// publish as a single add.
#[derive(Debug, Clone, Default)]
pub struct SyncChangeList {
    changes: Vec<SyncChange>,
    index: HashMap<String, usize>,
}

impl SyncChangeList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, change: SyncChange) {
        match self.index.get(change.tag()) {
            Some(&position) => {
                let existing = &mut self.changes[position];
                existing.change_type = match (existing.change_type, change.change_type) {
                    (_, SyncChangeType::Delete) => SyncChangeType::Delete,
                    (SyncChangeType::Delete, _) => SyncChangeType::Add,
                    (SyncChangeType::Add, _) => SyncChangeType::Add,
                    (SyncChangeType::Update, later) => later,
                };
                existing.data = change.data;
            }
            None => {
                self.index
                    .insert(change.tag().to_string(), self.changes.len());
                self.changes.push(change);
            }
        }
    }

    pub fn extend<I: IntoIterator<Item = SyncChange>>(&mut self, changes: I) {
        for change in changes {
            self.push(change);
        }
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SyncChange> {
        self.changes.iter()
    }

    pub fn get(&self, tag: &str) -> Option<&SyncChange> {
        self.index.get(tag).map(|&position| &self.changes[position])
    }

    pub fn as_slice(&self) -> &[SyncChange] {
        &self.changes
    }

    pub fn into_vec(self) -> Vec<SyncChange> {
        self.changes
    }
}

impl IntoIterator for SyncChangeList {
    type Item = SyncChange;
    type IntoIter = std::vec::IntoIter<SyncChange>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.into_iter()
    }
}

impl<'a> IntoIterator for &'a SyncChangeList {
    type Item = &'a SyncChange;
    type IntoIter = std::slice::Iter<'a, SyncChange>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.iter()
    }
}

impl FromIterator<SyncChange> for SyncChangeList {
    fn from_iter<I: IntoIterator<Item = SyncChange>>(iter: I) -> Self {
        let mut list = SyncChangeList::new();
        list.extend(iter);
        list
    }
}

/// The transport side of sync: persists and publishes outgoing changes and
/// can hand back everything it currently stores for this data type
pub trait SyncChangeProcessor: Send {
    fn process_sync_changes(&mut self, changes: &SyncChangeList) -> Result<()>;

    fn get_all_sync_data(&self) -> Result<Vec<SyncData>>;
}
