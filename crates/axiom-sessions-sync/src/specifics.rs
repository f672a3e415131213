//! Replicated record shapes
//!
//! Every session record is a `SessionSpecifics` keyed by its session tag.
//! A record carries either a header (the device's window list) or one tab.
//! Records travel as opaque JSON payloads inside `SyncData`.

use serde::{Deserialize, Serialize};

use axiom_tabs::{TabId, TabNavigation, TabNodeId, WindowId};

use crate::error::SyncError;
use crate::Result;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSpecifics {
    /// Machine tag of the owning device
    #[serde(default)]
    pub session_tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<SessionHeader>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab: Option<SessionTabSpecifics>,
    /// Node slot of a tab record; absent on headers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_node_id: Option<TabNodeId>,
}

impl SessionSpecifics {
    pub fn new_header(session_tag: impl Into<String>, header: SessionHeader) -> Self {
        Self {
            session_tag: session_tag.into(),
            header: Some(header),
            tab: None,
            tab_node_id: None,
        }
    }

    pub fn new_tab(
        session_tag: impl Into<String>,
        tab_node_id: TabNodeId,
        tab: SessionTabSpecifics,
    ) -> Self {
        Self {
            session_tag: session_tag.into(),
            header: None,
            tab: Some(tab),
            tab_node_id: Some(tab_node_id),
        }
    }

    /// Placeholder written when a node is first allocated, enough to
    /// recognise the node as ours after a crash
    pub fn new_tab_node(session_tag: impl Into<String>, tab_node_id: TabNodeId) -> Self {
        Self {
            session_tag: session_tag.into(),
            header: None,
            tab: None,
            tab_node_id: Some(tab_node_id),
        }
    }

    pub fn has_header(&self) -> bool {
        self.header.is_some()
    }

    pub fn has_tab(&self) -> bool {
        self.tab.is_some()
    }

    pub fn from_json(payload: &str) -> Result<Self> {
        Ok(serde_json::from_str(payload)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Reject records the tracker cannot key: no tag, or a tab without ids
    pub fn validate(&self) -> Result<()> {
        if self.session_tag.is_empty() {
            return Err(SyncError::malformed("", "empty session tag"));
        }
        if let Some(tab) = &self.tab {
            if self.tab_node_id.is_none() {
                return Err(SyncError::malformed(&self.session_tag, "tab without tab_node_id"));
            }
            if tab.tab_id.is_none() {
                return Err(SyncError::malformed(&self.session_tag, "tab without tab_id"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionHeader {
    #[serde(default)]
    pub windows: Vec<SessionWindowSpecifics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_type: Option<DeviceType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionWindowSpecifics {
    pub window_id: WindowId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_tab_index: Option<usize>,
    #[serde(default)]
    pub browser_type: BrowserType,
    /// Tab ids in on-screen order
    #[serde(default)]
    pub tabs: Vec<TabId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionTabSpecifics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<TabId>,
    #[serde(default)]
    pub window_id: WindowId,
    #[serde(default)]
    pub tab_visual_index: usize,
    /// Index into `navigations`
    #[serde(default)]
    pub current_navigation_index: usize,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension_app_id: Option<String>,
    #[serde(default)]
    pub navigations: Vec<TabNavigation>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrowserType {
    #[default]
    Tabbed,
    Popup,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Win,
    Mac,
    Linux,
    ChromeOs,
    Phone,
    Tablet,
    #[default]
    Other,
}

impl DeviceType {
    /// Device type of the machine this binary was built for
    pub fn local() -> Self {
        if cfg!(target_os = "windows") {
            DeviceType::Win
        } else if cfg!(target_os = "macos") {
            DeviceType::Mac
        } else if cfg!(target_os = "linux") {
            DeviceType::Linux
        } else if cfg!(any(target_os = "android", target_os = "ios")) {
            DeviceType::Phone
        } else {
            DeviceType::Other
        }
    }
}
