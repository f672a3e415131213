//! AXIOM Tab Model
//!
//! The local side of session sync: windows, tabs and their navigation
//! history, plus the delegate traits through which the sync engine reads
//! them. Hosts with their own browser model implement the traits directly;
//! `TabManager` is the in-memory model used otherwise.

mod delegate;
mod error;
mod manager;
mod navigation;
mod tab;
mod window;

pub use delegate::{LocalSessionSource, SyncedTabDelegate, SyncedWindowDelegate};
pub use error::TabError;
pub use manager::{TabManager, WindowSnapshot};
pub use navigation::{PageTransition, TabNavigation};
pub use tab::Tab;
pub use window::{Window, WindowType};

pub type Result<T> = std::result::Result<T, TabError>;

/// Process-local tab identifier
pub type TabId = i32;

/// Process-local window identifier
pub type WindowId = i32;

/// Slot in the replicated store holding one local tab
pub type TabNodeId = i32;
