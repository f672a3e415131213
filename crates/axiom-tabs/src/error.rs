//! Tab error types

use thiserror::Error;

use crate::{TabId, WindowId};

#[derive(Error, Debug)]
pub enum TabError {
    #[error("Tab not found: {0}")]
    NotFound(TabId),

    #[error("Window not found: {0}")]
    WindowNotFound(WindowId),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}
