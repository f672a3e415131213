//! Navigation history entries
//!
//! A tab's history is an ordered list of `TabNavigation`s. The same type is
//! carried inside replicated tab records, so it stays plain data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// How the user arrived at a navigation entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageTransition {
    Link,
    Typed,
    AutoBookmark,
    Generated,
    Reload,
    FormSubmit,
    Keyword,
}

impl PageTransition {
    pub fn as_str(&self) -> &'static str {
        match self {
            PageTransition::Link => "link",
            PageTransition::Typed => "typed",
            PageTransition::AutoBookmark => "auto_bookmark",
            PageTransition::Generated => "generated",
            PageTransition::Reload => "reload",
            PageTransition::FormSubmit => "form_submit",
            PageTransition::Keyword => "keyword",
        }
    }
}

impl std::fmt::Display for PageTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PageTransition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "link" => Ok(PageTransition::Link),
            "typed" => Ok(PageTransition::Typed),
            "auto_bookmark" => Ok(PageTransition::AutoBookmark),
            "generated" => Ok(PageTransition::Generated),
            "reload" => Ok(PageTransition::Reload),
            "form_submit" => Ok(PageTransition::FormSubmit),
            "keyword" => Ok(PageTransition::Keyword),
            _ => Err(format!("Unknown page transition: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabNavigation {
    /// Virtual URL shown to the user
    pub url: String,
    pub title: String,
    pub transition: PageTransition,
    /// When the entry was committed
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favicon_url: Option<String>,
}

impl TabNavigation {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            transition: PageTransition::Link,
            timestamp: Utc::now(),
            favicon_url: None,
        }
    }

    pub fn with_transition(mut self, transition: PageTransition) -> Self {
        self.transition = transition;
        self
    }

    pub fn with_favicon(mut self, favicon_url: impl Into<String>) -> Self {
        self.favicon_url = Some(favicon_url.into());
        self
    }

    /// Parsed URL, `None` if the entry's URL is not a valid absolute URL
    pub fn parsed_url(&self) -> Option<Url> {
        Url::parse(&self.url).ok()
    }

    pub fn has_valid_url(&self) -> bool {
        self.parsed_url().is_some()
    }

    /// Title with fallback to the URL
    pub fn display_title(&self) -> &str {
        if self.title.is_empty() {
            &self.url
        } else {
            &self.title
        }
    }
}
