use std::time::Duration;

use thiserror::Error;

use crate::error::HarvestError;

/// Opaque reference to an element owned by the automation backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementHandle(String);

impl ElementHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

/// Failure of a single adapter call, classified where the call is made.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    #[error("transient page failure: {0}")]
    Transient(String),
    #[error("element not found: {0}")]
    NotFound(String),
    #[error("invalid selector: {0}")]
    InvalidSelector(String),
    #[error("page automation failure: {0}")]
    Fatal(String),
}

impl AdapterError {
    /// Failures worth retrying inside a collection cycle.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::NotFound(_))
    }
}

impl From<AdapterError> for HarvestError {
    fn from(error: AdapterError) -> Self {
        match error {
            AdapterError::InvalidSelector(selector) => {
                HarvestError::Configuration(format!("invalid selector: {selector}"))
            }
            AdapterError::NotFound(what) => HarvestError::TargetNotFound(what),
            other => HarvestError::Unexpected(other.to_string()),
        }
    }
}

/// Capability set the collector needs from a page-automation backend. The
/// loop never learns whether the page came from a fresh launch or an attach.
pub trait PageAdapter {
    fn open(&mut self, url: &str) -> Result<(), AdapterError>;
    fn current_url(&mut self) -> Result<String, AdapterError>;
    /// `Ok(None)` once the backend gave up waiting for the selector.
    fn find_container(&mut self, selector: &str) -> Result<Option<ElementHandle>, AdapterError>;
    /// Elements under `scope` matching `selector`, in document order.
    fn query_all(
        &mut self,
        scope: &ElementHandle,
        selector: &str,
    ) -> Result<Vec<ElementHandle>, AdapterError>;
    fn read_text(&mut self, element: &ElementHandle) -> Result<String, AdapterError>;
    /// Scrolls forward and returns the resulting scroll offset.
    fn scroll_by(&mut self, container: &ElementHandle, pixels: i64) -> Result<i64, AdapterError>;
    fn scroll_to(
        &mut self,
        container: &ElementHandle,
        position: i64,
    ) -> Result<i64, AdapterError>;
    fn wait(&mut self, duration: Duration);
}
