//! The tree-structured scan log.
//!
//! Handlers and the session report progress through a [`ScanLog`] handle
//! carrying a breadcrumb of where in the scan the message originated.
//! Messages forward to `tracing`; a log is always safe to call, so hot
//! paths never null-check their sink.

use std::fmt::Display;
use std::sync::Arc;

#[derive(Clone)]
pub struct ScanLog {
    context: Arc<str>,
    enabled: bool,
}

impl ScanLog {
    pub fn root() -> Self {
        Self {
            context: Arc::from("scan"),
            enabled: true,
        }
    }

    /// A sink that drops every message.
    pub fn silent() -> Self {
        Self {
            context: Arc::from(""),
            enabled: false,
        }
    }

    /// A child node labelled `label`, e.g. the element currently being
    /// opened.
    pub fn child(&self, label: impl Display) -> Self {
        if !self.enabled {
            return self.clone();
        }
        Self {
            context: Arc::from(format!("{} > {label}", self.context).as_str()),
            enabled: true,
        }
    }

    pub fn log(&self, message: impl Display) {
        if self.enabled {
            tracing::debug!(target: "quarry.scan", context = %self.context, "{message}");
        }
    }

    pub fn error(&self, message: impl Display, err: &dyn Display) {
        if self.enabled {
            tracing::debug!(
                target: "quarry.scan",
                context = %self.context,
                error = %err,
                "{message}"
            );
        }
    }
}

impl std::fmt::Debug for ScanLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanLog")
            .field("context", &self.context)
            .field("enabled", &self.enabled)
            .finish()
    }
}
