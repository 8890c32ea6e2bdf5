//! Template data models and error types

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::StoreError;

/// A code-registered message template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageTemplate {
    /// Registry key, unique per template
    pub key: String,
    /// Body text with `{{variable}}` placeholders
    pub body: String,
    /// Optional inline buttons; label and callback data may also carry
    /// placeholders
    #[serde(default)]
    pub buttons: Vec<TemplateButton>,
}

/// An unrendered inline button attached to a template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateButton {
    pub label: String,
    pub callback_data: String,
}

/// A rendered inline button.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedButton {
    pub label: String,
    pub callback_data: String,
}

/// Render output: final text plus rendered buttons.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedMessage {
    pub text: String,
    #[serde(default)]
    pub buttons: Vec<RenderedButton>,
}

/// Where a resolved template came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateSource {
    /// An active versioned store row
    Db,
    /// The in-process code registry
    Code,
}

/// Result of template resolution, including audit metadata captured for
/// the notification row.
#[derive(Debug, Clone)]
pub struct ResolvedTemplate {
    pub rendered: RenderedMessage,
    /// Store row version; `None` for code templates, which are not
    /// separately versioned
    pub version: Option<String>,
    pub policy_version: Option<String>,
    /// For store rows the unrendered body; for code templates the
    /// rendered text
    pub snapshot: String,
    pub source: TemplateSource,
}

/// Error types for template operations
#[derive(Debug, Error)]
pub enum TemplateError {
    /// Key absent from the code registry
    #[error("template not found: {0}")]
    NotFound(String),

    /// Key absent from both the store and the code registry
    #[error("template resolution failed: no active row and no registered template for {0}")]
    ResolutionFailed(String),

    /// Store lookup failed
    #[error("template store error: {0}")]
    Store(#[from] StoreError),
}

pub type TemplateResult<T> = Result<T, TemplateError>;
