//! Protocol types
//!
//! Stable types shared between the analysis engine's notifications, the diagnostics
//! bridge and the presentation layers. The engine only ever sends strings, so products
//! and statuses are parsed into enums at the edge and never passed around as raw text.

use crate::scan::errors::TransportError;
use serde::{Deserialize, Serialize};
use std::{fmt, path::PathBuf, str::FromStr};

/// Notification the engine sends for every scan lifecycle transition.
pub const SCAN_NOTIFICATION_METHOD: &str = "$/scan";

/// Notification sent by the installer when the engine binary could not be fetched.
pub const ENGINE_DOWNLOAD_FAILED_METHOD: &str = "$/engineDownloadFailed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Product {
    #[serde(rename = "code")]
    Code,
    #[serde(rename = "oss")]
    OpenSource,
    #[serde(rename = "iac")]
    IaC,
    #[serde(rename = "secrets")]
    Secrets,
}

impl Product {
    pub const ALL: [Product; 4] = [
        Product::Code,
        Product::OpenSource,
        Product::IaC,
        Product::Secrets,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::OpenSource => "oss",
            Self::IaC => "iac",
            Self::Secrets => "secrets",
        }
    }

    /// `source` label the engine stamps on every diagnostic it publishes for this product.
    pub fn diagnostic_source(&self) -> &'static str {
        match self {
            Self::Code => "Code Security",
            Self::OpenSource => "Open Source Security",
            Self::IaC => "Configuration",
            Self::Secrets => "Secrets",
        }
    }
}

impl fmt::Display for Product {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Product {
    type Err = TransportError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Product::ALL
            .into_iter()
            .find(|product| product.as_str() == value)
            .ok_or_else(|| TransportError::UnknownProduct(value.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScanStatus {
    InProgress,
    Success,
    Error,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "inProgress",
            Self::Success => "success",
            Self::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }
}

impl FromStr for ScanStatus {
    type Err = TransportError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "inProgress" => Ok(Self::InProgress),
            "success" => Ok(Self::Success),
            "error" => Ok(Self::Error),
            other => Err(TransportError::UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn from_lsp_severity(severity: Option<lsp_types::DiagnosticSeverity>) -> Self {
        match severity {
            Some(lsp_types::DiagnosticSeverity::ERROR) => Self::High,
            Some(lsp_types::DiagnosticSeverity::WARNING) => Self::Medium,
            _ => Self::Low,
        }
    }
}

/// A single finding as the coordinator sees it. Only `id`, `severity` and `file_path`
/// carry meaning here; everything else is passed through to presentation layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub id: String,

    pub title: String,

    pub severity: Severity,

    pub file_path: PathBuf,

    pub range: lsp_types::Range,

    #[serde(default)]
    pub is_ignored: bool,

    #[serde(default)]
    pub is_new: bool,

    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub additional_data: serde_json::Value,
}
