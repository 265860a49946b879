//! Scan messages
//!
//! Typed lifecycle events instead of generic serde_json::Value, so the coordinator
//! never has to reason about missing or misspelled fields. Parsing happens once, at
//! the transport edge, and yields either a complete event or a TransportError.

use super::errors::TransportError;
use crate::proto::{Product, ScanStatus, SCAN_NOTIFICATION_METHOD};
use serde::Deserialize;
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanEvent {
    pub folder_path: PathBuf,
    pub product: Product,
    pub status: ScanStatus,
    pub error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawScanParams {
    folder_path: String,
    product: String,
    status: String,
    #[serde(default)]
    error_message: Option<String>,
}

impl ScanEvent {
    pub fn in_progress(folder_path: impl Into<PathBuf>, product: Product) -> Self {
        Self {
            folder_path: folder_path.into(),
            product,
            status: ScanStatus::InProgress,
            error_message: None,
        }
    }

    pub fn success(folder_path: impl Into<PathBuf>, product: Product) -> Self {
        Self {
            folder_path: folder_path.into(),
            product,
            status: ScanStatus::Success,
            error_message: None,
        }
    }

    pub fn error(
        folder_path: impl Into<PathBuf>,
        product: Product,
        message: impl Into<String>,
    ) -> Self {
        Self {
            folder_path: folder_path.into(),
            product,
            status: ScanStatus::Error,
            error_message: Some(message.into()),
        }
    }

    /// Parses the params of a `$/scan` notification.
    pub fn from_params(params: serde_json::Value) -> Result<Self, TransportError> {
        let raw: RawScanParams = serde_json::from_value(params)?;

        Ok(Self {
            folder_path: PathBuf::from(raw.folder_path),
            product: raw.product.parse()?,
            status: raw.status.parse()?,
            error_message: raw.error_message.filter(|m| !m.is_empty()),
        })
    }

    pub fn from_notification(
        notification: &lsp_server::Notification,
    ) -> Result<Self, TransportError> {
        if notification.method != SCAN_NOTIFICATION_METHOD {
            return Err(TransportError::UnexpectedMethod(notification.method.clone()));
        }
        Self::from_params(notification.params.clone())
    }
}

/// Broadcast once per analysis run, when the last in-flight folder settles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewResultAvailable {
    pub product: Product,
    pub run_id: Uuid,
    pub duration_ms: u64,
}
