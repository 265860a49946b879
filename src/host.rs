//! Scan host
//!
//! Wires one coordinator per enabled product to a shared scan event channel and
//! diagnostics cache, and routes the language client's notifications to them. Protocol
//! concerns stay here so the coordinators can be exercised without any LSP traffic.
//!
//! Malformed scan notifications are logged and dropped: one bad message from the
//! engine must not take down results for every product.

use crate::{
    channel::ScanEventChannel,
    config::CoordinatorConfig,
    diagnostics::DiagnosticsCache,
    proto::{Product, ENGINE_DOWNLOAD_FAILED_METHOD, SCAN_NOTIFICATION_METHOD},
    result_store::FolderOutcome,
    scan::{AnalysisStatus, CoordinatorDeps, ScanCoordinator},
    workspace::{TrustGate, WorkspaceManager},
};
use anyhow::{Context, Result};
use lsp_server::{Notification, Request};
use lsp_types::{
    notification::{DidChangeWorkspaceFolders, Notification as _, PublishDiagnostics},
    request::{Initialize, Request as _},
    DidChangeWorkspaceFoldersParams, InitializeParams,
};
use serde::Serialize;
use std::{path::PathBuf, sync::Arc};
use tracing::{debug, info, warn};

pub struct ScanHost {
    channel: ScanEventChannel,
    diagnostics: DiagnosticsCache,
    workspace: WorkspaceManager,
    coordinators: Vec<Arc<ScanCoordinator>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductSummary {
    pub product: Product,
    pub status: AnalysisStatus,
    pub any_folder_trusted: bool,
    pub folders: Vec<FolderSummary>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderSummary {
    pub folder: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ScanHost {
    /// Builds and subscribes the coordinators. Must be called from within a tokio runtime.
    pub fn new(
        config: &CoordinatorConfig,
        workspace: WorkspaceManager,
        trust: Arc<dyn TrustGate>,
    ) -> Result<Self> {
        config.validate()?;

        let channel = ScanEventChannel::new(config.channel.backlog_warning);
        let diagnostics = DiagnosticsCache::new();
        let deps = CoordinatorDeps {
            diagnostics: Arc::new(diagnostics.clone()),
            trust,
            workspace: workspace.clone(),
            refresh_interval: config.refresh_interval(),
        };

        let mut coordinators = Vec::new();
        for product in config.products.enabled() {
            let coordinator = Arc::new(ScanCoordinator::new(product, deps.clone()));
            coordinator
                .subscribe(&channel)
                .with_context(|| format!("Failed to subscribe {} coordinator", product))?;
            coordinators.push(coordinator);
        }

        info!(
            "Scan host started for products: {:?}",
            coordinators.iter().map(|c| c.product()).collect::<Vec<_>>()
        );

        Ok(Self {
            channel,
            diagnostics,
            workspace,
            coordinators,
        })
    }

    pub fn coordinator(&self, product: Product) -> Option<&Arc<ScanCoordinator>> {
        self.coordinators.iter().find(|c| c.product() == product)
    }

    pub fn coordinators(&self) -> &[Arc<ScanCoordinator>] {
        &self.coordinators
    }

    pub fn channel(&self) -> &ScanEventChannel {
        &self.channel
    }

    pub fn diagnostics(&self) -> &DiagnosticsCache {
        &self.diagnostics
    }

    pub fn workspace(&self) -> &WorkspaceManager {
        &self.workspace
    }

    pub fn process_notification(&self, not: Notification) -> Result<()> {
        match not.method.as_str() {
            SCAN_NOTIFICATION_METHOD => match self.channel.publish_notification(&not) {
                Ok(receivers) => debug!("Scan notification delivered to {} coordinators", receivers),
                Err(e) => warn!("Dropping scan notification: {}", e),
            },
            PublishDiagnostics::METHOD => {
                self.diagnostics.publish_from_value(not.params)?;
            }
            DidChangeWorkspaceFolders::METHOD => {
                let params: DidChangeWorkspaceFoldersParams = serde_json::from_value(not.params)
                    .context("Invalid didChangeWorkspaceFolders params")?;
                let changes = self.workspace.apply_change(&params.event);
                self.reset_folders(&changes.removed);
            }
            ENGINE_DOWNLOAD_FAILED_METHOD => {
                for coordinator in &self.coordinators {
                    coordinator.handle_engine_download_failure();
                }
            }
            other => debug!("Ignoring notification: {}", other),
        }
        Ok(())
    }

    /// Only `initialize` matters here: it announces the workspace folders.
    pub fn process_request(&self, req: Request) -> Result<()> {
        match req.method.as_str() {
            Initialize::METHOD => {
                let params: InitializeParams =
                    serde_json::from_value(req.params).context("Invalid initialize params")?;
                let changes = self.workspace.apply_initialize(&params);
                self.reset_folders(&changes.removed);
            }
            other => debug!("Ignoring request: {}", other),
        }
        Ok(())
    }

    fn reset_folders(&self, folders: &[PathBuf]) {
        for folder in folders {
            for coordinator in &self.coordinators {
                coordinator.reset_result(folder);
            }
        }
    }

    /// Stops accepting scan events and waits until every coordinator has handled the
    /// ones already published.
    pub async fn drain(&self) {
        self.channel.close();
        for coordinator in &self.coordinators {
            coordinator.finish_delivery().await;
        }
        info!("Scan host drained");
    }

    pub fn summary(&self) -> Vec<ProductSummary> {
        self.coordinators
            .iter()
            .map(|coordinator| ProductSummary {
                product: coordinator.product(),
                status: coordinator.status(),
                any_folder_trusted: coordinator.is_any_workspace_folder_trusted(),
                folders: coordinator
                    .results()
                    .iter()
                    .map(|(folder, outcome)| FolderSummary {
                        folder: folder.to_path_buf(),
                        issue_count: outcome.issues().map(<[_]>::len),
                        error: match outcome {
                            FolderOutcome::Failure(message) => Some(message.clone()),
                            FolderOutcome::Success(_) => None,
                        },
                    })
                    .collect(),
            })
            .collect()
    }

    pub fn dispose(&self) {
        for coordinator in &self.coordinators {
            coordinator.dispose();
        }
        self.diagnostics.clear();
        info!("Scan host disposed");
    }
}
