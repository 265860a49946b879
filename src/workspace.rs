//! Workspace management
//!
//! Tracks the workspace folders the editor has open. Scan results are keyed by folder,
//! so a folder leaving the workspace must take its results with it; the change
//! notifications are turned into explicit added/removed lists for the host to act on.
//!
//! Trust is decided elsewhere. Coordinators only ask a `TrustGate` which of the current
//! folders may expose results.

use lsp_types::{InitializeParams, WorkspaceFolder, WorkspaceFoldersChangeEvent};
use parking_lot::RwLock;
use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, info, warn};

/// Answers which folders are authorized to expose results.
pub trait TrustGate: Send + Sync {
    fn trusted_folders(&self, folders: &[PathBuf]) -> Vec<PathBuf>;
}

/// Static allowlist. A folder is trusted when it is, or lies under, a trusted path.
#[derive(Debug, Default)]
pub struct TrustedFolders {
    trust_all: bool,
    trusted: RwLock<HashSet<PathBuf>>,
}

impl TrustedFolders {
    pub fn new(trusted: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            trust_all: false,
            trusted: RwLock::new(trusted.into_iter().collect()),
        }
    }

    pub fn trust_all() -> Self {
        Self {
            trust_all: true,
            trusted: RwLock::new(HashSet::new()),
        }
    }

    pub fn trust(&self, folder: PathBuf) {
        debug!("Trusting folder {}", folder.display());
        self.trusted.write().insert(folder);
    }

    fn is_trusted(&self, folder: &Path) -> bool {
        self.trust_all
            || self
                .trusted
                .read()
                .iter()
                .any(|trusted| folder.starts_with(trusted))
    }
}

impl TrustGate for TrustedFolders {
    fn trusted_folders(&self, folders: &[PathBuf]) -> Vec<PathBuf> {
        folders
            .iter()
            .filter(|folder| self.is_trusted(folder))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FolderChanges {
    pub added: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
}

impl FolderChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct WorkspaceManager {
    folders: Arc<RwLock<Vec<PathBuf>>>,
}

impl WorkspaceManager {
    pub fn new(folders: Vec<PathBuf>) -> Self {
        info!("Workspace folders: {:?}", folders);
        Self {
            folders: Arc::new(RwLock::new(folders)),
        }
    }

    /// Replaces the folder list with the one announced in `initialize`. Clients that
    /// predate workspace folders only send a root, which becomes the single folder.
    pub fn apply_initialize(&self, init_params: &InitializeParams) -> FolderChanges {
        let mut folders: Vec<PathBuf> = init_params
            .workspace_folders
            .as_deref()
            .unwrap_or_default()
            .iter()
            .filter_map(Self::folder_path)
            .collect();

        #[allow(deprecated)]
        if folders.is_empty() {
            if let Some(path) = init_params
                .root_uri
                .as_ref()
                .and_then(|uri| uri.to_file_path().ok())
            {
                folders.push(path);
            } else if let Some(root_path) = &init_params.root_path {
                folders.push(PathBuf::from(root_path));
            }
        }

        if folders.is_empty() {
            warn!("No workspace folders found in initialization parameters");
        }

        self.set_folders(folders)
    }

    pub fn folders(&self) -> Vec<PathBuf> {
        self.folders.read().clone()
    }

    pub fn contains(&self, folder: &Path) -> bool {
        self.folders.read().iter().any(|f| f == folder)
    }

    pub fn set_folders(&self, folders: Vec<PathBuf>) -> FolderChanges {
        let mut current = self.folders.write();

        let changes = FolderChanges {
            added: folders
                .iter()
                .filter(|f| !current.contains(f))
                .cloned()
                .collect(),
            removed: current
                .iter()
                .filter(|f| !folders.contains(f))
                .cloned()
                .collect(),
        };

        *current = folders;
        info!(
            "Updated workspace folders: {} added, {} removed",
            changes.added.len(),
            changes.removed.len()
        );
        changes
    }

    pub fn apply_change(&self, event: &WorkspaceFoldersChangeEvent) -> FolderChanges {
        let removed: Vec<PathBuf> = event.removed.iter().filter_map(Self::folder_path).collect();
        let added: Vec<PathBuf> = event.added.iter().filter_map(Self::folder_path).collect();

        let mut folders = self.folders();
        folders.retain(|f| !removed.contains(f));
        for folder in added {
            if !folders.contains(&folder) {
                folders.push(folder);
            }
        }

        self.set_folders(folders)
    }

    fn folder_path(folder: &WorkspaceFolder) -> Option<PathBuf> {
        match folder.uri.to_file_path() {
            Ok(path) => Some(path),
            Err(()) => {
                warn!("Ignoring non-file workspace folder {}", folder.uri);
                None
            }
        }
    }
}
