//! Scan lifecycle coordination
//!
//! The analysis engine streams `$/scan` notifications as it works through workspace
//! folders, one product at a time, while its findings arrive separately as published
//! diagnostics. Each product gets a coordinator that turns that stream into a per-folder
//! outcome table: a folder is a placeholder while its scan runs, then holds either the
//! issues read back from the diagnostics or the engine's error message.
//!
//! Coordinators only touch their own product's events, which all arrive through one
//! channel and are handled serially. Consumers learn about changes through a throttled
//! refresh signal and a new-result notice sent whenever a product goes idle.

pub mod channel;
pub mod config;
pub mod diagnostics;
pub mod host;
pub mod proto;
pub mod refresh;
pub mod result_store;
pub mod scan;
pub mod workspace;

pub use channel::{ScanEventChannel, Subscription};
pub use config::CoordinatorConfig;
pub use diagnostics::{DiagnosticsBridge, DiagnosticsCache};
pub use host::{ProductSummary, ScanHost};
pub use proto::{Issue, Product, ScanStatus, Severity};
pub use refresh::RefreshNotifier;
pub use result_store::{FolderOutcome, ResultStore};
pub use scan::{CoordinatorError, ScanCoordinator, ScanEvent};
pub use workspace::{TrustGate, TrustedFolders, WorkspaceManager};
