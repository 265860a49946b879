//! Diagnostics bridge
//!
//! The engine publishes findings as ordinary LSP diagnostics, one notification per
//! document, and only announces through `$/scan` that a folder finished. Coordinators
//! therefore never trust issue payloads riding on scan events: on every success they
//! ask the bridge to rebuild the folder's issue list from whatever diagnostics are
//! currently published. Stale or repeated success events then converge on the same
//! answer.
//!
//! Each diagnostic's `source` identifies the product that produced it, and its `data`
//! field carries the engine's issue payload. Diagnostics from older engines lack the
//! payload, so the diagnostic itself is used as a fallback.
//!
//! DashMap lets the notification loop replace one document's diagnostics while a
//! coordinator walks the rest.

use crate::proto::{Issue, Product, Severity};
use anyhow::{Context, Result};
use dashmap::DashMap;
use lsp_types::{Diagnostic, NumberOrString, PublishDiagnosticsParams, Url};
use serde::Deserialize;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::debug;

/// Materializes the authoritative issue list for one product and folder.
pub trait DiagnosticsBridge: Send + Sync {
    fn issues_for(&self, product: Product, folder: &Path) -> Vec<Issue>;
}

#[derive(Debug, Clone, Default)]
pub struct DiagnosticsCache {
    documents: Arc<DashMap<Url, Vec<Diagnostic>>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssuePayload {
    id: Option<String>,
    title: Option<String>,
    severity: Option<Severity>,
    #[serde(default)]
    is_ignored: bool,
    #[serde(default)]
    is_new: bool,
    #[serde(flatten)]
    additional: serde_json::Map<String, serde_json::Value>,
}

impl DiagnosticsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the document's diagnostics. An empty list forgets the document.
    pub fn publish(&self, params: PublishDiagnosticsParams) {
        if params.diagnostics.is_empty() {
            debug!("Clearing diagnostics for {}", params.uri);
            self.documents.remove(&params.uri);
            return;
        }

        debug!(
            "Caching {} diagnostics for {}",
            params.diagnostics.len(),
            params.uri
        );
        self.documents.insert(params.uri, params.diagnostics);
    }

    pub fn publish_from_value(&self, value: serde_json::Value) -> Result<()> {
        let params: PublishDiagnosticsParams =
            serde_json::from_value(value).context("Invalid publishDiagnostics params")?;
        self.publish(params);
        Ok(())
    }

    pub fn clear(&self) {
        self.documents.clear();
    }

    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    fn diagnostic_to_issue(file_path: &Path, diagnostic: &Diagnostic) -> Option<Issue> {
        let payload = diagnostic
            .data
            .clone()
            .and_then(|data| serde_json::from_value::<IssuePayload>(data).ok())
            .unwrap_or_default();

        let id = payload.id.or_else(|| {
            diagnostic.code.as_ref().map(|code| match code {
                NumberOrString::String(code) => code.clone(),
                NumberOrString::Number(code) => code.to_string(),
            })
        })?;

        let additional_data = if payload.additional.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::Value::Object(payload.additional)
        };

        Some(Issue {
            id,
            title: payload.title.unwrap_or_else(|| diagnostic.message.clone()),
            severity: payload
                .severity
                .unwrap_or_else(|| Severity::from_lsp_severity(diagnostic.severity)),
            file_path: file_path.to_path_buf(),
            range: diagnostic.range,
            is_ignored: payload.is_ignored,
            is_new: payload.is_new,
            additional_data,
        })
    }
}

impl DiagnosticsBridge for DiagnosticsCache {
    fn issues_for(&self, product: Product, folder: &Path) -> Vec<Issue> {
        let source = product.diagnostic_source();

        let mut documents: Vec<(PathBuf, Vec<Diagnostic>)> = self
            .documents
            .iter()
            .filter_map(|entry| {
                let path = entry.key().to_file_path().ok()?;
                path.starts_with(folder)
                    .then(|| (path, entry.value().clone()))
            })
            .collect();
        documents.sort_by(|(a, _), (b, _)| a.cmp(b));

        let mut issues = Vec::new();
        for (path, mut diagnostics) in documents {
            diagnostics.sort_by_key(|d| (d.range.start.line, d.range.start.character));

            for diagnostic in diagnostics
                .iter()
                .filter(|d| d.source.as_deref() == Some(source))
            {
                match Self::diagnostic_to_issue(&path, diagnostic) {
                    Some(issue) => issues.push(issue),
                    None => debug!(
                        "Skipping {} diagnostic without an id in {}",
                        product,
                        path.display()
                    ),
                }
            }
        }

        debug!(
            "Materialized {} {} issues for {}",
            issues.len(),
            product,
            folder.display()
        );
        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lsp_types::{DiagnosticSeverity, Position, Range};
    use serde_json::json;

    fn create_test_diagnostic(source: &str, line: u32, data: Option<serde_json::Value>) -> Diagnostic {
        Diagnostic {
            range: Range {
                start: Position { line, character: 2 },
                end: Position { line, character: 10 },
            },
            severity: Some(DiagnosticSeverity::WARNING),
            code: Some(NumberOrString::String(format!("rule-{}", line))),
            code_description: None,
            source: Some(source.to_string()),
            message: format!("Problem on line {}", line),
            related_information: None,
            tags: None,
            data,
        }
    }

    fn publish(cache: &DiagnosticsCache, path: &str, diagnostics: Vec<Diagnostic>) {
        cache.publish(PublishDiagnosticsParams {
            uri: Url::from_file_path(path).unwrap(),
            diagnostics,
            version: None,
        });
    }

    #[test]
    fn test_issues_use_payload_when_present() {
        let cache = DiagnosticsCache::new();
        publish(
            &cache,
            "/a/src/db.rs",
            vec![create_test_diagnostic(
                Product::Code.diagnostic_source(),
                4,
                Some(json!({
                    "id": "X",
                    "title": "SQL injection",
                    "severity": "critical",
                    "isNew": true,
                    "cwe": ["CWE-89"]
                })),
            )],
        );

        let issues = cache.issues_for(Product::Code, Path::new("/a"));

        assert_eq!(issues.len(), 1);
        let issue = &issues[0];
        assert_eq!(issue.id, "X");
        assert_eq!(issue.title, "SQL injection");
        assert_eq!(issue.severity, Severity::Critical);
        assert_eq!(issue.file_path, PathBuf::from("/a/src/db.rs"));
        assert!(issue.is_new);
        assert!(!issue.is_ignored);
        assert_eq!(issue.additional_data, json!({ "cwe": ["CWE-89"] }));
    }

    #[test]
    fn test_issues_fall_back_to_diagnostic_fields() {
        let cache = DiagnosticsCache::new();
        publish(
            &cache,
            "/a/main.tf",
            vec![create_test_diagnostic(Product::IaC.diagnostic_source(), 7, None)],
        );

        let issues = cache.issues_for(Product::IaC, Path::new("/a"));

        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].id, "rule-7");
        assert_eq!(issues[0].title, "Problem on line 7");
        assert_eq!(issues[0].severity, Severity::Medium);
        assert!(issues[0].additional_data.is_null());
    }

    #[test]
    fn test_issues_filtered_by_product_source() {
        let cache = DiagnosticsCache::new();
        publish(
            &cache,
            "/a/package.json",
            vec![
                create_test_diagnostic(Product::OpenSource.diagnostic_source(), 1, None),
                create_test_diagnostic(Product::Secrets.diagnostic_source(), 2, None),
            ],
        );

        let oss = cache.issues_for(Product::OpenSource, Path::new("/a"));
        assert_eq!(oss.len(), 1);
        assert_eq!(oss[0].id, "rule-1");

        assert!(cache.issues_for(Product::Code, Path::new("/a")).is_empty());
    }

    #[test]
    fn test_issues_filtered_by_folder_components() {
        let cache = DiagnosticsCache::new();
        let source = Product::Code.diagnostic_source();
        publish(&cache, "/a/lib.rs", vec![create_test_diagnostic(source, 1, None)]);
        publish(&cache, "/ab/lib.rs", vec![create_test_diagnostic(source, 2, None)]);

        let issues = cache.issues_for(Product::Code, Path::new("/a"));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].file_path, PathBuf::from("/a/lib.rs"));
    }

    #[test]
    fn test_issues_ordered_by_file_then_position() {
        let cache = DiagnosticsCache::new();
        let source = Product::Code.diagnostic_source();
        publish(
            &cache,
            "/a/z.rs",
            vec![create_test_diagnostic(source, 1, None)],
        );
        publish(
            &cache,
            "/a/b.rs",
            vec![
                create_test_diagnostic(source, 9, None),
                create_test_diagnostic(source, 3, None),
            ],
        );

        let ids: Vec<String> = cache
            .issues_for(Product::Code, Path::new("/a"))
            .into_iter()
            .map(|issue| issue.id)
            .collect();
        assert_eq!(ids, vec!["rule-3", "rule-9", "rule-1"]);
    }

    #[test]
    fn test_diagnostic_without_id_is_skipped() {
        let cache = DiagnosticsCache::new();
        let mut diagnostic = create_test_diagnostic(Product::Code.diagnostic_source(), 1, None);
        diagnostic.code = None;
        publish(&cache, "/a/lib.rs", vec![diagnostic]);

        assert!(cache.issues_for(Product::Code, Path::new("/a")).is_empty());
    }

    #[test]
    fn test_empty_publish_forgets_document() {
        let cache = DiagnosticsCache::new();
        let source = Product::Code.diagnostic_source();
        publish(&cache, "/a/lib.rs", vec![create_test_diagnostic(source, 1, None)]);
        assert_eq!(cache.document_count(), 1);

        publish(&cache, "/a/lib.rs", vec![]);
        assert_eq!(cache.document_count(), 0);
        assert!(cache.issues_for(Product::Code, Path::new("/a")).is_empty());
    }

    #[test]
    fn test_publish_from_value() {
        let cache = DiagnosticsCache::new();
        let uri = Url::from_file_path("/a/lib.rs").unwrap();

        cache
            .publish_from_value(json!({
                "uri": uri,
                "diagnostics": [{
                    "range": {
                        "start": { "line": 0, "character": 0 },
                        "end": { "line": 0, "character": 4 }
                    },
                    "code": "hardcoded-token",
                    "source": "Secrets",
                    "message": "Token in source"
                }]
            }))
            .unwrap();

        let issues = cache.issues_for(Product::Secrets, Path::new("/a"));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].id, "hardcoded-token");

        assert!(cache.publish_from_value(json!({ "uri": 5 })).is_err());

        cache.clear();
        assert_eq!(cache.document_count(), 0);
    }
}
