//! Result store
//!
//! Holds exactly one outcome per workspace folder for a single product. Writes replace
//! a folder's outcome wholesale; there is no merging of issue lists, so readers never
//! observe a half-updated folder.
//!
//! Workspaces rarely have more than a handful of folders, so entries live in a Vec in
//! insertion order. That keeps iteration deterministic, which matters for
//! `find_issue_by_id` and its stop-at-first-failure rule.

use crate::proto::Issue;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub enum FolderOutcome {
    Success(Vec<Issue>),
    Failure(String),
}

impl FolderOutcome {
    pub fn placeholder() -> Self {
        Self::Success(Vec::new())
    }

    pub fn issues(&self) -> Option<&[Issue]> {
        match self {
            Self::Success(issues) => Some(issues),
            Self::Failure(_) => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultStore {
    entries: Vec<(PathBuf, FolderOutcome)>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the folder's outcome in place, or appends it for a new folder.
    pub fn set(&mut self, folder: &Path, outcome: FolderOutcome) {
        match self.entries.iter_mut().find(|(path, _)| path == folder) {
            Some((_, existing)) => *existing = outcome,
            None => self.entries.push((folder.to_path_buf(), outcome)),
        }
    }

    /// Inserts `outcome` only if the folder has no entry yet. Returns whether it did.
    pub fn set_if_absent(&mut self, folder: &Path, outcome: FolderOutcome) -> bool {
        if self.contains(folder) {
            return false;
        }
        self.entries.push((folder.to_path_buf(), outcome));
        true
    }

    pub fn remove(&mut self, folder: &Path) -> Option<FolderOutcome> {
        let position = self.entries.iter().position(|(path, _)| path == folder)?;
        Some(self.entries.remove(position).1)
    }

    pub fn get(&self, folder: &Path) -> Option<&FolderOutcome> {
        self.entries
            .iter()
            .find(|(path, _)| path == folder)
            .map(|(_, outcome)| outcome)
    }

    pub fn contains(&self, folder: &Path) -> bool {
        self.get(folder).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Path, &FolderOutcome)> {
        self.entries
            .iter()
            .map(|(path, outcome)| (path.as_path(), outcome))
    }

    pub fn folders(&self) -> impl Iterator<Item = &Path> {
        self.entries.iter().map(|(path, _)| path.as_path())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn find_issue(&self, folder: &Path, issue_id: &str) -> Option<&Issue> {
        self.get(folder)?
            .issues()?
            .iter()
            .find(|issue| issue.id == issue_id)
    }

    /// Scans folders in store order. A failed folder met before any match ends the
    /// search with `None`, even if a later folder holds the issue.
    pub fn find_issue_by_id(&self, issue_id: &str) -> Option<&Issue> {
        for (folder, outcome) in &self.entries {
            let Some(issues) = outcome.issues() else {
                debug!(
                    "Stopping issue lookup for {} at failed folder {}",
                    issue_id,
                    folder.display()
                );
                return None;
            };

            if let Some(issue) = issues.iter().find(|issue| issue.id == issue_id) {
                return Some(issue);
            }
        }
        None
    }

    pub fn total_issues(&self) -> usize {
        self.entries
            .iter()
            .filter_map(|(_, outcome)| outcome.issues())
            .map(<[Issue]>::len)
            .sum()
    }
}
