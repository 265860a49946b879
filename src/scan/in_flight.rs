//! In-flight scan tracking
//!
//! Counts outstanding scans per folder instead of one global counter, so a folder that
//! is rescanned before its previous scan settles cannot make an unrelated folder look
//! finished. A folder leaves the map once its count drops to zero.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

#[derive(Debug, Default)]
pub struct InFlightScans {
    by_folder: HashMap<PathBuf, u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settle {
    /// The folder still has scans outstanding.
    Pending { remaining: u32 },
    /// The folder's last outstanding scan settled.
    Settled,
    /// Nothing was in flight for the folder; the count stays at zero.
    Underflow,
}

impl InFlightScans {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the folder's count after the increment.
    pub fn start(&mut self, folder: &Path) -> u32 {
        let count = self.by_folder.entry(folder.to_path_buf()).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    pub fn settle(&mut self, folder: &Path) -> Settle {
        match self.by_folder.get_mut(folder) {
            Some(count) if *count > 1 => {
                *count -= 1;
                Settle::Pending { remaining: *count }
            }
            Some(_) => {
                self.by_folder.remove(folder);
                Settle::Settled
            }
            None => Settle::Underflow,
        }
    }

    pub fn is_running(&self) -> bool {
        !self.by_folder.is_empty()
    }

    pub fn is_folder_running(&self, folder: &Path) -> bool {
        self.by_folder.contains_key(folder)
    }

    pub fn total(&self) -> u32 {
        self.by_folder.values().sum()
    }

    pub fn clear(&mut self) {
        self.by_folder.clear();
    }
}
