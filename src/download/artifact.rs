// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Saving finished downloads.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::driver::Payload;
use crate::catalog::CatalogItem;
use crate::utils::artifact_file_name;

/// Destination for the content of a completed transfer.
pub trait ArtifactSink: Send {
    /// Persist the payload for `item`, returning where it ended up.
    fn save(&self, item: &CatalogItem, payload: Payload) -> Result<PathBuf>;
}

/// Writes finished downloads into a directory as `<Title>.mp4`.
#[derive(Debug, Clone)]
pub struct FileSaver {
    dir: PathBuf,
}

impl FileSaver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The user's download directory, falling back to `./downloads`.
    pub fn default_dir() -> PathBuf {
        dirs::download_dir()
            .or_else(|| dirs::home_dir().map(|h| h.join("Downloads")))
            .unwrap_or_else(|| PathBuf::from("downloads"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl ArtifactSink for FileSaver {
    fn save(&self, item: &CatalogItem, payload: Payload) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create download directory: {:?}", self.dir))?;
        let target = self.dir.join(artifact_file_name(&item.title));

        match payload {
            Payload::Bytes(bytes) => {
                fs::write(&target, bytes)
                    .with_context(|| format!("Failed to write download: {:?}", target))?;
            }
            Payload::File(staged) => {
                // Rename fails across filesystems; fall back to copy
                if fs::rename(&staged, &target).is_err() {
                    fs::copy(&staged, &target)
                        .with_context(|| format!("Failed to move {:?} to {:?}", staged, target))?;
                    let _ = fs::remove_file(&staged);
                }
            }
        }

        Ok(target)
    }
}

/// Sink that discards content, for headless sessions.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardSink;

impl ArtifactSink for DiscardSink {
    fn save(&self, item: &CatalogItem, _payload: Payload) -> Result<PathBuf> {
        Ok(PathBuf::from(artifact_file_name(&item.title)))
    }
}
