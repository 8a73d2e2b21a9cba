// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! cinefetch - movie catalog browser and download session
//!
//! Browse a public movie catalog and keep track of what you download.
//!
//! # Core Modules
//!
//! - [`catalog`] - Catalog items, list queries, the YTS client and a static catalog
//! - [`download`] - Download session: coordinator, manager task, drivers, persistence
//! - [`config`] - User configuration in `~/.cinefetch/config.json`
//! - [`error`] - Actionable error formatting for the CLI
//! - [`locks`] - Poison-tolerant lock helpers
//! - [`utils`] - Size, speed and ETA formatting

pub mod catalog;
pub mod config;
pub mod download;
pub mod error;
pub mod locks;
pub mod utils;

pub use catalog::{CatalogItem, CatalogSource, ItemId, ListOptions, Variant};
pub use config::{load_config, save_config, Config};
pub use download::{
    CommandError, DownloadHandle, DownloadManager, DownloadOutcome, Job, JobState, Notice, Snapshot,
};
