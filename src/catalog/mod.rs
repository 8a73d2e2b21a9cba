// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Movie Catalog Sources
//!
//! The download coordinator never talks to the catalog itself; callers look
//! items up here and hand the chosen [`CatalogItem`] and [`Variant`] to the
//! coordinator.
//!
//! Two sources are provided:
//! - [`YtsCatalog`] - the public YTS REST API
//! - [`StaticCatalog`] - an in-memory dataset (offline mode and tests)
//!
//! Both follow the same failure contract: lookups never return an error to
//! the caller. A failed request is logged and yields an empty page or `None`.

pub mod fixed;
pub mod types;
pub mod yts;

use std::future::Future;

use serde::{Deserialize, Serialize};

pub use fixed::StaticCatalog;
pub use types::{CastMember, CatalogItem, ItemId, Variant};
pub use yts::YtsCatalog;

/// Genres offered by the browse filters.
pub const GENRES: &[&str] = &[
    "Action", "Adventure", "Animation", "Comedy", "Crime", "Drama", "Family",
    "Fantasy", "History", "Horror", "Music", "Mystery", "Romance", "Sci-Fi",
    "Thriller", "War", "Western",
];

/// Quality labels offered by the browse filters.
pub const QUALITIES: &[&str] = &["720p", "1080p", "2160p", "3D"];

/// Default page size used by the browse view.
pub const DEFAULT_PAGE_LIMIT: u32 = 20;

/// Field to sort listings by.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    Title,
    Year,
    #[default]
    Rating,
    LikeCount,
    DownloadCount,
    DateAdded,
}

impl SortField {
    /// Query-string value understood by the catalog API.
    pub fn as_str(&self) -> &'static str {
        match self {
            SortField::Title => "title",
            SortField::Year => "year",
            SortField::Rating => "rating",
            SortField::LikeCount => "like_count",
            SortField::DownloadCount => "download_count",
            SortField::DateAdded => "date_added",
        }
    }
}

impl std::str::FromStr for SortField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "title" => Ok(SortField::Title),
            "year" => Ok(SortField::Year),
            "rating" => Ok(SortField::Rating),
            "like_count" | "likes" => Ok(SortField::LikeCount),
            "download_count" | "downloads" => Ok(SortField::DownloadCount),
            "date_added" | "latest" => Ok(SortField::DateAdded),
            other => Err(format!("unknown sort field: {}", other)),
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

/// Filter, sort and pagination options for a listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListOptions {
    /// Free text search against titles
    pub query_term: Option<String>,
    /// Genres to match (any of)
    pub genres: Vec<String>,
    /// Qualities to match (any of)
    pub qualities: Vec<String>,
    /// Minimum rating, 0 disables the filter
    pub minimum_rating: u8,
    pub sort_by: SortField,
    pub order_by: SortOrder,
    /// 1-based page number
    pub page: u32,
    pub limit: u32,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            query_term: None,
            genres: Vec::new(),
            qualities: Vec::new(),
            minimum_rating: 0,
            sort_by: SortField::default(),
            order_by: SortOrder::default(),
            page: 1,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

impl ListOptions {
    /// Highest rated movies first.
    pub fn highest_rated() -> Self {
        Self { sort_by: SortField::Rating, ..Default::default() }
    }

    /// Most downloaded movies first.
    pub fn most_downloaded() -> Self {
        Self { sort_by: SortField::DownloadCount, ..Default::default() }
    }

    /// Most recently added movies first.
    pub fn latest() -> Self {
        Self { sort_by: SortField::DateAdded, ..Default::default() }
    }

    /// Search by title.
    pub fn search(query: impl Into<String>) -> Self {
        Self { query_term: Some(query.into()), ..Default::default() }
    }
}

/// One page of listing results.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CatalogPage {
    pub items: Vec<CatalogItem>,
    /// Total number of matches across all pages
    pub total_count: u64,
    pub page: u32,
    pub limit: u32,
}

impl CatalogPage {
    /// An empty page, returned when a listing fails.
    pub fn empty(options: &ListOptions) -> Self {
        Self {
            items: Vec::new(),
            total_count: 0,
            page: options.page,
            limit: options.limit,
        }
    }

    /// Number of pages at the current page size.
    pub fn total_pages(&self) -> u32 {
        if self.limit == 0 {
            return 0;
        }
        self.total_count.div_ceil(self.limit as u64) as u32
    }
}

/// Read-only catalog lookup.
///
/// Implementations swallow their own failures: a network or decode error is
/// logged and reported as an empty page / `None`.
pub trait CatalogSource: Send + Sync {
    /// List items matching the options.
    fn list_items(&self, options: &ListOptions) -> impl Future<Output = CatalogPage> + Send;

    /// Look up a single item by id.
    fn get_item(&self, id: ItemId) -> impl Future<Output = Option<CatalogItem>> + Send;
}
