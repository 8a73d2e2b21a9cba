// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-memory catalog.

use std::cmp::Ordering;
use std::path::Path;

use anyhow::{Context, Result};

use super::{CatalogItem, CatalogPage, CatalogSource, ItemId, ListOptions, SortField, SortOrder};

/// Catalog over a fixed list of items, filtered and paginated locally.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    items: Vec<CatalogItem>,
}

impl StaticCatalog {
    pub fn new(items: Vec<CatalogItem>) -> Self {
        Self { items }
    }

    /// Load a JSON array of items from disk.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read catalog file: {:?}", path))?;
        let items: Vec<CatalogItem> = serde_json::from_str(&content)
            .with_context(|| "Failed to parse catalog file")?;
        Ok(Self::new(items))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn matches(item: &CatalogItem, options: &ListOptions) -> bool {
        if let Some(query) = options.query_term.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
            if !item.title.to_lowercase().contains(&query.to_lowercase()) {
                return false;
            }
        }
        if !options.genres.is_empty()
            && !options.genres.iter().any(|g| item.genres.iter().any(|ig| ig.eq_ignore_ascii_case(g)))
        {
            return false;
        }
        if !options.qualities.is_empty()
            && !options.qualities.iter().any(|q| item.variant_for_quality(q).is_some())
        {
            return false;
        }
        item.rating >= options.minimum_rating as f32
    }

    fn compare(a: &CatalogItem, b: &CatalogItem, field: SortField) -> Ordering {
        match field {
            SortField::Title => a.title.to_lowercase().cmp(&b.title.to_lowercase()),
            SortField::Year => a.year.cmp(&b.year),
            SortField::Rating => a.rating.partial_cmp(&b.rating).unwrap_or(Ordering::Equal),
            SortField::LikeCount => a.like_count.cmp(&b.like_count),
            SortField::DownloadCount => a.download_count.cmp(&b.download_count),
            SortField::DateAdded => a.date_uploaded_unix.cmp(&b.date_uploaded_unix),
        }
    }

    /// Apply filters, ordering and pagination synchronously.
    pub fn query(&self, options: &ListOptions) -> CatalogPage {
        let mut matched: Vec<&CatalogItem> = self.items
            .iter()
            .filter(|item| Self::matches(item, options))
            .collect();

        matched.sort_by(|a, b| {
            let ord = Self::compare(a, b, options.sort_by).then_with(|| a.id.cmp(&b.id));
            match options.order_by {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            }
        });

        let total_count = matched.len() as u64;
        let limit = options.limit as usize;
        let skip = (options.page.max(1) as usize - 1).saturating_mul(limit);

        CatalogPage {
            items: matched.into_iter().skip(skip).take(limit).cloned().collect(),
            total_count,
            page: options.page.max(1),
            limit: options.limit,
        }
    }

    /// Synchronous point lookup.
    pub fn find(&self, id: ItemId) -> Option<&CatalogItem> {
        self.items.iter().find(|item| item.id == id)
    }
}

impl CatalogSource for StaticCatalog {
    async fn list_items(&self, options: &ListOptions) -> CatalogPage {
        self.query(options)
    }

    async fn get_item(&self, id: ItemId) -> Option<CatalogItem> {
        self.find(id).cloned()
    }
}
