// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Catalog entities as returned by the movie API.

use serde::{Deserialize, Serialize};

/// Stable identifier of a catalog item.
pub type ItemId = u64;

/// A specific acquirable rendition of a movie.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Variant {
    /// Download URL of the torrent descriptor
    #[serde(default)]
    pub url: String,
    /// Content-addressing token (info hash)
    pub hash: String,
    /// Quality label, e.g. "1080p"
    #[serde(default)]
    pub quality: String,
    /// Release type, e.g. "bluray" or "web"
    #[serde(default, rename = "type")]
    pub kind: String,
    /// Seeders reported by the catalog
    #[serde(default)]
    pub seeds: u32,
    /// Leechers reported by the catalog
    #[serde(default)]
    pub peers: u32,
    /// Human readable size, e.g. "1.95 GB"
    #[serde(default)]
    pub size: String,
    /// Approximate size in bytes
    #[serde(default)]
    pub size_bytes: u64,
    #[serde(default)]
    pub date_uploaded: String,
    #[serde(default)]
    pub date_uploaded_unix: i64,
}

impl Variant {
    /// Short label used in listings, e.g. "1080p bluray".
    pub fn label(&self) -> String {
        if self.kind.is_empty() {
            self.quality.clone()
        } else {
            format!("{} {}", self.quality, self.kind)
        }
    }
}

/// A cast member attached to detailed catalog lookups.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CastMember {
    pub name: String,
    #[serde(default)]
    pub character_name: String,
    #[serde(default)]
    pub url_small_image: String,
    #[serde(default)]
    pub imdb_code: String,
}

/// A listed movie. Immutable once fetched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CatalogItem {
    pub id: ItemId,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub imdb_code: String,
    pub title: String,
    #[serde(default)]
    pub title_long: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub year: u32,
    #[serde(default)]
    pub rating: f32,
    /// Runtime in minutes
    #[serde(default)]
    pub runtime: u32,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub description_full: String,
    #[serde(default)]
    pub yt_trailer_code: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub mpa_rating: String,
    #[serde(default)]
    pub background_image: String,
    #[serde(default)]
    pub small_cover_image: String,
    #[serde(default)]
    pub medium_cover_image: String,
    #[serde(default)]
    pub large_cover_image: String,
    /// Available renditions
    #[serde(default, rename = "torrents")]
    pub variants: Vec<Variant>,
    #[serde(default)]
    pub like_count: u64,
    #[serde(default)]
    pub download_count: u64,
    #[serde(default)]
    pub date_uploaded: String,
    #[serde(default)]
    pub date_uploaded_unix: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cast: Option<Vec<CastMember>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<Vec<CatalogItem>>,
}

impl CatalogItem {
    /// Create a bare item with just an id and title.
    pub fn new(id: ItemId, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            ..Default::default()
        }
    }

    /// Builder-style helper to attach a variant.
    pub fn with_variant(mut self, variant: Variant) -> Self {
        self.variants.push(variant);
        self
    }

    /// Find a variant by quality label (case-insensitive).
    pub fn variant_for_quality(&self, quality: &str) -> Option<&Variant> {
        self.variants
            .iter()
            .find(|v| v.quality.eq_ignore_ascii_case(quality))
    }

    /// The variant with the most seeders, used when no quality is requested.
    pub fn best_variant(&self) -> Option<&Variant> {
        self.variants.iter().max_by_key(|v| v.seeds)
    }

    /// YouTube link for the trailer, if the item has one.
    pub fn trailer_url(&self) -> Option<String> {
        if self.yt_trailer_code.is_empty() {
            None
        } else {
            Some(format!("https://www.youtube.com/watch?v={}", self.yt_trailer_code))
        }
    }
}
