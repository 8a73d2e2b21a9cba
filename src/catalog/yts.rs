// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Client for the YTS movie API.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::{CatalogItem, CatalogPage, CatalogSource, ItemId, ListOptions};

/// Default YTS API endpoint.
pub const DEFAULT_YTS_URL: &str = "https://yts.mx/api/v2";

/// Default timeout for catalog requests (in seconds).
const REQUEST_TIMEOUT_SECS: u64 = 15;

/// Envelope wrapping every API response.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: String,
    #[serde(default)]
    status_message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ListData {
    #[serde(default)]
    movie_count: u64,
    #[serde(default)]
    limit: u32,
    #[serde(default)]
    page_number: u32,
    #[serde(default)]
    movies: Option<Vec<CatalogItem>>,
}

#[derive(Debug, Deserialize)]
struct DetailData {
    movie: Option<CatalogItem>,
}

#[derive(Debug, Deserialize)]
struct SuggestionData {
    #[serde(default)]
    movies: Option<Vec<CatalogItem>>,
}

/// Catalog backed by the YTS REST API.
#[derive(Debug, Clone)]
pub struct YtsCatalog {
    base_url: String,
    client: reqwest::Client,
}

impl Default for YtsCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl YtsCatalog {
    /// Create a client for the public endpoint.
    pub fn new() -> Self {
        Self::with_url(DEFAULT_YTS_URL)
    }

    /// Create a client for a custom endpoint (mirrors, test servers).
    pub fn with_url(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to configure catalog HTTP client, using defaults: {}", e);
                reqwest::Client::new()
            });

        Self {
            base_url: url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Base URL requests are sent to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build query parameters for a listing.
    fn list_params(options: &ListOptions) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("limit", options.limit.to_string()),
            ("page", options.page.max(1).to_string()),
            ("sort_by", options.sort_by.as_str().to_string()),
            ("order_by", options.order_by.as_str().to_string()),
        ];
        if let Some(query) = options.query_term.as_deref().filter(|q| !q.trim().is_empty()) {
            params.push(("query_term", query.trim().to_string()));
        }
        if !options.genres.is_empty() {
            params.push(("genre", options.genres.join(",")));
        }
        if !options.qualities.is_empty() {
            params.push(("quality", options.qualities.join(",")));
        }
        if options.minimum_rating > 0 {
            params.push(("minimum_rating", options.minimum_rating.to_string()));
        }
        params
    }

    async fn fetch<T: DeserializeOwned>(&self, endpoint: &str, params: &[(&str, String)]) -> Result<T> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let response = self.client
            .get(&url)
            .query(params)
            .send()
            .await
            .with_context(|| format!("Failed to reach catalog endpoint {}", endpoint))?;

        if !response.status().is_success() {
            return Err(anyhow!("Catalog API error: HTTP {}", response.status()));
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .with_context(|| format!("Failed to decode {} response", endpoint))?;

        if envelope.status != "ok" {
            return Err(anyhow!("Catalog API error: {}", envelope.status_message));
        }

        envelope.data.ok_or_else(|| anyhow!("Catalog API returned no data"))
    }

    /// Movies related to `id`. Empty on failure.
    pub async fn suggestions(&self, id: ItemId) -> Vec<CatalogItem> {
        let params = [("movie_id", id.to_string())];
        match self.fetch::<SuggestionData>("movie_suggestions.json", &params).await {
            Ok(data) => data.movies.unwrap_or_default(),
            Err(e) => {
                tracing::warn!("Failed to fetch suggestions for {}: {:#}", id, e);
                Vec::new()
            }
        }
    }
}

impl CatalogSource for YtsCatalog {
    async fn list_items(&self, options: &ListOptions) -> CatalogPage {
        let params = Self::list_params(options);
        match self.fetch::<ListData>("list_movies.json", &params).await {
            Ok(data) => CatalogPage {
                items: data.movies.unwrap_or_default(),
                total_count: data.movie_count,
                page: if data.page_number == 0 { options.page } else { data.page_number },
                limit: if data.limit == 0 { options.limit } else { data.limit },
            },
            Err(e) => {
                tracing::warn!("Failed to fetch from catalog API: {:#}", e);
                CatalogPage::empty(options)
            }
        }
    }

    async fn get_item(&self, id: ItemId) -> Option<CatalogItem> {
        let params = [
            ("movie_id", id.to_string()),
            ("with_cast", "true".to_string()),
            ("with_images", "true".to_string()),
        ];
        let movie = match self.fetch::<DetailData>("movie_details.json", &params).await {
            Ok(data) => data.movie?,
            Err(e) => {
                tracing::warn!("Failed to fetch movie {}: {:#}", id, e);
                return None;
            }
        };

        // The API answers unknown ids with an empty placeholder movie
        if movie.id == 0 {
            return None;
        }

        let mut movie = movie;
        movie.suggestions = Some(self.suggestions(id).await);
        Some(movie)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{SortField, SortOrder};

    fn param<'a>(params: &'a [(&'static str, String)], key: &str) -> Option<&'a str> {
        params.iter().find(|(k, _)| *k == key).map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_list_params_defaults() {
        let params = YtsCatalog::list_params(&ListOptions::default());
        assert_eq!(param(&params, "limit"), Some("20"));
        assert_eq!(param(&params, "page"), Some("1"));
        assert_eq!(param(&params, "sort_by"), Some("rating"));
        assert_eq!(param(&params, "order_by"), Some("desc"));
        assert!(param(&params, "query_term").is_none());
        assert!(param(&params, "minimum_rating").is_none());
    }

    #[test]
    fn test_list_params_filters() {
        let options = ListOptions {
            query_term: Some("  matrix ".into()),
            genres: vec!["Action".into(), "Sci-Fi".into()],
            qualities: vec!["1080p".into()],
            minimum_rating: 7,
            sort_by: SortField::Year,
            order_by: SortOrder::Asc,
            page: 0,
            limit: 18,
        };
        let params = YtsCatalog::list_params(&options);
        assert_eq!(param(&params, "query_term"), Some("matrix"));
        assert_eq!(param(&params, "genre"), Some("Action,Sci-Fi"));
        assert_eq!(param(&params, "quality"), Some("1080p"));
        assert_eq!(param(&params, "minimum_rating"), Some("7"));
        assert_eq!(param(&params, "page"), Some("1"));
        assert_eq!(param(&params, "order_by"), Some("asc"));
    }

    #[test]
    fn test_envelope_decode() {
        let json = r#"{"status":"ok","status_message":"Query was successful","data":{"movie_count":1,"limit":20,"page_number":1,"movies":[{"id":3,"title":"Up"}]}}"#;
        let envelope: Envelope<ListData> = serde_json::from_str(json).expect("valid envelope");
        let data = envelope.data.expect("data present");
        assert_eq!(data.movie_count, 1);
        assert_eq!(data.movies.unwrap()[0].title, "Up");
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let catalog = YtsCatalog::with_url("http://localhost:9000/api/v2/");
        assert_eq!(catalog.base_url(), "http://localhost:9000/api/v2");
    }

    #[tokio::test]
    async fn test_unreachable_catalog_yields_empty_page() {
        // Port 9 (discard) is closed on test machines
        let catalog = YtsCatalog::with_url("http://127.0.0.1:9");
        let page = catalog.list_items(&ListOptions::default()).await;
        assert!(page.items.is_empty());
        assert_eq!(page.total_count, 0);
        assert!(catalog.get_item(1).await.is_none());
    }
}
