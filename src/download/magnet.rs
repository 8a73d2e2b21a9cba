// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Magnet links for catalog variants.

use reqwest::Url;

/// Trackers appended to every magnet link.
pub const DEFAULT_TRACKERS: &[&str] = &[
    "udp://open.demonii.com:1337/announce",
    "udp://tracker.openbittorrent.com:80",
    "udp://tracker.coppersurfer.tk:6969",
    "udp://glotorrents.pw:6969/announce",
    "udp://tracker.opentrackr.org:1337/announce",
];

/// Build a magnet URI for an info hash with a display name and the default trackers.
///
/// `xt` is written literally; `dn` and `tr` are form-encoded.
///
/// # Examples
///
/// ```
/// use cinefetch::download::magnet::magnet_uri;
///
/// let uri = magnet_uri("ABC123", "Big Buck Bunny");
/// assert!(uri.starts_with("magnet:?xt=urn:btih:ABC123&dn=Big+Buck+Bunny"));
/// ```
pub fn magnet_uri(hash: &str, display_name: &str) -> String {
    let mut uri = format!("magnet:?xt=urn:btih:{}", hash);
    let Ok(mut url) = Url::parse("magnet:?") else {
        return uri;
    };

    url.query_pairs_mut()
        .clear()
        .append_pair("dn", display_name)
        .extend_pairs(DEFAULT_TRACKERS.iter().map(|tracker| ("tr", *tracker)));

    if let Some(query) = url.query().filter(|q| !q.is_empty()) {
        uri.push('&');
        uri.push_str(query);
    }
    uri
}
