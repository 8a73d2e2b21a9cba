// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Utility functions for cinefetch.
//!
//! Display formatting shared by the CLI and the download types.

/// Format a transfer rate in bytes per second.
///
/// # Examples
///
/// ```
/// use cinefetch::utils::format_speed;
///
/// assert_eq!(format_speed(512), "512 B/s");
/// assert_eq!(format_speed(1_572_864), "1.5 MB/s");
/// ```
pub fn format_speed(bps: u64) -> String {
    format!("{}/s", format_bytes(bps))
}

/// Format a byte count with binary units.
pub fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_073_741_824 {
        format!("{:.1} GB", bytes as f64 / 1_073_741_824.0)
    } else if bytes >= 1_048_576 {
        format!("{:.1} MB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{} B", bytes)
    }
}

/// Format a remaining time; `None` means unknown and renders as "∞".
pub fn format_eta(eta_seconds: Option<u64>) -> String {
    match eta_seconds {
        None => "∞".to_string(),
        Some(secs) if secs >= 3600 => format!("{}h {}m", secs / 3600, (secs % 3600) / 60),
        Some(secs) if secs >= 60 => format!("{}m {}s", secs / 60, secs % 60),
        Some(secs) => format!("{}s", secs),
    }
}

/// File name a finished download is saved under.
///
/// Spaces become underscores and path separators are dropped, e.g.
/// "The Matrix" -> "The_Matrix.mp4".
pub fn artifact_file_name(title: &str) -> String {
    let stem: String = title
        .trim()
        .chars()
        .filter(|c| !matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|'))
        .map(|c| if c == ' ' { '_' } else { c })
        .collect();

    if stem.is_empty() {
        "download.mp4".to_string()
    } else {
        format!("{}.mp4", stem)
    }
}
