// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Actionable error messages for the command line.
//!
//! Every message carries a title, possible causes and numbered fixes, so the
//! user can act on a failure without reading logs.

use std::fmt;

use crate::download::CommandError;

/// Closing hint appended to every message.
pub const VERBOSE_HINT: &str = "Run again with --verbose for details.";

/// Formats an error message with title, causes and fixes.
///
/// # Example
///
/// ```
/// use cinefetch::error::format_error;
///
/// let error = format_error(
///     "Failed to reach the catalog",
///     &["No network connection", "Catalog URL is wrong"],
///     &["Check: cinefetch config show", "Browse offline: cinefetch --catalog-file movies.json browse"],
/// );
/// assert!(error.contains("2. Browse offline"));
/// ```
pub fn format_error(title: &str, causes: &[&str], fixes: &[&str]) -> String {
    let mut output = format!("[✗] {}\n\n", title);

    if !causes.is_empty() {
        output.push_str("Possible causes:\n");
        for cause in causes {
            output.push_str(&format!("  - {}\n", cause));
        }
        output.push('\n');
    }

    if !fixes.is_empty() {
        output.push_str("Try these fixes:\n");
        for (i, fix) in fixes.iter().enumerate() {
            output.push_str(&format!("  {}. {}\n", i + 1, fix));
        }
        output.push('\n');
    }

    output.push_str(VERBOSE_HINT);
    output
}

/// Builder for constructing formatted error messages.
#[derive(Debug, Clone)]
pub struct ErrorBuilder {
    title: String,
    causes: Vec<String>,
    fixes: Vec<String>,
}

impl ErrorBuilder {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            causes: Vec::new(),
            fixes: Vec::new(),
        }
    }

    pub fn cause(mut self, cause: impl Into<String>) -> Self {
        self.causes.push(cause.into());
        self
    }

    pub fn fix(mut self, fix: impl Into<String>) -> Self {
        self.fixes.push(fix.into());
        self
    }

    /// Explain a rejected download command.
    pub fn for_command(error: &CommandError) -> Self {
        let builder = Self::new(capitalize(&error.to_string()));
        match error {
            CommandError::AlreadyListed(id) => builder
                .cause("The movie is downloading or was downloaded before")
                .fix("List downloads: cinefetch downloads")
                .fix(format!("Forget the finished copy: cinefetch remove {}", id)),
            CommandError::NotReady => builder
                .cause("The transfer client is still starting")
                .fix("Wait a moment and try again"),
            CommandError::NotFound(_) | CommandError::InvalidState { .. } => builder
                .cause("The download finished, failed or was cancelled in the meantime")
                .fix("List downloads: cinefetch downloads"),
            CommandError::ManagerClosed => builder.cause("The session is shutting down"),
        }
    }

    /// The catalog could not be queried.
    pub fn catalog_unreachable(url: &str) -> Self {
        Self::new(format!("No results from {}", url))
            .cause("No network connection")
            .cause("The catalog service is down or the URL is wrong")
            .fix("Check the URL: cinefetch config show")
            .fix("Use a local catalog: cinefetch config set catalog_file movies.json")
    }

    pub fn build(self) -> String {
        let causes: Vec<&str> = self.causes.iter().map(|s| s.as_str()).collect();
        let fixes: Vec<&str> = self.fixes.iter().map(|s| s.as_str()).collect();
        format_error(&self.title, &causes, &fixes)
    }
}

impl fmt::Display for ErrorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.clone().build())
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
