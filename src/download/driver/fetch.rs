// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! One-shot HTTP fetch of a variant's URL.
//!
//! The body is streamed into a staging file and handed over as
//! [`Payload::File`]. There is no suspension and no partial restart: a
//! paused fetch is aborted and a resumed one starts from the first byte.

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;

use super::{
    DriverCapabilities, DriverError, Emitter, EventSender, Payload, TransferDriver, TransferEventKind,
    TransferProgress, TransferRequest, TransferTable,
};
use crate::download::types::TransferId;

/// Minimum interval between progress events.
const PROGRESS_INTERVAL: Duration = Duration::from_millis(250);

/// Default timeout for establishing the connection (in seconds).
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Driver that downloads the variant URL over HTTP.
pub struct FetchDriver {
    client: reqwest::Client,
    staging_dir: PathBuf,
    transfers: TransferTable,
}

impl FetchDriver {
    pub fn new(staging_dir: PathBuf) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to configure fetch HTTP client, using defaults: {}", e);
                reqwest::Client::new()
            });

        Self {
            client,
            staging_dir,
            transfers: TransferTable::default(),
        }
    }

    /// Staging file for a transfer.
    fn part_path(staging_dir: &Path, transfer: TransferId) -> PathBuf {
        staging_dir.join(format!("transfer-{}.part", transfer.0))
    }
}

async fn fetch_to_file(client: reqwest::Client, request: &TransferRequest, path: &Path, emitter: &Emitter) -> Result<()> {
    if request.variant.url.is_empty() {
        return Err(anyhow!("variant has no download URL"));
    }

    let response = client
        .get(&request.variant.url)
        .send()
        .await
        .with_context(|| "Failed to connect to download source")?
        .error_for_status()
        .with_context(|| "Download source rejected the request")?;

    let total = response.content_length().unwrap_or(request.variant.size_bytes);
    if !emitter.emit(TransferEventKind::Connected { peers: 1 }) {
        return Ok(());
    }

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create staging directory: {:?}", parent))?;
    }
    let mut file = tokio::fs::File::create(path)
        .await
        .with_context(|| format!("Failed to create staging file: {:?}", path))?;

    let started = Instant::now();
    let mut last_report = Instant::now();
    let mut downloaded = 0u64;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let bytes = chunk.with_context(|| "Connection dropped during download")?;
        file.write_all(&bytes).await.with_context(|| "Failed to write staging file")?;
        downloaded += bytes.len() as u64;

        if last_report.elapsed() >= PROGRESS_INTERVAL {
            last_report = Instant::now();
            let elapsed = started.elapsed().as_secs_f64();
            let rate = if elapsed > 0.0 { (downloaded as f64 / elapsed) as u64 } else { 0 };
            let ratio = if total > 0 { (downloaded as f64 / total as f64).min(1.0) } else { 0.0 };
            let eta_seconds = if rate > 0 && total > 0 {
                Some(total.saturating_sub(downloaded) / rate)
            } else {
                None
            };

            let progress = TransferProgress { ratio, rate, peers: 1, downloaded_bytes: downloaded, eta_seconds };
            if !emitter.emit(TransferEventKind::Progress(progress)) {
                return Ok(());
            }
        }
    }

    file.flush().await.with_context(|| "Failed to flush staging file")?;
    emitter.emit(TransferEventKind::Completed(Payload::File(path.to_path_buf())));
    Ok(())
}

impl TransferDriver for FetchDriver {
    fn name(&self) -> &'static str {
        "fetch"
    }

    fn capabilities(&self) -> DriverCapabilities {
        DriverCapabilities::default()
    }

    fn begin(&self, request: TransferRequest, events: EventSender) -> Result<(), DriverError> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| DriverError::Begin(e.to_string()))?;

        let transfer = request.transfer;
        let emitter = Emitter::new(events, request.item_id, transfer);
        let path = Self::part_path(&self.staging_dir, transfer);
        let client = self.client.clone();

        tracing::debug!("Fetching '{}' from {}", request.title, request.variant.url);

        let task = handle.spawn(async move {
            if let Err(e) = fetch_to_file(client, &request, &path, &emitter).await {
                tracing::warn!("Fetch for item {} failed: {:#}", request.item_id, e);
                let _ = tokio::fs::remove_file(&path).await;
                emitter.fail(format!("{:#}", e));
            }
        });

        self.transfers.insert(transfer, task, Arc::new(AtomicBool::new(false)));
        Ok(())
    }

    fn abort(&self, transfer: TransferId) {
        if self.transfers.abort(transfer) {
            let path = Self::part_path(&self.staging_dir, transfer);
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("Failed to remove staging file {:?}: {}", path, e);
                }
            }
        }
    }
}
