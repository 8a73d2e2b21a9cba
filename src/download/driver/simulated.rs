// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Timer-driven transfer simulation.
//!
//! Each transfer is a tokio task that advances by a random step per tick,
//! reports synthetic speed and peer counts derived from the variant's swarm
//! numbers, and can inject random failures. Suspension is real: a suspended
//! task keeps ticking without advancing or emitting, including during the
//! finishing phases.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::{
    DriverCapabilities, DriverError, Emitter, EventSender, FinishPhase, Payload, TransferDriver,
    TransferEventKind, TransferProgress, TransferRequest, TransferTable,
};
use crate::download::magnet::magnet_uri;
use crate::download::types::TransferId;

/// Size assumed for variants that do not report one (1 GiB).
const DEFAULT_SIMULATED_SIZE: u64 = 1_073_741_824;

/// Tuning knobs for the simulation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimulationSettings {
    /// Interval between progress events, in milliseconds
    pub tick_ms: u64,
    /// Delay before the transfer reports `Connected`, in milliseconds
    pub connect_delay_ms: u64,
    /// Delay spent in each finishing phase, in milliseconds
    pub finish_delay_ms: u64,
    /// Smallest fraction gained per tick
    pub min_step: f64,
    /// Largest fraction gained per tick
    pub max_step: f64,
    /// Probability per tick that the transfer fails
    pub failure_rate: f64,
    /// Fixed RNG seed for reproducible runs
    pub seed: Option<u64>,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            tick_ms: 1000,
            connect_delay_ms: 1500,
            finish_delay_ms: 500,
            min_step: 0.01,
            max_step: 0.05,
            failure_rate: 0.0,
            seed: None,
        }
    }
}

impl SimulationSettings {
    /// Fast, deterministic settings for tests and demos.
    pub fn instant() -> Self {
        Self {
            tick_ms: 5,
            connect_delay_ms: 1,
            finish_delay_ms: 1,
            min_step: 0.2,
            max_step: 0.3,
            failure_rate: 0.0,
            seed: Some(7),
        }
    }

    fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }
}

/// Driver that fakes transfers on timers.
pub struct SimulatedDriver {
    settings: SimulationSettings,
    transfers: TransferTable,
}

impl SimulatedDriver {
    pub fn new(settings: SimulationSettings) -> Self {
        Self {
            settings,
            transfers: TransferTable::default(),
        }
    }

    pub fn settings(&self) -> &SimulationSettings {
        &self.settings
    }

    fn rng_for(&self, transfer: TransferId) -> StdRng {
        match self.settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed ^ transfer.0),
            None => StdRng::from_entropy(),
        }
    }
}

/// Placeholder content handed over on completion.
fn simulated_content(request: &TransferRequest) -> Vec<u8> {
    format!(
        "cinefetch simulated download\ntitle: {}\nquality: {}\nsource: {}\n",
        request.title,
        request.variant.quality,
        magnet_uri(&request.variant.hash, &request.title),
    )
    .into_bytes()
}

async fn hold_while_suspended(suspended: &AtomicBool, tick: Duration) {
    while suspended.load(Ordering::SeqCst) {
        tokio::time::sleep(tick).await;
    }
}

async fn run_transfer(
    request: TransferRequest,
    settings: SimulationSettings,
    emitter: Emitter,
    suspended: Arc<AtomicBool>,
    mut rng: StdRng,
) {
    let total = if request.variant.size_bytes == 0 { DEFAULT_SIMULATED_SIZE } else { request.variant.size_bytes };
    let swarm = (request.variant.seeds + request.variant.peers).max(1);
    let tick = settings.tick();
    let (min_step, max_step) = if settings.min_step <= settings.max_step {
        (settings.min_step.max(0.0), settings.max_step.max(0.0))
    } else {
        (settings.max_step.max(0.0), settings.min_step.max(0.0))
    };

    tokio::time::sleep(Duration::from_millis(settings.connect_delay_ms)).await;
    if !emitter.emit(TransferEventKind::Connected { peers: rng.gen_range(1..=swarm) }) {
        return;
    }

    let mut ratio = request.start_ratio.clamp(0.0, 1.0);
    while ratio < 1.0 {
        tokio::time::sleep(tick).await;
        if suspended.load(Ordering::SeqCst) {
            continue;
        }

        if settings.failure_rate > 0.0 && rng.gen_bool(settings.failure_rate.min(1.0)) {
            tracing::debug!("Simulated failure for item {} ({})", request.item_id, request.transfer);
            emitter.fail("Simulated peer timeout");
            return;
        }

        let step = if max_step > min_step { rng.gen_range(min_step..=max_step) } else { min_step };
        let step = step.max(f64::EPSILON);
        ratio = (ratio + step).min(1.0);

        let rate = (step * total as f64 / tick.as_secs_f64()) as u64;
        let downloaded_bytes = (ratio * total as f64) as u64;
        let remaining = total.saturating_sub(downloaded_bytes);
        let eta_seconds = if rate > 0 { Some(remaining / rate) } else { None };

        let progress = TransferProgress {
            ratio,
            rate,
            peers: rng.gen_range(1..=swarm),
            downloaded_bytes,
            eta_seconds,
        };
        if !emitter.emit(TransferEventKind::Progress(progress)) {
            return;
        }
    }

    let finish_delay = Duration::from_millis(settings.finish_delay_ms);
    for phase in [FinishPhase::Zipping, FinishPhase::Seeding] {
        hold_while_suspended(&suspended, tick).await;
        if !emitter.emit(TransferEventKind::Finishing(phase)) {
            return;
        }
        tokio::time::sleep(finish_delay).await;
    }

    hold_while_suspended(&suspended, tick).await;
    emitter.emit(TransferEventKind::Completed(Payload::Bytes(simulated_content(&request))));
}

impl TransferDriver for SimulatedDriver {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn capabilities(&self) -> DriverCapabilities {
        DriverCapabilities { suspend: true, partial_restart: true }
    }

    fn begin(&self, request: TransferRequest, events: EventSender) -> Result<(), DriverError> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| DriverError::Begin(e.to_string()))?;

        let transfer = request.transfer;
        let emitter = Emitter::new(events, request.item_id, transfer);
        let suspended = Arc::new(AtomicBool::new(false));
        let rng = self.rng_for(transfer);

        tracing::debug!(
            "Simulating transfer {} for '{}' ({}) from {:.0}%",
            transfer,
            request.title,
            request.variant.label(),
            request.start_ratio * 100.0
        );

        let task = handle.spawn(run_transfer(request, self.settings.clone(), emitter, suspended.clone(), rng));
        self.transfers.insert(transfer, task, suspended);
        Ok(())
    }

    fn suspend(&self, transfer: TransferId) -> Result<(), DriverError> {
        self.transfers.set_suspended(transfer, true)
    }

    fn resume(&self, transfer: TransferId) -> Result<(), DriverError> {
        self.transfers.set_suspended(transfer, false)
    }

    fn abort(&self, transfer: TransferId) {
        if self.transfers.abort(transfer) {
            tracing::debug!("Aborted simulated transfer {}", transfer);
        }
    }
}
