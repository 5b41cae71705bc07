//! One ingestion cycle: fetch a snapshot, mirror it into the store and
//! re-arm the refresh schedule.
//!
//! Writes are issued one statement at a time with no surrounding
//! transaction. When a statement fails part-way through the parcel loop,
//! rows already written for earlier parcels stay in place and the cycle is
//! reported as failed.

use crate::{
    error::IngestError,
    schedule::RefreshSchedule,
    source::SnapshotSource,
    store::SensorStore,
};
use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub global_reading: bool,
    pub parcels_upserted: usize,
    pub readings_inserted: usize,
    pub parcels_deactivated: usize,
}

#[derive(Debug)]
pub enum TickOutcome {
    Completed(CycleReport),
    Failed(IngestError),
    /// Another cycle was still running, so this one did nothing.
    Skipped,
}

pub struct Reconciler {
    source: Arc<dyn SnapshotSource>,
    store: Arc<dyn SensorStore>,
    schedule: Arc<RefreshSchedule>,
    interval: Duration,
    in_flight: AtomicBool,
}

impl Reconciler {
    /// The schedule starts armed one `interval` from now.
    pub fn new(
        source: Arc<dyn SnapshotSource>,
        store: Arc<dyn SensorStore>,
        interval: Duration,
    ) -> Self {
        Self {
            source,
            store,
            schedule: Arc::new(RefreshSchedule::new(interval)),
            interval,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn schedule(&self) -> Arc<RefreshSchedule> {
        Arc::clone(&self.schedule)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Runs a cycle unless one is already in flight, logging the result.
    pub async fn tick(&self) -> TickOutcome {
        let Some(_guard) = InFlight::acquire(&self.in_flight) else {
            warn!("previous ingestion cycle still running; skipping this tick");
            return TickOutcome::Skipped;
        };

        match self.run_cycle().await {
            Ok(report) => {
                info!(
                    global = report.global_reading,
                    parcels = report.parcels_upserted,
                    readings = report.readings_inserted,
                    deactivated = report.parcels_deactivated,
                    "ingestion cycle completed"
                );
                TickOutcome::Completed(report)
            }
            Err(err) => {
                error!(kind = err.kind(), error = %err, "ingestion cycle failed");
                TickOutcome::Failed(err)
            }
        }
    }

    /// Executes one cycle without the re-entrancy guard.
    pub async fn run_cycle(&self) -> Result<CycleReport, IngestError> {
        let snapshot = self.source.fetch().await?;
        let now = Utc::now();
        let batch = snapshot.into_batch(now)?;
        let mut report = CycleReport::default();

        if let Some(global) = &batch.global {
            self.store.insert_global_reading(global).await?;
            report.global_reading = true;
        }

        let present: Vec<i64> = batch
            .parcels
            .iter()
            .map(|entry| entry.parcel.id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        // Snapshot order; a repeated id overwrites the earlier upsert.
        for entry in &batch.parcels {
            self.store.upsert_parcel(&entry.parcel).await?;
            report.parcels_upserted += 1;

            if let Some(reading) = &entry.reading {
                self.store.insert_sensor_reading(reading).await?;
                report.readings_inserted += 1;
            }
        }

        report.parcels_deactivated = self.store.deactivate_missing(&present, now).await?;

        self.schedule.arm(self.interval);
        Ok(report)
    }
}

struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
