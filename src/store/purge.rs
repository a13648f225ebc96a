use serde::Serialize;
use tracing::{info, warn};

use super::{tag, Storage, StoreError};
use crate::db::{BackendError, ErrorCategory, Executor};

/// Purge behaviour bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PurgeFlags(u32);

impl PurgeFlags {
    /// Keep readings that have not been sent yet.
    pub const RETAIN_UNSENT: PurgeFlags = PurgeFlags(0x01);

    pub fn from_bits(bits: u32) -> Self {
        PurgeFlags(bits)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn retain_unsent(self) -> bool {
        self.0 & Self::RETAIN_UNSENT.0 != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgeStep {
    OldestAge,
    CountUnsentPurged,
    Delete,
    CountUnsentRetained,
    CountReadings,
}

/// A counting step that failed without aborting the purge.
#[derive(Debug, Clone)]
pub struct PurgeFailure {
    pub step: PurgeStep,
    pub error: BackendError,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeSummary {
    pub removed: u64,
    pub unsent_purged: u64,
    pub unsent_retained: u64,
    pub readings: u64,
    #[serde(skip)]
    pub failures: Vec<PurgeFailure>,
}

impl<E: Executor> Storage<E> {
    /// Deletes readings older than `age` hours.
    ///
    /// An age of zero purges relative to the oldest reading. With
    /// [`PurgeFlags::RETAIN_UNSENT`] only readings with an id below `sent`
    /// are removed. Only a failed delete fails the purge; a failed count
    /// reports zero and is listed in [`PurgeSummary::failures`].
    pub async fn purge_readings(
        &self,
        age: u64,
        flags: PurgeFlags,
        sent: u64,
    ) -> Result<PurgeSummary, StoreError> {
        let mut summary = PurgeSummary::default();

        let age = if age == 0 {
            let sql = self.compiler().oldest_reading_age();
            let raw = self.run(tag::PURGE, &sql).await?;
            match raw.first_value() {
                // empty table
                None => return Ok(summary),
                Some(hours) => parse_hours(hours)?,
            }
        } else {
            age
        };

        if !flags.retain_unsent() {
            let sql = self.compiler().count_unsent_older(age, sent);
            summary.unsent_purged = self.count(PurgeStep::CountUnsentPurged, &sql, &mut summary.failures).await;
        }

        let sql = self.compiler().purge_older(age, flags.retain_unsent(), sent);
        summary.removed = self.run(tag::PURGE, &sql).await?.affected;

        let sql = self.compiler().count_unsent(sent);
        summary.unsent_retained = self.count(PurgeStep::CountUnsentRetained, &sql, &mut summary.failures).await;

        let sql = self.compiler().count_readings();
        summary.readings = self.count(PurgeStep::CountReadings, &sql, &mut summary.failures).await;

        info!(
            age,
            removed = summary.removed,
            unsent_purged = summary.unsent_purged,
            unsent_retained = summary.unsent_retained,
            readings = summary.readings,
            "purge complete"
        );
        Ok(summary)
    }

    async fn count(&self, step: PurgeStep, sql: &str, failures: &mut Vec<PurgeFailure>) -> u64 {
        match self.run(tag::PURGE, sql).await {
            Ok(raw) => raw
                .first_value()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(0),
            Err(error) => {
                warn!(?step, "purge count failed: {}", error);
                failures.push(PurgeFailure { step, error });
                0
            }
        }
    }
}

/// The oldest-age query yields fractional hours.
fn parse_hours(text: &str) -> Result<u64, StoreError> {
    match text.trim().parse::<f64>() {
        Ok(hours) if hours.is_finite() && hours >= 0.0 => Ok(hours as u64),
        _ => Err(BackendError::new(
            ErrorCategory::Unknown,
            format!("unexpected reading age {:?}", text),
        )
        .into()),
    }
}
