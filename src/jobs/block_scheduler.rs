use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::services::lifecycle::{LifecycleEngine, LifecycleError, ScanOutcome};
use crate::services::store::StoreError;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanStats {
    pub candidates: usize,
    pub applied: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl ScanStats {
    fn record(&mut self, job: &str, id: Uuid, result: Result<ScanOutcome, LifecycleError>) {
        match result {
            Ok(ScanOutcome::Applied) => self.applied += 1,
            Ok(ScanOutcome::Skipped) => self.skipped += 1,
            Err(e) => {
                tracing::error!(job, account_id = %id, error = %e, "Scheduled transition failed");
                self.failed += 1;
            }
        }
    }
}

/// Activates scheduled blocks whose start date has been reached.
///
/// Each account is handled in its own transaction; one failure does not stop
/// the batch.
pub async fn activate_scheduled_blocks(
    engine: &LifecycleEngine,
    now: DateTime<Utc>,
    batch_size: i64,
) -> Result<ScanStats, StoreError> {
    let candidates = engine.primary().due_scheduled_blocks(now, batch_size).await?;
    let mut stats = ScanStats {
        candidates: candidates.len(),
        ..ScanStats::default()
    };

    tracing::info!(candidates = stats.candidates, "Starting scheduled block activation");

    for account in candidates {
        let result = engine.activate_scheduled_block(account.id, now).await;
        stats.record("scheduled_blocks", account.id, result);
    }

    tracing::info!(?stats, "Scheduled block activation completed");

    Ok(stats)
}

/// Unblocks archived accounts whose block end date has passed
pub async fn expire_blocks(
    engine: &LifecycleEngine,
    now: DateTime<Utc>,
    batch_size: i64,
) -> Result<ScanStats, StoreError> {
    let candidates = engine.archive().due_unblocks(now, batch_size).await?;
    let mut stats = ScanStats {
        candidates: candidates.len(),
        ..ScanStats::default()
    };

    tracing::info!(candidates = stats.candidates, "Starting block expiry");

    for record in candidates {
        let result = engine.expire_block(record.id, now).await;
        stats.record("block_expiry", record.id, result);
    }

    tracing::info!(?stats, "Block expiry completed");

    Ok(stats)
}

/// Moves live blocked or closed rows that the archive policy covers into the archive
pub async fn sweep_unarchived_accounts(
    engine: &LifecycleEngine,
    now: DateTime<Utc>,
    batch_size: i64,
) -> Result<ScanStats, StoreError> {
    let include_checking = engine.policy().archive_checking_accounts;
    let candidates = engine
        .primary()
        .unarchived_terminal_accounts(include_checking, batch_size)
        .await?;
    let mut stats = ScanStats {
        candidates: candidates.len(),
        ..ScanStats::default()
    };

    if stats.candidates > 0 {
        tracing::warn!(
            candidates = stats.candidates,
            "Found blocked or closed accounts outside the archive"
        );
    }

    for account in candidates {
        let result = engine.archive_unarchived(account.id, now).await;
        stats.record("archive_sweep", account.id, result);
    }

    tracing::info!(?stats, "Archive sweep completed");

    Ok(stats)
}
