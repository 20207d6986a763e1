//! Moves an account's authoritative copy between the primary and archive stores.
//!
//! The primary transaction is the anchor of both directions: the primary
//! mutation is staged first, the archive write happens second and the primary
//! commit comes last. A failed archive write rolls the primary back. A failed
//! commit is compensated on the archive side, and a failed compensation is
//! reported as `InconsistentState`.

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::models::ArchivedAccount;
use crate::services::lifecycle::LifecycleError;
use crate::services::store::{ArchiveStore, PrimaryTx, StoreError};

/// Writes `snapshot` to the archive store, then commits the staged primary mutation
pub async fn transfer_to_archive(
    tx: Box<dyn PrimaryTx>,
    archive: &dyn ArchiveStore,
    snapshot: &ArchivedAccount,
) -> Result<(), LifecycleError> {
    let existing = match archive.find_conflicting(snapshot.id, &snapshot.numero).await {
        Ok(existing) => existing,
        Err(e) => return Err(abort(tx, snapshot.id, e).await),
    };

    if let Some(existing) = existing {
        let conflict = LifecycleError::Conflict(format!(
            "Account {} already has an archive record",
            existing.numero
        ));
        return Err(abort_with(tx, snapshot.id, conflict).await);
    }

    if let Err(e) = archive.insert(snapshot).await {
        return Err(abort(tx, snapshot.id, e).await);
    }

    if let Err(commit_error) = tx.commit().await {
        warn!(
            account_id = %snapshot.id,
            error = %commit_error,
            "Primary commit failed after archive write, removing archive record"
        );

        return Err(match archive.delete(snapshot.id).await {
            Ok(_) => LifecycleError::TransferFailure(format!(
                "primary commit failed: {}",
                commit_error
            )),
            Err(compensation_error) => inconsistent(
                snapshot.id,
                format!(
                    "primary commit failed ({}) and archive record could not be removed ({})",
                    commit_error, compensation_error
                ),
            ),
        });
    }

    info!(
        account_id = %snapshot.id,
        numero = %snapshot.numero,
        reason = %snapshot.archive_reason,
        "Account transferred to archive"
    );

    Ok(())
}

/// Removes `record` from the archive store, then commits the staged primary restore
pub async fn transfer_from_archive(
    tx: Box<dyn PrimaryTx>,
    archive: &dyn ArchiveStore,
    record: &ArchivedAccount,
) -> Result<(), LifecycleError> {
    match archive.delete(record.id).await {
        Ok(true) => {}
        Ok(false) => {
            let conflict = LifecycleError::Conflict(format!(
                "Archive record for account {} was already released",
                record.numero
            ));
            return Err(abort_with(tx, record.id, conflict).await);
        }
        Err(e) => return Err(abort(tx, record.id, e).await),
    }

    if let Err(commit_error) = tx.commit().await {
        warn!(
            account_id = %record.id,
            error = %commit_error,
            "Primary commit failed after archive removal, re-inserting archive record"
        );

        return Err(match archive.insert(record).await {
            Ok(()) => LifecycleError::TransferFailure(format!(
                "primary commit failed: {}",
                commit_error
            )),
            Err(compensation_error) => inconsistent(
                record.id,
                format!(
                    "primary commit failed ({}) and archive record could not be restored ({})",
                    commit_error, compensation_error
                ),
            ),
        });
    }

    info!(
        account_id = %record.id,
        numero = %record.numero,
        "Account restored from archive"
    );

    Ok(())
}

/// Rolls back after an archive-side failure
async fn abort(tx: Box<dyn PrimaryTx>, account_id: Uuid, cause: StoreError) -> LifecycleError {
    let failure = match cause {
        StoreError::Duplicate(what) => {
            LifecycleError::Conflict(format!("Archive already holds this {}", what))
        }
        other => LifecycleError::TransferFailure(other.to_string()),
    };

    abort_with(tx, account_id, failure).await
}

async fn abort_with(
    tx: Box<dyn PrimaryTx>,
    account_id: Uuid,
    failure: LifecycleError,
) -> LifecycleError {
    match tx.rollback().await {
        Ok(()) => {
            warn!(account_id = %account_id, error = %failure, "Archive transfer aborted");
            failure
        }
        Err(rollback_error) => inconsistent(
            account_id,
            format!(
                "{} and primary rollback failed ({})",
                failure, rollback_error
            ),
        ),
    }
}

fn inconsistent(account_id: Uuid, detail: String) -> LifecycleError {
    error!(
        account_id = %account_id,
        detail = %detail,
        "Primary and archive stores disagree, manual reconciliation required"
    );
    LifecycleError::InconsistentState { account_id, detail }
}
