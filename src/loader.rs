// src/loader.rs

use crate::error::RecordError;
use crate::fixtures::FixtureEntry;
use crate::questions::{QuestionKey, UpsertOutcome};
use anyhow::Context;
use sqlx::{Connection, SqlitePool};
use std::collections::HashSet;
use tracing::{debug, info, warn};

pub const DEFAULT_BATCH_SIZE: usize = 25;

#[derive(Debug)]
pub struct RecordFailure {
    /// Position of the entry in the input handed to the loader.
    pub index: usize,
    pub key: Option<String>,
    pub error: RecordError,
}

#[derive(Debug, Default)]
pub struct LoadReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub created: usize,
    pub updated: usize,
    pub failures: Vec<RecordFailure>,
    /// Keys that replaced a row already in the store.
    pub overwritten_keys: Vec<QuestionKey>,
}

impl LoadReport {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub fn summary_line(&self) -> String {
        format!(
            "Successfully imported {} of {} MCQs ({} created, {} updated, {} failed)",
            self.succeeded,
            self.attempted,
            self.created,
            self.updated,
            self.failed()
        )
    }

    /// Folds a later report into this one. `offset` is where `other`'s
    /// entries start in the combined input.
    pub fn merge(&mut self, other: LoadReport, offset: usize) {
        self.attempted += other.attempted;
        self.succeeded += other.succeeded;
        self.created += other.created;
        self.updated += other.updated;
        self.failures
            .extend(other.failures.into_iter().map(|mut failure| {
                failure.index += offset;
                failure
            }));
        self.overwritten_keys.extend(other.overwritten_keys);
    }

    fn record_failure(&mut self, index: usize, key: Option<String>, error: RecordError) {
        warn!(
            index,
            key = key.as_deref().unwrap_or("<none>"),
            "Error importing MCQ: {}",
            error
        );
        self.failures.push(RecordFailure { index, key, error });
    }
}

/// Upserts every entry of one batch inside a single transaction.
///
/// Entries are processed in order. Each upsert runs in its own savepoint, so
/// an entry the store rejects is rolled back on its own and the rest of the
/// batch carries on. Entries that fail to decode are never written.
///
/// # Errors
/// Returns an error, with nothing from this batch committed, if the
/// transaction cannot be opened or committed, a savepoint cannot be
/// managed, or a write fails for a reason other than the record itself
/// (a locked database, lost I/O, a closed pool).
pub async fn load_batch(pool: &SqlitePool, entries: &[FixtureEntry]) -> anyhow::Result<LoadReport> {
    let mut report = LoadReport {
        attempted: entries.len(),
        ..LoadReport::default()
    };

    // Step 1: Open the transaction covering the whole batch.
    let mut tx = pool
        .begin()
        .await
        .context("Failed to open a transaction for the batch.")?;

    let mut seen: HashSet<QuestionKey> = HashSet::new();

    // Step 2: Upsert entries one at a time.
    for (index, entry) in entries.iter().enumerate() {
        let question = match entry.to_question() {
            Ok(question) => question,
            Err(e) => {
                report.record_failure(index, entry.raw_key(), e);
                continue;
            }
        };

        if !seen.insert(question.key.clone()) {
            warn!(key = %question.key, index, "key appears more than once in batch; later entry wins");
        }

        let mut savepoint = tx
            .begin()
            .await
            .with_context(|| format!("Failed to open savepoint for MCQ {}", question.key))?;

        match question.upsert(&mut savepoint).await {
            Ok(outcome) => {
                savepoint
                    .commit()
                    .await
                    .with_context(|| format!("Failed to release savepoint for MCQ {}", question.key))?;
                debug!(key = %question.key, ?outcome, "upserted MCQ");
                report.succeeded += 1;
                match outcome {
                    UpsertOutcome::Created => report.created += 1,
                    UpsertOutcome::Updated => {
                        report.updated += 1;
                        report.overwritten_keys.push(question.key.clone());
                    }
                }
            }
            Err(e) => {
                // Anything that is not about this row aborts the batch;
                // dropping the transaction rolls it back.
                let rejected = RecordError::from_storage(e)
                    .with_context(|| format!("Storage failed while writing MCQ {}", question.key))?;
                savepoint
                    .rollback()
                    .await
                    .with_context(|| format!("Failed to roll back savepoint for MCQ {}", question.key))?;
                report.record_failure(index, Some(question.key.to_string()), rejected);
            }
        }
    }

    // Step 3: Commit. If this fails nothing from the batch is kept.
    tx.commit()
        .await
        .context("Failed to commit the batch transaction.")?;

    info!("{}", report.summary_line());
    Ok(report)
}

/// Loads `entries` as consecutive batches of `batch_size`, one transaction each.
///
/// A batch-level error stops the run; batches committed before it stay
/// committed.
pub async fn load_in_batches(
    pool: &SqlitePool,
    entries: &[FixtureEntry],
    batch_size: usize,
) -> anyhow::Result<LoadReport> {
    anyhow::ensure!(batch_size > 0, "Batch size must be at least 1.");

    let total_batches = entries.len().div_ceil(batch_size);
    let mut report = LoadReport::default();

    for (batch_num, chunk) in entries.chunks(batch_size).enumerate() {
        info!(
            "Importing batch {}/{} ({} MCQs)",
            batch_num + 1,
            total_batches,
            chunk.len()
        );
        let batch_report = load_batch(pool, chunk)
            .await
            .with_context(|| format!("Batch {} of {} failed", batch_num + 1, total_batches))?;
        report.merge(batch_report, batch_num * batch_size);
    }

    Ok(report)
}
