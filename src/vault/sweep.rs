// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Re-encryption sweep results and background handles.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::task::{JoinError, JoinHandle};

use crate::error::CustodyError;

use super::entry::SweepCheckpoint;

/// Outcome of one `run_sweep` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub from_key_id: String,
    pub to_key_id: String,
    /// Entries moved to the new key, across every run of this sweep.
    pub reencrypted: u64,
    /// Entries another writer moved first.
    pub skipped: u64,
    pub passes: u32,
    /// True once no entry references the old key and it has been retired.
    pub completed: bool,
    /// True if the run stopped at a cancellation request.
    pub cancelled: bool,
}

impl SweepReport {
    pub(crate) fn from_checkpoint(checkpoint: &SweepCheckpoint, cancelled: bool) -> Self {
        Self {
            from_key_id: checkpoint.from_key_id.clone(),
            to_key_id: checkpoint.to_key_id.clone(),
            reencrypted: checkpoint.reencrypted,
            skipped: checkpoint.skipped,
            passes: checkpoint.passes,
            completed: checkpoint.completed,
            cancelled,
        }
    }
}

/// A sweep running on a tokio task.
pub struct SweepHandle {
    from_key_id: String,
    cancel: Arc<AtomicBool>,
    task: JoinHandle<Result<SweepReport, CustodyError>>,
}

impl SweepHandle {
    pub(crate) fn new(
        from_key_id: String,
        cancel: Arc<AtomicBool>,
        task: JoinHandle<Result<SweepReport, CustodyError>>,
    ) -> Self {
        Self {
            from_key_id,
            cancel,
            task,
        }
    }

    /// Key being swept away from.
    pub fn from_key_id(&self) -> &str {
        &self.from_key_id
    }

    /// Asks the sweep to stop after the current batch. Progress is kept.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the sweep task. The outer error is a panicked or aborted task.
    pub async fn join(self) -> Result<Result<SweepReport, CustodyError>, JoinError> {
        self.task.await
    }
}
