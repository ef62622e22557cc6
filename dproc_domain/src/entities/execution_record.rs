// /////////////////////////////////////////////////////////////////////////////
// DProc RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Execution Record Entity
//!
//! The durable lifecycle entity of the core: one record per execution
//! attempt, created by the submitter in `queued` state and mutated only by
//! the staged executor (or by the submitter on pre-start cancellation).
//!
//! ## State Machine
//!
//! Status transitions form a DAG and nothing else is legal:
//!
//! ```text
//!              ┌──────────► cancelled
//!              │                ▲
//!  queued ─► processing ────────┤
//!                 │             │
//!                 ├─► completed │
//!                 └─► failed ───┘ (same level: terminal states)
//! ```
//!
//! - `queued → processing` when a worker claims the job
//! - `queued → cancelled` for pre-start cancellation
//! - `processing → completed | failed | cancelled` exactly once
//!
//! Terminal transitions stamp `completed_at` and derive `execution_time` from
//! `started_at`; the transition logic lives here so both store backends and
//! every test share one implementation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{self, Display};
use std::str::FromStr;

use crate::error::DprocError;
use crate::value_objects::{ExecutionId, JobId, JobPriority};

/// Lifecycle status of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    /// Checks whether `self → next` is an edge of the transition DAG.
    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        matches!(
            (*self, next),
            (Queued, Processing) | (Queued, Cancelled) | (Processing, Completed) | (Processing, Failed) | (Processing, Cancelled)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }

    /// Integer progress percentage reported by the status surface.
    pub fn progress_percent(&self) -> u8 {
        match self {
            ExecutionStatus::Queued => 0,
            ExecutionStatus::Processing => 50,
            ExecutionStatus::Completed => 100,
            ExecutionStatus::Failed | ExecutionStatus::Cancelled => 0,
        }
    }
}

impl Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStatus::Queued => "queued",
            ExecutionStatus::Processing => "processing",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for ExecutionStatus {
    type Err = DprocError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(ExecutionStatus::Queued),
            "processing" => Ok(ExecutionStatus::Processing),
            "completed" => Ok(ExecutionStatus::Completed),
            "failed" => Ok(ExecutionStatus::Failed),
            "cancelled" => Ok(ExecutionStatus::Cancelled),
            other => Err(DprocError::ValidationError {
                field: "status".to_string(),
                issue: format!("'{}' is not a known execution status", other),
            }),
        }
    }
}

/// Sparse update applied together with a status transition.
///
/// Every field is optional; the store applies only what is set. Timestamps
/// (`started_at`, `completed_at`, `execution_time_ms`) are normally derived
/// by [`ExecutionRecord::apply`] and only need to be provided when a caller
/// must override the derivation (tests, backfills).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusPatch {
    pub output_path: Option<String>,
    pub user_output_path: Option<String>,
    pub bundle_path: Option<String>,
    pub processor_metadata: Option<Value>,
    pub llm_metadata: Option<Value>,
    pub tokens_used: Option<i64>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub execution_time_ms: Option<i64>,
}

impl StatusPatch {
    pub fn with_error(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// The durable record of one execution attempt.
///
/// Primary key is `id`; `job_id` carries a unique index so redelivered jobs
/// can be matched back to their existing record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub id: ExecutionId,
    pub job_id: JobId,
    pub pipeline_name: String,
    pub user_id: Option<String>,
    /// Inputs after validator normalization, as a plain JSON object.
    pub inputs: Value,
    pub output_format: String,
    pub status: ExecutionStatus,
    pub priority: JobPriority,
    pub output_path: Option<String>,
    pub user_output_path: Option<String>,
    pub bundle_path: Option<String>,
    pub processor_metadata: Option<Value>,
    pub llm_metadata: Option<Value>,
    pub execution_time_ms: Option<i64>,
    pub tokens_used: Option<i64>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExecutionRecord {
    /// Creates a fresh record in `queued` state, as inserted by the
    /// submitter.
    #[allow(clippy::too_many_arguments)]
    pub fn new_queued(
        id: ExecutionId,
        job_id: JobId,
        pipeline_name: impl Into<String>,
        user_id: Option<String>,
        inputs: Value,
        output_format: impl Into<String>,
        priority: JobPriority,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            job_id,
            pipeline_name: pipeline_name.into(),
            user_id,
            inputs,
            output_format: output_format.into(),
            status: ExecutionStatus::Queued,
            priority,
            output_path: None,
            user_output_path: None,
            bundle_path: None,
            processor_metadata: None,
            llm_metadata: None,
            execution_time_ms: None,
            tokens_used: None,
            error: None,
            created_at,
            started_at: None,
            completed_at: None,
        }
    }

    /// Applies a status transition plus a sparse patch.
    ///
    /// Enforces the transition DAG and derives the timestamp fields:
    /// entering `processing` stamps `started_at`, entering a terminal state
    /// stamps `completed_at` and computes `execution_time_ms` from
    /// `started_at` when present. Fails with `IllegalTransition` for any
    /// edge not in the DAG.
    pub fn apply(
        &mut self,
        new_status: ExecutionStatus,
        patch: StatusPatch,
        now: DateTime<Utc>,
    ) -> Result<(), DprocError> {
        if !self.status.can_transition_to(new_status) {
            return Err(DprocError::IllegalTransition {
                id: self.id.to_string(),
                from: self.status.to_string(),
                to: new_status.to_string(),
            });
        }

        if let Some(path) = patch.output_path {
            self.output_path = Some(path);
        }
        if let Some(path) = patch.user_output_path {
            self.user_output_path = Some(path);
        }
        if let Some(path) = patch.bundle_path {
            self.bundle_path = Some(path);
        }
        if let Some(meta) = patch.processor_metadata {
            self.processor_metadata = Some(meta);
        }
        if let Some(meta) = patch.llm_metadata {
            self.llm_metadata = Some(meta);
        }
        if let Some(tokens) = patch.tokens_used {
            self.tokens_used = Some(tokens);
        }
        if let Some(error) = patch.error {
            self.error = Some(error);
        }

        match new_status {
            ExecutionStatus::Processing => {
                self.started_at = Some(patch.started_at.unwrap_or(now));
            }
            status if status.is_terminal() => {
                let completed_at = patch.completed_at.unwrap_or(now);
                self.completed_at = Some(completed_at);
                self.execution_time_ms = patch.execution_time_ms.or_else(|| {
                    self.started_at
                        .map(|started| (completed_at - started).num_milliseconds())
                });
            }
            _ => {}
        }

        self.status = new_status;
        Ok(())
    }

    /// Checks the record invariants from the data model. Used by tests and
    /// by the store's debug assertions.
    pub fn check_invariants(&self) -> Result<(), String> {
        match self.status {
            ExecutionStatus::Queued => {
                if self.started_at.is_some() || self.completed_at.is_some() {
                    return Err("queued record carries start/completion timestamps".into());
                }
            }
            ExecutionStatus::Processing => {
                if self.started_at.is_none() {
                    return Err("processing record has no started_at".into());
                }
                if self.completed_at.is_some() {
                    return Err("processing record has completed_at".into());
                }
            }
            status => {
                debug_assert!(status.is_terminal());
                if self.completed_at.is_none() {
                    return Err("terminal record has no completed_at".into());
                }
                if status == ExecutionStatus::Completed && self.output_path.is_none() {
                    return Err("completed record has no output_path".into());
                }
                if matches!(status, ExecutionStatus::Failed | ExecutionStatus::Cancelled)
                    && self.error.is_none()
                {
                    return Err("failed/cancelled record has no error".into());
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> ExecutionRecord {
        let job_id = JobId::from_string("web-1-abcdef");
        ExecutionRecord::new_queued(
            ExecutionId::for_job(&job_id, 2),
            job_id,
            "demo",
            None,
            json!({"topic": "AI"}),
            "html",
            JobPriority::Normal,
            Utc::now(),
        )
    }

    #[test]
    fn test_new_record_is_queued_and_valid() {
        let rec = record();
        assert_eq!(rec.status, ExecutionStatus::Queued);
        assert!(rec.check_invariants().is_ok());
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut rec = record();
        let t0 = Utc::now();
        rec.apply(ExecutionStatus::Processing, StatusPatch::default(), t0)
            .unwrap();
        assert_eq!(rec.started_at, Some(t0));
        assert!(rec.check_invariants().is_ok());

        let t1 = t0 + chrono::Duration::milliseconds(1500);
        rec.apply(
            ExecutionStatus::Completed,
            StatusPatch {
                output_path: Some("outputs/reports/x.html".into()),
                ..Default::default()
            },
            t1,
        )
        .unwrap();
        assert_eq!(rec.completed_at, Some(t1));
        assert_eq!(rec.execution_time_ms, Some(1500));
        assert!(rec.check_invariants().is_ok());
    }

    #[test]
    fn test_pre_start_cancellation() {
        let mut rec = record();
        rec.apply(
            ExecutionStatus::Cancelled,
            StatusPatch::with_error("Job cancelled by user"),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(rec.status, ExecutionStatus::Cancelled);
        // No started_at, so no derived execution time.
        assert_eq!(rec.execution_time_ms, None);
        assert!(rec.check_invariants().is_ok());
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        let mut rec = record();
        // queued -> completed skips processing
        let err = rec
            .apply(ExecutionStatus::Completed, StatusPatch::default(), Utc::now())
            .unwrap_err();
        assert_eq!(err.code(), "ILLEGAL_TRANSITION");

        rec.apply(ExecutionStatus::Processing, StatusPatch::default(), Utc::now())
            .unwrap();
        rec.apply(
            ExecutionStatus::Failed,
            StatusPatch::with_error("boom"),
            Utc::now(),
        )
        .unwrap();

        // Terminal states are final.
        let err = rec
            .apply(ExecutionStatus::Processing, StatusPatch::default(), Utc::now())
            .unwrap_err();
        assert_eq!(err.code(), "ILLEGAL_TRANSITION");
        let err = rec
            .apply(
                ExecutionStatus::Cancelled,
                StatusPatch::with_error("late cancel"),
                Utc::now(),
            )
            .unwrap_err();
        assert_eq!(err.code(), "ILLEGAL_TRANSITION");
    }

    #[test]
    fn test_progress_mapping() {
        assert_eq!(ExecutionStatus::Queued.progress_percent(), 0);
        assert_eq!(ExecutionStatus::Processing.progress_percent(), 50);
        assert_eq!(ExecutionStatus::Completed.progress_percent(), 100);
        assert_eq!(ExecutionStatus::Failed.progress_percent(), 0);
        assert_eq!(ExecutionStatus::Cancelled.progress_percent(), 0);
    }
}
