// /////////////////////////////////////////////////////////////////////////////
// DProc RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Aggregated Pipeline Statistics
//!
//! One row per pipeline name, updated exactly once per terminal transition.
//! The running mean uses the Welford incremental form so the row never needs
//! to rescan history:
//!
//! ```text
//! avg' = avg + (x - avg) / (n + 1)    then    n = n + 1
//! ```
//!
//! Concurrent terminal transitions for the same pipeline must serialize
//! around this update; the store backends do that inside the transaction
//! that writes the status change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::execution_record::ExecutionStatus;

/// Aggregated execution statistics for one pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStats {
    pub pipeline_name: String,
    pub total_executions: i64,
    pub successful_executions: i64,
    pub failed_executions: i64,
    /// Running mean over `execution_time_ms` of all terminal executions
    /// that reported a duration.
    pub avg_execution_time_ms: f64,
    /// How many executions the mean is over. Kept separate from
    /// `total_executions` because pre-start cancellations have no duration.
    pub timed_executions: i64,
    pub total_tokens_used: i64,
    pub last_executed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl PipelineStats {
    pub fn new(pipeline_name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            pipeline_name: pipeline_name.into(),
            total_executions: 0,
            successful_executions: 0,
            failed_executions: 0,
            avg_execution_time_ms: 0.0,
            timed_executions: 0,
            total_tokens_used: 0,
            last_executed_at: None,
            updated_at: now,
        }
    }

    /// Folds one terminal execution into the aggregates.
    ///
    /// `status` must be terminal; cancelled executions count toward the
    /// total but toward neither success nor failure. Executions without a
    /// duration (pre-start cancellation) leave the mean untouched.
    pub fn record_terminal(
        &mut self,
        status: ExecutionStatus,
        execution_time_ms: Option<i64>,
        tokens_used: Option<i64>,
        now: DateTime<Utc>,
    ) {
        debug_assert!(status.is_terminal());

        if let Some(ms) = execution_time_ms {
            let x = ms as f64;
            let n = self.timed_executions as f64;
            self.avg_execution_time_ms += (x - self.avg_execution_time_ms) / (n + 1.0);
            self.timed_executions += 1;
        }
        self.total_executions += 1;

        match status {
            ExecutionStatus::Completed => self.successful_executions += 1,
            ExecutionStatus::Failed => self.failed_executions += 1,
            _ => {}
        }
        if let Some(tokens) = tokens_used {
            self.total_tokens_used += tokens;
        }
        self.last_executed_at = Some(now);
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_welford_matches_arithmetic_mean() {
        let now = Utc::now();
        let mut stats = PipelineStats::new("demo", now);
        let samples = [120_i64, 480, 300, 90, 1010];
        for (i, ms) in samples.iter().enumerate() {
            stats.record_terminal(ExecutionStatus::Completed, Some(*ms), Some(10), now);
            let expected: f64 =
                samples[..=i].iter().map(|v| *v as f64).sum::<f64>() / (i as f64 + 1.0);
            assert!((stats.avg_execution_time_ms - expected).abs() < 1e-9);
        }
        assert_eq!(stats.total_executions, 5);
        assert_eq!(stats.successful_executions, 5);
        assert_eq!(stats.total_tokens_used, 50);
    }

    #[test]
    fn test_untimed_terminal_does_not_skew_mean() {
        let now = Utc::now();
        let mut stats = PipelineStats::new("demo", now);
        stats.record_terminal(ExecutionStatus::Completed, Some(100), None, now);
        // Pre-start cancellation: no duration.
        stats.record_terminal(ExecutionStatus::Cancelled, None, None, now);
        assert_eq!(stats.total_executions, 2);
        assert_eq!(stats.successful_executions, 1);
        assert_eq!(stats.failed_executions, 0);
        assert!((stats.avg_execution_time_ms - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_failed_counts() {
        let now = Utc::now();
        let mut stats = PipelineStats::new("demo", now);
        stats.record_terminal(ExecutionStatus::Failed, Some(50), None, now);
        assert_eq!(stats.failed_executions, 1);
        assert_eq!(stats.successful_executions, 0);
    }
}
