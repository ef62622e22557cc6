// /////////////////////////////////////////////////////////////////////////////
// DProc RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Job Priority Value Object
//!
//! Submitter-facing priority classes and their mapping onto the queue's
//! numeric rank. Lower rank is delivered first; the mapping is
//! `high → 1, normal → 5, low → 10` and is applied consistently by every
//! queue backend.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::str::FromStr;

use crate::error::DprocError;

/// Priority class attached to a job at submission time.
///
/// Within one class the queue is FIFO by enqueue time (best effort); across
/// classes a lower `queue_rank()` always wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    Low,
    #[default]
    Normal,
    High,
}

impl JobPriority {
    /// Numeric rank used for queue ordering. Lower runs first.
    pub fn queue_rank(&self) -> u8 {
        match self {
            JobPriority::High => 1,
            JobPriority::Normal => 5,
            JobPriority::Low => 10,
        }
    }

    /// Inverse of `queue_rank`, for envelopes read back from a broker.
    pub fn from_queue_rank(rank: u8) -> Self {
        match rank {
            0..=1 => JobPriority::High,
            2..=5 => JobPriority::Normal,
            _ => JobPriority::Low,
        }
    }
}

impl Display for JobPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobPriority::Low => write!(f, "low"),
            JobPriority::Normal => write!(f, "normal"),
            JobPriority::High => write!(f, "high"),
        }
    }
}

impl FromStr for JobPriority {
    type Err = DprocError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(JobPriority::Low),
            "normal" => Ok(JobPriority::Normal),
            "high" => Ok(JobPriority::High),
            other => Err(DprocError::ValidationError {
                field: "priority".to_string(),
                issue: format!("'{}' is not one of low, normal, high", other),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_ordering() {
        assert!(JobPriority::High.queue_rank() < JobPriority::Normal.queue_rank());
        assert!(JobPriority::Normal.queue_rank() < JobPriority::Low.queue_rank());
    }

    #[test]
    fn test_rank_round_trip() {
        for p in [JobPriority::Low, JobPriority::Normal, JobPriority::High] {
            assert_eq!(JobPriority::from_queue_rank(p.queue_rank()), p);
        }
    }

    #[test]
    fn test_parse() {
        assert_eq!("HIGH".parse::<JobPriority>().unwrap(), JobPriority::High);
        assert!("urgent".parse::<JobPriority>().is_err());
    }
}
