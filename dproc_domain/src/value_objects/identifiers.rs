// /////////////////////////////////////////////////////////////////////////////
// DProc RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Job and Execution Identifiers
//!
//! Type-safe identifier value objects for the two lifecycle entities of the
//! core: the *job* (a request to run a pipeline) and the *execution* (one
//! durable attempt to process that job).
//!
//! ## Overview
//!
//! - **Type Safety**: `JobId` and `ExecutionId` cannot be confused with each
//!   other or with plain strings in function signatures
//! - **Temporal Ordering**: Both embed an epoch-millisecond component, so
//!   lexical comparison within one source roughly follows creation order
//! - **Traceability**: An `ExecutionId` embeds the `JobId` it was created
//!   for, which makes log lines and file names self-describing
//!
//! ## Format
//!
//! ```text
//! job:        {source}-{epoch_ms}-{6 alphanumeric}     e.g. web-1722470400123-k3v9qx
//! execution:  exec-{epoch_ms}-{job_id}                 e.g. exec-1722470400150-web-1722470400123-k3v9qx
//! ```
//!
//! The submitter is the only producer of fresh identifiers; everything else
//! passes them around by value.

use std::fmt::{self, Display};

use rand::Rng;
use serde::{Deserialize, Serialize};

const SUFFIX_LEN: usize = 6;
const SUFFIX_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

fn random_suffix() -> String {
    let mut rng = rand::rng();
    (0..SUFFIX_LEN)
        .map(|_| {
            let idx = rng.random_range(0..SUFFIX_ALPHABET.len());
            SUFFIX_ALPHABET[idx] as char
        })
        .collect()
}

/// Globally unique identifier for a job, generated by the submitter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Generates a fresh job id tagged with the submitting surface
    /// (`web`, `cli`, ...).
    pub fn generate(source: &str, now_ms: i64) -> Self {
        Self(format!("{}-{}-{}", source, now_ms, random_suffix()))
    }

    /// Wraps an existing identifier, e.g. one read back from the store.
    pub fn from_string(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of one durable execution attempt for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(String);

impl ExecutionId {
    /// Derives the execution id for a job. The embedded job id keeps
    /// bundle and report file names traceable back to the request.
    pub fn for_job(job_id: &JobId, now_ms: i64) -> Self {
        Self(format!("exec-{}-{}", now_ms, job_id))
    }

    /// Wraps an existing identifier, e.g. one read back from the store.
    pub fn from_string(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id_format() {
        let id = JobId::generate("web", 1722470400123);
        let text = id.to_string();
        assert!(text.starts_with("web-1722470400123-"));
        assert_eq!(text.len(), "web-1722470400123-".len() + SUFFIX_LEN);
    }

    #[test]
    fn test_job_ids_are_unique() {
        let a = JobId::generate("cli", 1);
        let b = JobId::generate("cli", 1);
        assert_ne!(a, b);
    }

    #[test]
    fn test_execution_id_embeds_job_id() {
        let job = JobId::from_string("web-1-abcdef");
        let exec = ExecutionId::for_job(&job, 2);
        assert_eq!(exec.as_str(), "exec-2-web-1-abcdef");
    }

    #[test]
    fn test_serde_is_transparent() {
        let job = JobId::from_string("web-1-abcdef");
        let json = serde_json::to_string(&job).unwrap();
        assert_eq!(json, "\"web-1-abcdef\"");
        let back: JobId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, job);
    }
}
