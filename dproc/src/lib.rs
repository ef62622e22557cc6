// /////////////////////////////////////////////////////////////////////////////
// DProc RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # DProc
//!
//! The pipeline execution core of a report-generation framework: a
//! queue-backed job scheduler with priority and concurrency control, an
//! eight-stage executor (data fetch → prompt render → LLM call → template
//! render → output persist) with per-stage cooperative cancellation, and a
//! durable execution-record store whose state machine stays consistent
//! through worker crashes and redeliveries.
//!
//! ## Architecture
//!
//! Clean Architecture layering across the workspace:
//!
//! - **Domain** (`dproc-domain`): entities, value objects, the error
//!   taxonomy, and the ports
//! - **Application** ([`application`]): submitter, validator, staged
//!   executor, cancellation registry, use cases
//! - **Infrastructure** ([`infrastructure`]): SQLite/Postgres stores,
//!   Redis/in-process queues, LLM adapters, template engine, pipeline
//!   loader, processor registry, worker runtime
//! - **Presentation** ([`presentation`]): CLI handlers and the HTTP surface
//! - **Bootstrap** (`dproc-bootstrap`): argument parsing, logging, signals,
//!   shutdown, exit codes
//!
//! [`context::AppContext`] is the composition root: everything is
//! constructed once at startup and threaded by handle; there are no lazy
//! singletons.

pub mod application;
pub mod context;
pub mod infrastructure;
pub mod presentation;

pub use context::AppContext;
