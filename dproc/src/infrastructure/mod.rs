// /////////////////////////////////////////////////////////////////////////////
// DProc RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Infrastructure Layer
//!
//! Adapters implementing the domain ports: stores (SQLite/Postgres),
//! queues (Redis/in-process), LLM providers, template rendering, the
//! pipeline loader, the processor registry, process configuration, and the
//! worker runtime.

pub mod config;
pub mod llm;
pub mod loader;
pub mod processors;
pub mod queue;
pub mod repositories;
pub mod runtime;
pub mod templating;
