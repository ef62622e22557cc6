// /////////////////////////////////////////////////////////////////////////////
// DProc RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Repository ports: persistence abstractions implemented by infrastructure.

mod execution_repository;

pub use execution_repository::{ExecutionFilter, ExecutionRepository, DEFAULT_LIST_LIMIT};
