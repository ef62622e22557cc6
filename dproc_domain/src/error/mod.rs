// /////////////////////////////////////////////////////////////////////////////
// DProc RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Error taxonomy for the dproc execution core.

mod dproc_error;

pub use dproc_error::{DprocError, ErrorSeverity, ErrorTransport, FieldIssue};
