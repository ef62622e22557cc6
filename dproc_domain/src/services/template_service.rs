// /////////////////////////////////////////////////////////////////////////////
// DProc RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Template Rendering Port
//!
//! Prompt and output rendering as pure `(template, context) → string`
//! functions that may fail. Rendering is CPU-bound, so the port is sync;
//! the executor calls it between its suspension points.

use serde_json::Value;
use std::path::Path;

use crate::error::DprocError;

/// Port implemented by the template engine adapter.
pub trait TemplateRenderer: Send + Sync {
    /// Renders an inline source (prompt files) against a context. `name` is
    /// used in error reporting only.
    fn render_str(&self, name: &str, source: &str, context: &Value) -> Result<String, DprocError>;

    /// Renders a template file from a pipeline's `templates/` directory.
    fn render_file(&self, path: &Path, context: &Value) -> Result<String, DprocError>;
}
