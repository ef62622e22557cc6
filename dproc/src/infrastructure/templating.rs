// /////////////////////////////////////////////////////////////////////////////
// DProc RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Template Engine Adapter
//!
//! MiniJinja behind the domain's [`TemplateRenderer`] port. Prompts
//! (`prompts/*.md`) render as inline sources; output templates come from the
//! pipeline's `templates/` directory.
//!
//! ## Template lookup order
//!
//! For a requested format `fmt`, the first existing file wins:
//!
//! 1. `report.{fmt}.j2`
//! 2. `{fmt}.j2`
//! 3. `template.{fmt}.j2`
//!
//! The `mdx` template is the canonical artifact and must exist; templates
//! for other formats are optional.

use std::path::{Path, PathBuf};

use minijinja::Environment;
use serde_json::Value;

use dproc_domain::{DprocError, TemplateRenderer};

/// MiniJinja-backed renderer.
#[derive(Default)]
pub struct MiniJinjaRenderer;

impl MiniJinjaRenderer {
    pub fn new() -> Self {
        Self
    }

    fn environment() -> Environment<'static> {
        Environment::new()
    }
}

impl TemplateRenderer for MiniJinjaRenderer {
    fn render_str(&self, name: &str, source: &str, context: &Value) -> Result<String, DprocError> {
        let env = Self::environment();
        env.render_str(source, context)
            .map_err(|e| DprocError::TemplateRenderError {
                template: name.to_string(),
                detail: e.to_string(),
            })
    }

    fn render_file(&self, path: &Path, context: &Value) -> Result<String, DprocError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let source = std::fs::read_to_string(path).map_err(|e| DprocError::TemplateRenderError {
            template: name.clone(),
            detail: format!("cannot read template: {}", e),
        })?;
        self.render_str(&name, &source, context)
    }
}

/// Resolves the template file for a format, following the lookup order.
pub fn resolve_template(templates_dir: &Path, format: &str) -> Option<PathBuf> {
    let candidates = [
        format!("report.{}.j2", format),
        format!("{}.j2", format),
        format!("template.{}.j2", format),
    ];
    candidates
        .iter()
        .map(|candidate| templates_dir.join(candidate))
        .find(|path| path.is_file())
}
