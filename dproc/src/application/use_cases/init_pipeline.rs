// /////////////////////////////////////////////////////////////////////////////
// DProc RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Init Pipeline Use Case
//!
//! Scaffolds a runnable pipeline directory: spec, config, the `echo`
//! processor, a main prompt, and mdx/html templates. The result validates
//! cleanly and can be executed as-is once an API key is configured.

use std::path::PathBuf;

use dproc_domain::DprocError;

use crate::infrastructure::config::Settings;

const SPEC_TEMPLATE: &str = r#"pipeline:
  name: {name}
  version: "0.1"
  description: Describe what this pipeline reports on.
inputs:
  - name: topic
    type: text
    label: Topic
    required: true
    placeholder: What should the report cover?
outputs: [mdx, html]
variables:
  tone: concise
"#;

const CONFIG_TEMPLATE: &str = r#"llm:
  provider: anthropic
  model: claude-sonnet-4-5
  temperature: 0.7
  maxTokens: 4096
execution:
  queuePriority: normal
  timeoutMinutes: 30
  retryAttempts: 3
"#;

const MAIN_PROMPT: &str = r#"Write a structured report about {{ inputs.topic }}.

Use the collected data:
{{ data | tojson }}

Respond with prose followed by a JSON object:
{"summary": "...", "keyPoints": ["..."]}
"#;

const MDX_TEMPLATE: &str = r#"# {{ inputs.topic }}

Generated by {{ metadata.pipelineName }} at {{ metadata.timestamp }}.

{{ llm.text }}
"#;

const HTML_TEMPLATE: &str = r#"<!doctype html>
<html>
  <head><title>{{ inputs.topic }}</title></head>
  <body>
    <h1>{{ inputs.topic }}</h1>
    <pre>{{ llm.text }}</pre>
  </body>
</html>
"#;

/// Creates the pipeline directory tree. Fails if it already exists.
pub fn init_pipeline(settings: &Settings, name: &str) -> Result<PathBuf, DprocError> {
    let root = settings.pipeline_dir(name);
    if root.exists() {
        return Err(DprocError::ValidationError {
            field: "name".to_string(),
            issue: format!("pipeline '{}' already exists at {}", name, root.display()),
        });
    }

    let write = |path: PathBuf, body: &str| -> Result<(), DprocError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| DprocError::storage(format!("cannot create {}: {}", parent.display(), e)))?;
        }
        std::fs::write(&path, body)
            .map_err(|e| DprocError::storage(format!("cannot write {}: {}", path.display(), e)))
    };

    write(root.join("spec.yml"), &SPEC_TEMPLATE.replace("{name}", name))?;
    write(root.join("config.yml"), CONFIG_TEMPLATE)?;
    write(root.join("processor"), "echo\n")?;
    write(root.join("prompts").join("main.md"), MAIN_PROMPT)?;
    write(root.join("templates").join("report.mdx.j2"), MDX_TEMPLATE)?;
    write(root.join("templates").join("report.html.j2"), HTML_TEMPLATE)?;
    std::fs::create_dir_all(root.join("data"))
        .map_err(|e| DprocError::storage(format!("cannot create data dir: {}", e)))?;

    Ok(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::loader::PipelineLoader;
    use crate::infrastructure::processors::ProcessorRegistry;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_scaffold_validates_cleanly() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::for_workspace(dir.path());
        init_pipeline(&settings, "fresh").unwrap();

        let loader = PipelineLoader::new(
            settings.pipelines_dir(),
            Arc::new(ProcessorRegistry::with_builtins()),
        );
        let validation = loader.validate_pipeline("fresh");
        assert!(validation.valid, "errors: {:?}", validation.errors);

        let spec = loader.load_spec("fresh").unwrap();
        assert_eq!(spec.pipeline.name, "fresh");
    }

    #[test]
    fn test_refuses_existing() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::for_workspace(dir.path());
        init_pipeline(&settings, "dup").unwrap();
        assert!(init_pipeline(&settings, "dup").is_err());
    }
}
