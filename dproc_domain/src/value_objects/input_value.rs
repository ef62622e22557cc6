// /////////////////////////////////////////////////////////////////////////////
// DProc RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Typed Input Values
//!
//! The core accepts loose, untyped inputs at its boundary (JSON maps from the
//! HTTP surface, `--input` JSON from the CLI) and runs on strict typed
//! inputs internally. [`InputValue`] is the strict form: a tagged variant
//! produced exclusively by the validator during pre-execution normalization.
//! Downstream stages (processor, prompts, templates) consume the variant
//! directly and never re-inspect raw JSON.
//!
//! Serialization is untagged on purpose: an `InputValue` written into a
//! record, a bundle, or a template context looks exactly like the plain
//! value it wraps (`"AI"`, `50`, `true`), which keeps persisted inputs and
//! template contexts free of enum noise.

use std::path::PathBuf;

use serde::ser::{Serialize, SerializeSeq, Serializer};
use serde_json::Value;

/// A validated, typed pipeline input.
///
/// Produced only by the validator; see the normalization rules there for how
/// raw JSON is coerced into each variant.
#[derive(Debug, Clone, PartialEq)]
pub enum InputValue {
    Text(String),
    Number(f64),
    Bool(bool),
    /// A value constrained to one of the options declared by the input
    /// definition. Distinct from `Text` so downstream code can rely on
    /// membership having been checked.
    Select(String),
    FileRef(PathBuf),
    List(Vec<Value>),
}

impl InputValue {
    /// The type name used in error messages and validation reports.
    pub fn kind_name(&self) -> &'static str {
        match self {
            InputValue::Text(_) => "text",
            InputValue::Number(_) => "number",
            InputValue::Bool(_) => "boolean",
            InputValue::Select(_) => "select",
            InputValue::FileRef(_) => "file",
            InputValue::List(_) => "array",
        }
    }

    /// Converts to the plain JSON value this variant wraps.
    pub fn to_json(&self) -> Value {
        match self {
            InputValue::Text(s) | InputValue::Select(s) => Value::String(s.clone()),
            InputValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            InputValue::Bool(b) => Value::Bool(*b),
            InputValue::FileRef(p) => Value::String(p.display().to_string()),
            InputValue::List(items) => Value::Array(items.clone()),
        }
    }

    /// Checks whether the value is empty for the purposes of required-input
    /// validation (empty string, empty list).
    pub fn is_empty(&self) -> bool {
        match self {
            InputValue::Text(s) | InputValue::Select(s) => s.trim().is_empty(),
            InputValue::List(items) => items.is_empty(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            InputValue::Text(s) | InputValue::Select(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            InputValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            InputValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl Serialize for InputValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            InputValue::Text(s) | InputValue::Select(s) => serializer.serialize_str(s),
            InputValue::Number(n) => serializer.serialize_f64(*n),
            InputValue::Bool(b) => serializer.serialize_bool(*b),
            InputValue::FileRef(p) => serializer.serialize_str(&p.display().to_string()),
            InputValue::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
        }
    }
}
