// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error types.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::string::ToString;
use alloc::vec::Vec;

use thiserror::Error;

use crate::path::FieldPath;
use crate::step::StepId;

/// A derived-field graph that cannot be compiled.
///
/// Returned before any step runs; the host state is never touched.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The step graph contains a cycle.
    #[error("cycle detected between derived fields: {}", .fields.join(", "))]
    Cycle {
        /// Output paths of the steps that could not be ordered, sorted.
        fields: Vec<String>,
    },
    /// More than one step writes the same field.
    #[error("field `{field}` has multiple writers: {steps:?}")]
    MultipleWriters {
        /// The contested output path.
        field: String,
        /// The steps writing it, in declaration order.
        steps: Vec<StepId>,
    },
    /// A declared output or dependency path could not be parsed.
    #[error("invalid field path `{path}`")]
    InvalidPath {
        /// The path as written.
        path: String,
    },
}

impl ConfigError {
    /// Returns a stable machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Cycle { .. } => "CYCLE_DETECTED",
            Self::MultipleWriters { .. } => "MULTIPLE_WRITERS",
            Self::InvalidPath { .. } => "INVALID_PATH",
        }
    }
}

/// Failure raised by a step writer while deriving a value.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{name}: {message}")]
pub struct StepError {
    /// Short error class name, such as `TypeError`.
    pub name: Box<str>,
    /// Human-readable message.
    pub message: String,
}

impl StepError {
    /// Creates a generic `Error` with `message`.
    pub fn new(message: impl Into<String>) -> Self {
        Self::named("Error", message)
    }

    /// Creates an error with an explicit class name.
    pub fn named(name: impl Into<Box<str>>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// A draft write that could not be applied.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DraftError {
    /// A segment of the path runs through a value that is not an object.
    #[error("cannot write `{path}`: segment {depth} is not an object")]
    NotAnObject {
        /// The path being written.
        path: FieldPath,
        /// Index of the offending segment.
        depth: usize,
    },
    /// The path has no segments.
    #[error("cannot write an empty path")]
    EmptyPath,
}

impl From<DraftError> for StepError {
    fn from(err: DraftError) -> Self {
        Self::named("DraftError", err.to_string())
    }
}
