// Copyright (c) 2026 Kexplorer Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Parsers for the three textual dump formats.
//!
//! Each format lives behind [`DumpParser`]. The orchestrator and the code builder
//! only ever see `CodeContent`, so a new dump format plugs in here without
//! touching either of them.

pub mod bytecode;
pub mod dex;
pub mod oat;

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::lines::LineCursor;
use crate::model::{Class, CodeContent};

pub use bytecode::ByteCodeParser;
pub use dex::DexDumpParser;
pub use oat::OatDumpParser;

/// Runtime and tooling namespaces that never reach the model.
static BUILT_IN_CLASS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(kotlin|kotlinx|java|javax|org\.(intellij|jetbrains))\..+").unwrap());

pub fn is_built_in_class(name: &str) -> bool {
    BUILT_IN_CLASS.is_match(name)
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("line {line_no}: expected {expected} but got '{found}'")]
    UnexpectedLine {
        line_no: usize,
        expected: &'static str,
        found: String,
    },
    #[error("unexpected end of dump, expected {expected}")]
    UnexpectedEnd { expected: &'static str },
    #[error("line {line_no}: invalid number '{value}'")]
    InvalidNumber { line_no: usize, value: String },
    #[error("unknown instruction set: {0}")]
    UnknownInstructionSet(String),
}

impl ParseError {
    pub fn unexpected(cursor: &LineCursor, expected: &'static str, found: &str) -> Self {
        ParseError::UnexpectedLine {
            line_no: cursor.line_no(),
            expected,
            found: found.to_string(),
        }
    }
}

pub trait DumpParser {
    /// Short name of the dump format, used in diagnostics.
    fn format_name(&self) -> &'static str;

    fn parse_classes(&self, text: &str) -> Result<Vec<Class>, ParseError>;

    fn parse(&self, text: &str) -> CodeContent {
        match self.parse_classes(text) {
            Ok(classes) => CodeContent::Success(classes),
            Err(e) => {
                log::warn!("Failed to parse {} dump: {}", self.format_name(), e);
                CodeContent::Error(format!("Failed to parse {} dump: {}", self.format_name(), e))
            }
        }
    }
}

pub(crate) fn parse_dec(cursor: &LineCursor, value: &str) -> Result<u32, ParseError> {
    value.parse::<u32>().map_err(|_| ParseError::InvalidNumber {
        line_no: cursor.line_no(),
        value: value.to_string(),
    })
}

pub(crate) fn parse_hex(cursor: &LineCursor, value: &str) -> Result<u32, ParseError> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    u32::from_str_radix(digits, 16).map_err(|_| ParseError::InvalidNumber {
        line_no: cursor.line_no(),
        value: value.to_string(),
    })
}
