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

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::code::CodeStyle;
use crate::error::ConfigError;

/// One of the three disassembly views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ts_rs::TS, clap::ValueEnum)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub enum View {
    ByteCode,
    Dex,
    Oat,
}

impl View {
    pub const ALL: [View; 3] = [View::ByteCode, View::Dex, View::Oat];

    pub fn title(self) -> &'static str {
        match self {
            View::ByteCode => "Byte Code",
            View::Dex => "DEX",
            View::Oat => "OAT",
        }
    }
}

/// Which views are visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Views {
    pub byte_code: bool,
    pub dex: bool,
    pub oat: bool,
}

impl Default for Views {
    fn default() -> Self {
        Self {
            byte_code: false,
            dex: true,
            oat: true,
        }
    }
}

impl Views {
    pub fn only(views: &[View]) -> Self {
        Self {
            byte_code: views.contains(&View::ByteCode),
            dex: views.contains(&View::Dex),
            oat: views.contains(&View::Oat),
        }
    }

    pub fn is_enabled(&self, view: View) -> bool {
        match view {
            View::ByteCode => self.byte_code,
            View::Dex => self.dex,
            View::Oat => self.oat,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PipelineConfig {
    /// R8 with dead-code elimination and access widening instead of plain D8.
    pub optimize: bool,
    /// Keep every non-library method instead of only `@Keep` ones.
    pub keep_everything: bool,
    pub min_api_level: u32,
    /// Extra kotlinc flags, split on whitespace.
    pub compiler_flags: String,
    /// Extra R8 rules appended to the generated ones.
    pub r8_rules: String,
    /// Drop the null-check intrinsics kotlinc adds for Java callers.
    pub kotlin_only_consumers: bool,
    pub views: Views,
    /// Compute views even when they are not visible.
    pub decompile_hidden_isa: bool,
    pub style: CodeStyle,
    pub android_home: Option<PathBuf>,
    pub kotlin_home: Option<PathBuf>,
    /// Where sources and build artifacts go. A temporary directory when unset.
    pub scratch_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            optimize: true,
            keep_everything: true,
            min_api_level: 21,
            compiler_flags: String::new(),
            r8_rules: String::new(),
            kotlin_only_consumers: true,
            views: Views::default(),
            decompile_hidden_isa: true,
            style: CodeStyle::default(),
            android_home: None,
            kotlin_home: None,
            scratch_dir: None,
        }
    }
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// A view is computed when it is visible, or when hidden views are computed anyway.
    pub fn computes(&self, view: View) -> bool {
        self.decompile_hidden_isa || self.views.is_enabled(view)
    }

    pub fn computed_views(&self) -> Vec<View> {
        View::ALL.into_iter().filter(|view| self.computes(*view)).collect()
    }
}
