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

/// Wire form of pipeline events for a frontend driving `kexplorer --json`.
///
/// Content is sent already rendered: the text plus the jump table and both line
/// maps as `(key, value)` pairs, so the frontend never sees the parse tree.
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::code::{Code, CodeStyle, LineMap};
use crate::config::View;
use crate::model::CodeContent;
use crate::pipeline::PipelineEvent;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ts_rs::TS)]
#[ts(export)]
#[serde(tag = "state")]
pub enum ContentPayload {
    Success {
        text: String,
        jumps: Vec<(u32, u32)>,
        source_to_code: Vec<(u32, u32)>,
        code_to_source: Vec<(u32, u32)>,
    },
    Error {
        message: String,
    },
    Empty,
}

/**
 * Events sent to the frontend, one JSON-RPC notification each.
 * Internally tagged, so each variant carries a 'type' field and becomes a
 * discriminated union in TypeScript.
 */
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ts_rs::TS)]
#[ts(export)]
#[serde(tag = "type")]
pub enum ExplorerEvent {
    /// Progress, `fraction` in 0..=1
    Status { message: String, fraction: f32 },

    /// Tool output for the log panel
    Log { text: String, is_error: bool },

    /// One view finished (or was skipped)
    Content { view: View, content: ContentPayload },
}

fn pairs(map: &LineMap) -> Vec<(u32, u32)> {
    map.iter().collect()
}

impl ContentPayload {
    pub fn render(content: &CodeContent, style: &CodeStyle) -> Self {
        match content {
            CodeContent::Success(classes) => {
                let code = Code::from_classes(classes, style);
                ContentPayload::Success {
                    text: code.text().to_string(),
                    jumps: pairs(code.jumps()),
                    source_to_code: pairs(code.source_to_code()),
                    code_to_source: pairs(code.code_to_source()),
                }
            }
            CodeContent::Error(message) => ContentPayload::Error {
                message: message.clone(),
            },
            CodeContent::Empty => ContentPayload::Empty,
        }
    }
}

impl ExplorerEvent {
    pub fn from_pipeline(event: &PipelineEvent, style: &CodeStyle) -> Self {
        match event {
            PipelineEvent::Status { message, fraction } => ExplorerEvent::Status {
                message: message.clone(),
                fraction: *fraction,
            },
            PipelineEvent::Log { text, is_error } => ExplorerEvent::Log {
                text: text.clone(),
                is_error: *is_error,
            },
            PipelineEvent::Content { view, content } => ExplorerEvent::Content {
                view: *view,
                content: ContentPayload::render(content, style),
            },
        }
    }
}

/// Wrap an event in a JSON-RPC notification envelope.
pub fn wrap_event_as_notification(event: &ExplorerEvent) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": "PipelineEvent",
        "params": event
    })
}
