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

// Crate root: declare modules and control visibility
pub mod code;
pub mod config;
pub mod debug;
pub mod error;
pub mod lines;
pub mod model;
pub mod parsers;
pub mod pipeline;
pub mod process;
pub mod progress;
pub mod protocol;
pub mod toolchain;
pub mod transport;
pub mod utils;

// Re-export commonly used API from the library for binaries/tests
pub use code::{Code, CodeStyle};
pub use config::{PipelineConfig, View};
pub use model::{Class, CodeContent, Instruction, InstructionSet, Isa, Method};
pub use pipeline::{Pipeline, PipelineEvent};
pub use process::{cancel_pair, CancelToken, ProcessRunner, SystemProcessRunner, ToolCommand};
