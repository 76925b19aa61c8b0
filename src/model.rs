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

//! Parsed disassembly tree shared by every dump parser and the code builder.
//!
//! A parse produces `Class -> Method -> InstructionSet -> Instruction`. Trees are
//! built fresh for every parse call and are never shared between pipeline runs.

use std::collections::HashMap;

/// Instruction set of a disassembled method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Isa {
    ByteCode,
    Dex,
    X86_64,
    Aarch64,
}

impl Isa {
    pub fn is_native(self) -> bool {
        matches!(self, Isa::X86_64 | Isa::Aarch64)
    }

    /// True when `op` transfers control within the method.
    pub fn is_branch(self, op: &str) -> bool {
        match self {
            Isa::ByteCode => op.starts_with("if") || op.starts_with("goto"),
            Isa::Dex => op.starts_with("if-") || op.starts_with("goto"),
            Isa::X86_64 => op.starts_with('j'),
            Isa::Aarch64 => {
                op == "b"
                    || op == "br"
                    || op.starts_with("b.")
                    || matches!(op, "cbz" | "cbnz" | "tbz" | "tbnz")
            }
        }
    }

    pub fn is_return(self, op: &str) -> bool {
        match self {
            Isa::ByteCode => op.ends_with("return"),
            Isa::Dex => op.starts_with("return"),
            Isa::X86_64 | Isa::Aarch64 => op == "ret",
        }
    }
}

/// A call target named by an `invoke-*` line of the DEX echo in a native dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodReference {
    pub address: u32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub address: u32,
    pub label: String,
    pub op: String,
    pub operands: String,
    pub jump_address: Option<u32>,
    pub call_address: Option<u32>,
    /// Method index of the call target when the call was inlined.
    pub call_address_method: Option<u32>,
    pub line_number: Option<u32>,
}

impl Instruction {
    pub fn new(address: u32, label: impl Into<String>, code: &str, jump_address: Option<u32>) -> Self {
        let (op, operands) = split_op_and_operands(code);
        Self {
            address,
            label: label.into(),
            op: op.to_string(),
            operands: operands.to_string(),
            jump_address,
            call_address: None,
            call_address_method: None,
            line_number: None,
        }
    }

    pub fn with_call(mut self, call_address: Option<u32>, call_address_method: Option<u32>) -> Self {
        self.call_address = call_address;
        self.call_address_method = call_address_method;
        self
    }

    pub fn with_line_number(mut self, line_number: Option<u32>) -> Self {
        self.line_number = line_number;
        self
    }

    /// Display form without the source line column, e.g. `0002: return v0`.
    pub fn code(&self) -> String {
        if self.operands.is_empty() {
            format!("{}: {}", self.label, self.op)
        } else {
            format!("{}: {} {}", self.label, self.op, self.operands)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionSet {
    pub isa: Isa,
    pub instructions: Vec<Instruction>,
    pub method_references: HashMap<u32, MethodReference>,
}

impl InstructionSet {
    pub fn new(isa: Isa, instructions: Vec<Instruction>) -> Self {
        Self {
            isa,
            instructions,
            method_references: HashMap::new(),
        }
    }

    pub fn with_method_references(mut self, references: HashMap<u32, MethodReference>) -> Self {
        self.method_references = references;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Method {
    pub header: String,
    pub instruction_set: InstructionSet,
    /// DEX method index, only known for native dumps.
    pub index: Option<u32>,
    /// Code size in bytes as reported by the tool.
    pub code_size: Option<u32>,
}

impl Method {
    pub fn new(header: impl Into<String>, instruction_set: InstructionSet) -> Self {
        Self {
            header: header.into(),
            instruction_set,
            index: None,
            code_size: None,
        }
    }

    pub fn with_index(mut self, index: Option<u32>) -> Self {
        self.index = index;
        self
    }

    pub fn with_code_size(mut self, code_size: Option<u32>) -> Self {
        self.code_size = code_size;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Class {
    pub header: String,
    pub methods: Vec<Method>,
}

impl Class {
    pub fn new(header: impl Into<String>, methods: Vec<Method>) -> Self {
        Self {
            header: header.into(),
            methods,
        }
    }
}

/// Result of parsing one dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeContent {
    Success(Vec<Class>),
    Error(String),
    Empty,
}

impl CodeContent {
    pub fn classes(&self) -> Option<&[Class]> {
        match self {
            CodeContent::Success(classes) => Some(classes),
            _ => None,
        }
    }
}

/// Attach source lines (keyed by instruction address) to a parsed instruction stream.
pub fn with_line_numbers(instructions: Vec<Instruction>, lines: &HashMap<u32, u32>) -> Vec<Instruction> {
    instructions
        .into_iter()
        .map(|instruction| {
            let line = lines.get(&instruction.address).copied();
            instruction.with_line_number(line)
        })
        .collect()
}

/// Splits `mul-int v0, v1, v1` into (`mul-int`, `v0, v1, v1`).
pub fn split_op_and_operands(code: &str) -> (&str, &str) {
    match code.find(' ') {
        Some(index) => (&code[..index], code[index + 1..].trim()),
        None => (code, ""),
    }
}
