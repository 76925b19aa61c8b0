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

/// Parser for `oatdump` output.
///
/// Every compiled method echoes its DEX code before the native code. The echo is
/// where call targets get their names: an `invoke-*` at dex pc N names the call
/// whose `StackMap` (or `InlineInfo`, when inlined) line reports `dex_pc=N`.
///
/// ```text
/// 0: LKotlinExplorerKt; (offset=0x000005f0) (type_idx=1) (Initialized) (OatClassAllCompiled)
///   1: int KotlinExplorerKt.callSquare(int) (dex_method_idx=2)
///     DEX CODE:
///       0x0000: 7110 0100 0100           	| invoke-static {v1}, int KotlinExplorerKt.square(int) // method@1
///     CODE: (code_offset=0x00001020 size=12)...
///       0x00001028: d63f03c0	blr lr
///         StackMap[0] (native_pc=0x102c, dex_pc=0x0, register_mask=0x0, stack_mask=0b)
/// ```
use std::collections::HashMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use super::{is_built_in_class, parse_dec, parse_hex, DumpParser, ParseError};
use crate::lines::{group, LineCursor};
use crate::model::{Class, Instruction, InstructionSet, Isa, Method, MethodReference};

static CLASS_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d+: L(?<class>[^;]+); \(offset=0x[0-9A-Fa-f]+\) \(type_idx=\d+\).+").unwrap()
});
static METHOD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s+\d+:\s+(?<method>.+)\s+\(dex_method_idx=(?<methodIndex>\d+)\)$").unwrap()
});
static CODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s+0x(?<address>[0-9A-Fa-f]+):\s+[0-9A-Fa-f]+\s+(?<code>.+)").unwrap()
});
static CODE_SIZE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"size=(?<size>\d+)").unwrap());

static DEX_CODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s+0x(?<address>[0-9A-Fa-f]+):\s+([0-9A-Fa-f]+\s+)+\|\s+(?<code>.+)").unwrap()
});
static DEX_METHOD_INVOKE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^invoke-[^}]+},\s+\S+\s+(?<name>.+)\s+//.+").unwrap());

static AARCH64_JUMP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r".+ #[+-]0x[0-9A-Fa-f]+ \(addr 0x(?<address>[0-9A-Fa-f]+)\)$").unwrap()
});
static X86_JUMP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r".+ [+-]\d+ \(0x(?<address>[0-9A-Fa-f]{8})\)$").unwrap());

static AARCH64_METHOD_CALL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^blr lr$").unwrap());
static X86_METHOD_CALL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^call .+$").unwrap());

static STACK_MAP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s+StackMap.+dex_pc=0x(?<callAddress>[0-9A-Fa-f]+),.+$").unwrap()
});
static INLINE_INFO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s+InlineInfo.+dex_pc=0x(?<callAddress>[0-9A-Fa-f]+),\s+method_index=(?<methodIndex>\d+).+$")
        .unwrap()
});

const INSTRUCTION_SET: &str = "INSTRUCTION SET:";
const DEX_CODE_MARKER: &str = "DEX CODE:";
const CODE_MARKER: &str = "CODE:";

/// Jump and call patterns of one native architecture.
struct NativeGrammar {
    isa: Isa,
    jump: &'static Regex,
    method_call: &'static Regex,
}

impl NativeGrammar {
    fn for_instruction_set(name: &str) -> Result<Self, ParseError> {
        match name {
            "Arm64" => Ok(Self {
                isa: Isa::Aarch64,
                jump: &AARCH64_JUMP,
                method_call: &AARCH64_METHOD_CALL,
            }),
            "X86_64" => Ok(Self {
                isa: Isa::X86_64,
                jump: &X86_JUMP,
                method_call: &X86_METHOD_CALL,
            }),
            other => Err(ParseError::UnknownInstructionSet(other.to_string())),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct OatDumpParser;

impl DumpParser for OatDumpParser {
    fn format_name(&self) -> &'static str {
        "oatdump"
    }

    fn parse_classes(&self, text: &str) -> Result<Vec<Class>, ParseError> {
        let mut cursor = LineCursor::new(text);
        if !cursor.consume_until(INSTRUCTION_SET) {
            return Err(ParseError::UnexpectedEnd { expected: INSTRUCTION_SET });
        }
        let set = cursor
            .next_line()
            .ok_or(ParseError::UnexpectedEnd { expected: "instruction set name" })?;
        let grammar = NativeGrammar::for_instruction_set(set.trim())?;
        log::debug!("oatdump instruction set: {:?}", grammar.isa);

        let mut classes = Vec::new();
        while let Some(captures) = cursor.consume_until_match(&CLASS_NAME) {
            let class_name = group(&captures, "class").replace('/', ".");
            let class = read_class(&mut cursor, &class_name, &grammar)?;
            if !is_built_in_class(&class_name) && !class.methods.is_empty() {
                classes.push(class);
            }
        }
        Ok(classes)
    }
}

fn is_boundary(line: &str) -> bool {
    METHOD.is_match(line) || CLASS_NAME.is_match(line)
}

fn read_class(cursor: &mut LineCursor, class_name: &str, grammar: &NativeGrammar) -> Result<Class, ParseError> {
    let mut methods = Vec::new();
    while let Some(line) = cursor.peek() {
        if CLASS_NAME.is_match(line) {
            break;
        }
        cursor.next_line();
        if let Some(captures) = METHOD.captures(line) {
            if let Some(method) = read_method(cursor, &captures, grammar)? {
                methods.push(method);
            }
        }
    }
    Ok(Class::new(format!("class {class_name}"), methods))
}

fn read_method(
    cursor: &mut LineCursor,
    header: &Captures,
    grammar: &NativeGrammar,
) -> Result<Option<Method>, ParseError> {
    let name = group(header, "method");
    let index = parse_dec(cursor, group(header, "methodIndex"))?;

    // Abstract and native methods have neither marker.
    if cursor.consume_until_before(DEX_CODE_MARKER, is_boundary).is_none() {
        log::debug!("oatdump: no DEX CODE for {name}");
        return Ok(None);
    }
    let method_references = read_method_references(cursor)?;

    let Some(code_line) = cursor.consume_until_before(CODE_MARKER, is_boundary) else {
        log::debug!("oatdump: no native CODE for {name}");
        return Ok(None);
    };
    let code_size = match CODE_SIZE.captures(code_line) {
        Some(size) => Some(parse_dec(cursor, group(&size, "size"))?),
        None => None,
    };
    let instructions = read_native_instructions(cursor, grammar)?;

    let instruction_set =
        InstructionSet::new(grammar.isa, instructions).with_method_references(method_references);
    Ok(Some(
        Method::new(name, instruction_set)
            .with_index(Some(index))
            .with_code_size(code_size),
    ))
}

fn read_method_references(cursor: &mut LineCursor) -> Result<HashMap<u32, MethodReference>, ParseError> {
    let mut references = HashMap::new();
    while let Some(line) = cursor.peek() {
        let Some(captures) = DEX_CODE.captures(line) else {
            break;
        };
        cursor.next_line();
        if let Some(invoke) = DEX_METHOD_INVOKE.captures(group(&captures, "code")) {
            let address = parse_hex(cursor, group(&captures, "address"))?;
            references.insert(
                address,
                MethodReference {
                    address,
                    name: group(&invoke, "name").to_string(),
                },
            );
        }
    }
    Ok(references)
}

fn read_native_instructions(
    cursor: &mut LineCursor,
    grammar: &NativeGrammar,
) -> Result<Vec<Instruction>, ParseError> {
    let mut instructions = Vec::new();
    while let Some(line) = cursor.peek() {
        if is_boundary(line) {
            break;
        }
        cursor.next_line();
        if let Some(captures) = CODE.captures(line) {
            instructions.push(read_native_instruction(cursor, &captures, grammar)?);
        }
    }
    Ok(instructions)
}

fn read_native_instruction(
    cursor: &mut LineCursor,
    captures: &Captures,
    grammar: &NativeGrammar,
) -> Result<Instruction, ParseError> {
    let address_text = group(captures, "address");
    let code = group(captures, "code");

    let mut call_address = None;
    let mut call_address_method = None;
    if grammar.method_call.is_match(code) {
        if let Some(stack_map) = cursor.peek().and_then(|line| STACK_MAP.captures(line)) {
            cursor.next_line();
            call_address = Some(parse_hex(cursor, group(&stack_map, "callAddress"))?);
            // InlineInfo names the inlined callee and its own dex pc; it wins over the StackMap.
            if let Some(inline_info) = cursor.peek().and_then(|line| INLINE_INFO.captures(line)) {
                call_address = Some(parse_hex(cursor, group(&inline_info, "callAddress"))?);
                call_address_method = Some(parse_dec(cursor, group(&inline_info, "methodIndex"))?);
            }
        }
    }

    let jump_address = match (call_address, grammar.jump.captures(code)) {
        (None, Some(jump)) => Some(parse_hex(cursor, group(&jump, "address"))?),
        _ => None,
    };

    let address = parse_hex(cursor, address_text)?;
    Ok(Instruction::new(address, format!("0x{address_text}"), code, jump_address)
        .with_call(call_address, call_address_method))
}
