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

/// Parser for `dexdump -d` output.
///
/// Method bodies are introduced by the `insns size` line, followed by the
/// method signature line and one line per instruction:
///
/// ```text
///       insns size    : 3 16-bit code units
/// 000150:                                        |[000150] KotlinExplorerKt.square:(I)I
/// 000160: 9200 0101                              |0000: mul-int v0, v1, v1
/// 000164: 0f00                                   |0002: return v0
///       catches       : (none)
///       positions     :
///         0x0000 line=1
/// ```
use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use super::{is_built_in_class, parse_dec, parse_hex, DumpParser, ParseError};
use crate::lines::{group, LineCursor};
use crate::model::{with_line_numbers, Class, Instruction, InstructionSet, Isa, Method};

static POSITION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*0x(?<address>[0-9a-f]+) line=(?<line>\d+)$").unwrap());

static JUMP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9a-f]{4}: .* (?<address>[0-9a-f]{4}) // [+-][0-9a-f]{4}$").unwrap()
});

const CLASS_START: &str = "Class #";
const CLASS_END: &str = "source_file_idx";
const CLASS_NAME: &str = "Class descriptor";
const INSTRUCTIONS: &str = "insns size";
const POSITIONS: &str = "positions";

#[derive(Debug, Default, Clone, Copy)]
pub struct DexDumpParser;

impl DumpParser for DexDumpParser {
    fn format_name(&self) -> &'static str {
        "dexdump"
    }

    fn parse_classes(&self, text: &str) -> Result<Vec<Class>, ParseError> {
        let mut cursor = LineCursor::new(text);
        let mut classes = Vec::new();
        while cursor.consume_until(CLASS_START) {
            if let Some(class) = read_class(&mut cursor)? {
                if !class.methods.is_empty() {
                    classes.push(class);
                }
            }
        }
        Ok(classes)
    }
}

fn read_class(cursor: &mut LineCursor) -> Result<Option<Class>, ParseError> {
    let line = cursor
        .next_line()
        .ok_or(ParseError::UnexpectedEnd { expected: "class descriptor" })?;
    let class_name = quoted_value(cursor, line, CLASS_NAME)?;
    let class_name = class_name
        .strip_prefix('L')
        .unwrap_or(class_name)
        .trim_end_matches(';')
        .replace('/', ".");
    if is_built_in_class(&class_name) {
        return Ok(None);
    }

    let mut methods = Vec::new();
    loop {
        let line = cursor
            .next_line()
            .ok_or(ParseError::UnexpectedEnd { expected: CLASS_END })?;
        let line = line.trim();
        if line.starts_with(CLASS_END) {
            break;
        }
        if line.starts_with(INSTRUCTIONS) {
            let code_units = line
                .split_once(':')
                .and_then(|(_, value)| value.split_whitespace().next())
                .ok_or_else(|| ParseError::unexpected(cursor, "instruction count", line))?;
            let code_size = parse_dec(cursor, code_units)?
                .checked_mul(2)
                .ok_or_else(|| ParseError::InvalidNumber {
                    line_no: cursor.line_no(),
                    value: code_units.to_string(),
                })?;
            methods.push(read_method(cursor, &class_name, code_size)?);
        }
    }
    Ok(Some(Class::new(format!("class {class_name}"), methods)))
}

fn read_method(cursor: &mut LineCursor, class_name: &str, code_size: u32) -> Result<Method, ParseError> {
    let line = cursor
        .next_line()
        .ok_or(ParseError::UnexpectedEnd { expected: "method signature" })?;
    let signature = line.rsplit('.').next().unwrap_or(line);
    let (name, descriptor) = signature
        .split_once(':')
        .ok_or_else(|| ParseError::unexpected(cursor, "method signature", line))?;

    let instructions = read_instructions(cursor)?;

    if !cursor.consume_until(POSITIONS) {
        return Err(ParseError::UnexpectedEnd { expected: POSITIONS });
    }
    let positions = read_positions(cursor)?;

    let (return_type, param_types) =
        decode_descriptor(descriptor).ok_or_else(|| ParseError::unexpected(cursor, "method descriptor", descriptor))?;

    Ok(Method::new(
        format!("{return_type} {class_name}.{name}({})", param_types.join(", ")),
        InstructionSet::new(Isa::Dex, with_line_numbers(instructions, &positions)),
    )
    .with_code_size(Some(code_size)))
}

fn read_instructions(cursor: &mut LineCursor) -> Result<Vec<Instruction>, ParseError> {
    let mut instructions = Vec::new();
    while let Some(line) = cursor.peek() {
        if line.starts_with(' ') {
            break;
        }
        cursor.next_line();
        let code = line.split_once('|').map(|(_, code)| code).unwrap_or(line);
        let (label, body) = code
            .split_once(": ")
            .ok_or_else(|| ParseError::unexpected(cursor, "instruction", line))?;
        let address = parse_hex(cursor, label)?;
        let jump_address = match JUMP.captures(code) {
            Some(jump) => Some(parse_hex(cursor, group(&jump, "address"))?),
            None => None,
        };
        instructions.push(Instruction::new(address, label, body, jump_address));
    }
    Ok(instructions)
}

fn read_positions(cursor: &mut LineCursor) -> Result<HashMap<u32, u32>, ParseError> {
    let mut map = HashMap::new();
    while let Some(line) = cursor.peek() {
        let Some(captures) = POSITION.captures(line) else {
            break;
        };
        cursor.next_line();
        let address = parse_hex(cursor, group(&captures, "address"))?;
        let line_number = parse_dec(cursor, group(&captures, "line"))?;
        map.insert(address, line_number);
    }
    Ok(map)
}

/// `  Class descriptor  : 'LFoo;'` -> `LFoo;`
fn quoted_value<'a>(cursor: &LineCursor, line: &'a str, name: &'static str) -> Result<&'a str, ParseError> {
    if !line.trim().starts_with(name) {
        return Err(ParseError::unexpected(cursor, name, line));
    }
    line.split('\'')
        .nth(1)
        .ok_or_else(|| ParseError::unexpected(cursor, name, line))
}

/// Decodes `(ILjava/lang/String;[J)V` into (`void`, [`int`, `String`, `long[]`]).
pub fn decode_descriptor(descriptor: &str) -> Option<(String, Vec<String>)> {
    let open = descriptor.find('(')?;
    let close = descriptor.rfind(')')?;
    if close < open {
        return None;
    }
    let params = &descriptor[open + 1..close];
    let mut param_types = Vec::new();
    let mut index = 0;
    while index < params.len() {
        let (name, next) = decode_type(params, index);
        param_types.push(name);
        index = next;
    }
    let return_descriptor = &descriptor[close + 1..];
    if return_descriptor.is_empty() {
        return None;
    }
    let (return_type, _) = decode_type(return_descriptor, 0);
    Some((return_type, param_types))
}

/// Decodes the single type starting at `start`, returning it and the index after it.
fn decode_type(descriptor: &str, start: usize) -> (String, usize) {
    let bytes = descriptor.as_bytes();
    let mut index = start;
    let mut dimensions = 0;
    while bytes.get(index) == Some(&b'[') {
        dimensions += 1;
        index += 1;
    }
    let (name, next) = match bytes.get(index) {
        Some(b'B') => ("byte".to_string(), index + 1),
        Some(b'C') => ("char".to_string(), index + 1),
        Some(b'D') => ("double".to_string(), index + 1),
        Some(b'F') => ("float".to_string(), index + 1),
        Some(b'I') => ("int".to_string(), index + 1),
        Some(b'J') => ("long".to_string(), index + 1),
        Some(b'S') => ("short".to_string(), index + 1),
        Some(b'V') => ("void".to_string(), index + 1),
        Some(b'Z') => ("boolean".to_string(), index + 1),
        Some(b'L') => {
            let end = descriptor[index..]
                .find(';')
                .map_or(descriptor.len(), |offset| index + offset);
            let name = descriptor[index + 1..end].replace('/', ".").replace("java.lang.", "");
            (name, end + 1)
        }
        _ => ("<unknown>".to_string(), index + 1),
    };
    (name + &"[]".repeat(dimensions), next)
}
