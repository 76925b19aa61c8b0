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

/// Parser for `javap -p -l -c` output.
///
/// ```text
/// public final class KotlinExplorerKt {
///   public static final int square(int);
///     Code:
///        0: iload_0
///        3: ireturn
///     LineNumberTable:
///       line 1: 0
/// }
/// ```
use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use super::{is_built_in_class, parse_dec, DumpParser, ParseError};
use crate::lines::{group, LineCursor};
use crate::model::{with_line_numbers, Class, Instruction, InstructionSet, Isa, Method};

static CLASS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?<header>.* class (?<name>[_a-zA-Z][_.$\w]+)).*\{$").unwrap());

static METHOD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^ {2}(?<header>.*\))( throws .+)?;$").unwrap());

static INSTRUCTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?<address>\d+): +(?<code>.*)$").unwrap());

static JUMP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(goto|if[_a-z]*) +(?<address>\d+)$").unwrap());

static LINE_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^line (?<line>\d+): (?<address>\d+)$").unwrap());

const CLASS_END: &str = "}";
const CODE_MARKER: &str = "Code:";
const LINE_TABLE_MARKER: &str = "LineNumberTable:";

#[derive(Debug, Default, Clone, Copy)]
pub struct ByteCodeParser;

impl DumpParser for ByteCodeParser {
    fn format_name(&self) -> &'static str {
        "javap"
    }

    fn parse_classes(&self, text: &str) -> Result<Vec<Class>, ParseError> {
        let mut cursor = LineCursor::new(text);
        let mut classes = Vec::new();
        while let Some(captures) = cursor.consume_until_match(&CLASS) {
            let header = group(&captures, "header");
            let name = group(&captures, "name");
            // Built-in classes are still read so their bodies are skipped as a unit.
            let class = read_class(&mut cursor, header)?;
            if !is_built_in_class(name) {
                classes.push(class);
            }
        }
        Ok(classes)
    }
}

fn read_class(cursor: &mut LineCursor, header: &str) -> Result<Class, ParseError> {
    let mut methods = Vec::new();
    loop {
        let line = cursor
            .peek()
            .ok_or(ParseError::UnexpectedEnd { expected: "'}'" })?;
        if line == CLASS_END {
            cursor.next_line();
            break;
        }
        if METHOD.is_match(line) {
            if let Some(method) = read_method(cursor)? {
                methods.push(method);
            }
        } else {
            cursor.next_line();
        }
    }
    Ok(Class::new(header, methods))
}

fn read_method(cursor: &mut LineCursor) -> Result<Option<Method>, ParseError> {
    let line = cursor
        .next_line()
        .ok_or(ParseError::UnexpectedEnd { expected: "method" })?;
    let captures = METHOD
        .captures(line)
        .ok_or_else(|| ParseError::unexpected(cursor, "method", line))?;
    let header = group(&captures, "header");

    // Abstract and native declarations carry no code.
    match cursor.peek() {
        Some(next) if next.trim() == CODE_MARKER => {
            cursor.next_line();
        }
        _ => return Ok(None),
    }

    let instructions = read_instructions(cursor)?;
    let line_numbers = read_line_numbers(cursor)?;
    let instruction_set = InstructionSet::new(Isa::ByteCode, with_line_numbers(instructions, &line_numbers));
    Ok(Some(Method::new(header, instruction_set)))
}

fn read_instructions(cursor: &mut LineCursor) -> Result<Vec<Instruction>, ParseError> {
    let mut instructions = Vec::new();
    while let Some(line) = cursor.peek() {
        let Some(captures) = INSTRUCTION.captures(line.trim()) else {
            break;
        };
        cursor.next_line();
        let address_text = group(&captures, "address");
        let address = parse_dec(cursor, address_text)?;
        let code = group(&captures, "code");
        let jump_address = match JUMP.captures(code) {
            Some(jump) => Some(parse_dec(cursor, group(&jump, "address"))?),
            None => None,
        };
        let mut instruction = Instruction::new(address, address_text, code, jump_address);
        if instruction.op == "tableswitch" || instruction.op == "lookupswitch" {
            instruction.operands = read_switch_body(cursor)?;
        }
        instructions.push(instruction);
    }
    Ok(instructions)
}

/// Folds the multi-line case table of a switch into one operand string.
fn read_switch_body(cursor: &mut LineCursor) -> Result<String, ParseError> {
    let mut cases = Vec::new();
    loop {
        let line = cursor
            .next_line()
            .ok_or(ParseError::UnexpectedEnd { expected: "end of switch table" })?;
        let line = line.trim();
        if line == CLASS_END {
            break;
        }
        cases.push(line.to_string());
    }
    Ok(format!("{{ {} }}", cases.join(", ")))
}

fn read_line_numbers(cursor: &mut LineCursor) -> Result<HashMap<u32, u32>, ParseError> {
    let mut map = HashMap::new();
    while let Some(line) = cursor.peek() {
        if line == CLASS_END || METHOD.is_match(line) {
            break;
        }
        cursor.next_line();
        if line.trim() != LINE_TABLE_MARKER {
            continue;
        }
        while let Some(entry) = cursor.peek() {
            let Some(captures) = LINE_NUMBER.captures(entry.trim()) else {
                break;
            };
            cursor.next_line();
            let line_number = parse_dec(cursor, group(&captures, "line"))?;
            let address = parse_dec(cursor, group(&captures, "address"))?;
            map.insert(address, line_number);
        }
        break;
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CodeContent;

    const SQUARE: &str = "\
Compiled from \"KotlinExplorer.kt\"
public final class KotlinExplorerKt {
  public static final int square(int);
    Code:
       0: iload_0
       1: iload_0
       2: imul
       3: ireturn
    LineNumberTable:
      line 1: 0
    LocalVariableTable:
      Start  Length  Slot  Name   Signature
          0       4     0     a   I
}
";

    const BRANCHES: &str = "\
public final class BranchKt {
  public static final int clamp(int) throws java.io.IOException;
    Code:
       0: iload_0
       1: ifge          6
       4: iconst_0
       5: ireturn
       6: iload_0
       7: ireturn
    Exception table:
       from    to  target type
    LineNumberTable:
      line 3: 0
      line 4: 4
      line 5: 6
  public abstract void callback();
  public final int pick(int);
    Code:
       0: iload_1
       1: tableswitch   { // 0 to 1
                     0: 24
                     1: 26
               default: 28
          }
      24: iconst_1
      25: ireturn
      26: iconst_2
      27: ireturn
      28: iconst_3
      29: ireturn
}
public final class kotlin.jvm.internal.Intrinsics {
  public static void checkNotNull(java.lang.Object);
    Code:
       0: return
}
";

    #[test]
    fn parses_single_method() {
        let classes = ByteCodeParser.parse_classes(SQUARE).unwrap();
        assert_eq!(classes.len(), 1);
        assert_eq!(classes[0].header, "public final class KotlinExplorerKt");
        let method = &classes[0].methods[0];
        assert_eq!(method.header, "public static final int square(int)");
        let instructions = &method.instruction_set.instructions;
        assert_eq!(instructions.len(), 4);
        assert_eq!(instructions[2].op, "imul");
        assert_eq!(instructions[0].line_number, Some(1));
        assert_eq!(instructions[1].line_number, None);
        assert!(instructions.iter().all(|i| i.jump_address.is_none()));
    }

    #[test]
    fn jumps_switches_and_line_tables() {
        let classes = ByteCodeParser.parse_classes(BRANCHES).unwrap();
        assert_eq!(classes.len(), 1, "built-in class must be dropped");
        let methods = &classes[0].methods;
        assert_eq!(methods.len(), 2, "abstract method has no code");

        let clamp = &methods[0].instruction_set.instructions;
        assert_eq!(clamp[1].jump_address, Some(6));
        assert_eq!(clamp[2].line_number, Some(4));
        assert_eq!(clamp[4].line_number, Some(5));

        let pick = &methods[1].instruction_set.instructions;
        assert_eq!(pick.len(), 8);
        assert_eq!(pick[1].op, "tableswitch");
        assert_eq!(pick[1].operands, "{ 0: 24, 1: 26, default: 28 }");
        assert_eq!(pick[2].address, 24);
    }

    #[test]
    fn unterminated_class_is_an_error() {
        let text = "public final class Foo {\n  public void bar();\n";
        match ByteCodeParser.parse(text) {
            CodeContent::Error(message) => assert!(message.contains("expected '}'"), "{message}"),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[test]
    fn empty_input_has_no_classes() {
        assert_eq!(ByteCodeParser.parse(""), CodeContent::Success(Vec::new()));
    }
}
