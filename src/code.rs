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

//! Renders parsed classes into display text plus the line lookups a viewer needs.
//!
//! A [`Code`] carries three dense maps: code line to jump-target code line, source
//! line to code line, and code line to source line. Everything is computed in one
//! linear pass by [`CodeBuilder`]; method-scoped state lives in [`MethodScope`] and
//! is reset at every method boundary, so a jump can never resolve into a
//! neighbouring method.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::{Class, Instruction, InstructionSet, Method, MethodReference};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CodeStyle {
    pub indent: usize,
    pub line_number_width: usize,
    pub show_line_numbers: bool,
}

impl Default for CodeStyle {
    fn default() -> Self {
        Self {
            indent: 4,
            line_number_width: 4,
            show_line_numbers: true,
        }
    }
}

/// Map keyed by small dense line numbers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineMap(Vec<Option<u32>>);

impl LineMap {
    pub fn insert(&mut self, key: u32, value: u32) {
        let index = key as usize;
        if index >= self.0.len() {
            self.0.resize(index + 1, None);
        }
        self.0[index] = Some(value);
    }

    pub fn get(&self, key: u32) -> Option<u32> {
        self.0.get(key as usize).copied().flatten()
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(Option::is_none)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.0
            .iter()
            .enumerate()
            .filter_map(|(key, value)| value.map(|value| (key as u32, value)))
    }
}

/// Rendered code and its line lookups. Never mutated after `build`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Code {
    text: String,
    jumps: LineMap,
    source_to_code: LineMap,
    code_to_source: LineMap,
}

impl Code {
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn jumps(&self) -> &LineMap {
        &self.jumps
    }

    pub fn source_to_code(&self) -> &LineMap {
        &self.source_to_code
    }

    pub fn code_to_source(&self) -> &LineMap {
        &self.code_to_source
    }

    pub fn jump_target_of_line(&self, line: u32) -> Option<u32> {
        self.jumps.get(line)
    }

    pub fn code_line(&self, source_line: u32) -> Option<u32> {
        self.source_to_code.get(source_line)
    }

    pub fn source_line(&self, code_line: u32) -> Option<u32> {
        self.code_to_source.get(code_line)
    }

    pub fn from_classes(classes: &[Class], style: &CodeStyle) -> Code {
        let method_index = index_methods(classes);
        let mut builder = CodeBuilder::new(style.clone());
        for class in classes {
            builder.start_class(class);
            for method in &class.methods {
                builder.start_method(method);
                for instruction in &method.instruction_set.instructions {
                    let call_target = resolve_call(instruction, &method.instruction_set, &method_index);
                    builder.write_instruction(instruction, call_target);
                }
                builder.end_method();
            }
        }
        builder.build()
    }
}

fn index_methods(classes: &[Class]) -> HashMap<u32, &InstructionSet> {
    classes
        .iter()
        .flat_map(|class| &class.methods)
        .filter_map(|method| method.index.map(|index| (index, &method.instruction_set)))
        .collect()
}

/// Name of the method a native call lands in, if the dump says.
///
/// An inlined call reports the dex pc inside the inlined callee, so it has to be
/// looked up in that method's DEX echo rather than the caller's.
fn resolve_call<'a>(
    instruction: &Instruction,
    own: &'a InstructionSet,
    method_index: &HashMap<u32, &'a InstructionSet>,
) -> Option<&'a str> {
    let address = instruction.call_address?;
    let references: &HashMap<u32, MethodReference> = match instruction.call_address_method {
        Some(index) => &method_index.get(&index)?.method_references,
        None => &own.method_references,
    };
    references.get(&address).map(|reference| reference.name.as_str())
}

/// Per-method transient state, reset at each method boundary.
#[derive(Debug, Default)]
struct MethodScope {
    addresses: HashMap<u32, u32>,
    pending_jumps: Vec<(u32, u32)>,
    last_line_number: Option<u32>,
}

impl MethodScope {
    fn reset(&mut self) {
        self.addresses.clear();
        self.pending_jumps.clear();
        self.last_line_number = None;
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct BranchCount {
    hot: usize,
    cold: usize,
}

impl BranchCount {
    fn total(self) -> usize {
        self.hot + self.cold
    }
}

/// Branches before the first return are hot, the rest are cold.
fn count_branches(instruction_set: &InstructionSet) -> BranchCount {
    let isa = instruction_set.isa;
    let mut count = BranchCount::default();
    let mut seen_return = false;
    for instruction in &instruction_set.instructions {
        if isa.is_branch(&instruction.op) {
            if seen_return {
                count.cold += 1;
            } else {
                count.hot += 1;
            }
        }
        if isa.is_return(&instruction.op) {
            seen_return = true;
        }
    }
    count
}

fn plural(count: usize, word: &str, suffix: &str) -> String {
    if count == 1 {
        format!("{count} {word}")
    } else {
        format!("{count} {word}{suffix}")
    }
}

pub struct CodeBuilder {
    style: CodeStyle,
    line: u32,
    text: String,
    jumps: LineMap,
    source_to_code: LineMap,
    code_to_source: LineMap,
    scope: MethodScope,
}

impl CodeBuilder {
    pub fn new(style: CodeStyle) -> Self {
        Self {
            style,
            line: 0,
            text: String::new(),
            jumps: LineMap::default(),
            source_to_code: LineMap::default(),
            code_to_source: LineMap::default(),
            scope: MethodScope::default(),
        }
    }

    pub fn start_class(&mut self, class: &Class) {
        self.write_line(&class.header);
    }

    pub fn start_method(&mut self, method: &Method) {
        let indent = " ".repeat(self.style.indent);
        let body_indent = " ".repeat(self.style.indent * 2);

        self.write_line(&format!("{indent}{}", method.header));

        let mut summary = plural(method.instruction_set.instructions.len(), "instruction", "s");
        if let Some(size) = method.code_size {
            summary.push_str(&format!(" ({size} bytes)"));
        }
        self.write_line(&format!("{body_indent}-- {summary}"));

        let branches = count_branches(&method.instruction_set);
        if branches.total() > 0 {
            let mut summary = plural(branches.total(), "branch", "es");
            if method.instruction_set.isa.is_native() {
                summary.push_str(&format!(" ({} + {})", branches.hot, branches.cold));
            }
            self.write_line(&format!("{body_indent}-- {summary}"));
        }
    }

    pub fn write_instruction(&mut self, instruction: &Instruction, call_target: Option<&str>) {
        let line = self.line;
        self.scope.addresses.insert(instruction.address, line);
        if let Some(target) = instruction.jump_address {
            self.scope.pending_jumps.push((line, target));
        }
        if let Some(line_number) = instruction.line_number {
            self.source_to_code.insert(line_number, line);
            self.scope.last_line_number = Some(line_number);
        }
        if let Some(source_line) = self.scope.last_line_number {
            self.code_to_source.insert(line, source_line);
        }

        let mut text = " ".repeat(self.style.indent * 2);
        if self.style.show_line_numbers {
            let prefix = match instruction.line_number {
                Some(line_number) => format!("{line_number}:"),
                None => " ".to_string(),
            };
            text.push_str(&format!("{prefix:<width$}", width = self.style.line_number_width + 2));
        }
        text.push_str(&instruction.code());
        if let Some(name) = call_target {
            text.push_str("  → ");
            text.push_str(name);
        }
        self.write_line(&text);
    }

    pub fn end_method(&mut self) {
        for &(line, target) in &self.scope.pending_jumps {
            if let Some(&target_line) = self.scope.addresses.get(&target) {
                self.jumps.insert(line, target_line);
            }
        }
        self.scope.reset();
        self.write_line("");
    }

    pub fn build(self) -> Code {
        Code {
            text: self.text,
            jumps: self.jumps,
            source_to_code: self.source_to_code,
            code_to_source: self.code_to_source,
        }
    }

    fn write_line(&mut self, text: &str) {
        self.text.push_str(text);
        self.text.push('\n');
        self.line += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Isa;

    fn instruction(address: u32, code: &str, line_number: Option<u32>) -> Instruction {
        Instruction::new(address, format!("{address:04x}"), code, None).with_line_number(line_number)
    }

    fn build_two_methods() -> Code {
        let mut builder = CodeBuilder::new(CodeStyle::default());
        builder.write_instruction(&instruction(1, "m1 1", Some(1)), None);
        builder.write_instruction(&instruction(2, "m1 2", None), None);
        builder.write_instruction(&instruction(3, "m1 3", Some(2)), None);
        builder.end_method();
        builder.write_instruction(&instruction(1, "m2 1", Some(3)), None);
        builder.write_instruction(&instruction(2, "m2 2", None), None);
        builder.write_instruction(&instruction(3, "m2 3", Some(4)), None);
        builder.build()
    }

    #[test]
    fn source_to_code_mapping() {
        let code = build_two_methods();
        let expected = "        1:    0001: m1 1
              0002: m1 2
        2:    0003: m1 3

        3:    0001: m2 1
              0002: m2 2
        4:    0003: m2 3
";
        assert_eq!(code.text(), expected);
        let lines: Vec<_> = (1..=4).map(|line| code.code_line(line)).collect();
        assert_eq!(lines, vec![Some(0), Some(2), Some(4), Some(6)]);
    }

    #[test]
    fn code_to_source_mapping() {
        let code = build_two_methods();
        let lines: Vec<_> = (0..7).map(|line| code.source_line(line)).collect();
        assert_eq!(
            lines,
            vec![Some(1), Some(1), Some(2), None, Some(3), Some(3), Some(4)]
        );
    }

    #[test]
    fn round_trip_is_partial() {
        let code = build_two_methods();
        for source_line in 1..=4 {
            let code_line = code.code_line(source_line).unwrap();
            assert_eq!(code.source_line(code_line), Some(source_line));
        }
        // Carried-forward lines do not map back.
        assert_eq!(code.source_line(1), Some(1));
        assert_ne!(code.code_line(1), Some(1));
    }

    fn dex_method(header: &str, instructions: Vec<Instruction>) -> Method {
        Method::new(header, InstructionSet::new(Isa::Dex, instructions))
    }

    #[test]
    fn jumps_resolve_within_method() {
        let method = dex_method(
            "int Foo.sign(int)",
            vec![
                Instruction::new(0, "0000", "if-eqz v1, 0004 // +0004", Some(4)),
                Instruction::new(2, "0002", "const/4 v0, #int 1", None),
                Instruction::new(4, "0004", "return v0", None),
            ],
        )
        .with_code_size(Some(6));
        let classes = vec![Class::new("class Foo", vec![method])];
        let code = Code::from_classes(&classes, &CodeStyle::default());

        let lines: Vec<&str> = code.text().lines().collect();
        assert_eq!(lines[0], "class Foo");
        assert_eq!(lines[1], "    int Foo.sign(int)");
        assert_eq!(lines[2], "        -- 3 instructions (6 bytes)");
        assert_eq!(lines[3], "        -- 1 branch");
        assert!(lines[4].ends_with("0000: if-eqz v1, 0004 // +0004"));
        assert_eq!(code.jump_target_of_line(4), Some(6));
        assert_eq!(code.jumps().iter().count(), 1);
    }

    #[test]
    fn jumps_never_cross_methods() {
        let first = dex_method(
            "void Foo.a()",
            vec![
                Instruction::new(0, "0000", "goto 0008 // +0008", Some(8)),
                Instruction::new(1, "0001", "return-void", None),
            ],
        );
        let second = dex_method(
            "void Foo.b()",
            vec![
                Instruction::new(0, "0000", "nop", None),
                Instruction::new(8, "0008", "return-void", None),
            ],
        );
        let classes = vec![Class::new("class Foo", vec![first, second])];
        let code = Code::from_classes(&classes, &CodeStyle::default());
        assert!(code.jumps().is_empty());
    }

    fn native_call(address: u32, dex_pc: u32, method: Option<u32>) -> Instruction {
        Instruction::new(address, format!("0x{address:08x}"), "blr lr", None).with_call(Some(dex_pc), method)
    }

    fn reference(address: u32, name: &str) -> (u32, MethodReference) {
        (
            address,
            MethodReference {
                address,
                name: name.to_string(),
            },
        )
    }

    #[test]
    fn native_calls_render_their_target() {
        let callee = Method::new(
            "int Foo.helper(int)",
            InstructionSet::new(Isa::Aarch64, vec![Instruction::new(0x2000, "0x00002000", "ret", None)])
                .with_method_references(HashMap::from([reference(0x2, "int Foo.inner(int)")])),
        )
        .with_index(Some(7));
        let caller = Method::new(
            "int Foo.outer(int)",
            InstructionSet::new(
                Isa::Aarch64,
                vec![
                    native_call(0x1000, 0x10, None),
                    native_call(0x1004, 0x2, Some(7)),
                    native_call(0x1008, 0x30, None),
                    Instruction::new(0x100c, "0x0000100c", "ret", None),
                ],
            )
            .with_method_references(HashMap::from([reference(0x10, "int Foo.helper(int)")])),
        )
        .with_index(Some(3));
        let classes = vec![Class::new("class Foo", vec![caller, callee])];
        let style = CodeStyle {
            show_line_numbers: false,
            ..CodeStyle::default()
        };
        let code = Code::from_classes(&classes, &style);
        let lines: Vec<&str> = code.text().lines().collect();
        assert_eq!(lines[3], "        0x00001000: blr lr  → int Foo.helper(int)");
        assert_eq!(lines[4], "        0x00001004: blr lr  → int Foo.inner(int)");
        assert_eq!(lines[5], "        0x00001008: blr lr");
    }

    #[test]
    fn native_branches_split_hot_and_cold() {
        let method = Method::new(
            "void Foo.check(int)",
            InstructionSet::new(
                Isa::Aarch64,
                vec![
                    Instruction::new(0x0, "0x0", "cbz w1, #+0x8 (addr 0x8)", Some(0x8)),
                    Instruction::new(0x4, "0x4", "ret", None),
                    Instruction::new(0x8, "0x8", "b.ne #-0x8 (addr 0x0)", Some(0x0)),
                    Instruction::new(0xc, "0xc", "b #-0x8 (addr 0x4)", Some(0x4)),
                ],
            ),
        );
        let classes = vec![Class::new("class Foo", vec![method])];
        let code = Code::from_classes(&classes, &CodeStyle::default());
        let lines: Vec<&str> = code.text().lines().collect();
        assert_eq!(lines[3], "        -- 3 branches (1 + 2)");
        assert_eq!(code.jump_target_of_line(4), Some(6));
        assert_eq!(code.jump_target_of_line(6), Some(4));
        assert_eq!(code.jump_target_of_line(7), Some(5));
    }

    #[test]
    fn rebuild_with_new_style_is_a_new_value() {
        let method = dex_method(
            "void Foo.a()",
            vec![Instruction::new(0, "0000", "return-void", None).with_line_number(Some(3))],
        );
        let classes = vec![Class::new("class Foo", vec![method])];
        let numbered = Code::from_classes(&classes, &CodeStyle::default());
        let plain = Code::from_classes(
            &classes,
            &CodeStyle {
                show_line_numbers: false,
                ..CodeStyle::default()
            },
        );
        assert!(numbered.text().contains("3:    0000: return-void"));
        assert!(plain.text().contains("        0000: return-void"));
        assert_eq!(numbered.code_line(3), plain.code_line(3));
    }
}
