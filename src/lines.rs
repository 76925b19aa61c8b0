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

/// Forward-only cursor over the lines of a tool dump.
///
/// Parsers never step backwards: a line is either peeked (left in place) or
/// consumed. The cursor remembers the 1-based number of the last consumed line
/// so parse errors can point at the offending dump line.
use regex::{Captures, Regex};

pub struct LineCursor<'a> {
    lines: std::iter::Peekable<std::str::Lines<'a>>,
    line_no: usize,
}

impl<'a> LineCursor<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            lines: text.lines().peekable(),
            line_no: 0,
        }
    }

    pub fn has_next(&mut self) -> bool {
        self.lines.peek().is_some()
    }

    pub fn peek(&mut self) -> Option<&'a str> {
        self.lines.peek().copied()
    }

    pub fn next_line(&mut self) -> Option<&'a str> {
        let line = self.lines.next()?;
        self.line_no += 1;
        Some(line)
    }

    /// Number of the last consumed line, 0 before the first one.
    pub fn line_no(&self) -> usize {
        self.line_no
    }

    /// Consumes lines until one whose trimmed text starts with `prefix`.
    /// That line is consumed too. Returns false at end of input.
    pub fn consume_until(&mut self, prefix: &str) -> bool {
        while let Some(line) = self.next_line() {
            if line.trim().starts_with(prefix) {
                return true;
            }
        }
        false
    }

    /// Consumes lines until one fully matching `regex` and returns its captures.
    pub fn consume_until_match(&mut self, regex: &Regex) -> Option<Captures<'a>> {
        while let Some(line) = self.next_line() {
            if let Some(captures) = regex.captures(line) {
                return Some(captures);
            }
        }
        None
    }

    /// Like `consume_until`, but gives up without consuming the line where
    /// `stop` returns true. Used to keep scans inside one method.
    pub fn consume_until_before(&mut self, prefix: &str, stop: impl Fn(&str) -> bool) -> Option<&'a str> {
        while let Some(line) = self.peek() {
            if stop(line) {
                return None;
            }
            self.next_line();
            if line.trim().starts_with(prefix) {
                return Some(line);
            }
        }
        None
    }
}

/// Value of a named group that the grammar guarantees to be present.
pub fn group<'a>(captures: &Captures<'a>, name: &str) -> &'a str {
    captures.name(name).map(|m| m.as_str()).unwrap_or_default()
}
