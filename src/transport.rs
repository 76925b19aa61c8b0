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

use serde_json::Value;
use std::io::{self, Write};

/// Write one `Content-Length` framed JSON message.
pub fn write_framed<W: Write>(w: &mut W, msg: &Value) -> io::Result<()> {
    let body = serde_json::to_vec(msg)?;
    write!(w, "Content-Length: {}\r\n\r\n", body.len())?;
    w.write_all(&body)?;
    w.flush()
}

/// Write a JSON `Value` to stdout under stdout's process-wide lock, so
/// messages from different tasks never interleave.
pub fn write_json_locked(msg: &Value) -> io::Result<()> {
    let stdout = io::stdout();
    let mut w = stdout.lock();
    write_framed(&mut w, msg)
}
