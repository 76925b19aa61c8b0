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

use std::env;
use std::path::{Path, PathBuf};

/// Absolute, symlink-free form of `path`, without the `\\?\` prefix on Windows.
/// Falls back to the absolute path when the directory cannot be resolved.
pub fn canonicalize_dir(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir().unwrap_or_default().join(path)
    };
    dunce::canonicalize(&absolute).unwrap_or(absolute)
}

/// Remove every `directory/` prefix from tool output, so compiler messages
/// name `KotlinExplorer.kt:3:5` instead of a scratch path.
pub fn strip_directory_prefix(text: &str, directory: &Path) -> String {
    let mut prefix = directory.to_string_lossy().into_owned();
    if !prefix.ends_with(std::path::MAIN_SEPARATOR) {
        prefix.push(std::path::MAIN_SEPARATOR);
    }
    let stripped = text.replace(&prefix, "");
    // kotlinc prints forward slashes on every platform.
    if cfg!(windows) {
        stripped.replace(&prefix.replace('\\', "/"), "")
    } else {
        stripped
    }
}
