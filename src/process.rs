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

//! Running external tools.
//!
//! stdout and stderr are merged line by line in arrival order, decoded lossily,
//! and returned together with the exit code. A non-zero exit is a normal result.
//! Only a failed launch or a cancellation is an error.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, watch};

use crate::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
    pub directory: Option<PathBuf>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            directory: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = Some(directory.into());
        self
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessResult {
    pub exit_code: i32,
    /// stdout and stderr, merged line by line in arrival order. Line terminators are kept.
    pub output: String,
}

impl ProcessResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("I/O error while running tool: {0}")]
    Io(#[from] std::io::Error),
    #[error("cancelled")]
    Cancelled,
}

/// Receiving side of a cancellation signal. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CancelToken(watch::Receiver<bool>);

/// Sending side of a cancellation signal.
#[derive(Debug)]
pub struct CancelHandle(watch::Sender<bool>);

pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle(tx), CancelToken(rx))
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }

    pub fn token(&self) -> CancelToken {
        CancelToken(self.0.subscribe())
    }
}

impl CancelToken {
    /// A token nobody can cancel.
    pub fn never() -> Self {
        cancel_pair().1
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once cancelled. Pends forever if the handle is gone.
    pub async fn cancelled(&self) {
        let mut rx = self.0.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, command: &ToolCommand, cancel: &CancelToken) -> Result<ProcessResult, ProcessError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcessRunner;

#[async_trait]
impl ProcessRunner for SystemProcessRunner {
    async fn run(&self, tool: &ToolCommand, cancel: &CancelToken) -> Result<ProcessResult, ProcessError> {
        if cancel.is_cancelled() {
            return Err(ProcessError::Cancelled);
        }
        if debug::is_debug() {
            log::info!("$ {tool}");
        } else {
            log::debug!("$ {tool}");
        }

        let mut command = Command::new(&tool.program);
        command
            .args(&tool.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(directory) = &tool.directory {
            command.current_dir(directory);
        }

        let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
            program: tool.program.clone(),
            source,
        })?;

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, tx.clone()));
        }
        drop(tx);

        let status = tokio::select! {
            status = child.wait() => status?,
            _ = cancel.cancelled() => {
                if let Err(e) = child.kill().await {
                    log::warn!("Failed to kill {}: {}", tool.program, e);
                }
                return Err(ProcessError::Cancelled);
            }
        };

        let mut output = String::new();
        let mut lines = 0;
        while let Some(line) = rx.recv().await {
            output.push_str(&line);
            lines += 1;
        }

        let exit_code = status.code().unwrap_or(-1);
        log::debug!("{} exited with {} ({} lines)", tool.program, exit_code, lines);
        Ok(ProcessResult { exit_code, output })
    }
}

/// Forward each line of `reader`, terminator included, until EOF.
async fn forward_lines<R: AsyncRead + Unpin>(reader: R, tx: mpsc::UnboundedSender<String>) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                if tx.send(String::from_utf8_lossy(&buf).into_owned()).is_err() {
                    break;
                }
            }
            Err(e) => {
                log::warn!("Error reading tool output: {e}");
                break;
            }
        }
    }
}
