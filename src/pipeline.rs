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

//! Compile, disassemble and parse one Kotlin source.
//!
//! Stages run in order and each is gated on the previous exit code:
//!
//! 1. kotlinc on the source plus the annotation shims
//! 2. javap, forked, runs alongside stage 3
//! 3. D8 or R8 to `classes.dex`
//! 4. dexdump, forked
//! 5. adb push, dex2oat and oatdump on a device
//!
//! A failing stage ends the run. Its error status is posted at 1.0 once every
//! forked stage has stopped, so it is always the last status. Events reach the
//! caller through an mpsc channel; it drains them on its own task.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use crate::config::{PipelineConfig, View};
use crate::error::PipelineError;
use crate::model::CodeContent;
use crate::parsers::{ByteCodeParser, DexDumpParser, DumpParser, OatDumpParser};
use crate::process::{CancelToken, ProcessError, ProcessResult, ProcessRunner, ToolCommand};
use crate::progress::ProgressTracker;
use crate::toolchain::{self, ToolPaths, Toolchain};
use crate::utils::{canonicalize_dir, strip_directory_prefix};

const DISASSEMBLY_STEPS: u32 = 7;
const RUN_STEPS: u32 = 2;

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    Status { message: String, fraction: f32 },
    Log { text: String, is_error: bool },
    Content { view: View, content: CodeContent },
}

/// Cloneable sending side for one run. Remembers which views got content.
#[derive(Clone)]
struct EventSink {
    tx: UnboundedSender<PipelineEvent>,
    delivered: Arc<Mutex<HashSet<View>>>,
}

impl EventSink {
    fn new(tx: UnboundedSender<PipelineEvent>) -> Self {
        Self {
            tx,
            delivered: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    fn send(&self, event: PipelineEvent) {
        if self.tx.send(event).is_err() {
            log::debug!("Pipeline event dropped, receiver is gone");
        }
    }

    fn status(&self, message: &str, fraction: f32) {
        self.send(PipelineEvent::Status {
            message: message.to_string(),
            fraction,
        });
    }

    fn log(&self, text: &str) {
        self.send(PipelineEvent::Log {
            text: text.to_string(),
            is_error: false,
        });
    }

    fn error(&self, text: &str) {
        log::debug!("Tool error output:\n{text}");
        self.send(PipelineEvent::Log {
            text: text.to_string(),
            is_error: true,
        });
    }

    fn content(&self, view: View, content: CodeContent) {
        let first = self
            .delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(view);
        if first {
            self.send(PipelineEvent::Content { view, content });
        } else {
            log::warn!("Duplicate content for {view:?} ignored");
        }
    }

    /// `Empty` for every view in `views` that received nothing this run.
    fn fill_empty(&self, views: &[View]) {
        for view in views {
            self.content(*view, CodeContent::Empty);
        }
    }

    fn tracker(&self, steps: u32) -> Arc<ProgressTracker> {
        let sink = self.clone();
        Arc::new(ProgressTracker::new(steps, move |message, fraction| {
            sink.status(message, fraction)
        }))
    }
}

/// Run a stage's tool. A launch failure counts as a failed stage, not an error.
async fn run_tool(
    runner: &dyn ProcessRunner,
    command: &ToolCommand,
    cancel: &CancelToken,
) -> Result<ProcessResult, PipelineError> {
    match runner.run(command, cancel).await {
        Ok(result) => Ok(result),
        Err(ProcessError::Cancelled) => Err(ProcessError::Cancelled.into()),
        Err(e) => Ok(ProcessResult {
            exit_code: -1,
            output: e.to_string(),
        }),
    }
}

async fn parse_off_thread<P>(parser: P, text: String) -> CodeContent
where
    P: DumpParser + Send + 'static,
{
    match tokio::task::spawn_blocking(move || parser.parse(&text)).await {
        Ok(content) => content,
        Err(e) => CodeContent::Error(format!("Parser task failed: {e}")),
    }
}

/// A forked dump stage: run the tool, parse its output, advance once.
struct DumpStage<P> {
    command: ToolCommand,
    view: View,
    parser: P,
    done: &'static str,
    failed: &'static str,
}

impl<P: DumpParser + Send + 'static> DumpStage<P> {
    fn spawn(
        self,
        runner: Arc<dyn ProcessRunner>,
        sink: &EventSink,
        tracker: &Arc<ProgressTracker>,
        cancel: &CancelToken,
    ) -> JoinHandle<()> {
        let sink = sink.clone();
        let tracker = tracker.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let Ok(result) = run_tool(runner.as_ref(), &self.command, &cancel).await else {
                return;
            };
            let status = if result.success() {
                sink.content(self.view, parse_off_thread(self.parser, result.output).await);
                self.done
            } else {
                sink.error(&result.output);
                self.failed
            };
            tracker.advance(status, 1);
        })
    }
}

pub struct Pipeline {
    runner: Arc<dyn ProcessRunner>,
    paths: ToolPaths,
    directory: PathBuf,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(runner: Arc<dyn ProcessRunner>, paths: ToolPaths, directory: &Path, config: PipelineConfig) -> Self {
        Self {
            runner,
            paths,
            directory: canonicalize_dir(directory),
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Compile `source` and produce every computed view.
    ///
    /// Returns once all forked stages are done. The last status is "Ready" or
    /// an error, always at 1.0. Every computed view receives exactly one
    /// `Content` event, `Empty` when its stage never ran.
    pub async fn build_and_disassemble(
        &self,
        source: &str,
        events: UnboundedSender<PipelineEvent>,
        cancel: CancelToken,
    ) {
        let sink = EventSink::new(events);
        let tracker = sink.tracker(DISASSEMBLY_STEPS);
        tracker.update("Compiling and disassembling…");

        let outcome = self.disassemble(source, &sink, &tracker, &cancel).await;
        finish_run(outcome, &sink, &tracker, &cancel).await;
        sink.fill_empty(&self.config.computed_views());
    }

    /// Compile `source` and run its `main` on the host JVM.
    pub async fn build_and_run(&self, source: &str, events: UnboundedSender<PipelineEvent>, cancel: CancelToken) {
        let sink = EventSink::new(events);
        let tracker = sink.tracker(RUN_STEPS);
        tracker.update("Compiling Kotlin…");

        let outcome = self.run(source, &sink, &tracker, &cancel).await;
        finish_run(outcome, &sink, &tracker, &cancel).await;
    }

    fn prepare_scratch(&self, source: &str) -> Result<(), PipelineError> {
        let directory = &self.directory;
        fs::create_dir_all(directory).map_err(PipelineError::scratch(directory))?;
        toolchain::clean_scratch(directory).map_err(PipelineError::scratch(directory))?;
        toolchain::write_sources(directory, source).map_err(PipelineError::scratch(directory))?;
        Ok(())
    }

    async fn compile(
        &self,
        toolchain: &Toolchain<'_>,
        source: &str,
        cancel: &CancelToken,
    ) -> Result<ProcessResult, PipelineError> {
        self.prepare_scratch(source)?;
        let kotlinc = run_tool(self.runner.as_ref(), &toolchain.kotlinc(&self.config), cancel).await?;
        Ok(ProcessResult {
            exit_code: kotlinc.exit_code,
            output: strip_directory_prefix(&kotlinc.output, &self.directory),
        })
    }

    /// Runs the main path and forks the dump stages. Returns the terminal status.
    async fn disassemble(
        &self,
        source: &str,
        sink: &EventSink,
        tracker: &Arc<ProgressTracker>,
        cancel: &CancelToken,
    ) -> Result<&'static str, PipelineError> {
        let toolchain = Toolchain::new(&self.paths, &self.directory);

        let kotlinc = self.compile(&toolchain, source, cancel).await?;
        if !kotlinc.success() {
            sink.error(&kotlinc.output);
            return Ok("Error compiling Kotlin");
        }
        tracker.advance("Kotlin compiled", 1);

        let class_files = toolchain::class_files(&self.directory);
        log::debug!("Compiled classes: {class_files:?}");

        if self.config.computes(View::ByteCode) {
            let stage = DumpStage {
                command: toolchain.javap(&class_files),
                view: View::ByteCode,
                parser: ByteCodeParser,
                done: "Disassembled Java ByteCode",
                failed: "Error Disassembling Java ByteCode",
            };
            tracker.track_task(stage.spawn(self.runner.clone(), sink, tracker, cancel));
        } else {
            tracker.advance("", 1);
        }

        let rules = toolchain::r8_rules(self.config.keep_everything, &self.config.r8_rules);
        let rules_path = self.directory.join(toolchain::R8_RULES_FILE);
        fs::write(&rules_path, rules).map_err(PipelineError::scratch(&rules_path))?;

        let dex = run_tool(self.runner.as_ref(), &toolchain.dex(&self.config, &class_files), cancel).await?;
        if !dex.success() {
            sink.error(&dex.output);
            return Ok("Error creating DEX");
        }
        tracker.advance(
            if self.config.optimize {
                "Optimized DEX with R8"
            } else {
                "Compiled DEX with D8"
            },
            1,
        );

        if self.config.computes(View::Dex) {
            let stage = DumpStage {
                command: toolchain.dexdump(),
                view: View::Dex,
                parser: DexDumpParser,
                done: "Created DEX dump",
                failed: "Error creating DEX dump",
            };
            tracker.track_task(stage.spawn(self.runner.clone(), sink, tracker, cancel));
        } else {
            tracker.advance("", 1);
        }

        if !self.config.computes(View::Oat) {
            return Ok("Ready");
        }

        let push = run_tool(self.runner.as_ref(), &toolchain.push_dex(), cancel).await?;
        if !push.success() {
            sink.error(&push.output);
            return Ok("Error pushing code to device");
        }
        tracker.advance("Pushed code to device…", 1);

        let dex2oat = run_tool(self.runner.as_ref(), &toolchain.dex2oat(), cancel).await?;
        if !dex2oat.success() {
            sink.error(&dex2oat.output);
            return Ok("Error compiling OAT");
        }
        tracker.advance("Disassembling OAT…", 1);

        let oatdump = run_tool(self.runner.as_ref(), &toolchain.oatdump(), cancel).await?;
        if !oatdump.success() {
            sink.error(&oatdump.output);
            return Ok("Error creating oat dump");
        }
        sink.content(View::Oat, parse_off_thread(OatDumpParser, oatdump.output).await);
        tracker.advance("Created oat dump", 1);
        Ok("Ready")
    }

    async fn run(
        &self,
        source: &str,
        sink: &EventSink,
        tracker: &Arc<ProgressTracker>,
        cancel: &CancelToken,
    ) -> Result<&'static str, PipelineError> {
        let toolchain = Toolchain::new(&self.paths, &self.directory);

        let kotlinc = self.compile(&toolchain, source, cancel).await?;
        if !kotlinc.success() {
            sink.error(&kotlinc.output);
            return Ok("Error compiling Kotlin");
        }
        tracker.advance("Running…", 1);

        let java = run_tool(self.runner.as_ref(), &toolchain.java_run(), cancel).await?;
        sink.log(&java.output);
        Ok(if java.success() {
            "Run completed"
        } else {
            "Error running code"
        })
    }
}

/// Post the terminal status once no forked stage can report after it.
///
/// A cancel seen only by a forked stage still ends the run as cancelled.
async fn finish_run(
    outcome: Result<&'static str, PipelineError>,
    sink: &EventSink,
    tracker: &ProgressTracker,
    cancel: &CancelToken,
) {
    if cancel.is_cancelled() {
        tracker.abort_all();
    }
    tracker.wait_for_tasks().await;
    let outcome = match outcome {
        Ok(_) if cancel.is_cancelled() => Err(ProcessError::Cancelled.into()),
        outcome => outcome,
    };
    match outcome {
        Ok(status) => tracker.skip_to_end(status),
        Err(e) => report_failure(&e, sink, tracker),
    }
    tracker.finish().await;
}

fn report_failure(error: &PipelineError, sink: &EventSink, tracker: &ProgressTracker) {
    if error.is_cancelled() {
        log::info!("Pipeline cancelled");
        tracker.skip_to_end("Error: cancelled");
    } else {
        log::error!("Pipeline failed: {error}");
        sink.error(&error.to_string());
        tracker.skip_to_end(&format!("Error: {error}"));
    }
}
