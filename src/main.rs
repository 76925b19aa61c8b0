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

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use kexplorer::code::{Code, CodeStyle};
use kexplorer::config::{PipelineConfig, View, Views};
use kexplorer::debug;
use kexplorer::model::CodeContent;
use kexplorer::pipeline::{Pipeline, PipelineEvent};
use kexplorer::process::{cancel_pair, CancelHandle, SystemProcessRunner};
use kexplorer::protocol::{wrap_event_as_notification, ExplorerEvent};
use kexplorer::toolchain::ToolPaths;
use kexplorer::transport;

#[derive(Parser, Debug)]
#[command(name = "kexplorer", version, about = "Compile Kotlin and read its bytecode, DEX and native code")]
struct Cli {
    /// JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Android SDK root (default: $ANDROID_HOME)
    #[arg(long, global = true)]
    android_home: Option<PathBuf>,

    /// Kotlin compiler root (default: $KOTLIN_HOME)
    #[arg(long, global = true)]
    kotlin_home: Option<PathBuf>,

    /// Enable debug output
    #[arg(short = 'd', long = "debug", global = true, default_value_t = false)]
    debug: bool,

    /// Write events as framed JSON-RPC notifications on stdout
    #[arg(long, global = true, default_value_t = false)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile and print every computed view
    Disassemble(DisassembleArgs),
    /// Compile and run `main` on the host JVM
    Run(SourceArgs),
    /// Disassemble again whenever the source changes
    Watch(DisassembleArgs),
}

#[derive(Args, Debug)]
struct SourceArgs {
    /// Kotlin source file
    source: PathBuf,

    /// Build directory (default: a fresh temporary directory)
    #[arg(long)]
    scratch_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct DisassembleArgs {
    #[command(flatten)]
    source: SourceArgs,

    /// Use D8 instead of R8
    #[arg(long)]
    no_optimize: bool,

    /// Only keep `@Keep` annotated code when optimizing
    #[arg(long)]
    keep_annotated: bool,

    #[arg(long)]
    min_api: Option<u32>,

    /// Views to compute, e.g. `--views dex,oat`
    #[arg(long, value_enum, value_delimiter = ',')]
    views: Vec<View>,

    #[arg(long)]
    no_line_numbers: bool,
}

impl DisassembleArgs {
    fn apply(&self, config: &mut PipelineConfig) {
        if self.no_optimize {
            config.optimize = false;
        }
        if self.keep_annotated {
            config.keep_everything = false;
        }
        if let Some(min_api) = self.min_api {
            config.min_api_level = min_api;
        }
        if !self.views.is_empty() {
            config.views = Views::only(&self.views);
            config.decompile_hidden_isa = false;
        }
        if self.no_line_numbers {
            config.style.show_line_numbers = false;
        }
    }
}

/// Prints pipeline events for a terminal or a frontend.
struct Output {
    json: bool,
    style: CodeStyle,
}

impl Output {
    fn emit(&self, event: &PipelineEvent) {
        if self.json {
            let notification = wrap_event_as_notification(&ExplorerEvent::from_pipeline(event, &self.style));
            if let Err(e) = transport::write_json_locked(&notification) {
                log::error!("Failed to write event: {e}");
            }
            return;
        }
        match event {
            PipelineEvent::Status { message, fraction } => {
                if !message.is_empty() {
                    eprintln!("[{:>3}%] {}", (fraction * 100.0).round() as u32, message);
                }
            }
            PipelineEvent::Log { text, is_error } => {
                let text = text.trim_end_matches(['\r', '\n']);
                if text.is_empty() {
                    return;
                }
                if *is_error {
                    eprintln!("{text}");
                } else {
                    println!("{text}");
                }
            }
            PipelineEvent::Content { view, content } => match content {
                CodeContent::Success(classes) => {
                    println!("=== {} ===", view.title());
                    print!("{}", Code::from_classes(classes, &self.style).text());
                }
                CodeContent::Error(message) => {
                    println!("=== {} ===", view.title());
                    println!("{message}");
                }
                CodeContent::Empty => {}
            },
        }
    }
}

/// Drain events of one run until it ends. Ctrl-C cancels the run.
/// Returns true when the final status is not an error.
async fn drive(
    run: impl Future<Output = ()>,
    mut events: mpsc::UnboundedReceiver<PipelineEvent>,
    cancel: CancelHandle,
    output: &Output,
) -> bool {
    tokio::pin!(run);
    let mut running = true;
    let mut last_status = String::new();
    loop {
        tokio::select! {
            _ = &mut run, if running => {
                running = false;
            }
            event = events.recv() => match event {
                Some(event) => {
                    if let PipelineEvent::Status { message, .. } = &event {
                        if !message.is_empty() {
                            last_status = message.clone();
                        }
                    }
                    output.emit(&event);
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c(), if running => {
                log::info!("Cancelling…");
                cancel.cancel();
            }
        }
    }
    !last_status.starts_with("Error")
}

async fn disassemble(pipeline: &Pipeline, source_path: &Path, output: &Output) -> Result<bool> {
    let source = std::fs::read_to_string(source_path)
        .with_context(|| format!("failed to read {}", source_path.display()))?;
    let (tx, rx) = mpsc::unbounded_channel();
    let (cancel, token) = cancel_pair();
    Ok(drive(pipeline.build_and_disassemble(&source, tx, token), rx, cancel, output).await)
}

async fn run(pipeline: &Pipeline, source_path: &Path, output: &Output) -> Result<bool> {
    let source = std::fs::read_to_string(source_path)
        .with_context(|| format!("failed to read {}", source_path.display()))?;
    let (tx, rx) = mpsc::unbounded_channel();
    let (cancel, token) = cancel_pair();
    Ok(drive(pipeline.build_and_run(&source, tx, token), rx, cancel, output).await)
}

/// Forward a watcher event that touches `watched`. Returns true when one was sent.
fn forward_change(res: notify::Result<Event>, watched: &Path, tx: &mpsc::UnboundedSender<()>) -> bool {
    let event = match res {
        Ok(event) => event,
        Err(e) => {
            log::warn!("watch error: {e}");
            return false;
        }
    };
    if !(event.kind.is_modify() || event.kind.is_create()) {
        return false;
    }
    if !event.paths.iter().any(|path| path.file_name() == watched.file_name()) {
        return false;
    }
    if tx.send(()).is_err() {
        log::debug!("Change notification dropped, watch loop has ended");
        return false;
    }
    true
}

async fn watch(pipeline: &Pipeline, source_path: &Path, output: &Output) -> Result<bool> {
    let source_path = kexplorer::utils::canonicalize_dir(source_path);
    let directory = source_path
        .parent()
        .map(Path::to_path_buf)
        .context("source file has no parent directory")?;

    let (tx, mut changes) = mpsc::unbounded_channel::<()>();
    let watched = source_path.clone();
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| {
            forward_change(res, &watched, &tx);
        },
        notify::Config::default(),
    )
    .context("failed to start file watcher")?;
    // Editors often replace the file, so watch its directory.
    watcher
        .watch(&directory, RecursiveMode::NonRecursive)
        .with_context(|| format!("failed to watch {}", directory.display()))?;

    loop {
        disassemble(pipeline, &source_path, output).await?;
        log::info!("Watching {} for changes", source_path.display());
        tokio::select! {
            change = changes.recv() => {
                if change.is_none() {
                    break;
                }
                // Let the editor finish writing, then coalesce the burst.
                tokio::time::sleep(Duration::from_millis(200)).await;
                while changes.try_recv().is_ok() {}
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _logger = debug::init_logging(cli.debug).context("failed to start logging")?;

    let mut config = match &cli.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(home) = &cli.android_home {
        config.android_home = Some(home.clone());
    }
    if let Some(home) = &cli.kotlin_home {
        config.kotlin_home = Some(home.clone());
    }
    let source_args = match &cli.command {
        Command::Disassemble(args) | Command::Watch(args) => {
            args.apply(&mut config);
            &args.source
        }
        Command::Run(args) => args,
    };
    if let Some(dir) = &source_args.scratch_dir {
        config.scratch_dir = Some(dir.clone());
    }

    let paths = ToolPaths::resolve(config.android_home.clone(), config.kotlin_home.clone());
    for tool in paths.missing() {
        log::warn!("Tool not found: {}", tool.display());
    }

    // Held until exit so the temporary scratch directory outlives every run.
    let (scratch_dir, scratch_guard) = match &config.scratch_dir {
        Some(dir) => (dir.clone(), None),
        None => {
            let temp = tempfile::Builder::new()
                .prefix("kotlin-explorer")
                .tempdir()
                .context("failed to create scratch directory")?;
            (temp.path().to_path_buf(), Some(temp))
        }
    };
    log::debug!("Scratch directory: {}", scratch_dir.display());

    let output = Output {
        json: cli.json,
        style: config.style.clone(),
    };
    let pipeline = Pipeline::new(Arc::new(SystemProcessRunner), paths, &scratch_dir, config);

    let ok = match &cli.command {
        Command::Disassemble(args) => disassemble(&pipeline, &args.source.source, &output).await?,
        Command::Run(args) => run(&pipeline, &args.source, &output).await?,
        Command::Watch(args) => watch(&pipeline, &args.source.source, &output).await?,
    };
    if !ok {
        drop(scratch_guard);
        std::process::exit(1);
    }
    Ok(())
}
