use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use kexplorer::config::Views;
use kexplorer::process::{ProcessError, ProcessResult};
use kexplorer::toolchain::ToolPaths;
use kexplorer::{
    cancel_pair, CancelToken, Code, CodeContent, CodeStyle, Pipeline, PipelineConfig, PipelineEvent, ProcessRunner,
    ToolCommand, View,
};

const SOURCE: &str = "fun square(a: Int): Int {\n    return a * a\n}\n";

const JAVAP: &str = "\
Compiled from \"KotlinExplorer.kt\"
public final class KotlinExplorerKt {
  public static final int square(int);
    Code:
       0: iload_0
       1: iload_0
       2: imul
       3: ireturn
    LineNumberTable:
      line 2: 0
}
";

const DEXDUMP: &str = "\
Processing 'classes.dex'...
Opened 'classes.dex', DEX version '035'
Class #0            -
  Class descriptor  : 'LKotlinExplorerKt;'
  Access flags      : 0x0011 (PUBLIC FINAL)
  Superclass        : 'Ljava/lang/Object;'
  Direct methods    -
    #0              : (in LKotlinExplorerKt;)
      name          : 'square'
      type          : '(I)I'
      access        : 0x0019 (PUBLIC STATIC FINAL)
      code          -
      registers     : 2
      ins           : 1
      outs          : 0
      insns size    : 3 16-bit code units
000150:                                        |[000150] KotlinExplorerKt.square:(I)I
000160: 9200 0101                              |0000: mul-int v0, v1, v1
000164: 0f00                                   |0002: return v0
      catches       : (none)
      positions     :
        0x0000 line=2
      locals        :

  Virtual methods   -
  source_file_idx   : 3 (KotlinExplorer.kt)
";

const OATDUMP: &str = "\
MAGIC:
oat
INSTRUCTION SET:
Arm64

OatDexFile:
location: /sdcard/classes.dex
0: LKotlinExplorerKt; (offset=0x000005f0) (type_idx=1) (Initialized) (OatClassAllCompiled)
  0: int KotlinExplorerKt.square(int) (dex_method_idx=1)
    DEX CODE:
      0x0000: 9200 0101                	| mul-int v0, v1, v1
      0x0002: 0f00                     	| return v0
    CODE: (code_offset=0x00001010 size=8)...
      0x00001010: 1b017c20	mul w0, w1, w1
      0x00001014: d65f03c0	ret
";

/// Stands in for the Kotlin and Android tools. Records every command it runs.
#[derive(Default)]
struct ScriptedRunner {
    commands: Mutex<Vec<ToolCommand>>,
    compile_error: Option<&'static str>,
    /// Any command line containing this exits with 1.
    fail_on: Option<&'static str>,
    javap_delay: Option<Duration>,
    /// javap only returns once the run is cancelled.
    javap_hangs: bool,
}

impl ScriptedRunner {
    fn failing_compile(message: &'static str) -> Self {
        Self {
            compile_error: Some(message),
            ..Self::default()
        }
    }

    fn failing_on(needle: &'static str) -> Self {
        Self {
            fail_on: Some(needle),
            javap_delay: Some(Duration::from_millis(200)),
            ..Self::default()
        }
    }

    fn ran(&self, needle: &str) -> bool {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .any(|command| command.to_string().contains(needle))
    }

    fn output(exit_code: i32, output: &str) -> Result<ProcessResult, ProcessError> {
        Ok(ProcessResult {
            exit_code,
            output: output.to_string(),
        })
    }
}

#[async_trait]
impl ProcessRunner for ScriptedRunner {
    async fn run(&self, command: &ToolCommand, cancel: &CancelToken) -> Result<ProcessResult, ProcessError> {
        self.commands.lock().unwrap().push(command.clone());
        if cancel.is_cancelled() {
            return Err(ProcessError::Cancelled);
        }
        let line = command.to_string();
        if command.program.ends_with("kotlinc") {
            if let Some(message) = self.compile_error {
                let directory = command.directory.as_deref().unwrap();
                return Self::output(1, &format!("{}/KotlinExplorer.kt:1:5: {message}", directory.display()));
            }
            let directory = command.directory.as_deref().unwrap();
            std::fs::write(directory.join("KotlinExplorerKt.class"), b"\xca\xfe\xba\xbe").unwrap();
            return Self::output(0, "");
        }
        if let Some(needle) = self.fail_on {
            if line.contains(needle) {
                return Self::output(1, &format!("{needle} failed"));
            }
        }
        if command.program == "javap" {
            if self.javap_hangs {
                cancel.cancelled().await;
                return Err(ProcessError::Cancelled);
            }
            if let Some(delay) = self.javap_delay {
                tokio::time::sleep(delay).await;
            }
            return Self::output(0, JAVAP);
        }
        if command.program.ends_with("dexdump") {
            return Self::output(0, DEXDUMP);
        }
        if line.contains("com.android.tools.r8") {
            return Self::output(0, "");
        }
        if line.contains("oatdump") {
            return Self::output(0, OATDUMP);
        }
        if line.contains(" push ") || line.contains("dex2oat") {
            return Self::output(0, "");
        }
        if line.ends_with("KotlinExplorerKt") {
            return Self::output(0, "Hello, Kotlin!\n");
        }
        Self::output(127, &format!("unexpected command: {line}"))
    }
}

fn pipeline(runner: Arc<ScriptedRunner>, directory: &Path, config: PipelineConfig) -> Pipeline {
    let paths = ToolPaths::new(directory.join("android"), directory.join("kotlin"));
    Pipeline::new(runner, paths, &directory.join("scratch"), config)
}

async fn collect(run: impl std::future::Future<Output = ()>, mut rx: mpsc::UnboundedReceiver<PipelineEvent>) -> Vec<PipelineEvent> {
    run.await;
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

async fn disassemble(runner: Arc<ScriptedRunner>, config: PipelineConfig, cancel: CancelToken) -> Vec<PipelineEvent> {
    let root = tempfile::tempdir().unwrap();
    let pipeline = pipeline(runner, root.path(), config);
    let (tx, rx) = mpsc::unbounded_channel();
    collect(pipeline.build_and_disassemble(SOURCE, tx, cancel), rx).await
}

fn statuses(events: &[PipelineEvent]) -> Vec<(String, f32)> {
    events
        .iter()
        .filter_map(|event| match event {
            PipelineEvent::Status { message, fraction } => Some((message.clone(), *fraction)),
            _ => None,
        })
        .collect()
}

/// Progress never goes back, and the run ends on `expected` at 1.0.
fn assert_ends_with(events: &[PipelineEvent], expected: &str) {
    let statuses = statuses(events);
    assert!(statuses.windows(2).all(|pair| pair[0].1 <= pair[1].1), "{statuses:?}");
    assert_eq!(statuses.last().unwrap(), &(expected.to_string(), 1.0), "{statuses:?}");
}

fn contents(events: &[PipelineEvent]) -> Vec<(View, CodeContent)> {
    events
        .iter()
        .filter_map(|event| match event {
            PipelineEvent::Content { view, content } => Some((*view, content.clone())),
            _ => None,
        })
        .collect()
}

fn content_of(events: &[PipelineEvent], view: View) -> CodeContent {
    let matching: Vec<CodeContent> = contents(events)
        .into_iter()
        .filter(|(v, _)| *v == view)
        .map(|(_, content)| content)
        .collect();
    assert_eq!(matching.len(), 1, "{view:?} must get exactly one content event");
    matching.into_iter().next().unwrap()
}

#[tokio::test]
async fn disassembles_all_views() {
    let runner = Arc::new(ScriptedRunner::default());
    let events = disassemble(runner.clone(), PipelineConfig::default(), CancelToken::never()).await;

    for view in View::ALL {
        let CodeContent::Success(classes) = content_of(&events, view) else {
            panic!("{view:?} did not succeed");
        };
        assert_eq!(classes.len(), 1);
        assert_eq!(classes[0].methods.len(), 1);
        assert!(!classes[0].methods[0].instruction_set.instructions.is_empty());
        let code = Code::from_classes(&classes, &CodeStyle::default());
        assert!(code.jumps().is_empty(), "{view:?} has no branches");
        assert!(code.text().contains("square"));
    }

    let statuses = statuses(&events);
    assert_eq!(statuses.first().unwrap().0, "Compiling and disassembling…");
    assert!(statuses.windows(2).all(|pair| pair[0].1 <= pair[1].1), "{statuses:?}");
    assert_eq!(statuses.last().unwrap(), &("Ready".to_string(), 1.0));
    assert!(statuses.iter().any(|(message, _)| message == "Optimized DEX with R8"));

    assert!(runner.ran("com.android.tools.r8.R8"));
    assert!(runner.ran("oatdump"));
}

#[tokio::test]
async fn writes_r8_rules_before_dexing() {
    let root = tempfile::tempdir().unwrap();
    let config = PipelineConfig {
        r8_rules: "-keep class Extra".to_string(),
        ..PipelineConfig::default()
    };
    let pipeline = pipeline(Arc::new(ScriptedRunner::default()), root.path(), config);
    let (tx, rx) = mpsc::unbounded_channel();
    collect(pipeline.build_and_disassemble(SOURCE, tx, CancelToken::never()), rx).await;

    let rules = std::fs::read_to_string(pipeline.directory().join("rules.txt")).unwrap();
    assert!(rules.contains("-dontobfuscate"));
    assert!(rules.ends_with("-keep class Extra"));
    assert!(pipeline.directory().join("Keep.kt").exists());
}

#[tokio::test]
async fn compile_error_ends_the_run() {
    let runner = Arc::new(ScriptedRunner::failing_compile("error: unresolved reference 'sqaure'."));
    let events = disassemble(runner.clone(), PipelineConfig::default(), CancelToken::never()).await;

    let statuses = statuses(&events);
    assert_eq!(statuses.last().unwrap(), &("Error compiling Kotlin".to_string(), 1.0));

    let errors: Vec<&String> = events
        .iter()
        .filter_map(|event| match event {
            PipelineEvent::Log { text, is_error: true } => Some(text),
            _ => None,
        })
        .collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0], "KotlinExplorer.kt:1:5: error: unresolved reference 'sqaure'.");

    for view in View::ALL {
        assert_eq!(content_of(&events, view), CodeContent::Empty);
    }
    assert!(!runner.ran("javap"));
    assert!(!runner.ran("com.android.tools.r8"));
}

#[tokio::test]
async fn skips_views_that_are_not_computed() {
    let runner = Arc::new(ScriptedRunner::default());
    let config = PipelineConfig {
        optimize: false,
        views: Views::only(&[View::Dex]),
        decompile_hidden_isa: false,
        ..PipelineConfig::default()
    };
    let events = disassemble(runner.clone(), config, CancelToken::never()).await;

    let delivered = contents(&events);
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].0, View::Dex);
    assert!(matches!(delivered[0].1, CodeContent::Success(_)));

    let statuses = statuses(&events);
    assert!(statuses.iter().any(|(message, _)| message == "Compiled DEX with D8"));
    assert_eq!(statuses.last().unwrap(), &("Ready".to_string(), 1.0));

    assert!(runner.ran("com.android.tools.r8.D8"));
    assert!(!runner.ran("javap"));
    assert!(!runner.ran("dex2oat"));
    assert!(!runner.ran("oatdump"));
}

#[tokio::test]
async fn cancellation_reports_and_fills_views() {
    let (handle, token) = cancel_pair();
    handle.cancel();
    let events = disassemble(Arc::new(ScriptedRunner::default()), PipelineConfig::default(), token).await;

    let statuses = statuses(&events);
    assert_eq!(statuses.last().unwrap(), &("Error: cancelled".to_string(), 1.0));
    for view in View::ALL {
        assert_eq!(content_of(&events, view), CodeContent::Empty);
    }
}

#[tokio::test]
async fn builds_and_runs() {
    let root = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::default());
    let pipeline = pipeline(runner.clone(), root.path(), PipelineConfig::default());
    let (tx, rx) = mpsc::unbounded_channel();
    let events = collect(pipeline.build_and_run(SOURCE, tx, CancelToken::never()), rx).await;

    assert!(events.contains(&PipelineEvent::Log {
        text: "Hello, Kotlin!\n".to_string(),
        is_error: false,
    }));
    let statuses = statuses(&events);
    assert_eq!(statuses[0], ("Compiling Kotlin…".to_string(), 0.0));
    assert_eq!(statuses.last().unwrap(), &("Run completed".to_string(), 1.0));
    assert!(contents(&events).is_empty());
    assert!(!runner.ran("dexdump"));
}

#[tokio::test]
async fn disassembles_square_with_d8() {
    let runner = Arc::new(ScriptedRunner::default());
    let config = PipelineConfig {
        optimize: false,
        ..PipelineConfig::default()
    };
    let events = disassemble(runner.clone(), config, CancelToken::never()).await;

    for view in View::ALL {
        let CodeContent::Success(classes) = content_of(&events, view) else {
            panic!("{view:?} did not succeed");
        };
        assert_eq!(classes.len(), 1);
        assert_eq!(classes[0].methods.len(), 1);
        assert!(Code::from_classes(&classes, &CodeStyle::default()).jumps().is_empty());
    }
    assert_ends_with(&events, "Ready");
    assert!(statuses(&events).iter().any(|(message, _)| message == "Compiled DEX with D8"));

    let commands = runner.commands.lock().unwrap();
    let d8 = commands
        .iter()
        .find(|command| command.args.iter().any(|arg| arg == "com.android.tools.r8.D8"))
        .expect("D8 was run");
    assert!(!d8.args.iter().any(|arg| arg == "--pg-conf"));
    assert!(d8.args.iter().any(|arg| arg.ends_with("kotlin-stdlib.jar")));
    assert!(d8.args.iter().any(|arg| arg == "KotlinExplorerKt.class"));
}

#[tokio::test]
async fn failures_after_compiling_end_the_run_last() {
    let cases = [
        ("com.android.tools.r8", "Error creating DEX"),
        (" push ", "Error pushing code to device"),
        ("dex2oat", "Error compiling OAT"),
        ("shell oatdump", "Error creating oat dump"),
    ];
    for (needle, status) in cases {
        let runner = Arc::new(ScriptedRunner::failing_on(needle));
        let events = disassemble(runner, PipelineConfig::default(), CancelToken::never()).await;

        // javap is slower than the failing stage but still reports first.
        assert_ends_with(&events, status);
        assert!(matches!(content_of(&events, View::ByteCode), CodeContent::Success(_)), "{needle}");
        assert_eq!(content_of(&events, View::Oat), CodeContent::Empty, "{needle}");
        assert!(events.contains(&PipelineEvent::Log {
            text: format!("{needle} failed"),
            is_error: true,
        }));
        let dex = content_of(&events, View::Dex);
        if needle == "com.android.tools.r8" {
            assert_eq!(dex, CodeContent::Empty);
        } else {
            assert!(matches!(dex, CodeContent::Success(_)), "{needle}");
        }
    }
}

#[tokio::test]
async fn forked_stage_failure_still_ends_ready() {
    let runner = Arc::new(ScriptedRunner {
        fail_on: Some("javap"),
        ..ScriptedRunner::default()
    });
    let events = disassemble(runner, PipelineConfig::default(), CancelToken::never()).await;

    assert_ends_with(&events, "Ready");
    assert_eq!(content_of(&events, View::ByteCode), CodeContent::Empty);
    assert!(matches!(content_of(&events, View::Oat), CodeContent::Success(_)));
}

#[tokio::test]
async fn cancel_while_a_forked_stage_runs() {
    let root = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner {
        javap_hangs: true,
        ..ScriptedRunner::default()
    });
    let config = PipelineConfig {
        views: Views::only(&[View::ByteCode]),
        decompile_hidden_isa: false,
        ..PipelineConfig::default()
    };
    let pipeline = pipeline(runner.clone(), root.path(), config);
    let (tx, rx) = mpsc::unbounded_channel();
    let (handle, token) = cancel_pair();

    let (events, ()) = tokio::join!(collect(pipeline.build_and_disassemble(SOURCE, tx, token), rx), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.cancel();
    });

    assert_ends_with(&events, "Error: cancelled");
    assert_eq!(contents(&events), vec![(View::ByteCode, CodeContent::Empty)]);
    assert!(runner.ran("javap"));
    assert!(!runner.ran("dex2oat"));
}
