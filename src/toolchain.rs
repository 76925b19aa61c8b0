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

//! Locations of the Kotlin and Android tools, and the exact command lines the
//! pipeline runs with them.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::config::PipelineConfig;
use crate::process::ToolCommand;

pub const SOURCE_FILE: &str = "KotlinExplorer.kt";
pub const MAIN_CLASS: &str = "KotlinExplorerKt";
pub const DEX_FILE: &str = "classes.dex";
pub const R8_RULES_FILE: &str = "rules.txt";
const DEVICE_DEX: &str = "/sdcard/classes.dex";
const DEVICE_OAT: &str = "/sdcard/classes.oat";

const KEEP_ANNOTATION: (&str, &str) = (
    "Keep.kt",
    r#"import java.lang.annotation.ElementType.ANNOTATION_TYPE
import java.lang.annotation.ElementType.CONSTRUCTOR
import java.lang.annotation.ElementType.FIELD
import java.lang.annotation.ElementType.METHOD
import java.lang.annotation.ElementType.PACKAGE
import java.lang.annotation.ElementType.TYPE

@Retention(AnnotationRetention.BINARY)
@Target(
    AnnotationTarget.FILE,
    AnnotationTarget.ANNOTATION_CLASS,
    AnnotationTarget.CLASS,
    AnnotationTarget.CONSTRUCTOR,
    AnnotationTarget.FUNCTION,
    AnnotationTarget.PROPERTY_GETTER,
    AnnotationTarget.PROPERTY_SETTER,
    AnnotationTarget.FIELD
)
@Suppress("DEPRECATED_JAVA_ANNOTATION", "SupportAnnotationUsage")
@java.lang.annotation.Target(PACKAGE, TYPE, ANNOTATION_TYPE, CONSTRUCTOR, METHOD, FIELD)
public annotation class Keep
"#,
);

const NEVER_INLINE_ANNOTATION: (&str, &str) = (
    "NeverInline.kt",
    r#"@file:OptIn(ExperimentalMultiplatform::class)

package dalvik.annotation.optimization

@Retention(AnnotationRetention.BINARY)
@Target(AnnotationTarget.CONSTRUCTOR, AnnotationTarget.FUNCTION)
public annotation class NeverInline()
"#,
);

pub const SUPPORT_FILES: [(&str, &str); 2] = [KEEP_ANNOTATION, NEVER_INLINE_ANNOTATION];

const KOTLIN_ONLY_FLAGS: [&str; 3] = [
    "-Xno-param-assertions",
    "-Xno-call-assertions",
    "-Xno-receiver-assertions",
];

fn path_separator() -> &'static str {
    if cfg!(windows) {
        ";"
    } else {
        ":"
    }
}

fn executable(name: &str) -> String {
    if cfg!(windows) {
        format!("{name}.exe")
    } else {
        name.to_string()
    }
}

/// Newest entry of a versioned directory such as `build-tools/`.
fn latest_child(directory: &Path) -> Option<PathBuf> {
    let mut children: Vec<PathBuf> = fs::read_dir(directory)
        .ok()?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| path.is_dir())
        .collect();
    children.sort();
    children.pop()
}

fn display(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    pub android_home: PathBuf,
    pub kotlin_home: PathBuf,
    pub adb: PathBuf,
    pub d8: PathBuf,
    pub dexdump: PathBuf,
    pub platform: PathBuf,
    pub kotlinc: PathBuf,
    pub kotlin_libs: Vec<PathBuf>,
}

impl ToolPaths {
    pub fn new(android_home: impl Into<PathBuf>, kotlin_home: impl Into<PathBuf>) -> Self {
        let android_home = android_home.into();
        let kotlin_home = kotlin_home.into();

        let build_tools = latest_child(&android_home.join("build-tools")).unwrap_or_else(|| android_home.clone());
        let platforms = latest_child(&android_home.join("platforms")).unwrap_or_else(|| android_home.clone());

        let lib = kotlin_home.join("lib");
        let annotations = fs::read_dir(&lib)
            .ok()
            .and_then(|entries| {
                let mut jars: Vec<PathBuf> = entries
                    .filter_map(|entry| entry.ok().map(|entry| entry.path()))
                    .filter(|path| {
                        let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
                        name.starts_with("annotations-") && name.ends_with(".jar")
                    })
                    .collect();
                jars.sort();
                jars.into_iter().next()
            })
            .unwrap_or_else(|| lib.join("annotations.jar"));

        Self {
            adb: android_home.join("platform-tools").join(executable("adb")),
            d8: build_tools.join("lib").join("d8.jar"),
            dexdump: build_tools.join(executable("dexdump")),
            platform: platforms.join("android.jar"),
            kotlinc: kotlin_home.join("bin").join("kotlinc"),
            kotlin_libs: vec![
                lib.join("kotlin-stdlib-jdk8.jar"),
                lib.join("kotlin-stdlib.jar"),
                lib.join("kotlin-annotations-jvm.jar"),
                lib.join("kotlinx-coroutines-core-jvm.jar"),
                annotations,
            ],
            android_home,
            kotlin_home,
        }
    }

    /// Explicit paths win, then `ANDROID_HOME`/`KOTLIN_HOME`, then the home directory.
    pub fn resolve(android_home: Option<PathBuf>, kotlin_home: Option<PathBuf>) -> Self {
        let fallback = || {
            std::env::var_os("HOME")
                .or_else(|| std::env::var_os("USERPROFILE"))
                .map(PathBuf::from)
                .unwrap_or_default()
        };
        let android_home = android_home
            .or_else(|| std::env::var_os("ANDROID_HOME").map(PathBuf::from))
            .unwrap_or_else(fallback);
        let kotlin_home = kotlin_home
            .or_else(|| std::env::var_os("KOTLIN_HOME").map(PathBuf::from))
            .unwrap_or_else(fallback);
        Self::new(android_home, kotlin_home)
    }

    /// Tools that are required but missing on disk.
    pub fn missing(&self) -> Vec<&Path> {
        [&self.adb, &self.d8, &self.dexdump, &self.kotlinc]
            .into_iter()
            .filter(|path| !path.exists())
            .map(PathBuf::as_path)
            .collect()
    }

    pub fn is_valid(&self) -> bool {
        self.missing().is_empty()
    }

    fn classpath(&self) -> String {
        self.kotlin_libs
            .iter()
            .chain(std::iter::once(&self.platform))
            .map(|path| display(path))
            .collect::<Vec<_>>()
            .join(path_separator())
    }
}

/// Command lines for one scratch directory.
pub struct Toolchain<'a> {
    paths: &'a ToolPaths,
    directory: &'a Path,
}

impl<'a> Toolchain<'a> {
    pub fn new(paths: &'a ToolPaths, directory: &'a Path) -> Self {
        Self { paths, directory }
    }

    fn command(&self, program: impl Into<String>) -> ToolCommand {
        ToolCommand::new(program).current_dir(self.directory)
    }

    fn adb(&self) -> ToolCommand {
        self.command(display(&self.paths.adb))
    }

    pub fn kotlinc(&self, config: &PipelineConfig) -> ToolCommand {
        let mut command = self
            .command(display(&self.paths.kotlinc))
            .arg("-Xmulti-platform")
            .arg("-classpath")
            .arg(self.paths.classpath());
        if config.kotlin_only_consumers {
            command = command.args(KOTLIN_ONLY_FLAGS);
        }
        command = command.args(config.compiler_flags.split_whitespace());
        command = command.arg(display(&self.directory.join(SOURCE_FILE)));
        for (name, _) in SUPPORT_FILES {
            command = command.arg(display(&self.directory.join(name)));
        }
        command
    }

    pub fn javap(&self, class_files: &[String]) -> ToolCommand {
        self.command("javap").args(["-p", "-l", "-c"]).args(class_files.iter().cloned())
    }

    /// D8, or R8 with `rules.txt` when optimizing.
    pub fn dex(&self, config: &PipelineConfig, class_files: &[String]) -> ToolCommand {
        let main_class = if config.optimize {
            "com.android.tools.r8.R8"
        } else {
            "com.android.tools.r8.D8"
        };
        let mut command = self
            .command("java")
            .arg("-classpath")
            .arg(display(&self.paths.d8))
            .arg(main_class)
            .arg("--min-api")
            .arg(config.min_api_level.to_string());
        if config.optimize {
            command = command.arg("--pg-conf").arg(R8_RULES_FILE);
        }
        command = command
            .arg("--output")
            .arg(".")
            .arg("--lib")
            .arg(display(&self.paths.platform));
        if !config.optimize {
            for lib in &self.paths.kotlin_libs {
                command = command.arg("--lib").arg(display(lib));
            }
        }
        command = command.args(class_files.iter().cloned());
        if config.optimize {
            command = command.args(self.paths.kotlin_libs.iter().map(|lib| display(lib)));
        }
        command
    }

    pub fn dexdump(&self) -> ToolCommand {
        self.command(display(&self.paths.dexdump)).arg("-d").arg(DEX_FILE)
    }

    pub fn push_dex(&self) -> ToolCommand {
        self.adb().args(["push", DEX_FILE, DEVICE_DEX])
    }

    pub fn dex2oat(&self) -> ToolCommand {
        self.adb().args([
            "shell".to_string(),
            "dex2oat".to_string(),
            format!("--dex-file={DEVICE_DEX}"),
            format!("--oat-file={DEVICE_OAT}"),
        ])
    }

    pub fn oatdump(&self) -> ToolCommand {
        self.adb()
            .args(["shell".to_string(), "oatdump".to_string(), format!("--oat-file={DEVICE_OAT}")])
    }

    pub fn java_run(&self) -> ToolCommand {
        let classpath = format!("{}{}.", self.paths.classpath(), path_separator());
        self.command("java").arg("-classpath").arg(classpath).arg(MAIN_CLASS)
    }
}

/// R8 configuration matching the SDK's `proguard-android-optimize.txt`.
pub fn r8_rules(keep_everything: bool, extra_rules: &str) -> String {
    let mut rules = String::from(
        "-optimizations !code/simplification/arithmetic,!code/simplification/cast,!field/*,!class/merging/*
-optimizationpasses 5
-allowaccessmodification
-dontpreverify
-dontobfuscate
",
    );
    if keep_everything {
        rules.push_str(
            "-keep,allowoptimization class !kotlin.**,!kotlinx.** {
    <methods>;
}
",
        );
    } else {
        rules.push_str(
            "-keep,allowobfuscation @interface Keep
-keep @Keep class * {*;}
-keepclasseswithmembers class * {
    @Keep <methods>;
}
-keepclasseswithmembers class * {
    @Keep <fields>;
}
-keepclasseswithmembers class * {
    @Keep <init>(...);
}
",
        );
    }
    rules.push_str(extra_rules);
    rules
}

/// Remove build artifacts of a previous run. Sources are left alone.
pub fn clean_scratch(directory: &Path) -> io::Result<()> {
    for entry in fs::read_dir(directory)? {
        let path = entry?.path();
        if path.is_dir() {
            fs::remove_dir_all(&path)?;
        } else if matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("class" | "dex" | "oat")
        ) {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

/// Write the user source and the annotation shims it may reference.
pub fn write_sources(directory: &Path, source: &str) -> io::Result<()> {
    fs::write(directory.join(SOURCE_FILE), source)?;
    for (name, content) in SUPPORT_FILES {
        fs::write(directory.join(name), content)?;
    }
    Ok(())
}

/// Compiled class files, relative to `directory`, without `META-INF`.
pub fn class_files(directory: &Path) -> Vec<String> {
    let mut files: Vec<String> = WalkDir::new(directory)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let relative = entry.path().strip_prefix(directory).ok()?;
            let in_meta_inf = relative
                .components()
                .next()
                .is_some_and(|first| first.as_os_str() == "META-INF");
            let is_class = relative.extension().is_some_and(|e| e == "class");
            (is_class && !in_meta_inf).then(|| display(relative))
        })
        .collect();
    files.sort();
    files
}
