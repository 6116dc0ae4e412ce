//! Ordered, fail-fast execution of external build tools.
//!
//! Every step logs full invocation provenance before it runs, so the last
//! printed block on a failed run is always the exact command, working
//! directory, and call site that failed. Steps are never retried and side
//! effects are never rolled back; native-toolchain builds are not safely
//! resumable mid-step, so the caller re-runs the whole pipeline.

use crate::builder::env_bridge::EnvironmentSnapshot;
use std::io::Write;
use std::panic::Location;
use std::path::PathBuf;
use std::process::Command;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StepFailure {
    #[error("step `{label}` could not start `{command}`: {source}")]
    Spawn {
        label: String,
        command: String,
        source: std::io::Error,
    },
    #[error("step `{label}` exited with code {code}: {command}")]
    Exit {
        label: String,
        command: String,
        code: i32,
    },
}

/// How the command was specified: an argument vector, or a raw line handed
/// to the platform shell (used for the upstream `patch` invocation).
#[derive(Debug, Clone)]
pub enum StepCommand {
    Args(Vec<String>),
    Shell(String),
}

/// One external invocation: the pipeline's unit of execution and failure.
#[derive(Debug, Clone)]
pub struct Step {
    label: String,
    command: StepCommand,
    cwd: Option<PathBuf>,
    env: Option<EnvironmentSnapshot>,
    caller: &'static Location<'static>,
}

impl Step {
    #[track_caller]
    pub fn args<I>(label: impl Into<String>, argv: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self {
            label: label.into(),
            command: StepCommand::Args(argv.into_iter().map(Into::into).collect()),
            cwd: None,
            env: None,
            caller: Location::caller(),
        }
    }

    #[track_caller]
    pub fn shell(label: impl Into<String>, line: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            command: StepCommand::Shell(line.into()),
            cwd: None,
            env: None,
            caller: Location::caller(),
        }
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Replace the inherited environment wholesale with `env`.
    pub fn with_env(mut self, env: &EnvironmentSnapshot) -> Self {
        self.env = Some(env.clone());
        self
    }

    /// Fully quoted reproducible form, as logged.
    pub fn full_string(&self) -> String {
        match &self.command {
            StepCommand::Args(argv) => join(argv.iter().map(String::as_str)),
            StepCommand::Shell(line) => line.clone(),
        }
    }

    fn to_command(&self) -> Result<Command, StepFailure> {
        let mut cmd = match &self.command {
            StepCommand::Args(argv) => {
                let Some((program, rest)) = argv.split_first() else {
                    return Err(StepFailure::Spawn {
                        label: self.label.clone(),
                        command: String::new(),
                        source: std::io::Error::new(
                            std::io::ErrorKind::InvalidInput,
                            "empty argument list",
                        ),
                    });
                };
                let mut cmd = Command::new(program);
                cmd.args(rest);
                cmd
            }
            StepCommand::Shell(line) => shell_command(line),
        };
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        if let Some(env) = &self.env {
            cmd.env_clear();
            cmd.envs(env.iter());
        }
        Ok(cmd)
    }
}

/// Run `steps` strictly in order, aborting at the first failure. Remaining
/// steps never start.
pub fn run(steps: &[Step]) -> Result<(), StepFailure> {
    for step in steps {
        run_step(step)?;
    }
    Ok(())
}

/// Run one hard step: nonzero exit is fatal.
pub fn run_step(step: &Step) -> Result<(), StepFailure> {
    report(step);

    let status = step
        .to_command()?
        .status()
        .map_err(|source| StepFailure::Spawn {
            label: step.label.clone(),
            command: step.full_string(),
            source,
        })?;

    if status.success() {
        Ok(())
    } else {
        Err(StepFailure::Exit {
            label: step.label.clone(),
            command: step.full_string(),
            code: status.code().unwrap_or(-1),
        })
    }
}

/// Run one soft probe step, capturing stdout.
///
/// A nonzero exit is tolerated and yields `None`; only failure to start the
/// process at all is an error. Probes are for dry-run listings whose failure
/// means "skip this input", not "abort the build".
pub fn probe(step: &Step) -> Result<Option<Vec<u8>>, StepFailure> {
    report(step);

    let output = step
        .to_command()?
        .output()
        .map_err(|source| StepFailure::Spawn {
            label: step.label.clone(),
            command: step.full_string(),
            source,
        })?;

    if output.status.success() {
        Ok(Some(output.stdout))
    } else {
        println!(
            "    probe `{}` exited with code {}; tolerated",
            step.label,
            output.status.code().unwrap_or(-1)
        );
        Ok(None)
    }
}

/// Log full invocation provenance, mirroring what a failed run needs for a
/// by-hand reproduction.
fn report(step: &Step) {
    println!("\nCalling: {}", step.label);
    println!("    At: {}", chrono::Utc::now().to_rfc3339());
    println!("    Caller: {}:{}", step.caller.file(), step.caller.line());
    println!("    CWD: {:?}", step.cwd);
    println!("    As passed: {:?}", step.command);
    println!("    Full: {}", step.full_string());
    match &step.command {
        StepCommand::Args(argv) => {
            for arg in argv {
                println!("    {arg:?}");
            }
        }
        StepCommand::Shell(line) => println!("    {line:?}"),
    }
    let _ = std::io::stdout().flush();
}

fn shell_command(line: &str) -> Command {
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        let mut cmd = Command::new("cmd.exe");
        cmd.arg("/c").raw_arg(line);
        cmd
    }
    #[cfg(not(windows))]
    {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(line);
        cmd
    }
}

/// Quote one argument for a reproducible shell line.
pub fn quote(arg: &str) -> String {
    let safe = |c: char| c.is_ascii_alphanumeric() || "@%+=:,./-_".contains(c);
    if !arg.is_empty() && arg.chars().all(safe) {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// Quote and join a full argument vector.
pub fn join<'a>(args: impl IntoIterator<Item = &'a str>) -> String {
    args.into_iter()
        .map(quote)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Quote one argument for `cmd.exe`, following the `CommandLineToArgvW`
/// rules: double quotes around arguments with whitespace, backslashes
/// doubled when they precede a quote.
///
/// `cmd.exe` has no concept of single quotes, so the POSIX [`quote`] form
/// must never reach it.
#[cfg_attr(not(windows), allow(dead_code))]
pub fn quote_windows(arg: &str) -> String {
    let needs_quotes = arg.is_empty() || arg.contains(' ') || arg.contains('\t');
    if !needs_quotes && !arg.contains('"') {
        return arg.to_string();
    }

    let mut out = String::new();
    if needs_quotes {
        out.push('"');
    }
    let mut backslashes = 0usize;
    for c in arg.chars() {
        match c {
            '\\' => backslashes += 1,
            '"' => {
                out.push_str(&"\\".repeat(backslashes * 2 + 1));
                backslashes = 0;
                out.push('"');
            }
            _ => {
                out.push_str(&"\\".repeat(backslashes));
                backslashes = 0;
                out.push(c);
            }
        }
    }
    if needs_quotes {
        // Trailing backslashes would otherwise escape the closing quote.
        out.push_str(&"\\".repeat(backslashes * 2));
        out.push('"');
    } else {
        out.push_str(&"\\".repeat(backslashes));
    }
    out
}

/// Quote and join an argument vector into a line `cmd.exe` will split back
/// into the same arguments.
#[cfg_attr(not(windows), allow(dead_code))]
pub fn join_windows<'a>(args: impl IntoIterator<Item = &'a str>) -> String {
    args.into_iter()
        .map(quote_windows)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{bail, Result};

    #[test]
    fn quote_passes_plain_words_through() {
        assert_eq!(quote("nmake"), "nmake");
        assert_eq!(quote("--sysroot=C:/build/sysroot"), "--sysroot=C:/build/sysroot");
    }

    #[test]
    fn quote_wraps_spaces_and_quotes() {
        assert_eq!(quote("a b"), "'a b'");
        assert_eq!(quote(""), "''");
        assert_eq!(quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn join_builds_a_reproducible_line() {
        let line = join(["patch", "-p", "1", "-i", "plugin loader.patch"]);
        assert_eq!(line, "patch -p 1 -i 'plugin loader.patch'");
    }

    #[test]
    fn windows_join_uses_cmd_exe_quoting() {
        let line = join_windows([
            "C:/Program Files (x86)/Microsoft Visual Studio/2017/Community/VC/vcvarsall.bat",
            "x64",
        ]);
        assert_eq!(
            line,
            "\"C:/Program Files (x86)/Microsoft Visual Studio/2017/Community/VC/vcvarsall.bat\" x64"
        );
        // cmd.exe would read a POSIX-quoted path as the literal program
        // `'C:/Program`, so single quotes must never appear.
        assert!(!line.contains('\''));
    }

    #[test]
    fn windows_quote_escapes_quotes_and_trailing_backslashes() {
        assert_eq!(quote_windows(r"C:\Qt\5.11.1\msvc2017_64\bin"), r"C:\Qt\5.11.1\msvc2017_64\bin");
        assert_eq!(quote_windows(""), "\"\"");
        assert_eq!(quote_windows(r#"say "hi""#), r#""say \"hi\"""#);
        assert_eq!(quote_windows(r"C:\Program Files\"), r#""C:\Program Files\\""#);
        assert_eq!(quote_windows(r#"a\"b"#), r#"a\\\"b"#);
    }

    #[test]
    fn empty_argument_list_cannot_start() {
        let step = Step::args("empty", Vec::<String>::new());
        assert!(matches!(
            run_step(&step),
            Err(StepFailure::Spawn { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn pipeline_stops_at_the_first_failure() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let before = dir.path().join("before");
        let after = dir.path().join("after");

        let steps = [
            Step::args("create before", vec!["touch".to_string(), before.display().to_string()]),
            Step::shell("always fails", "exit 3"),
            Step::args("create after", vec!["touch".to_string(), after.display().to_string()]),
        ];

        let err = run(&steps);
        match err {
            Err(StepFailure::Exit { label, code, .. }) => {
                assert_eq!(label, "always fails");
                assert_eq!(code, 3);
            }
            other => bail!("expected Exit, got {other:?}"),
        }

        assert!(before.exists(), "step before the failure must have run");
        assert!(!after.exists(), "step after the failure must never start");
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn failure_carries_the_exact_command() -> Result<()> {
        let step = Step::shell("doomed", "exit 7");
        match run_step(&step) {
            Err(StepFailure::Exit { command, code, .. }) => {
                assert_eq!(command, "exit 7");
                assert_eq!(code, 7);
                Ok(())
            }
            other => bail!("expected Exit, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn step_runs_in_its_working_directory() -> Result<()> {
        let dir = tempfile::tempdir()?;
        run_step(&Step::args("touch marker", ["touch", "marker"]).in_dir(dir.path()))?;
        assert!(dir.path().join("marker").exists());
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn explicit_env_replaces_inherited_wholesale() -> Result<()> {
        let env = EnvironmentSnapshot::default()
            .with("PATH", "/usr/bin:/bin")
            .with("ONLY_THIS", "yes");
        let step = Step::shell("check env", "test \"$ONLY_THIS\" = yes && test -z \"$HOME\"")
            .with_env(&env);
        run_step(&step)?;
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn probe_captures_stdout_on_success() -> Result<()> {
        let got = probe(&Step::shell("list", "echo WebEngine"))?;
        assert_eq!(got.as_deref(), Some(b"WebEngine\n".as_slice()));
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn probe_tolerates_nonzero_exit() -> Result<()> {
        let got = probe(&Step::shell("doomed probe", "exit 1"))?;
        assert_eq!(got, None);
        Ok(())
    }
}
