//! Environment capture from a vendor initializer script.
//!
//! `vcvarsall.bat` mutates variables as a side effect of being run inside
//! `cmd.exe`; the only portable way to observe those mutations is to run the
//! script in a disposable shell, print a sentinel, dump the environment, and
//! parse the dump from the child's stdout.

use indexmap::IndexMap;
use std::io::{BufRead, BufReader};
use std::process::{Command, Stdio};
use thiserror::Error;

/// Marker separating the initializer's own output from the environment dump.
pub const SENTINEL: &str = "Done running command";

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("failed to start environment initializer `{command}`: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
    #[error("initializer `{command}` exited without printing the sentinel")]
    MissingSentinel { command: String },
    #[error("failed to read initializer output: {0}")]
    Stream(#[from] std::io::Error),
}

/// Insertion-ordered name/value mapping captured from a child process.
///
/// Snapshots are never mutated in place; deriving a changed environment goes
/// through [`EnvironmentSnapshot::with`] or [`EnvironmentSnapshot::union`],
/// which build a new value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentSnapshot {
    vars: IndexMap<String, String>,
}

impl EnvironmentSnapshot {
    /// Snapshot of this process's own environment.
    pub fn from_current() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// New snapshot with one variable set (later value wins).
    pub fn with(&self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let mut single = IndexMap::new();
        single.insert(name.into(), value.into());
        self.union(&Self { vars: single })
    }

    /// New snapshot combining `self` and `later`; `later` wins on conflicts.
    pub fn union(&self, later: &Self) -> Self {
        let mut vars = self.vars.clone();
        for (name, value) in &later.vars {
            vars.insert(name.clone(), value.clone());
        }
        Self { vars }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

impl FromIterator<(String, String)> for EnvironmentSnapshot {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self {
            vars: iter.into_iter().collect(),
        }
    }
}

/// Run `env_cmd` inside a disposable shell and capture the environment it
/// leaves behind.
///
/// The initializer's own exit status is not part of the contract: a nonzero
/// exit after a valid dump was captured is logged, not fatal.
pub fn capture(
    env_cmd: &[&str],
    initial: &EnvironmentSnapshot,
) -> Result<EnvironmentSnapshot, BridgeError> {
    let (mut command, shown) = bridge_command(env_cmd);

    let mut child = command
        .stdout(Stdio::piped())
        .env_clear()
        .envs(initial.iter())
        .spawn()
        .map_err(|source| BridgeError::Spawn {
            command: shown.clone(),
            source,
        })?;

    // Drain continuously while the child runs so a chatty initializer cannot
    // deadlock on a full pipe buffer.
    let dump = match child.stdout.take() {
        Some(stdout) => parse_env_dump(BufReader::new(stdout))?,
        None => EnvDump::default(),
    };

    let status = child.wait()?;

    if !dump.saw_sentinel {
        return Err(BridgeError::MissingSentinel { command: shown });
    }
    if dump.malformed > 0 {
        eprintln!(
            "warning: dropped {} unparsable environment line(s) from `{shown}`",
            dump.malformed
        );
    }
    if !status.success() {
        eprintln!("warning: initializer `{shown}` exited with {status} after environment capture");
    }

    Ok(dump.snapshot)
}

#[derive(Debug, Default)]
struct EnvDump {
    snapshot: EnvironmentSnapshot,
    saw_sentinel: bool,
    malformed: usize,
}

/// Discard lines up to and including the sentinel, then collect `NAME=VALUE`
/// pairs. Malformed lines are logged and skipped; duplicate names keep the
/// last value seen.
fn parse_env_dump(reader: impl BufRead) -> std::io::Result<EnvDump> {
    let mut dump = EnvDump::default();

    for line in reader.lines() {
        let line = line?;
        if !dump.saw_sentinel {
            if line.contains(SENTINEL) {
                dump.saw_sentinel = true;
            }
            continue;
        }

        let line = line.trim_end_matches('\r');
        match line.split_once('=') {
            Some((name, value)) if !name.is_empty() && !value.is_empty() => {
                dump.snapshot
                    .vars
                    .insert(name.to_string(), value.to_string());
            }
            _ => {
                eprintln!("Unexpected environment line: {line:?}");
                dump.malformed += 1;
            }
        }
    }

    Ok(dump)
}

/// Wrap the initializer in the platform shell, appending the sentinel echo
/// and the environment dump. Returns the command plus a display string for
/// logs. Each shell gets its own quoting: `cmd.exe` does not understand the
/// POSIX single-quote form, so its setup line is built with
/// [`pipeline::join_windows`](crate::builder::pipeline::join_windows).
fn bridge_command(env_cmd: &[&str]) -> (Command, String) {
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        let setup_line = crate::builder::pipeline::join_windows(env_cmd.iter().copied());
        let line = format!("\"{setup_line} && echo \"{SENTINEL}\" && set\"");
        let mut cmd = Command::new("cmd.exe");
        cmd.arg("/s").arg("/c").raw_arg(&line);
        (cmd, format!("cmd.exe /s /c {line}"))
    }
    #[cfg(not(windows))]
    {
        let setup_line = crate::builder::pipeline::join(env_cmd.iter().copied());
        let line = format!("{setup_line} && echo \"{SENTINEL}\" && env");
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&line);
        let shown = format!("sh -c {}", crate::builder::pipeline::quote(&line));
        (cmd, shown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    fn parse(bytes: &[u8]) -> std::io::Result<EnvDump> {
        parse_env_dump(BufReader::new(bytes))
    }

    #[test]
    fn drains_until_sentinel_then_collects_pairs() -> Result<()> {
        let dump = parse(b"noise A=ignored\n...Done running command...\nA=1\nB=2\nbad-line\n")?;
        assert!(dump.saw_sentinel);
        assert_eq!(dump.snapshot.len(), 2);
        assert_eq!(dump.snapshot.get("A"), Some("1"));
        assert_eq!(dump.snapshot.get("B"), Some("2"));
        assert_eq!(dump.malformed, 1);
        Ok(())
    }

    #[test]
    fn counts_each_malformed_line() -> Result<()> {
        let dump = parse(b"Done running command\nGOOD=yes\n=novalue\nnoequals\nEMPTY=\n")?;
        assert_eq!(dump.snapshot.len(), 1);
        assert_eq!(dump.malformed, 3);
        Ok(())
    }

    #[test]
    fn later_duplicate_wins() -> Result<()> {
        let dump = parse(b"Done running command\nPATH=first\nPATH=second\n")?;
        assert_eq!(dump.snapshot.get("PATH"), Some("second"));
        assert_eq!(dump.snapshot.len(), 1);
        Ok(())
    }

    #[test]
    fn missing_sentinel_is_detected() -> Result<()> {
        let dump = parse(b"A=1\nB=2\n")?;
        assert!(!dump.saw_sentinel);
        assert!(dump.snapshot.is_empty());
        Ok(())
    }

    #[test]
    fn windows_style_crlf_dump() -> Result<()> {
        let dump = parse(b"\"Done running command\"\r\nPATH=C:\\Qt\\bin\r\n")?;
        assert_eq!(dump.snapshot.get("PATH"), Some("C:\\Qt\\bin"));
        Ok(())
    }

    #[test]
    fn disjoint_captures_union_matches_combined() -> Result<()> {
        let left = parse(b"Done running command\nA=1\n")?.snapshot;
        let right = parse(b"Done running command\nB=2\n")?.snapshot;
        let both = parse(b"Done running command\nA=1\nB=2\n")?.snapshot;
        assert_eq!(left.union(&right), both);
        Ok(())
    }

    #[test]
    fn with_builds_a_new_value() {
        let base: EnvironmentSnapshot =
            [("A".to_string(), "1".to_string())].into_iter().collect();
        let derived = base.with("B", "2");
        assert_eq!(base.len(), 1);
        assert_eq!(derived.get("A"), Some("1"));
        assert_eq!(derived.get("B"), Some("2"));
    }

    #[cfg(unix)]
    #[test]
    fn captures_variables_sourced_from_a_real_script() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let script = dir.path().join("init.sh");
        std::fs::write(&script, "export BRIDGE_ALPHA=1\nexport BRIDGE_BETA=two\n")?;

        let script = script.display().to_string();
        let snapshot = capture(&[".", &script], &EnvironmentSnapshot::from_current())?;

        assert_eq!(snapshot.get("BRIDGE_ALPHA"), Some("1"));
        assert_eq!(snapshot.get("BRIDGE_BETA"), Some("two"));
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn failed_setup_without_sentinel_is_an_error() -> Result<()> {
        // A single quoted word is not a valid command, so the sentinel never
        // prints and capture must fail loudly instead of returning junk.
        let snapshot = capture(&["export KEPT=yes"], &EnvironmentSnapshot::from_current());
        assert!(matches!(snapshot, Err(BridgeError::MissingSentinel { .. })));
        Ok(())
    }
}
