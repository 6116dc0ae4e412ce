//! Build system for the pyqt5-tools distribution.
//!
//! Structure:
//! - `env_bridge` - MSVC environment capture from `vcvarsall.bat`
//! - `versions` - version facts and the closed lookup tables
//! - `pipeline` - ordered fail-fast execution of external tools
//! - `patch` - line-oriented edits of generated config files
//! - `fetch` - download/unpack/copy collaborators
//! - `deploy` - windeployqt sweep over the Qt tool binaries
//! - `sip` / `pyqt5` - the two source-built stages
//! - `redist` - MSVC runtime DLLs for the wheel
//! - `manifest` - provenance record written next to the artifacts

pub mod deploy;
pub mod env_bridge;
pub mod fetch;
pub mod manifest;
pub mod patch;
pub mod pipeline;
pub mod pyqt5;
pub mod redist;
pub mod sip;
pub mod versions;

use anyhow::{Context, Result};
use env_bridge::EnvironmentSnapshot;
use std::path::PathBuf;
use versions::{Facts, ResolvedConfig};

/// Fixed directory layout under the CI build folder.
///
/// The scratch areas (`sysroot`, `native`, `src`) are an internal contract
/// between pipeline stages; only `destination` is shipped.
#[derive(Debug, Clone)]
pub struct Layout {
    pub build: PathBuf,
    pub destination: PathBuf,
    pub plugins_designer: PathBuf,
    pub platforms: PathBuf,
    pub sysroot: PathBuf,
    pub native: PathBuf,
    pub src: PathBuf,
    pub venv_bin: PathBuf,
    pub qt_bin: PathBuf,
    pub qt_plugins: PathBuf,
    pub nmake: PathBuf,
    pub qmake: PathBuf,
}

impl Layout {
    pub fn new(cfg: &ResolvedConfig, facts: &Facts, qt_base: &str) -> Self {
        let build = facts.build_folder.clone();
        let destination = build.join("pyqt5-tools");
        let sysroot = build.join("sysroot");
        let qt_compiler = PathBuf::from(qt_base).join(&cfg.compiler_dir);
        let qt_bin = qt_compiler.join("bin");

        Self {
            plugins_designer: destination.join("plugins").join("designer"),
            platforms: destination.join("platforms"),
            native: sysroot.join("native"),
            src: build.join("src"),
            venv_bin: build.join("venv").join("Scripts"),
            qt_plugins: qt_compiler.join("plugins"),
            nmake: cfg.vs_path.join("VC").join("BIN").join("nmake"),
            qmake: qt_bin.join("qmake.exe"),
            qt_bin,
            destination,
            sysroot,
            build,
        }
    }

    fn create(&self) -> Result<()> {
        for dir in [
            &self.destination,
            &self.platforms,
            &self.sysroot,
            &self.native,
            &self.src,
        ] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}

/// Run the whole build: capture the toolchain environment, resolve the
/// version chain, then execute the staged pipeline. Any error aborts the run;
/// nothing is retried or rolled back.
pub fn run() -> Result<()> {
    println!("=== pyqt5-tools build ===\n");

    let facts = Facts::from_env()?;
    let cfg = ResolvedConfig::resolve(&facts)?;
    println!(
        "  PyQt5 {} / sip {} / Python {} / MSVC {} ({})",
        cfg.pyqt5_version, cfg.sip_version, cfg.python_dotted, cfg.msvc_version, cfg.compiler_year
    );

    let vcvarsall = cfg
        .vs_path
        .join("VC")
        .join("vcvarsall.bat")
        .display()
        .to_string();
    let env = env_bridge::capture(
        &[&vcvarsall, cfg.vcvars_arch],
        &EnvironmentSnapshot::from_current(),
    )?;

    let qt_base = env
        .get("QT_BASE_PATH")
        .context("QT_BASE_PATH is not set")?
        .to_string();
    let layout = Layout::new(&cfg, &facts, &qt_base);
    let env = with_qt_bin_on_path(&env, &layout)?;

    layout.create()?;
    write_wheel_config(&layout, &cfg)?;
    write_metadata(&layout, &facts)?;

    deploy::sweep(&layout)?;
    sip::build(&cfg, &layout, &env)?;
    pyqt5::build(&cfg, &layout, &env)?;
    redist::copy_runtime(&cfg, &layout)?;
    manifest::write(&cfg, &facts, &layout)?;

    println!("\n=== Build complete ===");
    println!("  Artifacts: {}", layout.destination.display());
    Ok(())
}

/// New snapshot with the Qt tool directory appended to `PATH`.
fn with_qt_bin_on_path(env: &EnvironmentSnapshot, layout: &Layout) -> Result<EnvironmentSnapshot> {
    let existing = env.get("PATH").unwrap_or_default();
    let mut paths: Vec<PathBuf> = std::env::split_paths(&existing).collect();
    paths.push(layout.qt_bin.clone());
    let joined = std::env::join_paths(paths).context("PATH entry contains an invalid character")?;
    Ok(env.with("PATH", joined.to_string_lossy()))
}

/// `setup.cfg` telling bdist_wheel which tag this build is for.
fn write_wheel_config(layout: &Layout, cfg: &ResolvedConfig) -> Result<()> {
    let text = format!(
        "[bdist_wheel]\npython-tag = {}\nplat-name = {}\n",
        cfg.python_tag, cfg.plat_name
    );
    let path = layout.build.join("setup.cfg");
    std::fs::write(&path, text).with_context(|| format!("Failed to write {}", path.display()))
}

/// CI identifiers, one value per file, newline-terminated.
fn write_metadata(layout: &Layout, facts: &Facts) -> Result<()> {
    for (name, value) in [("build_id", &facts.build_id), ("job_id", &facts.job_id)] {
        let path = layout.destination.join(name);
        std::fs::write(&path, format!("{value}\n"))
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }
    Ok(())
}
