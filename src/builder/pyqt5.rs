//! PyQt5 stage: patch, configure, and build the designer plugin.

use crate::builder::env_bridge::EnvironmentSnapshot;
use crate::builder::patch::{LineMatch, PatchRule};
use crate::builder::pipeline::{self, Step};
use crate::builder::versions::ResolvedConfig;
use crate::builder::{fetch, patch, Layout};
use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;

pub fn build(cfg: &ResolvedConfig, layout: &Layout, env: &EnvironmentSnapshot) -> Result<()> {
    println!("=== Building PyQt5 ===");

    fetch::fetch_zip(&cfg.pyqt5_url, &layout.src)?;
    let pyqt5 = layout.src.join(&cfg.pyqt5_name);

    // The pluginloader patch teaches the designer plugin to find the Python
    // DLL next to the tools. Upstream ships it as a context diff, so this is
    // the one raw-shell step in the pipeline.
    if let Some(patch_file) = cfg.pluginloader_patch {
        pipeline::run_step(
            &Step::shell("apply pluginloader patch", format!("patch -p 1 -i {patch_file}"))
                .in_dir(&pyqt5),
        )?;
    }

    let deploycli = layout.venv_bin.join("pyqtdeploycli").display().to_string();
    pipeline::run_step(
        &Step::args(
            "pyqt5 configure (pyqtdeploycli)",
            vec![
                deploycli,
                "--package".to_string(),
                "pyqt5".to_string(),
                "--target".to_string(),
                format!("win-{}", cfg.bits),
                "configure".to_string(),
            ],
        )
        .in_dir(&pyqt5),
    )?;

    let cfg_file = pyqt5.join("pyqt5-win.cfg");
    rewrite_generated_config(&cfg_file, cfg)?;
    append_designer_defines(&pyqt5.join("designer").join("designer.pro-in"))?;

    let python = layout.venv_bin.join("python").display().to_string();
    let install = layout.sysroot.join("pyqt5-install");
    let mut configure = vec![
        python,
        "configure.py".to_string(),
        "--static".to_string(),
        format!("--sysroot={}", layout.sysroot.display()),
        "--no-tools".to_string(),
        "--no-qsci-api".to_string(),
        "--no-qml-plugin".to_string(),
        format!("--configuration={}", cfg_file.display()),
        "--confirm-license".to_string(),
        format!("--sip={}", layout.native.join("sip.exe").display()),
        format!("--bindir={}", install.join("bin").display()),
        format!("--destdir={}", install.join("dest").display()),
        format!("--designer-plugindir={}", install.join("designer").display()),
        "--enable=QtDesigner".to_string(),
        format!("--target-py-version={}", cfg.python_dotted),
    ];
    if cfg.pass_qmake {
        configure.push(format!("--qmake={}", layout.qmake.display()));
    }

    let nmake = layout.nmake.display().to_string();
    pipeline::run(&[
        Step::args("pyqt5 configure", configure)
            .in_dir(&pyqt5)
            .with_env(env),
        Step::args("pyqt5 qmake", vec![layout.qmake.display().to_string()])
            .in_dir(&pyqt5)
            .with_env(env),
        Step::args("pyqt5 build", vec![nmake.clone()])
            .in_dir(&pyqt5)
            .with_env(env),
        Step::args("pyqt5 install", vec![nmake, "install".to_string()])
            .in_dir(&pyqt5)
            .with_env(env),
    ])?;

    collect_artifacts(&pyqt5, layout)
}

/// Override the generated `pyqt5-win.cfg` before `configure.py` reads it:
/// prepend the shared-library name and point `py_pylib_lib` at the expanded
/// major/minor form.
fn rewrite_generated_config(cfg_file: &Path, cfg: &ResolvedConfig) -> Result<()> {
    let rules = [PatchRule::rewrite(
        LineMatch::StartsWith("py_pylib_lib".to_string()),
        "py_pylib_lib = python%(py_major)%(py_minor)",
    )];
    patch::patch_file(cfg_file, &rules)?;

    let body = std::fs::read_to_string(cfg_file)
        .with_context(|| format!("Failed to read {}", cfg_file.display()))?;
    std::fs::write(
        cfg_file,
        format!("\npy_pyshlib = python{}.dll\n{body}", cfg.python_compact),
    )
    .with_context(|| format!("Failed to write {}", cfg_file.display()))
}

/// The designer project must embed the Python DLL name so the plugin can load
/// it at runtime.
fn append_designer_defines(pro_in: &Path) -> Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(pro_in)
        .with_context(|| format!("Failed to open {}", pro_in.display()))?;
    file.write_all(b"\nDEFINES     += PYTHON_LIB='\"\\\\\\\"@PYSHLIB@\\\\\\\"\"'\n")
        .with_context(|| format!("Failed to append to {}", pro_in.display()))
}

fn collect_artifacts(pyqt5: &Path, layout: &Layout) -> Result<()> {
    let plugin = layout
        .sysroot
        .join("pyqt5-install")
        .join("designer")
        .join("pyqt5.dll");
    std::fs::create_dir_all(&layout.plugins_designer)?;
    std::fs::copy(&plugin, layout.plugins_designer.join("pyqt5.dll"))
        .with_context(|| format!("Failed to copy {}", plugin.display()))?;
    println!("  Copied: {}", plugin.display());

    std::fs::copy(pyqt5.join("LICENSE"), layout.destination.join("LICENSE.pyqt5"))
        .context("Failed to copy the PyQt5 LICENSE")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::versions::{Facts, ResolvedConfig};
    use std::path::PathBuf;

    fn resolved() -> Result<ResolvedConfig> {
        let facts = Facts {
            pyqt5_version: "5.11.2".to_string(),
            python_version: "3.7".to_string(),
            bits: 64,
            build_folder: PathBuf::from("/tmp/build"),
            build_id: "1".to_string(),
            job_id: "2".to_string(),
        };
        Ok(ResolvedConfig::resolve(&facts)?)
    }

    #[test]
    fn generated_config_gains_shlib_and_rewritten_pylib() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let cfg_file = dir.path().join("pyqt5-win.cfg");
        std::fs::write(&cfg_file, "py_pylib_lib = python37\nqt_shared = False\n")?;

        rewrite_generated_config(&cfg_file, &resolved()?)?;

        assert_eq!(
            std::fs::read_to_string(&cfg_file)?,
            "\npy_pyshlib = python37.dll\n\
             py_pylib_lib = python%(py_major)%(py_minor)\n\
             qt_shared = False\n"
        );
        Ok(())
    }

    #[test]
    fn designer_defines_line_matches_the_expected_escaping() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let pro_in = dir.path().join("designer.pro-in");
        std::fs::write(&pro_in, "TARGET = pyqt5\n")?;

        append_designer_defines(&pro_in)?;

        let text = std::fs::read_to_string(&pro_in)?;
        assert_eq!(
            text,
            "TARGET = pyqt5\n\nDEFINES     += PYTHON_LIB='\"\\\\\\\"@PYSHLIB@\\\\\\\"\"'\n"
        );
        Ok(())
    }
}
