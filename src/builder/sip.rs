//! sip stage: build the sip code generator twice.
//!
//! The native copy produces the host `sip.exe` used by the PyQt5 configure
//! step; the target copy builds the static module installed into the
//! sysroot. Both are configure/nmake/nmake-install sequences driven by
//! `pyqtdeploycli`-generated configuration.

use crate::builder::env_bridge::EnvironmentSnapshot;
use crate::builder::pipeline::{self, Step};
use crate::builder::versions::ResolvedConfig;
use crate::builder::{fetch, Layout};
use anyhow::Result;

pub fn build(cfg: &ResolvedConfig, layout: &Layout, env: &EnvironmentSnapshot) -> Result<()> {
    println!("=== Building sip ===");

    let deploycli = layout.venv_bin.join("pyqtdeploycli").display().to_string();
    let python = layout.venv_bin.join("python").display().to_string();
    let nmake = layout.nmake.display().to_string();
    let qmake = layout.qmake.display().to_string();

    pipeline::run_step(&Step::args(
        "install python into sysroot",
        vec![
            deploycli.clone(),
            "--sysroot".to_string(),
            layout.sysroot.display().to_string(),
            "--package".to_string(),
            "python".to_string(),
            "--system-python".to_string(),
            cfg.python_dotted.clone(),
            "install".to_string(),
        ],
    ))?;

    fetch::fetch_zip(&cfg.sip_url, &layout.src)?;
    let sip = layout.src.join(&cfg.sip_name);
    let native_sip = layout.src.join(format!("{}-native", cfg.sip_name));
    fetch::copy_tree(&sip, &native_sip)?;

    // The sysroot Python headers are not on any default include path.
    let include = layout
        .sysroot
        .join("include")
        .join(format!("python{}", cfg.python_dotted));
    let env = env.with("CL", format!("/I\"{}\"", include.display()));

    let platform = format!("--platform=win32-msvc{}", cfg.platform_year);
    let target_py = format!("--target-py-version={}", cfg.python_dotted);

    let mut native_configure = vec![
        python.clone(),
        "configure.py".to_string(),
        "--static".to_string(),
        format!("--sysroot={}", layout.native.display()),
        platform.clone(),
        target_py.clone(),
    ];
    native_configure.extend(cfg.sip_module_args.iter().cloned());

    pipeline::run(&[
        Step::args("sip native configure", native_configure).in_dir(&native_sip),
        Step::args("sip native build", vec![nmake.clone()])
            .in_dir(&native_sip)
            .with_env(&env),
        Step::args("sip native install", vec![nmake.clone(), "install".to_string()])
            .in_dir(&native_sip)
            .with_env(&env),
    ])?;

    pipeline::run_step(
        &Step::args(
            "sip target configure (pyqtdeploycli)",
            vec![
                deploycli,
                "--package".to_string(),
                "sip".to_string(),
                "--target".to_string(),
                format!("win-{}", cfg.bits),
                "configure".to_string(),
            ],
        )
        .in_dir(&sip),
    )?;

    let mut target_configure = vec![
        python,
        "configure.py".to_string(),
        "--static".to_string(),
        format!("--sysroot={}", layout.sysroot.display()),
        "--no-tools".to_string(),
        "--use-qmake".to_string(),
        "--configuration=sip-win.cfg".to_string(),
        platform,
        target_py,
        "--no-pyi".to_string(),
    ];
    target_configure.extend(cfg.sip_module_args.iter().cloned());

    pipeline::run(&[
        Step::args("sip target configure", target_configure).in_dir(&sip),
        Step::args("sip target qmake", vec![qmake])
            .in_dir(&sip)
            .with_env(&env),
        Step::args("sip target build", vec![nmake.clone()])
            .in_dir(&sip)
            .with_env(&env),
        Step::args("sip target install", vec![nmake, "install".to_string()])
            .in_dir(&sip)
            .with_env(&env),
    ])?;

    println!("  Installed: sip {} into {}", cfg.sip_version, layout.sysroot.display());
    Ok(())
}
