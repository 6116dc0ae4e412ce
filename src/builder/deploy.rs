//! windeployqt sweep over the Qt tool binaries.
//!
//! Each `.exe` in the Qt bin directory is probed with a dry-run listing
//! first. The probe is a soft step: a failing or WebEngine-linked tool is
//! skipped, not fatal. Tools that pass are copied into the destination and
//! deployed for real, and that deployment is a hard step.

use crate::builder::pipeline::{self, Step};
use crate::builder::{fetch, Layout};
use anyhow::{Context, Result};

pub fn sweep(layout: &Layout) -> Result<()> {
    println!("=== Deploying Qt tools ===");

    let windeployqt = layout.qt_bin.join("windeployqt.exe").display().to_string();
    let applications = fetch::files_with_extension(&layout.qt_bin, "exe")?;

    for application in applications {
        let name = application
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("Invalid path: {}", application.display()))?
            .to_string();
        println!("\nChecking: {name}");

        let listing = Step::args(
            format!("windeployqt dry run: {name}"),
            vec![
                windeployqt.clone(),
                application.display().to_string(),
                "--dry-run".to_string(),
                "--list".to_string(),
                "source".to_string(),
            ],
        )
        .in_dir(&layout.destination);

        let Some(output) = pipeline::probe(&listing)? else {
            continue;
        };
        if String::from_utf8_lossy(&output).contains("WebEngine") {
            println!("    skipped");
            continue;
        }

        std::fs::copy(&application, layout.destination.join(&name))
            .with_context(|| format!("Failed to copy {}", application.display()))?;

        pipeline::run_step(
            &Step::args(
                format!("windeployqt: {name}"),
                vec![windeployqt.clone(), name.clone()],
            )
            .in_dir(&layout.destination),
        )?;
    }

    copy_platform_plugins(layout)
}

/// The minimal platform plugin keeps deployed tools startable headless.
fn copy_platform_plugins(layout: &Layout) -> Result<()> {
    std::fs::create_dir_all(&layout.platforms)?;

    for plugin in ["minimal"] {
        let dll = layout
            .qt_plugins
            .join("platforms")
            .join(format!("q{plugin}.dll"));
        let dest = layout.platforms.join(format!("q{plugin}.dll"));
        std::fs::copy(&dll, &dest)
            .with_context(|| format!("Failed to copy {}", dll.display()))?;
        println!("  Copied: {}", dll.display());
    }
    Ok(())
}
