//! Provenance record written next to the shipped artifacts, so any wheel can
//! be traced back to the exact toolchain that produced it.

use crate::builder::versions::{Facts, ResolvedConfig};
use crate::builder::Layout;
use anyhow::{Context, Result};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct BuildManifest<'a> {
    build_id: &'a str,
    job_id: &'a str,
    pyqt5_version: &'a str,
    sip_version: &'a str,
    python_version: &'a str,
    msvc_version: &'a str,
    compiler_year: &'a str,
    bits: u32,
}

pub fn write(cfg: &ResolvedConfig, facts: &Facts, layout: &Layout) -> Result<()> {
    let manifest = BuildManifest {
        build_id: &facts.build_id,
        job_id: &facts.job_id,
        pyqt5_version: &cfg.pyqt5_version,
        sip_version: &cfg.sip_version,
        python_version: &cfg.python_dotted,
        msvc_version: &cfg.msvc_version,
        compiler_year: cfg.compiler_year,
        bits: cfg.bits,
    };

    let path = layout.destination.join("build-manifest.json");
    let json = serde_json::to_string_pretty(&manifest)?;
    std::fs::write(&path, json + "\n")
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("  Wrote: {}", path.display());
    Ok(())
}
