//! MSVC runtime DLLs for the shipped tools.
//!
//! `windeployqt --compiler-runtime` does not actually deliver the CRT, so
//! the runtime DLLs are copied straight out of the Visual Studio redist
//! tree, whose layout is version-dependent (resolved up front).

use crate::builder::versions::ResolvedConfig;
use crate::builder::Layout;
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

pub fn copy_runtime(cfg: &ResolvedConfig, layout: &Layout) -> Result<()> {
    println!("=== Copying MSVC runtime ===");

    let mut redist = cfg.vs_path.join("VC").join("redist");
    if cfg.redist_in_msvc_subdir {
        redist = single_subdirectory(&redist.join("MSVC"))?;
    }
    let redist = redist
        .join(cfg.vcvars_arch)
        .join(format!("Microsoft.VC{}.CRT", cfg.msvc_compact));

    for file in &cfg.redist_files {
        let dest = layout.destination.join(file);
        std::fs::copy(redist.join(file), &dest)
            .with_context(|| format!("Failed to copy {} from {}", file, redist.display()))?;
        make_writable(&dest)?;
        println!("  Copied: {file}");
    }
    Ok(())
}

/// VS 2017+ keys the redist tree on an opaque toolset number; there must be
/// exactly one.
fn single_subdirectory(dir: &Path) -> Result<PathBuf> {
    let mut entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read {}", dir.display()))?
        .collect::<std::io::Result<Vec<_>>>()?;
    if entries.len() != 1 {
        bail!(
            "expected exactly one toolset under {}, found {}",
            dir.display(),
            entries.len()
        );
    }
    Ok(entries.remove(0).path())
}

/// The redist files arrive read-only; the wheel build later needs to move
/// them.
#[allow(clippy::permissions_set_readonly_false)]
fn make_writable(path: &Path) -> Result<()> {
    let mut permissions = std::fs::metadata(path)?.permissions();
    permissions.set_readonly(false);
    std::fs::set_permissions(path, permissions)
        .with_context(|| format!("Failed to chmod {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_subdirectory_accepts_exactly_one() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let toolset = dir.path().join("14.14.26405");
        std::fs::create_dir(&toolset)?;

        assert_eq!(single_subdirectory(dir.path())?, toolset);
        Ok(())
    }

    #[test]
    fn single_subdirectory_rejects_ambiguity() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::create_dir(dir.path().join("14.14.26405"))?;
        std::fs::create_dir(dir.path().join("14.15.26706"))?;

        assert!(single_subdirectory(dir.path()).is_err());
        Ok(())
    }
}
