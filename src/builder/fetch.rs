//! Archive download and unpack collaborators (curl + 7z), plus a recursive
//! tree copy. Plumbing only; the interesting control flow lives in the
//! pipeline.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Download `url` and unpack it under `unpack_dir`. Callers know the name of
/// the archive's top-level entry from the resolved config.
pub fn fetch_zip(url: &str, unpack_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(unpack_dir)?;

    let name = url
        .rsplit('/')
        .next()
        .context("download URL has no file name")?;
    let archive = unpack_dir.join(name);

    println!("Fetching {url}...");
    let status = Command::new("curl")
        .args(["--location", "--fail", "--silent", "--show-error", "--output"])
        .arg(&archive)
        .arg(url)
        .status()
        .context("Failed to run curl")?;
    if !status.success() {
        bail!("curl failed for {url}");
    }

    let status = Command::new("7z")
        .arg("x")
        .arg("-y")
        .arg(format!("-o{}", unpack_dir.display()))
        .arg(&archive)
        .status()
        .context("Failed to run 7z - is it installed?")?;
    if !status.success() {
        bail!("7z failed for {}", archive.display());
    }

    std::fs::remove_file(&archive)
        .with_context(|| format!("Failed to remove {}", archive.display()))?;

    println!("  Unpacked into {}", unpack_dir.display());
    Ok(())
}

/// Copy a directory tree, creating `dest`.
pub fn copy_tree(src: &Path, dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest)
        .with_context(|| format!("Failed to create {}", dest.display()))?;

    for entry in std::fs::read_dir(src)
        .with_context(|| format!("Failed to read {}", src.display()))?
    {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)
                .with_context(|| format!("Failed to copy {}", entry.path().display()))?;
        }
    }
    Ok(())
}

/// Paths of files in `dir` whose extension matches, sorted by name.
pub fn files_with_extension(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read {}", dir.display()))?
    {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) == Some(extension) {
            found.push(path);
        }
    }
    found.sort();
    Ok(found)
}
