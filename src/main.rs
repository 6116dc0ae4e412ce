//! # pyqt5-tools builder
//!
//! Unattended CI build driver for the pyqt5-tools distribution.
//!
//! ## Usage
//!
//! ```bash
//! builder    # capture MSVC env, resolve versions, run the whole pipeline
//! ```
//!
//! There are no subcommands: the run is configured entirely through the
//! environment. Recognized variables:
//!
//! - `PYQT5_VERSION` / `PYTHON_VERSION` / `TARGET_BITS` - declared version facts
//! - `QT_BASE_PATH` - Qt install root (may be set by the initializer script)
//! - `APPVEYOR_BUILD_FOLDER` / `APPVEYOR_BUILD_ID` / `APPVEYOR_JOB_ID` - CI context

use anyhow::Result;
use clap::Parser;

mod builder;

#[derive(Parser)]
#[command(name = "builder", about = "pyqt5-tools distribution builder")]
struct Cli {}

fn main() -> Result<()> {
    let Cli {} = Cli::parse();
    builder::run()
}
