//! Version facts and the closed lookup tables derived from them.
//!
//! Every version-dependent value (compiler year, install layout, download
//! URL, configure flags) is resolved here, up front, by exact-match table
//! lookup. There is no "nearest version" fallback: toolchain ABI
//! compatibility is not monotonic across versions, so an unknown pairing
//! must fail at this single point instead of three build steps later.

use anyhow::Context;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no entry for `{key}` in the {table} table")]
    UnknownVersion { table: &'static str, key: String },
    #[error("malformed version string `{0}`")]
    Malformed(String),
}

/// A version token, ordered componentwise (never lexically).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    parts: Vec<u32>,
}

impl Version {
    pub fn parse(text: &str) -> Result<Self, ResolveError> {
        let parts = text
            .split('.')
            .map(str::parse)
            .collect::<Result<Vec<u32>, _>>()
            .map_err(|_| ResolveError::Malformed(text.to_string()))?;
        Ok(Self { parts })
    }

    pub fn from_parts(parts: &[u32]) -> Self {
        Self {
            parts: parts.to_vec(),
        }
    }

    pub fn parts(&self) -> &[u32] {
        &self.parts
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let canonical = self
            .parts
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(".");
        f.write_str(&canonical)
    }
}

/// Declared facts for one run, read from the environment before anything
/// else executes. They never change during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Facts {
    /// PyQt5 release to build, e.g. `5.11.2`.
    pub pyqt5_version: String,
    /// Target Python as dotted major.minor, e.g. `3.7`.
    pub python_version: String,
    /// Target word size, 32 or 64.
    pub bits: u32,
    /// CI checkout directory receiving all output.
    pub build_folder: PathBuf,
    pub build_id: String,
    pub job_id: String,
}

impl Facts {
    pub fn from_env() -> anyhow::Result<Self> {
        let bits = match std::env::var("TARGET_BITS") {
            Ok(value) => value
                .parse()
                .with_context(|| format!("TARGET_BITS is not a number: {value}"))?,
            Err(_) => 64,
        };

        Ok(Self {
            pyqt5_version: require("PYQT5_VERSION")?,
            python_version: require("PYTHON_VERSION")?,
            bits,
            build_folder: PathBuf::from(require("APPVEYOR_BUILD_FOLDER")?),
            build_id: require("APPVEYOR_BUILD_ID")?,
            job_id: require("APPVEYOR_JOB_ID")?,
        })
    }
}

fn require(name: &str) -> anyhow::Result<String> {
    std::env::var(name).with_context(|| format!("{name} is not set"))
}

/// Python major.minor → required MSVC version.
const MSVC_BY_PYTHON: Table = &[
    ("34", "12.0"),
    ("35", "14.0"),
    ("36", "14.0"),
    ("37", "14.14"),
];

/// MSVC version → Visual Studio product year.
const COMPILER_YEAR_BY_MSVC: Table = &[
    ("10.0", "2010"),
    ("11.0", "2012"),
    ("12.0", "2013"),
    ("14.0", "2015"),
    ("14.1", "2017"),
    ("14.14", "2017"),
];

/// PyQt5 release → compatible sip release.
const SIP_BY_PYQT5: Table = &[
    ("5.5.1", "4.17"),
    ("5.6", "4.19"),
    ("5.7.1", "4.19.8"),
    ("5.8.2", "4.19.8"),
    ("5.9", "4.19.8"),
    ("5.9.2", "4.19.8"),
    ("5.10", "4.19.8"),
    ("5.10.1", "4.19.8"),
    ("5.11.2", "4.19.13.dev1807141053"),
];

const VCVARS_ARCH_BY_BITS: Table = &[("32", "x86"), ("64", "x64")];
const PLAT_NAME_BY_BITS: Table = &[("32", "win32"), ("64", "win_amd64")];
const COMPILER_SUFFIX_BY_BITS: Table = &[("32", ""), ("64", "_64")];

type Table = &'static [(&'static str, &'static str)];

fn lookup(table: Table, name: &'static str, key: &str) -> Result<&'static str, ResolveError> {
    table
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, v)| *v)
        .ok_or_else(|| ResolveError::UnknownVersion {
            table: name,
            key: key.to_string(),
        })
}

/// Everything version-dependent, resolved once before the first step runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub bits: u32,
    pub python_dotted: String,
    pub python_compact: String,
    pub python_tag: String,
    pub msvc_version: String,
    pub msvc_compact: String,
    pub compiler_year: &'static str,
    pub vs_path: PathBuf,
    pub vcvars_arch: &'static str,
    pub compiler_dir: String,
    pub plat_name: &'static str,
    /// Year used in `-platform win32-msvcYYYY`; 2013 tooling uses the 2010
    /// platform spec.
    pub platform_year: &'static str,
    pub sip_version: String,
    pub sip_name: String,
    pub sip_url: String,
    pub pyqt5_version: String,
    pub pyqt5_name: String,
    pub pyqt5_url: String,
    /// `--sip-module=PyQt5.sip` for PyQt5 >= 5.11.
    pub sip_module_args: Vec<String>,
    /// Pluginloader patch file for PyQt5 >= 5.7, versioned at 5.11.
    pub pluginloader_patch: Option<&'static str>,
    /// PyQt5 >= 5.6 expects an explicit `--qmake`.
    pub pass_qmake: bool,
    pub redist_files: Vec<String>,
    /// VS 2017 and later nest the CRT redist under `MSVC/<toolset>`.
    pub redist_in_msvc_subdir: bool,
}

impl ResolvedConfig {
    /// Chain the lookup tables left to right. Pure: same facts, same config.
    pub fn resolve(facts: &Facts) -> Result<Self, ResolveError> {
        let python = Version::parse(&facts.python_version)?;
        let &[major, minor] = python.parts() else {
            return Err(ResolveError::Malformed(facts.python_version.clone()));
        };
        let python_compact = format!("{major}{minor}");
        let python_dotted = format!("{major}.{minor}");

        let msvc_version = lookup(MSVC_BY_PYTHON, "python/msvc", &python_compact)?;
        let compiler_year = lookup(COMPILER_YEAR_BY_MSVC, "msvc/compiler-year", msvc_version)?;
        let msvc = Version::parse(msvc_version)?;

        let vs_path = if msvc >= Version::from_parts(&[14, 1]) {
            PathBuf::from("C:/Program Files (x86)")
                .join("Microsoft Visual Studio")
                .join(compiler_year)
                .join("Community")
        } else {
            PathBuf::from("C:/Program Files (x86)")
                .join(format!("Microsoft Visual Studio {msvc_version}"))
        };

        let bits_key = facts.bits.to_string();
        let vcvars_arch = lookup(VCVARS_ARCH_BY_BITS, "bits/vcvarsall-arch", &bits_key)?;
        let plat_name = lookup(PLAT_NAME_BY_BITS, "bits/wheel-platform", &bits_key)?;
        let compiler_suffix = lookup(COMPILER_SUFFIX_BY_BITS, "bits/compiler-suffix", &bits_key)?;
        let compiler_dir = format!("msvc{compiler_year}{compiler_suffix}");

        let sip_version = lookup(SIP_BY_PYQT5, "pyqt5/sip", &facts.pyqt5_version)?.to_string();
        let sip_name = format!("sip-{sip_version}");
        let sip_url = if sip_version.contains("dev") {
            format!("https://www.riverbankcomputing.com/static/Downloads/sip/sip-{sip_version}.zip")
        } else {
            format!(
                "http://downloads.sourceforge.net/project/pyqt/sip/sip-{sip_version}/{sip_name}.zip"
            )
        };

        let pyqt5 = Version::parse(&facts.pyqt5_version)?;
        let pyqt5_name = if pyqt5 >= Version::from_parts(&[5, 6]) {
            format!("PyQt5_gpl-{}", facts.pyqt5_version)
        } else {
            format!("PyQt-gpl-{}", facts.pyqt5_version)
        };
        let pyqt5_url = format!(
            "http://downloads.sourceforge.net/project/pyqt/PyQt5/PyQt-{}/{pyqt5_name}.zip",
            facts.pyqt5_version
        );

        let sip_module_args = if pyqt5 >= Version::from_parts(&[5, 11]) {
            vec!["--sip-module=PyQt5.sip".to_string()]
        } else {
            Vec::new()
        };

        let pluginloader_patch = if pyqt5 >= Version::from_parts(&[5, 11]) {
            Some("..\\..\\pluginloader.5.11.patch")
        } else if pyqt5 >= Version::from_parts(&[5, 7]) {
            Some("..\\..\\pluginloader.patch")
        } else {
            None
        };

        let msvc_compact = msvc_version.replace('.', "");
        let mut redist_files = vec![format!("msvcp{msvc_compact}.dll")];
        if msvc >= Version::from_parts(&[14]) {
            redist_files.push(format!("vcruntime{msvc_compact}.dll"));
        } else {
            redist_files.push(format!("msvcr{msvc_compact}.dll"));
        }

        Ok(Self {
            bits: facts.bits,
            python_dotted,
            python_tag: format!("cp{python_compact}"),
            python_compact,
            msvc_version: msvc_version.to_string(),
            msvc_compact,
            compiler_year,
            vs_path,
            vcvars_arch,
            compiler_dir,
            plat_name,
            platform_year: if compiler_year == "2013" {
                "2010"
            } else {
                compiler_year
            },
            sip_version,
            sip_name,
            sip_url,
            pyqt5_version: facts.pyqt5_version.clone(),
            pyqt5_name,
            pyqt5_url,
            sip_module_args,
            pluginloader_patch,
            pass_qmake: pyqt5 >= Version::from_parts(&[5, 6]),
            redist_files,
            redist_in_msvc_subdir: msvc >= Version::from_parts(&[14, 1]),
        })
    }
}
