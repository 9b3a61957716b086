//! # office-auto
//!
//! Locate and, when missing, bootstrap a headless
//! [LibreOffice](https://www.libreoffice.org/) installation so that callers
//! which drive `soffice` as a conversion engine never have to check for it
//! by hand.
//!
//! ## How it works
//!
//! On a call to [`ensure_office_installed`]:
//!
//! 1. Checks whether the probe executable (default `/usr/bin/soffice`) exists.
//!    If it does, nothing else happens: the bootstrap command is never run.
//! 2. Otherwise runs the [`Bootstrap`] command (default: a non-interactive
//!    `apt-get install` of LibreOffice, `unoconv` and fonts) and forwards
//!    every line it prints, stdout and stderr alike, to the caller.
//! 3. A non-zero exit status is reported as
//!    [`OfficeAutoError::BootstrapFailed`]. There is no retry.
//!
//! All functions here are blocking. Async callers should wrap them in
//! `tokio::task::spawn_blocking`.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use office_auto::{ensure_office_installed, Bootstrap, DEFAULT_PROBE};
//! use std::path::Path;
//!
//! let outcome = ensure_office_installed(
//!     Path::new(DEFAULT_PROBE),
//!     &Bootstrap::default(),
//!     Some(&|line: &str| eprintln!("[install] {line}")),
//! )
//! .expect("LibreOffice unavailable");
//! println!("{outcome:?}");
//! ```
//!
//! ## Environment variable overrides
//!
//! - `DOCSCONV_OFFICE_HOME`: office installation directory; wins over the
//!   configured one.
//! - `DOCSCONV_WORK_DIR`: directory holding per-process engine profiles.

use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Mutex, OnceLock, PoisonError};

use regex::Regex;
use thiserror::Error;

// ── Public constants ─────────────────────────────────────────────────────────

/// Default LibreOffice installation directory on Debian-family systems.
pub const DEFAULT_OFFICE_HOME: &str = "/usr/lib/libreoffice";

/// Executable whose presence means "already installed".
pub const DEFAULT_PROBE: &str = "/usr/bin/soffice";

/// Shell script run by [`Bootstrap::default`].
pub const DEFAULT_BOOTSTRAP_SCRIPT: &str = "export DEBIAN_FRONTEND=noninteractive && \
apt-get update && apt-get install -y --no-install-recommends \
tzdata libreoffice libreoffice-java-common default-jre fonts-liberation \
libgl1 libglx-mesa0 libxinerama1 libdbus-glib-1-2 unoconv";

// ── Error type ───────────────────────────────────────────────────────────────

/// Errors returned by office-auto operations.
#[derive(Error, Debug)]
pub enum OfficeAutoError {
    /// The bootstrap (or version) command could not be spawned at all.
    #[error("Failed to run '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The bootstrap command ran but exited unsuccessfully.
    #[error("Bootstrap command exited unsuccessfully (exit code {code:?})")]
    BootstrapFailed { code: Option<i32> },

    /// The bootstrap reported success but the probe executable is still missing.
    #[error("Bootstrap finished but '{probe}' is still missing")]
    StillMissing { probe: PathBuf },

    /// No `soffice` executable under the office home.
    #[error("LibreOffice executable not found under '{home}'")]
    NotFound { home: PathBuf },

    /// `soffice --version` printed something unrecognisable.
    #[error("Could not determine LibreOffice version: {0}")]
    Version(String),
}

/// What [`ensure_office_installed`] had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    /// The probe executable was already present; nothing was run.
    AlreadyPresent,
    /// The bootstrap command ran and succeeded.
    Installed,
}

// ── Bootstrap command ────────────────────────────────────────────────────────

/// The privileged command that installs the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bootstrap {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl Bootstrap {
    /// Run `script` through `/bin/sh -c`.
    pub fn shell(script: impl Into<String>) -> Self {
        Self {
            program: PathBuf::from("/bin/sh"),
            args: vec!["-c".to_string(), script.into()],
        }
    }

    fn describe(&self) -> String {
        let mut s = self.program.display().to_string();
        for a in &self.args {
            s.push(' ');
            s.push_str(a);
        }
        s
    }
}

impl Default for Bootstrap {
    fn default() -> Self {
        Self::shell(DEFAULT_BOOTSTRAP_SCRIPT)
    }
}

// Two threads must never run apt-get at the same time.
static INSTALL_LOCK: Mutex<()> = Mutex::new(());

// ── Public API ───────────────────────────────────────────────────────────────

/// Returns `true` if the probe executable exists.
pub fn is_office_installed(probe: &Path) -> bool {
    probe.exists()
}

/// Ensures the engine is installed, running `bootstrap` only when `probe` is
/// missing.
///
/// `on_line` receives each line of bootstrap output as it is produced. The
/// callback may be invoked from two threads (one per output pipe), hence the
/// `Sync` bound.
pub fn ensure_office_installed(
    probe: &Path,
    bootstrap: &Bootstrap,
    on_line: Option<&(dyn Fn(&str) + Sync)>,
) -> Result<InstallOutcome, OfficeAutoError> {
    if is_office_installed(probe) {
        return Ok(InstallOutcome::AlreadyPresent);
    }

    let _guard = INSTALL_LOCK.lock().unwrap_or_else(PoisonError::into_inner);

    // Another thread may have finished the install while we waited.
    if is_office_installed(probe) {
        return Ok(InstallOutcome::AlreadyPresent);
    }

    run_bootstrap(bootstrap, on_line)?;

    if !is_office_installed(probe) {
        return Err(OfficeAutoError::StillMissing {
            probe: probe.to_path_buf(),
        });
    }
    Ok(InstallOutcome::Installed)
}

/// Resolve the office home, honouring `DOCSCONV_OFFICE_HOME`.
pub fn resolve_office_home(configured: &Path) -> PathBuf {
    match std::env::var("DOCSCONV_OFFICE_HOME") {
        Ok(v) if !v.is_empty() => PathBuf::from(v),
        _ => configured.to_path_buf(),
    }
}

/// Path of the `soffice` binary inside an office home.
pub fn soffice_path(home: &Path) -> PathBuf {
    let name = if cfg!(windows) { "soffice.exe" } else { "soffice" };
    home.join("program").join(name)
}

/// Returns the `soffice` executable under `home`, or an error if absent.
pub fn locate_office(home: &Path) -> Result<PathBuf, OfficeAutoError> {
    let exe = soffice_path(home);
    if exe.exists() {
        Ok(exe)
    } else {
        Err(OfficeAutoError::NotFound {
            home: home.to_path_buf(),
        })
    }
}

/// Runs `<exe> --version` and extracts the dotted version number.
pub fn office_version(exe: &Path) -> Result<String, OfficeAutoError> {
    let output = Command::new(exe)
        .arg("--version")
        .stdin(Stdio::null())
        .output()
        .map_err(|e| OfficeAutoError::Spawn {
            command: format!("{} --version", exe.display()),
            source: e,
        })?;

    let text = String::from_utf8_lossy(&output.stdout);
    parse_version(&text).ok_or_else(|| OfficeAutoError::Version(text.trim().to_string()))
}

/// Extract `7.4.7.2` from `LibreOffice 7.4.7.2 40(Build:2)`.
pub fn parse_version(text: &str) -> Option<String> {
    static VERSION_RE: OnceLock<Regex> = OnceLock::new();
    let re = VERSION_RE.get_or_init(|| {
        Regex::new(r"(?:LibreOffice|OpenOffice)(?:\.org)?\s+(\d+(?:\.\d+)+)").expect("static regex")
    });
    re.captures(text).map(|c| c[1].to_string())
}

/// Returns the directory under which per-process engine profiles are created.
///
/// Default locations:
/// - **Linux**: `~/.cache/docsconv/`
/// - **macOS**: `~/Library/Caches/docsconv/`
/// - **Windows**: `%LOCALAPPDATA%\docsconv\`
///
/// Override by setting `DOCSCONV_WORK_DIR`.
pub fn default_work_dir() -> PathBuf {
    if let Ok(override_dir) = std::env::var("DOCSCONV_WORK_DIR") {
        if !override_dir.is_empty() {
            return PathBuf::from(override_dir);
        }
    }

    let base = dirs::cache_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".cache")))
        .unwrap_or_else(std::env::temp_dir);

    base.join("docsconv")
}

// ── Internal helpers ─────────────────────────────────────────────────────────

fn run_bootstrap(
    bootstrap: &Bootstrap,
    on_line: Option<&(dyn Fn(&str) + Sync)>,
) -> Result<(), OfficeAutoError> {
    let mut child = Command::new(&bootstrap.program)
        .args(&bootstrap.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| OfficeAutoError::Spawn {
            command: bootstrap.describe(),
            source: e,
        })?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    std::thread::scope(|s| {
        if let Some(err) = stderr {
            s.spawn(move || forward_lines(err, on_line));
        }
        if let Some(out) = stdout {
            forward_lines(out, on_line);
        }
    });

    let status = child.wait().map_err(|e| OfficeAutoError::Spawn {
        command: bootstrap.describe(),
        source: e,
    })?;

    if status.success() {
        Ok(())
    } else {
        Err(OfficeAutoError::BootstrapFailed {
            code: status.code(),
        })
    }
}

fn forward_lines(pipe: impl Read, on_line: Option<&(dyn Fn(&str) + Sync)>) {
    for line in BufReader::new(pipe).lines() {
        match line {
            Ok(l) => {
                if let Some(cb) = on_line {
                    cb(&l);
                }
            }
            Err(_) => break,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn present_probe_never_runs_bootstrap() {
        let dir = tempfile::tempdir().unwrap();
        let probe = dir.path().join("soffice");
        std::fs::write(&probe, b"").unwrap();
        let marker = dir.path().join("bootstrap-ran");

        let bootstrap = Bootstrap::shell(format!("touch '{}'", marker.display()));
        let outcome = ensure_office_installed(&probe, &bootstrap, None).unwrap();

        assert_eq!(outcome, InstallOutcome::AlreadyPresent);
        assert!(!marker.exists(), "bootstrap must not run when probe exists");
    }

    #[cfg(unix)]
    #[test]
    fn bootstrap_output_is_streamed_line_by_line() {
        let dir = tempfile::tempdir().unwrap();
        let probe = dir.path().join("soffice");
        let script = format!(
            "echo fetching; echo warning >&2; echo unpacking; touch '{}'",
            probe.display()
        );

        let lines = Mutex::new(Vec::<String>::new());
        let collect = |l: &str| lines.lock().unwrap().push(l.to_string());
        let outcome =
            ensure_office_installed(&probe, &Bootstrap::shell(script), Some(&collect)).unwrap();

        assert_eq!(outcome, InstallOutcome::Installed);
        let lines = lines.into_inner().unwrap();
        assert_eq!(lines.len(), 3, "got: {lines:?}");
        assert!(lines.contains(&"fetching".to_string()));
        assert!(lines.contains(&"warning".to_string()));
        assert!(lines.contains(&"unpacking".to_string()));
    }

    #[cfg(unix)]
    #[test]
    fn failing_bootstrap_reports_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let probe = dir.path().join("soffice");

        let err = ensure_office_installed(&probe, &Bootstrap::shell("exit 3"), None).unwrap_err();
        match err {
            OfficeAutoError::BootstrapFailed { code } => assert_eq!(code, Some(3)),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn successful_bootstrap_without_probe_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let probe = dir.path().join("soffice");

        let err = ensure_office_installed(&probe, &Bootstrap::shell("true"), None).unwrap_err();
        assert!(matches!(err, OfficeAutoError::StillMissing { .. }));
    }

    #[test]
    fn missing_bootstrap_program_is_a_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let bootstrap = Bootstrap {
            program: dir.path().join("no-such-installer"),
            args: vec![],
        };
        let err = ensure_office_installed(&dir.path().join("soffice"), &bootstrap, None).unwrap_err();
        assert!(matches!(err, OfficeAutoError::Spawn { .. }));
    }

    #[test]
    fn parses_libreoffice_version_banner() {
        assert_eq!(
            parse_version("LibreOffice 7.4.7.2 40(Build:2)\n").as_deref(),
            Some("7.4.7.2")
        );
        assert_eq!(
            parse_version("LibreOffice 24.2.1.2 db4def46b0453cc22e2d0305797cf981b68ef5ac").as_deref(),
            Some("24.2.1.2")
        );
        assert_eq!(parse_version("command not found"), None);
    }

    #[test]
    fn locate_office_reports_missing_home() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            locate_office(dir.path()),
            Err(OfficeAutoError::NotFound { .. })
        ));

        let program = dir.path().join("program");
        std::fs::create_dir_all(&program).unwrap();
        std::fs::write(soffice_path(dir.path()), b"").unwrap();
        assert_eq!(locate_office(dir.path()).unwrap(), soffice_path(dir.path()));
    }

    #[test]
    fn work_dir_override_via_env() {
        std::env::set_var("DOCSCONV_WORK_DIR", "/tmp/test_docsconv_override");
        let d = default_work_dir();
        std::env::remove_var("DOCSCONV_WORK_DIR");
        assert_eq!(d, PathBuf::from("/tmp/test_docsconv_override"));
    }

    #[test]
    fn default_bootstrap_installs_unoconv() {
        let b = Bootstrap::default();
        assert_eq!(b.program, PathBuf::from("/bin/sh"));
        assert!(b.args[1].contains("libreoffice"));
        assert!(b.args[1].contains("unoconv"));
    }
}
