//! LibreOffice engine: a headless `soffice` listener driven by `unoconv`.
//!
//! Each launch gets a fresh user profile under the work directory so a
//! crashed process never leaves a locked or corrupt profile behind for its
//! successor. Documents are submitted with `unoconv --no-launch`, which
//! connects to the already-running listener instead of starting its own.

use super::{Engine, EngineLauncher};
use crate::config::ConverterConfig;
use crate::error::{DocsconvError, EngineError};
use crate::log::SharedLog;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio_stream::wrappers::LinesStream;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

const READY_POLL: Duration = Duration::from_millis(250);
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

const REGISTRY_NO_GL: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<oor:items xmlns:oor="http://openoffice.org/2001/registry" xmlns:xs="http://www.w3.org/2001/XMLSchema" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
<item oor:path="/org.openoffice.Office.Common/VCL"><prop oor:name="UseOpenGL" oor:op="fuse"><value>false</value></prop></item>
<item oor:path="/org.openoffice.Office.Common/VCL"><prop oor:name="ForceOpenGL" oor:op="fuse"><value>false</value></prop></item>
<item oor:path="/org.openoffice.Office.Common/Misc"><prop oor:name="UseOpenCL" oor:op="fuse"><value>false</value></prop></item>
</oor:items>
"#;

/// Launches `soffice` listeners.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfficeLauncher;

/// UNO connection string for a loopback socket listener.
pub fn accept_string(port: u16) -> String {
    format!("socket,host=127.0.0.1,port={port};urp;StarOffice.ComponentContext")
}

/// Command-line arguments for a headless listener using `profile_url`.
pub fn listener_args(profile_url: &str, port: u16) -> Vec<String> {
    vec![
        "--headless".into(),
        "--invisible".into(),
        "--nocrashreport".into(),
        "--nodefault".into(),
        "--nologo".into(),
        "--nofirststartwizard".into(),
        "--norestore".into(),
        format!("-env:UserInstallation={profile_url}"),
        format!("--accept={}", accept_string(port)),
    ]
}

/// Arguments for `unoconv` converting `input` into `output` through the listener on `port`.
pub fn converter_args(port: u16, format: &str, input: &Path, output: &Path) -> Vec<String> {
    vec![
        "--no-launch".into(),
        "--connection".into(),
        accept_string(port),
        "--format".into(),
        format.into(),
        "--output".into(),
        output.display().to_string(),
        input.display().to_string(),
    ]
}

/// `true` if nothing is bound to the loopback `port`.
pub fn port_is_free(port: u16) -> bool {
    std::net::TcpListener::bind(("127.0.0.1", port)).is_ok()
}

/// Create a fresh profile directory, seeding the registry when GL is disabled.
///
/// Returns the directory's `file://` URL.
pub fn prepare_profile(dir: &Path, disable_gl: bool) -> std::io::Result<String> {
    if dir.exists() {
        std::fs::remove_dir_all(dir)?;
    }
    let user = dir.join("user");
    std::fs::create_dir_all(&user)?;
    if disable_gl {
        std::fs::write(user.join("registrymodifications.xcu"), REGISTRY_NO_GL)?;
    }
    let abs = std::fs::canonicalize(dir)?;
    Ok(reqwest::Url::from_directory_path(&abs)
        .map(|u| u.as_str().trim_end_matches('/').to_string())
        .unwrap_or_else(|_| format!("file://{}", abs.display())))
}

async fn probe_port(port: u16) -> bool {
    matches!(
        tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect(("127.0.0.1", port))).await,
        Ok(Ok(_))
    )
}

#[async_trait]
impl EngineLauncher for OfficeLauncher {
    async fn ensure_installed(
        &self,
        config: &ConverterConfig,
        log: &SharedLog,
    ) -> Result<(), DocsconvError> {
        let probe = config.install_probe.clone();
        if office_auto::is_office_installed(&probe) {
            debug!("Engine present at {}", probe.display());
            return Ok(());
        }
        if !config.auto_install {
            return Err(DocsconvError::Install {
                detail: format!("{} is missing and auto-install is disabled", probe.display()),
            });
        }

        let bootstrap = config.bootstrap();
        log.info(&format!(
            "{} not found, installing LibreOffice (this can take several minutes)",
            probe.display()
        ));

        let line_log = Arc::clone(log);
        let outcome = tokio::task::spawn_blocking(move || {
            let forward = |line: &str| line_log.info(line);
            office_auto::ensure_office_installed(&probe, &bootstrap, Some(&forward))
        })
        .await
        .map_err(|e| DocsconvError::Internal(format!("install task panicked: {e}")))?
        .map_err(|e| DocsconvError::Install {
            detail: e.to_string(),
        })?;

        log.info(&format!("LibreOffice install check: {outcome:?}"));
        Ok(())
    }

    async fn launch(
        &self,
        config: &ConverterConfig,
        generation: u64,
        log: &SharedLog,
    ) -> Result<Box<dyn Engine>, EngineError> {
        let port = config.port;
        let home = office_auto::resolve_office_home(&config.office_home);
        let exe = match office_auto::locate_office(&home) {
            Ok(exe) => exe,
            Err(e) if config.install_probe.exists() => {
                debug!("{e}; falling back to {}", config.install_probe.display());
                config.install_probe.clone()
            }
            Err(e) => return Err(EngineError::Launch(e.to_string())),
        };

        if !port_is_free(port) {
            return Err(EngineError::Launch(format!(
                "port {port} is already in use by another process"
            )));
        }

        let profile = config
            .resolved_work_dir()
            .join(format!("profile-{}-{generation}", std::process::id()));
        let profile_url = prepare_profile(&profile, config.disable_hardware_acceleration)
            .map_err(|e| {
                EngineError::Launch(format!("cannot prepare profile {}: {e}", profile.display()))
            })?;

        let mut cmd = Command::new(&exe);
        cmd.args(listener_args(&profile_url, port))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if config.disable_hardware_acceleration {
            cmd.env("SAL_DISABLEGL", "1");
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| EngineError::Launch(format!("cannot spawn {}: {e}", exe.display())))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = LinesStream::new(BufReader::new(stderr).lines());
                while let Some(Ok(line)) = lines.next().await {
                    debug!(target: "docsconv::soffice", "{line}");
                }
            });
        }

        let deadline = Instant::now() + config.start_timeout();
        loop {
            if let Ok(Some(status)) = child.try_wait() {
                let _ = std::fs::remove_dir_all(&profile);
                return Err(EngineError::Launch(format!(
                    "soffice exited with {status} before accepting connections"
                )));
            }
            if probe_port(port).await {
                break;
            }
            if Instant::now() >= deadline {
                let _ = child.kill().await;
                let _ = std::fs::remove_dir_all(&profile);
                return Err(EngineError::Launch(format!(
                    "soffice did not accept connections within {}ms",
                    config.start_timeout_ms
                )));
            }
            tokio::time::sleep(READY_POLL).await;
        }

        let version_exe = exe.clone();
        let version = tokio::task::spawn_blocking(move || office_auto::office_version(&version_exe))
            .await
            .ok()
            .and_then(Result::ok)
            .unwrap_or_else(|| "unknown version".to_string());

        log.info(&format!(
            "LibreOffice {version} listening on 127.0.0.1:{port} (pid {}, generation {generation})",
            child.id().map(|p| p.to_string()).unwrap_or_else(|| "?".into())
        ));

        Ok(Box::new(OfficeProcess {
            child,
            port,
            converter: config.converter_program.clone(),
            profile,
        }))
    }
}

/// A running `soffice` listener.
#[derive(Debug)]
pub struct OfficeProcess {
    child: Child,
    port: u16,
    converter: PathBuf,
    profile: PathBuf,
}

#[async_trait]
impl Engine for OfficeProcess {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    async fn probe(&self) -> bool {
        probe_port(self.port).await
    }

    async fn convert(&self, input: &Path, output: &Path) -> Result<(), EngineError> {
        let format = output
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| {
                EngineError::Conversion(format!("output {} has no extension", output.display()))
            })?
            .to_ascii_lowercase();

        let result = Command::new(&self.converter)
            .args(converter_args(self.port, &format, input, output))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                EngineError::Conversion(format!("cannot run {}: {e}", self.converter.display()))
            })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let detail = stderr
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .map(str::trim)
                .map(str::to_string)
                .unwrap_or_else(|| format!("converter exited with {}", result.status));

            if stderr.contains("Unable to connect") || !self.probe().await {
                return Err(EngineError::ConnectionLost(detail));
            }
            return Err(EngineError::Conversion(detail));
        }

        match tokio::fs::metadata(output).await {
            Ok(m) if m.len() > 0 => Ok(()),
            Ok(_) => Err(EngineError::Conversion("engine produced an empty file".into())),
            Err(_) => Err(EngineError::Conversion(format!(
                "engine reported success but {} was not written",
                output.display()
            ))),
        }
    }

    async fn terminate(&mut self, grace: Duration) -> Result<(), EngineError> {
        let result = self.shutdown_child(grace).await;
        if let Err(e) = std::fs::remove_dir_all(&self.profile) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Could not remove profile {}: {e}", self.profile.display());
            }
        }
        result
    }
}

impl OfficeProcess {
    async fn shutdown_child(&mut self, grace: Duration) -> Result<(), EngineError> {
        if let Ok(Some(_)) = self.child.try_wait() {
            return Ok(());
        }

        #[cfg(unix)]
        if let Some(pid) = self.child.id() {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                debug!("SIGTERM to {pid} failed: {e}");
            }
            if let Ok(Ok(status)) = tokio::time::timeout(grace, self.child.wait()).await {
                debug!("soffice {pid} exited with {status}");
                return Ok(());
            }
            warn!("soffice {pid} ignored SIGTERM for {}ms, killing", grace.as_millis());
        }

        #[cfg(not(unix))]
        let _ = grace;

        self.child
            .kill()
            .await
            .map_err(|e| EngineError::Terminate(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listener_args_bind_loopback_port() {
        let args = listener_args("file:///tmp/p", 2002);
        assert!(args.contains(&"--headless".to_string()));
        assert!(args.contains(&"-env:UserInstallation=file:///tmp/p".to_string()));
        assert!(args.contains(
            &"--accept=socket,host=127.0.0.1,port=2002;urp;StarOffice.ComponentContext".to_string()
        ));
    }

    #[test]
    fn converter_args_never_launch_their_own_office() {
        let args = converter_args(2010, "pdf", Path::new("/in/a.docx"), Path::new("/out/a.pdf"));
        assert_eq!(args[0], "--no-launch");
        assert_eq!(args[2], accept_string(2010));
        assert_eq!(args[4], "pdf");
        assert_eq!(args.last().unwrap(), "/in/a.docx");
    }

    #[test]
    fn profile_seeds_registry_only_when_gl_disabled() {
        let dir = tempfile::tempdir().unwrap();

        let with = dir.path().join("a");
        let url = prepare_profile(&with, true).unwrap();
        assert!(url.starts_with("file://"), "got: {url}");
        assert!(!url.ends_with('/'));
        let xcu = std::fs::read_to_string(with.join("user/registrymodifications.xcu")).unwrap();
        assert!(xcu.contains(r#"oor:name="UseOpenGL""#));

        let without = dir.path().join("b");
        prepare_profile(&without, false).unwrap();
        assert!(!without.join("user/registrymodifications.xcu").exists());
    }

    #[test]
    fn profile_is_recreated_from_scratch() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("profile");
        std::fs::create_dir_all(p.join("user")).unwrap();
        std::fs::write(p.join("user/.lock"), b"stale").unwrap();
        prepare_profile(&p, false).unwrap();
        assert!(!p.join("user/.lock").exists());
    }

    #[test]
    fn bound_port_is_not_free() {
        let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(!port_is_free(port));
        drop(listener);
    }

    #[tokio::test]
    async fn missing_install_without_auto_install_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConverterConfig::builder()
            .install_probe(dir.path().join("soffice"))
            .auto_install(false)
            .build()
            .unwrap();
        let log: SharedLog = Arc::new(crate::log::NoopLog);
        let err = OfficeLauncher.ensure_installed(&config, &log).await.unwrap_err();
        assert!(matches!(err, DocsconvError::Install { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_bootstrap_is_an_install_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConverterConfig::builder()
            .install_probe(dir.path().join("soffice"))
            .bootstrap_script("echo no package manager >&2; exit 1")
            .build()
            .unwrap();
        let log: SharedLog = Arc::new(crate::log::NoopLog);
        let err = OfficeLauncher.ensure_installed(&config, &log).await.unwrap_err();
        assert!(err.to_string().contains("installation failed"), "got: {err}");
    }
}
