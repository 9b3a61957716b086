//! CLI binary for docsconv.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ConverterConfig`, runs the service and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use docsconv::input::{resolve_input, ResolvedInput};
use docsconv::{
    convert_document, ConversionResult, ConversionService, ConvertRequest, ConvertResponse,
    ConverterConfig, DirectoryStore,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Word to PDF, next to the input
  docsconv report.docx

  # Several files to ODT in another directory
  docsconv --to odt -o out/ a.docx b.rtf c.doc

  # Convert from URL
  docsconv --to pdf https://example.com/files/slides.pptx -o slides/

  # Install check + engine start only
  docsconv --check

  # Run a convertDocument request against a directory-backed store
  docsconv --request req.json --store ./files

ENVIRONMENT VARIABLES:
  DOCSCONV_CONFIG          JSON config file (camelCase keys)
  DOCSCONV_PORT            Engine port (default 2002)
  DOCSCONV_TASK_TIMEOUT_MS Per-conversion timeout (default 120000)
  DOCSCONV_MAX_TASKS       Conversions per engine process before recycling (default 10)
  DOCSCONV_OFFICE_HOME     LibreOffice installation directory
  DOCSCONV_WORK_DIR        Directory for engine profiles
  RUST_LOG                 Log filter, e.g. docsconv=debug

SETUP:
  LibreOffice and unoconv are installed with apt-get on first start when
  /usr/bin/soffice is missing (needs root). Pass --no-install to fail instead.
"#;

/// Convert office documents through a supervised headless LibreOffice.
#[derive(Parser, Debug)]
#[command(
    name = "docsconv",
    version,
    about = "Convert office documents through a supervised headless LibreOffice",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local files or HTTP/HTTPS URLs to convert.
    inputs: Vec<String>,

    /// Target format extension (pdf, docx, odt, html, txt, …).
    #[arg(short, long, env = "DOCSCONV_TO", default_value = "pdf")]
    to: String,

    /// Output directory. Defaults to each input's directory (cwd for URLs).
    #[arg(short, long, env = "DOCSCONV_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// JSON configuration file.
    #[arg(long, env = "DOCSCONV_CONFIG")]
    config: Option<PathBuf>,

    /// Engine TCP port.
    #[arg(long, env = "DOCSCONV_PORT")]
    port: Option<u16>,

    /// Per-conversion timeout in milliseconds.
    #[arg(long, env = "DOCSCONV_TASK_TIMEOUT_MS")]
    timeout_ms: Option<u64>,

    /// Conversions served per engine process before it is restarted.
    #[arg(long, env = "DOCSCONV_MAX_TASKS")]
    max_tasks: Option<u32>,

    /// LibreOffice installation directory.
    #[arg(long)]
    office_home: Option<PathBuf>,

    /// Keep OpenGL enabled in the engine.
    #[arg(long)]
    enable_gl: bool,

    /// Fail instead of installing LibreOffice when it is missing.
    #[arg(long, env = "DOCSCONV_NO_INSTALL")]
    no_install: bool,

    /// Only check the installation and start the engine.
    #[arg(long)]
    check: bool,

    /// convertDocument request (JSON file) to execute.
    #[arg(long, requires = "store")]
    request: Option<PathBuf>,

    /// Directory-backed file store for --request.
    #[arg(long)]
    store: Option<PathBuf>,

    /// Output structured JSON instead of text.
    #[arg(long, env = "DOCSCONV_JSON")]
    json: bool,

    /// Disable the startup spinner.
    #[arg(long, env = "DOCSCONV_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DOCSCONV_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "DOCSCONV_QUIET")]
    quiet: bool,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "DOCSCONV_DOWNLOAD_TIMEOUT")]
    download_timeout: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || cli.json {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let config = build_config(&cli)?;
    let service = ConversionService::new(config);

    // ── Engine start ─────────────────────────────────────────────────────
    let spinner = show_progress.then(|| {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]),
        );
        bar.set_prefix("Engine");
        bar.set_message("starting LibreOffice…");
        bar.enable_steady_tick(Duration::from_millis(80));
        bar
    });

    // A bootstrap install can take minutes; Ctrl-C must still stop cleanly.
    let started = tokio::select! {
        started = service.start() => Some(started),
        _ = tokio::signal::ctrl_c() => None,
    };
    let Some(started) = started else {
        if let Some(bar) = &spinner {
            bar.finish_and_clear();
        }
        eprintln!("{} Interrupted during startup, stopping…", cyan("⚠"));
        if let Err(e) = service.stop().await {
            eprintln!("{} {e}", red("✘"));
        }
        anyhow::bail!("Interrupted");
    };
    if let Some(bar) = &spinner {
        match &started {
            Ok(()) => bar.finish_with_message("ready ✓"),
            Err(_) => bar.finish_and_clear(),
        }
    }
    started.context("Failed to start the conversion service")?;

    let outcome = if cli.check {
        report_engine(&service, &cli)
    } else if let Some(request) = &cli.request {
        run_request(&service, &cli, request).await
    } else {
        run_conversions(&service, &cli).await
    };

    if let Err(e) = service.stop().await {
        eprintln!("{} {e}", red("✘"));
    }
    outcome
}

/// Map config file, CLI args and env vars to `ConverterConfig`.
fn build_config(cli: &Cli) -> Result<ConverterConfig> {
    let base = match &cli.config {
        Some(path) => ConverterConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ConverterConfig::default(),
    };

    let mut builder = base.into_builder();
    if let Some(port) = cli.port {
        builder = builder.port(port);
    }
    if let Some(ms) = cli.timeout_ms {
        builder = builder.task_timeout_ms(ms);
    }
    if let Some(n) = cli.max_tasks {
        builder = builder.max_tasks_per_process(n);
    }
    if let Some(home) = &cli.office_home {
        builder = builder.office_home(home.clone());
    }
    if cli.enable_gl {
        builder = builder.disable_hardware_acceleration(false);
    }
    if cli.no_install {
        builder = builder.auto_install(false);
    }
    if let Some(secs) = cli.download_timeout {
        builder = builder.download_timeout_secs(secs);
    }

    builder.build().context("Invalid configuration")
}

fn report_engine(service: &ConversionService, cli: &Cli) -> Result<()> {
    let info = service.engine_info();
    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&info).context("Failed to serialise engine info")?
        );
    } else if let Some(info) = info {
        println!("Office home:  {}", info.office_home.display());
        println!("Port:         {}", info.port);
        if let Some(pid) = info.pid {
            println!("PID:          {pid}");
        }
        println!("Generation:   {}", info.generation);
    }
    Ok(())
}

async fn run_request(service: &ConversionService, cli: &Cli, request: &Path) -> Result<()> {
    let raw = tokio::fs::read_to_string(request)
        .await
        .with_context(|| format!("Failed to read request {}", request.display()))?;
    let request: ConvertRequest =
        serde_json::from_str(&raw).context("Request is not a valid convertDocument payload")?;
    let root = cli
        .store
        .clone()
        .context("--store is required with --request")?;
    let store = DirectoryStore::open(root).context("Failed to open file store")?;

    let response = convert_document(service, &store, &request).await;
    println!(
        "{}",
        serde_json::to_string_pretty(&response).context("Failed to serialise response")?
    );
    match response {
        ConvertResponse::Ok { .. } => Ok(()),
        ConvertResponse::Error { error } => anyhow::bail!(error),
    }
}

async fn run_conversions(service: &ConversionService, cli: &Cli) -> Result<()> {
    if cli.inputs.is_empty() {
        anyhow::bail!("No input files given (see --help)");
    }
    let ext = cli.to.trim_start_matches('.').to_ascii_lowercase();
    if let Some(dir) = &cli.output_dir {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    // Resolved inputs own downloaded temp files; keep them alive until done.
    let mut resolved: Vec<(String, ResolvedInput, PathBuf)> = Vec::new();
    let mut failures = 0usize;
    for raw in &cli.inputs {
        match resolve_input(raw, service.config().download_timeout_secs).await {
            Ok(input) => {
                let output = output_path(&input, cli.output_dir.as_deref(), &ext);
                if output == input.path() {
                    failures += 1;
                    eprintln!("  {} {raw}: already a .{ext} file", red("✗"));
                    continue;
                }
                resolved.push((raw.clone(), input, output));
            }
            Err(e) => {
                failures += 1;
                eprintln!("  {} {raw}: {e}", red("✗"));
            }
        }
    }

    let jobs = resolved
        .iter()
        .map(|(_, input, output)| service.convert(input.path(), output));
    let results: Vec<ConversionResult> = tokio::select! {
        results = futures::future::join_all(jobs) => results,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("{} Interrupted, stopping…", cyan("⚠"));
            anyhow::bail!("Interrupted");
        }
    };

    let mut report = Vec::with_capacity(results.len());
    for ((raw, _, _), result) in resolved.iter().zip(results) {
        match &result {
            Ok(out) if !cli.quiet && !cli.json => eprintln!(
                "  {} {}  →  {}  {}",
                green("✓"),
                raw,
                bold(&out.output.display().to_string()),
                dim(&format!("{} bytes, {:.1}s", out.bytes, out.duration_ms as f64 / 1000.0)),
            ),
            Ok(_) => {}
            Err(e) => {
                failures += 1;
                if !cli.json {
                    eprintln!("  {} {raw}: {}", red("✗"), red(&e.to_string()));
                }
            }
        }
        report.push(serde_json::json!({
            "input": raw,
            "result": match &result {
                Ok(out) => serde_json::json!({ "ok": out }),
                Err(e) => serde_json::json!({ "error": e.to_string() }),
            },
        }));
    }

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialise results")?
        );
    }

    let total = cli.inputs.len();
    if failures > 0 {
        anyhow::bail!("{failures} of {total} conversion(s) failed");
    }
    if !cli.quiet && !cli.json {
        eprintln!(
            "{} {} document(s) converted",
            green("✔"),
            bold(&total.to_string())
        );
    }
    Ok(())
}

/// `<dir>/<stem>.<ext>`. Without `dir`, local inputs convert next to
/// themselves and downloads into the working directory.
fn output_path(input: &ResolvedInput, dir: Option<&Path>, ext: &str) -> PathBuf {
    let path = input.path();
    let stem = path
        .file_stem()
        .map(|s| s.to_os_string())
        .unwrap_or_else(|| "converted".into());
    let dir = match (dir, input) {
        (Some(d), _) => d.to_path_buf(),
        (None, ResolvedInput::Downloaded { .. }) => PathBuf::new(),
        (None, ResolvedInput::Local(p)) => p.parent().map(Path::to_path_buf).unwrap_or_default(),
    };
    let mut name = stem;
    name.push(".");
    name.push(ext);
    dir.join(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_lands_next_to_local_input() {
        let input = ResolvedInput::Local(PathBuf::from("/data/in/report.docx"));
        assert_eq!(
            output_path(&input, None, "pdf"),
            PathBuf::from("/data/in/report.pdf")
        );
        assert_eq!(
            output_path(&input, Some(Path::new("/out")), "odt"),
            PathBuf::from("/out/report.odt")
        );
    }

    #[test]
    fn config_overrides_apply_on_top_of_defaults() {
        let cli = Cli::parse_from(["docsconv", "--port", "2100", "--max-tasks", "3", "a.docx"]);
        let config = build_config(&cli).unwrap();
        assert_eq!(config.port, 2100);
        assert_eq!(config.max_tasks_per_process, 3);
        assert_eq!(config.task_timeout_ms, 120_000);
    }
}
