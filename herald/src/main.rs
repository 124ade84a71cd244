mod config;
mod dismiss;
mod input;
mod layout;
mod lock;
mod session;
mod text;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use wayland_client::Connection;

use crate::config::Config;
use crate::dismiss::Cause;
use crate::input::Request;
use crate::layout::{Corner, FontMetrics};
use crate::lock::InstanceLock;
use crate::session::{Content, Session};
use crate::text::TextRenderer;

/// Show a notification popup until it is clicked or times out.
#[derive(Parser, Debug)]
#[command(name = "herald", version)]
struct Cli {
    /// Lines to show, one per argument. Read from stdin when omitted.
    lines: Vec<String>,
    /// Seconds before the popup closes itself; 0 waits for a click.
    #[arg(short, long)]
    duration: Option<u64>,
    /// Screen corner to place the popup in.
    #[arg(short, long, value_enum)]
    corner: Option<Corner>,
    /// Config file instead of ~/.config/widgets/herald.toml.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Lock file shared by all herald processes.
    #[arg(long)]
    lock_file: Option<PathBuf>,
    /// Return immediately and show the popup from a background process.
    #[arg(long)]
    detach: bool,
}

impl Cli {
    fn apply(&self, cfg: &mut Config) {
        if let Some(d) = self.duration { cfg.duration = d; }
        if let Some(c) = self.corner { cfg.corner = c; }
        if let Some(p) = &self.lock_file { cfg.lock_file = Some(p.display().to_string()); }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env("HERALD_LOG").unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut cfg = config::load_config(cli.config.as_deref())?;
    cli.apply(&mut cfg);

    let request = if cli.lines.is_empty() {
        input::from_stdin(cfg.max_line_length).context("failed to read stdin")?
    } else {
        input::from_args(&cli.lines, cfg.max_line_length)
    };
    let Some(request) = request else {
        info!("no input, nothing to show");
        return Ok(());
    };

    if cli.detach && detach()? {
        return Ok(());
    }

    // No SA_RESTART yet, so a signal can break the wait on the lock.
    dismiss::signals::install(false).context("failed to install signal handlers")?;
    let lock_path = cfg.lock_path();
    let mut lock = InstanceLock::open(&lock_path)
        .with_context(|| format!("failed to open lock file {}", lock_path.display()))?;
    let Some(guard) = lock
        .acquire(|| dismiss::signals::pending().is_some())
        .with_context(|| format!("failed to lock {}", lock_path.display()))?
    else {
        info!("interrupted while queued");
        return Ok(());
    };
    dismiss::signals::install(true).context("failed to install signal handlers")?;

    let result = show(&request, &cfg, &guard);
    guard.release();
    result
}

fn show(request: &Request, cfg: &Config, guard: &lock::LockGuard<'_>) -> Result<()> {
    let conn = Connection::connect_to_env().context("cannot connect to the Wayland display")?;
    let screen = session::probe_screen(&conn)?;

    let mut text = TextRenderer::new(&cfg.font, cfg.font_size)
        .with_context(|| format!("failed to load font {}", cfg.font))?;
    let lines = layout::measure_all(request.lines(), &mut text);
    let line_height = text.line_height().ceil() as u32;
    let geometry = layout::compute(&lines, line_height, &cfg.layout(), screen);
    if !geometry.fits(screen) {
        warn!(?geometry, ?screen, "popup does not fit on the screen");
    }

    let colors = config::load_colors(cfg);
    let content = Content { text, lines, line_height };
    let mut session = Session::create(&conn, geometry, screen, cfg, colors, content, guard)?;
    let cause = session.run();
    match settle(cause, session.destroy())? {
        Cause::Signal(sig) => info!(signal = sig, "dismissed by signal"),
        cause => info!(?cause, "dismissed"),
    }
    Ok(())
}

/// Outcome of a session given its loop result and teardown result. A loop
/// failure is reported ahead of a teardown failure, which is only logged.
fn settle(cause: Result<Cause>, teardown: Result<()>) -> Result<Cause> {
    match (cause, teardown) {
        (cause, Ok(())) => cause,
        (Err(e), Err(t)) => {
            warn!("teardown also failed: {t:#}");
            Err(e)
        }
        (Ok(cause), Err(t)) => {
            info!(?cause, "dismissed");
            Err(t.context("failed to tear down the popup"))
        }
    }
}

/// Forks into a new session. True in the parent, which should exit.
fn detach() -> Result<bool> {
    // SAFETY: no other threads exist yet.
    match unsafe { libc::fork() } {
        -1 => Err(std::io::Error::last_os_error()).context("failed to fork"),
        0 => {
            // SAFETY: plain syscall in the freshly forked child.
            unsafe { libc::setsid() };
            Ok(false)
        }
        _ => Ok(true),
    }
}
