mod agent;
mod status;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use mdm_core::{
    EmergencyShutdown, Level, LineName, SupervisorConfig, install_panic_hook,
    sim::{SimBench, drive_restarts},
};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::prelude::*;

use crate::{agent::AgentOptions, status::StatusFile};

const PANIC_ACK_AFTER: Duration = Duration::from_millis(300);

#[derive(Debug, Parser)]
#[command(name = "mdm-cli", version)]
#[command(about = "Run the external modem supervisor against a simulated board", long_about = None)]
struct Args {
    /// Board configuration (JSON). Defaults apply when unset or missing.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Write a JSON status snapshot here while running.
    #[arg(long, value_name = "PATH")]
    status_file: Option<PathBuf>,
    /// Interval between status snapshots.
    #[arg(long, default_value_t = 1000)]
    status_interval_ms: u64,
    /// Time the simulated modem takes to assert MDM2AP_STATUS after power-on.
    #[arg(long, default_value_t = 500)]
    boot_delay_ms: u64,
    /// Inject a modem fault this long after start.
    #[arg(long, value_name = "MS")]
    crash_after_ms: Option<u64>,
    /// Kind of fault to inject.
    #[arg(long, value_enum, default_value_t = CrashKind::Errfatal)]
    crash_kind: CrashKind,
    /// Make the boot agent report every boot after the first as failed.
    #[arg(long)]
    agent_fails_boot: bool,
    /// Skip memory-dump collection during restarts.
    #[arg(long)]
    no_ramdumps: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CrashKind {
    /// Raise MDM2AP_ERRFATAL.
    Errfatal,
    /// Drop MDM2AP_STATUS.
    Status,
}

impl CrashKind {
    fn inject(self, bench: &SimBench) {
        match self {
            CrashKind::Errfatal => bench.set_input(LineName::Mdm2ApErrfatal, Level::High),
            CrashKind::Status => bench.set_input(LineName::Mdm2ApStatus, Level::Low),
        }
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = match args.config.as_ref() {
        Some(path) => {
            info!(path = ?path, "loading board config");
            SupervisorConfig::load(path)?
        }
        None => {
            debug!("no board config; using defaults");
            SupervisorConfig::default()
        }
    };

    let bench = Arc::new(SimBench::new(config));
    bench
        .modem
        .set_auto_boot(Some(Duration::from_millis(args.boot_delay_ms)));
    let requests = bench.orchestrator.subscribe();
    let supervisor = bench.attach().context("attach supervisor")?;
    install_panic_hook(EmergencyShutdown::new(
        &supervisor,
        bench.panic_platform(Some(PANIC_ACK_AFTER)),
    ));
    info!(subsystem = supervisor.subsystem(), "supervisor attached");

    let cancel = CancellationToken::new();
    let agent_task = tokio::spawn(agent::run(
        supervisor.open_control().context("open control surface")?,
        AgentOptions {
            fail_boot: args.agent_fails_boot,
            ..AgentOptions::default()
        },
        cancel.clone(),
    ));
    let restart_task = {
        let supervisor = supervisor.clone();
        let cancel = cancel.clone();
        let want_dumps = !args.no_ramdumps;
        tokio::spawn(async move { drive_restarts(&supervisor, requests, want_dumps, cancel).await })
    };
    let crash_task = args.crash_after_ms.map(|delay_ms| {
        let bench = bench.clone();
        let kind = args.crash_kind;
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            info!(?kind, "injecting modem fault");
            kind.inject(&bench);
        })
    });

    let status_file = args.status_file.clone().map(StatusFile::new);
    let shutdown = signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut status_tick =
        tokio::time::interval(Duration::from_millis(args.status_interval_ms.max(1)));
    loop {
        tokio::select! {
            res = &mut shutdown => {
                res.context("wait for ctrl-c")?;
                info!("shutdown signal received");
                break;
            }
            _ = status_tick.tick() => {
                if let Some(file) = status_file.as_ref() {
                    if let Err(err) = file.store(&supervisor.snapshot()) {
                        warn!(path = ?file.path(), error = ?err, "failed to write status file");
                    }
                }
            }
        }
    }

    cancel.cancel();
    if let Some(task) = crash_task {
        task.abort();
    }
    supervisor.graceful_shutdown();
    match agent_task.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(error = ?err, "boot agent failed"),
        Err(err) => warn!(error = ?err, "boot agent task panicked"),
    }
    if let Err(err) = restart_task.await {
        warn!(error = ?err, "restart driver task panicked");
    }
    supervisor.detach();
    info!("supervisor detached");
    if let Some(file) = status_file.as_ref() {
        file.clear()?;
    }
    Ok(())
}
