//! Simulated boot agent: the userspace side of the control surface.

use anyhow::{Context, Result};
use mdm_core::{BootType, ControlFile, MdmErrorKind, control};
use mdm_proto::STATUS_OK;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug)]
pub struct AgentOptions {
    /// Report every boot after the first as failed.
    pub fail_boot: bool,
    pub poll: Duration,
    pub dump_time: Duration,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            fail_boot: false,
            poll: Duration::from_millis(10),
            dump_time: Duration::from_millis(200),
        }
    }
}

pub async fn run(file: ControlFile, options: AgentOptions, cancel: CancellationToken) -> Result<()> {
    let mfg_mode = control::mfg_mode(&file).await.context("query mfg mode")?;
    info!(mfg_mode, "boot agent started");

    if !wait_for_status(&file, options.poll, &cancel).await? {
        return Ok(());
    }
    control::report_normal_boot(&file, STATUS_OK)
        .await
        .context("report first boot")?;

    loop {
        let boot_type = match control::wait_for_reload(&file, &cancel).await {
            Ok(boot_type) => boot_type,
            Err(err) if err.kind() == MdmErrorKind::Interrupted => return Ok(()),
            Err(err) => return Err(err).context("wait for reload"),
        };
        debug!(?boot_type, "reload requested");
        match boot_type {
            BootType::RamDumps => {
                tokio::time::sleep(options.dump_time).await;
                control::set_errmsg(&file, b"sim: ramdump collected")
                    .await
                    .context("set errmsg")?;
                control::efs_sync_done(&file).await.context("efs sync done")?;
                control::report_ramdump(&file, STATUS_OK)
                    .await
                    .context("report ramdump")?;
            }
            BootType::Normal => {
                if !wait_for_status(&file, options.poll, &cancel).await? {
                    return Ok(());
                }
                let status = if options.fail_boot { 1 } else { STATUS_OK };
                if status != STATUS_OK {
                    warn!(status, "reporting failed boot");
                }
                control::report_normal_boot(&file, status)
                    .await
                    .context("report normal boot")?;
                control::nv_write_done(&file).await.context("nv write done")?;
            }
        }
    }
}

/// Polls until the modem asserts status. Returns false when cancelled first.
async fn wait_for_status(
    file: &ControlFile,
    poll: Duration,
    cancel: &CancellationToken,
) -> Result<bool> {
    while control::boot_pending(file).await.context("check for boot")? {
        tokio::select! {
            () = cancel.cancelled() => return Ok(false),
            () = tokio::time::sleep(poll) => {}
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdm_core::{
        LifecycleState, Level, LineName, SupervisorConfig,
        sim::{SimBench, drive_restarts},
    };

    #[tokio::test(start_paused = true)]
    async fn agent_brings_modem_up_and_through_a_restart() {
        let bench = SimBench::new(SupervisorConfig::default());
        bench.modem.set_auto_boot(Some(Duration::from_millis(100)));
        let requests = bench.orchestrator.subscribe();
        let sup = bench.attach().unwrap();
        let cancel = CancellationToken::new();
        let agent = tokio::spawn(run(
            sup.open_control().unwrap(),
            AgentOptions::default(),
            cancel.clone(),
        ));
        let driver = {
            let sup = sup.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { drive_restarts(&sup, requests, true, cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(sup.ready());

        bench.set_input(LineName::Mdm2ApErrfatal, Level::High);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(sup.ready());
        assert_eq!(sup.state(), LifecycleState::Ready);
        assert_eq!(sup.errmsg().as_deref(), Some("sim: ramdump collected"));
        assert_eq!(bench.output(LineName::Ap2MdmIpc1), Level::Low);

        cancel.cancel();
        agent.await.unwrap().unwrap();
        driver.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn failing_agent_surfaces_io_boot_status() {
        let bench = SimBench::new(SupervisorConfig::default());
        bench.modem.set_auto_boot(Some(Duration::from_millis(100)));
        let sup = bench.attach().unwrap();
        let cancel = CancellationToken::new();
        let options = AgentOptions {
            fail_boot: true,
            ..AgentOptions::default()
        };
        let agent = tokio::spawn(run(sup.open_control().unwrap(), options, cancel.clone()));
        tokio::time::sleep(Duration::from_millis(500)).await;

        sup.shutdown().await;
        let err = sup.powerup().await.unwrap_err();
        assert_eq!(err.kind(), MdmErrorKind::Io);

        cancel.cancel();
        agent.await.unwrap().unwrap();
    }
}
