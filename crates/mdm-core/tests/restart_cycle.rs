use mdm_core::{
    BootType, LifecycleState, Level, LineName, MdmErrorKind, Supervisor, SupervisorConfig,
    WaitOutcome, control,
    sim::{SimBench, SimDiagnostics, drive_restarts},
};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Attach and consume the first-boot report.
async fn booted(bench: &SimBench) -> Supervisor {
    let sup = bench.attach().expect("attach");
    bench.set_input(LineName::Mdm2ApStatus, Level::High);
    let file = sup.open_control().expect("open control");
    control::report_normal_boot(&file, 0).await.expect("boot report");
    assert!(!sup.first_boot_pending());
    sup
}

/// Minimal boot agent: serves reload requests until cancelled.
fn spawn_agent(sup: &Supervisor, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    let file = sup.open_control().expect("open control");
    tokio::spawn(async move {
        loop {
            let boot_type = match control::wait_for_reload(&file, &cancel).await {
                Ok(boot_type) => boot_type,
                Err(_) => return,
            };
            match boot_type {
                BootType::RamDumps => {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    control::report_ramdump(&file, 0).await.unwrap();
                }
                BootType::Normal => {
                    while control::boot_pending(&file).await.unwrap() {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                    control::report_normal_boot(&file, 0).await.unwrap();
                }
            }
        }
    })
}

#[tokio::test(start_paused = true)]
async fn power_on_then_boot_report_makes_ready() {
    let bench = SimBench::new(SupervisorConfig::default());
    bench.modem.set_auto_boot(Some(Duration::from_millis(400)));
    let sup = bench.attach().unwrap();
    let file = sup.open_control().unwrap();

    assert!(control::boot_pending(&file).await.unwrap());
    while control::boot_pending(&file).await.unwrap() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    control::report_normal_boot(&file, 0).await.unwrap();

    assert!(sup.ready());
    assert_eq!(sup.boot_status(), Ok(()));
    assert_eq!(sup.state(), LifecycleState::Ready);
    assert_eq!(sup.status_text(), "1\n");
    assert_eq!(bench.modem.boot_done_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn first_boot_report_does_not_release_waiter() {
    let bench = SimBench::new(SupervisorConfig::default());
    let sup = bench.attach().unwrap();
    let file = sup.open_control().unwrap();

    let waiter = {
        let sup = sup.clone();
        tokio::spawn(async move { sup.boot_done().wait_with_timeout(Duration::from_secs(10)).await })
    };
    tokio::time::sleep(Duration::from_millis(1)).await;

    control::report_normal_boot(&file, 0).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!waiter.is_finished());
    assert!(!sup.boot_done().is_signaled());

    control::report_normal_boot(&file, 0).await.unwrap();
    assert_eq!(waiter.await.unwrap(), WaitOutcome::Signaled);
}

#[tokio::test(start_paused = true)]
async fn boot_done_timeout_then_reset_and_signal() {
    let bench = SimBench::new(SupervisorConfig::default());
    let sup = bench.attach().unwrap();

    assert_eq!(
        sup.boot_done()
            .wait_with_timeout(Duration::from_millis(6_000))
            .await,
        WaitOutcome::TimedOut
    );
    sup.boot_done().reset();
    let waiter = {
        let sup = sup.clone();
        tokio::spawn(async move { sup.boot_done().wait_with_timeout(Duration::from_secs(6)).await })
    };
    tokio::time::sleep(Duration::from_millis(5)).await;
    sup.boot_done().signal();
    assert_eq!(waiter.await.unwrap(), WaitOutcome::Signaled);
}

#[tokio::test(start_paused = true)]
async fn powerup_without_boot_times_out() {
    let bench = SimBench::new(SupervisorConfig::default());
    let sup = booted(&bench).await;

    sup.shutdown().await;
    let start = Instant::now();
    let err = sup.powerup().await.unwrap_err();

    assert_eq!(err.kind(), MdmErrorKind::Timeout);
    assert!(start.elapsed() >= Duration::from_millis(6_000));
    assert!(!sup.boot_done().is_signaled());
    assert_eq!(sup.boot_status().unwrap_err().kind(), MdmErrorKind::Timeout);
    assert_eq!(sup.boot_type(), BootType::Normal);
    assert!(sup.needs_reload().is_signaled());
    assert_eq!(bench.output(LineName::Ap2MdmStatus), Level::High);
    assert_eq!(bench.output(LineName::Ap2MdmErrfatal), Level::Low);
    assert_eq!(bench.diagnostics.attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn ramdump_timeout_still_powers_down() {
    let bench = SimBench::new(SupervisorConfig::default());
    let sup = booted(&bench).await;

    sup.shutdown().await;
    assert_eq!(bench.modem.power_down_count(), 1);
    assert_eq!(sup.state(), LifecycleState::ShuttingDown);

    let start = Instant::now();
    let err = sup.ramdump(true).await.unwrap_err();
    assert_eq!(err.kind(), MdmErrorKind::Timeout);
    assert!(start.elapsed() >= Duration::from_millis(180_000));
    assert_eq!(sup.dump_status().unwrap_err().kind(), MdmErrorKind::Timeout);
    assert_eq!(bench.modem.power_down_count(), 2);
    assert_eq!(bench.output(LineName::Ap2MdmErrfatal), Level::High);
    assert!(!sup.dump_done().is_signaled());
    assert_eq!(sup.state(), LifecycleState::Dumping);
}

#[tokio::test(start_paused = true)]
async fn unwanted_ramdump_is_a_no_op() {
    let bench = SimBench::new(SupervisorConfig::default());
    let sup = booted(&bench).await;
    sup.shutdown().await;

    assert_eq!(sup.ramdump(false).await, Ok(()));
    assert_eq!(bench.modem.power_down_count(), 1);
    assert!(!sup.needs_reload().is_signaled());
}

#[tokio::test(start_paused = true)]
async fn shutdown_honours_ramdump_delay() {
    let config = SupervisorConfig {
        ramdump_delay_ms: 2_000,
        ..SupervisorConfig::default()
    };
    let bench = SimBench::new(config);
    let sup = booted(&bench).await;

    let start = Instant::now();
    sup.shutdown().await;
    assert!(start.elapsed() >= Duration::from_millis(2_000));
    assert!(!sup.ready());
    assert_eq!(bench.modem.power_down_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_dump_report_is_io() {
    let bench = SimBench::new(SupervisorConfig::default());
    let sup = booted(&bench).await;
    let file = sup.open_control().unwrap();
    sup.shutdown().await;

    let dump = {
        let sup = sup.clone();
        tokio::spawn(async move { sup.ramdump(true).await })
    };
    let boot_type = control::wait_for_reload(&file, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(boot_type, BootType::RamDumps);
    control::report_ramdump(&file, 1).await.unwrap();
    assert_eq!(dump.await.unwrap().unwrap_err().kind(), MdmErrorKind::Io);
}

#[tokio::test(start_paused = true)]
async fn restart_reason_retries_until_available() {
    let bench = SimBench::new(SupervisorConfig::default())
        .with_diagnostics(SimDiagnostics::new(3, "q6 watchdog bite"));
    let sup = booted(&bench).await;
    let cancel = CancellationToken::new();
    let agent = spawn_agent(&sup, cancel.clone());

    sup.shutdown().await;
    bench.set_input(LineName::Mdm2ApStatus, Level::High);
    assert_eq!(sup.powerup().await, Ok(()));
    assert!(!sup.boot_done().is_signaled());

    tokio::time::sleep(Duration::from_millis(3_500)).await;
    assert_eq!(bench.diagnostics.attempts(), 3);
    tokio::time::sleep(Duration::from_millis(1_000)).await;
    assert_eq!(bench.diagnostics.attempts(), 4);
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(bench.diagnostics.attempts(), 4);

    cancel.cancel();
    agent.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn restart_reason_gives_up_after_ten_attempts() {
    let bench = SimBench::new(SupervisorConfig::default())
        .with_diagnostics(SimDiagnostics::new(u32::MAX, "never"));
    let sup = booted(&bench).await;
    let cancel = CancellationToken::new();
    let agent = spawn_agent(&sup, cancel.clone());

    sup.shutdown().await;
    bench.set_input(LineName::Mdm2ApStatus, Level::High);
    assert_eq!(sup.powerup().await, Ok(()));
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(bench.diagnostics.attempts(), 10);

    cancel.cancel();
    agent.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn errfatal_drives_a_full_recovery_cycle() {
    let bench = SimBench::new(SupervisorConfig::default());
    bench.modem.set_auto_boot(Some(Duration::from_millis(200)));
    let sup = booted(&bench).await;
    let requests = bench.orchestrator.subscribe();
    let cancel = CancellationToken::new();
    let agent = spawn_agent(&sup, cancel.clone());
    let driver = {
        let sup = sup.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { drive_restarts(&sup, requests, true, cancel).await })
    };

    bench.set_input(LineName::Mdm2ApErrfatal, Level::High);
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(bench.orchestrator.restarts().len(), 1);
    assert!(sup.ready());
    assert_eq!(sup.state(), LifecycleState::Ready);
    assert!(!sup.restart_pending());
    assert_eq!(sup.boot_status(), Ok(()));
    assert_eq!(sup.dump_status(), Ok(()));
    assert_eq!(bench.modem.power_on_count(), 2);
    assert_eq!(bench.modem.power_down_count(), 2);
    assert_eq!(bench.diagnostics.attempts(), 1);
    assert_eq!(sup.snapshot().restarts, 1);

    cancel.cancel();
    agent.await.unwrap();
    driver.await.unwrap();
}
