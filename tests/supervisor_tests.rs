#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use upload_supervisor::config::SupervisorConfig;
use upload_supervisor::error::{Error, FailureKind, Result};
use upload_supervisor::server::{
    Architecture, ChannelCallback, LifecycleEvent, LoggingCallback, RestartMonitor,
    RestartMonitorConfig, ServerCallback, ServerStatus, StartOutcome, Supervisor,
    SupervisorEvent,
};
use upload_supervisor::Receiver;

const WAIT: Duration = Duration::from_secs(10);

/// Prints the readiness line and stays up
const READY_SCRIPT: &str = r#"#!/bin/sh
echo x >> "$1/spawns"
pwd > "$1/cwd"
echo "Video directory: $1"
echo "Server starting at http://127.0.0.1:8080"
exec sleep 30
"#;

/// Temporary asset catalog and storage directory with a fake server script
struct Fixture {
    _root: TempDir,
    storage: PathBuf,
    assets: PathBuf,
}

impl Fixture {
    fn new(script: &str) -> Self {
        Self::with_asset("server/libserver_arm64.so", script)
    }

    fn with_asset(asset: &str, script: &str) -> Self {
        let fixture = Self::empty();
        let path = fixture.assets.join(asset);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, script).unwrap();
        fixture
    }

    fn empty() -> Self {
        let root = tempfile::tempdir().unwrap();
        let storage = root.path().join("files");
        let assets = root.path().join("assets");
        std::fs::create_dir_all(&storage).unwrap();
        std::fs::create_dir_all(&assets).unwrap();
        Self {
            _root: root,
            storage,
            assets,
        }
    }

    fn config(&self) -> SupervisorConfig {
        let mut config = SupervisorConfig::new(&self.storage, &self.assets);
        config.supported_abis = Some(vec!["arm64-v8a".to_string()]);
        config.grace_period_ms = 250;
        config.readiness_timeout_ms = 2000;
        config.retry_delay_ms = 200;
        config
    }

    fn supervisor(&self) -> Supervisor {
        Supervisor::with_dir_assets(self.config()).unwrap()
    }

    fn spawn_count(&self) -> usize {
        read(&self.storage.join("spawns")).lines().count()
    }
}

fn read(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap_or_default()
}

fn is_alive(pid: &str) -> bool {
    std::process::Command::new("sh")
        .arg("-c")
        .arg(format!("kill -0 {} 2>/dev/null", pid))
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Callback that panics on every notification
struct PanickingCallback;

impl ServerCallback for PanickingCallback {
    fn started(&self, _ip: &str, _port: u16) {
        panic!("host callback bug");
    }

    fn failed(&self, _error: &Error) {
        panic!("host callback bug");
    }
}

/// Next started/failed outcome, skipping architecture notifications
async fn outcome(rx: &mut mpsc::UnboundedReceiver<StartOutcome>) -> StartOutcome {
    loop {
        let next = timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for start outcome")
            .expect("callback dropped without an outcome");
        if !matches!(next, StartOutcome::ArchitectureDetected(_)) {
            return next;
        }
    }
}

async fn wait_event(
    rx: &mut broadcast::Receiver<SupervisorEvent>,
    matches: impl Fn(&SupervisorEvent) -> bool,
) -> SupervisorEvent {
    timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Ok(event) if matches(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for supervisor event")
}

#[tokio::test]
async fn test_start_reports_default_port() -> Result<()> {
    let fixture = Fixture::new(READY_SCRIPT);
    let supervisor = fixture.supervisor();
    assert_eq!(supervisor.status(), ServerStatus::NotStarted);

    let (callback, mut rx) = ChannelCallback::new();
    supervisor.start(callback).await?;

    match timeout(WAIT, rx.recv()).await.unwrap() {
        Some(StartOutcome::ArchitectureDetected(arch)) => assert_eq!(arch, Architecture::Arm64),
        other => panic!("expected architecture first, got {:?}", other),
    }
    match outcome(&mut rx).await {
        StartOutcome::Started(endpoint) => {
            assert_eq!(endpoint.port, 8080);
            assert!(!endpoint.ip.is_empty());
        }
        other => panic!("expected started, got {:?}", other),
    }

    assert!(supervisor.is_running().await?);
    assert_eq!(supervisor.status(), ServerStatus::Running);

    // Binary was installed into the storage dir and runs from there
    assert!(fixture.storage.join("libserver.so").exists());
    let cwd = PathBuf::from(read(&fixture.storage.join("cwd")).trim());
    assert_eq!(cwd.canonicalize().unwrap(), fixture.storage.canonicalize().unwrap());

    // Exactly one outcome per start
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(rx.try_recv().is_err());

    supervisor.stop().await?;
    assert!(!supervisor.is_running().await?);
    assert_eq!(supervisor.status(), ServerStatus::Stopped);

    supervisor.shutdown().await
}

#[tokio::test]
async fn test_announced_port_is_reported() -> Result<()> {
    let fixture = Fixture::new(
        "#!/bin/sh\necho 'Server starting at http://0.0.0.0:9090'\nexec sleep 30\n",
    );
    let supervisor = fixture.supervisor();

    let endpoint = supervisor.start_and_wait().await?;
    assert_eq!(endpoint.port, 9090);
    assert_eq!(supervisor.endpoint().await?.map(|e| e.port), Some(9090));

    supervisor.shutdown().await
}

#[tokio::test]
async fn test_readiness_on_stderr_is_seen() -> Result<()> {
    let fixture = Fixture::new(
        "#!/bin/sh\necho 'Server starting at 10.0.0.2:8123' >&2\nexec sleep 30\n",
    );
    let supervisor = fixture.supervisor();

    let endpoint = supervisor.start_and_wait().await?;
    assert_eq!(endpoint.port, 8123);

    supervisor.shutdown().await
}

#[tokio::test]
async fn test_malformed_readiness_keeps_default_port() -> Result<()> {
    let fixture = Fixture::new(
        "#!/bin/sh\necho 'Server starting at http://localhost:http'\nexec sleep 30\n",
    );
    let supervisor = fixture.supervisor();

    let endpoint = supervisor.start_and_wait().await?;
    assert_eq!(endpoint.port, 8080);

    supervisor.shutdown().await
}

#[tokio::test]
async fn test_silent_server_is_started_after_timeout() -> Result<()> {
    let fixture = Fixture::new("#!/bin/sh\nexec sleep 30\n");
    let mut config = fixture.config();
    config.readiness_timeout_ms = 300;
    let supervisor = Supervisor::with_dir_assets(config)?;

    let endpoint = supervisor.start_and_wait().await?;
    assert_eq!(endpoint.port, 8080);
    assert!(supervisor.is_running().await?);

    supervisor.shutdown().await
}

#[tokio::test]
async fn test_immediate_exit_fails() -> Result<()> {
    let fixture = Fixture::new("#!/bin/sh\necho 'bind: address already in use'\nexit 1\n");
    let supervisor = fixture.supervisor();
    let mut events = supervisor.subscribe();

    let (callback, mut rx) = ChannelCallback::new();
    supervisor.start(callback).await?;

    match outcome(&mut rx).await {
        StartOutcome::Failed(error) => {
            assert!(matches!(error, Error::DiedImmediately { code: Some(1) }));
            assert_eq!(error.to_string(), "process died immediately");
        }
        other => panic!("expected failure, got {:?}", other),
    }

    let failed = wait_event(&mut events, |e| matches!(e, SupervisorEvent::Failed { .. })).await;
    assert!(matches!(
        failed,
        SupervisorEvent::Failed { kind: FailureKind::DiedImmediately, .. }
    ));
    assert!(!supervisor.is_running().await?);
    assert_eq!(supervisor.status(), ServerStatus::Failed);

    let history = supervisor.lifecycle().events(Some(1))?;
    assert_eq!(
        history[0].event,
        LifecycleEvent::Failed(FailureKind::DiedImmediately)
    );

    supervisor.shutdown().await
}

#[tokio::test]
async fn test_missing_asset_fails() -> Result<()> {
    let fixture = Fixture::empty();
    let supervisor = fixture.supervisor();

    let err = supervisor.start_and_wait().await.unwrap_err();

    assert_eq!(err.kind(), FailureKind::AssetMissingOrUnreadable);
    assert!(err.to_string().contains("server/libserver_arm64.so"));
    assert!(!supervisor.is_running().await?);

    supervisor.shutdown().await
}

#[tokio::test]
async fn test_architecture_selects_asset() -> Result<()> {
    let fixture = Fixture::with_asset(
        "server/libserver_arm32.so",
        "#!/bin/sh\necho 'Server starting at http://192.168.0.5:8181'\nexec sleep 30\n",
    );
    let mut config = fixture.config();
    config.supported_abis = Some(vec!["armeabi-v7a".to_string(), "armeabi".to_string()]);
    let supervisor = Supervisor::with_dir_assets(config)?;
    let mut events = supervisor.subscribe();

    let endpoint = supervisor.start_and_wait().await?;
    assert_eq!(endpoint.port, 8181);

    let started = wait_event(&mut events, |e| matches!(e, SupervisorEvent::Started { .. })).await;
    match started {
        SupervisorEvent::Started { architecture, pid, .. } => {
            assert_eq!(architecture, Architecture::Arm32);
            assert!(pid > 0);
        }
        _ => unreachable!(),
    }

    supervisor.shutdown().await
}

#[tokio::test]
async fn test_start_while_running_does_not_respawn() -> Result<()> {
    let fixture = Fixture::new(READY_SCRIPT);
    let supervisor = fixture.supervisor();

    let first = supervisor.start_and_wait().await?;
    let second = supervisor.start_and_wait().await?;

    assert_eq!(first.port, second.port);
    assert_eq!(fixture.spawn_count(), 1);

    supervisor.shutdown().await
}

#[tokio::test]
async fn test_start_while_starting_joins() -> Result<()> {
    let fixture = Fixture::new(
        "#!/bin/sh\necho x >> \"$1/spawns\"\nsleep 0.3\necho 'Server starting at http://127.0.0.1:8080'\nexec sleep 30\n",
    );
    let supervisor = fixture.supervisor();

    let (first, mut first_rx) = ChannelCallback::new();
    let (second, mut second_rx) = ChannelCallback::new();
    supervisor.start(first).await?;
    supervisor.start(second).await?;

    assert!(matches!(outcome(&mut first_rx).await, StartOutcome::Started(_)));
    assert!(matches!(outcome(&mut second_rx).await, StartOutcome::Started(_)));
    assert_eq!(fixture.spawn_count(), 1);

    supervisor.shutdown().await
}

#[tokio::test]
async fn test_stop_without_start_is_noop() -> Result<()> {
    let fixture = Fixture::new(READY_SCRIPT);
    let supervisor = fixture.supervisor();

    supervisor.stop().await?;
    supervisor.stop().await?;

    assert!(!supervisor.is_running().await?);
    assert_eq!(supervisor.status(), ServerStatus::NotStarted);
    assert!(supervisor.lifecycle().events(None)?.is_empty());

    supervisor.shutdown().await
}

#[tokio::test]
async fn test_stop_cancels_in_flight_start() -> Result<()> {
    // Never announces readiness, so the start stays in flight
    let fixture = Fixture::new(
        "#!/bin/sh\necho $$ > \"$1/pid\"\necho x >> \"$1/spawns\"\nexec sleep 30\n",
    );
    let mut config = fixture.config();
    config.readiness_timeout_ms = 8000;
    let supervisor = Supervisor::with_dir_assets(config)?;

    let (callback, mut rx) = ChannelCallback::new();
    supervisor.start(callback).await?;

    // Wait until the child is up and waiting
    timeout(WAIT, async {
        while fixture.spawn_count() == 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("server never spawned");
    assert_eq!(supervisor.status(), ServerStatus::Starting);
    let pid = read(&fixture.storage.join("pid")).trim().to_string();
    assert!(is_alive(&pid));

    supervisor.stop().await?;

    // The child is gone by the time stop returns
    assert!(!is_alive(&pid));

    match outcome(&mut rx).await {
        StartOutcome::Failed(error) => assert!(matches!(error, Error::Cancelled)),
        other => panic!("expected cancellation, got {:?}", other),
    }
    assert!(!supervisor.is_running().await?);
    assert_eq!(supervisor.status(), ServerStatus::Stopped);

    supervisor.shutdown().await
}

#[tokio::test]
async fn test_exit_after_start_is_pushed() -> Result<()> {
    let fixture = Fixture::new(
        "#!/bin/sh\necho 'Server starting at http://127.0.0.1:8080'\nsleep 0.5\nexit 3\n",
    );
    let supervisor = fixture.supervisor();
    let mut events = supervisor.subscribe();

    supervisor.start_and_wait().await?;
    assert!(supervisor.is_running().await?);

    let exit = timeout(WAIT, supervisor.wait_for_exit())
        .await
        .expect("server did not exit")?
        .expect("server was not running");
    assert_eq!(exit.code, Some(3));
    assert!(!exit.killed);

    let exited = wait_event(&mut events, |e| matches!(e, SupervisorEvent::Exited { .. })).await;
    match exited {
        SupervisorEvent::Exited { exit, .. } => assert_eq!(exit.code, Some(3)),
        _ => unreachable!(),
    }
    assert_eq!(supervisor.status(), ServerStatus::Failed);
    assert!(!supervisor.is_running().await?);
    assert_eq!(supervisor.wait_for_exit().await?, None);

    supervisor.shutdown().await
}

#[tokio::test]
async fn test_restart_spawns_new_process() -> Result<()> {
    let fixture = Fixture::new(READY_SCRIPT);
    let supervisor = fixture.supervisor();

    supervisor.start_and_wait().await?;

    let (callback, mut rx) = ChannelCallback::new();
    supervisor.restart(callback).await?;
    assert!(matches!(outcome(&mut rx).await, StartOutcome::Started(_)));

    assert_eq!(fixture.spawn_count(), 2);
    assert!(supervisor.is_running().await?);
    assert_eq!(supervisor.lifecycle().restart_count()?, 1);

    supervisor.shutdown().await
}

#[tokio::test]
async fn test_restart_monitor_recovers_from_failure() -> Result<()> {
    // Crashes on the first launch only
    let fixture = Fixture::new(
        r#"#!/bin/sh
if [ -f "$1/crashed" ]; then
    echo "Server starting at http://127.0.0.1:8080"
    exec sleep 30
fi
touch "$1/crashed"
exit 1
"#,
    );
    let config = fixture.config();
    let supervisor = Supervisor::with_dir_assets(config.clone())?;
    let mut events = supervisor.subscribe();

    let mut monitor = RestartMonitor::new(supervisor.clone(), RestartMonitorConfig::from(&config));
    monitor.start()?;
    assert!(monitor.is_active());

    supervisor.start(LoggingCallback).await?;

    wait_event(&mut events, |e| matches!(e, SupervisorEvent::Failed { .. })).await;
    wait_event(&mut events, |e| matches!(e, SupervisorEvent::Started { .. })).await;

    assert!(supervisor.is_running().await?);
    assert_eq!(monitor.restart_count(), 1);

    monitor.stop()?;
    assert!(!monitor.is_active());
    supervisor.shutdown().await
}

#[tokio::test]
async fn test_restart_monitor_leaves_host_restart_alone() -> Result<()> {
    // Exits shortly after the first launch, stays up afterwards
    let fixture = Fixture::new(
        r#"#!/bin/sh
echo x >> "$1/spawns"
echo "Server starting at http://127.0.0.1:8080"
if [ -f "$1/exited" ]; then
    exec sleep 30
fi
touch "$1/exited"
sleep 0.5
exit 0
"#,
    );
    let mut config = fixture.config();
    config.retry_delay_ms = 1000;
    let supervisor = Supervisor::with_dir_assets(config.clone())?;
    let mut events = supervisor.subscribe();

    let mut monitor = RestartMonitor::new(supervisor.clone(), RestartMonitorConfig::from(&config));
    monitor.start()?;

    supervisor.start_and_wait().await?;
    wait_event(&mut events, |e| matches!(e, SupervisorEvent::Exited { .. })).await;

    // The host brings the server back before the monitor's delay runs out
    supervisor.start_and_wait().await?;
    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert!(supervisor.is_running().await?);
    assert_eq!(fixture.spawn_count(), 2);
    assert_eq!(monitor.restart_count(), 0);
    let history = supervisor.lifecycle().events(None)?;
    assert!(history.iter().all(|r| r.event != LifecycleEvent::Stopped));
    assert_eq!(supervisor.lifecycle().restart_count()?, 0);

    monitor.stop()?;
    supervisor.shutdown().await
}

#[tokio::test]
async fn test_panicking_callback_does_not_kill_supervisor() -> Result<()> {
    let fixture = Fixture::new(READY_SCRIPT);
    let supervisor = fixture.supervisor();
    let mut events = supervisor.subscribe();

    supervisor.start(PanickingCallback).await?;
    wait_event(&mut events, |e| matches!(e, SupervisorEvent::Started { .. })).await;

    assert!(supervisor.is_running().await?);
    assert_eq!(supervisor.status(), ServerStatus::Running);

    // Already running: the panic happens on the immediate report
    supervisor.start(PanickingCallback).await?;
    let endpoint = supervisor.start_and_wait().await?;
    assert_eq!(endpoint.port, 8080);
    assert_eq!(fixture.spawn_count(), 1);

    supervisor.stop().await?;
    assert!(!supervisor.is_running().await?);
    supervisor.shutdown().await
}

#[tokio::test]
async fn test_shutdown_ends_supervisor() -> Result<()> {
    let fixture = Fixture::new(READY_SCRIPT);
    let supervisor = fixture.supervisor();
    supervisor.start_and_wait().await?;

    supervisor.shutdown().await?;

    assert!(matches!(supervisor.is_running().await, Err(Error::SupervisorGone)));
    Ok(())
}

#[tokio::test]
async fn test_receiver_runs_and_shuts_down() -> Result<()> {
    let fixture = Fixture::new(READY_SCRIPT);
    let mut receiver = Receiver::new(fixture.config())?;

    let endpoint = receiver.run().await?;
    assert_eq!(endpoint.port, 8080);
    assert_eq!(receiver.upload_path(), fixture.storage.join("video.mp4"));

    let again = receiver.ensure_running().await?;
    assert_eq!(again, endpoint);
    assert_eq!(fixture.spawn_count(), 1);

    receiver.shutdown().await?;
    assert!(receiver.supervisor().is_running().await.is_err());
    Ok(())
}
