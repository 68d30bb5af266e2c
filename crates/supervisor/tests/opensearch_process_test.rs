mod common;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use common::{init_tracing, wait_until};
use datanode_cluster_mock::MockClusterClient;
use datanode_process::CommandLineOptions;
use datanode_supervisor::{
    ClusterRemovalOptions, ClusterRemovalTracer, HealthChecker, ManagedProcess,
    OpensearchProcess, OpensearchProcessOptions, ProcessEvent, ProcessState, ProcessWatchdog,
    TransitionLogger,
};

const WAIT: Duration = Duration::from_secs(10);

fn fake_opensearch() -> CommandLineOptions {
    let script =
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/fake-opensearch.sh");

    CommandLineOptions::new(script, Vec::<String>::new())
        .with_name("opensearch")
        .with_stop_timeout(Duration::from_secs(2))
}

fn new_process() -> Arc<OpensearchProcess> {
    init_tracing();

    let process = Arc::new(OpensearchProcess::new(OpensearchProcessOptions::new(
        "opensearch",
    )));
    process.add_state_machine_tracer(Arc::new(TransitionLogger::new("opensearch")));
    process
}

#[tokio::test]
async fn test_start_capture_and_stop() {
    let process = new_process();
    process.configure(fake_opensearch()).await.unwrap();

    process.start().unwrap();
    assert!(process.is_in_state(ProcessState::Starting));
    assert!(process.info().alive);

    assert!(wait_until(WAIT, || process.logs().std_out().len() == 2).await);
    assert_eq!(
        process.logs().std_out(),
        vec![
            "[INFO ][o.o.n.Node] initializing ...",
            "[INFO ][o.o.n.Node] started"
        ]
    );
    assert!(wait_until(WAIT, || process.logs().std_err().len() == 1).await);

    process.on_event(ProcessEvent::HealthCheckOk);
    assert!(process.is_in_state(ProcessState::Available));

    process.stop().await;
    assert!(process.is_in_state(ProcessState::Terminated));
    assert!(!process.info().alive);
}

#[tokio::test]
async fn test_watchdog_restarts_crashing_process_then_gives_up() {
    let process = new_process();
    let watchdog = Arc::new(ProcessWatchdog::new(&process, 2));
    process.add_state_machine_tracer(watchdog.clone());

    let options = CommandLineOptions::new("/bin/sh", ["-c", "echo booting; exit 1"]);
    process.configure(options).await.unwrap();
    process.start().unwrap();

    assert!(wait_until(WAIT, || watchdog.is_stopped()).await);
    assert_eq!(watchdog.restarts(), 2);
    assert!(process.is_in_state(ProcessState::Terminated));
    assert_eq!(process.logs().std_out(), vec!["booting"; 3]);
}

#[tokio::test]
async fn test_removal_drains_then_stops_without_restart() {
    let process = new_process();
    let cluster = MockClusterClient::new();
    cluster.set_relocating_shards(1);

    let watchdog = Arc::new(ProcessWatchdog::new(&process, 3));
    process.add_state_machine_tracer(watchdog.clone());
    let removal = Arc::new(
        ClusterRemovalTracer::new(
            &process,
            Arc::new(cluster.clone()),
            ClusterRemovalOptions::new("node-1").with_poll_interval(Duration::from_millis(50)),
        )
        .unwrap(),
    );
    process.add_state_machine_tracer(removal.clone());
    let checker = HealthChecker::spawn(
        &process,
        Arc::new(cluster.clone()),
        Duration::from_millis(20),
    );

    process.configure(fake_opensearch()).await.unwrap();
    process.start().unwrap();
    assert!(wait_until(WAIT, || process.is_in_state(ProcessState::Available)).await);

    process.on_event(ProcessEvent::ProcessRemove);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(process.is_in_state(ProcessState::Removing));
    assert!(process.info().alive);
    assert_eq!(cluster.excluded().as_deref(), Some("node-1"));

    cluster.set_relocating_shards(0);
    assert!(wait_until(WAIT, || process.is_in_state(ProcessState::Terminated)).await);
    assert!(wait_until(WAIT, || !process.info().alive).await);
    assert!(removal.is_removal_completed());
    assert_eq!(watchdog.restarts(), 0);

    checker.shutdown().await;
}

#[tokio::test]
async fn test_reconfigure_restarts_running_process() {
    let process = new_process();
    let watchdog = Arc::new(ProcessWatchdog::new(&process, 3));
    process.add_state_machine_tracer(watchdog.clone());

    process.configure(fake_opensearch()).await.unwrap();
    process.start().unwrap();
    let first_pid = process.info().pid;

    process
        .configure(fake_opensearch().with_env("OPENSEARCH_JAVA_OPTS", "-Xms1g"))
        .await
        .unwrap();

    assert!(process.is_in_state(ProcessState::Starting));
    assert!(process.info().alive);
    assert_ne!(process.info().pid, first_pid);
    assert_eq!(watchdog.restarts(), 0);

    process.stop().await;
}

#[tokio::test]
async fn test_reset_restarts_from_new() {
    let process = new_process();
    process.configure(fake_opensearch()).await.unwrap();
    process.start().unwrap();
    process.on_event(ProcessEvent::HealthCheckOk);
    let first_pid = process.info().pid;

    let mut states = process.subscribe();
    process.reset().await.unwrap();

    assert!(process.is_in_state(ProcessState::Starting));
    assert_ne!(process.info().pid, first_pid);
    assert!(states.has_changed().unwrap());

    process.stop().await;
}
