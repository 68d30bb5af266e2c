mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{TestProcess, init_tracing, wait_until};
use datanode_cluster_mock::MockClusterClient;
use datanode_supervisor::{
    ClusterRemovalOptions, ClusterRemovalTracer, Error, ManagedProcess, ProcessEvent,
    ProcessState, RemovalStatus,
};

type Tracer = ClusterRemovalTracer<TestProcess, MockClusterClient>;

const WAIT: Duration = Duration::from_secs(5);

fn setup(poll_interval: Duration) -> (Arc<TestProcess>, MockClusterClient, Arc<Tracer>) {
    init_tracing();

    let process = TestProcess::new();
    let cluster = MockClusterClient::new();
    let tracer = Arc::new(
        ClusterRemovalTracer::new(
            &process,
            Arc::new(cluster.clone()),
            ClusterRemovalOptions::new("node-1").with_poll_interval(poll_interval),
        )
        .unwrap(),
    );
    process.add_state_machine_tracer(tracer.clone());

    (process, cluster, tracer)
}

#[tokio::test]
async fn test_waits_for_relocation_before_stopping() {
    let (process, cluster, tracer) = setup(Duration::from_secs(3600));
    cluster.set_relocating_shards(5);
    process.make_available();
    assert!(wait_until(WAIT, || tracer.allocation_exclude_checked()).await);

    process.on_event(ProcessEvent::ProcessRemove);
    assert!(process.is_in_state(ProcessState::Removing));
    assert!(tracer.is_polling());
    assert!(!tracer.allocation_exclude_checked());

    assert_eq!(
        tracer.check_removal_status().await,
        RemovalStatus::Relocating(5)
    );
    assert_eq!(cluster.excluded().as_deref(), Some("node-1"));
    assert_eq!(process.stops(), 0);

    cluster.set_relocating_shards(0);
    assert_eq!(tracer.check_removal_status().await, RemovalStatus::Completed);
    assert_eq!(process.stops(), 1);
    assert!(process.is_in_state(ProcessState::Terminated));
    assert!(tracer.is_removal_completed());
    assert!(!tracer.is_polling());

    assert_eq!(tracer.check_removal_status().await, RemovalStatus::Completed);
    assert_eq!(process.stops(), 1);
}

#[tokio::test]
async fn test_poll_drives_removal_to_completion() {
    let (process, cluster, tracer) = setup(Duration::from_millis(50));
    cluster.set_relocating_shards(2);
    process.make_available();

    process.on_event(ProcessEvent::ProcessRemove);
    assert!(wait_until(WAIT, || cluster.calls().cluster_health >= 2).await);
    assert_eq!(process.stops(), 0);
    assert!(process.is_in_state(ProcessState::Removing));

    cluster.set_relocating_shards(0);
    assert!(wait_until(WAIT, || process.stops() == 1).await);
    assert!(!tracer.is_polling());
    assert!(process.is_in_state(ProcessState::Terminated));

    let health_checks = cluster.calls().cluster_health;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(cluster.calls().cluster_health, health_checks);
    assert_eq!(process.stops(), 1);
}

#[tokio::test]
async fn test_appends_to_existing_exclusions() {
    let (process, cluster, tracer) = setup(Duration::from_secs(3600));
    process.make_available();
    assert!(wait_until(WAIT, || tracer.allocation_exclude_checked()).await);
    cluster.set_excluded(Some("node-7"));

    tracer.exclude_node().await.unwrap();

    assert_eq!(cluster.excluded().as_deref(), Some("node-7,node-1"));
}

#[tokio::test]
async fn test_unacknowledged_exclusion_blocks_removal() {
    let (process, cluster, tracer) = setup(Duration::from_secs(3600));
    process.make_available();
    assert!(wait_until(WAIT, || tracer.allocation_exclude_checked()).await);
    cluster.set_acknowledge(false);

    process.on_event(ProcessEvent::ProcessRemove);

    assert_eq!(tracer.check_removal_status().await, RemovalStatus::Pending);
    assert_eq!(cluster.calls().cluster_health, 0);
    assert!(matches!(
        tracer.exclude_node().await,
        Err(Error::NotAcknowledged(_))
    ));

    cluster.set_acknowledge(true);
    assert_eq!(tracer.check_removal_status().await, RemovalStatus::Completed);
    assert_eq!(process.stops(), 1);
}

#[tokio::test]
async fn test_cluster_failures_are_retried() {
    let (process, cluster, tracer) = setup(Duration::from_secs(3600));
    process.make_available();
    assert!(wait_until(WAIT, || tracer.allocation_exclude_checked()).await);

    cluster.set_reachable(false);
    process.on_event(ProcessEvent::ProcessRemove);
    assert_eq!(tracer.check_removal_status().await, RemovalStatus::Pending);
    assert_eq!(tracer.check_removal_status().await, RemovalStatus::Pending);
    assert!(tracer.is_polling());
    assert_eq!(process.stops(), 0);

    cluster.set_reachable(true);
    assert_eq!(tracer.check_removal_status().await, RemovalStatus::Completed);
    assert_eq!(process.stops(), 1);
}

#[tokio::test]
async fn test_clears_own_stale_exclusion() {
    let (_process, cluster, tracer) = setup(Duration::from_secs(3600));
    cluster.set_excluded(Some("node-1"));

    tracer.check_allocation_enabled_status().await.unwrap();

    assert_eq!(cluster.excluded(), None);
    assert_eq!(cluster.calls().clear_allocation_exclude, 1);
    assert!(tracer.allocation_exclude_checked());
}

#[tokio::test]
async fn test_keeps_other_nodes_excluded() {
    let (_process, cluster, tracer) = setup(Duration::from_secs(3600));
    cluster.set_excluded(Some("node-1,node-2"));

    tracer.check_allocation_enabled_status().await.unwrap();

    assert_eq!(cluster.excluded().as_deref(), Some("node-2"));
    assert_eq!(cluster.calls().set_allocation_exclude, vec!["node-2"]);
}

#[tokio::test]
async fn test_other_node_exclusion_is_left_alone() {
    let (_process, cluster, tracer) = setup(Duration::from_secs(3600));
    cluster.set_excluded(Some("node-2"));

    tracer.check_allocation_enabled_status().await.unwrap();

    assert_eq!(cluster.excluded().as_deref(), Some("node-2"));
    assert_eq!(cluster.calls().writes(), 0);
    assert!(tracer.allocation_exclude_checked());
}

#[tokio::test]
async fn test_failed_allocation_check_is_retried_on_next_availability() {
    let (process, cluster, tracer) = setup(Duration::from_secs(3600));
    cluster.set_excluded(Some("node-1"));
    cluster.set_reachable(false);

    process.make_available();
    assert!(wait_until(WAIT, || cluster.calls().allocation_exclude == 1).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!tracer.allocation_exclude_checked());

    cluster.set_reachable(true);
    process.on_event(ProcessEvent::HealthCheckOk);
    assert!(wait_until(WAIT, || tracer.allocation_exclude_checked()).await);
    assert_eq!(cluster.excluded(), None);

    // Once checked, further health checks do not touch the cluster settings.
    let reads = cluster.calls().allocation_exclude;
    process.on_event(ProcessEvent::HealthCheckOk);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(cluster.calls().allocation_exclude, reads);
}

#[tokio::test]
async fn test_termination_interrupts_removal() {
    let (process, cluster, tracer) = setup(Duration::from_millis(50));
    cluster.set_relocating_shards(3);
    process.make_available();

    process.on_event(ProcessEvent::ProcessRemove);
    assert!(tracer.is_polling());

    process.on_event(ProcessEvent::ProcessTerminated);
    assert!(process.is_in_state(ProcessState::Terminated));
    assert!(!tracer.is_polling());

    cluster.set_relocating_shards(0);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(process.stops(), 0);
    assert!(!tracer.is_removal_completed());
}

#[tokio::test]
async fn test_removal_check_without_removal_does_nothing() {
    let (process, cluster, tracer) = setup(Duration::from_secs(3600));
    process.make_available();
    assert!(wait_until(WAIT, || tracer.allocation_exclude_checked()).await);
    let writes = cluster.calls().writes();

    assert_eq!(tracer.check_removal_status().await, RemovalStatus::Pending);

    assert!(process.is_in_state(ProcessState::Available));
    assert_eq!(process.stops(), 0);
    assert_eq!(cluster.excluded(), None);
    assert_eq!(cluster.calls().writes(), writes);
    assert_eq!(cluster.calls().cluster_health, 0);
}
