#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, mpsc};
use std::time::Duration;

use async_trait::async_trait;
use datanode_supervisor::{
    Error, ManagedProcess, ProcessEvent, ProcessState, Result, StateMachine, StateMachineTracer,
};
use parking_lot::Mutex;
use tracing::Level;
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(Level::INFO.into())
                .add_directive("datanode_supervisor=debug".parse().unwrap()),
        )
        .with_test_writer()
        .try_init();
}

/// Process double driving a real state machine without an OS process.
#[derive(Default)]
pub struct TestProcess {
    failing_starts: AtomicUsize,
    machine: StateMachine,
    starts: AtomicUsize,
    stops: AtomicUsize,
}

impl TestProcess {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Makes every start fail until called with `false`.
    pub fn fail_start(&self, fail: bool) {
        let failing = if fail { usize::MAX } else { 0 };
        self.failing_starts.store(failing, Ordering::SeqCst);
    }

    /// Makes the next `count` starts fail.
    pub fn fail_next_starts(&self, count: usize) {
        self.failing_starts.store(count, Ordering::SeqCst);
    }

    pub fn machine(&self) -> &StateMachine {
        &self.machine
    }

    /// Starts the process and reports it healthy.
    pub fn make_available(&self) {
        self.start().unwrap();
        self.on_event(ProcessEvent::HealthCheckOk);
        assert!(self.is_in_state(ProcessState::Available));
    }
}

#[async_trait]
impl ManagedProcess for TestProcess {
    type Config = ();

    async fn configure(&self, (): ()) -> Result<()> {
        Ok(())
    }

    fn start(&self) -> Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .failing_starts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |failing| match failing {
                0 => None,
                usize::MAX => Some(usize::MAX),
                failing => Some(failing - 1),
            })
            .is_ok();
        if failed {
            return Err(Error::NotConfigured);
        }
        self.machine.fire(ProcessEvent::ProcessStarted);
        Ok(())
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.machine.fire(ProcessEvent::ProcessStopped);
    }

    fn on_event(&self, event: ProcessEvent) {
        self.machine.fire(event);
    }

    fn add_state_machine_tracer(&self, tracer: Arc<dyn StateMachineTracer>) {
        self.machine.add_tracer(tracer);
    }

    fn state(&self) -> ProcessState {
        self.machine.state()
    }
}

/// Signals once a termination is being dispatched, then holds the dispatch
/// open.
pub struct Stall {
    pub entered: Mutex<mpsc::Sender<()>>,
    pub hold: Duration,
}

impl StateMachineTracer for Stall {
    fn transition(&self, event: ProcessEvent, _: ProcessState, _: ProcessState) {
        if event == ProcessEvent::ProcessTerminated {
            let _ = self.entered.lock().send(());
            std::thread::sleep(self.hold);
        }
    }
}

/// Polls `condition` until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}
