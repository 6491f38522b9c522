//! Background thread owning the acquisition controller.
//!
//! The operator side sends [`WorkerCommand`]s over a channel and reads a
//! shared [`WorkerStatus`]. Commands are picked up between cycles, or at the
//! next phase boundary while a cycle is running.

use crate::controller::{AcquisitionController, CycleOutcome};
use crate::error::WorkerError;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use hardware::WobblerSteps;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Idle polling period for new commands.
const COMMAND_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerCommand {
    /// Initialize with the wobbler parked at the given position.
    Init(WobblerSteps),
    Run,
    Stop,
    Close,
    Shutdown,
}

/// State visible to the operator interface.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerStatus {
    pub initialized: bool,
    pub running: bool,
    pub cycles_completed: u64,
    pub last_error: Option<String>,
}

#[derive(Clone, Default)]
struct SharedStatus(Arc<Mutex<WorkerStatus>>);

impl SharedStatus {
    fn lock(&self) -> MutexGuard<'_, WorkerStatus> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fail(&self, message: String) {
        error!("{message}");
        let mut status = self.lock();
        status.running = false;
        status.last_error = Some(message);
    }
}

pub struct AcquisitionWorker {
    commands: Sender<WorkerCommand>,
    status: SharedStatus,
    handle: Option<JoinHandle<AcquisitionController>>,
}

impl AcquisitionWorker {
    /// Moves `controller` onto a new thread and starts listening for commands.
    pub fn spawn(controller: AcquisitionController) -> Self {
        let (commands, rx) = unbounded();
        let status = SharedStatus::default();
        let thread_status = status.clone();
        let handle = std::thread::spawn(move || worker_loop(controller, rx, thread_status));
        Self {
            commands,
            status,
            handle: Some(handle),
        }
    }

    pub fn send(&self, command: WorkerCommand) -> Result<(), WorkerError> {
        self.commands
            .send(command)
            .map_err(|_| WorkerError::Disconnected)
    }

    pub fn status(&self) -> WorkerStatus {
        self.status.lock().clone()
    }

    /// Polls the status until `predicate` holds or `timeout` passes.
    pub fn wait_for<P>(&self, timeout: Duration, mut predicate: P) -> bool
    where
        P: FnMut(&WorkerStatus) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if predicate(&self.status()) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(COMMAND_POLL);
        }
    }

    /// Stops the thread, closing the devices if needed, and hands the
    /// controller back.
    pub fn shutdown(mut self) -> Result<AcquisitionController, WorkerError> {
        // A worker that already exited has dropped its receiver
        let _ = self.commands.send(WorkerCommand::Shutdown);
        let handle = self.handle.take().ok_or(WorkerError::Disconnected)?;
        handle.join().map_err(|_| WorkerError::Panicked)
    }
}

impl Drop for AcquisitionWorker {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.commands.send(WorkerCommand::Shutdown);
            if handle.join().is_err() {
                warn!("Acquisition worker panicked during shutdown");
            }
        }
    }
}

fn next_command(rx: &Receiver<WorkerCommand>, running: bool) -> Option<WorkerCommand> {
    if running {
        match rx.try_recv() {
            Ok(command) => Some(command),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(WorkerCommand::Shutdown),
        }
    } else {
        match rx.recv_timeout(COMMAND_POLL) {
            Ok(command) => Some(command),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(WorkerCommand::Shutdown),
        }
    }
}

fn worker_loop(
    mut controller: AcquisitionController,
    rx: Receiver<WorkerCommand>,
    status: SharedStatus,
) -> AcquisitionController {
    info!("Acquisition worker started");
    loop {
        let running = status.lock().running;
        if let Some(command) = next_command(&rx, running) {
            if !handle_command(&mut controller, command, &status) {
                break;
            }
            continue;
        }
        if !running {
            continue;
        }

        match controller.run_cycle_with(|| !rx.is_empty()) {
            Ok(CycleOutcome::Completed(_)) => {
                if let Err(e) = controller.update() {
                    status.fail(format!("update failed: {e}"));
                    continue;
                }
                status.lock().cycles_completed += 1;
            }
            Ok(CycleOutcome::Interrupted(_)) => {}
            Err(e) => status.fail(format!("cycle failed: {e}")),
        }
    }

    if controller.is_initialized() {
        controller.close();
    }
    info!("Acquisition worker stopped");
    controller
}

/// Applies one command. Returns false on shutdown.
fn handle_command(
    controller: &mut AcquisitionController,
    command: WorkerCommand,
    status: &SharedStatus,
) -> bool {
    info!(?command, "Worker command");
    match command {
        WorkerCommand::Init(_) if controller.is_initialized() => {
            warn!("Ignoring init: controller is already initialized");
            status.lock().last_error = Some("init ignored: already initialized".to_string());
        }
        WorkerCommand::Init(start) => match controller.initialize(start) {
            Ok(()) => {
                let mut s = status.lock();
                s.initialized = true;
                s.last_error = None;
            }
            Err(e) => status.fail(format!("initialization failed: {e}")),
        },
        WorkerCommand::Run => {
            if controller.is_initialized() {
                status.lock().running = true;
            } else {
                status.fail("cannot run: controller is not initialized".to_string());
            }
        }
        WorkerCommand::Stop => status.lock().running = false,
        WorkerCommand::Close => {
            let report = controller.close();
            let mut s = status.lock();
            s.running = false;
            s.initialized = false;
            info!("{report}");
        }
        WorkerCommand::Shutdown => return false,
    }
    true
}
