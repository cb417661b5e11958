//! Shutdown sequencing.
//!
//! The sequencer runs the UI and waits for whichever comes first: the UI
//! exiting on its own, or a termination signal. A UI exit ends the run
//! directly. A signal walks the forward-only sequence
//!
//! ```text
//! Running → SignalReceived → KillingProcesses → AwaitingUiTeardown → Complete
//! ```
//!
//! stopping new work, killing every tracked process group, asking the UI to
//! quit, and waiting at most the grace period for it to do so. Once a signal
//! has been seen, a second one exits the process immediately.
//!
//! After a UI exit the sequencer is already `Complete`; it then cancels the
//! work token and kills whatever is still tracked. Bulk termination only
//! ever starts here.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::app::UiRunner;
use crate::process::ProcessManager;
use crate::signals::Signal;
use crate::{olog, olog_error, olog_warn, Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ShutdownState {
    Running,
    SignalReceived,
    KillingProcesses,
    AwaitingUiTeardown,
    Complete,
}

impl fmt::Display for ShutdownState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ShutdownState::Running => "running",
            ShutdownState::SignalReceived => "signal-received",
            ShutdownState::KillingProcesses => "killing-processes",
            ShutdownState::AwaitingUiTeardown => "awaiting-ui-teardown",
            ShutdownState::Complete => "complete",
        };
        f.write_str(s)
    }
}

/// What started the shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    UiExited,
    Signal(Signal),
}

/// How the UI went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Teardown {
    /// The UI exited on its own; nothing was requested.
    NotNeeded,
    /// The UI exited within the grace period after being asked to.
    Clean,
    /// The grace period elapsed first; the UI thread was abandoned.
    TimedOut,
}

#[derive(Debug)]
pub struct ShutdownReport {
    pub trigger: Trigger,
    pub teardown: Teardown,
    /// The UI's own result. `Ok` when the UI was abandoned after a timeout.
    pub ui_result: Result<()>,
    /// Aggregate kill error, if any kill failed.
    pub kill_error: Option<Error>,
    pub elapsed: Duration,
}

impl ShutdownReport {
    /// Process exit status: only a UI error makes the run fail.
    pub fn exit_code(&self) -> i32 {
        if self.ui_result.is_err() {
            1
        } else {
            0
        }
    }

    pub fn into_result(self) -> Result<()> {
        self.ui_result
    }
}

/// Called with an exit code when a second signal arrives.
pub type ForceExit = Arc<dyn Fn(i32) + Send + Sync>;

pub struct ShutdownSequencer {
    processes: Arc<ProcessManager>,
    work: CancellationToken,
    grace: Duration,
    force_exit: ForceExit,
    state: watch::Sender<ShutdownState>,
    history: Mutex<Vec<ShutdownState>>,
}

impl ShutdownSequencer {
    pub fn new(processes: Arc<ProcessManager>, grace: Duration) -> Self {
        let (state, _) = watch::channel(ShutdownState::Running);
        Self {
            processes,
            work: CancellationToken::new(),
            grace,
            force_exit: Arc::new(exit_now),
            state,
            history: Mutex::new(vec![ShutdownState::Running]),
        }
    }

    /// Replace the hard-exit hook used by the second-signal escape hatch.
    pub fn with_force_exit(mut self, force_exit: ForceExit) -> Self {
        self.force_exit = force_exit;
        self
    }

    /// Token cancelled as soon as a signal is received, or after a UI exit.
    /// Launchers stop starting new work once it fires.
    pub fn work_token(&self) -> CancellationToken {
        self.work.clone()
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    pub fn state(&self) -> ShutdownState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ShutdownState> {
        self.state.subscribe()
    }

    /// Every state visited so far, in order.
    pub fn history(&self) -> Vec<ShutdownState> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Run `ui` until it exits or a signal arrives, then tear everything down.
    pub async fn run<U: UiRunner>(&self, ui: U, mut signals: mpsc::Receiver<Signal>) -> ShutdownReport {
        let started = Instant::now();
        let quit = ui.quit_handle();
        let mut ui_task = tokio::task::spawn_blocking(move || ui.run());

        let signal = tokio::select! {
            joined = &mut ui_task => {
                let ui_result = flatten_join(joined);
                if let Err(e) = &ui_result {
                    olog_error!("UI exited with error: {}", e);
                } else {
                    olog!("UI exited");
                }
                self.advance(ShutdownState::Complete);
                let kill_error = self.reap_after_ui_exit();
                return ShutdownReport {
                    trigger: Trigger::UiExited,
                    teardown: Teardown::NotNeeded,
                    ui_result,
                    kill_error,
                    elapsed: started.elapsed(),
                };
            }
            Some(signal) = signals.recv() => signal,
        };

        self.advance(ShutdownState::SignalReceived);
        olog!("Received {}, shutting down", signal);
        self.work.cancel();
        self.arm_escape_hatch(signals);

        self.advance(ShutdownState::KillingProcesses);
        let kill_error = self.processes.kill_all().err();
        if let Some(e) = &kill_error {
            olog_warn!("Shutdown: {}", e);
        }

        self.advance(ShutdownState::AwaitingUiTeardown);
        quit.quit();
        let (teardown, ui_result) = self.await_teardown(&mut ui_task).await;

        self.advance(ShutdownState::Complete);
        ShutdownReport {
            trigger: Trigger::Signal(signal),
            teardown,
            ui_result,
            kill_error,
            elapsed: started.elapsed(),
        }
    }

    async fn await_teardown(&self, ui_task: &mut JoinHandle<Result<()>>) -> (Teardown, Result<()>) {
        match tokio::time::timeout(self.grace, ui_task).await {
            Ok(joined) => (Teardown::Clean, flatten_join(joined)),
            Err(_) => {
                olog_warn!(
                    "UI did not exit within {:?}, forcing shutdown",
                    self.grace
                );
                (Teardown::TimedOut, Ok(()))
            }
        }
    }

    /// Cleanup on the UI-exit path, run after `Complete` without adding
    /// states: new launches stop and anything still tracked is killed.
    fn reap_after_ui_exit(&self) -> Option<Error> {
        self.work.cancel();
        let kill_error = self.processes.kill_all().err();
        if let Some(e) = &kill_error {
            olog_warn!("Cleanup after UI exit: {}", e);
        }
        kill_error
    }

    fn arm_escape_hatch(&self, mut signals: mpsc::Receiver<Signal>) {
        let force_exit = self.force_exit.clone();
        // Stays armed past Complete until the runtime shuts down, so a second
        // signal during the caller's own teardown still exits.
        tokio::spawn(async move {
            if let Some(second) = signals.recv().await {
                olog_warn!("Received second {}, exiting immediately", second);
                force_exit(second.exit_code());
            }
        });
    }

    fn advance(&self, next: ShutdownState) {
        let moved = self.state.send_if_modified(|current| {
            if next > *current {
                *current = next;
                true
            } else {
                false
            }
        });
        if moved {
            olog!("Shutdown state -> {}", next);
            self.history
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(next);
        }
    }
}

fn flatten_join(joined: std::result::Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
    joined.map_err(|e| Error::TaskJoin(e.to_string()))?
}

fn exit_now(code: i32) {
    crate::app::restore_terminal_best_effort();
    std::process::exit(code);
}
