//! Runtime side of the dashboard: the UI seam used by the shutdown
//! sequencer, and the decoupled logic/render loop behind it.
//!
//! ```text
//! UI thread (logic)                         render thread
//!   bus subscriptions ─┐
//!   crossterm input ───┼─► update(Model) ─► RenderState ──bounded(1)──► draw @ 60fps
//!   QuitHandle ────────┘
//! ```
//!
//! The logic loop never blocks on the renderer: a snapshot that does not fit
//! in the channel stays dirty and is retried on the next tick.

use std::io::{self, Stdout};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use crossterm::cursor::Show;
use crossterm::event::{self, Event as TermEvent, KeyEventKind};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;
use tokio::sync::mpsc::error::TryRecvError as BusTryRecvError;
use tokio_util::sync::CancellationToken;

use crate::bus::{EventBus, Subscription};
use crate::event::{Event, Topic};
use crate::render::RenderState;
use crate::tea::{update, Command, Message, Model};
use crate::{olog_debug, olog_warn, ui, Error, Result};

const MAX_BG_MESSAGES: usize = 50;
const FRAME_DURATION: Duration = Duration::from_micros(16_666); // 60fps
const LOGIC_TICK: Duration = Duration::from_millis(1);

static TERMINAL_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Cloneable request for a UI to stop.
#[derive(Debug, Clone, Default)]
pub struct QuitHandle {
    cancel: CancellationToken,
}

impl QuitHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the UI to exit. Idempotent.
    pub fn quit(&self) {
        self.cancel.cancel();
    }

    pub fn is_quit(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Completes once [`quit`](Self::quit) has been called.
    pub async fn quitted(&self) {
        self.cancel.cancelled().await
    }
}

/// A user interface the shutdown sequencer can run and stop.
///
/// `run` blocks until the UI is done, either on its own or because its quit
/// handle fired. The sequencer calls it on a blocking thread.
pub trait UiRunner: Send + 'static {
    fn quit_handle(&self) -> QuitHandle;
    fn run(self) -> Result<()>;
}

/// Interactive full-screen dashboard.
pub struct Dashboard {
    task_sub: Subscription,
    dag_sub: Subscription,
    output_lines: usize,
    quit: QuitHandle,
}

impl Dashboard {
    /// Subscribe to the bus now so no event published before `run` is lost.
    pub fn new(bus: &EventBus, output_lines: usize) -> Self {
        Self {
            task_sub: bus.subscribe(Topic::Task),
            dag_sub: bus.subscribe(Topic::Dag),
            output_lines,
            quit: QuitHandle::new(),
        }
    }
}

impl UiRunner for Dashboard {
    fn quit_handle(&self) -> QuitHandle {
        self.quit.clone()
    }

    fn run(self) -> Result<()> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let (state_tx, state_rx) = crossbeam_channel::bounded::<RenderState>(1);

        let mut terminal = setup_terminal()?;
        let render_shutdown = shutdown.clone();
        let render = thread::Builder::new()
            .name("orca-render".to_string())
            .spawn(move || render_loop(&mut terminal, state_rx, &render_shutdown))?;

        let logic = LogicLoop {
            model: Model::new(self.output_lines),
            task_sub: Some(self.task_sub),
            dag_sub: Some(self.dag_sub),
            quit: self.quit,
        }
        .run(&state_tx, &shutdown, &render);

        shutdown.store(true, Ordering::Relaxed);
        drop(state_tx);
        let rendered = render
            .join()
            .map_err(|_| Error::TaskJoin("render thread panicked".to_string()));
        restore_terminal()?;

        logic.and(rendered?)
    }
}

struct LogicLoop {
    model: Model,
    task_sub: Option<Subscription>,
    dag_sub: Option<Subscription>,
    quit: QuitHandle,
}

impl LogicLoop {
    fn run(
        mut self,
        state_tx: &Sender<RenderState>,
        shutdown: &AtomicBool,
        render: &JoinHandle<Result<()>>,
    ) -> Result<()> {
        olog_debug!("LogicLoop::run output_lines={}", self.model.output_lines);

        loop {
            if shutdown.load(Ordering::Relaxed) || self.quit.is_quit() {
                olog_debug!("LogicLoop: quit requested");
                return Ok(());
            }
            if render.is_finished() {
                olog_warn!("LogicLoop: render thread exited early");
                return Ok(());
            }

            // Keyboard input (priority)
            while event::poll(Duration::ZERO)? {
                let msg = match event::read()? {
                    TermEvent::Key(key) if key.kind == KeyEventKind::Press => Message::Key(key),
                    TermEvent::Resize(w, h) => Message::Resize(w, h),
                    _ => continue,
                };
                if self.dispatch(msg) {
                    return Ok(());
                }
            }

            // Bus events (bounded per tick)
            for msg in self.drain_bus() {
                if self.dispatch(msg) {
                    return Ok(());
                }
            }

            if self.model.dirty && send_state(state_tx, &self.model) {
                self.model.dirty = false;
            }

            thread::sleep(LOGIC_TICK);
        }
    }

    /// Apply one message. Returns true when the UI should exit.
    fn dispatch(&mut self, msg: Message) -> bool {
        update(&mut self.model, msg)
            .into_iter()
            .any(|cmd| match cmd {
                Command::Quit => {
                    olog_debug!("Command::Quit");
                    true
                }
            })
    }

    fn drain_bus(&mut self) -> Vec<Message> {
        let was_open = self.task_sub.is_some() || self.dag_sub.is_some();
        let mut msgs = Vec::new();
        drain(&mut self.task_sub, &mut msgs);
        drain(&mut self.dag_sub, &mut msgs);
        if was_open && self.task_sub.is_none() && self.dag_sub.is_none() {
            msgs.push(Message::BusClosed);
        }
        msgs
    }
}

/// Move up to MAX_BG_MESSAGES events out of `sub`, dropping it once closed.
fn drain(sub: &mut Option<Subscription>, msgs: &mut Vec<Message>) {
    let Some(subscription) = sub else { return };
    for _ in 0..MAX_BG_MESSAGES {
        match subscription.try_recv() {
            Ok(event) => msgs.push(to_message(event)),
            Err(BusTryRecvError::Empty) => return,
            Err(BusTryRecvError::Disconnected) => {
                olog_debug!("Subscription {} closed", subscription.topic());
                *sub = None;
                return;
            }
        }
    }
}

fn to_message(event: Event) -> Message {
    match event {
        Event::Task(task) => Message::Task(task),
        Event::Dag(dag) => Message::Progress(dag.counts()),
    }
}

/// Offer a snapshot to the renderer. False when the slot is still occupied.
fn send_state(state_tx: &Sender<RenderState>, model: &Model) -> bool {
    state_tx.try_send(model.snapshot()).is_ok()
}

fn render_loop(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    state_rx: Receiver<RenderState>,
    shutdown: &AtomicBool,
) -> Result<()> {
    let mut state = RenderState::default();
    let mut last_version: u64 = 0;
    let mut last_frame = Instant::now();
    let mut dirty = true;

    loop {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }

        match state_rx.try_recv() {
            Ok(s) => {
                dirty = dirty || s.version != last_version;
                state = s;
            }
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => break,
        }

        if last_frame.elapsed() < FRAME_DURATION {
            thread::sleep(Duration::from_micros(500));
            continue;
        }
        last_frame = Instant::now();

        if dirty {
            terminal.draw(|f| ui::draw(f, &state))?;
            last_version = state.version;
            dirty = false;
        }
    }
    Ok(())
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode()?;
    TERMINAL_ACTIVE.store(true, Ordering::SeqCst);
    execute!(io::stdout(), EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(io::stdout()))?;
    terminal.hide_cursor()?;
    terminal.clear()?;
    Ok(terminal)
}

fn restore_terminal() -> Result<()> {
    if !TERMINAL_ACTIVE.swap(false, Ordering::SeqCst) {
        return Ok(());
    }
    execute!(io::stdout(), Show, LeaveAlternateScreen)?;
    Ok(disable_raw_mode()?)
}

/// Put the terminal back into cooked mode if the dashboard had taken it.
/// Safe to call from any thread, any number of times.
pub fn restore_terminal_best_effort() {
    if let Err(e) = restore_terminal() {
        olog_warn!("Failed to restore terminal: {}", e);
    }
}
