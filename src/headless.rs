//! Line-oriented UI for non-interactive runs.
//!
//! Every bus event is written as one JSON object per line. The UI exits once
//! both subscriptions have ended (the bus was closed after all work finished)
//! or when its quit handle fires.

use std::io::{self, Write};

use futures::stream::{self, StreamExt};

use crate::app::{QuitHandle, UiRunner};
use crate::bus::{EventBus, Subscription};
use crate::event::{Event, Topic};
use crate::{olog_debug, Result};

pub struct HeadlessUi {
    task_sub: Subscription,
    dag_sub: Subscription,
    out: Box<dyn Write + Send>,
    quit: QuitHandle,
}

impl HeadlessUi {
    pub fn new(bus: &EventBus) -> Self {
        Self::with_writer(bus, Box::new(io::stdout()))
    }

    pub fn with_writer(bus: &EventBus, out: Box<dyn Write + Send>) -> Self {
        Self {
            task_sub: bus.subscribe(Topic::Task),
            dag_sub: bus.subscribe(Topic::Dag),
            out,
            quit: QuitHandle::new(),
        }
    }

    async fn run_async(mut self) -> Result<()> {
        let mut events = stream::select(self.task_sub, self.dag_sub);
        let mut written = 0usize;

        loop {
            tokio::select! {
                biased;
                _ = self.quit.quitted() => {
                    olog_debug!("HeadlessUi: quit after {} events", written);
                    break;
                }
                next = events.next() => match next {
                    Some(event) => {
                        write_event(&mut self.out, &event)?;
                        written += 1;
                    }
                    None => {
                        olog_debug!("HeadlessUi: bus closed after {} events", written);
                        break;
                    }
                },
            }
        }

        self.out.flush()?;
        Ok(())
    }
}

impl UiRunner for HeadlessUi {
    fn quit_handle(&self) -> QuitHandle {
        self.quit.clone()
    }

    fn run(self) -> Result<()> {
        tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()?
            .block_on(self.run_async())
    }
}

fn write_event(out: &mut dyn Write, event: &Event) -> Result<()> {
    serde_json::to_writer(&mut *out, event)?;
    out.write_all(b"\n")?;
    out.flush()?;
    Ok(())
}
