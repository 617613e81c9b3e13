use std::sync::{Arc, OnceLock};

use filter_bus::{
    bus::MainLoop,
    message::{Message, MessageView},
};

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    EndOfStream,
    Error,
    /// The main loop stopped without a terminal message.
    Aborted,
}

/// Bus watch printing every message and quitting the main loop on
/// end-of-stream or error. The first terminal message decides the outcome.
#[derive(Clone)]
pub struct EventRelay {
    main_loop: MainLoop,
    termination: Arc<OnceLock<Termination>>,
}

impl EventRelay {
    pub fn new(main_loop: MainLoop) -> Self {
        Self {
            main_loop,
            termination: Arc::new(OnceLock::new()),
        }
    }

    pub fn termination(&self) -> Option<Termination> {
        self.termination.get().copied()
    }

    pub fn on_message(&self, message: &Message) -> bool {
        println!("{}", console_line(message));
        let terminal = match message.view() {
            MessageView::Eos => Some(Termination::EndOfStream),
            MessageView::Error(_) => Some(Termination::Error),
            _ => None,
        };
        if let Some(termination) = terminal {
            if self.termination.set(termination).is_err() {
                log::debug!("ignoring {} after {:?}", message.type_name(), self.termination());
            }
            self.main_loop.quit();
        }
        true
    }
}

pub fn console_line(message: &Message) -> String {
    match message.view() {
        MessageView::Eos => "End of stream".to_string(),
        MessageView::Error(details) => format!("Error: {}", details),
        MessageView::Warning(details) => format!("Warning: {}", details),
        MessageView::Info(details) => format!("Info: {}", details),
        _ => format!("unknown message: {} {}", message.type_name(), message),
    }
}
