use std::fmt;

use crate::pipeline::State;

/// Text of an error, warning or info message plus optional debug detail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDetails {
    pub message: String,
    pub debug: Option<String>,
}

impl fmt::Display for MessageDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.debug {
            Some(debug) => write!(f, "{} {}", self.message, debug),
            None => write!(f, "{} None", self.message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageView {
    Eos,
    Error(MessageDetails),
    Warning(MessageDetails),
    Info(MessageDetails),
    StateChanged { old: State, new: State },
    StreamStart,
    Element { name: String, detail: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    src: String,
    view: MessageView,
}

impl Message {
    pub fn new(src: &str, view: MessageView) -> Self {
        Self {
            src: src.to_string(),
            view,
        }
    }

    pub fn eos(src: &str) -> Self {
        Self::new(src, MessageView::Eos)
    }

    /// Error message; the top-level context becomes the message and the whole
    /// cause chain the debug detail.
    pub fn error(src: &str, err: &anyhow::Error) -> Self {
        Self::new(src, MessageView::Error(details(src, err)))
    }

    pub fn warning(src: &str, err: &anyhow::Error) -> Self {
        Self::new(src, MessageView::Warning(details(src, err)))
    }

    pub fn info(src: &str, message: &str) -> Self {
        Self::new(
            src,
            MessageView::Info(MessageDetails {
                message: message.to_string(),
                debug: None,
            }),
        )
    }

    pub fn state_changed(src: &str, old: State, new: State) -> Self {
        Self::new(src, MessageView::StateChanged { old, new })
    }

    pub fn stream_start(src: &str) -> Self {
        Self::new(src, MessageView::StreamStart)
    }

    pub fn element(src: &str, name: &str, detail: impl ToString) -> Self {
        Self::new(
            src,
            MessageView::Element {
                name: name.to_string(),
                detail: detail.to_string(),
            },
        )
    }

    pub fn src(&self) -> &str {
        &self.src
    }

    pub fn view(&self) -> &MessageView {
        &self.view
    }

    pub fn type_name(&self) -> &'static str {
        match self.view {
            MessageView::Eos => "eos",
            MessageView::Error(_) => "error",
            MessageView::Warning(_) => "warning",
            MessageView::Info(_) => "info",
            MessageView::StateChanged { .. } => "state-changed",
            MessageView::StreamStart => "stream-start",
            MessageView::Element { .. } => "element",
        }
    }
}

fn details(src: &str, err: &anyhow::Error) -> MessageDetails {
    let chain = format!("{:#}", err);
    let message = err.to_string();
    let debug = if chain == message {
        src.to_string()
    } else {
        format!("{}: {}", src, chain)
    };
    MessageDetails {
        message,
        debug: Some(debug),
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} from {}", self.type_name(), self.src)?;
        match &self.view {
            MessageView::Eos | MessageView::StreamStart => {}
            MessageView::Error(d) | MessageView::Warning(d) | MessageView::Info(d) => {
                write!(f, ": {}", d)?
            }
            MessageView::StateChanged { old, new } => write!(f, ": {:?} -> {:?}", old, new)?,
            MessageView::Element { name, detail } => write!(f, ": {} {}", name, detail)?,
        }
        write!(f, ">")
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Context;

    use super::*;

    #[test]
    fn test_error_details_carry_chain() {
        let err = Err::<(), _>(anyhow::anyhow!("codec not found"))
            .context("failed to link pad src_0")
            .unwrap_err();
        let msg = Message::error("d", &err);
        match msg.view() {
            MessageView::Error(d) => {
                assert_eq!(d.message, "failed to link pad src_0");
                assert_eq!(
                    d.debug.as_deref(),
                    Some("d: failed to link pad src_0: codec not found")
                );
            }
            other => panic!("unexpected view {:?}", other),
        }
        assert_eq!(msg.type_name(), "error");
    }

    #[test]
    fn test_display() {
        let msg = Message::state_changed("pipeline0", State::Null, State::Ready);
        assert_eq!(msg.to_string(), "<state-changed from pipeline0: Null -> Ready>");
        assert_eq!(Message::eos("pipeline0").to_string(), "<eos from pipeline0>");
    }
}
