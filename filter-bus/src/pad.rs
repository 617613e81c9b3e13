//! Typed connection points between elements.
//!
//! A source pad pushes [`RawFrameCmd`]s into the chain function of the sink pad
//! it is linked to, on the pushing thread. Peers are held weakly so linked
//! pads never keep each other alive.

use std::fmt;
use std::sync::{Arc, Mutex, RwLock, Weak};

use thiserror::Error;

use crate::caps::Caps;
use crate::frame::RawFrameCmd;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PadDirection {
    Src,
    Sink,
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("pad {0} is already linked")]
    WasLinked(String),
    #[error("cannot link {src} to {sink}: wrong pad directions")]
    WrongDirection { src: String, sink: String },
    #[error("cannot link {src} ({src_caps}) to {sink} ({sink_caps}): caps do not intersect")]
    NoFormat {
        src: String,
        src_caps: Caps,
        sink: String,
        sink_caps: Caps,
    },
}

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("pad {0} is not linked")]
    NotLinked(String),
    #[error("pad {0} is flushing")]
    Flushing(String),
    #[error("pad {pad} cannot handle {caps}")]
    NotNegotiated { pad: String, caps: Caps },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type ChainFn = dyn Fn(&Pad, RawFrameCmd) -> Result<(), FlowError> + Send + Sync;

struct PadInner {
    name: String,
    parent: String,
    direction: PadDirection,
    template: Caps,
    caps: RwLock<Option<Caps>>,
    peer: Mutex<Weak<PadInner>>,
    chain: Option<Box<ChainFn>>,
}

#[derive(Clone)]
pub struct Pad {
    inner: Arc<PadInner>,
}

impl Pad {
    pub fn new_src(name: &str, parent: &str, template: Caps) -> Self {
        Self::new(name, parent, PadDirection::Src, template, None)
    }

    pub fn new_sink<F>(name: &str, parent: &str, template: Caps, chain: F) -> Self
    where
        F: Fn(&Pad, RawFrameCmd) -> Result<(), FlowError> + Send + Sync + 'static,
    {
        Self::new(name, parent, PadDirection::Sink, template, Some(Box::new(chain)))
    }

    fn new(
        name: &str,
        parent: &str,
        direction: PadDirection,
        template: Caps,
        chain: Option<Box<ChainFn>>,
    ) -> Self {
        Self {
            inner: Arc::new(PadInner {
                name: name.to_string(),
                parent: parent.to_string(),
                direction,
                template,
                caps: RwLock::new(None),
                peer: Mutex::new(Weak::new()),
                chain,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn parent_name(&self) -> &str {
        &self.inner.parent
    }

    pub fn direction(&self) -> PadDirection {
        self.inner.direction
    }

    pub fn template_caps(&self) -> &Caps {
        &self.inner.template
    }

    /// Negotiated caps, set by the producer before the first push.
    pub fn current_caps(&self) -> Option<Caps> {
        self.inner
            .caps
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Negotiated caps when known, template caps otherwise.
    pub fn caps(&self) -> Caps {
        self.current_caps()
            .unwrap_or_else(|| self.inner.template.clone())
    }

    pub fn set_caps(&self, caps: Caps) {
        *self.inner.caps.write().unwrap_or_else(|e| e.into_inner()) = Some(caps);
    }

    pub fn peer(&self) -> Option<Pad> {
        self.inner
            .peer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .upgrade()
            .map(|inner| Pad { inner })
    }

    pub fn is_linked(&self) -> bool {
        self.peer().is_some()
    }

    /// Links this source pad to `sink`. Each pad takes at most one peer.
    pub fn link(&self, sink: &Pad) -> Result<(), LinkError> {
        if self.direction() != PadDirection::Src || sink.direction() != PadDirection::Sink {
            return Err(LinkError::WrongDirection {
                src: self.to_string(),
                sink: sink.to_string(),
            });
        }

        // src before sink; links always go that way so the order is stable
        let mut src_peer = self.inner.peer.lock().unwrap_or_else(|e| e.into_inner());
        if src_peer.upgrade().is_some() {
            return Err(LinkError::WasLinked(self.to_string()));
        }
        let mut sink_peer = sink.inner.peer.lock().unwrap_or_else(|e| e.into_inner());
        if sink_peer.upgrade().is_some() {
            return Err(LinkError::WasLinked(sink.to_string()));
        }

        let src_caps = self.caps();
        let sink_caps = sink.caps();
        if !src_caps.can_intersect(&sink_caps) {
            return Err(LinkError::NoFormat {
                src: self.to_string(),
                src_caps,
                sink: sink.to_string(),
                sink_caps,
            });
        }

        *src_peer = Arc::downgrade(&sink.inner);
        *sink_peer = Arc::downgrade(&self.inner);
        log::debug!("linked {} -> {}", self, sink);
        Ok(())
    }

    /// Breaks the link between this pad and its peer, if any.
    pub fn unlink(&self) {
        if let Some(peer) = self.peer() {
            *peer.inner.peer.lock().unwrap_or_else(|e| e.into_inner()) = Weak::new();
        }
        *self.inner.peer.lock().unwrap_or_else(|e| e.into_inner()) = Weak::new();
    }

    /// Pushes a frame or end-of-stream into the peer's chain function.
    pub fn push(&self, cmd: RawFrameCmd) -> Result<(), FlowError> {
        let peer = self
            .peer()
            .ok_or_else(|| FlowError::NotLinked(self.to_string()))?;
        peer.chain(cmd)
    }

    fn chain(&self, cmd: RawFrameCmd) -> Result<(), FlowError> {
        match &self.inner.chain {
            Some(chain) => chain(self, cmd),
            None => Err(FlowError::NotLinked(self.to_string())),
        }
    }
}

impl PartialEq for Pad {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Pad {}

impl fmt::Display for Pad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.inner.parent, self.inner.name)
    }
}

impl fmt::Debug for Pad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pad")
            .field("name", &self.to_string())
            .field("direction", &self.inner.direction)
            .field("caps", &self.caps().to_string())
            .finish()
    }
}
