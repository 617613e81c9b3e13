//! Pipelines: elements created from a launch description, one bus, and the
//! Null/Playing lifecycle that starts and stops the streaming workers.

use std::fmt;
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use anyhow::Context;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    bus::Bus,
    decodebin::DecodeBin,
    encodebin::EncodeBin,
    file::{FileSink, FileSrc},
    message::Message,
    pad::Pad,
    parse::{self, ElementDesc, ElementKind},
    video_filter::{FilterKind, VideoFilter},
};

static PIPELINE_COUNTER: AtomicUsize = AtomicUsize::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Null,
    Ready,
    Paused,
    Playing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChangeSuccess {
    Success,
    NoChange,
}

#[derive(Clone)]
pub enum Element {
    FileSrc(Arc<FileSrc>),
    DecodeBin(Arc<DecodeBin>),
    EncodeBin(Arc<EncodeBin>),
    FileSink(Arc<FileSink>),
    VideoFilter(Arc<VideoFilter>),
}

impl Element {
    fn from_desc(desc: &ElementDesc) -> anyhow::Result<Self> {
        let location = || {
            desc.property("location")
                .ok_or(anyhow::anyhow!("{} has no location", desc.name))
        };
        Ok(match desc.kind {
            ElementKind::FileSrc => Element::FileSrc(Arc::new(FileSrc::new(&desc.name, location()?))),
            ElementKind::FileSink => {
                Element::FileSink(Arc::new(FileSink::new(&desc.name, location()?)))
            }
            ElementKind::DecodeBin => Element::DecodeBin(DecodeBin::new(&desc.name)),
            ElementKind::EncodeBin => Element::EncodeBin(EncodeBin::new(&desc.name)),
            ElementKind::VideoConvert | ElementKind::TimeOverlay => Element::VideoFilter(
                VideoFilter::new(&desc.name, FilterKind::from_desc(desc)?),
            ),
        })
    }

    pub fn name(&self) -> &str {
        match self {
            Element::FileSrc(e) => e.name(),
            Element::DecodeBin(e) => e.name(),
            Element::EncodeBin(e) => e.name(),
            Element::FileSink(e) => e.name(),
            Element::VideoFilter(e) => e.name(),
        }
    }

    pub fn kind(&self) -> ElementKind {
        match self {
            Element::FileSrc(_) => ElementKind::FileSrc,
            Element::DecodeBin(_) => ElementKind::DecodeBin,
            Element::EncodeBin(_) => ElementKind::EncodeBin,
            Element::FileSink(_) => ElementKind::FileSink,
            Element::VideoFilter(e) => match e.kind() {
                FilterKind::Convert => ElementKind::VideoConvert,
                FilterKind::TimeOverlay(_) => ElementKind::TimeOverlay,
            },
        }
    }

    /// Always pads; only the video filters have them.
    pub fn static_pad(&self, name: &str) -> Option<Pad> {
        match (self, name) {
            (Element::VideoFilter(e), "sink") => Some(e.sink_pad().clone()),
            (Element::VideoFilter(e), "src") => Some(e.src_pad().clone()),
            _ => None,
        }
    }

    pub fn as_decodebin(&self) -> Option<&Arc<DecodeBin>> {
        match self {
            Element::DecodeBin(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_encodebin(&self) -> Option<&Arc<EncodeBin>> {
        match self {
            Element::EncodeBin(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind(), self.name())
    }
}

fn link_static(src: &Element, sink: &Element) -> anyhow::Result<()> {
    match (src, sink) {
        (Element::FileSrc(s), Element::DecodeBin(d)) => d.set_source(s.clone()),
        (Element::EncodeBin(e), Element::FileSink(s)) => e.set_sink(s.clone()),
        (Element::VideoFilter(a), Element::VideoFilter(b)) => {
            a.src_pad().link(b.sink_pad())?;
            Ok(())
        }
        (a, b) => anyhow::bail!("cannot link {} to {}", a.name(), b.name()),
    }
}

struct Running {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

struct PipelineState {
    current: State,
    running: Option<Running>,
    played: bool,
}

/// A graph of elements sharing one bus. A pipeline plays at most once.
pub struct Pipeline {
    name: String,
    elements: Vec<Element>,
    bus: Bus,
    state: Mutex<PipelineState>,
}

impl Pipeline {
    /// Builds the elements of `desc` and applies its static links.
    pub fn parse_launch(desc: &str) -> anyhow::Result<Self> {
        let launch = parse::parse(desc)?;
        let elements = launch
            .elements
            .iter()
            .map(Element::from_desc)
            .collect::<anyhow::Result<Vec<_>>>()?;
        for (src, sink) in &launch.links {
            link_static(&elements[*src], &elements[*sink])?;
        }

        let name = format!("pipeline{}", PIPELINE_COUNTER.fetch_add(1, Ordering::SeqCst));
        log::debug!("{}: {} elements: {:?}", name, elements.len(), elements);
        Ok(Self {
            name,
            elements,
            bus: Bus::new(),
            state: Mutex::new(PipelineState {
                current: State::Null,
                running: None,
                played: false,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    pub fn by_name(&self, name: &str) -> Option<&Element> {
        self.elements.iter().find(|e| e.name() == name)
    }

    pub async fn current_state(&self) -> State {
        self.state.lock().await.current
    }

    /// Moves the pipeline to `Playing` or back to `Null`, posting one
    /// `StateChanged` per intermediate state.
    pub async fn set_state(&self, target: State) -> anyhow::Result<StateChangeSuccess> {
        let mut state = self.state.lock().await;
        if state.current == target {
            return Ok(StateChangeSuccess::NoChange);
        }
        match target {
            State::Playing => {
                if state.played {
                    anyhow::bail!("{} has already played", self.name);
                }
                self.play(&mut state)?;
            }
            State::Null => self.stop(&mut state).await,
            other => anyhow::bail!("{}: setting state {:?} is not supported", self.name, other),
        }
        Ok(StateChangeSuccess::Success)
    }

    fn transition(&self, state: &mut PipelineState, new: State) {
        log::info!("{}: {:?} -> {:?}", self.name, state.current, new);
        self.bus
            .post(Message::state_changed(&self.name, state.current, new));
        state.current = new;
    }

    fn check_links(&self) -> anyhow::Result<()> {
        for element in &self.elements {
            match element {
                Element::DecodeBin(d) if d.source().is_none() => {
                    anyhow::bail!("{} has no source", d.name())
                }
                Element::EncodeBin(e) if e.sink().is_none() => {
                    anyhow::bail!("{} is not linked to a sink", e.name())
                }
                Element::EncodeBin(e) if e.profile().is_none() => {
                    anyhow::bail!("{} has no encoding profile", e.name())
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn play(&self, state: &mut PipelineState) -> anyhow::Result<()> {
        self.check_links()
            .with_context(|| format!("{} cannot play", self.name))?;
        state.played = true;
        self.transition(state, State::Ready);
        self.transition(state, State::Paused);

        let mut running = Running {
            cancel: CancellationToken::new(),
            handles: Vec::new(),
        };
        let started = self.start_elements(&mut running);
        let cancel = running.cancel.clone();
        state.running = Some(running);
        if let Err(e) = started {
            cancel.cancel();
            self.bus.post(Message::error(&self.name, &e));
            return Err(e);
        }
        self.transition(state, State::Playing);
        Ok(())
    }

    /// Sinks first so every encodebin consumes before data flows.
    fn start_elements(&self, running: &mut Running) -> anyhow::Result<()> {
        let encodebins: Vec<Arc<EncodeBin>> = self
            .elements
            .iter()
            .filter_map(Element::as_encodebin)
            .cloned()
            .collect();
        for encodebin in &encodebins {
            let handle = encodebin.start(&self.bus, &self.name, &running.cancel)?;
            running.handles.push(handle);
        }

        let no_more_pads: Arc<dyn Fn() + Send + Sync> = Arc::new(move || {
            for encodebin in &encodebins {
                encodebin.no_more_pads();
            }
        });
        for decodebin in self.elements.iter().filter_map(Element::as_decodebin) {
            let handles = decodebin.start(&self.bus, &running.cancel, no_more_pads.clone())?;
            running.handles.extend(handles);
        }
        Ok(())
    }

    async fn stop(&self, state: &mut PipelineState) {
        if let Some(running) = state.running.take() {
            running.cancel.cancel();
            for handle in running.handles {
                if let Err(e) = handle.await {
                    log::error!("{}: streaming worker failed: {}", self.name, e);
                }
            }
        }
        while state.current != State::Null {
            let next = match state.current {
                State::Playing => State::Paused,
                State::Paused => State::Ready,
                State::Ready | State::Null => State::Null,
            };
            self.transition(state, next);
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if let Ok(state) = self.state.try_lock() {
            if let Some(running) = &state.running {
                running.cancel.cancel();
            }
        }
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("elements", &self.elements)
            .finish()
    }
}

#[cfg(test)]
#[path = "pipeline_test.rs"]
mod pipeline_test;
