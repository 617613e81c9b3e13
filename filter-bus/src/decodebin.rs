//! Auto-plugging decoder: demuxes the linked file source, decodes every audio
//! and video stream and exposes one `src_%u` pad per stream once its first
//! frame is decoded.

use std::collections::HashMap;
use std::sync::{
    Arc, Mutex, OnceLock, RwLock,
    atomic::{AtomicUsize, Ordering},
    mpsc::RecvTimeoutError,
};
use std::time::Duration;

use anyhow::Context;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    bus::Bus,
    caps::Caps,
    decoder::Decoder,
    discoverer::rational_field,
    file::FileSrc,
    frame::{RawFrame, RawFrameCmd},
    input::AvInput,
    message::Message,
    packet::{RawPacketCmd, RawPacketReceiver, RawPacketSender},
    pad::{FlowError, Pad},
};

/// Packets queued per decoder before the demuxer blocks.
const PACKET_QUEUE_BOUND: usize = 64;
const POLL_INTERVAL: Duration = Duration::from_millis(10);

pub type PadAddedFn = dyn Fn(&DecodeBin, &Pad) -> anyhow::Result<()> + Send + Sync;

pub struct DecodeBin {
    name: String,
    source: OnceLock<Arc<FileSrc>>,
    handlers: RwLock<Vec<Arc<PadAddedFn>>>,
    pads: Mutex<Vec<Pad>>,
    pad_counter: AtomicUsize,
}

impl DecodeBin {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            source: OnceLock::new(),
            handlers: RwLock::new(Vec::new()),
            pads: Mutex::new(Vec::new()),
            pad_counter: AtomicUsize::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn set_source(&self, source: Arc<FileSrc>) -> anyhow::Result<()> {
        self.source
            .set(source)
            .map_err(|s| anyhow::anyhow!("{} is already fed by {}", self.name, s.name()))
    }

    pub fn source(&self) -> Option<&Arc<FileSrc>> {
        self.source.get()
    }

    /// Registers a handler run for every new source pad, on the streaming
    /// thread of that pad. An error fails the stream and is posted on the bus.
    pub fn connect_pad_added<F>(&self, handler: F)
    where
        F: Fn(&DecodeBin, &Pad) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::new(handler));
    }

    /// Source pads exposed so far.
    pub fn src_pads(&self) -> Vec<Pad> {
        self.pads.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn add_pad(&self, caps: Caps) -> Pad {
        let n = self.pad_counter.fetch_add(1, Ordering::SeqCst);
        let pad = Pad::new_src(&format!("src_{}", n), &self.name, caps.clone());
        pad.set_caps(caps);
        self.pads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(pad.clone());
        pad
    }

    fn emit_pad_added(&self, pad: &Pad) -> anyhow::Result<()> {
        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for handler in handlers {
            handler(self, pad)?;
        }
        Ok(())
    }

    /// Opens the source and spawns the demuxer and one decoder worker per
    /// audio/video stream. `no_more_pads` runs once every stream has either
    /// exposed its pad or ended.
    pub(crate) fn start(
        self: &Arc<Self>,
        bus: &Bus,
        cancel: &CancellationToken,
        no_more_pads: Arc<dyn Fn() + Send + Sync>,
    ) -> anyhow::Result<Vec<JoinHandle<()>>> {
        let source = self
            .source
            .get()
            .ok_or(anyhow::anyhow!("{} has no source", self.name))?;
        let input = source
            .open()
            .with_context(|| format!("{}: could not read {}", source.name(), source.location().display()))?;

        let mut senders = HashMap::new();
        let mut decoders = Vec::new();
        for stream in input.streams().values() {
            if !stream.is_video() && !stream.is_audio() {
                bus.post(Message::info(
                    &self.name,
                    &format!("skipping {} stream {}", stream.medium_name(), stream.index()),
                ));
                continue;
            }
            match Decoder::new(stream) {
                Ok(decoder) => {
                    let (tx, rx) = std::sync::mpsc::sync_channel(PACKET_QUEUE_BOUND);
                    senders.insert(stream.index(), tx);
                    decoders.push((decoder, rx));
                }
                Err(e) => bus.post(Message::warning(
                    &self.name,
                    &e.context(format!("no decoder for stream {}", stream.index())),
                )),
            }
        }
        if decoders.is_empty() {
            anyhow::bail!(
                "{}: no decodable stream in {}",
                self.name,
                source.location().display()
            );
        }

        let tracker = Arc::new(PadTracker {
            remaining: AtomicUsize::new(decoders.len()),
            decodebin: self.name.clone(),
            bus: bus.clone(),
            callback: no_more_pads,
        });

        let mut handles = Vec::with_capacity(decoders.len() + 1);
        for (decoder, rx) in decoders {
            let worker = StreamWorker {
                decodebin: self.clone(),
                decoder,
                bus: bus.clone(),
                cancel: cancel.clone(),
                tracker: tracker.clone(),
                pad: None,
                settled: false,
            };
            handles.push(tokio::task::spawn_blocking(move || worker.run(rx)));
        }

        let cancel = cancel.clone();
        let name = self.name.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            demux_loop(input, senders, cancel, &name)
        }));
        bus.post(Message::stream_start(&self.name));
        Ok(handles)
    }
}

fn demux_loop(
    mut input: AvInput,
    mut senders: HashMap<usize, RawPacketSender>,
    cancel: CancellationToken,
    name: &str,
) {
    let mut packets = 0u64;
    while !senders.is_empty() {
        if cancel.is_cancelled() {
            log::debug!("{}: demuxer cancelled after {} packets", name, packets);
            return;
        }
        let Some(packet) = input.read_packet() else {
            break;
        };
        let index = packet.index();
        if let Some(tx) = senders.get(&index) {
            if tx.send(RawPacketCmd::Data(packet)).is_err() {
                log::debug!("{}: stream {} stopped consuming", name, index);
                senders.remove(&index);
            }
            packets += 1;
        }
    }
    log::debug!("{}: end of file after {} packets", name, packets);
    for (_, tx) in senders {
        let _ = tx.send(RawPacketCmd::EOF);
    }
}

/// Counts streams that have not yet exposed a pad or ended.
struct PadTracker {
    remaining: AtomicUsize,
    decodebin: String,
    bus: Bus,
    callback: Arc<dyn Fn() + Send + Sync>,
}

impl PadTracker {
    fn settle(&self) {
        if self.remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.bus
                .post(Message::element(&self.decodebin, "no-more-pads", ""));
            (self.callback)();
        }
    }
}

struct StreamWorker {
    decodebin: Arc<DecodeBin>,
    decoder: Decoder,
    bus: Bus,
    cancel: CancellationToken,
    tracker: Arc<PadTracker>,
    pad: Option<Pad>,
    settled: bool,
}

impl StreamWorker {
    fn run(mut self, rx: RawPacketReceiver) {
        match self.stream_loop(&rx) {
            Ok(()) => {}
            Err(FlowError::Flushing(pad)) => log::debug!("{} flushing", pad),
            Err(FlowError::Other(e)) => self.bus.post(Message::error(self.decodebin.name(), &e)),
            Err(e) => {
                let e = anyhow::Error::new(e).context(format!(
                    "internal data stream error in stream {}",
                    self.decoder.stream_index()
                ));
                self.bus.post(Message::error(self.decodebin.name(), &e));
            }
        }
        if !self.settled {
            self.settled = true;
            self.tracker.settle();
        }
    }

    fn stream_loop(&mut self, rx: &RawPacketReceiver) -> Result<(), FlowError> {
        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(RawPacketCmd::Data(packet)) => {
                    if let Err(e) = self.decoder.send_packet(packet) {
                        self.warn(e.context("could not decode packet"));
                        continue;
                    }
                    self.drain()?;
                }
                Ok(RawPacketCmd::EOF) => {
                    if let Err(e) = self.decoder.send_eof() {
                        self.warn(e.context("could not flush decoder"));
                    }
                    self.drain()?;
                    if let Some(pad) = &self.pad {
                        pad.push(RawFrameCmd::EOF)?;
                    }
                    return Ok(());
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Ok(()),
            }
        }
    }

    fn warn(&self, e: anyhow::Error) {
        let e = e.context(format!("stream {}", self.decoder.stream_index()));
        self.bus.post(Message::warning(self.decodebin.name(), &e));
    }

    fn drain(&mut self) -> Result<(), FlowError> {
        loop {
            match self.decoder.receive_frame() {
                Ok(Some(frame)) => self.push(frame)?,
                Ok(None) => return Ok(()),
                Err(e) => {
                    self.warn(e.context("could not receive frame"));
                    return Ok(());
                }
            }
        }
    }

    fn push(&mut self, frame: RawFrame) -> Result<(), FlowError> {
        let pad = match &self.pad {
            Some(pad) => pad.clone(),
            None => self.expose(&frame)?,
        };
        pad.push(RawFrameCmd::Data(frame))
    }

    fn expose(&mut self, frame: &RawFrame) -> Result<Pad, FlowError> {
        let mut caps = frame.caps();
        if let RawFrame::Video(_) = frame {
            if let Some(rate) = rational_field(self.decoder.stream().rate()) {
                caps.set("framerate", rate);
            }
        }
        let pad = self.decodebin.add_pad(caps.clone());
        self.pad = Some(pad.clone());
        log::info!("{}: new pad {} with caps {}", self.decodebin.name(), pad, caps);
        self.bus.post(Message::element(
            self.decodebin.name(),
            "pad-added",
            format!("{} {}", pad.name(), caps),
        ));

        self.decodebin
            .emit_pad_added(&pad)
            .with_context(|| format!("failed to link pad {} ({})", pad, caps))?;

        self.settled = true;
        self.tracker.settle();
        Ok(pad)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use super::*;
    use crate::message::MessageView;
    use crate::testsrc::TestMedia;

    #[tokio::test]
    async fn test_start_without_source() {
        let decodebin = DecodeBin::new("d");
        let result = decodebin.start(&Bus::new(), &CancellationToken::new(), Arc::new(|| {}));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_exposes_one_pad_per_stream() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("clip.mkv");
        TestMedia::new()
            .video("mpeg4", 64, 48, 25)
            .audio("mp2", 44100, 2)
            .duration(0.4)
            .write(&path)?;

        let decodebin = DecodeBin::new("d");
        decodebin.set_source(Arc::new(FileSrc::new("filesrc0", &path.to_string_lossy())))?;

        let frames = Arc::new(AtomicUsize::new(0));
        let eos = Arc::new(AtomicUsize::new(0));
        let sinks = Arc::new(Mutex::new(Vec::new()));
        {
            let (frames, eos, sinks) = (frames.clone(), eos.clone(), sinks.clone());
            decodebin.connect_pad_added(move |_, pad| {
                let (frames, eos) = (frames.clone(), eos.clone());
                let sink = Pad::new_sink("sink", "fakesink", Caps::any(), move |_, cmd| {
                    match cmd {
                        RawFrameCmd::Data(_) => frames.fetch_add(1, Ordering::SeqCst),
                        RawFrameCmd::EOF => eos.fetch_add(1, Ordering::SeqCst),
                    };
                    Ok(())
                });
                pad.link(&sink)?;
                sinks.lock().unwrap().push(sink);
                Ok(())
            });
        }

        let bus = Bus::new();
        let no_more_pads = Arc::new(AtomicBool::new(false));
        let flag = no_more_pads.clone();
        let handles = decodebin.start(
            &bus,
            &CancellationToken::new(),
            Arc::new(move || flag.store(true, Ordering::SeqCst)),
        )?;
        for handle in handles {
            handle.await?;
        }

        assert!(no_more_pads.load(Ordering::SeqCst));
        assert_eq!(eos.load(Ordering::SeqCst), 2);
        assert!(frames.load(Ordering::SeqCst) > 10);

        let mut names: Vec<String> = decodebin.src_pads().iter().map(|p| p.name().to_string()).collect();
        names.sort();
        assert_eq!(names, vec!["src_0", "src_1"]);
        let audio = decodebin
            .src_pads()
            .into_iter()
            .find(|p| p.caps().is_raw_audio())
            .unwrap();
        assert_eq!(audio.caps().get("layout"), Some("stereo"));

        let messages: Vec<Message> = std::iter::from_fn(|| bus.pop()).collect();
        assert_eq!(messages[0].view(), &MessageView::StreamStart);
        let elements: Vec<&str> = messages
            .iter()
            .filter_map(|m| match m.view() {
                MessageView::Element { name, .. } => Some(name.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(elements, vec!["pad-added", "pad-added", "no-more-pads"]);
        Ok(())
    }
}
