//! Encoding bin: one request sink pad per profile stream, each feeding its own
//! encoder, and a muxer worker writing the linked file sink.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{
    Arc, Mutex, OnceLock, RwLock, Weak,
    mpsc::{Receiver, RecvTimeoutError, SyncSender},
};
use std::time::Duration;

use anyhow::Context;
use ffmpeg_next::{Rational, codec::Parameters};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    bus::Bus,
    caps::Caps,
    discoverer::StreamKind,
    encoder::Encoder,
    file::FileSink,
    frame::RawFrameCmd,
    message::Message,
    output::{AvOutput, OutputFormat},
    packet::RawPacket,
    pad::{FlowError, Pad},
    profile::EncodingProfile,
};

/// Commands queued to the muxer before encoders block.
const MUX_QUEUE_BOUND: usize = 256;
const POLL_INTERVAL: Duration = Duration::from_millis(10);

struct StreamSpec {
    parameters: Parameters,
    time_base: Rational,
}

unsafe impl Send for StreamSpec {}

enum MuxCommand {
    AddStream { slot: usize, spec: StreamSpec },
    RemoveStream { slot: usize },
    Packet { slot: usize, packet: RawPacket },
    Eos { slot: usize },
    NoMorePads,
}

#[derive(Default)]
struct Slots {
    pads: BTreeMap<usize, Pad>,
    video: usize,
    audio: usize,
}

pub struct EncodeBin {
    name: String,
    profile: RwLock<Option<EncodingProfile>>,
    sink: OnceLock<Arc<FileSink>>,
    format: OnceLock<OutputFormat>,
    slots: Mutex<Slots>,
    mux_tx: SyncSender<MuxCommand>,
    mux_rx: Mutex<Option<Receiver<MuxCommand>>>,
}

impl EncodeBin {
    pub fn new(name: &str) -> Arc<Self> {
        let (mux_tx, mux_rx) = std::sync::mpsc::sync_channel(MUX_QUEUE_BOUND);
        Arc::new(Self {
            name: name.to_string(),
            profile: RwLock::new(None),
            sink: OnceLock::new(),
            format: OnceLock::new(),
            slots: Mutex::new(Slots::default()),
            mux_tx,
            mux_rx: Mutex::new(Some(mux_rx)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_profile(&self, profile: EncodingProfile) {
        log::debug!("{}: profile {}", self.name, profile);
        *self.profile.write().unwrap_or_else(|e| e.into_inner()) = Some(profile);
    }

    pub fn profile(&self) -> Option<EncodingProfile> {
        self.profile
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub(crate) fn set_sink(&self, sink: Arc<FileSink>) -> anyhow::Result<()> {
        self.sink
            .set(sink)
            .map_err(|s| anyhow::anyhow!("{} already feeds {}", self.name, s.name()))
    }

    pub fn sink(&self) -> Option<&Arc<FileSink>> {
        self.sink.get()
    }

    /// Request pads handed out and not released.
    pub fn sink_pads(&self) -> Vec<Pad> {
        self.slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pads
            .values()
            .cloned()
            .collect()
    }

    fn location(&self) -> anyhow::Result<PathBuf> {
        let sink = self
            .sink
            .get()
            .ok_or(anyhow::anyhow!("{} is not linked to a sink", self.name))?;
        Ok(sink.location().to_path_buf())
    }

    fn output_format(&self) -> anyhow::Result<OutputFormat> {
        if let Some(format) = self.format.get() {
            return Ok(format.clone());
        }
        let profile = self
            .profile()
            .ok_or(anyhow::anyhow!("{} has no encoding profile", self.name))?;
        let format = OutputFormat::for_output(&self.location()?, profile.container())?;
        log::debug!("{}: muxing as {}", self.name, format.name);
        let _ = self.format.set(format.clone());
        Ok(format)
    }

    /// Hands out a sink pad for the first unclaimed profile stream of the same
    /// kind whose raw caps intersect `caps`, with its encoder opened.
    pub fn request_pad(self: &Arc<Self>, caps: &Caps) -> anyhow::Result<Pad> {
        let kind = if caps.is_video() {
            StreamKind::Video
        } else if caps.is_audio() {
            StreamKind::Audio
        } else {
            anyhow::bail!("{}: no encoder for {}", self.name, caps);
        };
        let profile = self
            .profile()
            .ok_or(anyhow::anyhow!("{} has no encoding profile", self.name))?;
        let format = self.output_format()?;

        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let (slot, stream) = profile
            .streams()
            .iter()
            .enumerate()
            .find(|(slot, stream)| {
                stream.kind() == kind
                    && !slots.pads.contains_key(slot)
                    && stream.input_caps().can_intersect(caps)
            })
            .ok_or(anyhow::anyhow!(
                "{}: no free {} stream in the profile accepts {}",
                self.name,
                kind,
                caps
            ))?;

        let encoder = Encoder::new(stream, format.global_header)
            .with_context(|| format!("{}: could not open {} encoder", self.name, stream.codec_name))?;
        let spec = StreamSpec {
            parameters: encoder.parameters(),
            time_base: encoder.time_base(),
        };

        let counter = match kind {
            StreamKind::Video => &mut slots.video,
            StreamKind::Audio => &mut slots.audio,
        };
        let pad_name = format!("{}_{}", kind, *counter);
        *counter += 1;

        let weak: Weak<EncodeBin> = Arc::downgrade(self);
        let encoder = Mutex::new(encoder);
        let pad = Pad::new_sink(&pad_name, &self.name, stream.input_caps(), move |pad, cmd| {
            let Some(bin) = weak.upgrade() else {
                return Err(FlowError::Flushing(pad.to_string()));
            };
            let mut encoder = encoder.lock().unwrap_or_else(|e| e.into_inner());
            bin.encode(slot, pad, &mut encoder, cmd)
        });

        self.send(&pad, MuxCommand::AddStream { slot, spec })
            .map_err(|_| anyhow::anyhow!("{} is shut down", self.name))?;
        slots.pads.insert(slot, pad.clone());
        log::info!("{}: requested {} for {}", self.name, pad, stream.caps);
        Ok(pad)
    }

    /// Gives a request pad back; its profile stream becomes free again.
    pub fn release_pad(&self, pad: &Pad) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let Some(slot) = slots
            .pads
            .iter()
            .find(|(_, p)| *p == pad)
            .map(|(slot, _)| *slot)
        else {
            return;
        };
        slots.pads.remove(&slot);
        pad.unlink();
        log::debug!("{}: released {}", self.name, pad);
        let _ = self.mux_tx.send(MuxCommand::RemoveStream { slot });
    }

    /// No further pads will be requested; the output is written with the
    /// streams registered so far.
    pub fn no_more_pads(&self) {
        let _ = self.mux_tx.send(MuxCommand::NoMorePads);
    }

    fn send(&self, pad: &Pad, cmd: MuxCommand) -> Result<(), FlowError> {
        self.mux_tx
            .send(cmd)
            .map_err(|_| FlowError::Flushing(pad.to_string()))
    }

    fn encode(
        &self,
        slot: usize,
        pad: &Pad,
        encoder: &mut Encoder,
        cmd: RawFrameCmd,
    ) -> Result<(), FlowError> {
        match cmd {
            RawFrameCmd::Data(frame) => {
                let caps = frame.caps();
                let accepted = match encoder.profile().kind() {
                    StreamKind::Video => caps.is_raw_video(),
                    StreamKind::Audio => caps.is_raw_audio(),
                };
                if !accepted {
                    return Err(FlowError::NotNegotiated {
                        pad: pad.to_string(),
                        caps,
                    });
                }
                encoder
                    .send_frame(frame)
                    .with_context(|| format!("{}: could not encode frame", pad))?;
                self.drain(slot, pad, encoder)
            }
            RawFrameCmd::EOF => {
                encoder
                    .send_eof()
                    .with_context(|| format!("{}: could not flush encoder", pad))?;
                self.drain(slot, pad, encoder)?;
                log::debug!("{}: end of stream", pad);
                self.send(pad, MuxCommand::Eos { slot })
            }
        }
    }

    fn drain(&self, slot: usize, pad: &Pad, encoder: &mut Encoder) -> Result<(), FlowError> {
        while let Some(packet) = encoder
            .receive_packet()
            .with_context(|| format!("{}: could not receive packet", pad))?
        {
            self.send(pad, MuxCommand::Packet { slot, packet })?;
        }
        Ok(())
    }

    /// Spawns the muxer worker. It posts end-of-stream from `pipeline` once
    /// the trailer is written.
    pub(crate) fn start(
        &self,
        bus: &Bus,
        pipeline: &str,
        cancel: &CancellationToken,
    ) -> anyhow::Result<JoinHandle<()>> {
        let profile = self
            .profile()
            .ok_or(anyhow::anyhow!("{} has no encoding profile", self.name))?;
        let format = self.output_format()?;
        let rx = self
            .mux_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or(anyhow::anyhow!("{} was already started", self.name))?;

        let muxer = Muxer {
            name: self.name.clone(),
            location: self.location()?,
            format,
            expected: profile.streams().len(),
            output: None,
            specs: BTreeMap::new(),
            eos: BTreeMap::new(),
            pending: Vec::new(),
            sealed: false,
        };
        let bus = bus.clone();
        let pipeline = pipeline.to_string();
        let cancel = cancel.clone();
        Ok(tokio::task::spawn_blocking(move || {
            muxer.run(rx, &bus, &pipeline, &cancel)
        }))
    }
}

struct Muxer {
    name: String,
    location: PathBuf,
    format: OutputFormat,
    /// Streams in the profile.
    expected: usize,
    output: Option<AvOutput>,
    /// Registered streams waiting for the header.
    specs: BTreeMap<usize, StreamSpec>,
    /// Registered streams and whether they reached end-of-stream.
    eos: BTreeMap<usize, bool>,
    /// Packets received before the header was written.
    pending: Vec<(usize, RawPacket)>,
    sealed: bool,
}

impl Muxer {
    fn run(mut self, rx: Receiver<MuxCommand>, bus: &Bus, pipeline: &str, cancel: &CancellationToken) {
        match self.mux_loop(&rx, cancel) {
            Ok(true) => {
                log::info!("{}: wrote {}", self.name, self.location.display());
                bus.post(Message::eos(pipeline));
            }
            Ok(false) => log::debug!("{}: muxer stopped", self.name),
            Err(e) => {
                log::error!("{}: {:#}", self.name, e);
                bus.post(Message::error(&self.name, &e));
            }
        }
    }

    /// Ok(true) once the trailer is written, Ok(false) when stopped early.
    fn mux_loop(&mut self, rx: &Receiver<MuxCommand>, cancel: &CancellationToken) -> anyhow::Result<bool> {
        loop {
            if cancel.is_cancelled() {
                return Ok(false);
            }
            let cmd = match rx.recv_timeout(POLL_INTERVAL) {
                Ok(cmd) => cmd,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Ok(false),
            };
            match cmd {
                MuxCommand::AddStream { slot, spec } => {
                    if self.output.is_some() {
                        anyhow::bail!("stream {} requested after the output was started", slot);
                    }
                    self.specs.insert(slot, spec);
                    self.eos.insert(slot, false);
                }
                MuxCommand::RemoveStream { slot } => {
                    self.specs.remove(&slot);
                    self.eos.remove(&slot);
                    self.pending.retain(|(s, _)| *s != slot);
                }
                MuxCommand::Packet { slot, packet } => match self.output.as_mut() {
                    Some(output) => output.write_packet(slot, packet)?,
                    None => self.pending.push((slot, packet)),
                },
                MuxCommand::Eos { slot } => {
                    self.eos.insert(slot, true);
                }
                MuxCommand::NoMorePads => {
                    if self.eos.is_empty() {
                        anyhow::bail!("no stream reached {}", self.name);
                    }
                    self.sealed = true;
                }
            }

            let complete = self.sealed || self.eos.len() >= self.expected;
            if complete && self.output.is_none() {
                self.open()?;
            }
            if complete && self.eos.values().all(|done| *done) {
                if let Some(output) = self.output.as_mut() {
                    output.finish()?;
                }
                return Ok(true);
            }
        }
    }

    fn open(&mut self) -> anyhow::Result<()> {
        let mut output = AvOutput::new(&self.location, &self.format)?;
        for (slot, spec) in std::mem::take(&mut self.specs) {
            output.add_stream(slot, spec.parameters, spec.time_base)?;
        }
        output
            .write_header()
            .with_context(|| format!("could not write header of {}", self.location.display()))?;
        for (slot, packet) in self.pending.drain(..) {
            output.write_packet(slot, packet)?;
        }
        self.output = Some(output);
        Ok(())
    }
}

#[cfg(test)]
#[path = "encodebin_test.rs"]
mod encodebin_test;
