//! `videoconvert` and `timeoverlay`: raw video in, raw video out, each stage
//! running its own FFmpeg filtergraph on the thread that pushes into it.

use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use ffmpeg_next::{Rational, filter};

use crate::caps::{Caps, RAW_VIDEO};
use crate::frame::{RawFrame, RawFrameCmd, RawVideoFrame};
use crate::pad::{FlowError, Pad};
use crate::parse::{ElementDesc, ElementKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HAlign {
    #[default]
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VAlign {
    #[default]
    Top,
    Center,
    Bottom,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlaySettings {
    pub halign: HAlign,
    pub valign: VAlign,
    pub font_file: Option<String>,
    pub font_size: u32,
}

impl Default for OverlaySettings {
    fn default() -> Self {
        Self {
            halign: HAlign::Left,
            valign: VAlign::Top,
            font_file: None,
            font_size: 18,
        }
    }
}

impl OverlaySettings {
    pub fn from_desc(desc: &ElementDesc) -> anyhow::Result<Self> {
        let mut settings = Self::default();
        if let Some(h) = desc.property("halignment") {
            settings.halign = match h {
                "left" => HAlign::Left,
                "center" => HAlign::Center,
                "right" => HAlign::Right,
                other => anyhow::bail!("invalid halignment {:?}", other),
            };
        }
        if let Some(v) = desc.property("valignment") {
            settings.valign = match v {
                "top" => VAlign::Top,
                "center" => VAlign::Center,
                "bottom" => VAlign::Bottom,
                other => anyhow::bail!("invalid valignment {:?}", other),
            };
        }
        if let Some(size) = desc.property("font-size") {
            settings.font_size = size.parse()?;
        }
        settings.font_file = desc.property("font-file").map(str::to_string);
        Ok(settings)
    }

    /// drawtext options printing the frame pts as `HH:MM:SS.mmm`.
    pub fn drawtext(&self) -> String {
        let x = match self.halign {
            HAlign::Left => "8",
            HAlign::Center => "(w-text_w)/2",
            HAlign::Right => "w-text_w-8",
        };
        let y = match self.valign {
            VAlign::Top => "8",
            VAlign::Center => "(h-text_h)/2",
            VAlign::Bottom => "h-text_h-8",
        };
        let mut spec = format!(
            "drawtext=text='%{{pts\\:hms}}':x={}:y={}:fontsize={}:fontcolor=white:box=1:boxcolor=black@0.5",
            x, y, self.font_size
        );
        if let Some(font) = &self.font_file {
            spec.push_str(&format!(":fontfile='{}'", font.replace('\'', "")));
        }
        spec
    }
}

/// Whether the linked FFmpeg can draw the timestamp overlay (drawtext with a
/// usable default font).
pub fn overlay_available() -> bool {
    if filter::find("drawtext").is_none() {
        return false;
    }
    let frame = ffmpeg_next::frame::Video::new(ffmpeg_next::format::Pixel::YUV420P, 16, 16);
    let frame = RawVideoFrame::from((frame, Rational::new(1, 25)));
    FilterGraph::new(&frame, &OverlaySettings::default().drawtext())
        .inspect_err(|e| log::debug!("timestamp overlay unavailable: {:#}", e))
        .is_ok()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterKind {
    Convert,
    TimeOverlay(OverlaySettings),
}

impl FilterKind {
    pub fn from_desc(desc: &ElementDesc) -> anyhow::Result<Self> {
        match desc.kind {
            ElementKind::VideoConvert => Ok(FilterKind::Convert),
            ElementKind::TimeOverlay => Ok(FilterKind::TimeOverlay(OverlaySettings::from_desc(desc)?)),
            other => anyhow::bail!("{} is not a video filter", other),
        }
    }
}

struct FilterGraph {
    graph: filter::Graph,
    input: Caps,
    time_base: Rational,
}

unsafe impl Send for FilterGraph {}

impl FilterGraph {
    fn new(frame: &RawVideoFrame, spec: &str) -> anyhow::Result<Self> {
        let mut graph = filter::Graph::new();
        let buffer = filter::find("buffer").ok_or(anyhow::anyhow!("buffer filter not found"))?;
        let buffersink =
            filter::find("buffersink").ok_or(anyhow::anyhow!("buffersink filter not found"))?;

        let time_base = frame.time_base();
        let args = format!(
            "video_size={}x{}:pix_fmt={}:time_base={}/{}:pixel_aspect=1/1",
            frame.width(),
            frame.height(),
            ffmpeg_next::ffi::AVPixelFormat::from(frame.format()) as i32,
            time_base.numerator(),
            time_base.denominator().max(1)
        );
        graph.add(&buffer, "in", &args)?;
        graph.add(&buffersink, "out", "")?;
        graph.output("in", 0)?.input("out", 0)?.parse(spec)?;
        graph.validate()?;

        Ok(Self {
            graph,
            input: frame.caps(),
            time_base,
        })
    }

    fn add(&mut self, frame: &RawVideoFrame) -> anyhow::Result<()> {
        let mut input = self
            .graph
            .get("in")
            .ok_or(anyhow::anyhow!("filter graph has no input"))?;
        input.source().add(frame.as_video())?;
        Ok(())
    }

    fn flush(&mut self) -> anyhow::Result<()> {
        let mut input = self
            .graph
            .get("in")
            .ok_or(anyhow::anyhow!("filter graph has no input"))?;
        input.source().flush()?;
        Ok(())
    }

    fn pull(&mut self) -> anyhow::Result<Option<RawVideoFrame>> {
        let mut out_ctx = self
            .graph
            .get("out")
            .ok_or(anyhow::anyhow!("filter graph has no output"))?;
        let mut out = ffmpeg_next::frame::Video::empty();
        match out_ctx.sink().frame(&mut out) {
            Ok(()) => Ok(Some(RawVideoFrame::from((out, self.time_base)))),
            Err(ffmpeg_next::Error::Eof) => Ok(None),
            Err(ffmpeg_next::Error::Other { errno })
                if errno == ffmpeg_next::util::error::EAGAIN =>
            {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// A raw video filter element with one always sink pad and one always src pad.
pub struct VideoFilter {
    name: String,
    kind: FilterKind,
    sink: Pad,
    src: Pad,
    graph: Mutex<Option<FilterGraph>>,
}

impl VideoFilter {
    pub fn new(name: &str, kind: FilterKind) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<VideoFilter>| {
            let weak = weak.clone();
            let sink = Pad::new_sink("sink", name, Caps::new(RAW_VIDEO), move |pad, cmd| {
                match weak.upgrade() {
                    Some(filter) => filter.chain(cmd),
                    None => Err(FlowError::Flushing(pad.to_string())),
                }
            });
            Self {
                name: name.to_string(),
                kind,
                sink,
                src: Pad::new_src("src", name, Caps::new(RAW_VIDEO)),
                graph: Mutex::new(None),
            }
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &FilterKind {
        &self.kind
    }

    pub fn sink_pad(&self) -> &Pad {
        &self.sink
    }

    pub fn src_pad(&self) -> &Pad {
        &self.src
    }

    /// Filtergraph description for the current links. A converter feeding a
    /// peer that fixes the pixel format converts to it; otherwise it passes
    /// frames through.
    pub fn filter_spec(&self) -> String {
        match &self.kind {
            FilterKind::TimeOverlay(settings) => settings.drawtext(),
            FilterKind::Convert => match self
                .src
                .peer()
                .and_then(|peer| peer.caps().get("format").map(str::to_string))
            {
                Some(format) => format!("format=pix_fmts={}", format),
                None => "null".to_string(),
            },
        }
    }

    fn chain(&self, cmd: RawFrameCmd) -> Result<(), FlowError> {
        let mut graph = self.graph.lock().unwrap_or_else(|e| e.into_inner());
        match cmd {
            RawFrameCmd::Data(RawFrame::Video(frame)) => {
                let caps = frame.caps();
                if graph.as_ref().is_none_or(|g| g.input != caps) {
                    if let Some(old) = graph.as_mut() {
                        // geometry changed mid-stream: drain what the old graph holds
                        old.flush()?;
                        self.drain(old)?;
                    }
                    let spec = self.filter_spec();
                    log::debug!("{}: building filter graph {:?} for {}", self.name, spec, caps);
                    *graph = Some(FilterGraph::new(&frame, &spec)?);
                }
                if let Some(g) = graph.as_mut() {
                    g.add(&frame)?;
                    self.drain(g)?;
                }
                Ok(())
            }
            RawFrameCmd::Data(frame) => Err(FlowError::NotNegotiated {
                pad: self.sink.to_string(),
                caps: frame.caps(),
            }),
            RawFrameCmd::EOF => {
                if let Some(g) = graph.as_mut() {
                    g.flush()?;
                    self.drain(g)?;
                }
                *graph = None;
                self.src.push(RawFrameCmd::EOF)
            }
        }
    }

    fn drain(&self, graph: &mut FilterGraph) -> Result<(), FlowError> {
        while let Some(frame) = graph.pull()? {
            let mut caps = frame.caps();
            if let Some(rate) = self.sink.peer().and_then(|p| p.current_caps()).and_then(|c| {
                c.get("framerate").map(str::to_string)
            }) {
                caps.set("framerate", rate);
            }
            if self.src.current_caps().as_ref() != Some(&caps) {
                self.src.set_caps(caps);
            }
            self.src.push(RawFrameCmd::Data(RawFrame::Video(frame)))?;
        }
        Ok(())
    }
}

impl fmt::Debug for VideoFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoFilter")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

#[cfg(test)]
#[path = "video_filter_test.rs"]
mod video_filter_test;
