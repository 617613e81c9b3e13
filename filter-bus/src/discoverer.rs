//! Media file discovery (similar to ffprobe, plus a decoder probe per stream).

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Context;
use ffmpeg_next::{Rational, codec, format::Pixel, format::Sample};

use crate::caps::Caps;
use crate::frame::{channel_layout_name, pixel_format_name};
use crate::input::AvInput;
use crate::stream::AvStream;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Video,
    Audio,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Video => write!(f, "video"),
            StreamKind::Audio => write!(f, "audio"),
        }
    }
}

/// Raw format a stream decodes to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawFormat {
    Video {
        width: u32,
        height: u32,
        pixel_format: Pixel,
        frame_rate: Rational,
    },
    Audio {
        sample_rate: u32,
        channels: u32,
        sample_format: Sample,
    },
}

impl RawFormat {
    pub fn kind(&self) -> StreamKind {
        match self {
            RawFormat::Video { .. } => StreamKind::Video,
            RawFormat::Audio { .. } => StreamKind::Audio,
        }
    }

    /// Raw caps frames of this format carry once decoded.
    pub fn raw_caps(&self) -> Caps {
        match *self {
            RawFormat::Video {
                width,
                height,
                pixel_format,
                frame_rate,
            } => {
                let caps = Caps::new(crate::caps::RAW_VIDEO)
                    .with("format", pixel_format_name(pixel_format))
                    .with("width", width)
                    .with("height", height);
                match rational_field(frame_rate) {
                    Some(rate) => caps.with("framerate", rate),
                    None => caps,
                }
            }
            RawFormat::Audio {
                sample_rate,
                channels,
                ..
            } => Caps::new(crate::caps::RAW_AUDIO)
                .with("rate", sample_rate)
                .with("channels", channels)
                .with("layout", channel_layout_name(channels)),
        }
    }
}

/// `n/d`, or None for an unknown (zero) rate.
pub fn rational_field(rate: Rational) -> Option<String> {
    if rate.numerator() <= 0 || rate.denominator() <= 0 {
        None
    } else {
        Some(format!("{}/{}", rate.numerator(), rate.denominator()))
    }
}

/// One decodable audio or video stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    pub index: usize,
    pub codec: codec::Id,
    pub codec_name: String,
    /// Compressed caps, e.g. `video/x-mpeg4, width=320, height=240, framerate=25/1`.
    pub caps: Caps,
    pub time_base: Rational,
    pub bit_rate: i64,
    pub format: RawFormat,
}

impl StreamInfo {
    pub fn kind(&self) -> StreamKind {
        self.format.kind()
    }
}

/// A stream that is neither audio nor video, or that no decoder handles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedStream {
    pub index: usize,
    pub medium: String,
    pub codec_name: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct DiscovererInfo {
    pub path: PathBuf,
    /// Comma separated demuxer names, e.g. `matroska,webm`.
    pub format_name: String,
    pub duration_sec: Option<f64>,
    pub bit_rate: i64,
    pub video: Vec<StreamInfo>,
    pub audio: Vec<StreamInfo>,
    pub skipped: Vec<SkippedStream>,
}

impl DiscovererInfo {
    pub fn video_streams(&self) -> &[StreamInfo] {
        &self.video
    }

    pub fn audio_streams(&self) -> &[StreamInfo] {
        &self.audio
    }

    pub fn container_names(&self) -> Vec<String> {
        self.format_name
            .split(',')
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn nb_streams(&self) -> usize {
        self.video.len() + self.audio.len() + self.skipped.len()
    }

    /// Decodable streams ordered by container index.
    pub fn streams(&self) -> Vec<&StreamInfo> {
        let mut streams: Vec<&StreamInfo> = self.video.iter().chain(self.audio.iter()).collect();
        streams.sort_by_key(|s| s.index);
        streams
    }
}

impl fmt::Display for DiscovererInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[FORMAT]")?;
        writeln!(f, "filename={}", self.path.display())?;
        writeln!(f, "format_name={}", self.format_name)?;
        if let Some(d) = self.duration_sec {
            writeln!(f, "duration_sec={:.3}", d)?;
        } else {
            writeln!(f, "duration_sec=N/A")?;
        }
        writeln!(f, "bit_rate={}", self.bit_rate)?;
        writeln!(f, "nb_streams={}", self.nb_streams())?;
        writeln!(f, "[/FORMAT]")?;
        for s in self.streams() {
            writeln!(f, "[STREAM]")?;
            writeln!(f, "index={}", s.index)?;
            writeln!(f, "codec_type={}", s.kind())?;
            writeln!(f, "codec_name={}", s.codec_name)?;
            writeln!(
                f,
                "time_base={}/{}",
                s.time_base.numerator(),
                s.time_base.denominator()
            )?;
            match s.format {
                RawFormat::Video {
                    width,
                    height,
                    pixel_format,
                    frame_rate,
                } => {
                    writeln!(f, "width={}", width)?;
                    writeln!(f, "height={}", height)?;
                    writeln!(f, "pix_fmt={}", pixel_format_name(pixel_format))?;
                    writeln!(
                        f,
                        "rate={}",
                        rational_field(frame_rate).unwrap_or_else(|| "0/0".to_string())
                    )?;
                }
                RawFormat::Audio {
                    sample_rate,
                    channels,
                    sample_format,
                } => {
                    writeln!(f, "sample_rate={}", sample_rate)?;
                    writeln!(f, "channels={}", channels)?;
                    writeln!(f, "sample_fmt={}", sample_format.name())?;
                }
            }
            writeln!(f, "[/STREAM]")?;
        }
        for s in &self.skipped {
            writeln!(f, "[SKIPPED]")?;
            writeln!(f, "index={}", s.index)?;
            writeln!(f, "codec_type={}", s.medium)?;
            writeln!(f, "codec_name={}", s.codec_name)?;
            writeln!(f, "reason={}", s.reason)?;
            writeln!(f, "[/SKIPPED]")?;
        }
        Ok(())
    }
}

/// Opens `path`, probes every stream and opens a decoder for each audio and
/// video stream to resolve its raw format.
///
/// Fails when the file cannot be demuxed or holds no decodable audio or video.
pub fn discover(path: &Path) -> anyhow::Result<DiscovererInfo> {
    crate::init()?;
    let input = AvInput::new(path).context("discovery failed")?;

    let mut video = Vec::new();
    let mut audio = Vec::new();
    let mut skipped = Vec::new();
    for stream in input.streams().values() {
        if !stream.is_video() && !stream.is_audio() {
            skipped.push(SkippedStream {
                index: stream.index(),
                medium: stream.medium_name(),
                codec_name: stream.codec_name(),
                reason: "not an audio or video stream".to_string(),
            });
            continue;
        }
        match probe_stream(stream) {
            Ok(info) if info.kind() == StreamKind::Video => video.push(info),
            Ok(info) => audio.push(info),
            Err(e) => {
                log::warn!("stream {} is not decodable: {:#}", stream.index(), e);
                skipped.push(SkippedStream {
                    index: stream.index(),
                    medium: stream.medium_name(),
                    codec_name: stream.codec_name(),
                    reason: format!("{:#}", e),
                });
            }
        }
    }

    if video.is_empty() && audio.is_empty() {
        anyhow::bail!(
            "{} contains no decodable audio or video stream",
            path.display()
        );
    }

    let info = DiscovererInfo {
        path: path.to_path_buf(),
        format_name: input.format_name(),
        duration_sec: input.duration_sec(),
        bit_rate: input.bit_rate(),
        video,
        audio,
        skipped,
    };
    log::debug!("discovered {}:\n{}", path.display(), info);
    Ok(info)
}

fn probe_stream(stream: &AvStream) -> anyhow::Result<StreamInfo> {
    let context = codec::Context::from_parameters(stream.parameters().clone())?;
    let format = if stream.is_video() {
        let decoder = context.decoder().video()?;
        if decoder.format() == Pixel::None || decoder.width() == 0 || decoder.height() == 0 {
            anyhow::bail!("missing codec parameters");
        }
        RawFormat::Video {
            width: decoder.width(),
            height: decoder.height(),
            pixel_format: decoder.format(),
            frame_rate: stream.rate(),
        }
    } else {
        let decoder = context.decoder().audio()?;
        if stream.sample_rate() == 0 || stream.channels() == 0 {
            anyhow::bail!("missing codec parameters");
        }
        RawFormat::Audio {
            sample_rate: stream.sample_rate(),
            channels: stream.channels(),
            sample_format: decoder.format(),
        }
    };

    let codec_name = stream.codec_name();
    let caps = compressed_caps(&codec_name, &format);
    Ok(StreamInfo {
        index: stream.index(),
        codec: stream.codec_id(),
        codec_name,
        caps,
        time_base: stream.time_base(),
        bit_rate: stream.bit_rate(),
        format,
    })
}

fn compressed_caps(codec_name: &str, format: &RawFormat) -> Caps {
    match *format {
        RawFormat::Video {
            width,
            height,
            frame_rate,
            ..
        } => {
            let caps = Caps::new(&format!("video/x-{}", codec_name))
                .with("width", width)
                .with("height", height);
            match rational_field(frame_rate) {
                Some(rate) => caps.with("framerate", rate),
                None => caps,
            }
        }
        RawFormat::Audio {
            sample_rate,
            channels,
            ..
        } => Caps::new(&format!("audio/x-{}", codec_name))
            .with("rate", sample_rate)
            .with("channels", channels),
    }
}

#[cfg(test)]
#[path = "discoverer_test.rs"]
mod discoverer_test;
