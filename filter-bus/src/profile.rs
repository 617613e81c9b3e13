//! Encoding profiles: what the encodebin produces, derived from a discovered input.

use std::fmt;

use ffmpeg_next::{Rational, codec};

use crate::caps::Caps;
use crate::discoverer::{DiscovererInfo, RawFormat, StreamInfo, StreamKind};

/// Target of one encoded stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamProfile {
    /// Index of the input stream the profile was derived from.
    pub source_index: usize,
    pub codec: codec::Id,
    pub codec_name: String,
    /// Compressed caps of the produced stream.
    pub caps: Caps,
    pub format: RawFormat,
    /// 0 lets the encoder pick.
    pub bit_rate: i64,
    pub time_base: Rational,
}

impl StreamProfile {
    pub fn kind(&self) -> StreamKind {
        self.format.kind()
    }

    /// Raw caps the encoder for this stream accepts.
    pub fn input_caps(&self) -> Caps {
        self.format.raw_caps()
    }
}

impl From<&StreamInfo> for StreamProfile {
    fn from(info: &StreamInfo) -> Self {
        Self {
            source_index: info.index,
            codec: info.codec,
            codec_name: info.codec_name.clone(),
            caps: info.caps.clone(),
            format: info.format,
            bit_rate: info.bit_rate,
            time_base: info.time_base,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerProfile {
    /// FFmpeg format names in preference order, e.g. `["matroska", "webm"]`.
    pub names: Vec<String>,
}

impl ContainerProfile {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EncodingProfile {
    container: ContainerProfile,
    streams: Vec<StreamProfile>,
}

impl EncodingProfile {
    pub fn new(container: ContainerProfile, streams: Vec<StreamProfile>) -> Self {
        Self { container, streams }
    }

    /// Same container, one stream profile per decodable stream, same codecs.
    pub fn from_discoverer(info: &DiscovererInfo) -> anyhow::Result<Self> {
        let names = info.container_names();
        if names.is_empty() {
            anyhow::bail!("{} has no container format", info.path.display());
        }
        let streams: Vec<StreamProfile> = info
            .streams()
            .into_iter()
            .map(StreamProfile::from)
            .collect();
        if streams.is_empty() {
            anyhow::bail!("{} has no audio or video stream", info.path.display());
        }
        Ok(Self::new(ContainerProfile::new(names), streams))
    }

    pub fn container(&self) -> &ContainerProfile {
        &self.container
    }

    pub fn streams(&self) -> &[StreamProfile] {
        &self.streams
    }

    /// Raw caps accepted per stream, in stream order.
    pub fn input_caps(&self) -> Vec<Caps> {
        self.streams.iter().map(StreamProfile::input_caps).collect()
    }
}

impl fmt::Display for EncodingProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "container={}", self.container.names.join(","))?;
        for stream in &self.streams {
            write!(f, "; {}", stream.caps)?;
        }
        Ok(())
    }
}
