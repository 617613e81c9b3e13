use std::collections::BTreeMap;
use std::path::Path;

use crate::{packet::RawPacket, stream::AvStream};

/// Demuxer over a media file.
pub struct AvInput {
    inner: ffmpeg_next::format::context::Input,
    streams: BTreeMap<usize, AvStream>,
}

unsafe impl Send for AvInput {}

impl AvInput {
    pub fn new(path: &Path) -> anyhow::Result<Self> {
        let input = ffmpeg_next::format::input(path)
            .map_err(|e| anyhow::anyhow!("could not open {}: {}", path.display(), e))?;

        let mut streams = BTreeMap::new();
        for stream in input.streams() {
            streams.insert(stream.index(), AvStream::from(stream));
        }

        Ok(Self {
            inner: input,
            streams,
        })
    }

    /// Streams ordered by index.
    pub fn streams(&self) -> &BTreeMap<usize, AvStream> {
        &self.streams
    }

    /// Comma separated demuxer names, e.g. `mov,mp4,m4a,3gp,3g2,mj2`.
    pub fn format_name(&self) -> String {
        self.inner.format().name().to_string()
    }

    /// Duration in seconds; None if the container does not know it.
    pub fn duration_sec(&self) -> Option<f64> {
        // AV_TIME_BASE = 1_000_000; duration is in 1/AV_TIME_BASE seconds
        let d = self.inner.duration();
        if d == ffmpeg_next::ffi::AV_NOPTS_VALUE as i64 || d <= 0 {
            None
        } else {
            Some(d as f64 / 1_000_000.0)
        }
    }

    pub fn bit_rate(&self) -> i64 {
        self.inner.bit_rate()
    }

    /// Next packet in file order, None at end of file.
    pub fn read_packet(&mut self) -> Option<RawPacket> {
        self.inner
            .packets()
            .next()
            .map(|(stream, packet)| (packet, stream.time_base()).into())
    }
}
