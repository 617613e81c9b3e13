use ffmpeg_next::Rational;

use crate::caps::{Caps, RAW_AUDIO, RAW_VIDEO};

#[derive(Clone)]
pub enum RawFrameCmd {
    Data(RawFrame),
    EOF,
}

#[derive(Clone)]
pub enum RawFrame {
    Video(RawVideoFrame),
    Audio(RawAudioFrame),
}

impl RawFrame {
    pub fn caps(&self) -> Caps {
        match self {
            RawFrame::Video(frame) => frame.caps(),
            RawFrame::Audio(frame) => frame.caps(),
        }
    }

    pub fn time_base(&self) -> Rational {
        match self {
            RawFrame::Video(frame) => frame.time_base(),
            RawFrame::Audio(frame) => frame.time_base(),
        }
    }
}

/// Decoded audio samples; `pts` is expressed in `time_base`.
#[derive(Clone)]
pub struct RawAudioFrame {
    frame: ffmpeg_next::frame::Audio,
    time_base: Rational,
}

impl RawAudioFrame {
    pub fn pts(&self) -> Option<i64> {
        self.frame.pts()
    }

    pub fn format(&self) -> ffmpeg_next::format::Sample {
        self.frame.format()
    }

    pub fn rate(&self) -> u32 {
        self.frame.rate()
    }

    pub fn samples(&self) -> usize {
        self.frame.samples()
    }

    pub fn channels(&self) -> u32 {
        // ffmpeg-next does not expose AVFrame.ch_layout
        unsafe { (*self.frame.as_ptr()).ch_layout.nb_channels.max(0) as u32 }
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    pub fn get_mut(&mut self) -> &mut ffmpeg_next::frame::Audio {
        &mut self.frame
    }

    pub fn as_audio(&self) -> &ffmpeg_next::frame::Audio {
        &self.frame
    }

    pub fn caps(&self) -> Caps {
        Caps::new(RAW_AUDIO)
            .with("format", self.format().name())
            .with("rate", self.rate())
            .with("channels", self.channels())
            .with("layout", channel_layout_name(self.channels()))
    }
}

impl From<(ffmpeg_next::frame::Audio, Rational)> for RawAudioFrame {
    fn from((frame, time_base): (ffmpeg_next::frame::Audio, Rational)) -> Self {
        Self { frame, time_base }
    }
}

/// Decoded picture; `pts` is expressed in `time_base`.
#[derive(Clone)]
pub struct RawVideoFrame {
    frame: ffmpeg_next::frame::Video,
    time_base: Rational,
}

impl RawVideoFrame {
    pub fn width(&self) -> u32 {
        self.frame.width()
    }

    pub fn height(&self) -> u32 {
        self.frame.height()
    }

    pub fn format(&self) -> ffmpeg_next::format::Pixel {
        self.frame.format()
    }

    pub fn pts(&self) -> Option<i64> {
        self.frame.pts()
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    pub fn get_mut(&mut self) -> &mut ffmpeg_next::frame::Video {
        &mut self.frame
    }

    pub fn as_video(&self) -> &ffmpeg_next::frame::Video {
        &self.frame
    }

    pub fn is_key(&self) -> bool {
        self.frame.is_key()
    }

    pub fn pts_ms(&self) -> Option<u64> {
        self.frame.pts().map(|pts| {
            let pts_u = pts.max(0) as u64;
            let num = self.time_base.numerator() as u64;
            let den = self.time_base.denominator().max(1) as u64;
            pts_u * num * 1000 / den
        })
    }

    pub fn caps(&self) -> Caps {
        Caps::new(RAW_VIDEO)
            .with("format", pixel_format_name(self.format()))
            .with("width", self.width())
            .with("height", self.height())
    }
}

impl From<(ffmpeg_next::frame::Video, Rational)> for RawVideoFrame {
    fn from((frame, time_base): (ffmpeg_next::frame::Video, Rational)) -> Self {
        Self { frame, time_base }
    }
}

/// Lowercase FFmpeg name of a pixel format, e.g. `yuv420p`.
pub fn pixel_format_name(format: ffmpeg_next::format::Pixel) -> String {
    format!("{:?}", format).to_lowercase()
}

/// Channel layout string understood by FFmpeg's audio filters.
pub fn channel_layout_name(channels: u32) -> String {
    match channels {
        1 => "mono".to_string(),
        2 => "stereo".to_string(),
        n => format!("{}c", n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ffmpeg_next::format::Pixel;

    #[test]
    fn test_video_frame_caps() {
        let frame = ffmpeg_next::frame::Video::new(Pixel::YUV420P, 64, 48);
        let raw = RawVideoFrame::from((frame, Rational::new(1, 25)));
        assert_eq!(
            raw.caps().to_string(),
            "video/x-raw, format=yuv420p, width=64, height=48"
        );
        assert!(RawFrame::Video(raw).caps().is_raw_video());
    }

    #[test]
    fn test_pts_ms() {
        let mut frame = ffmpeg_next::frame::Video::new(Pixel::YUV420P, 16, 16);
        frame.set_pts(Some(50));
        let raw = RawVideoFrame::from((frame, Rational::new(1, 25)));
        assert_eq!(raw.pts_ms(), Some(2000));
    }

    #[test]
    fn test_channel_layout_name() {
        assert_eq!(channel_layout_name(1), "mono");
        assert_eq!(channel_layout_name(2), "stereo");
        assert_eq!(channel_layout_name(6), "6c");
    }
}
