use ffmpeg_next::{
    Rational, Rescale,
    codec::Parameters,
    filter,
    format::{Pixel, Sample},
    picture,
};

use crate::{
    discoverer::RawFormat,
    frame::{RawAudioFrame, RawFrame, RawVideoFrame, channel_layout_name},
    packet::RawPacket,
    profile::StreamProfile,
    scaler::Scaler,
};

pub enum EncoderType {
    Video(ffmpeg_next::codec::encoder::Video),
    Audio(ffmpeg_next::codec::encoder::Audio),
}

impl EncoderType {
    fn send_frame(&mut self, frame: &ffmpeg_next::Frame) -> anyhow::Result<()> {
        match self {
            EncoderType::Video(encoder) => encoder.send_frame(frame)?,
            EncoderType::Audio(encoder) => encoder.send_frame(frame)?,
        }
        Ok(())
    }

    pub fn send_eof(&mut self) -> anyhow::Result<()> {
        match self {
            EncoderType::Video(encoder) => encoder.send_eof()?,
            EncoderType::Audio(encoder) => encoder.send_eof()?,
        }
        Ok(())
    }

    pub fn encoder_receive_packet(
        &mut self,
        time_base: Rational,
    ) -> anyhow::Result<Option<RawPacket>> {
        let mut packet = ffmpeg_next::codec::packet::Packet::empty();
        let encode_result = match self {
            EncoderType::Video(encoder) => encoder.receive_packet(&mut packet),
            EncoderType::Audio(encoder) => encoder.receive_packet(&mut packet),
        };

        match encode_result {
            Ok(()) => Ok(Some(RawPacket::from((packet, time_base)))),
            Err(ffmpeg_next::Error::Other { errno })
                if errno == ffmpeg_next::util::error::EAGAIN =>
            {
                Ok(None)
            }
            Err(ffmpeg_next::Error::Eof) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

/// Pixel formats the codec accepts; empty when it does not say.
fn supported_pixel_formats(codec: &ffmpeg_next::Codec) -> Vec<Pixel> {
    let mut formats = Vec::new();
    unsafe {
        let mut p = (*codec.as_ptr()).pix_fmts;
        if p.is_null() {
            return formats;
        }
        while *p != ffmpeg_next::ffi::AVPixelFormat::AV_PIX_FMT_NONE {
            formats.push(Pixel::from(*p));
            p = p.add(1);
        }
    }
    formats
}

fn supported_sample_formats(codec: &ffmpeg_next::Codec) -> Vec<Sample> {
    let mut formats = Vec::new();
    unsafe {
        let mut p = (*codec.as_ptr()).sample_fmts;
        if p.is_null() {
            return formats;
        }
        while *p != ffmpeg_next::ffi::AVSampleFormat::AV_SAMPLE_FMT_NONE {
            formats.push(Sample::from(*p));
            p = p.add(1);
        }
    }
    formats
}

/// The preferred format when the codec takes it, else the codec's first one.
fn pick_format<T: PartialEq + Copy>(preferred: T, supported: &[T]) -> T {
    if supported.is_empty() || supported.contains(&preferred) {
        preferred
    } else {
        supported[0]
    }
}

/// `abuffer ! aformat ! abuffersink`, converting decoded audio to what the
/// encoder takes and cutting it into `frame_size` chunks.
struct AudioConverter {
    graph: filter::Graph,
    input_rate: u32,
    next_pts: i64,
}

unsafe impl Send for AudioConverter {}

impl AudioConverter {
    fn new(
        frame: &RawAudioFrame,
        rate: u32,
        format: Sample,
        channels: u32,
        frame_size: u32,
    ) -> anyhow::Result<Self> {
        let mut graph = filter::Graph::new();
        let abuffer = filter::find("abuffer").ok_or(anyhow::anyhow!("abuffer filter not found"))?;
        let abuffersink =
            filter::find("abuffersink").ok_or(anyhow::anyhow!("abuffersink filter not found"))?;

        let args = format!(
            "time_base=1/{}:sample_rate={}:sample_fmt={}:channel_layout={}",
            frame.rate(),
            frame.rate(),
            frame.format().name(),
            channel_layout_name(frame.channels())
        );
        graph.add(&abuffer, "in", &args)?;
        graph.add(&abuffersink, "out", "")?;

        let spec = format!(
            "aformat=sample_fmts={}:sample_rates={}:channel_layouts={}",
            format.name(),
            rate,
            channel_layout_name(channels)
        );
        graph.output("in", 0)?.input("out", 0)?.parse(&spec)?;
        graph.validate()?;

        if frame_size > 0 {
            if let Some(mut out) = graph.get("out") {
                out.sink().set_frame_size(frame_size);
            }
        }

        Ok(Self {
            graph,
            input_rate: frame.rate(),
            next_pts: 0,
        })
    }

    fn push(&mut self, frame: &mut RawAudioFrame) -> anyhow::Result<()> {
        let time_base = frame.time_base();
        let samples = frame.samples() as i64;
        let pts = match frame.pts() {
            Some(pts) => pts.rescale(time_base, Rational::new(1, self.input_rate as i32)),
            None => self.next_pts,
        };
        self.next_pts = pts + samples;

        let f = frame.get_mut();
        f.set_pts(Some(pts));
        let mut input = self
            .graph
            .get("in")
            .ok_or(anyhow::anyhow!("audio converter has no input"))?;
        input.source().add(f)?;
        Ok(())
    }

    fn flush(&mut self) -> anyhow::Result<()> {
        let mut input = self
            .graph
            .get("in")
            .ok_or(anyhow::anyhow!("audio converter has no input"))?;
        input.source().flush()?;
        Ok(())
    }

    /// Next converted frame and the time base of its pts.
    fn pull(&mut self) -> anyhow::Result<Option<(ffmpeg_next::frame::Audio, Rational)>> {
        let mut out_ctx = self
            .graph
            .get("out")
            .ok_or(anyhow::anyhow!("audio converter has no output"))?;
        let time_base: Rational =
            unsafe { ffmpeg_next::ffi::av_buffersink_get_time_base(out_ctx.as_ptr()).into() };
        let mut out = ffmpeg_next::frame::Audio::empty();
        match out_ctx.sink().frame(&mut out) {
            Ok(()) => Ok(Some((out, time_base))),
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

/// Encoder for one profile stream. Video frames are scaled to the encoder's
/// geometry and pixel format; audio goes through an [`AudioConverter`].
pub struct Encoder {
    profile: StreamProfile,
    inner: EncoderType,
    encoder_time_base: Rational,
    scaler: Option<(Scaler, Pixel, u32, u32)>,
    converter: Option<AudioConverter>,
    last_pts: Option<i64>,
}

unsafe impl Send for Encoder {}

impl Encoder {
    pub fn new(profile: &StreamProfile, global_header: bool) -> anyhow::Result<Self> {
        let codec = ffmpeg_next::encoder::find(profile.codec)
            .ok_or(anyhow::anyhow!("no encoder for codec {}", profile.codec_name))?;
        let context = ffmpeg_next::codec::Context::new_with_codec(codec);

        let (inner, encoder_time_base) = match profile.format {
            RawFormat::Video {
                width,
                height,
                pixel_format,
                frame_rate,
            } => {
                let mut encoder = context.encoder().video()?;
                encoder.set_width(width);
                encoder.set_height(height);
                encoder.set_format(pick_format(pixel_format, &supported_pixel_formats(&codec)));
                let time_base = if frame_rate.numerator() > 0 && frame_rate.denominator() > 0 {
                    encoder.set_frame_rate(Some(frame_rate));
                    frame_rate.invert()
                } else {
                    profile.time_base
                };
                encoder.set_time_base(time_base);
                if profile.bit_rate > 0 {
                    encoder.set_bit_rate(profile.bit_rate as usize);
                }
                if global_header {
                    encoder.set_flags(ffmpeg_next::codec::Flags::GLOBAL_HEADER);
                }
                let encoder = encoder.open_as(codec)?;
                (EncoderType::Video(encoder), time_base)
            }
            RawFormat::Audio {
                sample_rate,
                channels,
                sample_format,
            } => {
                let mut encoder = context.encoder().audio()?;
                encoder.set_rate(sample_rate as i32);
                encoder.set_format(pick_format(sample_format, &supported_sample_formats(&codec)));
                // ffmpeg-next has no setter for AVCodecContext.ch_layout
                unsafe {
                    ffmpeg_next::ffi::av_channel_layout_default(
                        &mut (*encoder.as_mut_ptr()).ch_layout,
                        channels as i32,
                    );
                }
                let time_base = Rational::new(1, sample_rate as i32);
                encoder.set_time_base(time_base);
                if profile.bit_rate > 0 {
                    encoder.set_bit_rate(profile.bit_rate as usize);
                }
                if global_header {
                    encoder.set_flags(ffmpeg_next::codec::Flags::GLOBAL_HEADER);
                }
                let encoder = encoder.open_as(codec)?;
                (EncoderType::Audio(encoder), time_base)
            }
        };

        log::info!(
            "encoder opened: {} ({}), time base {}/{}",
            codec.name(),
            profile.kind(),
            encoder_time_base.numerator(),
            encoder_time_base.denominator()
        );

        Ok(Self {
            profile: profile.clone(),
            inner,
            encoder_time_base,
            scaler: None,
            converter: None,
            last_pts: None,
        })
    }

    pub fn profile(&self) -> &StreamProfile {
        &self.profile
    }

    /// Codec parameters for the muxer stream.
    pub fn parameters(&self) -> Parameters {
        match &self.inner {
            EncoderType::Video(encoder) => Parameters::from(encoder),
            EncoderType::Audio(encoder) => Parameters::from(encoder),
        }
    }

    pub fn time_base(&self) -> Rational {
        self.encoder_time_base
    }

    /// Keeps pts strictly increasing in the encoder time base.
    fn next_pts(&mut self, pts: Option<i64>) -> i64 {
        let pts = match (pts, self.last_pts) {
            (Some(pts), Some(last)) if pts <= last => last + 1,
            (Some(pts), _) => pts,
            (None, Some(last)) => last + 1,
            (None, None) => 0,
        };
        self.last_pts = Some(pts);
        pts
    }

    pub fn send_frame(&mut self, frame: RawFrame) -> anyhow::Result<()> {
        match frame {
            RawFrame::Video(frame) => self.send_video(frame),
            RawFrame::Audio(frame) => self.send_audio(frame),
        }
    }

    fn send_video(&mut self, mut frame: RawVideoFrame) -> anyhow::Result<()> {
        let EncoderType::Video(encoder) = &self.inner else {
            anyhow::bail!("video frame sent to a {} encoder", self.profile.kind());
        };
        let (format, width, height) = (encoder.format(), encoder.width(), encoder.height());

        let pts = frame
            .pts()
            .map(|pts| pts.rescale(frame.time_base(), self.encoder_time_base));
        let pts = self.next_pts(pts);

        let f = frame.get_mut();
        let mut converted = if f.format() != format || f.width() != width || f.height() != height
        {
            let key = (f.format(), f.width(), f.height());
            let stale = self
                .scaler
                .as_ref()
                .is_none_or(|(_, p, w, h)| (*p, *w, *h) != key);
            if stale {
                let scaler = Scaler::for_frame(f, format, width, height)?;
                self.scaler = Some((scaler, key.0, key.1, key.2));
            }
            let mut converted = ffmpeg_next::frame::Video::empty();
            if let Some((scaler, ..)) = self.scaler.as_mut() {
                scaler.run(f, &mut converted)?;
            }
            converted
        } else {
            f.clone()
        };
        converted.set_pts(Some(pts));
        converted.set_kind(picture::Type::None);
        self.inner.send_frame(&converted)
    }

    fn send_audio(&mut self, mut frame: RawAudioFrame) -> anyhow::Result<()> {
        let EncoderType::Audio(encoder) = &self.inner else {
            anyhow::bail!("audio frame sent to a {} encoder", self.profile.kind());
        };
        if self.converter.is_none() {
            let channels = unsafe { (*encoder.as_ptr()).ch_layout.nb_channels.max(0) as u32 };
            self.converter = Some(AudioConverter::new(
                &frame,
                encoder.rate(),
                encoder.format(),
                channels,
                encoder.frame_size(),
            )?);
        }
        if let Some(converter) = self.converter.as_mut() {
            converter.push(&mut frame)?;
        }
        self.drain_converter()
    }

    fn drain_converter(&mut self) -> anyhow::Result<()> {
        loop {
            let Some(converter) = self.converter.as_mut() else {
                return Ok(());
            };
            let Some((mut out, time_base)) = converter.pull()? else {
                return Ok(());
            };
            let pts = out
                .pts()
                .map(|pts| pts.rescale(time_base, self.encoder_time_base));
            let pts = self.next_pts(pts);
            out.set_pts(Some(pts));
            self.inner.send_frame(&out)?;
        }
    }

    /// Flushes the audio converter, then the encoder.
    pub fn send_eof(&mut self) -> anyhow::Result<()> {
        if let Some(converter) = self.converter.as_mut() {
            converter.flush()?;
            self.drain_converter()?;
        }
        self.inner.send_eof()
    }

    pub fn receive_packet(&mut self) -> anyhow::Result<Option<RawPacket>> {
        self.inner.encoder_receive_packet(self.encoder_time_base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pick_format() {
        let supported = [Pixel::YUV420P, Pixel::NV12];
        assert_eq!(pick_format(Pixel::NV12, &supported), Pixel::NV12);
        assert_eq!(pick_format(Pixel::RGB24, &supported), Pixel::YUV420P);
        assert_eq!(pick_format(Pixel::RGB24, &[]), Pixel::RGB24);
    }
}
