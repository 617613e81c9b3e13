use ffmpeg_next::Rational;

use crate::{
    frame::{RawAudioFrame, RawFrame, RawVideoFrame},
    packet::RawPacket,
    stream::AvStream,
};

enum DecoderType {
    Video(ffmpeg_next::codec::decoder::Video),
    Audio(ffmpeg_next::codec::decoder::Audio),
}

impl DecoderType {
    pub fn send_packet(
        &mut self,
        mut packet: RawPacket,
        decoder_time_base: Rational,
    ) -> anyhow::Result<()> {
        let time_base = packet.time_base();
        let packet = packet.get_mut();
        packet.rescale_ts(time_base, decoder_time_base);
        match self {
            DecoderType::Video(video_decoder) => {
                video_decoder.send_packet(packet)?;
            }
            DecoderType::Audio(audio_decoder) => {
                audio_decoder.send_packet(packet)?;
            }
        }

        Ok(())
    }

    pub fn send_eof(&mut self) -> anyhow::Result<()> {
        match self {
            DecoderType::Video(video_decoder) => {
                video_decoder.send_eof()?;
            }
            DecoderType::Audio(audio_decoder) => {
                audio_decoder.send_eof()?;
            }
        }
        Ok(())
    }

    pub fn receive_frame(&mut self, time_base: Rational) -> anyhow::Result<Option<RawFrame>> {
        match self {
            DecoderType::Video(video_decoder) => {
                let mut frame = ffmpeg_next::frame::Video::empty();
                match video_decoder.receive_frame(&mut frame) {
                    Ok(()) => {
                        let timestamp = frame.timestamp();
                        frame.set_pts(timestamp);
                        Ok(Some(RawFrame::Video(RawVideoFrame::from((frame, time_base)))))
                    }
                    Err(ffmpeg_next::Error::Eof) => Ok(None),
                    Err(ffmpeg_next::Error::Other { errno })
                        if errno == ffmpeg_next::util::error::EAGAIN =>
                    {
                        Ok(None)
                    }
                    Err(err) => Err(err.into()),
                }
            }
            DecoderType::Audio(audio_decoder) => {
                let mut frame = ffmpeg_next::frame::Audio::empty();
                match audio_decoder.receive_frame(&mut frame) {
                    Ok(()) => {
                        let timestamp = frame.timestamp();
                        frame.set_pts(timestamp);
                        Ok(Some(RawFrame::Audio(RawAudioFrame::from((frame, time_base)))))
                    }
                    Err(ffmpeg_next::Error::Eof) => Ok(None),
                    Err(ffmpeg_next::Error::Other { errno })
                        if errno == ffmpeg_next::util::error::EAGAIN =>
                    {
                        Ok(None)
                    }
                    Err(err) => Err(err.into()),
                }
            }
        }
    }
}

/// Decoder for one audio or video stream. Frames come out with their best
/// effort timestamp in the stream time base.
pub struct Decoder {
    stream: AvStream,
    inner: DecoderType,
    decoder_time_base: Rational,
}

unsafe impl Send for Decoder {}

impl Decoder {
    pub fn new(stream: &AvStream) -> anyhow::Result<Self> {
        let mut decoder_ctx = ffmpeg_next::codec::Context::new();
        unsafe {
            (*decoder_ctx.as_mut_ptr()).time_base = stream.time_base().into();
        }
        decoder_ctx.set_parameters(stream.parameters().clone())?;

        let s = if stream.is_video() {
            let video_decoder = decoder_ctx.decoder().video()?;

            if video_decoder.format() == ffmpeg_next::format::Pixel::None
                || video_decoder.width() == 0
                || video_decoder.height() == 0
            {
                return Err(anyhow::anyhow!("missing codec parameters"));
            }

            Self {
                stream: stream.clone(),
                inner: DecoderType::Video(video_decoder),
                decoder_time_base: stream.time_base(),
            }
        } else if stream.is_audio() {
            let audio_decoder = decoder_ctx.decoder().audio()?;
            Self {
                stream: stream.clone(),
                inner: DecoderType::Audio(audio_decoder),
                decoder_time_base: stream.time_base(),
            }
        } else {
            return Err(anyhow::anyhow!(
                "unsupported stream type {}",
                stream.medium_name()
            ));
        };

        Ok(s)
    }

    pub fn send_packet(&mut self, packet: RawPacket) -> anyhow::Result<()> {
        self.inner.send_packet(packet, self.decoder_time_base)
    }

    pub fn send_eof(&mut self) -> anyhow::Result<()> {
        self.inner.send_eof()
    }

    pub fn receive_frame(&mut self) -> anyhow::Result<Option<RawFrame>> {
        self.inner.receive_frame(self.decoder_time_base)
    }

    pub fn stream(&self) -> &AvStream {
        &self.stream
    }

    pub fn stream_index(&self) -> usize {
        self.stream.index()
    }
}
