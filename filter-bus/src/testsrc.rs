//! Synthetic media files: a moving gradient and/or a sine tone, encoded and
//! muxed by FFmpeg. Used to give tests real input without fixtures.

use std::path::Path;

use anyhow::Context;
use ffmpeg_next::{
    ChannelLayout, Rational,
    format::{Pixel, Sample, sample},
};

use crate::{
    caps::Caps,
    discoverer::RawFormat,
    encoder::Encoder,
    frame::{RawAudioFrame, RawFrame, RawVideoFrame},
    output::{AvOutput, OutputFormat},
    profile::StreamProfile,
};

const AUDIO_FRAME_SAMPLES: usize = 1152;

#[derive(Debug, Clone)]
struct VideoSource {
    codec: String,
    width: u32,
    height: u32,
    fps: i32,
}

#[derive(Debug, Clone)]
struct AudioSource {
    codec: String,
    sample_rate: u32,
    channels: u32,
}

/// Builder for a short test clip.
///
/// ```ignore
/// TestMedia::new()
///     .video("mpeg4", 64, 48, 25)
///     .audio("mp2", 44100, 1)
///     .write(Path::new("clip.mkv"))?;
/// ```
#[derive(Debug, Clone)]
pub struct TestMedia {
    video: Option<VideoSource>,
    audio: Option<AudioSource>,
    duration_sec: f64,
}

impl Default for TestMedia {
    fn default() -> Self {
        Self::new()
    }
}

impl TestMedia {
    pub fn new() -> Self {
        Self {
            video: None,
            audio: None,
            duration_sec: 1.0,
        }
    }

    pub fn video(mut self, codec: &str, width: u32, height: u32, fps: i32) -> Self {
        self.video = Some(VideoSource {
            codec: codec.to_string(),
            width,
            height,
            fps,
        });
        self
    }

    pub fn audio(mut self, codec: &str, sample_rate: u32, channels: u32) -> Self {
        self.audio = Some(AudioSource {
            codec: codec.to_string(),
            sample_rate,
            channels,
        });
        self
    }

    pub fn duration(mut self, seconds: f64) -> Self {
        self.duration_sec = seconds;
        self
    }

    /// Encodes the clip into `path`; the container follows the extension.
    pub fn write(&self, path: &Path) -> anyhow::Result<()> {
        if self.video.is_none() && self.audio.is_none() {
            anyhow::bail!("test media needs at least one stream");
        }
        crate::init()?;
        let format = OutputFormat::from_path(path)?;
        let mut output = AvOutput::new(path, &format)?;

        let mut video = match &self.video {
            Some(source) => {
                let profile = video_profile(source)?;
                let encoder = Encoder::new(&profile, format.global_header)?;
                output.add_stream(0, encoder.parameters(), encoder.time_base())?;
                Some((encoder, source.clone(), 0i64))
            }
            None => None,
        };
        let mut audio = match &self.audio {
            Some(source) => {
                let profile = audio_profile(source)?;
                let encoder = Encoder::new(&profile, format.global_header)?;
                output.add_stream(1, encoder.parameters(), encoder.time_base())?;
                Some((encoder, source.clone(), 0i64))
            }
            None => None,
        };
        output.write_header()?;

        loop {
            let video_time = video
                .as_ref()
                .map(|(_, s, n)| *n as f64 / s.fps as f64)
                .filter(|t| *t < self.duration_sec);
            let audio_time = audio
                .as_ref()
                .map(|(_, s, n)| *n as f64 / s.sample_rate as f64)
                .filter(|t| *t < self.duration_sec);

            match (video_time, audio_time) {
                (None, None) => break,
                (Some(vt), at) if at.is_none_or(|at| vt <= at) => {
                    if let Some((encoder, source, n)) = video.as_mut() {
                        encoder.send_frame(RawFrame::Video(video_frame(source, *n)))?;
                        *n += 1;
                        drain(encoder, 0, &mut output)?;
                    }
                }
                _ => {
                    if let Some((encoder, source, n)) = audio.as_mut() {
                        encoder.send_frame(RawFrame::Audio(audio_frame(source, *n)))?;
                        *n += AUDIO_FRAME_SAMPLES as i64;
                        drain(encoder, 1, &mut output)?;
                    }
                }
            }
        }

        if let Some((encoder, ..)) = video.as_mut() {
            encoder.send_eof()?;
            drain(encoder, 0, &mut output)?;
        }
        if let Some((encoder, ..)) = audio.as_mut() {
            encoder.send_eof()?;
            drain(encoder, 1, &mut output)?;
        }
        output
            .finish()
            .with_context(|| format!("could not finish {}", path.display()))
    }
}

fn drain(encoder: &mut Encoder, slot: usize, output: &mut AvOutput) -> anyhow::Result<()> {
    while let Some(packet) = encoder.receive_packet()? {
        output.write_packet(slot, packet)?;
    }
    Ok(())
}

fn find_codec(name: &str) -> anyhow::Result<ffmpeg_next::Codec> {
    ffmpeg_next::encoder::find_by_name(name).ok_or(anyhow::anyhow!("no encoder named {}", name))
}

fn video_profile(source: &VideoSource) -> anyhow::Result<StreamProfile> {
    let codec = find_codec(&source.codec)?;
    Ok(StreamProfile {
        source_index: 0,
        codec: codec.id(),
        codec_name: source.codec.clone(),
        caps: Caps::new(&format!("video/x-{}", source.codec)),
        format: RawFormat::Video {
            width: source.width,
            height: source.height,
            pixel_format: Pixel::YUV420P,
            frame_rate: Rational::new(source.fps, 1),
        },
        bit_rate: 0,
        time_base: Rational::new(1, source.fps),
    })
}

fn audio_profile(source: &AudioSource) -> anyhow::Result<StreamProfile> {
    let codec = find_codec(&source.codec)?;
    Ok(StreamProfile {
        source_index: 1,
        codec: codec.id(),
        codec_name: source.codec.clone(),
        caps: Caps::new(&format!("audio/x-{}", source.codec)),
        format: RawFormat::Audio {
            sample_rate: source.sample_rate,
            channels: source.channels,
            sample_format: Sample::I16(sample::Type::Packed),
        },
        bit_rate: 0,
        time_base: Rational::new(1, source.sample_rate as i32),
    })
}

fn video_frame(source: &VideoSource, n: i64) -> RawVideoFrame {
    let mut frame = ffmpeg_next::frame::Video::new(Pixel::YUV420P, source.width, source.height);
    let shift = (n * 4) as usize;
    let stride = frame.stride(0);
    for (y, row) in frame.data_mut(0).chunks_mut(stride).enumerate() {
        for (x, px) in row.iter_mut().enumerate() {
            *px = ((x + y + shift) % 256) as u8;
        }
    }
    frame.data_mut(1).fill(0x80);
    frame.data_mut(2).fill(0x80);
    frame.set_pts(Some(n));
    RawVideoFrame::from((frame, Rational::new(1, source.fps)))
}

fn audio_frame(source: &AudioSource, first_sample: i64) -> RawAudioFrame {
    let layout = match source.channels {
        1 => ChannelLayout::MONO,
        _ => ChannelLayout::STEREO,
    };
    let mut frame = ffmpeg_next::frame::Audio::new(
        Sample::I16(sample::Type::Packed),
        AUDIO_FRAME_SAMPLES,
        layout,
    );
    unsafe {
        ffmpeg_next::ffi::av_channel_layout_default(
            &mut (*frame.as_mut_ptr()).ch_layout,
            source.channels as i32,
        );
    }
    frame.set_rate(source.sample_rate);

    let channels = source.channels as usize;
    let data = frame.data_mut(0);
    for i in 0..AUDIO_FRAME_SAMPLES {
        let t = (first_sample + i as i64) as f64 / source.sample_rate as f64;
        let value = ((t * 440.0 * std::f64::consts::TAU).sin() * 8000.0) as i16;
        for c in 0..channels {
            let offset = (i * channels + c) * 2;
            if let Some(bytes) = data.get_mut(offset..offset + 2) {
                bytes.copy_from_slice(&value.to_le_bytes());
            }
        }
    }
    frame.set_pts(Some(first_sample));
    RawAudioFrame::from((frame, Rational::new(1, source.sample_rate as i32)))
}
