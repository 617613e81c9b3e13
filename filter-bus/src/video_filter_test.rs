use std::sync::atomic::{AtomicUsize, Ordering};

use ffmpeg_next::format::Pixel;

use super::*;
use crate::parse::parse;

fn collecting_sink(template: Caps) -> (Pad, Arc<Mutex<Vec<RawVideoFrame>>>, Arc<AtomicUsize>) {
    let frames = Arc::new(Mutex::new(Vec::new()));
    let eos = Arc::new(AtomicUsize::new(0));
    let (frames_clone, eos_clone) = (frames.clone(), eos.clone());
    let pad = Pad::new_sink("video_0", "e", template, move |_, cmd| {
        match cmd {
            RawFrameCmd::Data(RawFrame::Video(frame)) => frames_clone.lock().unwrap().push(frame),
            RawFrameCmd::Data(_) => panic!("unexpected audio"),
            RawFrameCmd::EOF => {
                eos_clone.fetch_add(1, Ordering::SeqCst);
            }
        }
        Ok(())
    });
    (pad, frames, eos)
}

/// Luma rows `rows` of a frame, without stride padding.
fn luma_rows(frame: &RawVideoFrame, rows: std::ops::Range<usize>) -> Vec<u8> {
    let video = frame.as_video();
    let stride = video.stride(0);
    let width = video.width() as usize;
    rows.flat_map(|y| video.data(0)[y * stride..y * stride + width].to_vec())
        .collect()
}

fn frame(pts: i64, format: Pixel) -> RawVideoFrame {
    sized_frame(pts, format, 64, 48)
}

fn sized_frame(pts: i64, format: Pixel, width: u32, height: u32) -> RawVideoFrame {
    let mut frame = ffmpeg_next::frame::Video::new(format, width, height);
    for plane in 0..frame.planes() {
        frame.data_mut(plane).fill(0x80);
    }
    frame.set_pts(Some(pts));
    RawVideoFrame::from((frame, Rational::new(1, 25)))
}

#[test]
fn test_overlay_spec() -> anyhow::Result<()> {
    let desc = parse("timeoverlay halignment=center valignment=bottom font-size=24 font-file=/f.ttf")?;
    let settings = OverlaySettings::from_desc(&desc.elements[0])?;
    assert_eq!(
        settings.drawtext(),
        "drawtext=text='%{pts\\:hms}':x=(w-text_w)/2:y=h-text_h-8:fontsize=24:\
         fontcolor=white:box=1:boxcolor=black@0.5:fontfile='/f.ttf'"
    );
    assert_eq!(
        OverlaySettings::default().drawtext(),
        "drawtext=text='%{pts\\:hms}':x=8:y=8:fontsize=18:fontcolor=white:box=1:boxcolor=black@0.5"
    );
    Ok(())
}

#[test]
fn test_convert_spec_follows_peer_format() -> anyhow::Result<()> {
    let convert = VideoFilter::new("vc_o", FilterKind::Convert);
    assert_eq!(convert.filter_spec(), "null");

    let (sink, _, _) = collecting_sink(Caps::new(RAW_VIDEO).with("format", "nv12"));
    convert.src_pad().link(&sink)?;
    assert_eq!(convert.filter_spec(), "format=pix_fmts=nv12");
    Ok(())
}

#[test]
fn test_convert_pushes_converted_frames() -> anyhow::Result<()> {
    crate::init()?;
    let convert = VideoFilter::new("vc_o", FilterKind::Convert);
    let (sink, frames, eos) = collecting_sink(
        Caps::new(RAW_VIDEO)
            .with("format", "yuv420p")
            .with("width", 64)
            .with("height", 48),
    );
    convert.src_pad().link(&sink)?;

    let upstream = Pad::new_src("src_0", "d", Caps::new(RAW_VIDEO));
    upstream.link(convert.sink_pad())?;
    for pts in 0..5 {
        upstream.push(RawFrameCmd::Data(RawFrame::Video(frame(pts, Pixel::RGB24))))?;
    }
    upstream.push(RawFrameCmd::EOF)?;

    let frames = frames.lock().unwrap();
    assert_eq!(frames.len(), 5);
    assert!(frames.iter().all(|f| f.format() == Pixel::YUV420P));
    assert_eq!(frames[4].pts(), Some(4));
    assert_eq!(eos.load(Ordering::SeqCst), 1);
    assert_eq!(
        convert.src_pad().current_caps().map(|c| c.to_string()),
        Some("video/x-raw, format=yuv420p, width=64, height=48".to_string())
    );
    Ok(())
}

#[test]
fn test_overlay_chain() -> anyhow::Result<()> {
    crate::init()?;
    if !overlay_available() {
        eprintln!("skip: ffmpeg cannot draw text");
        return Ok(());
    }

    let vc_i = VideoFilter::new("vc_i", FilterKind::Convert);
    let overlay = VideoFilter::new("timeoverlay0", FilterKind::TimeOverlay(OverlaySettings::default()));
    let vc_o = VideoFilter::new("vc_o", FilterKind::Convert);
    vc_i.src_pad().link(overlay.sink_pad())?;
    overlay.src_pad().link(vc_o.sink_pad())?;
    let (sink, frames, eos) = collecting_sink(Caps::new(RAW_VIDEO).with("format", "yuv420p"));
    vc_o.src_pad().link(&sink)?;

    // wide enough for the whole `0:00:00.000` stamp
    let (width, height) = (256, 64);
    let upstream = Pad::new_src("src_0", "d", Caps::new(RAW_VIDEO));
    upstream.set_caps(
        sized_frame(0, Pixel::YUV420P, width, height)
            .caps()
            .with("framerate", "25/1"),
    );
    upstream.link(vc_i.sink_pad())?;
    for pts in 0..10 {
        let frame = sized_frame(pts, Pixel::YUV420P, width, height);
        upstream.push(RawFrameCmd::Data(RawFrame::Video(frame)))?;
    }
    upstream.push(RawFrameCmd::EOF)?;

    let frames = frames.lock().unwrap();
    assert_eq!(frames.len(), 10);
    assert_eq!(eos.load(Ordering::SeqCst), 1);

    // the stamp box starts at (8, 8); the bottom row stays untouched
    let first = &frames[0];
    let video = first.as_video();
    assert_ne!(video.data(0)[8 * video.stride(0) + 8], 0x80);
    assert!(luma_rows(first, height as usize - 1..height as usize).iter().all(|&y| y == 0x80));

    // 0:00:00.000 and 0:00:00.040 render differently
    let stamp_rows = 8..32;
    assert_eq!(frames[1].pts(), Some(1));
    assert_ne!(luma_rows(first, stamp_rows.clone()), luma_rows(&frames[1], stamp_rows));
    assert_eq!(
        vc_o.src_pad().current_caps().and_then(|c| c.get("framerate").map(str::to_string)),
        Some("25/1".to_string())
    );
    Ok(())
}

#[test]
fn test_audio_is_not_negotiated() -> anyhow::Result<()> {
    crate::init()?;
    let convert = VideoFilter::new("vc_i", FilterKind::Convert);
    let audio = ffmpeg_next::frame::Audio::new(
        ffmpeg_next::format::Sample::I16(ffmpeg_next::format::sample::Type::Packed),
        64,
        ffmpeg_next::ChannelLayout::MONO,
    );
    let upstream = Pad::new_src("src_1", "d", Caps::any());
    upstream.link(convert.sink_pad())?;
    let result = upstream.push(RawFrameCmd::Data(RawFrame::Audio(
        crate::frame::RawAudioFrame::from((audio, Rational::new(1, 44100))),
    )));
    assert!(matches!(result, Err(FlowError::NotNegotiated { .. })));
    Ok(())
}
