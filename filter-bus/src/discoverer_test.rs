use super::*;
use crate::testsrc::TestMedia;

#[test]
fn test_discover_video_and_audio() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("clip.mkv");
    TestMedia::new()
        .video("mpeg4", 64, 48, 25)
        .audio("mp2", 44100, 1)
        .write(&path)?;

    let info = discover(&path)?;
    assert!(info.container_names().iter().any(|n| n == "matroska"));
    assert_eq!(info.nb_streams(), 2);
    assert!(info.skipped.is_empty());

    let video = &info.video_streams()[0];
    assert_eq!(video.kind(), StreamKind::Video);
    assert_eq!(video.codec_name, "mpeg4");
    assert_eq!(video.caps.media_type(), "video/x-mpeg4");
    assert_eq!(video.caps.get("width"), Some("64"));
    assert_eq!(video.caps.get("framerate"), Some("25/1"));
    assert_eq!(
        video.format.raw_caps().to_string(),
        "video/x-raw, format=yuv420p, width=64, height=48, framerate=25/1"
    );

    let audio = &info.audio_streams()[0];
    assert_eq!(audio.caps.to_string(), "audio/x-mp2, rate=44100, channels=1");
    assert_eq!(info.streams().len(), 2);

    let dump = info.to_string();
    assert!(dump.starts_with("[FORMAT]\n"));
    assert!(dump.contains("nb_streams=2\n"));
    assert!(dump.contains("codec_name=mp2\n"));
    Ok(())
}

#[test]
fn test_discover_audio_only() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("tone.wav");
    TestMedia::new().audio("pcm_s16le", 8000, 2).write(&path)?;

    let info = discover(&path)?;
    assert!(info.video_streams().is_empty());
    assert_eq!(info.audio_streams().len(), 1);
    assert_eq!(info.container_names(), vec!["wav"]);
    assert_eq!(
        info.audio[0].format.raw_caps().to_string(),
        "audio/x-raw, rate=8000, channels=2, layout=stereo"
    );
    Ok(())
}

#[test]
fn test_discover_missing_file() {
    let err = discover(Path::new("/nonexistent/clip.mkv")).unwrap_err();
    assert_eq!(err.to_string(), "discovery failed");
}

#[test]
fn test_discover_not_media() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("notes.txt");
    std::fs::write(&path, "not a media file\n")?;
    assert!(discover(&path).is_err());
    Ok(())
}

#[test]
fn test_codec_names_come_from_ffmpeg() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("clip.mkv");
    TestMedia::new()
        .video("mpeg2video", 64, 48, 25)
        .audio("pcm_s16le", 8000, 1)
        .duration(0.2)
        .write(&path)?;

    let info = discover(&path)?;
    for stream in info.streams() {
        assert_eq!(stream.codec_name, stream.codec.name());
    }
    assert_eq!(info.video[0].codec_name, "mpeg2video");
    assert_eq!(info.video[0].caps.media_type(), "video/x-mpeg2video");
    assert_eq!(info.audio[0].caps.media_type(), "audio/x-pcm_s16le");
    Ok(())
}
