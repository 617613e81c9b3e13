use std::fmt::Write;
use std::path::Path;

use filter_bus::{
    caps::Caps,
    discoverer::{self, DiscovererInfo, StreamInfo},
    profile::EncodingProfile,
};

use crate::config::config;

/// What discovery found in the input and the profile derived from it.
#[derive(Debug, Clone)]
pub struct Inspection {
    pub info: DiscovererInfo,
    pub profile: EncodingProfile,
}

impl Inspection {
    pub fn input_caps(&self) -> Vec<Caps> {
        self.profile.input_caps()
    }
}

pub fn inspect(path: &Path) -> anyhow::Result<Inspection> {
    let info = discoverer::discover(path)?;
    let profile = EncodingProfile::from_discoverer(&info)?;
    log::debug!("{} -> {}", path.display(), profile);
    Ok(Inspection { info, profile })
}

/// `title ----` header, body, closing ruler.
pub fn section(title: &str, body: &str) -> String {
    let width = config().ruler_width();
    let mut out = String::new();
    let _ = writeln!(out, "{} {}", title, "-".repeat(width.saturating_sub(title.len() + 1)));
    out.push_str(body);
    if !body.is_empty() && !body.ends_with('\n') {
        out.push('\n');
    }
    let _ = writeln!(out, "{}", "-".repeat(width));
    out
}

/// One field per line: `media/type\n\tkey=value...`.
pub fn caps_lines(caps: &Caps) -> String {
    caps.to_string().replace(", ", "\n\t")
}

fn streams_body(streams: &[StreamInfo]) -> String {
    streams
        .iter()
        .map(|s| caps_lines(&s.caps) + "\n")
        .collect()
}

/// Console dump of an inspection: video streams, audio streams, the profile
/// and the raw caps it accepts.
pub fn render(inspection: &Inspection) -> String {
    let mut out = String::new();
    out.push_str(&section("video", &streams_body(inspection.info.video_streams())));
    out.push('\n');
    out.push_str(&section("audio", &streams_body(inspection.info.audio_streams())));
    out.push('\n');
    let _ = writeln!(out, "profile {}", inspection.profile);
    let caps: Vec<String> = inspection.input_caps().iter().map(Caps::to_string).collect();
    let _ = writeln!(out, "caps: {}", caps.join("; "));
    out
}

#[cfg(test)]
mod tests {
    use filter_bus::testsrc::TestMedia;

    use super::*;

    #[test]
    fn test_section() {
        let text = section("pipeline", "a ! b");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("pipeline ---"));
        assert_eq!(lines[0].len(), 75);
        assert_eq!(lines[1], "a ! b");
        assert_eq!(lines[2], "-".repeat(75));
    }

    #[test]
    fn test_caps_lines() -> anyhow::Result<()> {
        let caps: Caps = "video/x-h264, width=320, height=240".parse()?;
        assert_eq!(caps_lines(&caps), "video/x-h264\n\twidth=320\n\theight=240");
        Ok(())
    }

    #[test]
    fn test_inspect_and_render() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("clip.mkv");
        TestMedia::new()
            .video("mpeg4", 64, 48, 25)
            .audio("mp2", 44100, 1)
            .duration(0.2)
            .write(&path)?;

        let inspection = inspect(&path)?;
        assert_eq!(inspection.profile, EncodingProfile::from_discoverer(&inspection.info)?);

        let text = render(&inspection);
        assert!(text.contains("video/x-mpeg4\n\twidth=64\n\theight=48"));
        assert!(text.contains("audio/x-mp2\n\trate=44100\n\tchannels=1"));
        assert!(text.contains("profile container=matroska,webm; video/x-mpeg4"));
        assert!(text.contains("caps: video/x-raw, format=yuv420p, width=64, height=48"));
        Ok(())
    }

    #[test]
    fn test_inspect_rejects_non_media() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "hello")?;
        assert!(inspect(&path).is_err());
        Ok(())
    }
}
