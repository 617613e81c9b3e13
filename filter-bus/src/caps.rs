//! Capability descriptions carried by pads and discovered streams.
//!
//! A caps value is a media type (`video/x-raw`, `audio/x-mp2`, ...) followed by
//! ordered `key=value` fields, rendered as `video/x-raw, width=320, height=240`.

use std::fmt;
use std::str::FromStr;

pub const RAW_VIDEO: &str = "video/x-raw";
pub const RAW_AUDIO: &str = "audio/x-raw";
pub const ANY: &str = "ANY";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Caps {
    media_type: String,
    fields: Vec<(String, String)>,
}

impl Caps {
    pub fn new(media_type: &str) -> Self {
        Self {
            media_type: media_type.to_string(),
            fields: Vec::new(),
        }
    }

    pub fn any() -> Self {
        Self::new(ANY)
    }

    /// Sets `key` to `value`, replacing an existing field of the same name.
    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: impl ToString) {
        let value = value.to_string();
        match self.fields.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value,
            None => self.fields.push((key.to_string(), value)),
        }
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_any(&self) -> bool {
        self.media_type == ANY
    }

    pub fn is_raw_video(&self) -> bool {
        self.media_type == RAW_VIDEO
    }

    pub fn is_raw_audio(&self) -> bool {
        self.media_type == RAW_AUDIO
    }

    pub fn is_video(&self) -> bool {
        self.media_type.starts_with("video/")
    }

    pub fn is_audio(&self) -> bool {
        self.media_type.starts_with("audio/")
    }

    /// Two caps intersect when either is `ANY`, or both share the media type and
    /// agree on every field they both carry.
    pub fn can_intersect(&self, other: &Caps) -> bool {
        if self.is_any() || other.is_any() {
            return true;
        }
        if self.media_type != other.media_type {
            return false;
        }
        self.fields
            .iter()
            .all(|(k, v)| other.get(k).is_none_or(|o| o == v))
    }
}

impl fmt::Display for Caps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.media_type)?;
        for (k, v) in &self.fields {
            write!(f, ", {}={}", k, v)?;
        }
        Ok(())
    }
}

impl FromStr for Caps {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(',').map(str::trim);
        let media_type = parts
            .next()
            .filter(|m| !m.is_empty() && !m.contains('='))
            .ok_or_else(|| anyhow::anyhow!("caps {:?} has no media type", s))?;
        let mut caps = Caps::new(media_type);
        for part in parts {
            let (k, v) = part
                .split_once('=')
                .ok_or_else(|| anyhow::anyhow!("malformed caps field {:?} in {:?}", part, s))?;
            if k.trim().is_empty() {
                anyhow::bail!("empty caps field name in {:?}", s);
            }
            caps.set(k.trim(), v.trim());
        }
        Ok(caps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caps_display_and_parse() -> anyhow::Result<()> {
        let caps = Caps::new(RAW_VIDEO)
            .with("format", "yuv420p")
            .with("width", 320)
            .with("height", 240);
        let text = caps.to_string();
        assert_eq!(text, "video/x-raw, format=yuv420p, width=320, height=240");
        let parsed: Caps = text.parse()?;
        assert_eq!(parsed, caps);
        assert_eq!(parsed.get("width"), Some("320"));
        assert!(parsed.is_raw_video());
        Ok(())
    }

    #[test]
    fn test_caps_with_replaces_field() {
        let caps = Caps::new(RAW_AUDIO).with("rate", 44100).with("rate", 48000);
        assert_eq!(caps.get("rate"), Some("48000"));
        assert_eq!(caps.fields().count(), 1);
    }

    #[test]
    fn test_caps_intersection() {
        let decoded = Caps::new(RAW_AUDIO)
            .with("format", "fltp")
            .with("rate", 44100)
            .with("channels", 2);
        let accepted = Caps::new(RAW_AUDIO).with("rate", 44100).with("channels", 2);
        assert!(decoded.can_intersect(&accepted));
        assert!(decoded.can_intersect(&Caps::any()));
        assert!(!decoded.can_intersect(&Caps::new(RAW_VIDEO)));
        assert!(!decoded.can_intersect(&accepted.clone().with("rate", 48000)));
    }

    #[test]
    fn test_caps_rejects_malformed() {
        assert!("".parse::<Caps>().is_err());
        assert!("width=3".parse::<Caps>().is_err());
        assert!("video/x-raw, width".parse::<Caps>().is_err());
    }
}
