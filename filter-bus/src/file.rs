use std::path::{Path, PathBuf};

use crate::input::AvInput;

/// Reads a local file; feeds the decodebin it is linked to.
#[derive(Debug)]
pub struct FileSrc {
    name: String,
    location: PathBuf,
}

impl FileSrc {
    pub fn new(name: &str, location: &str) -> Self {
        Self {
            name: name.to_string(),
            location: PathBuf::from(location),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    pub fn open(&self) -> anyhow::Result<AvInput> {
        AvInput::new(&self.location)
    }
}

/// Writes the muxed output of the encodebin it is linked to.
#[derive(Debug)]
pub struct FileSink {
    name: String,
    location: PathBuf,
}

impl FileSink {
    pub fn new(name: &str, location: &str) -> Self {
        Self {
            name: name.to_string(),
            location: PathBuf::from(location),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn location(&self) -> &Path {
        &self.location
    }
}
