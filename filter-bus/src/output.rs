use std::collections::BTreeMap;
use std::ffi::{CStr, CString};
use std::path::{Path, PathBuf};

use ffmpeg_next::{Rational, codec::Parameters};

use crate::{packet::RawPacket, profile::ContainerProfile};

/// Muxer picked for an output file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFormat {
    pub name: String,
    /// Encoders must put codec headers in extradata.
    pub global_header: bool,
}

impl OutputFormat {
    /// Resolves a muxer by name and/or file name via FFmpeg's av_guess_format.
    fn guess(name: Option<&str>, path: Option<&Path>) -> anyhow::Result<Option<Self>> {
        let cname = name
            .map(CString::new)
            .transpose()
            .map_err(|e| anyhow::anyhow!("invalid format name {:?}: {}", name, e))?;
        let cpath = path
            .map(|p| CString::new(p.to_string_lossy().as_bytes()))
            .transpose()
            .map_err(|e| anyhow::anyhow!("invalid output path: {}", e))?;

        let ptr = unsafe {
            ffmpeg_next::ffi::av_guess_format(
                cname.as_ref().map_or(std::ptr::null(), |c| c.as_ptr()),
                cpath.as_ref().map_or(std::ptr::null(), |c| c.as_ptr()),
                std::ptr::null(),
            )
        };
        if ptr.is_null() {
            return Ok(None);
        }
        let (name, flags) = unsafe { (CStr::from_ptr((*ptr).name), (*ptr).flags) };
        Ok(Some(Self {
            name: name.to_string_lossy().into_owned(),
            global_header: flags & ffmpeg_next::ffi::AVFMT_GLOBALHEADER as i32 != 0,
        }))
    }

    /// The muxer FFmpeg picks for the file name alone.
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        Self::guess(None, Some(path))?
            .ok_or(anyhow::anyhow!("no muxer for {}", path.display()))
    }

    /// The muxer FFmpeg guesses from the file name when the container profile
    /// lists it, otherwise the first profile name FFmpeg can mux.
    pub fn for_output(path: &Path, container: &ContainerProfile) -> anyhow::Result<Self> {
        if let Some(guessed) = Self::guess(None, Some(path))? {
            if container.names.iter().any(|n| *n == guessed.name) {
                return Ok(guessed);
            }
            log::debug!(
                "muxer {} guessed for {} is not in {:?}",
                guessed.name,
                path.display(),
                container.names
            );
        }
        for name in &container.names {
            if let Some(format) = Self::guess(Some(name), None)? {
                return Ok(format);
            }
        }
        anyhow::bail!(
            "none of the container formats {:?} can be muxed",
            container.names
        )
    }
}

struct OutputSlot {
    index: usize,
    time_base: Rational,
}

/// Muxer over an output file. Streams are keyed by caller-chosen slots.
pub struct AvOutput {
    inner: ffmpeg_next::format::context::Output,
    path: PathBuf,
    slots: BTreeMap<usize, OutputSlot>,
    have_written_header: bool,
    have_written_trailer: bool,
}

unsafe impl Send for AvOutput {}

impl AvOutput {
    pub fn new(path: &Path, format: &OutputFormat) -> anyhow::Result<Self> {
        let output = ffmpeg_next::format::output_as(&path, &format.name).map_err(|e| {
            anyhow::anyhow!(
                "could not create {} as {}: {}",
                path.display(),
                format.name,
                e
            )
        })?;
        Ok(Self {
            inner: output,
            path: path.to_path_buf(),
            slots: BTreeMap::new(),
            have_written_header: false,
            have_written_trailer: false,
        })
    }

    pub fn add_stream(
        &mut self,
        slot: usize,
        parameters: Parameters,
        time_base: Rational,
    ) -> anyhow::Result<()> {
        if self.have_written_header {
            anyhow::bail!("cannot add stream {} after the header", slot);
        }
        let mut writer_stream = self
            .inner
            .add_stream(ffmpeg_next::encoder::find(parameters.id()))?;
        writer_stream.set_parameters(parameters);
        writer_stream.set_time_base(time_base);
        self.slots.insert(
            slot,
            OutputSlot {
                index: writer_stream.index(),
                time_base,
            },
        );
        Ok(())
    }

    pub fn write_header(&mut self) -> anyhow::Result<()> {
        if !self.have_written_header {
            self.inner.write_header()?;
            self.have_written_header = true;
            log::info!(
                "writing {} with {} stream(s)",
                self.path.display(),
                self.slots.len()
            );
        }
        Ok(())
    }

    pub fn write_packet(&mut self, slot: usize, mut packet: RawPacket) -> anyhow::Result<()> {
        self.write_header()?;
        let time_base = packet.time_base();
        let destination = self
            .slots
            .get(&slot)
            .ok_or(anyhow::anyhow!("stream not found: {}", slot))?;
        let out_time_base = self
            .inner
            .stream(destination.index)
            .map(|s| s.time_base())
            .unwrap_or(destination.time_base);

        let p = packet.get_mut();
        p.set_stream(destination.index);
        p.set_position(-1);
        p.rescale_ts(time_base, out_time_base);
        p.write_interleaved(&mut self.inner)?;
        Ok(())
    }

    pub fn finish(&mut self) -> anyhow::Result<()> {
        if self.have_written_header && !self.have_written_trailer {
            self.have_written_trailer = true;
            self.inner.write_trailer()?;
        }
        Ok(())
    }
}
