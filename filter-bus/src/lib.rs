use std::sync::{
    Once,
    atomic::{AtomicBool, Ordering},
};

pub mod bus;
pub mod caps;
pub mod decodebin;
pub mod decoder;
pub mod discoverer;
pub mod encodebin;
pub mod encoder;
pub mod file;
pub mod frame;
pub mod input;
pub mod message;
pub mod output;
pub mod packet;
pub mod pad;
pub mod parse;
pub mod pipeline;
pub mod profile;
pub mod scaler;
pub mod stream;
#[cfg(any(test, feature = "testsrc"))]
pub mod testsrc;
pub mod video_filter;

static FFMPEG_INIT: Once = Once::new();
static FRAMEWORK_LIVE: AtomicBool = AtomicBool::new(false);

/// Registers FFmpeg components and lowers FFmpeg's own logging to errors.
/// Safe to call more than once.
pub fn init() -> anyhow::Result<()> {
    let mut result = Ok(());
    FFMPEG_INIT.call_once(|| {
        result = ffmpeg_next::init().map_err(|e| anyhow::anyhow!("ffmpeg_next init: {}", e));
        ffmpeg_next::util::log::set_level(ffmpeg_next::util::log::Level::Error);
    });
    result
}

/// Process-wide framework guard. Only one may be alive at a time.
#[derive(Debug)]
pub struct Framework {
    _private: (),
}

impl Framework {
    pub fn init() -> anyhow::Result<Self> {
        if FRAMEWORK_LIVE.swap(true, Ordering::SeqCst) {
            anyhow::bail!("framework already initialized");
        }
        if let Err(e) = init() {
            FRAMEWORK_LIVE.store(false, Ordering::SeqCst);
            return Err(e);
        }
        log::debug!("framework initialized");
        Ok(Self { _private: () })
    }
}

impl Drop for Framework {
    fn drop(&mut self) {
        FRAMEWORK_LIVE.store(false, Ordering::SeqCst);
        log::debug!("framework deinitialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framework_guard() -> anyhow::Result<()> {
        let guard = Framework::init()?;
        assert!(Framework::init().is_err());
        drop(guard);
        let _again = Framework::init()?;
        Ok(())
    }
}
