use std::path::PathBuf;

use clap::Parser;

pub const USAGE: &str = "filter-media <input file> [<output file>]";

/// Re-encodes a media file to its own profile with a running timestamp drawn
/// over the video.
#[derive(Parser, Debug)]
#[command(name = "filter-media")]
#[command(version)]
#[command(override_usage = USAGE)]
pub struct Args {
    /// Media file to transcode
    pub input: PathBuf,

    /// Output file (default: <input stem>.out<input extension> next to the input)
    pub output: Option<PathBuf>,
}

/// Whether a parse error is really a help or version request.
pub fn is_informational(err: &clap::Error) -> bool {
    matches!(
        err.kind(),
        clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion
    )
}
