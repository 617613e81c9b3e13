use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::config::config;

/// Input and output of one run, both absolute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaPaths {
    input: PathBuf,
    output: PathBuf,
}

impl MediaPaths {
    /// Checks that `input` exists and the output does not, then makes both
    /// absolute. The output defaults to [`default_output`].
    pub fn resolve(input: &Path, output: Option<&Path>) -> anyhow::Result<Self> {
        anyhow::ensure!(input.exists(), "{} does not exist!", input.display());
        let output = output
            .map(Path::to_path_buf)
            .unwrap_or_else(|| default_output(input));
        anyhow::ensure!(
            !output.exists(),
            "{} exists - not over writing!",
            output.display()
        );

        let input = input
            .canonicalize()
            .with_context(|| format!("could not resolve {}", input.display()))?;
        let output = absolute_output(&output)?;
        log::debug!("input {}, output {}", input.display(), output.display());
        Ok(Self { input, output })
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    pub fn output(&self) -> &Path {
        &self.output
    }
}

/// `<dir>/<stem>.out<ext>` next to `input`.
pub fn default_output(input: &Path) -> PathBuf {
    let mut name = OsString::from(input.file_stem().unwrap_or_default());
    name.push(config().output_suffix());
    if let Some(ext) = input.extension() {
        name.push(".");
        name.push(ext);
    }
    input.with_file_name(name)
}

fn absolute_output(output: &Path) -> anyhow::Result<PathBuf> {
    let file_name = output
        .file_name()
        .ok_or(anyhow::anyhow!("{} is not a file path", output.display()))?;
    let parent = match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let parent = parent
        .canonicalize()
        .with_context(|| format!("output directory {} does not exist", parent.display()))?;
    Ok(parent.join(file_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_output() {
        assert_eq!(
            default_output(Path::new("/media/clip.mp4")),
            PathBuf::from("/media/clip.out.mp4")
        );
        assert_eq!(default_output(Path::new("noext")), PathBuf::from("noext.out"));
        assert_eq!(
            default_output(Path::new("a/b.tar.mkv")),
            PathBuf::from("a/b.tar.out.mkv")
        );
    }

    #[test]
    fn test_resolve() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("clip.mkv");
        std::fs::write(&input, b"x")?;

        let paths = MediaPaths::resolve(&input, None)?;
        let root = dir.path().canonicalize()?;
        assert_eq!(paths.input(), root.join("clip.mkv"));
        assert_eq!(paths.output(), root.join("clip.out.mkv"));

        let explicit = MediaPaths::resolve(&input, Some(&dir.path().join("other.mkv")))?;
        assert_eq!(explicit.output(), root.join("other.mkv"));
        Ok(())
    }

    #[test]
    fn test_missing_input() {
        let err = MediaPaths::resolve(Path::new("/nonexistent/clip.mkv"), None).unwrap_err();
        assert_eq!(err.to_string(), "/nonexistent/clip.mkv does not exist!");
    }

    #[test]
    fn test_existing_output() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("clip.mkv");
        let output = dir.path().join("clip.out.mkv");
        std::fs::write(&input, b"x")?;
        std::fs::write(&output, b"y")?;

        let err = MediaPaths::resolve(&input, None).unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("{} exists - not over writing!", output.display())
        );
        // input given as its own output
        assert!(MediaPaths::resolve(&input, Some(&input)).is_err());
        assert_eq!(std::fs::read(&output)?, b"y");
        Ok(())
    }
}
