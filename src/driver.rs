use filter_bus::{Framework, bus::MainLoop, pipeline::State};

use crate::{
    assemble::{self, Assembled},
    cli::Args,
    inspect::{self, section},
    paths::MediaPaths,
    relay::{EventRelay, Termination},
    router::DynamicRouter,
};

/// Validates paths, inspects the input, then builds and runs the pipeline
/// until end-of-stream or the first error.
pub async fn run(args: &Args) -> anyhow::Result<Termination> {
    let paths = MediaPaths::resolve(&args.input, args.output.as_deref())?;
    let framework = Framework::init()?;
    let result = transcode(&paths).await;
    drop(framework);
    result
}

async fn transcode(paths: &MediaPaths) -> anyhow::Result<Termination> {
    let inspection = inspect::inspect(paths.input())?;
    println!("{}", inspect::render(&inspection));
    println!("{}", section("pipeline", &assemble::render_template(paths)));

    let assembled = assemble::assemble(paths, &inspection.profile)?;
    DynamicRouter::new(&assembled).attach(&assembled.decodebin);

    let termination = play(&assembled).await;
    if let Err(e) = assembled.pipeline.set_state(State::Null).await {
        log::error!("could not stop {}: {:#}", assembled.pipeline.name(), e);
    }
    Ok(termination)
}

async fn play(assembled: &Assembled) -> Termination {
    let pipeline = &assembled.pipeline;
    let main_loop = MainLoop::new();
    let relay = EventRelay::new(main_loop.clone());
    let watch = {
        let relay = relay.clone();
        match pipeline.bus().add_watch(move |m| relay.on_message(m)) {
            Ok(watch) => watch,
            Err(e) => {
                log::error!("{:#}", e);
                return Termination::Aborted;
            }
        }
    };

    if let Err(e) = pipeline.set_state(State::Playing).await {
        log::error!("{} failed to start: {:#}", pipeline.name(), e);
        // the failure is on the bus; relay what is there
        drop(watch);
        while let Some(message) = pipeline.bus().pop() {
            relay.on_message(&message);
        }
        return relay.termination().unwrap_or(Termination::Error);
    }

    let task = tokio::spawn({
        let main_loop = main_loop.clone();
        async move { main_loop.run(watch).await }
    });
    match task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => eprintln!("main loop failed: {:?}", e),
        Err(e) => eprintln!("main loop panicked: {:?}", e),
    }
    relay.termination().unwrap_or(Termination::Aborted)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use filter_bus::{discoverer::discover, testsrc::TestMedia, video_filter::overlay_available};
    use tokio::sync::Mutex;

    use super::*;

    // one framework guard per process
    static FRAMEWORK: Mutex<()> = Mutex::const_new(());

    fn args(input: PathBuf, output: Option<PathBuf>) -> Args {
        Args { input, output }
    }

    #[tokio::test]
    async fn test_missing_input() {
        let err = run(&args(PathBuf::from("/nonexistent/clip.mkv"), None))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "/nonexistent/clip.mkv does not exist!");
    }

    #[tokio::test]
    async fn test_discovery_failure() -> anyhow::Result<()> {
        let _serial = FRAMEWORK.lock().await;
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("notes.txt");
        std::fs::write(&input, "hello")?;
        assert!(run(&args(input, None)).await.is_err());
        assert!(!dir.path().join("notes.out.txt").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_run_to_end_of_stream() -> anyhow::Result<()> {
        let _serial = FRAMEWORK.lock().await;
        filter_bus::init()?;
        if !overlay_available() {
            eprintln!("skip: ffmpeg cannot draw text");
            return Ok(());
        }
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("clip.mkv");
        TestMedia::new()
            .video("mpeg4", 64, 48, 25)
            .audio("mp2", 44100, 1)
            .write(&input)?;

        let termination = run(&args(input.clone(), None)).await?;
        assert_eq!(termination, Termination::EndOfStream);

        let output = dir.path().join("clip.out.mkv");
        let info = discover(&output)?;
        assert_eq!(info.video.len(), 1);
        assert_eq!(info.audio.len(), 1);
        assert_eq!(info.video[0].codec_name, "mpeg4");

        // a second run refuses to overwrite
        let err = run(&args(input, None)).await.unwrap_err();
        assert!(err.to_string().ends_with("exists - not over writing!"));
        Ok(())
    }

    #[tokio::test]
    async fn test_audio_only_run() -> anyhow::Result<()> {
        let _serial = FRAMEWORK.lock().await;
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("tone.wav");
        let output = dir.path().join("copy.wav");
        TestMedia::new().audio("pcm_s16le", 8000, 1).duration(0.5).write(&input)?;

        let termination = run(&args(input, Some(output.clone()))).await?;
        assert_eq!(termination, Termination::EndOfStream);
        assert_eq!(discover(&output)?.audio[0].codec_name, "pcm_s16le");
        Ok(())
    }
}
