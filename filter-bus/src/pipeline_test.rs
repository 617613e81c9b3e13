use std::path::Path;
use std::time::Duration;

use super::*;
use crate::{
    discoverer::discover,
    message::MessageView,
    parse::{ParseError, quote},
    profile::EncodingProfile,
    testsrc::TestMedia,
};

fn launch(input: &Path, output: &Path) -> String {
    format!(
        "filesrc location={} ! decodebin name=d \
         encodebin name=e ! filesink location={} \
         videoconvert name=vc_i ! videoconvert name=vc_o",
        quote(&input.to_string_lossy()),
        quote(&output.to_string_lossy())
    )
}

fn configure(pipeline: &Pipeline, profile: EncodingProfile) {
    let decodebin = pipeline.by_name("d").and_then(Element::as_decodebin).unwrap().clone();
    let encodebin = pipeline.by_name("e").and_then(Element::as_encodebin).unwrap().clone();
    let chain_in = pipeline.by_name("vc_i").and_then(|e| e.static_pad("sink")).unwrap();
    let chain_out = pipeline.by_name("vc_o").and_then(|e| e.static_pad("src")).unwrap();
    encodebin.set_profile(profile);
    decodebin.connect_pad_added(move |_, pad| {
        let sink = encodebin.request_pad(&pad.caps())?;
        if pad.caps().is_raw_video() {
            pad.link(&chain_in)?;
            chain_out.link(&sink)?;
        } else {
            pad.link(&sink)?;
        }
        Ok(())
    });
}

async fn until_terminal(bus: &Bus) -> Vec<Message> {
    let mut seen = Vec::new();
    while let Some(message) = bus.timed_pop(Duration::from_secs(60)).await {
        let done = matches!(message.view(), MessageView::Eos | MessageView::Error(_));
        seen.push(message);
        if done {
            break;
        }
    }
    seen
}

fn drain(bus: &Bus) -> Vec<Message> {
    std::iter::from_fn(|| bus.pop()).collect()
}

#[test]
fn test_parse_launch_elements() -> anyhow::Result<()> {
    let pipeline = Pipeline::parse_launch(&launch(Path::new("a.mkv"), Path::new("b.mkv")))?;
    let kinds: Vec<ElementKind> = pipeline.elements().iter().map(Element::kind).collect();
    assert_eq!(
        kinds,
        vec![
            ElementKind::FileSrc,
            ElementKind::DecodeBin,
            ElementKind::EncodeBin,
            ElementKind::FileSink,
            ElementKind::VideoConvert,
            ElementKind::VideoConvert,
        ]
    );
    let decodebin = pipeline.by_name("d").and_then(Element::as_decodebin).unwrap();
    assert_eq!(decodebin.source().map(|s| s.name()), Some("filesrc0"));
    let encodebin = pipeline.by_name("e").and_then(Element::as_encodebin).unwrap();
    assert_eq!(encodebin.sink().map(|s| s.location()), Some(Path::new("b.mkv")));

    let vc_i = pipeline.by_name("vc_i").unwrap();
    assert!(vc_i.static_pad("src").unwrap().is_linked());
    assert!(vc_i.static_pad("sink").is_some_and(|p| !p.is_linked()));
    assert!(decodebin.src_pads().is_empty());
    assert!(pipeline.by_name("x").is_none());

    let other = Pipeline::parse_launch("videoconvert")?;
    assert_ne!(pipeline.name(), other.name());
    Ok(())
}

#[test]
fn test_parse_launch_errors() {
    let err = Pipeline::parse_launch("filesrc location=a.mkv ! bogus").unwrap_err();
    assert_eq!(
        err.downcast_ref::<ParseError>(),
        Some(&ParseError::UnknownElement("bogus".to_string()))
    );
    let err = Pipeline::parse_launch("filesrc location=a.mkv ! filesink location=b.mkv").unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ParseError>(),
        Some(ParseError::InvalidLink { .. })
    ));
}

#[tokio::test]
async fn test_play_requires_profile() -> anyhow::Result<()> {
    let pipeline = Pipeline::parse_launch(&launch(Path::new("a.mkv"), Path::new("b.mkv")))?;
    assert!(pipeline.set_state(State::Playing).await.is_err());
    assert_eq!(pipeline.current_state().await, State::Null);
    assert!(pipeline.set_state(State::Paused).await.is_err());
    Ok(())
}

#[tokio::test]
async fn test_transcode_to_eos() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("clip.mkv");
    let output = dir.path().join("clip.out.mkv");
    TestMedia::new()
        .video("mpeg4", 64, 48, 25)
        .audio("mp2", 44100, 1)
        .write(&input)?;
    let info = discover(&input)?;

    let pipeline = Pipeline::parse_launch(&launch(&input, &output))?;
    configure(&pipeline, EncodingProfile::from_discoverer(&info)?);
    assert_eq!(pipeline.set_state(State::Playing).await?, StateChangeSuccess::Success);

    let messages = until_terminal(pipeline.bus()).await;
    let last = messages.last().unwrap();
    assert!(matches!(last.view(), MessageView::Eos), "{:?}", messages);
    assert_eq!(last.src(), pipeline.name());
    assert!(messages.iter().any(|m| matches!(m.view(), MessageView::StreamStart)));
    let states: Vec<State> = messages
        .iter()
        .filter_map(|m| match m.view() {
            MessageView::StateChanged { new, .. } => Some(*new),
            _ => None,
        })
        .collect();
    assert_eq!(states, vec![State::Ready, State::Paused, State::Playing]);

    assert_eq!(pipeline.set_state(State::Null).await?, StateChangeSuccess::Success);
    assert_eq!(pipeline.set_state(State::Null).await?, StateChangeSuccess::NoChange);
    let to_null = drain(pipeline.bus())
        .into_iter()
        .filter(|m| matches!(m.view(), MessageView::StateChanged { new: State::Null, .. }))
        .count();
    assert_eq!(to_null, 1);

    let decodebin = pipeline.by_name("d").and_then(Element::as_decodebin).unwrap();
    assert_eq!(decodebin.src_pads().len(), 2);

    let out = discover(&output)?;
    assert_eq!(out.container_names(), info.container_names());
    assert_eq!(out.video[0].codec_name, "mpeg4");
    assert_eq!(out.audio[0].codec_name, "mp2");
    assert_eq!(out.video[0].caps.get("width"), Some("64"));
    assert_eq!(out.video[0].caps.get("height"), Some("48"));
    Ok(())
}

#[tokio::test]
async fn test_pipeline_plays_once() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("tone.wav");
    TestMedia::new().audio("pcm_s16le", 8000, 1).duration(0.5).write(&input)?;
    let info = discover(&input)?;

    let pipeline = Pipeline::parse_launch(&launch(&input, &dir.path().join("tone.out.wav")))?;
    configure(&pipeline, EncodingProfile::from_discoverer(&info)?);
    pipeline.set_state(State::Playing).await?;
    let messages = until_terminal(pipeline.bus()).await;
    assert!(matches!(messages.last().map(Message::view), Some(MessageView::Eos)));
    pipeline.set_state(State::Null).await?;

    assert!(pipeline.set_state(State::Playing).await.is_err());
    assert_eq!(pipeline.current_state().await, State::Null);
    Ok(())
}

#[tokio::test]
async fn test_unreadable_input_fails_to_play() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("clip.mkv");
    TestMedia::new().video("mpeg4", 64, 48, 25).duration(0.2).write(&input)?;
    let profile = EncodingProfile::from_discoverer(&discover(&input)?)?;
    std::fs::remove_file(&input)?;

    let pipeline = Pipeline::parse_launch(&launch(&input, &dir.path().join("out.mkv")))?;
    configure(&pipeline, profile);
    assert!(pipeline.set_state(State::Playing).await.is_err());

    let messages = drain(pipeline.bus());
    assert!(messages.iter().any(|m| m.type_name() == "error"));
    assert_eq!(pipeline.set_state(State::Null).await?, StateChangeSuccess::Success);
    assert_eq!(pipeline.current_state().await, State::Null);
    Ok(())
}

#[tokio::test]
async fn test_link_failure_posts_error() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("clip.mkv");
    TestMedia::new().video("mpeg4", 64, 48, 25).duration(0.2).write(&input)?;
    let info = discover(&input)?;

    let pipeline = Pipeline::parse_launch(&launch(&input, &dir.path().join("out.mkv")))?;
    let decodebin = pipeline.by_name("d").and_then(Element::as_decodebin).unwrap().clone();
    let encodebin = pipeline.by_name("e").and_then(Element::as_encodebin).unwrap().clone();
    encodebin.set_profile(EncodingProfile::from_discoverer(&info)?);
    decodebin.connect_pad_added(|_, _| anyhow::bail!("refused"));
    pipeline.set_state(State::Playing).await?;

    let messages = until_terminal(pipeline.bus()).await;
    match messages.last().map(Message::view) {
        Some(MessageView::Error(details)) => {
            assert!(details.message.starts_with("failed to link pad d:src_0"));
            assert!(details.debug.as_deref().unwrap_or("").ends_with("refused"));
        }
        other => panic!("expected an error, got {:?}", other),
    }
    pipeline.set_state(State::Null).await?;
    assert!(!dir.path().join("out.mkv").exists());
    Ok(())
}
