use super::*;

const TEMPLATE: &str = r#"filesrc location="/media/in clip.mkv"
! decodebin name=d

encodebin name=e
! filesink location="/media/out \"1\".mkv"

videoconvert name=vc_i ! timeoverlay ! videoconvert name=vc_o"#;

#[test]
fn test_parse_template() -> anyhow::Result<()> {
    let desc = parse(TEMPLATE)?;
    let names: Vec<&str> = desc.elements.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["filesrc0", "d", "e", "filesink0", "vc_i", "timeoverlay0", "vc_o"]
    );
    assert_eq!(desc.links, vec![(0, 1), (2, 3), (4, 5), (5, 6)]);
    assert_eq!(desc.elements[0].property("location"), Some("/media/in clip.mkv"));
    assert_eq!(desc.elements[3].property("location"), Some("/media/out \"1\".mkv"));
    assert_eq!(desc.elements[1].kind, ElementKind::DecodeBin);
    assert!(desc.elements[1].properties.is_empty());
    Ok(())
}

#[test]
fn test_quote_round_trip() -> anyhow::Result<()> {
    let path = r#"C:\clips\"odd" name.mp4"#;
    let desc = parse(&format!("filesrc location={} ! decodebin", quote(path)))?;
    assert_eq!(desc.elements[0].property("location"), Some(path));
    Ok(())
}

#[test]
fn test_link_without_spaces() -> anyhow::Result<()> {
    let desc = parse("videoconvert!timeoverlay!videoconvert")?;
    assert_eq!(desc.links, vec![(0, 1), (1, 2)]);
    assert_eq!(desc.elements[2].name, "videoconvert1");
    Ok(())
}

#[test]
fn test_overlay_properties() -> anyhow::Result<()> {
    let desc = parse("timeoverlay halignment=right valignment=bottom font-size=24")?;
    assert_eq!(desc.elements[0].property("halignment"), Some("right"));
    assert_eq!(desc.elements[0].property("font-size"), Some("24"));
    Ok(())
}

#[test]
fn test_parse_errors() {
    let cases: &[(&str, ParseError)] = &[
        ("", ParseError::Empty),
        ("   \n ", ParseError::Empty),
        ("! decodebin", ParseError::DanglingLink),
        ("filesrc location=a ! ! decodebin", ParseError::DoubledLink),
        (
            "filesrc location=a !",
            ParseError::UnterminatedLink("filesrc".to_string()),
        ),
        (
            "location=a filesrc",
            ParseError::PropertyBeforeElement("location".to_string()),
        ),
        ("videoscale", ParseError::UnknownElement("videoscale".to_string())),
        (
            "decodebin location=a",
            ParseError::UnknownProperty {
                element: "decodebin".to_string(),
                property: "location".to_string(),
            },
        ),
        (
            "filesrc name=src",
            ParseError::MissingProperty {
                element: "src".to_string(),
                property: "location".to_string(),
            },
        ),
        (
            "decodebin name=x encodebin name=x",
            ParseError::DuplicateName("x".to_string()),
        ),
        (
            "timeoverlay halignment=middle",
            ParseError::InvalidValue {
                element: "timeoverlay".to_string(),
                property: "halignment".to_string(),
                value: "middle".to_string(),
            },
        ),
        (
            "decodebin name=d ! encodebin",
            ParseError::InvalidLink {
                src: "d".to_string(),
                sink: "encodebin0".to_string(),
            },
        ),
        (
            "filesrc location=a ! videoconvert",
            ParseError::InvalidLink {
                src: "filesrc0".to_string(),
                sink: "videoconvert0".to_string(),
            },
        ),
    ];
    for (desc, expected) in cases {
        assert_eq!(parse(desc).as_ref(), Err(expected), "description {:?}", desc);
    }
}

#[test]
fn test_malformed_quoting() {
    assert!(matches!(
        parse(r#"filesrc location="unterminated"#),
        Err(ParseError::Quoting(_))
    ));
    assert!(matches!(
        parse(r#"filesrc location="bad \n escape""#),
        Err(ParseError::Quoting(_))
    ));
    assert!(matches!(parse("filesrc =a"), Err(ParseError::Quoting(_))));
}
