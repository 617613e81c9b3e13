//! Launch descriptions: `filesrc location="a.mkv" ! decodebin name=d`.
//!
//! Tokens are separated by whitespace. A bare word starts an element, `key=value`
//! sets a property on the most recent element and `!` links the previous element
//! to the next one. An element not preceded by `!` starts a new chain.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    FileSrc,
    DecodeBin,
    EncodeBin,
    FileSink,
    VideoConvert,
    TimeOverlay,
}

impl ElementKind {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "filesrc" => ElementKind::FileSrc,
            "decodebin" => ElementKind::DecodeBin,
            "encodebin" => ElementKind::EncodeBin,
            "filesink" => ElementKind::FileSink,
            "videoconvert" => ElementKind::VideoConvert,
            "timeoverlay" => ElementKind::TimeOverlay,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            ElementKind::FileSrc => "filesrc",
            ElementKind::DecodeBin => "decodebin",
            ElementKind::EncodeBin => "encodebin",
            ElementKind::FileSink => "filesink",
            ElementKind::VideoConvert => "videoconvert",
            ElementKind::TimeOverlay => "timeoverlay",
        }
    }

    fn properties(&self) -> &'static [&'static str] {
        match self {
            ElementKind::FileSrc | ElementKind::FileSink => &["name", "location"],
            ElementKind::TimeOverlay => &["name", "halignment", "valignment", "font-file", "font-size"],
            ElementKind::DecodeBin | ElementKind::EncodeBin | ElementKind::VideoConvert => &["name"],
        }
    }

    fn required(&self) -> &'static [&'static str] {
        match self {
            ElementKind::FileSrc | ElementKind::FileSink => &["location"],
            _ => &[],
        }
    }

    pub fn is_video_filter(&self) -> bool {
        matches!(self, ElementKind::VideoConvert | ElementKind::TimeOverlay)
    }

    /// Static links allowed by the element set; decodebin outputs are dynamic.
    fn can_link(&self, sink: ElementKind) -> bool {
        match (self, sink) {
            (ElementKind::FileSrc, ElementKind::DecodeBin) => true,
            (ElementKind::EncodeBin, ElementKind::FileSink) => true,
            (a, b) => a.is_video_filter() && b.is_video_filter(),
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty pipeline description")]
    Empty,
    #[error("link without a source element")]
    DanglingLink,
    #[error("link without a sink element after {0}")]
    UnterminatedLink(String),
    #[error("doubled link")]
    DoubledLink,
    #[error("property {0} set before any element")]
    PropertyBeforeElement(String),
    #[error("no element {0:?}")]
    UnknownElement(String),
    #[error("no property {property:?} in element {element}")]
    UnknownProperty { element: String, property: String },
    #[error("invalid value {value:?} for property {property:?} of element {element}")]
    InvalidValue {
        element: String,
        property: String,
        value: String,
    },
    #[error("element {element} requires property {property:?}")]
    MissingProperty { element: String, property: String },
    #[error("duplicate element name {0:?}")]
    DuplicateName(String),
    #[error("malformed quoting: {0}")]
    Quoting(String),
    #[error("cannot link {src} to {sink}")]
    InvalidLink { src: String, sink: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementDesc {
    pub kind: ElementKind,
    pub name: String,
    pub properties: BTreeMap<String, String>,
}

impl ElementDesc {
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

/// Parsed description: elements in order and static links between them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchDesc {
    pub elements: Vec<ElementDesc>,
    pub links: Vec<(usize, usize)>,
}

#[derive(Debug, PartialEq, Eq)]
enum Token {
    Link,
    Word(String),
    Property(String, String),
}

fn tokenize(desc: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut chars = desc.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if c == '!' {
            chars.next();
            tokens.push(Token::Link);
            continue;
        }

        let mut buf = String::new();
        let mut key: Option<String> = None;
        while let Some(&c) = chars.peek() {
            if c.is_whitespace() || c == '!' {
                break;
            }
            chars.next();
            match c {
                '"' => loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(e @ ('"' | '\\')) => buf.push(e),
                            Some(other) => {
                                return Err(ParseError::Quoting(format!(
                                    "unknown escape \\{} in {:?}",
                                    other, desc
                                )));
                            }
                            None => {
                                return Err(ParseError::Quoting(format!(
                                    "unterminated escape in {:?}",
                                    desc
                                )));
                            }
                        },
                        Some(other) => buf.push(other),
                        None => {
                            return Err(ParseError::Quoting(format!(
                                "unterminated quote in {:?}",
                                desc
                            )));
                        }
                    }
                },
                '=' if key.is_none() => {
                    if buf.is_empty() {
                        return Err(ParseError::Quoting(format!("empty property name in {:?}", desc)));
                    }
                    key = Some(std::mem::take(&mut buf));
                }
                c => buf.push(c),
            }
        }

        tokens.push(match key {
            Some(key) => Token::Property(key, buf),
            None => Token::Word(buf),
        });
    }
    Ok(tokens)
}

fn validate_value(kind: ElementKind, element: &str, key: &str, value: &str) -> Result<(), ParseError> {
    let ok = match (kind, key) {
        (ElementKind::TimeOverlay, "halignment") => matches!(value, "left" | "center" | "right"),
        (ElementKind::TimeOverlay, "valignment") => matches!(value, "top" | "center" | "bottom"),
        (ElementKind::TimeOverlay, "font-size") => value.parse::<u32>().is_ok_and(|s| s > 0),
        (_, "name") | (_, "location") => !value.is_empty(),
        _ => true,
    };
    if ok {
        Ok(())
    } else {
        Err(ParseError::InvalidValue {
            element: element.to_string(),
            property: key.to_string(),
            value: value.to_string(),
        })
    }
}

pub fn parse(desc: &str) -> Result<LaunchDesc, ParseError> {
    let tokens = tokenize(desc)?;
    if tokens.is_empty() {
        return Err(ParseError::Empty);
    }

    let mut elements: Vec<(ElementKind, BTreeMap<String, String>)> = Vec::new();
    let mut links = Vec::new();
    let mut pending_link = false;

    for token in tokens {
        match token {
            Token::Link => {
                if pending_link {
                    return Err(ParseError::DoubledLink);
                }
                if elements.is_empty() {
                    return Err(ParseError::DanglingLink);
                }
                pending_link = true;
            }
            Token::Word(word) => {
                let kind = ElementKind::from_name(&word).ok_or(ParseError::UnknownElement(word))?;
                elements.push((kind, BTreeMap::new()));
                if pending_link {
                    links.push((elements.len() - 2, elements.len() - 1));
                    pending_link = false;
                }
            }
            Token::Property(key, value) => {
                let Some((kind, properties)) = elements.last_mut() else {
                    return Err(ParseError::PropertyBeforeElement(key));
                };
                if pending_link {
                    return Err(ParseError::UnterminatedLink(kind.name().to_string()));
                }
                if !kind.properties().contains(&key.as_str()) {
                    return Err(ParseError::UnknownProperty {
                        element: kind.name().to_string(),
                        property: key,
                    });
                }
                validate_value(*kind, kind.name(), &key, &value)?;
                properties.insert(key, value);
            }
        }
    }
    if pending_link {
        let last = elements.last().map(|(k, _)| k.name()).unwrap_or_default();
        return Err(ParseError::UnterminatedLink(last.to_string()));
    }

    // unnamed elements are numbered per kind
    let mut counters: HashMap<ElementKind, usize> = HashMap::new();
    let mut names = HashSet::new();
    let mut descs = Vec::with_capacity(elements.len());
    for (kind, mut properties) in elements {
        let name = match properties.remove("name") {
            Some(name) => name,
            None => {
                let n = counters.entry(kind).or_insert(0);
                let name = format!("{}{}", kind.name(), n);
                *n += 1;
                name
            }
        };
        if !names.insert(name.clone()) {
            return Err(ParseError::DuplicateName(name));
        }
        for required in kind.required() {
            if !properties.contains_key(*required) {
                return Err(ParseError::MissingProperty {
                    element: name,
                    property: required.to_string(),
                });
            }
        }
        descs.push(ElementDesc {
            kind,
            name,
            properties,
        });
    }

    for &(src, sink) in &links {
        if !descs[src].kind.can_link(descs[sink].kind) {
            return Err(ParseError::InvalidLink {
                src: descs[src].name.clone(),
                sink: descs[sink].name.clone(),
            });
        }
    }

    Ok(LaunchDesc {
        elements: descs,
        links,
    })
}

/// Quotes `value` for use in a launch description.
pub fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

#[cfg(test)]
#[path = "parse_test.rs"]
mod parse_test;
