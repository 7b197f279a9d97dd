//! Normalized reaction emoji identity.
//!
//! Unicode emoji compare by their codepoints with variation selectors
//! removed, custom emoji compare by their numeric id only (the name and the
//! animated flag are presentation).
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use thiserror::Error;

const VARIATION_SELECTOR: char = '\u{fe0f}';

static MENTION_FORM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^<(a?):(\w{1,32}):(\d{1,20})>$").expect("valid emoji regex"));
static API_FORM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(a:)?(\w{1,32}):(\d{1,20})$").expect("valid emoji regex"));

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EmojiParseError {
    #[error("emoji must not be empty")]
    Empty,
    #[error("'{0}' is neither a unicode emoji nor a custom emoji reference")]
    Unrecognized(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum EmojiRef {
    Unicode(String),
    Custom { name: String, id: u64, animated: bool },
}

impl EmojiRef {
    pub fn unicode(value: impl Into<String>) -> Self {
        EmojiRef::Unicode(value.into())
    }

    pub fn custom(name: impl Into<String>, id: u64) -> Self {
        EmojiRef::Custom {
            name: name.into(),
            id,
            animated: false,
        }
    }

    /// Form used in REST paths: the raw codepoints, or `name:id`.
    pub fn api_path(&self) -> String {
        match self {
            EmojiRef::Unicode(value) => value.clone(),
            EmojiRef::Custom { name, id, .. } => format!("{}:{}", name, id),
        }
    }

    fn significant_chars(value: &str) -> impl Iterator<Item = char> + '_ {
        value.chars().filter(|c| *c != VARIATION_SELECTOR)
    }
}

impl PartialEq for EmojiRef {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (EmojiRef::Unicode(a), EmojiRef::Unicode(b)) => {
                Self::significant_chars(a).eq(Self::significant_chars(b))
            }
            (EmojiRef::Custom { id: a, .. }, EmojiRef::Custom { id: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl Eq for EmojiRef {}

impl Hash for EmojiRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            EmojiRef::Unicode(value) => {
                0u8.hash(state);
                for c in Self::significant_chars(value) {
                    c.hash(state);
                }
            }
            EmojiRef::Custom { id, .. } => {
                1u8.hash(state);
                id.hash(state);
            }
        }
    }
}

impl Ord for EmojiRef {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (EmojiRef::Unicode(a), EmojiRef::Unicode(b)) => {
                Self::significant_chars(a).cmp(Self::significant_chars(b))
            }
            (EmojiRef::Custom { id: a, .. }, EmojiRef::Custom { id: b, .. }) => a.cmp(b),
            (EmojiRef::Unicode(_), EmojiRef::Custom { .. }) => Ordering::Less,
            (EmojiRef::Custom { .. }, EmojiRef::Unicode(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for EmojiRef {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for EmojiRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmojiRef::Unicode(value) => f.write_str(value),
            EmojiRef::Custom { name, id, animated } => {
                let prefix = if *animated { "a" } else { "" };
                write!(f, "<{}:{}:{}>", prefix, name, id)
            }
        }
    }
}

impl FromStr for EmojiRef {
    type Err = EmojiParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(EmojiParseError::Empty);
        }
        if let Some(caps) = MENTION_FORM.captures(s) {
            return custom_from_captures(s, &caps[1] == "a", &caps[2], &caps[3]);
        }
        if let Some(caps) = API_FORM.captures(s) {
            return custom_from_captures(s, caps.get(1).is_some(), &caps[2], &caps[3]);
        }
        // Plain ASCII text is a typo for a shortcode, never an emoji.
        if s.is_ascii() || s.chars().any(char::is_whitespace) {
            return Err(EmojiParseError::Unrecognized(s.to_string()));
        }
        Ok(EmojiRef::Unicode(s.to_string()))
    }
}

fn custom_from_captures(
    raw: &str,
    animated: bool,
    name: &str,
    id: &str,
) -> Result<EmojiRef, EmojiParseError> {
    let id = id
        .parse::<u64>()
        .map_err(|_| EmojiParseError::Unrecognized(raw.to_string()))?;
    Ok(EmojiRef::Custom {
        name: name.to_string(),
        id,
        animated,
    })
}

impl TryFrom<String> for EmojiRef {
    type Error = EmojiParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EmojiRef> for String {
    fn from(value: EmojiRef) -> Self {
        value.to_string()
    }
}
