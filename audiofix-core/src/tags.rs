use crate::artwork::CoverArt;
use crate::error::{FixtureError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Tag fields a fixture may carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TagKey {
    Title,
    Artist,
    Album,
    AlbumArtist,
    Genre,
    Date,
    TrackNumber,
    DiscNumber,
    Composer,
    Comment,
}

impl TagKey {
    pub const ALL: [TagKey; 10] = [
        TagKey::Title,
        TagKey::Artist,
        TagKey::Album,
        TagKey::AlbumArtist,
        TagKey::Genre,
        TagKey::Date,
        TagKey::TrackNumber,
        TagKey::DiscNumber,
        TagKey::Composer,
        TagKey::Comment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TagKey::Title => "title",
            TagKey::Artist => "artist",
            TagKey::Album => "album",
            TagKey::AlbumArtist => "album_artist",
            TagKey::Genre => "genre",
            TagKey::Date => "date",
            TagKey::TrackNumber => "track_number",
            TagKey::DiscNumber => "disc_number",
            TagKey::Composer => "composer",
            TagKey::Comment => "comment",
        }
    }

    /// Keys whose value is stored as an integer by some containers
    pub fn is_numeric(&self) -> bool {
        matches!(self, TagKey::TrackNumber | TagKey::DiscNumber)
    }
}

impl fmt::Display for TagKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TagKey {
    type Err = FixtureError;

    fn from_str(s: &str) -> Result<Self> {
        TagKey::ALL
            .into_iter()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| FixtureError::Config(format!("Unknown tag key: {s}")))
    }
}

impl TryFrom<String> for TagKey {
    type Error = FixtureError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<TagKey> for String {
    fn from(key: TagKey) -> Self {
        key.as_str().to_string()
    }
}

/// Ordered key -> value tag mapping, plus an optional front cover
///
/// Ordering is by key, so two sets with equal contents compare and serialize
/// identically regardless of insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagSet {
    #[serde(flatten)]
    fields: BTreeMap<TagKey, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cover: Option<CoverArt>,
}

impl TagSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: TagKey, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn with_cover(mut self, cover: CoverArt) -> Self {
        self.cover = Some(cover);
        self
    }

    pub fn insert(&mut self, key: TagKey, value: impl Into<String>) -> Option<String> {
        self.fields.insert(key, value.into())
    }

    pub fn get(&self, key: TagKey) -> Option<&str> {
        self.fields.get(&key).map(String::as_str)
    }

    pub fn cover(&self) -> Option<&CoverArt> {
        self.cover.as_ref()
    }

    pub fn set_cover(&mut self, cover: Option<CoverArt>) {
        self.cover = cover;
    }

    /// Text fields in key order
    pub fn iter(&self) -> impl Iterator<Item = (TagKey, &str)> {
        self.fields.iter().map(|(k, v)| (*k, v.as_str()))
    }

    /// Number of text fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.cover.is_none()
    }

    /// Reject values containers cannot store faithfully
    pub fn validate(&self) -> Result<()> {
        for (key, value) in self.iter() {
            if value.is_empty() {
                return Err(FixtureError::unsupported("tags", format!("empty value for {key}")));
            }
            if value.contains('\0') {
                return Err(FixtureError::unsupported("tags", format!("NUL byte in {key}")));
            }
            if key.is_numeric() && !matches!(value.parse::<u32>(), Ok(n) if n > 0) {
                return Err(FixtureError::unsupported(
                    "tags",
                    format!("{key} must be a positive integer, got {value:?}"),
                ));
            }
        }
        if let Some(cover) = &self.cover {
            cover.validate()?;
        }
        Ok(())
    }

    /// Describe keys that differ between two sets
    pub fn diff(&self, other: &TagSet) -> Vec<String> {
        let mut differences = Vec::new();
        for key in TagKey::ALL {
            let (ours, theirs) = (self.get(key), other.get(key));
            if ours != theirs {
                differences.push(format!("{key}: expected {ours:?}, got {theirs:?}"));
            }
        }
        if self.cover != other.cover {
            differences.push(format!(
                "cover: expected {:?}, got {:?}",
                self.cover, other.cover
            ));
        }
        differences
    }
}

impl FromIterator<(TagKey, String)> for TagSet {
    fn from_iter<I: IntoIterator<Item = (TagKey, String)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
            cover: None,
        }
    }
}

/// Standard metadata used by the default matrix
pub fn basic_tags() -> TagSet {
    TagSet::new()
        .with(TagKey::Title, "Test Song")
        .with(TagKey::Artist, "Test Artist")
        .with(TagKey::Album, "Test Album")
        .with(TagKey::Genre, "Rock")
        .with(TagKey::Date, "2024")
        .with(TagKey::TrackNumber, "1")
}

/// Title, artist and album only
pub fn minimal_tags() -> TagSet {
    TagSet::new()
        .with(TagKey::Title, "Test Song")
        .with(TagKey::Artist, "Test Artist")
        .with(TagKey::Album, "Test Album")
}

/// Every supported key
pub fn extended_tags() -> TagSet {
    basic_tags()
        .with(TagKey::AlbumArtist, "Test Album Artist")
        .with(TagKey::DiscNumber, "1")
        .with(TagKey::Composer, "Test Composer")
        .with(TagKey::Comment, "Generated reference fixture")
}

/// Basic tags with a 100x100 red front cover
pub fn artwork_tags() -> TagSet {
    basic_tags().with_cover(CoverArt::solid(100, 100, [255, 0, 0]))
}

/// Japanese, Russian, Greek and Arabic values
pub fn unicode_tags() -> TagSet {
    TagSet::new()
        .with(TagKey::Title, "テストソング")
        .with(TagKey::Artist, "Тестовый исполнитель")
        .with(TagKey::Album, "Τεστ Άλμπουμ")
        .with(TagKey::Genre, "الموسيقى")
}
