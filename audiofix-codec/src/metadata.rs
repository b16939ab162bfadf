use audiofix_core::artwork::CoverArt;
use audiofix_core::error::{FixtureError, Result};
use audiofix_core::format::ContainerFormat;
use audiofix_core::tags::{TagKey, TagSet};
use camino::Utf8Path;
use lofty::config::WriteOptions;
use lofty::file::FileType;
use lofty::picture::{MimeType, Picture, PictureType};
use lofty::prelude::*;
use lofty::probe::Probe;
use lofty::tag::{Tag, TagType};
use std::io::Cursor;
use tracing::debug;

/// Writes and reads container-native tags on in-memory fixture images
///
/// Tagging never touches the audio payload: lofty rewrites only the tag
/// block (Vorbis comments, ID3v2 frames or the MP4 `ilst` atom).
#[derive(Debug, Copy, Clone)]
pub struct MetadataInjector;

impl MetadataInjector {
    /// Tag container used for each format
    pub fn tag_type_for(format: ContainerFormat) -> TagType {
        match format {
            ContainerFormat::Flac | ContainerFormat::Ogg | ContainerFormat::Opus => {
                TagType::VorbisComments
            }
            ContainerFormat::Mp3 | ContainerFormat::Wav => TagType::Id3v2,
            ContainerFormat::M4a => TagType::Mp4Ilst,
        }
    }

    /// Replace any tags in `bytes` with exactly `tags`
    pub fn apply(bytes: Vec<u8>, format: ContainerFormat, tags: &TagSet) -> Result<Vec<u8>> {
        let tag_type = Self::tag_type_for(format);
        let mut tag = Tag::new(tag_type);

        for (key, value) in tags.iter() {
            if !tag.insert_text(item_key(key), value.to_string()) {
                return Err(FixtureError::Tag(format!(
                    "{key} cannot be stored in {tag_type:?}"
                )));
            }
        }

        if let Some(cover) = tags.cover() {
            tag.push_picture(Picture::new_unchecked(
                PictureType::CoverFront,
                Some(MimeType::Png),
                None,
                cover.render()?,
            ));
        }

        let mut cursor = Cursor::new(bytes);
        tag.save_to(&mut cursor, WriteOptions::default())
            .map_err(|e| FixtureError::Tag(format!("Failed to write {tag_type:?} tag: {e}")))?;

        debug!("Wrote {} tag fields as {:?}", tags.len(), tag_type);
        Ok(cursor.into_inner())
    }

    /// Read the tag fields the injector knows about from a fixture image
    pub fn read(bytes: &[u8]) -> Result<TagSet> {
        let tagged_file = Probe::new(Cursor::new(bytes))
            .guess_file_type()
            .map_err(|e| FixtureError::Tag(format!("Failed to probe file: {e}")))?
            .read()
            .map_err(|e| FixtureError::Tag(format!("Failed to read file: {e}")))?;

        let tag = expected_tag_type(tagged_file.file_type())
            .and_then(|tag_type| tagged_file.tag(tag_type))
            .or_else(|| tagged_file.primary_tag())
            .or_else(|| tagged_file.first_tag());

        let Some(tag) = tag else {
            return Ok(TagSet::new());
        };

        let mut tags: TagSet = TagKey::ALL
            .into_iter()
            .filter_map(|key| {
                tag.get_string(&item_key(key))
                    .map(|value| (key, value.to_string()))
            })
            .collect();
        tags.set_cover(read_cover(tag)?);
        Ok(tags)
    }

    pub fn read_file(path: &Utf8Path) -> Result<TagSet> {
        let bytes = std::fs::read(path)
            .map_err(|e| FixtureError::Tag(format!("Failed to read {path}: {e}")))?;
        Self::read(&bytes)
    }
}

/// MP4 does not store a picture type, so fall back to the first picture
fn read_cover(tag: &Tag) -> Result<Option<CoverArt>> {
    let picture = tag
        .pictures()
        .iter()
        .find(|p| p.pic_type() == PictureType::CoverFront)
        .or_else(|| tag.pictures().first());

    let Some(picture) = picture else {
        return Ok(None);
    };
    CoverArt::from_png(picture.data()).map(Some).ok_or_else(|| {
        FixtureError::TagRoundTripMismatch(format!(
            "embedded picture ({} bytes) is not a rendered cover",
            picture.data().len()
        ))
    })
}

fn expected_tag_type(file_type: FileType) -> Option<TagType> {
    match file_type {
        FileType::Flac | FileType::Vorbis | FileType::Opus => Some(TagType::VorbisComments),
        FileType::Mpeg | FileType::Wav => Some(TagType::Id3v2),
        FileType::Mp4 => Some(TagType::Mp4Ilst),
        _ => None,
    }
}

fn item_key(key: TagKey) -> ItemKey {
    match key {
        TagKey::Title => ItemKey::TrackTitle,
        TagKey::Artist => ItemKey::TrackArtist,
        TagKey::Album => ItemKey::AlbumTitle,
        TagKey::AlbumArtist => ItemKey::AlbumArtist,
        TagKey::Genre => ItemKey::Genre,
        TagKey::Date => ItemKey::RecordingDate,
        TagKey::TrackNumber => ItemKey::TrackNumber,
        TagKey::DiscNumber => ItemKey::DiscNumber,
        TagKey::Composer => ItemKey::Composer,
        TagKey::Comment => ItemKey::Comment,
    }
}
