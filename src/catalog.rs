//! Media metadata: models, repository contracts, and the JSON-backed
//! catalog implementing them.
//!
//! The crypto core only consumes the repository traits; the catalog is
//! the in-crate implementation the CLI and tests run against. It stands
//! in for the relational metadata store, whose schema is out of scope.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::VaultResult;
use crate::fsutil;

/// Declared media kind of an imported object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Jpeg,
    Png,
    Gif,
    Webp,
    Mp4,
    Mov,
}

impl MediaKind {
    pub fn is_video(self) -> bool {
        matches!(self, MediaKind::Mp4 | MediaKind::Mov)
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(MediaKind::Jpeg),
            "png" => Some(MediaKind::Png),
            "gif" => Some(MediaKind::Gif),
            "webp" => Some(MediaKind::Webp),
            "mp4" => Some(MediaKind::Mp4),
            "mov" => Some(MediaKind::Mov),
            _ => None,
        }
    }
}

/// One imported media object. Blobs are located through its identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaObject {
    pub identifier: String,
    pub display_name: String,
    pub kind: MediaKind,
    pub size_bytes: u64,
    /// Epoch millis of the local import (restore stamps this anew).
    pub imported_at: i64,
    /// Epoch millis of the original capture, when known.
    pub captured_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Album {
    pub identifier: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlbumPhotoRef {
    pub album_identifier: String,
    pub photo_identifier: String,
}

/// Ordered-insert sink and full-scan source for media objects.
pub trait PhotoRepository {
    fn insert(&mut self, media: MediaObject) -> VaultResult<()>;
    fn find_all(&self) -> VaultResult<Vec<MediaObject>>;
    fn delete(&mut self, identifier: &str) -> VaultResult<()>;
}

/// Album reconstruction sink used by restore.
pub trait AlbumRepository {
    fn create_album(&mut self, album: Album) -> VaultResult<()>;
    fn link(&mut self, link: AlbumPhotoRef) -> VaultResult<()>;
    fn photos_for_album(&self, album_identifier: &str) -> Vec<String>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogDoc {
    photos: Vec<MediaObject>,
    albums: Vec<Album>,
    album_photo_refs: Vec<AlbumPhotoRef>,
}

/// JSON-file-backed catalog; every mutation is written through
/// crash-safely.
pub struct Catalog {
    path: PathBuf,
    doc: CatalogDoc,
}

impl Catalog {
    pub fn open<P: Into<PathBuf>>(path: P) -> VaultResult<Self> {
        let path = path.into();
        let doc = if path.exists() {
            serde_json::from_slice(&std::fs::read(&path)?)?
        } else {
            CatalogDoc::default()
        };
        Ok(Self { path, doc })
    }

    pub fn find(&self, identifier: &str) -> Option<&MediaObject> {
        self.doc.photos.iter().find(|p| p.identifier == identifier)
    }

    pub fn len(&self) -> usize {
        self.doc.photos.len()
    }

    pub fn albums(&self) -> &[Album] {
        &self.doc.albums
    }

    pub fn album_refs(&self) -> &[AlbumPhotoRef] {
        &self.doc.album_photo_refs
    }

    pub fn is_empty(&self) -> bool {
        self.doc.photos.is_empty()
    }

    fn save(&self) -> VaultResult<()> {
        fsutil::atomic_write(&self.path, &serde_json::to_vec_pretty(&self.doc)?)
    }
}

impl PhotoRepository for Catalog {
    fn insert(&mut self, media: MediaObject) -> VaultResult<()> {
        // Upsert: a restore over existing data replaces the record.
        self.doc
            .photos
            .retain(|p| p.identifier != media.identifier);
        self.doc.photos.push(media);
        self.save()
    }

    fn find_all(&self) -> VaultResult<Vec<MediaObject>> {
        Ok(self.doc.photos.clone())
    }

    fn delete(&mut self, identifier: &str) -> VaultResult<()> {
        self.doc.photos.retain(|p| p.identifier != identifier);
        self.doc
            .album_photo_refs
            .retain(|r| r.photo_identifier != identifier);
        self.save()
    }
}

impl AlbumRepository for Catalog {
    fn create_album(&mut self, album: Album) -> VaultResult<()> {
        self.doc
            .albums
            .retain(|a| a.identifier != album.identifier);
        self.doc.albums.push(album);
        self.save()
    }

    fn link(&mut self, link: AlbumPhotoRef) -> VaultResult<()> {
        if !self.doc.album_photo_refs.contains(&link) {
            self.doc.album_photo_refs.push(link);
        }
        self.save()
    }

    fn photos_for_album(&self, album_identifier: &str) -> Vec<String> {
        self.doc
            .album_photo_refs
            .iter()
            .filter(|r| r.album_identifier == album_identifier)
            .map(|r| r.photo_identifier.clone())
            .collect()
    }
}
