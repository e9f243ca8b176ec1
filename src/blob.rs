//! Blob kinds and the blob naming grammar.
//!
//! Every media object owns up to three encrypted blobs, named:
//!
//! ```text
//! <identifier>.pxc        primary content
//! <identifier>.pxc.tn     thumbnail
//! <identifier>.pxc.vp     video preview (video objects only)
//! ```
//!
//! Archive entries and vault files both carry these names. Parsing is
//! strict: an entry either matches the grammar exactly or it is not a
//! blob, which rules out false matches between similar identifiers.

use std::fmt;

use crate::error::{VaultError, VaultResult};

/// Suffix of the primary content blob.
pub const CONTENT_SUFFIX: &str = "pxc";
/// Extra suffix of the thumbnail blob.
pub const THUMBNAIL_SUFFIX: &str = "tn";
/// Extra suffix of the video preview blob.
pub const PREVIEW_SUFFIX: &str = "vp";

/// The physical blob kinds belonging to one media object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlobKind {
    Content,
    Thumbnail,
    VideoPreview,
}

/// A parsed `(identifier, kind)` blob name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobName {
    identifier: String,
    kind: BlobKind,
}

impl BlobName {
    pub fn new(identifier: &str, kind: BlobKind) -> Self {
        Self {
            identifier: identifier.to_owned(),
            kind,
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn kind(&self) -> BlobKind {
        self.kind
    }

    /// Parses an entry name against the blob grammar.
    ///
    /// Anything that does not parse exactly is rejected, including
    /// names that merely *contain* an identifier.
    pub fn parse(name: &str) -> VaultResult<Self> {
        let bad = || VaultError::BadBlobName(name.to_owned());

        let (identifier, rest) = name.split_once('.').ok_or_else(bad)?;
        if identifier.is_empty()
            || !identifier
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(bad());
        }

        let kind = match rest {
            _ if rest == CONTENT_SUFFIX => BlobKind::Content,
            _ if rest == format!("{CONTENT_SUFFIX}.{THUMBNAIL_SUFFIX}") => BlobKind::Thumbnail,
            _ if rest == format!("{CONTENT_SUFFIX}.{PREVIEW_SUFFIX}") => BlobKind::VideoPreview,
            _ => return Err(bad()),
        };

        Ok(Self {
            identifier: identifier.to_owned(),
            kind,
        })
    }
}

impl fmt::Display for BlobName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            BlobKind::Content => write!(f, "{}.{CONTENT_SUFFIX}", self.identifier),
            BlobKind::Thumbnail => {
                write!(f, "{}.{CONTENT_SUFFIX}.{THUMBNAIL_SUFFIX}", self.identifier)
            }
            BlobKind::VideoPreview => {
                write!(f, "{}.{CONTENT_SUFFIX}.{PREVIEW_SUFFIX}", self.identifier)
            }
        }
    }
}
