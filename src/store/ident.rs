//! Catalog identifiers.
//!
//! Every per-source record is addressed by an [`Ident`] of the form
//! `<namespace>/<source-local-id>`. Namespaces are two-character tags, each bound to
//! exactly one per-source table. The registry below is the only place that mapping
//! lives; persisted data depends on it, so existing tags must never change.

use super::link::LinkKind;
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Canonical entity kinds produced by the unifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Artist,
    Album,
    Track,
}

impl EntityKind {
    /// Table holding the canonical rows.
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::Artist => "artist",
            EntityKind::Album => "album",
            EntityKind::Track => "track",
        }
    }

    /// Foreign key column on per-source tables pointing into [`Self::table`].
    pub fn id_column(&self) -> &'static str {
        match self {
            EntityKind::Artist => "artist_id",
            EntityKind::Album => "album_id",
            EntityKind::Track => "track_id",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Namespace {
    YoutubeVideo,
    YoutubeChannel,
    SpotifyTrack,
    SpotifyAlbum,
    SpotifyArtist,
    VocadbSong,
    VocadbAlbum,
    VocadbArtist,
    KarentAlbum,
    KarentArtist,
}

pub struct NamespaceDescriptor {
    pub namespace: Namespace,
    pub tag: &'static str,
    pub table: &'static str,
    pub entity: EntityKind,
    /// Link kind whose `data` addresses a record of this namespace.
    pub link_kind: LinkKind,
}

// Order must follow the `Namespace` discriminants.
const DESCRIPTORS: &[NamespaceDescriptor] = &[
    NamespaceDescriptor {
        namespace: Namespace::YoutubeVideo,
        tag: "yv",
        table: "youtube_video",
        entity: EntityKind::Track,
        link_kind: LinkKind::YtVideoId,
    },
    NamespaceDescriptor {
        namespace: Namespace::YoutubeChannel,
        tag: "yc",
        table: "youtube_channel",
        entity: EntityKind::Artist,
        link_kind: LinkKind::YtChannelId,
    },
    NamespaceDescriptor {
        namespace: Namespace::SpotifyTrack,
        tag: "sa",
        table: "spotify_track",
        entity: EntityKind::Track,
        link_kind: LinkKind::SpTrackId,
    },
    NamespaceDescriptor {
        namespace: Namespace::SpotifyAlbum,
        tag: "sb",
        table: "spotify_album",
        entity: EntityKind::Album,
        link_kind: LinkKind::SpAlbumId,
    },
    NamespaceDescriptor {
        namespace: Namespace::SpotifyArtist,
        tag: "sr",
        table: "spotify_artist",
        entity: EntityKind::Artist,
        link_kind: LinkKind::SpArtistId,
    },
    NamespaceDescriptor {
        namespace: Namespace::VocadbSong,
        tag: "vs",
        table: "vocadb_song",
        entity: EntityKind::Track,
        link_kind: LinkKind::VdSongId,
    },
    NamespaceDescriptor {
        namespace: Namespace::VocadbAlbum,
        tag: "va",
        table: "vocadb_album",
        entity: EntityKind::Album,
        link_kind: LinkKind::VdAlbumId,
    },
    NamespaceDescriptor {
        namespace: Namespace::VocadbArtist,
        tag: "vr",
        table: "vocadb_artist",
        entity: EntityKind::Artist,
        link_kind: LinkKind::VdArtistId,
    },
    NamespaceDescriptor {
        namespace: Namespace::KarentAlbum,
        tag: "ka",
        table: "karent_album",
        entity: EntityKind::Album,
        link_kind: LinkKind::KaAlbumId,
    },
    NamespaceDescriptor {
        namespace: Namespace::KarentArtist,
        tag: "kr",
        table: "karent_artist",
        entity: EntityKind::Artist,
        link_kind: LinkKind::KaArtistId,
    },
];

lazy_static! {
    static ref BY_TAG: HashMap<&'static str, Namespace> =
        DESCRIPTORS.iter().map(|d| (d.tag, d.namespace)).collect();
    static ref BY_TABLE: HashMap<&'static str, Namespace> =
        DESCRIPTORS.iter().map(|d| (d.table, d.namespace)).collect();
    static ref BY_LINK_KIND: HashMap<LinkKind, Namespace> =
        DESCRIPTORS.iter().map(|d| (d.link_kind, d.namespace)).collect();
}

impl Namespace {
    pub fn descriptor(self) -> &'static NamespaceDescriptor {
        &DESCRIPTORS[self as usize]
    }

    pub fn tag(self) -> &'static str {
        self.descriptor().tag
    }

    pub fn table(self) -> &'static str {
        self.descriptor().table
    }

    pub fn entity(self) -> EntityKind {
        self.descriptor().entity
    }

    pub fn link_kind(self) -> LinkKind {
        self.descriptor().link_kind
    }

    pub fn from_tag(tag: &str) -> Option<Namespace> {
        BY_TAG.get(tag).copied()
    }

    pub fn from_table(table: &str) -> Option<Namespace> {
        BY_TABLE.get(table).copied()
    }

    /// Namespace addressed by a link of the given kind, if any.
    pub fn from_link_kind(kind: LinkKind) -> Option<Namespace> {
        BY_LINK_KIND.get(&kind).copied()
    }

    pub fn all() -> impl Iterator<Item = Namespace> {
        DESCRIPTORS.iter().map(|d| d.namespace)
    }

    /// Namespaces whose records may anchor a canonical entity of `kind`.
    pub fn for_entity(kind: EntityKind) -> Vec<Namespace> {
        Self::all().filter(|ns| ns.entity() == kind).collect()
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentError {
    #[error("Malformed ident '{0}', expected <namespace>/<id>")]
    Malformed(String),
    #[error("Unknown namespace '{0}'")]
    UnknownNamespace(String),
}

/// Identifier of one per-source record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ident {
    namespace: Namespace,
    id: String,
}

impl Ident {
    pub fn new(namespace: Namespace, id: impl Into<String>) -> Self {
        Self {
            namespace,
            id: id.into(),
        }
    }

    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    /// Source-local id, i.e. the primary key in the namespace's table.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn entity(&self) -> EntityKind {
        self.namespace.entity()
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace.tag(), self.id)
    }
}

impl FromStr for Ident {
    type Err = IdentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (tag, id) = s
            .split_once('/')
            .ok_or_else(|| IdentError::Malformed(s.to_string()))?;
        if id.is_empty() {
            return Err(IdentError::Malformed(s.to_string()));
        }
        let namespace =
            Namespace::from_tag(tag).ok_or_else(|| IdentError::UnknownNamespace(tag.to_string()))?;
        Ok(Ident::new(namespace, id))
    }
}

impl TryFrom<String> for Ident {
    type Error = IdentError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Ident> for String {
    fn from(value: Ident) -> Self {
        value.to_string()
    }
}
