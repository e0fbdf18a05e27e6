//! Database schema for the catalog db.
//!
//! One table per canonical entity kind, one table per source namespace (see
//! [`super::ident`]), plus links, locale text, backoff records, media sources,
//! images and interned fingerprints.

use crate::sqlite_column;
use crate::sqlite_persistence::{
    Column, ForeignKey, ForeignKeyOnChange, SqlType, Table, VersionedSchema,
};

const DEFAULT_TIMESTAMP: &str = "(cast(strftime('%s','now') as int))";

const ARTIST_FK: ForeignKey = ForeignKey {
    foreign_table: "artist",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::Restrict,
};

const ALBUM_FK: ForeignKey = ForeignKey {
    foreign_table: "album",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::Restrict,
};

const TRACK_FK: ForeignKey = ForeignKey {
    foreign_table: "track",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::Restrict,
};

const SOURCE_FK: ForeignKey = ForeignKey {
    foreign_table: "source",
    foreign_column: "hash",
    on_delete: ForeignKeyOnChange::Cascade,
};

const LINK_FK: ForeignKey = ForeignKey {
    foreign_table: "link",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::Cascade,
};

const FINGERPRINT_FK: ForeignKey = ForeignKey {
    foreign_table: "fingerprint",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::Restrict,
};

macro_rules! entity_table {
    ($name:expr) => {
        Table {
            name: $name,
            columns: &[
                sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
                sqlite_column!(
                    "created_at",
                    &SqlType::Integer,
                    non_null = true,
                    default_value = Some(DEFAULT_TIMESTAMP)
                ),
            ],
            indices: &[],
            unique_constraints: &[],
        }
    };
}

macro_rules! source_table {
    ($name:expr, $fk_column:expr, $fk:expr, $index:expr) => {
        Table {
            name: $name,
            columns: &[
                sqlite_column!("id", &SqlType::Text, is_primary_key = true),
                sqlite_column!("name", &SqlType::Text),
                sqlite_column!("meta", &SqlType::Text),
                sqlite_column!($fk_column, &SqlType::Integer, foreign_key = Some($fk)),
            ],
            indices: &[($index, $fk_column)],
            unique_constraints: &[],
        }
    };
}

const ARTIST_TABLE_V0: Table = entity_table!("artist");
const ALBUM_TABLE_V0: Table = entity_table!("album");
const TRACK_TABLE_V0: Table = entity_table!("track");

const YOUTUBE_VIDEO_TABLE_V0: Table =
    source_table!("youtube_video", "track_id", &TRACK_FK, "idx_youtube_video_track");
const YOUTUBE_CHANNEL_TABLE_V0: Table = source_table!(
    "youtube_channel",
    "artist_id",
    &ARTIST_FK,
    "idx_youtube_channel_artist"
);
const SPOTIFY_TRACK_TABLE_V0: Table =
    source_table!("spotify_track", "track_id", &TRACK_FK, "idx_spotify_track_track");
const SPOTIFY_ALBUM_TABLE_V0: Table =
    source_table!("spotify_album", "album_id", &ALBUM_FK, "idx_spotify_album_album");
const SPOTIFY_ARTIST_TABLE_V0: Table = source_table!(
    "spotify_artist",
    "artist_id",
    &ARTIST_FK,
    "idx_spotify_artist_artist"
);
const VOCADB_SONG_TABLE_V0: Table =
    source_table!("vocadb_song", "track_id", &TRACK_FK, "idx_vocadb_song_track");
const VOCADB_ALBUM_TABLE_V0: Table =
    source_table!("vocadb_album", "album_id", &ALBUM_FK, "idx_vocadb_album_album");
const VOCADB_ARTIST_TABLE_V0: Table = source_table!(
    "vocadb_artist",
    "artist_id",
    &ARTIST_FK,
    "idx_vocadb_artist_artist"
);
const KARENT_ALBUM_TABLE_V0: Table =
    source_table!("karent_album", "album_id", &ALBUM_FK, "idx_karent_album_album");
const KARENT_ARTIST_TABLE_V0: Table = source_table!(
    "karent_artist",
    "artist_id",
    &ARTIST_FK,
    "idx_karent_artist_artist"
);

const LINK_TABLE_V0: Table = Table {
    name: "link",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("ident", &SqlType::Text, non_null = true),
        sqlite_column!("kind", &SqlType::Text, non_null = true),
        sqlite_column!("data", &SqlType::Text, non_null = true),
    ],
    indices: &[
        ("idx_link_ident", "ident"),
        ("idx_link_kind_data", "kind, data"),
    ],
    unique_constraints: &[&["ident", "kind", "data"]],
};

/// Links whose distributor page was already read. Derived links live in `link`.
const LINK_EXPANSION_TABLE_V0: Table = Table {
    name: "link_expansion",
    columns: &[
        sqlite_column!(
            "link_id",
            &SqlType::Integer,
            is_primary_key = true,
            foreign_key = Some(&LINK_FK)
        ),
        sqlite_column!("derived", &SqlType::Integer, non_null = true),
    ],
    indices: &[],
    unique_constraints: &[],
};

/// `hash` stays NULL until the URL is downloaded into the media store.
const IMAGE_TABLE_V0: Table = Table {
    name: "image",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("ident", &SqlType::Text, non_null = true),
        sqlite_column!("kind", &SqlType::Text, non_null = true),
        sqlite_column!("url", &SqlType::Text, non_null = true),
        sqlite_column!("hash", &SqlType::Text),
        sqlite_column!("width", &SqlType::Integer),
        sqlite_column!("height", &SqlType::Integer),
    ],
    indices: &[("idx_image_ident", "ident"), ("idx_image_hash", "hash")],
    unique_constraints: &[&["ident", "url"]],
};

const LOCALE_TABLE_V0: Table = Table {
    name: "locale",
    columns: &[
        sqlite_column!("ident", &SqlType::Text, non_null = true),
        sqlite_column!("locale", &SqlType::Text, non_null = true),
        sqlite_column!("part", &SqlType::Text, non_null = true),
        sqlite_column!("text", &SqlType::Text, non_null = true),
    ],
    indices: &[],
    unique_constraints: &[&["ident", "locale", "part"]],
};

const BACKOFF_TABLE_V0: Table = Table {
    name: "backoff",
    columns: &[
        sqlite_column!("ident", &SqlType::Text, non_null = true),
        sqlite_column!("task", &SqlType::Integer, non_null = true),
        sqlite_column!("issued", &SqlType::Integer, non_null = true),
        sqlite_column!("expire", &SqlType::Integer),
    ],
    indices: &[],
    unique_constraints: &[&["ident", "task"]],
};

const FINGERPRINT_TABLE_V0: Table = Table {
    name: "fingerprint",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("digest", &SqlType::Text, non_null = true),
        sqlite_column!("frames", &SqlType::Blob, non_null = true),
        sqlite_column!("duration_s", &SqlType::Real, non_null = true),
    ],
    indices: &[],
    unique_constraints: &[&["digest"]],
};

const SOURCE_TABLE_V0: Table = Table {
    name: "source",
    columns: &[
        sqlite_column!("hash", &SqlType::Text, is_primary_key = true),
        sqlite_column!("ident", &SqlType::Text, non_null = true),
        sqlite_column!("bitrate", &SqlType::Integer, non_null = true),
        sqlite_column!("width", &SqlType::Integer),
        sqlite_column!("height", &SqlType::Integer),
        sqlite_column!("duration_s", &SqlType::Real),
        sqlite_column!(
            "fingerprint_id",
            &SqlType::Integer,
            foreign_key = Some(&FINGERPRINT_FK)
        ),
        sqlite_column!("track_id", &SqlType::Integer, foreign_key = Some(&TRACK_FK)),
        sqlite_column!("isrc", &SqlType::Text),
        sqlite_column!("foreign_song_id", &SqlType::Text),
        sqlite_column!(
            "created_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    indices: &[
        ("idx_source_ident", "ident"),
        ("idx_source_track", "track_id"),
        ("idx_source_duration", "duration_s"),
    ],
    unique_constraints: &[],
};

/// Every record a source was downloaded for. The first one is also `source.ident`.
const SOURCE_IDENT_TABLE_V0: Table = Table {
    name: "source_ident",
    columns: &[
        sqlite_column!("ident", &SqlType::Text, is_primary_key = true),
        sqlite_column!(
            "hash",
            &SqlType::Text,
            non_null = true,
            foreign_key = Some(&SOURCE_FK)
        ),
    ],
    indices: &[("idx_source_ident_hash", "hash")],
    unique_constraints: &[],
};

const ALBUM_TRACK_TABLE_V0: Table = Table {
    name: "album_track",
    columns: &[
        sqlite_column!(
            "album_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&ALBUM_FK)
        ),
        sqlite_column!(
            "track_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&TRACK_FK)
        ),
        sqlite_column!("disc", &SqlType::Integer, non_null = true),
        sqlite_column!("position", &SqlType::Integer, non_null = true),
    ],
    indices: &[("idx_album_track_album", "album_id")],
    unique_constraints: &[&["album_id", "track_id", "disc", "position"]],
};

const TRACK_ARTIST_TABLE_V0: Table = Table {
    name: "track_artist",
    columns: &[
        sqlite_column!(
            "track_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&TRACK_FK)
        ),
        sqlite_column!(
            "artist_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&ARTIST_FK)
        ),
        sqlite_column!("position", &SqlType::Integer, non_null = true),
    ],
    indices: &[],
    unique_constraints: &[&["track_id", "artist_id"]],
};

const KV_STORE_TABLE_V0: Table = Table {
    name: "kv_store",
    columns: &[
        sqlite_column!("key", &SqlType::Text, is_primary_key = true),
        sqlite_column!("value", &SqlType::Text, non_null = true),
    ],
    indices: &[],
    unique_constraints: &[],
};

pub const CATALOG_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[
        ARTIST_TABLE_V0,
        ALBUM_TABLE_V0,
        TRACK_TABLE_V0,
        YOUTUBE_VIDEO_TABLE_V0,
        YOUTUBE_CHANNEL_TABLE_V0,
        SPOTIFY_TRACK_TABLE_V0,
        SPOTIFY_ALBUM_TABLE_V0,
        SPOTIFY_ARTIST_TABLE_V0,
        VOCADB_SONG_TABLE_V0,
        VOCADB_ALBUM_TABLE_V0,
        VOCADB_ARTIST_TABLE_V0,
        KARENT_ALBUM_TABLE_V0,
        KARENT_ARTIST_TABLE_V0,
        LINK_TABLE_V0,
        LINK_EXPANSION_TABLE_V0,
        LOCALE_TABLE_V0,
        BACKOFF_TABLE_V0,
        FINGERPRINT_TABLE_V0,
        SOURCE_TABLE_V0,
        SOURCE_IDENT_TABLE_V0,
        IMAGE_TABLE_V0,
        ALBUM_TRACK_TABLE_V0,
        TRACK_ARTIST_TABLE_V0,
        KV_STORE_TABLE_V0,
    ],
    migration: None,
}];
