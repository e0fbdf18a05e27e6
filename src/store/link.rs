use super::ident::{Ident, Namespace};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed set of link kinds. Stored as the short tag returned by [`LinkKind::as_str`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    YtVideoId,
    YtChannelId,
    YtPlaylistId,
    SpTrackId,
    SpAlbumId,
    SpArtistId,
    VdSongId,
    VdAlbumId,
    VdArtistId,
    KaAlbumId,
    KaArtistId,
    NcVideoId,
    TwUser,
    PiCreator,
    /// `linkco.re/<slug>` distributor page.
    Linkcore,
    /// `lnk.to/<slug>`, or `<label>/<slug>` for `<label>.lnk.to/<slug>`.
    LnkTo,
    /// Raw URL not yet classified; `data` holds the URL.
    Unknown,
}

const ALL_KINDS: &[LinkKind] = &[
    LinkKind::YtVideoId,
    LinkKind::YtChannelId,
    LinkKind::YtPlaylistId,
    LinkKind::SpTrackId,
    LinkKind::SpAlbumId,
    LinkKind::SpArtistId,
    LinkKind::VdSongId,
    LinkKind::VdAlbumId,
    LinkKind::VdArtistId,
    LinkKind::KaAlbumId,
    LinkKind::KaArtistId,
    LinkKind::NcVideoId,
    LinkKind::TwUser,
    LinkKind::PiCreator,
    LinkKind::Linkcore,
    LinkKind::LnkTo,
    LinkKind::Unknown,
];

impl LinkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkKind::YtVideoId => "yt_video_id",
            LinkKind::YtChannelId => "yt_channel_id",
            LinkKind::YtPlaylistId => "yt_playlist_id",
            LinkKind::SpTrackId => "sp_track_id",
            LinkKind::SpAlbumId => "sp_album_id",
            LinkKind::SpArtistId => "sp_artist_id",
            LinkKind::VdSongId => "vd_song_id",
            LinkKind::VdAlbumId => "vd_album_id",
            LinkKind::VdArtistId => "vd_artist_id",
            LinkKind::KaAlbumId => "ka_album_id",
            LinkKind::KaArtistId => "ka_artist_id",
            LinkKind::NcVideoId => "nc_video_id",
            LinkKind::TwUser => "tw_user",
            LinkKind::PiCreator => "pi_creator",
            LinkKind::Linkcore => "linkcore",
            LinkKind::LnkTo => "lnk_to",
            LinkKind::Unknown => "unknown",
        }
    }

    pub fn all() -> &'static [LinkKind] {
        ALL_KINDS
    }

    /// Namespace of the record this link points at, for kinds that address a
    /// catalog we keep per-source records for.
    pub fn target_namespace(&self) -> Option<Namespace> {
        Namespace::from_link_kind(*self)
    }

    pub fn target_ident(&self, data: &str) -> Option<Ident> {
        self.target_namespace().map(|ns| Ident::new(ns, data))
    }
}

impl fmt::Display for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LinkKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL_KINDS
            .iter()
            .find(|k| k.as_str() == s)
            .copied()
            .ok_or_else(|| format!("Unknown link kind '{}'", s))
    }
}

/// A stored link row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub id: i64,
    pub ident: Ident,
    pub kind: LinkKind,
    pub data: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_round_trip() {
        for kind in LinkKind::all() {
            assert_eq!(kind.as_str().parse::<LinkKind>().unwrap(), *kind);
            let json = serde_json::to_string(kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
        assert!("yt_video".parse::<LinkKind>().is_err());
    }

    #[test]
    fn only_catalog_kinds_have_targets() {
        assert_eq!(
            LinkKind::SpAlbumId.target_ident("xyz").unwrap().to_string(),
            "sb/xyz"
        );
        assert_eq!(LinkKind::TwUser.target_namespace(), None);
        assert_eq!(LinkKind::YtPlaylistId.target_namespace(), None);
        assert_eq!(LinkKind::Unknown.target_namespace(), None);
    }
}
