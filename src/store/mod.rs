//! Catalog persistence: identifiers, per-source records, links, locale text and
//! media sources.

mod catalog;
pub mod ident;
pub mod link;
pub mod images;
pub mod links;
pub mod locale;
pub mod records;
mod schema;
pub mod sources;

pub use catalog::CatalogStore;
pub use ident::{EntityKind, Ident, IdentError, Namespace};
pub use link::{Link, LinkKind};
pub use records::{AlbumTrackEntry, RecordMeta};
pub use sources::{FingerprintedSource, NewSource, SourceEvidence};
