//! Tasks that grow the catalog: metadata fetching, link classification, distributor
//! page expansion and extrapolating stubs from links.

pub mod classify;
pub mod distributors;
mod extrapolate;
pub mod fetch;

pub use classify::{classify_url, ClassifyLinksTask, LinkClassifier, WeakClassifier, CLASSIFY_TASK};
pub use distributors::{Distributor, DistributorExpandTask, HttpPageFetcher, PageFetcher};
pub use extrapolate::{ExtrapolateTask, EXTRAPOLATE_TASK};
pub use fetch::{
    FetchOutcome, FetchedRecord, LocalizedText, MetaFetchTask, MetadataFetcher, MAX_BATCH,
};
