//! Media acquisition: the content-addressed store, downloaders, ffprobe and image
//! downloads.

pub mod download;
pub mod images;
pub mod probe;
mod store;

pub use download::{DownloadError, DownloadTask, MediaDownloader, YtDlpDownloader};
pub use images::{HttpImageFetcher, ImageDownloadTask, ImageError, ImageFetcher, IMAGES_TASK};
pub use probe::{FfprobeProber, MediaInfo, MediaProber, ProbeError};
pub use store::MediaStore;
