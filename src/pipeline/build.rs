use super::task::TaskNode;
use crate::fingerprint::{
    ExtractFingerprintsTask, FingerprintExtractor, MatchFingerprintsTask, Matcher, MatcherConfig,
};
use crate::media::{
    DownloadTask, ImageDownloadTask, ImageFetcher, MediaDownloader, MediaProber, MediaStore,
};
use crate::sources::{
    ClassifyLinksTask, Distributor, DistributorExpandTask, ExtrapolateTask, LinkClassifier,
    MetaFetchTask, MetadataFetcher, PageFetcher,
};
use crate::store::EntityKind;
use crate::unify::UnifyTask;
use std::sync::Arc;

/// External collaborators the task list is assembled from. Tasks whose
/// collaborators are absent are left out.
#[derive(Default)]
pub struct Collaborators {
    pub fetchers: Vec<Box<dyn MetadataFetcher>>,
    pub classifier: Option<Box<dyn LinkClassifier>>,
    /// Reads distributor landing pages.
    pub pages: Option<Arc<dyn PageFetcher>>,
    pub images: Option<Arc<dyn ImageFetcher>>,
    pub downloaders: Vec<Arc<dyn MediaDownloader>>,
    pub prober: Option<Arc<dyn MediaProber>>,
    pub extractor: Option<Arc<dyn FingerprintExtractor>>,
    pub media: Option<MediaStore>,
    /// In-flight limit for fingerprint extraction.
    pub extract_concurrency: Option<usize>,
}

/// The task list, in execution order.
pub fn default_pipeline(collab: Collaborators, matcher: MatcherConfig) -> TaskNode {
    let Collaborators {
        fetchers,
        classifier,
        pages,
        images,
        downloaders,
        prober,
        extractor,
        media,
        extract_concurrency,
    } = collab;

    let meta = fetchers.into_iter().map(|f| TaskNode::task(MetaFetchTask::new(f))).collect();

    let mut links = Vec::new();
    if let Some(classifier) = classifier {
        links.push(TaskNode::task(ClassifyLinksTask::new(classifier)));
    }
    if let Some(pages) = pages {
        for distributor in Distributor::ALL {
            links.push(TaskNode::task(DistributorExpandTask::new(
                distributor,
                Arc::clone(&pages),
            )));
        }
    }
    links.push(TaskNode::task(ExtrapolateTask));

    let mut image_tasks = Vec::new();
    if let (Some(images), Some(media)) = (images, &media) {
        image_tasks.push(TaskNode::task(ImageDownloadTask::new(images, media.clone())));
    }

    let mut sources = Vec::new();
    if let (Some(prober), Some(media)) = (&prober, &media) {
        for downloader in downloaders {
            sources.push(TaskNode::task(DownloadTask::new(
                downloader,
                Arc::clone(prober),
                media.clone(),
            )));
        }
    }
    if let (Some(extractor), Some(media)) = (extractor, &media) {
        let mut task = ExtractFingerprintsTask::new(extractor, media.clone());
        if let Some(limit) = extract_concurrency {
            task = task.with_limit(limit);
        }
        sources.push(TaskNode::task(task));
    }

    TaskNode::group(
        "all",
        vec![
            TaskNode::group("meta", meta),
            TaskNode::group("links", links),
            TaskNode::group(
                "unify",
                vec![
                    TaskNode::task(UnifyTask::new(EntityKind::Artist)),
                    TaskNode::task(UnifyTask::new(EntityKind::Album)),
                ],
            ),
            TaskNode::group("images", image_tasks),
            TaskNode::group("sources", sources),
            TaskNode::group(
                "track",
                vec![
                    TaskNode::task(MatchFingerprintsTask::new(Matcher::new(matcher))),
                    TaskNode::task(UnifyTask::new(EntityKind::Track)),
                ],
            ),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::WeakClassifier;

    #[test]
    fn bare_pipeline_runs_graph_tasks_only() {
        let names: Vec<String> = default_pipeline(Collaborators::default(), MatcherConfig::default())
            .flatten()
            .iter()
            .map(|t| t.name().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "all.extrapolate.from_links",
                "artist.unify",
                "album.unify",
                "track.match.fingerprint",
                "track.unify",
            ]
        );
    }

    #[test]
    fn classifier_runs_before_extrapolation() {
        let collab = Collaborators {
            classifier: Some(Box::new(WeakClassifier)),
            ..Default::default()
        };
        let names: Vec<String> = default_pipeline(collab, MatcherConfig::default())
            .flatten()
            .iter()
            .map(|t| t.name().to_string())
            .collect();
        assert_eq!(names[0], "links.classify");
        assert_eq!(names[1], "all.extrapolate.from_links");
    }

    #[test]
    fn distributors_expand_between_classify_and_extrapolation() {
        struct NoPages;
        #[async_trait::async_trait]
        impl PageFetcher for NoPages {
            async fn fetch_page(&self, _url: &str) -> anyhow::Result<Option<String>> {
                Ok(None)
            }
        }

        let collab = Collaborators {
            classifier: Some(Box::new(WeakClassifier)),
            pages: Some(Arc::new(NoPages)),
            ..Default::default()
        };
        let names: Vec<String> = default_pipeline(collab, MatcherConfig::default())
            .flatten()
            .iter()
            .map(|t| t.name().to_string())
            .collect();
        assert_eq!(
            &names[..5],
            &[
                "links.classify",
                "links.extrapolate.from_linkcore",
                "links.extrapolate.from_lnk_to",
                "links.extrapolate.from_karent_album",
                "all.extrapolate.from_links",
            ]
        );
    }
}
