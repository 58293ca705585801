use crate::{
    task::{TaskContext, Work},
    Article, CrawlerError, Pipeline,
};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanProgress {
    pub pages: u32,
    /// Entries that yielded a link, new or not.
    pub found: u32,
    pub created: u32,
}

/// Turns catalog pages into new article records.
pub struct ScanStrategy {
    pipeline: Pipeline,
    catalogs: Vec<String>,
}

impl ScanStrategy {
    /// Scans the source's own catalog page.
    pub fn new(pipeline: Pipeline) -> Self {
        let catalogs = vec![pipeline.source.catalog_address().to_string()];
        ScanStrategy { pipeline, catalogs }
    }

    /// Scans `catalogs` in order; an empty list falls back to the source's catalog.
    pub fn with_catalogs(pipeline: Pipeline, catalogs: Vec<String>) -> Self {
        if catalogs.is_empty() {
            return Self::new(pipeline);
        }
        ScanStrategy { pipeline, catalogs }
    }

    /// Fetches one catalog page and persists the entries not stored yet.
    ///
    /// The returned articles keep the catalog's document order and carry their row ids.
    pub async fn scan(&self, address: &str) -> Result<Vec<Article>, CrawlerError> {
        let mut progress = ScanProgress::default();
        self.scan_page(address, &mut progress).await
    }

    async fn scan_page(
        &self,
        address: &str,
        progress: &mut ScanProgress,
    ) -> Result<Vec<Article>, CrawlerError> {
        let Pipeline {
            fetcher,
            storage,
            source,
        } = &self.pipeline;

        info!("Scan catalog : {}", address);
        let html = fetcher.fetch(address).await.map_err(|e| {
            error!("Failed to get catalog {} : {}", address, e);
            e
        })?;
        progress.pages += 1;

        let mut created = vec![];
        for entry in source.catalog_entries(&html, address) {
            let mut article = match entry {
                Ok(article) => article,
                Err(e) => {
                    warn!("{} on catalog {}, skipped", e, address);
                    continue;
                }
            };
            progress.found += 1;

            if storage.article_exists(&article.link, &article.source).await? {
                debug!("Already stored : {}", article.link);
                continue;
            }

            article.is_new = true;
            article.id = storage.article_insert(&article).await?;
            if article.id.is_none() {
                // Stored by a concurrent scan since the check above.
                debug!("Already stored : {}", article.link);
                continue;
            }
            info!("New article {} : {}", article.article_id, article.title);
            progress.created += 1;
            created.push(article);
        }

        Ok(created)
    }
}

#[async_trait::async_trait]
impl Work for ScanStrategy {
    type Progress = ScanProgress;
    type Output = Vec<Article>;

    fn name(&self) -> &str {
        "scan"
    }

    async fn run(&self, ctx: &TaskContext<ScanProgress>) -> Result<Vec<Article>, CrawlerError> {
        let mut progress = ScanProgress::default();
        let mut created = vec![];

        for address in &self.catalogs {
            created.extend(self.scan_page(address, &mut progress).await?);
            ctx.report(progress);

            if ctx.is_cancelled() {
                info!("Scan stopped after {} catalog pages", progress.pages);
                break;
            }
        }

        info!(
            "Scanned {} catalog pages, {} entries, {} new",
            progress.pages, progress.found, progress.created
        );
        Ok(created)
    }
}
