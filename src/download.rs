use crate::{
    task::{TaskContext, Work},
    CrawlerError, Pipeline,
};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadStats {
    pub total: u32,
    pub downloaded: u32,
    /// Already present on disk.
    pub skipped: u32,
    pub failed: u32,
}

impl DownloadStats {
    pub fn done(&self) -> u32 {
        self.downloaded + self.skipped + self.failed
    }
}

/// Saves the images of a crawled article under `<dir>/<article_id>/`.
pub struct DownloadStrategy {
    pipeline: Pipeline,
    link: String,
    dir: PathBuf,
}

impl DownloadStrategy {
    pub fn new<S: Into<String>, P: AsRef<Path>>(pipeline: Pipeline, link: S, dir: P) -> Self {
        DownloadStrategy {
            pipeline,
            link: link.into(),
            dir: dir.as_ref().to_path_buf(),
        }
    }
}

#[async_trait::async_trait]
impl Work for DownloadStrategy {
    type Progress = DownloadStats;
    type Output = DownloadStats;

    fn name(&self) -> &str {
        "download"
    }

    async fn run(&self, ctx: &TaskContext<DownloadStats>) -> Result<DownloadStats, CrawlerError> {
        let article = self.pipeline.article(&self.link).await?;
        let items = &article.contents;

        let target = self.dir.join(&article.article_id);
        fs::create_dir_all(&target).await?;
        info!("Download {} images into {}", items.len(), target.display());

        let mut stats = DownloadStats {
            total: items.len() as u32,
            ..Default::default()
        };

        for item in items {
            let path = target.join(&item.image_file_name);
            if item.image_file_name.is_empty() {
                warn!("No file name for {}, skipped", item.image_link);
                stats.failed += 1;
            } else if fs::metadata(&path).await.is_ok() {
                debug!("Exists : {}", path.display());
                stats.skipped += 1;
            } else {
                match self.pipeline.fetcher.fetch_bytes(&item.image_link).await {
                    Ok(bytes) => {
                        fs::write(&path, bytes).await?;
                        debug!("Saved {}", path.display());
                        stats.downloaded += 1;
                    }
                    Err(e) => {
                        warn!("Failed to download {} : {}", item.image_link, e);
                        stats.failed += 1;
                    }
                }
            }

            ctx.report(stats);
            if ctx.is_cancelled() {
                info!("Download stopped after {} of {} items", stats.done(), stats.total);
                break;
            }
        }

        Ok(stats)
    }
}
