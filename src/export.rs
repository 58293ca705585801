use crate::{
    task::{TaskContext, Work},
    Article, CrawlerError, Pipeline,
};
use itertools::Itertools;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ExportFormat {
    Markdown,
    Json,
}

impl ExportFormat {
    fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Markdown => "md",
            ExportFormat::Json => "json",
        }
    }
}

/// Writes a crawled article with its items to `<dir>/<article_id>.<ext>`.
///
/// Image references point at the layout produced by
/// [`DownloadStrategy`](crate::download::DownloadStrategy), relative to `dir`.
pub struct ExportStrategy {
    pipeline: Pipeline,
    link: String,
    dir: PathBuf,
    format: ExportFormat,
}

impl ExportStrategy {
    pub fn new<S: Into<String>, P: AsRef<Path>>(
        pipeline: Pipeline,
        link: S,
        dir: P,
        format: ExportFormat,
    ) -> Self {
        ExportStrategy {
            pipeline,
            link: link.into(),
            dir: dir.as_ref().to_path_buf(),
            format,
        }
    }
}

fn markdown(article: &Article) -> String {
    let mut head = format!("# {}\n\n", article.title);
    if !article.description.is_empty() {
        head.push_str(&format!("> {}\n\n", article.description));
    }

    let body = article
        .contents
        .iter()
        .map(|c| {
            let image = format!("![{0}]({1}/{0})", c.image_file_name, article.article_id);
            if c.image_description.is_empty() {
                image
            } else {
                format!("{}\n\n{}", image, c.image_description)
            }
        })
        .join("\n\n");

    format!("{}{}\n", head, body)
}

#[async_trait::async_trait]
impl Work for ExportStrategy {
    /// Items written.
    type Progress = usize;
    type Output = PathBuf;

    fn name(&self) -> &str {
        "export"
    }

    async fn run(&self, ctx: &TaskContext<usize>) -> Result<PathBuf, CrawlerError> {
        let article = self.pipeline.article(&self.link).await?;

        let text = match self.format {
            ExportFormat::Markdown => markdown(&article),
            ExportFormat::Json => serde_json::to_string_pretty(&article)?,
        };

        fs::create_dir_all(&self.dir).await?;
        let path = self
            .dir
            .join(format!("{}.{}", article.article_id, self.format.extension()));
        fs::write(&path, text).await?;
        ctx.report(article.contents.len());

        if let Some(id) = article.id {
            self.pipeline.storage.article_mark_read(id).await?;
        }
        info!(
            "Exported {} items of {} to {}",
            article.contents.len(),
            article.article_id,
            path.display()
        );
        Ok(path)
    }
}
