use std::sync::Arc;

pub mod crawl;
pub mod download;
pub mod export;
pub mod extract;
pub mod fetch;
pub mod gamersky;
pub mod model;
pub mod persistent;
pub mod scan;
pub mod task;

mod data;
mod error;
mod utils;

#[cfg(test)]
mod testing;

pub use data::Table;
pub use error::{CrawlerError, ExtractError};
pub use model::{Article, ContentItem};

/// Page retrieval by address.
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, address: &str) -> Result<String, CrawlerError>;
    async fn fetch_bytes(&self, address: &str) -> Result<Vec<u8>, CrawlerError>;
}

/// Extraction rules of one content source.
///
/// The crawl engine and catalog scanner are source agnostic; everything that depends
/// on a site's markup lives behind this trait.
pub trait Source: Send + Sync {
    /// Tag stored with every article of this source.
    fn tag(&self) -> &str;

    fn catalog_address(&self) -> &str;

    /// The article body block of a content page.
    fn isolate_body<'a>(&self, page: &'a str) -> Option<&'a str>;

    /// Splits a body block into `(content, pagination)`.
    fn split_pagination<'a>(&self, body: &'a str) -> Result<(&'a str, &'a str), ExtractError>;

    fn split_fragments<'a>(&self, content: &'a str) -> Vec<&'a str>;

    fn extract_item(&self, fragment: &str) -> Result<ContentItem, ExtractError>;

    fn next_link(&self, pagination: &str, current_page: &str) -> Option<String>;

    /// Candidate articles of the catalog page fetched from `address`, in document
    /// order. Relative links are resolved against `address`.
    fn catalog_entries(&self, page: &str, address: &str) -> Vec<Result<Article, ExtractError>>;
}

/// Article and content record store.
#[async_trait::async_trait]
pub trait Storage: Send + Sync {
    async fn article_exists(&self, link: &str, source: &str) -> Result<bool, CrawlerError>;
    /// Stores a new article. `None` when (link, source) is already stored.
    async fn article_insert(&self, article: &Article) -> Result<Option<i64>, CrawlerError>;
    async fn article_get(&self, link: &str, source: &str) -> Result<Option<Article>, CrawlerError>;
    async fn articles_get(&self, source: &str) -> Result<Vec<Article>, CrawlerError>;
    async fn article_mark_analyzed(&self, id: i64) -> Result<(), CrawlerError>;
    async fn article_mark_read(&self, id: i64) -> Result<(), CrawlerError>;
    async fn article_delete(&self, id: i64) -> Result<(), CrawlerError>;

    async fn content_insert(&self, article: i64, item: &ContentItem) -> Result<i64, CrawlerError>;
    async fn content_get(&self, article: i64) -> Result<Vec<ContentItem>, CrawlerError>;
    async fn content_count(&self, article: i64) -> Result<u32, CrawlerError>;
    async fn content_clear(&self, article: i64) -> Result<u64, CrawlerError>;
    async fn content_delete_from_page(&self, article: i64, page: &str) -> Result<u64, CrawlerError>;

    async fn last_scanned_page(&self, article: i64) -> Result<Option<String>, CrawlerError>;
    async fn pages_analyzed(&self, article: i64) -> Result<u32, CrawlerError>;
}

/// The collaborators every pipeline stage works against.
#[derive(Clone)]
pub struct Pipeline {
    pub fetcher: Arc<dyn Fetcher>,
    pub storage: Arc<dyn Storage>,
    pub source: Arc<dyn Source>,
}

impl Pipeline {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        storage: Arc<dyn Storage>,
        source: Arc<dyn Source>,
    ) -> Self {
        Pipeline {
            fetcher,
            storage,
            source,
        }
    }

    /// Looks up the stored article for `link` under this pipeline's source, with its items.
    pub(crate) async fn article(&self, link: &str) -> Result<Article, CrawlerError> {
        let tag = self.source.tag();
        self.storage
            .article_get(link, tag)
            .await?
            .ok_or_else(|| CrawlerError::ArticleNotFound {
                link: link.to_string(),
                source_tag: tag.to_string(),
            })
    }
}
