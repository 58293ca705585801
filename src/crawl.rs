//! Multi-page article crawling.
//!
//! [`PageWalker`] is the lazy item sequence: it owns a FIFO worklist of page
//! addresses and only fetches the next page once every item of the current one has
//! been pulled. [`CrawlStrategy`] drives a walker for a stored article, persisting
//! each item as it arrives.

use crate::{
    task::{TaskContext, Work},
    ContentItem, CrawlerError, Fetcher, Pipeline, Source,
};
use futures::Stream;
use std::collections::{HashSet, VecDeque};
use tracing::{debug, error, info, warn};

/// Running counters of a crawl.
///
/// `pages` and `items` start from the resume point; `fetched` counts page fetches of
/// the current run only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrawlStats {
    pub pages: u32,
    pub items: u32,
    pub fetched: u32,
}

/// Starts a crawl at `seed` with zeroed counters.
pub fn crawl<'a>(
    fetcher: &'a dyn Fetcher,
    source: &'a dyn Source,
    seed: &str,
) -> Result<PageWalker<'a>, CrawlerError> {
    PageWalker::new(fetcher, source, seed, CrawlStats::default())
}

pub struct PageWalker<'a> {
    fetcher: &'a dyn Fetcher,
    source: &'a dyn Source,
    stop: Option<&'a (dyn Fn() -> bool + Send + Sync)>,
    queue: VecDeque<String>,
    visited: HashSet<String>,
    pending: VecDeque<ContentItem>,
    stats: CrawlStats,
}

impl<'a> PageWalker<'a> {
    pub fn new(
        fetcher: &'a dyn Fetcher,
        source: &'a dyn Source,
        seed: &str,
        start: CrawlStats,
    ) -> Result<Self, CrawlerError> {
        let seed = seed.trim();
        if seed.is_empty() {
            error!("Crawl requested with an empty seed ({})", source.tag());
            return Err(CrawlerError::InvalidSeed);
        }

        Ok(PageWalker {
            fetcher,
            source,
            stop: None,
            queue: VecDeque::from([seed.to_string()]),
            visited: HashSet::new(),
            pending: VecDeque::new(),
            stats: CrawlStats { fetched: 0, ..start },
        })
    }

    /// Consulted before every page fetch; once it returns true the sequence ends.
    pub fn stop_when(mut self, stop: &'a (dyn Fn() -> bool + Send + Sync)) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn stats(&self) -> CrawlStats {
        self.stats
    }

    /// Page addresses still waiting to be fetched.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// The next item in page-then-fragment order, fetching pages as needed.
    pub async fn next_item(&mut self) -> Result<Option<ContentItem>, CrawlerError> {
        loop {
            if let Some(item) = self.pending.pop_front() {
                self.stats.items += 1;
                return Ok(Some(item));
            }
            if self.queue.is_empty() {
                return Ok(None);
            }
            if self.stop.map_or(false, |stop| stop()) {
                info!("Stopped with {} pages still queued", self.queue.len());
                return Ok(None);
            }
            let Some(page) = self.queue.pop_front() else {
                return Ok(None);
            };
            self.visit(page).await?;
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<ContentItem, CrawlerError>> + 'a {
        futures::stream::try_unfold(self, |mut walker| async move {
            let item = walker.next_item().await?;
            Ok::<_, CrawlerError>(item.map(|item| (item, walker)))
        })
    }

    async fn visit(&mut self, page: String) -> Result<(), CrawlerError> {
        self.stats.pages += 1;
        self.stats.fetched += 1;
        self.visited.insert(page.clone());
        info!("Analyze page {} : {}", self.stats.pages, page);

        let html = self.fetcher.fetch(&page).await.map_err(|e| {
            error!("Failed to get page {} ({}): {}", self.stats.pages, page, e);
            e
        })?;

        let body = self.source.isolate_body(&html).ok_or_else(|| {
            error!("Article body not matched on page {} : {}", self.stats.pages, page);
            CrawlerError::StructuralMatch { page: page.clone() }
        })?;

        let (content, pagination) = match self.source.split_pagination(body) {
            Ok((content, pagination)) => (content, Some(pagination)),
            Err(e) => {
                warn!("{} on page {} : {}, no further pages", e, self.stats.pages, page);
                (body, None)
            }
        };

        for fragment in self.source.split_fragments(content) {
            match self.source.extract_item(fragment) {
                Ok(mut item) => {
                    item.page_link = page.clone();
                    self.pending.push_back(item);
                }
                Err(e) => warn!(
                    "{} on page {} : {}\n< ----------\n{}\n---------- >",
                    e,
                    self.stats.pages,
                    page,
                    fragment.trim()
                ),
            }
        }
        debug!("Page {} yielded {} items", page, self.pending.len());

        match pagination.and_then(|p| self.source.next_link(p, &page)) {
            Some(next) if self.visited.contains(&next) || self.queue.contains(&next) => {
                warn!("Next page {} already visited, stopping", next);
            }
            Some(next) => {
                info!("Found next page : {}", next);
                self.queue.push_back(next);
            }
            None => info!(
                "No next page, article ends after {} pages : {}",
                self.stats.pages, page
            ),
        }
        Ok(())
    }
}

/// Crawls one stored article, persisting each item before continuing.
pub struct CrawlStrategy {
    pipeline: Pipeline,
    link: String,
    resume: bool,
}

impl CrawlStrategy {
    pub fn new<S: Into<String>>(pipeline: Pipeline, link: S) -> Self {
        CrawlStrategy {
            pipeline,
            link: link.into(),
            resume: false,
        }
    }

    /// Continue from the last page that produced items instead of starting over.
    pub fn resuming(mut self) -> Self {
        self.resume = true;
        self
    }
}

#[async_trait::async_trait]
impl Work for CrawlStrategy {
    type Progress = CrawlStats;
    type Output = CrawlStats;

    fn name(&self) -> &str {
        "crawl"
    }

    async fn run(&self, ctx: &TaskContext<CrawlStats>) -> Result<CrawlStats, CrawlerError> {
        if self.link.trim().is_empty() {
            return Err(CrawlerError::InvalidSeed);
        }

        let storage = self.pipeline.storage.as_ref();
        let article = self.pipeline.article(&self.link).await?;
        let Some(id) = article.id else {
            return Err(CrawlerError::ArticleNotFound {
                link: article.link,
                source_tag: article.source,
            });
        };
        debug!("Matched article {} ({}) => {}", article.title, article.article_id, article.link);

        let resume_page = if self.resume {
            storage.last_scanned_page(id).await?
        } else {
            None
        };
        let (seed, start) = match resume_page {
            Some(page) => {
                let removed = storage.content_delete_from_page(id, &page).await?;
                let start = CrawlStats {
                    pages: storage.pages_analyzed(id).await?,
                    items: storage.content_count(id).await?,
                    fetched: 0,
                };
                info!(
                    "Resume article {} from {} ({} items of that page removed)",
                    article.article_id, page, removed
                );
                (page, start)
            }
            None => {
                let cleared = storage.content_clear(id).await?;
                debug!("Cleared {} items of article {}", cleared, article.article_id);
                (article.link.clone(), CrawlStats::default())
            }
        };
        storage.article_mark_analyzed(id).await?;

        let cancelled = || ctx.is_cancelled();
        let mut walker = PageWalker::new(
            self.pipeline.fetcher.as_ref(),
            self.pipeline.source.as_ref(),
            &seed,
            start,
        )?
        .stop_when(&cancelled);
        while let Some(item) = walker.next_item().await? {
            let item_id = storage.content_insert(id, &item).await?;
            info!(
                "Received item of article {} : {}, {}, {}",
                article.article_id, item_id, item.image_link, item.image_description
            );
            ctx.report(walker.stats());

            if ctx.is_cancelled() {
                info!("Crawl of {} cancelled after {} items", article.link, walker.stats().items);
                break;
            }
        }

        info!("Article analyzed : {} ({:?})", article.link, walker.stats());
        Ok(walker.stats())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        gamersky::{GamerSky, SOURCE_TAG},
        task::{Outcome, TaskRunner},
        testing::{content_page, pipeline, StaticFetcher},
        Article, Storage,
    };
    use futures::TryStreamExt;
    use pretty_assertions::assert_eq;
    use std::fs;

    const P1: &str = "https://www.gamersky.com/ent/201808/1094495.shtml";
    const P2: &str = "https://www.gamersky.com/ent/201808/1094495_2.shtml";
    const P3: &str = "https://www.gamersky.com/ent/201808/1094495_3.shtml";

    fn links(items: &[ContentItem]) -> Vec<(&str, &str)> {
        items
            .iter()
            .map(|c| (c.page_link.as_str(), c.image_link.as_str()))
            .collect()
    }

    async fn run(strategy: CrawlStrategy) -> Outcome<CrawlStats> {
        TaskRunner::new(strategy).start().unwrap().wait().await
    }

    #[tokio::test]
    async fn two_page_article_visits_two_pages() {
        let fetcher = StaticFetcher::new()
            .page(P1, fs::read_to_string("tests/htmls/page1.html").unwrap())
            .page(P2, fs::read_to_string("tests/htmls/page2.html").unwrap());
        let source = GamerSky;

        let mut walker = crawl(&fetcher, &source, P1).unwrap();
        let mut items = vec![];
        while let Some(item) = walker.next_item().await.unwrap() {
            items.push(item);
        }

        assert_eq!(walker.stats().pages, 2);
        assert_eq!(walker.stats().items, 4);
        assert_eq!(walker.stats().pages as usize, fetcher.fetches());
        assert_eq!(walker.queued(), 0);
        assert_eq!(fetcher.fetched(), vec![P1, P2]);
        assert_eq!(
            items.iter().map(|c| c.image_file_name.as_str()).collect::<Vec<_>>(),
            vec![
                "gamersky_01origin_01.jpg",
                "gamersky_02origin_03.gif",
                "gamersky_03origin_05.jpg",
                "gamersky_04origin_07.jpg"
            ]
        );
        assert_eq!(items[0].page_link, P1);
        assert_eq!(items[3].page_link, P2);
    }

    #[tokio::test]
    async fn pages_are_fetched_lazily() {
        let fetcher = StaticFetcher::new()
            .page(P1, content_page(&["http://i/1.jpg"], Some(P2)))
            .page(P2, content_page(&["http://i/2.jpg"], None));
        let source = GamerSky;

        let mut walker = crawl(&fetcher, &source, P1).unwrap();
        assert_eq!(fetcher.fetches(), 0);
        walker.next_item().await.unwrap();
        assert_eq!(fetcher.fetches(), 1);
        walker.next_item().await.unwrap();
        assert_eq!(fetcher.fetches(), 2);
        assert_eq!(walker.next_item().await.unwrap(), None);
    }

    #[tokio::test]
    async fn walker_as_stream() {
        let fetcher = StaticFetcher::new()
            .page(P1, content_page(&["http://i/1.jpg", "http://i/2.jpg"], Some(P2)))
            .page(P2, content_page(&["http://i/3.jpg"], None));
        let source = GamerSky;

        let items: Vec<ContentItem> = crawl(&fetcher, &source, P1)
            .unwrap()
            .into_stream()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(
            links(&items),
            vec![(P1, "http://i/1.jpg"), (P1, "http://i/2.jpg"), (P2, "http://i/3.jpg")]
        );
    }

    #[tokio::test]
    async fn empty_seed_fails_before_fetching() {
        let fetcher = StaticFetcher::new();
        let source = GamerSky;
        assert!(matches!(
            crawl(&fetcher, &source, "  "),
            Err(CrawlerError::InvalidSeed)
        ));

        let (pipeline, fetcher, _) = pipeline(StaticFetcher::new()).await;
        let outcome = run(CrawlStrategy::new(pipeline, "")).await;
        assert!(matches!(outcome, Outcome::Failed(CrawlerError::InvalidSeed)));
        assert_eq!(fetcher.fetches(), 0);
    }

    #[tokio::test]
    async fn missing_marker_keeps_items_and_ends_pagination() {
        let page = content_page(&["http://i/1.jpg", "http://i/2.jpg"], Some(P2))
            .replace("<!--{pe.begin.pagination}-->", "");
        let fetcher = StaticFetcher::new()
            .page(P1, page)
            .page(P2, content_page(&["http://i/3.jpg"], None));
        let source = GamerSky;

        let items: Vec<ContentItem> = crawl(&fetcher, &source, P1)
            .unwrap()
            .into_stream()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(links(&items), vec![(P1, "http://i/1.jpg"), (P1, "http://i/2.jpg")]);
        assert_eq!(fetcher.fetched(), vec![P1]);
    }

    #[tokio::test]
    async fn fragments_without_image_are_dropped() {
        let page = content_page(&["http://i/1.jpg"], None)
            .replace("<!--{pe.begin", "<p>纯文字段落<br>没有图片</p>\n<!--{pe.begin");
        let fetcher = StaticFetcher::new().page(P1, page);
        let source = GamerSky;

        let mut walker = crawl(&fetcher, &source, P1).unwrap();
        assert!(walker.next_item().await.unwrap().is_some());
        assert_eq!(walker.next_item().await.unwrap(), None);
        assert_eq!(walker.stats().items, 1);
    }

    #[tokio::test]
    async fn self_referencing_pagination_is_not_refetched() {
        let fetcher = StaticFetcher::new().page(P1, content_page(&["http://i/1.jpg"], Some(P1)));
        let source = GamerSky;

        let mut walker = crawl(&fetcher, &source, P1).unwrap();
        while walker.next_item().await.unwrap().is_some() {}
        assert_eq!(fetcher.fetches(), 1);
        assert_eq!(walker.stats().pages, 1);
    }

    #[tokio::test]
    async fn crawl_persists_items_of_stored_article() {
        let (pipeline, _, storage) = pipeline(
            StaticFetcher::new()
                .page(P1, content_page(&["http://i/1.jpg", "http://i/2.jpg"], Some(P2)))
                .page(P2, content_page(&["http://i/3.jpg"], None)),
        )
        .await;
        let id = storage.article_insert(&Article::new(SOURCE_TAG, P1)).await.unwrap().unwrap();

        let outcome = run(CrawlStrategy::new(pipeline.clone(), P1)).await;
        let Outcome::Finished(stats) = outcome else {
            panic!("unexpected outcome {:?}", outcome);
        };
        assert_eq!(stats, CrawlStats { pages: 2, items: 3, fetched: 2 });

        let stored = storage.content_get(id).await.unwrap();
        assert_eq!(
            links(&stored),
            vec![(P1, "http://i/1.jpg"), (P1, "http://i/2.jpg"), (P2, "http://i/3.jpg")]
        );
        let article = storage.article_get(P1, SOURCE_TAG).await.unwrap().unwrap();
        assert!(article.analyzed_at.is_some());

        // A fresh crawl replaces the previous content instead of appending to it.
        run(CrawlStrategy::new(pipeline, P1)).await;
        assert_eq!(storage.content_count(id).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn unknown_article_fails() {
        let (pipeline, fetcher, _) = pipeline(StaticFetcher::new()).await;
        let outcome = run(CrawlStrategy::new(pipeline, P1)).await;
        assert!(matches!(
            outcome,
            Outcome::Failed(CrawlerError::ArticleNotFound { .. })
        ));
        assert_eq!(fetcher.fetches(), 0);
    }

    #[tokio::test]
    async fn structural_failure_keeps_earlier_pages() {
        let (pipeline, _, storage) = pipeline(
            StaticFetcher::new()
                .page(P1, content_page(&["http://i/1.jpg"], Some(P2)))
                .page(P2, "<html><body><div class=\"other\">moved</div></body></html>"),
        )
        .await;
        let id = storage.article_insert(&Article::new(SOURCE_TAG, P1)).await.unwrap().unwrap();

        let outcome = run(CrawlStrategy::new(pipeline, P1)).await;
        assert!(matches!(
            outcome,
            Outcome::Failed(CrawlerError::StructuralMatch { ref page }) if page == P2
        ));
        assert_eq!(links(&storage.content_get(id).await.unwrap()), vec![(P1, "http://i/1.jpg")]);
    }

    #[tokio::test]
    async fn fetch_failure_aborts_run() {
        let (pipeline, _, storage) = pipeline(
            StaticFetcher::new().page(P1, content_page(&["http://i/1.jpg"], Some(P2))),
        )
        .await;
        let id = storage.article_insert(&Article::new(SOURCE_TAG, P1)).await.unwrap().unwrap();

        let outcome = run(CrawlStrategy::new(pipeline, P1)).await;
        assert!(matches!(
            outcome,
            Outcome::Failed(CrawlerError::FetchStatus { status: 404, .. })
        ));
        assert_eq!(storage.content_count(id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn cancellation_stops_before_next_page() {
        let (pipeline, fetcher, storage) = pipeline(
            StaticFetcher::new()
                .page(P1, content_page(&["http://i/1.jpg", "http://i/2.jpg"], Some(P2)))
                .page(P2, content_page(&["http://i/3.jpg"], None)),
        )
        .await;
        let id = storage.article_insert(&Article::new(SOURCE_TAG, P1)).await.unwrap().unwrap();

        let runner = TaskRunner::new(CrawlStrategy::new(pipeline, P1));
        let handle = runner.start().unwrap();
        let canceller = handle.canceller();
        fetcher.on_fetch(move |address| {
            if address == P1 {
                canceller.cancel();
            }
        });
        let outcome = handle.wait().await;

        assert!(matches!(
            outcome,
            Outcome::Cancelled(Some(CrawlStats { pages: 1, items: 1, fetched: 1 }))
        ));
        assert_eq!(fetcher.fetched(), vec![P1]);
        assert_eq!(
            links(&storage.content_get(id).await.unwrap()),
            vec![(P1, "http://i/1.jpg")]
        );
    }

    #[tokio::test]
    async fn cancellation_stops_pages_without_items() {
        let (pipeline, fetcher, storage) = pipeline(
            StaticFetcher::new()
                .page(P1, content_page(&[], Some(P2)))
                .page(P2, content_page(&[], Some(P3)))
                .page(P3, content_page(&["http://i/3.jpg"], None)),
        )
        .await;
        let id = storage.article_insert(&Article::new(SOURCE_TAG, P1)).await.unwrap().unwrap();

        let runner = TaskRunner::new(CrawlStrategy::new(pipeline, P1));
        let handle = runner.start().unwrap();
        let canceller = handle.canceller();
        fetcher.on_fetch(move |address| {
            if address == P1 {
                canceller.cancel();
            }
        });
        let outcome = handle.wait().await;

        assert!(matches!(
            outcome,
            Outcome::Cancelled(Some(CrawlStats { pages: 1, items: 0, fetched: 1 }))
        ));
        assert_eq!(fetcher.fetched(), vec![P1]);
        assert_eq!(storage.content_count(id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn resume_rescans_last_page_without_duplicates() {
        let (pipeline, fetcher, storage) = pipeline(
            StaticFetcher::new()
                .page(P1, content_page(&["http://i/1.jpg", "http://i/2.jpg"], Some(P2)))
                .page(P2, content_page(&["http://i/3.jpg"], None)),
        )
        .await;
        let id = storage.article_insert(&Article::new(SOURCE_TAG, P1)).await.unwrap().unwrap();
        run(CrawlStrategy::new(pipeline.clone(), P1)).await;

        // Page two grew and now links to a third page.
        fetcher.set_page(P2, content_page(&["http://i/3.jpg", "http://i/4.jpg"], Some(P3)));
        fetcher.set_page(P3, content_page(&["http://i/5.jpg"], None));

        let outcome = run(CrawlStrategy::new(pipeline, P1).resuming()).await;
        let Outcome::Finished(stats) = outcome else {
            panic!("unexpected outcome {:?}", outcome);
        };

        assert_eq!(stats, CrawlStats { pages: 3, items: 5, fetched: 2 });
        assert_eq!(&fetcher.fetched()[2..], &[P2.to_string(), P3.to_string()]);
        assert_eq!(
            links(&storage.content_get(id).await.unwrap()),
            vec![
                (P1, "http://i/1.jpg"),
                (P1, "http://i/2.jpg"),
                (P2, "http://i/3.jpg"),
                (P2, "http://i/4.jpg"),
                (P3, "http://i/5.jpg")
            ]
        );
    }

    #[tokio::test]
    async fn resume_without_history_starts_fresh() {
        let (pipeline, fetcher, storage) =
            pipeline(StaticFetcher::new().page(P1, content_page(&["http://i/1.jpg"], None))).await;
        storage.article_insert(&Article::new(SOURCE_TAG, P1)).await.unwrap();

        let outcome = run(CrawlStrategy::new(pipeline, P1).resuming()).await;
        assert!(matches!(outcome, Outcome::Finished(CrawlStats { pages: 1, items: 1, fetched: 1 })));
        assert_eq!(fetcher.fetched(), vec![P1]);
    }
}
