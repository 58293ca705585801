use crate::{
    gamersky::GamerSky, persistent::GalleryData, CrawlerError, Fetcher, Pipeline, Storage,
};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

type FetchHook = Box<dyn Fn(&str) + Send + Sync>;

/// Serves canned pages and records every address it was asked for.
#[derive(Default)]
pub struct StaticFetcher {
    pages: Mutex<HashMap<String, String>>,
    images: Mutex<HashMap<String, Vec<u8>>>,
    fetched: Mutex<Vec<String>>,
    fetches: AtomicUsize,
    hook: Mutex<Option<FetchHook>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(self, address: &str, html: impl Into<String>) -> Self {
        self.pages
            .lock()
            .unwrap()
            .insert(address.to_string(), html.into());
        self
    }

    pub fn image(self, address: &str, bytes: &[u8]) -> Self {
        self.images
            .lock()
            .unwrap()
            .insert(address.to_string(), bytes.to_vec());
        self
    }

    /// Replaces a page, as if the site changed between runs.
    pub fn set_page(&self, address: &str, html: impl Into<String>) {
        self.pages
            .lock()
            .unwrap()
            .insert(address.to_string(), html.into());
    }

    /// Runs `hook` with the address of every later fetch, before answering it.
    pub fn on_fetch(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        *self.hook.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }

    fn record(&self, address: &str) {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.fetched.lock().unwrap().push(address.to_string());
        if let Some(hook) = self.hook.lock().unwrap().as_ref() {
            hook(address);
        }
    }
}

#[async_trait::async_trait]
impl Fetcher for StaticFetcher {
    async fn fetch(&self, address: &str) -> Result<String, CrawlerError> {
        self.record(address);
        self.pages
            .lock()
            .unwrap()
            .get(address)
            .cloned()
            .ok_or_else(|| CrawlerError::FetchStatus {
                address: address.to_string(),
                status: 404,
            })
    }

    async fn fetch_bytes(&self, address: &str) -> Result<Vec<u8>, CrawlerError> {
        self.record(address);
        self.images
            .lock()
            .unwrap()
            .get(address)
            .cloned()
            .ok_or_else(|| CrawlerError::FetchStatus {
                address: address.to_string(),
                status: 404,
            })
    }
}

pub async fn pipeline(fetcher: StaticFetcher) -> (Pipeline, Arc<StaticFetcher>, Arc<GalleryData>) {
    let fetcher = Arc::new(fetcher);
    let storage = Arc::new(GalleryData::in_memory("test").await.unwrap());
    let pipeline = Pipeline::new(
        Arc::clone(&fetcher) as Arc<dyn Fetcher>,
        Arc::clone(&storage) as Arc<dyn Storage>,
        Arc::new(GamerSky),
    );
    (pipeline, fetcher, storage)
}

/// A content page with one fragment per image and an optional next-page anchor.
pub fn content_page(images: &[&str], next: Option<&str>) -> String {
    let mut body = String::from("<html><body><div class=\"Mid2L_con\">\n");
    for image in images {
        body.push_str(&format!(
            "<p align=\"center\"><a href=\"https://www.gamersky.com/showimage/id_gamersky.shtml?{0}\"><img src=\"{0}.small\"></a><br>\ncaption of {0}</p>\n",
            image
        ));
    }
    body.push_str("<!--{pe.begin.pagination}-->\n<div class=\"page_css\">");
    if let Some(next) = next {
        body.push_str(&format!("<a href=\"{}\">下一页</a>", next));
    }
    body.push_str("</div>\n<!--{pe.end.pagination}-->\n</div></body></html>");
    body
}
