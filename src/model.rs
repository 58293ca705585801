use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use std::fmt;

/// An article stub discovered on a catalog page, together with the gallery items
/// collected for it by the crawl engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Article {
    /// Row id assigned by the store, `None` until persisted.
    pub id: Option<i64>,
    pub article_id: String,
    pub source: String,
    pub link: String,
    pub title: String,
    pub description: String,
    pub image_link: String,
    pub publish_time: String,
    pub analyzed_at: Option<DateTime<FixedOffset>>,
    pub is_new: bool,
    pub contents: Vec<ContentItem>,
}

impl Article {
    pub fn new<S: Into<String>>(source: S, link: S) -> Self {
        let link = link.into();
        Article {
            id: None,
            article_id: article_id_from_link(&link),
            source: source.into(),
            link,
            title: String::new(),
            description: String::new(),
            image_link: String::new(),
            publish_time: String::new(),
            analyzed_at: None,
            is_new: true,
            contents: vec![],
        }
    }
}

/// `https://www.gamersky.com/ent/201808/1094495.shtml` -> `1094495`
fn article_id_from_link(link: &str) -> String {
    let name = crate::extract::file_name(link);
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => name,
    }
}

impl fmt::Display for Article {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Title           : {}", self.title)?;
        writeln!(f, "Link            : {}", self.link)?;
        writeln!(f, "Source          : {}", self.source)?;
        writeln!(f, "Published       : {}", self.publish_time)?;
        writeln!(f, "Description     : {}", self.description)?;
        if let Some(d) = self.analyzed_at.as_ref() {
            writeln!(f, "Analyzed        : {}", d)?;
        } else {
            writeln!(f, "Analyzed        : None")?;
        };
        writeln!(f, "Items           : {}", self.contents.len())?;
        for c in &self.contents {
            writeln!(f, "> {} {}", c.image_file_name, c.image_description)?;
        }

        Ok(())
    }
}

/// One gallery image of an article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentItem {
    pub id: Option<i64>,
    /// The content page this item was extracted from.
    pub page_link: String,
    pub image_link: String,
    pub image_description: String,
    pub image_file_name: String,
}

impl ContentItem {
    pub fn new<S: Into<String>>(description: S, image_link: S) -> Self {
        let image_link = image_link.into();
        ContentItem {
            id: None,
            page_link: String::new(),
            image_file_name: crate::extract::file_name(&image_link),
            image_link,
            image_description: description.into(),
        }
    }
}
