use crate::{Article, ExtractError};
use lazy_regex::regex;
use lazy_static::lazy_static;
use scraper::{ElementRef, Html, Selector};

const E: &str = "Invalid selector";
lazy_static! {
    static ref ENTRY: Selector = Selector::parse("ul.pictxt > li").expect(E);
    static ref TITLE_ANCHOR: Selector = Selector::parse("div.tit a").expect(E);
    static ref DESCRIPTION: Selector = Selector::parse("div.txt").expect(E);
    static ref IMAGE: Selector = Selector::parse("img[src]").expect(E);
    static ref TIME: Selector = Selector::parse("div.time").expect(E);
}

/// Splits a catalog page into its `<li>` entries and converts each, in document order.
pub(super) fn entries(page: &str, address: &str, source: &str) -> Vec<Result<Article, ExtractError>> {
    let doc = Html::parse_document(page);
    doc.select(&ENTRY)
        .map(|entry| convert(entry, address, source))
        .collect()
}

fn convert(entry: ElementRef, address: &str, source: &str) -> Result<Article, ExtractError> {
    let anchor = entry.select(&TITLE_ANCHOR).next();
    let link = anchor
        .and_then(|a| a.value().attr("href"))
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .ok_or(ExtractError::NoLink)?;
    let link = match url::Url::parse(address).and_then(|base| base.join(link)) {
        Ok(url) => url.to_string(),
        Err(_) => link.to_string(),
    };

    let mut article = Article::new(source, link.as_str());
    article.title = anchor
        .and_then(|a| a.value().attr("title"))
        .map(ToString::to_string)
        .or_else(|| anchor.map(text))
        .unwrap_or_default();
    article.description = entry
        .select(&DESCRIPTION)
        .next()
        .map(text)
        .unwrap_or_default();
    article.image_link = entry
        .select(&IMAGE)
        .next()
        .and_then(|img| img.value().attr("src"))
        .map(|s| s.trim().to_string())
        .unwrap_or_default();
    article.publish_time = entry.select(&TIME).next().map(text).unwrap_or_default();

    Ok(article)
}

fn text(el: ElementRef) -> String {
    let raw = el.text().collect::<String>();
    regex!(r"\s+").replace_all(raw.trim(), " ").into_owned()
}
