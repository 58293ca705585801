use gamersky_gallery_crawler::{gamersky::SOURCE_TAG, persistent::GalleryData, Storage, Table};

/// Removes analyzed articles that never produced an item, so the next scan stores
/// them again.
async fn prune_articles(name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let p = GalleryData::new(name).await?;
    let mut i = 0;
    for article in p.articles_get(SOURCE_TAG).await? {
        let Some(id) = article.id else { continue };
        if article.analyzed_at.is_some() && p.content_count(id).await? == 0 {
            p.article_delete(id).await?;
            i += 1;
            println!("Delete {} {}", i, article.link);
        }
    }
    println!(
        "{} articles, {} items left",
        p.articles.count().await?,
        p.contents.count().await?
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let name = std::env::args().nth(1).unwrap_or_else(|| "gamersky".to_string());
    prune_articles(&name).await
}
