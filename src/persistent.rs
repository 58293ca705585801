use crate::{utils, Article, ContentItem, CrawlerError, Storage, Table};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Row, SqlitePool,
};
use std::str::FromStr;

pub struct ArticleTable {
    name: String,
    pool: SqlitePool,
}

#[async_trait::async_trait]
impl Table for ArticleTable {
    type Record<'a> = &'a Article;

    fn get_name(&self) -> &str {
        self.name.as_str()
    }

    fn get_pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn create(&self) -> Result<(), sqlx::Error> {
        if !utils::is_table_exists(self.get_pool(), &self.name).await? {
            let query = format!(
                r#"
                        CREATE TABLE {} (
                            id INTEGER PRIMARY KEY AUTOINCREMENT,
                            article_id TEXT,
                            source TEXT NOT NULL,
                            link TEXT NOT NULL,
                            title TEXT,
                            description TEXT,
                            image_link TEXT,
                            publish_time TEXT,
                            analyzed_at DATETIME,
                            is_new BOOLEAN,
                            created_at DATETIME,
                            UNIQUE (source, link)
                        )
                    "#,
                &self.name
            );
            sqlx::query(query.as_str()).execute(self.get_pool()).await?;
        }
        Ok(())
    }

    async fn insert<'a>(&self, record: Self::Record<'a>) -> Result<Option<i64>, sqlx::Error> {
        let mut tx = self.get_pool().begin().await?;
        let query = format!(
            r#"INSERT OR IGNORE INTO {} (
                article_id,
                source,
                link,
                title,
                description,
                image_link,
                publish_time,
                analyzed_at,
                is_new,
                created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            self.name
        );
        let done = sqlx::query(&query)
            .bind(&record.article_id)
            .bind(&record.source)
            .bind(record.link.trim())
            .bind(&record.title)
            .bind(&record.description)
            .bind(&record.image_link)
            .bind(&record.publish_time)
            .bind(record.analyzed_at)
            .bind(record.is_new)
            .bind(utils::get_now())
            .execute(&mut tx)
            .await?;
        tx.commit().await?;
        Ok((done.rows_affected() > 0).then(|| done.last_insert_rowid()))
    }
}

pub struct ContentTable {
    name: String,
    pool: SqlitePool,
}

#[async_trait::async_trait]
impl Table for ContentTable {
    type Record<'a> = (i64, &'a ContentItem);

    fn get_name(&self) -> &str {
        self.name.as_str()
    }

    fn get_pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn create(&self) -> Result<(), sqlx::Error> {
        if !utils::is_table_exists(self.get_pool(), &self.name).await? {
            let query = format!(
                r#"
                        CREATE TABLE {} (
                            id INTEGER PRIMARY KEY AUTOINCREMENT,
                            article INTEGER NOT NULL,
                            page_link TEXT,
                            image_link TEXT,
                            image_description TEXT,
                            image_file_name TEXT,
                            created_at DATETIME
                        )
                    "#,
                &self.name
            );
            sqlx::query(query.as_str()).execute(self.get_pool()).await?;
        }
        Ok(())
    }

    async fn insert<'a>(&self, (article, item): Self::Record<'a>) -> Result<Option<i64>, sqlx::Error> {
        let query = format!(
            r#"INSERT INTO {} (
                article,
                page_link,
                image_link,
                image_description,
                image_file_name,
                created_at) VALUES (?, ?, ?, ?, ?, ?)"#,
            self.name
        );
        Ok(sqlx::query(&query)
            .bind(article)
            .bind(&item.page_link)
            .bind(&item.image_link)
            .bind(&item.image_description)
            .bind(&item.image_file_name)
            .bind(utils::get_now())
            .execute(self.get_pool())
            .await?
            .last_insert_rowid()
            .into())
    }
}

/// SQLite backed article store.
pub struct GalleryData {
    pub name: String,
    pub articles: ArticleTable,
    pub contents: ContentTable,
    pool: SqlitePool,
}

impl GalleryData {
    /// Opens (creating if missing) `<name>.db`.
    pub async fn new(name: &str) -> Result<GalleryData, CrawlerError> {
        let opt = SqliteConnectOptions::new()
            .filename(format!("{}.db", name))
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(opt).await?;
        GalleryData::with_pool(name, pool).await
    }

    /// A private in-memory store, gone once dropped.
    pub async fn in_memory(name: &str) -> Result<GalleryData, CrawlerError> {
        let opt = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opt)
            .await?;
        GalleryData::with_pool(name, pool).await
    }

    async fn with_pool(name: &str, pool: SqlitePool) -> Result<GalleryData, CrawlerError> {
        let p = GalleryData {
            name: name.to_string(),
            articles: ArticleTable {
                name: format!("{}_articles", name),
                pool: pool.clone(),
            },
            contents: ContentTable {
                name: format!("{}_contents", name),
                pool: pool.clone(),
            },
            pool,
        };

        if !utils::is_table_exists(&p.pool, &p.articles.name).await? {
            tracing::debug!("Create table {}", p.articles.name);
            p.articles.create().await?;
        } else {
            tracing::debug!("Use table {}", p.articles.name);
        }
        if !utils::is_table_exists(&p.pool, &p.contents.name).await? {
            tracing::debug!("Create table {}", p.contents.name);
            p.contents.create().await?;
        } else {
            tracing::debug!("Use table {}", p.contents.name);
        }

        Ok(p)
    }

    fn article_from_row(row: &SqliteRow) -> Result<Article, sqlx::Error> {
        Ok(Article {
            id: Some(row.try_get("id")?),
            article_id: row.try_get::<Option<String>, _>("article_id")?.unwrap_or_default(),
            source: row.try_get("source")?,
            link: row.try_get("link")?,
            title: row.try_get::<Option<String>, _>("title")?.unwrap_or_default(),
            description: row.try_get::<Option<String>, _>("description")?.unwrap_or_default(),
            image_link: row.try_get::<Option<String>, _>("image_link")?.unwrap_or_default(),
            publish_time: row.try_get::<Option<String>, _>("publish_time")?.unwrap_or_default(),
            analyzed_at: row.try_get("analyzed_at")?,
            is_new: row.try_get::<Option<bool>, _>("is_new")?.unwrap_or(true),
            contents: vec![],
        })
    }

    fn content_from_row(row: &SqliteRow) -> Result<ContentItem, sqlx::Error> {
        let text = |column: &str| -> Result<String, sqlx::Error> {
            Ok(row.try_get::<Option<String>, _>(column)?.unwrap_or_default())
        };
        Ok(ContentItem {
            id: Some(row.try_get("id")?),
            page_link: text("page_link")?,
            image_link: text("image_link")?,
            image_description: text("image_description")?,
            image_file_name: text("image_file_name")?,
        })
    }
}

#[async_trait::async_trait]
impl Storage for GalleryData {
    async fn article_exists(&self, link: &str, source: &str) -> Result<bool, CrawlerError> {
        let query = format!(
            "SELECT id FROM {} WHERE link = ? AND source = ?",
            self.articles.get_name()
        );
        Ok(sqlx::query(&query)
            .bind(link.trim())
            .bind(source)
            .fetch_optional(&self.pool)
            .await?
            .is_some())
    }

    async fn article_insert(&self, article: &Article) -> Result<Option<i64>, CrawlerError> {
        Ok(self.articles.insert(article).await?)
    }

    async fn article_get(&self, link: &str, source: &str) -> Result<Option<Article>, CrawlerError> {
        let query = format!(
            "SELECT * FROM {} WHERE link = ? AND source = ?",
            self.articles.get_name()
        );
        let row = sqlx::query(&query)
            .bind(link.trim())
            .bind(source)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let mut article = GalleryData::article_from_row(&row)?;
        if let Some(id) = article.id {
            article.contents = self.content_get(id).await?;
        }
        Ok(Some(article))
    }

    async fn articles_get(&self, source: &str) -> Result<Vec<Article>, CrawlerError> {
        let mut articles = vec![];
        let query = format!(
            "SELECT * FROM {} WHERE source = ? ORDER BY id",
            self.articles.get_name()
        );
        for row in sqlx::query(&query)
            .bind(source)
            .fetch_all(&self.pool)
            .await?
        {
            articles.push(GalleryData::article_from_row(&row)?);
        }
        Ok(articles)
    }

    async fn article_mark_analyzed(&self, id: i64) -> Result<(), CrawlerError> {
        let query = format!(
            "UPDATE {} SET analyzed_at = ? WHERE id = ?",
            self.articles.get_name()
        );
        sqlx::query(&query)
            .bind(utils::get_now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn article_mark_read(&self, id: i64) -> Result<(), CrawlerError> {
        let query = format!(
            "UPDATE {} SET is_new = FALSE WHERE id = ?",
            self.articles.get_name()
        );
        sqlx::query(&query).bind(id).execute(&self.pool).await?;
        Ok(())
    }

    async fn article_delete(&self, id: i64) -> Result<(), CrawlerError> {
        let mut tx = self.pool.begin().await?;
        let query = format!("DELETE FROM {} WHERE article = ?", self.contents.get_name());
        sqlx::query(&query).bind(id).execute(&mut tx).await?;
        let query = format!("DELETE FROM {} WHERE id = ?", self.articles.get_name());
        sqlx::query(&query).bind(id).execute(&mut tx).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn content_insert(&self, article: i64, item: &ContentItem) -> Result<i64, CrawlerError> {
        self.contents
            .insert((article, item))
            .await?
            .ok_or(CrawlerError::DatabaseError(sqlx::Error::RowNotFound))
    }

    async fn content_get(&self, article: i64) -> Result<Vec<ContentItem>, CrawlerError> {
        let mut contents = vec![];
        let query = format!(
            "SELECT * FROM {} WHERE article = ? ORDER BY id",
            self.contents.get_name()
        );
        for row in sqlx::query(&query)
            .bind(article)
            .fetch_all(&self.pool)
            .await?
        {
            contents.push(GalleryData::content_from_row(&row)?);
        }
        Ok(contents)
    }

    async fn content_count(&self, article: i64) -> Result<u32, CrawlerError> {
        let query = format!(
            "SELECT COUNT(*) FROM {} WHERE article = ?",
            self.contents.get_name()
        );
        Ok(sqlx::query(&query)
            .bind(article)
            .fetch_one(&self.pool)
            .await?
            .try_get(0)?)
    }

    async fn content_clear(&self, article: i64) -> Result<u64, CrawlerError> {
        let query = format!("DELETE FROM {} WHERE article = ?", self.contents.get_name());
        Ok(sqlx::query(&query)
            .bind(article)
            .execute(&self.pool)
            .await?
            .rows_affected())
    }

    async fn content_delete_from_page(&self, article: i64, page: &str) -> Result<u64, CrawlerError> {
        let query = format!(
            "DELETE FROM {} WHERE article = ? AND page_link = ?",
            self.contents.get_name()
        );
        Ok(sqlx::query(&query)
            .bind(article)
            .bind(page)
            .execute(&self.pool)
            .await?
            .rows_affected())
    }

    async fn last_scanned_page(&self, article: i64) -> Result<Option<String>, CrawlerError> {
        let query = format!(
            "SELECT page_link FROM {} WHERE article = ? ORDER BY id DESC LIMIT 1",
            self.contents.get_name()
        );
        let row = sqlx::query(&query)
            .bind(article)
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row {
            Some(row) => row.try_get("page_link")?,
            None => None,
        })
    }

    async fn pages_analyzed(&self, article: i64) -> Result<u32, CrawlerError> {
        let query = format!(
            "SELECT COUNT(DISTINCT page_link) FROM {} WHERE article = ?",
            self.contents.get_name()
        );
        Ok(sqlx::query(&query)
            .bind(article)
            .fetch_one(&self.pool)
            .await?
            .try_get(0)?)
    }
}
