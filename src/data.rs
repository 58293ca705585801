use sqlx::{Row, SqlitePool};

/// A store table keyed by an integer row id.
#[async_trait::async_trait]
pub trait Table {
    type Record<'a>;

    fn get_name(&self) -> &str;
    fn get_pool(&self) -> &SqlitePool;

    async fn create(&self) -> Result<(), sqlx::Error>;

    /// Inserts and returns the new row id, `None` when the table ignored the record as
    /// a duplicate.
    async fn insert<'a>(&self, record: Self::Record<'a>) -> Result<Option<i64>, sqlx::Error>;

    async fn is_exist(&self, id: i64) -> Result<bool, sqlx::Error> {
        let query = format!("SELECT id FROM {} WHERE id = ?", self.get_name());
        Ok(sqlx::query(&query)
            .bind(id)
            .fetch_optional(self.get_pool())
            .await?
            .is_some())
    }

    async fn count(&self) -> Result<u32, sqlx::Error> {
        let query = format!("SELECT COUNT(*) FROM {}", self.get_name());
        sqlx::query(&query)
            .fetch_one(self.get_pool())
            .await?
            .try_get(0)
    }
}
