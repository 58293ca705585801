/// Errors that end a pipeline run.
///
/// These unwind out of a work strategy and are handed to the subscriber through
/// [`Outcome::Failed`](crate::task::Outcome::Failed); everything persisted before the
/// failure stays in the store.
#[derive(Debug, thiserror::Error)]
pub enum CrawlerError {
    #[error("Crawl seed is empty")]
    InvalidSeed,

    #[error("Failed to fetch {address}")]
    Fetch {
        address: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{address} responded with status {status}")]
    FetchStatus { address: String, status: u16 },

    #[error("{address} returned an empty page")]
    EmptyPage { address: String },

    #[error("Article body not found on {page}")]
    StructuralMatch { page: String },

    #[error("No article stored for {link} ({source_tag})")]
    ArticleNotFound { link: String, source_tag: String },

    #[error("A run is already active on this runner")]
    AlreadyRunning,

    #[error("Work aborted: {0}")]
    Aborted(String),

    #[error("Invalid address")]
    InvalidAddress(#[from] url::ParseError),

    #[error("Database error")]
    DatabaseError(#[from] sqlx::error::Error),

    #[error("IO error")]
    Io(#[from] std::io::Error),

    #[error("Serialization error")]
    Serialization(#[from] serde_json::Error),
}

/// Failures scoped to a single page region or fragment.
///
/// The crawl engine logs these and keeps going; they never reach the caller.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ExtractError {
    #[error("Pagination marker not found")]
    PaginationMarkerMissing,

    #[error("No image link in fragment")]
    NoImage,

    #[error("No article link in catalog entry")]
    NoLink,
}
