use clap::{Parser, Subcommand};
use gamersky_gallery_crawler::{
    crawl::CrawlStrategy,
    download::DownloadStrategy,
    export::{ExportFormat, ExportStrategy},
    fetch::HttpFetcher,
    gamersky::GamerSky,
    persistent::GalleryData,
    scan::ScanStrategy,
    task::{Outcome, TaskObserver, TaskRunner, Work},
    CrawlerError, Pipeline, Source, Storage,
};
use std::{fmt::Debug, ops::ControlFlow, path::PathBuf, sync::Arc};
use tokio::time::Duration;
use tracing::{error, info, warn};
use tracing_error::ErrorLayer;
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(about = "Collects GamerSky picture galleries into a local database")]
struct Cli {
    /// Database name, stored as <DB>.db
    #[arg(long, default_value = "gamersky")]
    db: String,

    /// Minimum delay between two requests
    #[arg(long, default_value_t = 200)]
    delay_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Store the new articles listed on catalog pages
    Scan { catalogs: Vec<String> },
    /// Collect the gallery items of a stored article
    Crawl {
        link: String,
        /// Continue from the last page that produced items
        #[arg(long)]
        resume: bool,
    },
    /// Save the images of a crawled article
    Download {
        link: String,
        #[arg(long)]
        dir: PathBuf,
    },
    /// Write a crawled article to a file
    Export {
        link: String,
        #[arg(long)]
        dir: PathBuf,
        #[arg(long, value_enum, default_value = "markdown")]
        format: ExportFormat,
    },
    /// Print the stored articles
    List,
}

/// Logs every lifecycle event of a run.
struct Console {
    name: String,
}

impl<P: Debug, R: Debug> TaskObserver<P, R> for Console {
    fn on_started(&mut self) -> ControlFlow<()> {
        info!("[{}] started, Ctrl-C to stop", self.name);
        ControlFlow::Continue(())
    }

    fn on_progress(&mut self, progress: &P) -> ControlFlow<()> {
        info!("[{}] {:?}", self.name, progress);
        ControlFlow::Continue(())
    }

    fn on_completed(&mut self, outcome: &Outcome<R>) {
        match outcome {
            Outcome::Finished(r) => info!("[{}] finished: {:?}", self.name, r),
            Outcome::Cancelled(r) => warn!("[{}] cancelled: {:?}", self.name, r),
            Outcome::Failed(e) => error!("[{}] failed: {}", self.name, e),
        }
    }
}

async fn run<W>(work: W) -> Result<Option<W::Output>, CrawlerError>
where
    W: Work,
    W::Progress: Debug,
    W::Output: Debug,
{
    let runner = TaskRunner::new(work);
    let handle = runner.start()?;

    let canceller = handle.canceller();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current step");
            canceller.cancel();
        }
    });

    let mut console = Console {
        name: runner.work().name().to_string(),
    };
    match handle.observe(&mut console).await {
        Outcome::Finished(r) => Ok(Some(r)),
        Outcome::Cancelled(r) => Ok(r),
        Outcome::Failed(e) => Err(e),
    }
}

async fn list(storage: &dyn Storage, source: &dyn Source) -> Result<(), CrawlerError> {
    for mut article in storage.articles_get(source.tag()).await? {
        if let Some(id) = article.id {
            article.contents = storage.content_get(id).await?;
        }
        println!("{}", article);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_env("LOG_LEVEL").unwrap_or_else(|_| {
                "info,html5ever=error,selectors=error,hyper=warn,reqwest=info,sqlx=warn".into()
            }),
        )
        .with(ErrorLayer::default())
        .init();

    let cli = Cli::parse();

    let storage = Arc::new(GalleryData::new(&cli.db).await?);
    let pipeline = Pipeline::new(
        Arc::new(HttpFetcher::new(Duration::from_millis(cli.delay_ms))),
        storage.clone(),
        Arc::new(GamerSky),
    );

    match cli.command {
        Command::Scan { catalogs } => {
            let created = run(ScanStrategy::with_catalogs(pipeline, catalogs)).await?;
            for article in created.unwrap_or_default() {
                println!("{}\t{}\t{}", article.article_id, article.title, article.link);
            }
        }
        Command::Crawl { link, resume } => {
            let strategy = CrawlStrategy::new(pipeline, link);
            if resume {
                run(strategy.resuming()).await?;
            } else {
                run(strategy).await?;
            }
        }
        Command::Download { link, dir } => {
            run(DownloadStrategy::new(pipeline, link, dir)).await?;
        }
        Command::Export { link, dir, format } => {
            if let Some(path) = run(ExportStrategy::new(pipeline, link, dir, format)).await? {
                println!("{}", path.display());
            }
        }
        Command::List => list(storage.as_ref(), &GamerSky).await?,
    }

    Ok(())
}
