use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use commons_reel::catalog::{Catalog, Pager};
use commons_reel::normalization::{clean_title, format_duration, format_size};
use commons_reel::pipeline::config::normalize_title;
use commons_reel::pipeline::{MediaRecord, Pipeline, PipelineConfig};
use commons_reel::util::env;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "commons-reel", version, about = "Public-domain film catalog from Wikimedia Commons")]
struct Cli {
    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Commands,
}

/// Flags taking precedence over the COMMONS_* / CRAWL_* environment.
#[derive(Args, Debug)]
struct Overrides {
    /// Root category to crawl (e.g. "Category:Films in the public domain")
    #[arg(long, global = true)]
    root: Option<String>,
    /// Category to skip, repeatable; replaces the configured exclusion list
    #[arg(long = "exclude", global = true)]
    excluded: Vec<String>,
    /// Number of crawler workers
    #[arg(long, global = true)]
    workers: Option<usize>,
    /// Maximum concurrent requests to Commons
    #[arg(long, global = true)]
    max_outbound: Option<usize>,
    /// Abort the run after this many seconds
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// List discovered video files without fetching metadata
    Crawl {
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Run the full pipeline and print the resulting records
    Fetch {
        /// Case-insensitive substring of the canonical title
        #[arg(long)]
        search: Option<String>,
        /// Print at most this many records
        #[arg(long)]
        limit: Option<usize>,
        /// Zero-based page of `--limit` records to print
        #[arg(long, default_value_t = 0)]
        page: usize,
        #[arg(long, default_value_t = false)]
        json: bool,
        /// Crawl fully before enriching instead of streaming
        #[arg(long, default_value_t = false)]
        batch: bool,
    },
    /// Fetch and print one record by page id
    Show {
        pageid: i64,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

impl Overrides {
    fn apply(&self, mut cfg: PipelineConfig) -> Result<PipelineConfig> {
        if let Some(root) = &self.root {
            cfg.root_category = normalize_title(root);
        }
        if !self.excluded.is_empty() {
            cfg = cfg.with_excluded(&self.excluded);
        }
        if let Some(workers) = self.workers {
            cfg.crawl.workers = workers.max(1);
        }
        if let Some(limit) = self.max_outbound {
            cfg.max_outbound = limit.max(1);
        }
        if let Some(secs) = self.timeout_secs {
            cfg.timeout = Some(std::time::Duration::from_secs(secs)).filter(|d| !d.is_zero());
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

fn print_record(record: &MediaRecord) {
    println!(
        "{:>9}  {}  [{} | {}x{} | {}]",
        record.pageid,
        clean_title(&record.canonicaltitle),
        format_duration(record.duration),
        record.width,
        record.height,
        format_size(record.size)
    );
}

fn print_detail(record: &MediaRecord) {
    println!("Title:           {}", clean_title(&record.canonicaltitle));
    println!("Canonical title: {}", record.canonicaltitle);
    println!("Page id:         {}", record.pageid);
    println!("Duration:        {}", format_duration(record.duration));
    println!("Resolution:      {}x{}", record.width, record.height);
    println!("Size:            {}", format_size(record.size));
    println!("Video URL:       {}", record.url);
    println!("Description:     {}", record.descriptionurl);
    if let Some(thumb) = &record.thumburl {
        println!("Thumbnail:       {thumb}");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env::init_env();
    commons_reel::tracing::init_tracing("info")?;

    let cli = Cli::parse();
    let cfg = cli
        .overrides
        .apply(PipelineConfig::from_env().context("loading pipeline configuration")?)?;
    let pipeline = Pipeline::from_config(cfg).context("building pipeline")?;

    match cli.command {
        Commands::Crawl { json } => {
            let report = pipeline.discover().await.context("crawl failed")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report.files)?);
            } else {
                let mut titles: Vec<&str> = report.files.iter().map(|f| f.title.as_str()).collect();
                titles.sort_unstable();
                for title in titles {
                    println!("{title}");
                }
            }
            info!(
                files = report.stats.files_found,
                categories = report.stats.categories_listed,
                failed = report.stats.categories_failed,
                "crawl: done"
            );
        }
        Commands::Fetch {
            search,
            limit,
            page,
            json,
            batch,
        } => {
            let out = if batch {
                pipeline.run_batch().await
            } else {
                pipeline.run().await
            }
            .context("pipeline failed")?;
            let catalog = Catalog::new(out.records);
            let found = catalog.search(search.as_deref());
            let hits = match limit {
                Some(limit) => Pager::new(limit).page(&found, page),
                None => &found[..],
            };
            if json {
                println!("{}", serde_json::to_string_pretty(hits)?);
            } else {
                for record in hits {
                    print_record(record);
                }
            }
            info!(
                shown = hits.len(),
                total = catalog.len(),
                failed = out.failed,
                dropped = out.dropped,
                hours = %format!("{:.1}", catalog.total_hours()),
                "fetch: done"
            );
        }
        Commands::Show { pageid, json } => {
            let out = pipeline.run().await.context("pipeline failed")?;
            let catalog = Catalog::new(out.records);
            let Some(record) = catalog.get(pageid) else {
                bail!("Video not found: page id {pageid}");
            };
            if json {
                println!("{}", serde_json::to_string_pretty(record)?);
            } else {
                print_detail(record);
            }
        }
    }

    Ok(())
}
