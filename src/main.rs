use catalog_prices::sheet::SheetFormat;
use catalog_prices::{BulkFetcher, CatalogClient, Config, Credentials, PriceMerger};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Append vendor catalog prices to a spreadsheet of article codes.
///
/// Credentials are read from IEK_USERNAME / IEK_PASSWORD (a .env file in the
/// working directory is honoured).
#[derive(Debug, Parser)]
#[command(name = "catalog-prices", version, about)]
struct Cli {
    /// Spreadsheet to read (xlsx, xlsm, xlsb, xls, ods or csv)
    input: PathBuf,

    /// Where to write the result (default: <input>_prices.<ext>)
    #[arg(short, long, conflicts_with = "in_place")]
    output: Option<PathBuf>,

    /// Overwrite the input file with the result
    #[arg(long)]
    in_place: bool,

    /// Header text of the article column
    #[arg(short = 'c', long)]
    column: Option<String>,

    /// 1-based row holding the column headers
    #[arg(long)]
    header_row: Option<u32>,

    /// Maximum simultaneous catalog requests
    #[arg(long)]
    max_concurrent: Option<usize>,

    /// Pause after each successful request, in milliseconds
    #[arg(long)]
    request_delay_ms: Option<u64>,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Cli {
    fn resolve_config(&self) -> catalog_prices::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };
        if let Some(column) = &self.column {
            config.sheet.article_column = column.clone();
        }
        if let Some(row) = self.header_row {
            config.sheet.header_row = row;
        }
        if let Some(n) = self.max_concurrent {
            config.fetch.max_concurrent = n;
        }
        if let Some(ms) = self.request_delay_ms {
            config.fetch.request_delay = Duration::from_millis(ms);
        }
        config.validate()?;
        Ok(config)
    }

    fn output_path(&self) -> PathBuf {
        if self.in_place {
            return self.input.clone();
        }
        self.output
            .clone()
            .unwrap_or_else(|| default_output_path(&self.input))
    }
}

/// `<stem>_prices.<ext>` next to the input; read-only formats become xlsx
fn default_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "prices".to_string());
    let ext = match SheetFormat::from_path(input) {
        Ok(SheetFormat::Csv) => "csv",
        _ => "xlsx",
    };
    input.with_file_name(format!("{stem}_prices.{ext}"))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("catalog_prices=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.resolve_config()?;
    let output = cli.output_path();

    let credentials = Credentials::from_env()?;
    let session = CatalogClient::new(config.api.clone(), config.retry.clone())?
        .login(&credentials)
        .await?;

    let fetcher = BulkFetcher::new(session, &config.fetch, config.retry.clone());
    let written = PriceMerger::new(fetcher)
        .process_file(
            &cli.input,
            &output,
            &config.sheet.article_column,
            config.sheet.header_row,
        )
        .await?;

    println!("{}", written.display());
    Ok(())
}
