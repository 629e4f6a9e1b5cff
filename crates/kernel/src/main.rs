//! Apix developer CLI
//!
//! Runs transformer definitions against JSON records and prints the SQL the
//! SQL collaborator would run for a filter request.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

use apix_kernel::filter::{FilterDefinition, FilterEngine, FilterRequest, SortSpec};
use apix_kernel::projection::{FormatRegistry, Transformer, TransformerBuilder, TransformerDefinition};
use apix_kernel::query::memory::MemorySource;
use apix_kernel::query::sql::{Schema, SqlQuery};
use apix_kernel::{ApiResponse, Config};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Filter JSON records and print the projected response envelope.
    Project {
        /// Transformer definition (`.yaml`, `.yml` or `.json`).
        #[arg(long)]
        definition: PathBuf,

        /// JSON file holding an array of records.
        #[arg(long)]
        records: PathBuf,

        /// View to project with.
        #[arg(long)]
        view: Option<String>,

        /// Current action name, used when no view is given.
        #[arg(long)]
        action: Option<String>,

        /// Filter request data as a JSON object.
        #[arg(long, default_value = "{}")]
        filters: String,

        /// Columns the `search` filter looks in (comma separated).
        #[arg(long, value_delimiter = ',')]
        searchable: Vec<String>,

        /// Extra sortable columns (comma separated).
        #[arg(long, value_delimiter = ',')]
        sortable: Vec<String>,

        /// Base URL for pagination links.
        #[arg(long, default_value = "http://localhost/")]
        base_url: String,
    },

    /// Print the SELECT and COUNT statements for a filter request.
    Sql {
        /// Table to query.
        #[arg(long)]
        table: String,

        /// Filter request data as a JSON object.
        #[arg(long, default_value = "{}")]
        filters: String,

        /// Transformer definition used for auto select and eager loads.
        #[arg(long)]
        definition: Option<PathBuf>,

        /// Relation schema (`.yaml`, `.yml` or `.json`).
        #[arg(long)]
        schema: Option<PathBuf>,

        /// View to select for.
        #[arg(long)]
        view: Option<String>,

        /// Columns the `search` filter looks in (comma separated).
        #[arg(long, value_delimiter = ',')]
        searchable: Vec<String>,

        /// Extra sortable columns (comma separated).
        #[arg(long, value_delimiter = ',')]
        sortable: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = Config::from_env().context("failed to load configuration")?;
    let cli = Cli::parse();

    match cli.command {
        Command::Project {
            definition,
            records,
            view,
            action,
            filters,
            searchable,
            sortable,
            base_url,
        } => {
            let transformer: Transformer<Value> =
                TransformerBuilder::from_definition(load_definition(&definition)?)
                    .config(&config)
                    .build()
                    .context("invalid transformer definition")?;

            let rows: Vec<Value> = serde_json::from_str(&read(&records)?)
                .with_context(|| format!("{} must hold a JSON array", records.display()))?;
            info!(records = rows.len(), "records loaded");

            let filter = filter_definition(Some(transformer.formats().clone()), searchable, sortable)?;
            let engine = FilterEngine::new(Arc::new(filter), config.clone());

            let mut request = FilterRequest::new(parse_filters(&filters)?);
            if let Some(view) = &view {
                request = request.view(view.clone());
            }
            if let Some(action) = &action {
                request = request.action(action.clone());
            }

            let source = MemorySource::new(rows).with_per_page(config.pagination.per_page);
            let page = engine.filter(&source, request).await?;
            let data = transformer.transform_page(&page, view.as_deref(), action.as_deref())?;

            let base_url = Url::parse(&base_url).context("invalid base URL")?;
            let body = ApiResponse::success()
                .data(transformer.wrapper(), data)
                .with_page(&page.meta, &base_url)
                .into_value();
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        Command::Sql {
            table,
            filters,
            definition,
            schema,
            view,
            searchable,
            sortable,
        } => {
            let formats = match &definition {
                Some(path) => Some(load_definition(path)?.formats),
                None => None,
            };
            let schema = match &schema {
                Some(path) => load_schema(path)?,
                None => Schema::new(),
            };

            let filter = filter_definition(formats, searchable, sortable)?;
            let engine = FilterEngine::new(Arc::new(filter), config.clone());

            let mut request = FilterRequest::new(parse_filters(&filters)?);
            if let Some(view) = view {
                request = request.view(view);
            }

            let mut query = SqlQuery::new(&table, Arc::new(schema));
            let plan = engine.apply(&mut query, &request, config.pagination.per_page)?;
            info!(page = plan.page, per_page = plan.per_page, mode = ?plan.mode, "pagination");

            println!("{};", query.build(plan.page, plan.per_page));
            println!("{};", query.build_count());
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yaml" | "yml")
    )
}

fn load_definition(path: &Path) -> Result<TransformerDefinition> {
    let source = read(path)?;
    let definition = if is_yaml(path) {
        TransformerDefinition::from_yaml(&source)?
    } else {
        TransformerDefinition::from_json(&source)?
    };
    Ok(definition)
}

fn load_schema(path: &Path) -> Result<Schema> {
    let source = read(path)?;
    let schema = if is_yaml(path) {
        serde_yml::from_str(&source)?
    } else {
        serde_json::from_str(&source)?
    };
    Ok(schema)
}

fn parse_filters(filters: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(filters).context("filters must be JSON")?;
    anyhow::ensure!(value.is_object(), "filters must be a JSON object");
    Ok(value)
}

fn filter_definition(
    formats: Option<FormatRegistry>,
    searchable: Vec<String>,
    sortable: Vec<String>,
) -> Result<FilterDefinition> {
    let sort = sortable
        .into_iter()
        .fold(SortSpec::new(), |sort, column| sort.column(column));

    let mut builder = FilterDefinition::builder().searchable(searchable).sort(sort);
    if let Some(formats) = formats {
        builder = builder.formats(Arc::new(formats));
    }
    Ok(builder.build()?)
}
