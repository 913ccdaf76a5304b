use anyhow::{Context as _, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use reportcard_core::{
    AuditThresholds, CatalogConfig, Listing, ListingQuery, PeriodField, SortPolicy,
    audit_catalog, period_label, query, render_audit_markdown, render_card_html,
    render_card_markdown, render_listing_html, render_listing_markdown,
};

#[derive(Parser, Debug)]
#[command(
    name = "reportcards",
    version,
    about = "Browse a catalog of student report cards",
    author = "Report Cards Team"
)]
struct Cli {
    /// Catalog document (JSON array of report cards)
    #[arg(
        long,
        global = true,
        env = "REPORT_CARDS_SOURCE",
        default_value = reportcard_core::DEFAULT_SOURCE_PATH
    )]
    source: PathBuf,

    /// Field used to group report cards into periods
    #[arg(long, global = true, value_enum, default_value_t = PeriodArg::MonthYear)]
    period: PeriodArg,

    /// Output format: markdown, html or json
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Markdown)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List report cards for one period
    List {
        /// Period key to show; defaults to the most recent, pass "" for all
        #[arg(long)]
        key: Option<String>,
        /// Sort policy: default, by_date or by_type
        #[arg(long, default_value = "default")]
        sort: String,
    },
    /// Show a single report card
    Show { id: String },
    /// List available periods, most recent first
    Periods,
    /// Check the catalog for gaps and inconsistencies
    Audit {
        #[arg(long, default_value_t = 1)]
        min_accounts: usize,
        /// Type every account must file in every period
        #[arg(long)]
        required_type: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PeriodArg {
    ReferenceDate,
    MonthYear,
}

impl From<PeriodArg> for PeriodField {
    fn from(value: PeriodArg) -> Self {
        match value {
            PeriodArg::ReferenceDate => PeriodField::ReferenceDate,
            PeriodArg::MonthYear => PeriodField::MonthYear,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Markdown,
    Html,
    Json,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = CatalogConfig::new(cli.source.clone());
    config.period = cli.period.into();
    if let Command::List { sort, .. } = &cli.command {
        config.sort = SortPolicy::from_token(sort);
    }
    if let Command::Audit {
        min_accounts,
        required_type,
    } = &cli.command
    {
        config.audit = AuditThresholds {
            min_accounts: *min_accounts,
            required_type: required_type.clone(),
        };
    }
    config.validate().context("invalid configuration")?;
    debug!(?config, "resolved catalog configuration");

    let repository = config.repository();
    let cards = repository
        .all()
        .with_context(|| format!("failed to load report cards from {}", repository.source()))?;

    match &cli.command {
        Command::List { key, .. } => {
            let request = ListingQuery::new(config.period)
                .with_period(key.clone())
                .with_sort(config.sort);
            let listing = Listing::build(cards, &request);
            match cli.format {
                OutputFormat::Markdown => println!("{}", render_listing_markdown(&listing)?),
                OutputFormat::Html => println!("{}", render_listing_html(&listing)?),
                OutputFormat::Json => print_json(&listing.to_json_value())?,
            }
        }
        Command::Show { id } => {
            let Some(card) = repository.find_by_id(id)? else {
                bail!("Report card not found: {id}");
            };
            match cli.format {
                OutputFormat::Markdown => {
                    println!("{}", render_card_markdown(card, config.period)?)
                }
                OutputFormat::Html => println!("{}", render_card_html(card, config.period)?),
                OutputFormat::Json => print_json(&card.to_json_value())?,
            }
        }
        Command::Periods => {
            let periods = query::available_periods(cards, config.period);
            match cli.format {
                OutputFormat::Json => {
                    let payload: Vec<serde_json::Value> = periods
                        .iter()
                        .map(|key| serde_json::json!({ "key": key, "label": period_label(key) }))
                        .collect();
                    print_json(&serde_json::Value::Array(payload))?;
                }
                OutputFormat::Markdown => {
                    for key in periods {
                        println!("- {} (`{}`)", period_label(key), key);
                    }
                }
                OutputFormat::Html => bail!("html output is only available for list and show"),
            }
        }
        Command::Audit { .. } => {
            let digest = audit_catalog(cards, config.period, &config.audit);
            match cli.format {
                OutputFormat::Markdown => println!("{}", render_audit_markdown(&digest)?),
                OutputFormat::Json => print_json(&serde_json::to_value(&digest)?)?,
                OutputFormat::Html => bail!("html output is only available for list and show"),
            }
        }
    }

    Ok(())
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
