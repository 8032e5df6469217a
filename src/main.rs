use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use backtest_lab::config::Settings;
use backtest_lab::logger::init_logger;
use backtest_lab::storage::{JsonFileStore, PortfolioStore};
use backtest_lab::types::{Asset, BacktestPeriod, Portfolio, PortfolioPatch, RebalanceType};
use backtest_lab::{backtest_portfolio, report};

#[derive(Parser)]
#[command(name = "backtest-lab", about = "Backtest buy-and-rebalance portfolios on daily closes")]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List stored portfolios
    List,
    /// Print one portfolio as JSON
    Show { id: String },
    /// Create a portfolio; weights must sum to 100
    Create {
        #[arg(long)]
        name: String,
        /// SYMBOL=WEIGHT[:MARKET], repeatable
        #[arg(long = "asset", required = true)]
        assets: Vec<Asset>,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long, default_value = "quarterly")]
        rebalance: RebalanceType,
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
    },
    /// Change fields of a stored portfolio
    Update {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
        /// Replaces every holding when given
        #[arg(long = "asset")]
        assets: Vec<Asset>,
        #[arg(long)]
        rebalance: Option<RebalanceType>,
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
    },
    /// Delete a stored portfolio
    Delete { id: String },
    /// Fetch prices and backtest a stored portfolio
    Run {
        id: String,
        /// Also write the timeline to this CSV file
        #[arg(long)]
        csv: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    init_logger(&cli.settings.log_level)?;

    let store = JsonFileStore::new(&cli.settings.store);

    match cli.command {
        Command::List => {
            for p in store.list()? {
                println!(
                    "{}  {:<24} {:<14} {} .. {}  [{}]",
                    p.id,
                    p.name,
                    p.rebalancing,
                    p.backtest_period.start_date,
                    p.backtest_period.end_date,
                    p.assets
                        .iter()
                        .map(|a| format!("{} {}%", a.symbol, a.weight))
                        .collect::<Vec<_>>()
                        .join(", ")
                );
            }
        }
        Command::Show { id } => {
            let portfolio = load(&store, &id)?;
            println!("{}", serde_json::to_string_pretty(&portfolio)?);
        }
        Command::Create {
            name,
            assets,
            description,
            rebalance,
            start,
            end,
        } => {
            let default_period = BacktestPeriod::default();
            let mut builder = Portfolio::builder()
                .name(&name)
                .description(&description)
                .rebalance_type(rebalance)
                .backtest_period(
                    start.as_deref().unwrap_or(&default_period.start_date),
                    end.as_deref().unwrap_or(&default_period.end_date),
                );
            for asset in assets {
                builder = builder.add_asset(asset);
            }
            let created = store.create(builder.build()?)?;
            println!("{}", created.id);
        }
        Command::Update {
            id,
            name,
            description,
            assets,
            rebalance,
            start,
            end,
        } => {
            let current = load(&store, &id)?;
            let backtest_period = (start.is_some() || end.is_some()).then(|| BacktestPeriod {
                start_date: start.unwrap_or(current.backtest_period.start_date.clone()),
                end_date: end.unwrap_or(current.backtest_period.end_date.clone()),
            });
            let patch = PortfolioPatch {
                name,
                description,
                assets: (!assets.is_empty()).then_some(assets),
                rebalancing: rebalance,
                backtest_period,
            };
            current.patched(patch.clone())?;
            let updated = store.update(&id, patch)?;
            println!("{}", serde_json::to_string_pretty(&updated)?);
        }
        Command::Delete { id } => {
            store.delete(&id)?;
        }
        Command::Run { id, csv } => {
            let portfolio = load(&store, &id)?;
            let provider = cli.settings.provider.build();
            let result = backtest_portfolio(provider.as_ref(), &portfolio).await?;

            println!("{} ({})", portfolio.name, portfolio.rebalancing);
            println!("{}", report::summary_frame(&result)?);
            if !result.timeline.is_empty() {
                println!("{}", report::timeline_frame(&result)?.tail(Some(10)));
            }
            if let Some(path) = csv {
                report::write_timeline_csv(&result, &path)?;
            }
        }
    }
    Ok(())
}

fn load(store: &dyn PortfolioStore, id: &str) -> Result<Portfolio> {
    store
        .get(id)?
        .with_context(|| format!("portfolio not found: {id}"))
}
