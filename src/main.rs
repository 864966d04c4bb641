use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use equitrack::core::log::init_logging;
use equitrack::core::period::SnapshotSeries;
use equitrack::core::quote::ScreenerKind;
use rust_decimal::Decimal;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    /// Account to operate on; defaults to `account` from the configuration
    #[arg(short, long, global = true)]
    account: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Movers {
    Gainers,
    Losers,
    Active,
}

impl From<Movers> for ScreenerKind {
    fn from(kind: Movers) -> ScreenerKind {
        match kind {
            Movers::Gainers => ScreenerKind::Gainers,
            Movers::Losers => ScreenerKind::Losers,
            Movers::Active => ScreenerKind::MostActive,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// Buy units at the current market price
    Buy { symbol: String, quantity: Decimal },
    /// Sell units at the current market price
    Sell { symbol: String, quantity: Decimal },
    /// Display positions with cost basis and realized gains
    Holdings,
    /// Display the transaction log
    Transactions,
    /// Check stored positions against a replay of the transaction log
    Verify,
    /// Value the account at current prices and record snapshots
    Valuation,
    /// Display recorded valuation snapshots
    History {
        /// daily or hourly
        #[arg(short, long, default_value = "daily")]
        series: SnapshotSeries,
    },
    /// Revalue every account and record snapshots
    Snapshot,
    /// Display current quotes
    Quote {
        #[arg(required = true)]
        symbols: Vec<String>,
    },
    /// Display top gainers, losers or most active instruments
    Movers {
        #[arg(value_enum, default_value_t = Movers::Gainers)]
        kind: Movers,
        #[arg(short = 'n', long, default_value_t = 10)]
        count: usize,
    },
    /// Search instruments and related news
    Search {
        #[arg(required = true)]
        query: Vec<String>,
    },
}

fn to_app_command(cmd: Commands, account: Option<String>) -> equitrack::AppCommand {
    use equitrack::AppCommand;

    match cmd {
        Commands::Buy { symbol, quantity } => AppCommand::Buy {
            account,
            symbol,
            quantity,
        },
        Commands::Sell { symbol, quantity } => AppCommand::Sell {
            account,
            symbol,
            quantity,
        },
        Commands::Holdings => AppCommand::Holdings { account },
        Commands::Transactions => AppCommand::Transactions { account },
        Commands::Verify => AppCommand::Verify { account },
        Commands::Valuation => AppCommand::Valuation { account },
        Commands::History { series } => AppCommand::History { account, series },
        Commands::Snapshot => AppCommand::Snapshot,
        Commands::Quote { symbols } => AppCommand::Quote { symbols },
        Commands::Movers { kind, count } => AppCommand::Movers {
            kind: kind.into(),
            count,
        },
        Commands::Search { query } => AppCommand::Search {
            query: query.join(" "),
        },
        Commands::Setup => unreachable!("Setup command should be handled separately"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let result = match cli.command {
        Some(Commands::Setup) => equitrack::cli::setup::setup(),
        Some(cmd) => {
            equitrack::run_command(to_app_command(cmd, cli.account), cli.config_path.as_deref())
                .await
        }
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}
