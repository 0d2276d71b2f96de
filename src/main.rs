use clap::{Parser, Subcommand};

use tokentally::cli;
use tokentally::core::config::{AppConfig, ConfigError};

#[derive(Parser)]
#[command(
    name = "tally",
    about = "Local token usage and cost accounting for Claude Code logs",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Output format
    #[arg(short, long, global = true)]
    format: Option<String>,

    /// Shorthand for --format json
    #[arg(short = 'j', long = "json", global = true)]
    json: bool,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pretty: bool,

    /// Disable ANSI colors
    #[arg(long, global = true)]
    no_color: bool,

    /// Verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Load logs once and print today, the current block, recent days and this month
    Report,
    /// Keep usage live: refresh on a timer and whenever log files change
    Watch,
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Generate default config file
    Init,
    /// Print every setting
    Show,
    /// Validate config file
    Check,
    /// Print one setting
    Get {
        /// Setting name
        key: String,
    },
    /// Change one setting (`none` clears optional settings)
    Set {
        /// Setting name
        key: String,
        /// New value
        value: String,
    },
}

/// `RUST_LOG` wins, then `--verbose`, then the configured level, then the
/// command default. Logs go to stderr so JSON on stdout stays parseable.
fn init_tracing(verbose: bool, configured: Option<&str>, default_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if verbose {
            "debug"
        } else {
            configured.unwrap_or(default_level)
        };
        EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new(default_level))
    });

    let result = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
    drop(result);
}

/// Defaults when the config file cannot be loaded.
fn runtime_config(loaded: Result<AppConfig, ConfigError>) -> AppConfig {
    loaded.unwrap_or_else(|e| {
        tracing::warn!("{e}; using default settings");
        AppConfig::default()
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let output_opts = cli::output::OutputOptions {
        format: if cli.json {
            cli::output::OutputFormat::Json
        } else {
            match cli.format.as_deref() {
                Some("json") => cli::output::OutputFormat::Json,
                _ => cli::output::OutputFormat::Text,
            }
        },
        pretty: cli.pretty,
        use_color: cli::output::detect_color(!cli.no_color),
    };

    let loaded = AppConfig::load();
    let default_level = match cli.command {
        Some(Commands::Watch) => "info",
        _ => "warn",
    };
    init_tracing(
        cli.verbose,
        loaded.as_ref().ok().and_then(|c| c.log_level.as_deref()),
        default_level,
    );

    match cli.command {
        None | Some(Commands::Report) => {
            let config = runtime_config(loaded);
            cli::report_cmd::run(&config, &output_opts).await?;
        }
        Some(Commands::Watch) => {
            let config = runtime_config(loaded);
            cli::watch_cmd::run(&config, &output_opts).await?;
        }
        Some(Commands::Config { action }) => match action {
            ConfigAction::Init => cli::config_cmd::init(&output_opts)?,
            ConfigAction::Show => cli::config_cmd::show(&output_opts)?,
            ConfigAction::Check => cli::config_cmd::check(&output_opts)?,
            ConfigAction::Get { key } => cli::config_cmd::get(&key, &output_opts)?,
            ConfigAction::Set { key, value } => {
                cli::config_cmd::set(&key, &value, &output_opts)?
            }
        },
    }

    Ok(())
}
