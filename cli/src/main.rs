//! jdtls-probe - run symbol searches against a JDT.LS analyzer bundle.
//!
//! ```text
//! main() -> resolve config -> AnalyzerClient::start -> initialize
//!                                     |
//!                                     v
//!                     search | exec | ping | cases
//!                                     |
//!                                     v
//!                                 shutdown
//! ```
//!
//! Results go to stdout; logs go to stderr.

mod cases;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use probe_config::ProbeConfig;
use probe_lsp::{
    AnalysisMode, AnalyzerClient, AnnotationElement, AnnotationQuery, LocationKind, SymbolSearch,
};

#[derive(Parser)]
#[command(name = "jdtls-probe", version)]
#[command(about = "Run symbol searches against a JDT.LS analyzer bundle")]
struct Cli {
    /// Config file (default: <config dir>/jdtls-probe/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// JDT.LS installation directory (overrides JDTLS_PATH)
    #[arg(long, global = true)]
    jdtls_path: Option<PathBuf>,
    /// Workspace / data directory (overrides WORKSPACE_DIR)
    #[arg(long, global = true)]
    workspace_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search for symbols and print one line per match
    Search(SearchArgs),
    /// Execute a workspace command and print the raw JSON result
    Exec {
        /// Command identifier, e.g. io.konveyor.tackle.ruleEntry
        #[arg(long)]
        command: String,
        /// JSON argument; repeat for several
        #[arg(long = "arg")]
        args: Vec<String>,
    },
    /// Check that the analyzer bundle is loaded
    Ping,
    /// Run a TOML file of search cases (exit 1 if any fails)
    Cases {
        /// Case file
        file: PathBuf,
    },
}

#[derive(Args)]
struct SearchArgs {
    #[arg(long, default_value = "java")]
    project: String,
    /// Pattern, e.g. java.io.File or javax.ejb.*
    #[arg(long)]
    query: String,
    /// Location code (0-14) or name, e.g. import
    #[arg(long, default_value = "default")]
    location: LocationKind,
    #[arg(long, default_value = "source-only")]
    mode: AnalysisMode,
    /// Restrict to this project-relative path; repeat for several
    #[arg(long = "include")]
    included_paths: Vec<String>,
    /// Only match elements carrying this annotation
    #[arg(long)]
    annotation: Option<String>,
    /// Annotation element constraint as NAME=VALUE; repeat for several
    #[arg(long = "element", value_parser = parse_element, requires = "annotation")]
    elements: Vec<AnnotationElement>,
    /// Also search open-source dependency sources
    #[arg(long)]
    open_source_libraries: bool,
}

impl SearchArgs {
    fn to_search(&self) -> SymbolSearch {
        let mut search = SymbolSearch::new(&self.project, &self.query, self.location, self.mode)
            .included_paths(self.included_paths.iter().cloned());
        if let Some(pattern) = &self.annotation {
            let mut query = AnnotationQuery::new(pattern);
            query.elements.clone_from(&self.elements);
            search = search.annotation(query);
        }
        if self.open_source_libraries {
            search = search.include_open_source_libraries(true);
        }
        search
    }
}

fn parse_element(raw: &str) -> Result<AnnotationElement, String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got `{raw}`"))?;
    if name.trim().is_empty() {
        return Err(format!("empty element name in `{raw}`"));
    }
    Ok(AnnotationElement {
        name: name.trim().to_string(),
        value: value.to_string(),
    })
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

fn resolve_config(cli: &Cli) -> Result<probe_config::ResolvedConfig> {
    let file = ProbeConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if file.is_none() {
        tracing::debug!("No config file found, using defaults");
    }
    let mut resolved = file.unwrap_or_default().resolve();
    if let Some(path) = &cli.jdtls_path {
        resolved.jdtls_path.clone_from(path);
    }
    if let Some(dir) = &cli.workspace_dir {
        resolved.workspace_dir.clone_from(dir);
    }
    Ok(resolved)
}

async fn open_session(client: &mut AnalyzerClient) -> Result<()> {
    client.start().context("starting analyzer")?;
    let init = client
        .initialize()
        .await
        .context("initializing analyzer")?;
    tracing::debug!(commands = ?init.commands(), "Analyzer advertised commands");
    Ok(())
}

async fn run_command(client: &AnalyzerClient, command: Commands) -> Result<ExitCode> {
    match command {
        Commands::Search(args) => {
            let symbols = client.search_symbols(&args.to_search()).await?;
            for symbol in &symbols {
                println!("{}", symbol.display_line());
            }
            tracing::info!(found = symbols.len(), "Search complete");
            Ok(ExitCode::SUCCESS)
        }
        Commands::Exec { command, args } => {
            let arguments = args
                .iter()
                .enumerate()
                .map(|(i, raw)| {
                    serde_json::from_str::<serde_json::Value>(raw)
                        .with_context(|| format!("argument {i} is not valid JSON"))
                })
                .collect::<Result<Vec<_>>>()?;
            let result = client.execute_command(&command, arguments.as_slice()).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Ping => {
            let reply = client.ping().await?;
            println!("{reply}");
            Ok(ExitCode::SUCCESS)
        }
        Commands::Cases { file } => {
            let cases = cases::load(&file)?;
            let summary = cases::run_all(client, &cases).await;
            print!("{summary}");
            Ok(if summary.all_passed() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing();

    let cli = Cli::parse();
    let config = resolve_config(&cli)?;
    let command = cli.command;

    // Validate the case file before starting the analyzer.
    if let Commands::Cases { file } = &command {
        cases::load(file)?;
    }

    let mut client = AnalyzerClient::new(config.launch_spec(), config.client_options());

    if let Err(err) = open_session(&mut client).await {
        client.shutdown().await;
        return Err(err);
    }

    let result = run_command(&client, command).await;
    let outcome = client.shutdown().await;
    tracing::debug!(?outcome, "Session closed");
    result
}
