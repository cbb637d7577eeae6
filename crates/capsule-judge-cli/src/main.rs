//! Capsule Judge CLI
//!
//! Judges code submissions and SQL capsules from the command line. Results
//! are printed to stdout as JSON; logs go to stderr.

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use capsule_judge::{
    Config, EXAMPLE_CONFIG, ExecutionRequest, Runner, SqlCapsule, SqlValidator,
};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{Level, debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "capsule-judge")]
#[command(about = "Judge code submissions and SQL capsules in isolation")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new configuration file
    Init {
        /// Output path (default: capsule-judge.toml)
        #[arg(short, long, default_value = "capsule-judge.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Judge a source file (compile if needed, then execute)
    Run {
        /// Source file to run
        #[arg(value_name = "FILE")]
        source: PathBuf,

        /// Language ID (e.g., java, go, python3)
        #[arg(short, long)]
        language: String,

        /// File fed to the program's stdin
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Time limit in seconds
        #[arg(short, long)]
        time_limit: Option<f64>,

        /// Memory limit in MB
        #[arg(short, long)]
        memory_limit: Option<u64>,
    },

    /// Judge a JSON request read from a file or stdin
    Judge {
        /// Request file (default: stdin)
        #[arg(value_name = "FILE")]
        request: Option<PathBuf>,
    },

    /// Validate a JSON SQL capsule read from a file or stdin
    Sql {
        /// Capsule file (default: stdin)
        #[arg(value_name = "FILE")]
        capsule: Option<PathBuf>,
    },

    /// List available languages
    Languages,

    /// Show effective configuration
    ShowConfig,

    /// Report which language toolchains are reachable
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    // stdout carries JSON only
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = if let Some(ref path) = cli.config {
        info!(?path, "loading configuration");
        Config::from_file(path).context("failed to load configuration")?
    } else {
        debug!("using default configuration");
        Config::from_env().context("failed to load default configuration")?
    };

    match cli.command {
        Commands::Init { output, force } => init_config(&output, force).await,
        Commands::Run {
            source,
            language,
            input,
            time_limit,
            memory_limit,
        } => {
            run_source(
                config,
                &source,
                language,
                input.as_deref(),
                time_limit,
                memory_limit,
            )
            .await
        }
        Commands::Judge { request } => judge_request(config, request.as_deref()).await,
        Commands::Sql { capsule } => validate_capsule(config, capsule.as_deref()).await,
        Commands::Languages => {
            list_languages(&config);
            Ok(())
        }
        Commands::ShowConfig => {
            show_config(&config);
            Ok(())
        }
        Commands::Health => health(config),
    }
}

async fn run_source(
    config: Config,
    source: &Path,
    language: String,
    input: Option<&Path>,
    time_limit: Option<f64>,
    memory_limit: Option<u64>,
) -> Result<()> {
    let code = tokio::fs::read_to_string(source)
        .await
        .context("failed to read source file")?;

    let mut request = ExecutionRequest::new(language, code);
    if let Some(input_path) = input {
        let input = tokio::fs::read_to_string(input_path)
            .await
            .context("failed to read input file")?;
        request = request.with_input(input);
    }
    // Only explicit values, so language defaults still apply
    request.timeout = time_limit;
    request.memory_limit_mb = memory_limit;

    judge(config, &request).await
}

async fn judge_request(config: Config, path: Option<&Path>) -> Result<()> {
    let body = read_body(path).await?;
    let request: ExecutionRequest =
        serde_json::from_str(&body).context("failed to parse judge request")?;
    judge(config, &request).await
}

async fn judge(config: Config, request: &ExecutionRequest) -> Result<()> {
    info!(language = %request.language, "judging submission");
    let runner = Runner::new(config);
    let response = runner.judge(request).await;

    info!(
        success = response.success,
        exit_code = response.exit_code,
        time = format_args!("{}ms", response.execution_time),
        memory = format_args!("{} MB", response.memory_used),
        "judge result"
    );
    print_json(&response)?;

    if !response.success {
        std::process::exit(1);
    }
    Ok(())
}

async fn validate_capsule(config: Config, path: Option<&Path>) -> Result<()> {
    let body = read_body(path).await?;
    let capsule: SqlCapsule =
        serde_json::from_str(&body).context("failed to parse SQL capsule")?;

    info!(backend = %capsule.backend(), "validating capsule");
    let validator = SqlValidator::new(config.sql);
    let response = validator.validate(&capsule).await;
    print_json(&response)?;

    if !response.success {
        std::process::exit(1);
    }
    Ok(())
}

fn health(config: Config) -> Result<()> {
    let report = Runner::new(config).health();
    print_json(&report)?;

    if !report.is_healthy() {
        std::process::exit(1);
    }
    Ok(())
}

fn list_languages(config: &Config) {
    println!("Available languages:\n");

    let mut languages: Vec<_> = config.languages.iter().collect();
    languages.sort_by_key(|(id, _)| *id);

    for (id, lang) in languages {
        let lang_type = if lang.is_restricted() {
            "restricted"
        } else if lang.is_compiled() {
            "compiled"
        } else {
            "interpreted"
        };
        println!("  {:<15} {} ({})", id, lang.name, lang_type);
    }
}

fn show_config(config: &Config) {
    let limits = &config.default_limits;
    println!("Default resource limits:");
    println!("  Time limit: {:?} s", limits.time_limit);
    println!("  Memory limit: {:?} MB", limits.memory_limit);
    println!("  Max output: {:?} bytes", limits.max_output);
    println!();
    println!("Ceilings:");
    println!("  Max time limit: {} s", config.ceilings.max_time_limit);
    println!("  Max memory limit: {} MB", config.ceilings.max_memory_limit);
    println!("  Max source size: {} bytes", config.ceilings.max_source_bytes);
    println!();
    match config.workspace_root {
        Some(ref root) => println!("Workspace root: {}", root.display()),
        None => println!("Workspace root: system temp directory"),
    }
    println!();
    println!("SQL:");
    println!("  Statement timeout: {} s", config.sql.statement_timeout);
    println!("  Max rows: {}", config.sql.max_rows);
    println!(
        "  PostgreSQL: {}",
        if config.sql.postgres.is_some() {
            "configured"
        } else {
            "from DB_* environment"
        }
    );
    println!();
    println!("Languages configured: {}", config.languages.len());
}

async fn init_config(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "Configuration file already exists at '{}'. Use --force to overwrite.",
            output.display()
        );
    }

    tokio::fs::write(output, EXAMPLE_CONFIG)
        .await
        .context("failed to write configuration file")?;

    println!("Created configuration file at '{}'", output.display());
    Ok(())
}

async fn read_body(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read '{}'", path.display())),
        None => tokio::task::spawn_blocking(|| {
            let mut body = String::new();
            std::io::stdin()
                .read_to_string(&mut body)
                .context("failed to read stdin")?;
            Ok::<_, anyhow::Error>(body)
        })
        .await
        .context("stdin reader failed")?,
    }
}

fn print_json(value: &impl Serialize) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("failed to serialize result")?;
    println!("{json}");
    Ok(())
}
