use std::process::ExitCode;

use anyhow::{Context, Result, anyhow};
use tracing_subscriber::EnvFilter;

use hpxml_schema::{AppContext, Cli, Command, ConfigManager, Output};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse_args();
    init_tracing(&cli);

    if let Err(message) = cli.validate() {
        eprintln!("Error: {}", message);
        return Ok(ExitCode::from(2));
    }

    let config = ConfigManager::load_config(&cli)
        .await
        .context("failed to load configuration")?;
    tracing::debug!(?config, "configuration loaded");

    let app = AppContext::from_config(config).await;
    let output = Output::new(cli.verbosity(), cli.output_format);

    run(&cli, &app, &output).await
}

fn init_tracing(cli: &Cli) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(cli.log_directive())
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if cli.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(cli: &Cli, app: &AppContext, output: &Output) -> Result<ExitCode> {
    let version = cli.schema_version.as_deref();

    match &cli.command {
        Command::Versions => {
            let registry = app.registry();
            let versions: Vec<_> = registry
                .available_versions()
                .iter()
                .filter_map(|v| registry.version_info(v))
                .collect();
            println!("{}", output.format_versions(&versions));
        }
        Command::Tree { section, depth } => {
            let (version, tree) = app.load_tree(version).await?;
            let node = match section {
                Some(xpath) => tree
                    .find(xpath)
                    .ok_or_else(|| anyhow!("Section not found: {}", xpath))?,
                None => tree.as_ref(),
            };
            println!("{}", output.format_tree(&version, &node.limited_to_depth(*depth)));
        }
        Command::Fields { section } => {
            let (_, tree) = app.load_tree(version).await?;
            let node = match section {
                Some(xpath) => tree
                    .find(xpath)
                    .ok_or_else(|| anyhow!("Section not found: {}", xpath))?,
                None => tree.as_ref(),
            };
            println!("{}", output.format_fields(node, &node.field_children()));
        }
        Command::Search { query, kind, limit } => {
            let (_, tree) = app.load_tree(version).await?;
            let matches = tree.search(query, *kind, *limit);
            println!("{}", output.format_search(query, &matches));
        }
        Command::ValidateField { xpath, value } => {
            let (_, tree) = app.load_tree(version).await?;
            let node = tree
                .find(xpath)
                .ok_or_else(|| anyhow!("Field not found: {}", xpath))?;
            let check = node.check_value(value.as_deref());
            println!("{}", output.format_value_check(xpath, &check));
            if !check.valid {
                return Ok(ExitCode::from(1));
            }
        }
        Command::Stats => {
            let stats = app.cache().stats().await;
            println!("{}", output.format_stats(&stats));
        }
        Command::ClearCache => {
            app.reset().await;
            println!("{}", output.format_message("Cache cleared"));
        }
    }

    Ok(ExitCode::SUCCESS)
}
