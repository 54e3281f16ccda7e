use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand, ValueEnum};
use crime_atlas::analysis::{join_unemployment, pearson, CorrelationResult};
use crime_atlas::census::{AcsProvider, GeoJsonFileProvider, PopulationProvider};
use crime_atlas::config::{Config, ConfigOverrides};
use crime_atlas::incidents::dedup::find_duplicates;
use crime_atlas::incidents::filters::filter_by_date;
use crime_atlas::incidents::ingest::load_incidents;
use crime_atlas::output::map::write_artifact;
use crime_atlas::output::scatter::render_scatter_svg;
use crime_atlas::output::table::{
    render_correlation_table, render_counts_table, render_duplicates_table, render_rates_table,
};
use crime_atlas::output::{duplicates_to_csv, pairs_to_csv, rates_to_csv, render_json};
use crime_atlas::pipeline::{run_pipeline, write_artifacts, PipelineOutput, PipelineParams};
use crime_atlas::unemployment::load_unemployment;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
    Csv,
}

#[derive(Debug, Parser)]
#[command(
    name = "crime-atlas",
    about = "Tract-level property crime rates, choropleth maps and unemployment correlation"
)]
struct Cli {
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
    output: OutputFormat,
    #[arg(short, long)]
    incidents: Option<String>,
    #[arg(short, long)]
    year: Option<i32>,
    #[arg(short, long)]
    unemployment: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Full pipeline: rates, map, scatter plot and run summary.
    Run {
        #[arg(long = "out-dir")]
        out_dir: Option<String>,
    },
    /// Exact duplicate rows within the date range.
    Duplicates,
    Rates,
    Correlate {
        /// Also write the scatter plot SVG here.
        #[arg(long)]
        plot: Option<PathBuf>,
    },
    Config {
        #[arg(long)]
        init: bool,
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let mut config = Config::load(Some(&config_path))?;
    config.apply_overrides(ConfigOverrides {
        incidents_path: cli.incidents.clone(),
        unemployment_path: cli.unemployment.clone(),
        target_year: cli.year,
        output_dir: match &cli.command {
            Commands::Run { out_dir } => out_dir.clone(),
            _ => None,
        },
    });

    if matches!(cli.command, Commands::Config { .. }) {
        return handle_config_command(&cli.command, &config, &config_path);
    }

    let params = config.pipeline_params()?;
    match &cli.command {
        Commands::Run { .. } => {
            let provider = build_provider(&config)?;
            let output = run_pipeline(&params, provider.as_ref()).await?;
            let correlation = match correlate(&config, &output) {
                Ok(result) => result,
                Err(err) => {
                    warn!("skipping correlation: {err:#}");
                    None
                }
            };
            let summary = write_artifacts(
                &params,
                &output,
                correlation.as_ref(),
                &config.artifact_paths(),
                &config.map_options(),
                &config.scatter_options(),
            )?;
            match cli.output {
                OutputFormat::Table => {
                    println!("{}", render_counts_table(&summary.counts));
                    if let Some(result) = &correlation {
                        println!("{}", render_correlation_table(result));
                    }
                    for artifact in &summary.artifacts {
                        println!("wrote {artifact}");
                    }
                }
                OutputFormat::Json => println!("{}", render_json(&summary)?),
                OutputFormat::Csv => print!("{}", rates_to_csv(&output.rates)?),
            }
        }
        Commands::Duplicates => {
            print_duplicates(&params, cli.output)?;
        }
        Commands::Rates => {
            let provider = build_provider(&config)?;
            let output = run_pipeline(&params, provider.as_ref()).await?;
            match cli.output {
                OutputFormat::Table => println!("{}", render_rates_table(&output.rates)),
                OutputFormat::Json => println!("{}", render_json(&output.rates)?),
                OutputFormat::Csv => print!("{}", rates_to_csv(&output.rates)?),
            }
        }
        Commands::Correlate { plot } => {
            let provider = build_provider(&config)?;
            let output = run_pipeline(&params, provider.as_ref()).await?;
            let result = correlate(&config, &output)?.ok_or_else(|| {
                anyhow!("no unemployment table configured (set input.unemployment_path or pass --unemployment)")
            })?;
            if let Some(path) = plot {
                write_scatter(&config, &result, path)?;
            }
            match cli.output {
                OutputFormat::Table => println!("{}", render_correlation_table(&result)),
                OutputFormat::Json => println!("{}", render_json(&result)?),
                OutputFormat::Csv => print!("{}", pairs_to_csv(&result.pairs)?),
            }
        }
        Commands::Config { .. } => {}
    }

    Ok(())
}

fn handle_config_command(command: &Commands, config: &Config, config_path: &Path) -> Result<()> {
    let Commands::Config { init, show } = command else {
        return Ok(());
    };
    if *init {
        Config::write_template(config_path)?;
        println!("Wrote config template to {}", config_path.display());
    }
    if *show || !*init {
        let mut shown = config.clone();
        if !shown.census.api_key.is_empty() {
            shown.census.api_key = "***".to_string();
        }
        println!("{}", render_json(&shown)?);
    }
    Ok(())
}

fn build_provider(config: &Config) -> Result<Box<dyn PopulationProvider>> {
    if let Some(path) = config.resolved_boundaries_path() {
        info!("reading tract populations from {}", path.display());
        return Ok(Box::new(GeoJsonFileProvider::new(path)));
    }
    let provider = AcsProvider::new(
        &config.census.api_base,
        &config.census.boundaries_url,
        config.api_key(),
    )?;
    Ok(Box::new(provider))
}

/// `Ok(None)` when no unemployment table is configured.
fn correlate(config: &Config, output: &PipelineOutput) -> Result<Option<CorrelationResult>> {
    let Some(path) = config.resolved_unemployment_path() else {
        return Ok(None);
    };
    let unemployment = load_unemployment(&path, &config.unemployment_columns())?;
    let pairs = join_unemployment(&output.rates, &unemployment);
    let result = pearson(&pairs)?;
    info!(
        n = result.n,
        r = result.r,
        p_value = result.p_value,
        "unemployment correlation"
    );
    Ok(Some(result))
}

fn write_scatter(config: &Config, result: &CorrelationResult, path: &Path) -> Result<()> {
    write_artifact(path, &render_scatter_svg(result, &config.scatter_options())?)?;
    info!("wrote scatter plot to {}", path.display());
    Ok(())
}

fn print_duplicates(params: &PipelineParams, format: OutputFormat) -> Result<()> {
    let ingest = load_incidents(&params.incidents_path)?;
    let in_range = filter_by_date(&ingest.records, &params.date_range);
    let report = find_duplicates(&in_range);
    match format {
        OutputFormat::Table => println!("{}", render_duplicates_table(&report)),
        OutputFormat::Json => println!("{}", render_json(&report)?),
        OutputFormat::Csv => print!("{}", duplicates_to_csv(&report)?),
    }
    Ok(())
}
