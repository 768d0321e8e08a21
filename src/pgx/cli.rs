//! Implementation of the `analyze` sub command.

use std::{io::Write, time::Instant};

use anyhow::Context;
use clap::Parser;

use super::{
    analyze,
    narrative::{enrich, CommandSummarizer, Summarizer, TemplateSummarizer},
    result::AnalysisOutcome,
};
use crate::{
    common::{io::open_write_maybe_gz, trace_rss_now},
    conf::{Config, ConfigFile, NarrativeConfig, NarrativeMode},
    db::Tables,
};

/// Command line arguments for `analyze` sub command.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Predict drug risks from a VCF file", long_about = None)]
pub struct Args {
    /// Path to the input VCF file, optionally gzip-compressed.
    #[arg(long, required = true)]
    pub path_input: String,
    /// Drugs to evaluate, comma-separated.
    #[arg(long, required = true, value_delimiter = ',')]
    pub drugs: Vec<String>,
    /// Path to the JSON configuration file.
    #[arg(long)]
    pub path_config: Option<String>,
    /// Path to alternative reference tables, built-in tables are used by default.
    #[arg(long)]
    pub path_tables: Option<String>,
    /// Path to the output JSON file, stdout when unset.
    #[arg(long)]
    pub path_output: Option<String>,
    /// Only analyze this sample.
    #[arg(long)]
    pub sample: Option<String>,
    /// Override the narrative mode of the configuration.
    #[arg(long, value_enum)]
    pub narrative: Option<NarrativeMode>,
    /// Override the narrative command, split at whitespace.
    #[arg(long)]
    pub narrative_command: Option<String>,
}

/// Merge the command line overrides into the configuration file.
fn apply_overrides(mut file: ConfigFile, args: &Args) -> ConfigFile {
    if let Some(sample) = &args.sample {
        file.sample = Some(sample.clone());
    }
    if let Some(command) = &args.narrative_command {
        file.narrative.command = command.split_whitespace().map(String::from).collect();
        if args.narrative.is_none() {
            file.narrative.mode = NarrativeMode::Command;
        }
    }
    if let Some(mode) = args.narrative {
        file.narrative.mode = mode;
    }
    file
}

/// Run narrative enrichment on a fresh runtime, if enabled.
fn run_narrative(
    outcome: &mut AnalysisOutcome,
    narrative: &NarrativeConfig,
) -> Result<(), anyhow::Error> {
    let summarizer: Box<dyn Summarizer> = match narrative.mode {
        NarrativeMode::None => return Ok(()),
        NarrativeMode::Template => Box::new(TemplateSummarizer),
        NarrativeMode::Command => Box::new(
            CommandSummarizer::new(&narrative.command)
                .ok_or_else(|| anyhow::anyhow!("narrative command is empty"))?,
        ),
    };

    tracing::info!("Writing narratives ({})...", narrative.mode);
    let before_narrative = Instant::now();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("could not start async runtime")?;
    runtime.block_on(enrich(outcome, summarizer.as_ref(), narrative.timeout));
    tracing::info!(
        "... done writing narratives in {:?}",
        before_narrative.elapsed()
    );

    Ok(())
}

fn write_outcome(outcome: &AnalysisOutcome, path: Option<&str>) -> Result<(), anyhow::Error> {
    let mut writer: Box<dyn Write> = match path {
        Some(path) => open_write_maybe_gz(path)
            .with_context(|| format!("could not open output file {}", path))?,
        None => Box::new(std::io::stdout().lock()),
    };
    serde_json::to_writer_pretty(&mut writer, outcome)?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
}

/// Main entry point for `analyze` sub command.
pub fn run(args_common: &crate::common::Args, args: &Args) -> Result<(), anyhow::Error> {
    let before_anything = Instant::now();
    tracing::info!("args_common = {:?}", &args_common);
    tracing::info!("args = {:?}", &args);

    tracing::info!("Loading reference tables...");
    let tables = Tables::load(args.path_tables.as_deref())?;
    let config = Config::new(
        apply_overrides(ConfigFile::load(args.path_config.as_deref())?, args),
        &tables,
    )?;
    tracing::debug!("config = {:?}", &config);

    tracing::info!("Analyzing {}...", &args.path_input);
    let before_analysis = Instant::now();
    let bytes = std::fs::read(&args.path_input)
        .with_context(|| format!("could not read input file {}", &args.path_input))?;
    let mut outcome = analyze(&bytes, &args.drugs, &tables, &config)
        .with_context(|| format!("could not analyze {}", &args.path_input))?;
    tracing::info!(
        "... done analyzing {} sample(s) in {:?}",
        outcome.samples.len(),
        before_analysis.elapsed()
    );

    trace_rss_now();

    run_narrative(&mut outcome, &config.narrative)?;

    for warning in &outcome.warnings {
        tracing::warn!("{}", warning);
    }
    write_outcome(&outcome, args.path_output.as_deref())?;
    tracing::info!(
        "summary: {} result(s), {} unsupported drug(s), {} warning(s)",
        outcome.results.len(),
        outcome.unsupported_drugs.len(),
        outcome.warnings.len()
    );
    tracing::info!("All of `analyze` completed in {:?}", before_anything.elapsed());

    Ok(())
}
