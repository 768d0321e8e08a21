//! Configuration of the analysis.
//!
//! A `ConfigFile` is read from JSON (all keys optional), overridden from the
//! command line, and turned into a `Config` by validating it against the
//! reference tables exactly once at startup.

use std::time::Duration;

use anyhow::Context;
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::db::{canonical_drug_name, Tables};

/// Default cap on the number of phase units enumerated per gene.
pub const DEFAULT_MAX_PHASE_UNITS: usize = 12;

/// Hard cap on `max_phase_units`, enumeration is exponential in it.
pub const MAX_PHASE_UNITS_LIMIT: usize = 20;

/// Default timeout for one narrative.
pub const DEFAULT_NARRATIVE_TIMEOUT_MS: u64 = 10_000;

/// How narratives are produced.
#[derive(
    Serialize,
    Deserialize,
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    clap::ValueEnum,
    strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum NarrativeMode {
    /// No narrative.
    #[default]
    None,
    /// Built-in, template-based prose.
    Template,
    /// External command reading the verdict JSON on stdin.
    Command,
}

/// Narrative settings as found in the configuration file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct NarrativeFile {
    pub mode: NarrativeMode,
    /// Program and arguments for `NarrativeMode::Command`.
    pub command: Vec<String>,
    pub timeout_ms: u64,
}

impl Default for NarrativeFile {
    fn default() -> Self {
        Self {
            mode: NarrativeMode::None,
            command: Vec::new(),
            timeout_ms: DEFAULT_NARRATIVE_TIMEOUT_MS,
        }
    }
}

/// Configuration as found in the configuration file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    /// Enabled genes; empty enables all genes of the tables.
    pub genes: Vec<String>,
    /// Enabled drugs; empty enables all drugs of the tables.
    pub drugs: Vec<String>,
    /// Only analyze this sample; all samples when unset.
    pub sample: Option<String>,
    /// Genotype calls with GQ below this are treated as no-calls.
    pub min_genotype_quality: Option<f32>,
    pub max_phase_units: usize,
    pub narrative: NarrativeFile,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            genes: Vec::new(),
            drugs: Vec::new(),
            sample: None,
            min_genotype_quality: None,
            max_phase_units: DEFAULT_MAX_PHASE_UNITS,
            narrative: NarrativeFile::default(),
        }
    }
}

impl ConfigFile {
    /// Read from a JSON file or use the defaults when `path` is `None`.
    pub fn load(path: Option<&str>) -> Result<Self, anyhow::Error> {
        match path {
            Some(path) => {
                tracing::debug!("loading configuration from {}", path);
                let file = std::fs::File::open(path)
                    .with_context(|| format!("could not open configuration {}", path))?;
                serde_json::from_reader(std::io::BufReader::new(file))
                    .with_context(|| format!("could not parse configuration {}", path))
            }
            None => Ok(Self::default()),
        }
    }
}

/// Validated narrative settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NarrativeConfig {
    pub mode: NarrativeMode,
    pub command: Vec<String>,
    pub timeout: Duration,
}

/// Validated configuration, built once and passed by reference.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Enabled genes in table order.
    pub genes: IndexSet<String>,
    /// Enabled drugs (canonical names) in table order.
    pub drugs: IndexSet<String>,
    pub sample: Option<String>,
    pub min_genotype_quality: Option<f32>,
    pub max_phase_units: usize,
    pub narrative: NarrativeConfig,
}

impl Config {
    /// Validate `file` against `tables`.
    pub fn new(file: ConfigFile, tables: &Tables) -> Result<Self, anyhow::Error> {
        for gene in &file.genes {
            if tables.gene(gene).is_none() {
                anyhow::bail!("configured gene {} is not in the reference tables", gene);
            }
        }
        let genes = tables
            .genes()
            .map(|gene| gene.symbol().to_owned())
            .filter(|symbol| file.genes.is_empty() || file.genes.contains(symbol))
            .collect::<IndexSet<_>>();

        let requested_drugs = file
            .drugs
            .iter()
            .map(|drug| canonical_drug_name(drug))
            .collect::<Vec<_>>();
        for drug in &requested_drugs {
            if tables.drug(drug).is_none() {
                anyhow::bail!("configured drug {} is not in the reference tables", drug);
            }
        }
        let drugs = tables
            .drugs()
            .map(|drug| drug.name.clone())
            .filter(|name| requested_drugs.is_empty() || requested_drugs.contains(name))
            .collect::<IndexSet<_>>();

        if let Some(gq) = file.min_genotype_quality {
            if !gq.is_finite() || gq < 0.0 {
                anyhow::bail!("invalid minimal genotype quality {}", gq);
            }
        }
        if file.max_phase_units == 0 || file.max_phase_units > MAX_PHASE_UNITS_LIMIT {
            anyhow::bail!(
                "max_phase_units must be between 1 and {}, is {}",
                MAX_PHASE_UNITS_LIMIT,
                file.max_phase_units
            );
        }
        if file.narrative.mode == NarrativeMode::Command && file.narrative.command.is_empty() {
            anyhow::bail!("narrative mode `command` requires a command");
        }
        if file.narrative.timeout_ms == 0 {
            anyhow::bail!("narrative timeout must be positive");
        }

        Ok(Self {
            genes,
            drugs,
            sample: file.sample,
            min_genotype_quality: file.min_genotype_quality,
            max_phase_units: file.max_phase_units,
            narrative: NarrativeConfig {
                mode: file.narrative.mode,
                command: file.narrative.command,
                timeout: Duration::from_millis(file.narrative.timeout_ms),
            },
        })
    }

    /// Defaults validated against `tables`.
    pub fn default_for(tables: &Tables) -> Result<Self, anyhow::Error> {
        Self::new(ConfigFile::default(), tables)
    }

    pub fn is_gene_enabled(&self, gene: &str) -> bool {
        self.genes.contains(gene)
    }

    /// Whether the drug with the canonical name `drug` is enabled.
    pub fn is_drug_enabled(&self, drug: &str) -> bool {
        self.drugs.contains(drug)
    }
}
