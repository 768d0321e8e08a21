//! Serialized form of the reference tables.

use serde::{Deserialize, Serialize};

use crate::common::GenomeRelease;

/// Metabolizer phenotype.
#[derive(
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Debug,
    Clone,
    Copy,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Phenotype {
    /// Poor metabolizer.
    Poor,
    /// Intermediate metabolizer.
    Intermediate,
    /// Normal metabolizer.
    Normal,
    /// Rapid metabolizer.
    Rapid,
    /// Ultrarapid metabolizer.
    Ultrarapid,
    /// Could not be determined.
    Indeterminate,
}

/// Risk level of a verdict, ordered by severity.
#[derive(
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Debug,
    Clone,
    Copy,
    Default,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RiskLevel {
    /// No known interaction.
    #[default]
    None,
    /// Dose adjustment or monitoring advised.
    Caution,
    /// Use an alternative drug.
    Avoid,
}

/// A variant that defines a star allele.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DefiningVariant {
    /// 1-based position on the gene's chromosome.
    pub position: u64,
    /// Reference bases.
    pub reference: String,
    /// Alternate bases.
    pub alternate: String,
    /// dbSNP identifier, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rsid: Option<String>,
}

/// A star allele definition.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AlleleRecord {
    /// Star allele name, e.g., `"*4"`.
    pub name: String,
    /// Activity score of one copy.
    pub activity_score: f64,
    /// Defining variants; empty for the reference allele.
    #[serde(default)]
    pub variants: Vec<DefiningVariant>,
}

/// Half-open activity score band `[min, max)`; `max = None` is unbounded.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ScoreBand {
    pub phenotype: Phenotype,
    pub min: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl ScoreBand {
    /// Whether `score` falls into the band.
    pub fn contains(&self, score: f64) -> bool {
        score >= self.min && self.max.map_or(true, |max| score < max)
    }
}

/// A pharmacogene with its allele definitions and score bands.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GeneRecord {
    /// HGNC gene symbol.
    pub symbol: String,
    /// Chromosome, any spelling that normalizes.
    pub chrom: String,
    /// 1-based start position, inclusive.
    pub start: u64,
    /// 1-based end position, inclusive.
    pub end: u64,
    /// Name of the allele that is called when no variant is present.
    pub reference_allele: String,
    pub alleles: Vec<AlleleRecord>,
    pub bands: Vec<ScoreBand>,
}

/// A supported drug and the genes that are evaluated for it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DrugRecord {
    pub name: String,
    pub genes: Vec<String>,
}

/// A gene-phenotype-drug rule.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RuleRecord {
    pub gene: String,
    pub phenotype: Phenotype,
    pub drug: String,
    pub risk: RiskLevel,
    pub recommendation: String,
    /// Guideline citation.
    pub evidence: String,
}

/// Top-level document of the reference tables.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TablesRecord {
    /// Version of the table content.
    pub version: String,
    /// Genome release of all coordinates.
    pub genome_release: GenomeRelease,
    pub genes: Vec<GeneRecord>,
    pub drugs: Vec<DrugRecord>,
    pub rules: Vec<RuleRecord>,
}
