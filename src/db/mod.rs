//! Reference tables: star alleles, score bands, drugs, and rules.
//!
//! The tables are loaded once at startup, validated, and only handed out by
//! shared reference afterwards.

use std::collections::BTreeSet;

use anyhow::Context;
use indexmap::IndexMap;

use crate::common::{io::open_read_maybe_gz, ChromNormalizer, GenomeRelease};

pub mod cli;
pub mod data;

use data::{DefiningVariant, DrugRecord, GeneRecord, Phenotype, RuleRecord, ScoreBand, TablesRecord};

/// The reference tables compiled into the binary.
pub const BUILTIN_TABLES_JSON: &str = include_str!("../../data/tables.json");

/// A defining site of an allele: position, reference and alternate bases.
///
/// A VCF record only matches a site when both its `REF` and `ALT` agree, so a
/// record with a different representation counts as a foreign site.
#[derive(serde::Serialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Site {
    pub position: u64,
    pub reference: String,
    pub alternate: String,
}

/// Symbol and genomic interval of a gene.
#[derive(serde::Serialize, Debug, Clone, PartialEq, Eq)]
pub struct GenePosition {
    pub symbol: String,
    /// Canonical chromosome name.
    pub chrom: String,
    /// 1-based, inclusive.
    pub start: u64,
    /// 1-based, inclusive.
    pub end: u64,
}

impl GenePosition {
    /// Whether the 1-based position `pos` on canonical `chrom` falls into the gene.
    pub fn contains(&self, chrom: &str, pos: u64) -> bool {
        self.chrom == chrom && self.start <= pos && pos <= self.end
    }
}

/// A validated star allele definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Allele {
    pub name: String,
    pub activity_score: f64,
    pub variants: Vec<DefiningVariant>,
    /// The defining variants as a set for containment checks.
    pub sites: BTreeSet<Site>,
}

impl Allele {
    fn from_record(record: data::AlleleRecord) -> Self {
        let sites = record
            .variants
            .iter()
            .map(|v| Site {
                position: v.position,
                reference: v.reference.to_ascii_uppercase(),
                alternate: v.alternate.to_ascii_uppercase(),
            })
            .collect();
        Self {
            name: record.name,
            activity_score: record.activity_score,
            variants: record.variants,
            sites,
        }
    }

    /// Number of defining variants; more is more specific.
    pub fn specificity(&self) -> usize {
        self.sites.len()
    }

    /// Positions covered by the definition.
    pub fn positions(&self) -> impl Iterator<Item = u64> + '_ {
        self.sites.iter().map(|site| site.position)
    }
}

/// A validated gene with its allele definitions.
#[derive(Debug, Clone, PartialEq)]
pub struct Gene {
    pub position: GenePosition,
    /// Allele definitions in table order.
    pub alleles: Vec<Allele>,
    /// Index of the reference allele in `alleles`.
    pub reference: usize,
    /// Score bands sorted by `min`.
    pub bands: Vec<ScoreBand>,
}

impl Gene {
    pub fn symbol(&self) -> &str {
        &self.position.symbol
    }

    pub fn reference_allele(&self) -> &Allele {
        &self.alleles[self.reference]
    }

    /// Look up an allele and its index by name.
    pub fn allele_by_name(&self, name: &str) -> Option<(usize, &Allele)> {
        self.alleles.iter().enumerate().find(|(_, a)| a.name == name)
    }

    /// Union of the defining sites of all alleles.
    pub fn defining_sites(&self) -> BTreeSet<Site> {
        self.alleles
            .iter()
            .flat_map(|allele| allele.sites.iter().cloned())
            .collect()
    }

    /// Phenotype band for an activity score, `None` if no band matches.
    pub fn band_for(&self, score: f64) -> Option<&ScoreBand> {
        self.bands.iter().find(|band| band.contains(score))
    }
}

/// Key of the rule index: gene, phenotype, drug.
type RuleKey = (String, Phenotype, String);

/// The validated, read-only reference tables.
#[derive(Debug, Clone)]
pub struct Tables {
    version: String,
    genome_release: GenomeRelease,
    genes: IndexMap<String, Gene>,
    drugs: IndexMap<String, DrugRecord>,
    rules: IndexMap<RuleKey, RuleRecord>,
}

/// Canonical spelling of a drug name.
pub fn canonical_drug_name(name: &str) -> String {
    name.trim().to_ascii_uppercase()
}

impl Tables {
    /// Load the tables compiled into the binary.
    pub fn builtin() -> Result<Self, anyhow::Error> {
        Self::from_json_str(BUILTIN_TABLES_JSON).context("invalid built-in reference tables")
    }

    /// Load from a JSON file, optionally gzip compressed.
    pub fn from_path(path: &str) -> Result<Self, anyhow::Error> {
        tracing::debug!("loading reference tables from {}", path);
        let reader = open_read_maybe_gz(path)
            .with_context(|| format!("could not open reference tables {}", path))?;
        let record: TablesRecord = serde_json::from_reader(reader)
            .with_context(|| format!("could not parse reference tables {}", path))?;
        Self::from_record(record).with_context(|| format!("invalid reference tables {}", path))
    }

    /// Load from `path` if given, the built-in tables otherwise.
    pub fn load(path: Option<&str>) -> Result<Self, anyhow::Error> {
        let tables = match path {
            Some(path) => Self::from_path(path)?,
            None => Self::builtin()?,
        };
        tracing::info!(
            "reference tables {} ({}): {} genes, {} drugs, {} rules",
            tables.version(),
            tables.genome_release().name(),
            tables.genes.len(),
            tables.drugs.len(),
            tables.rules.len()
        );
        Ok(tables)
    }

    pub fn from_json_str(json: &str) -> Result<Self, anyhow::Error> {
        let record: TablesRecord = serde_json::from_str(json)?;
        Self::from_record(record)
    }

    /// Validate the serialized tables and build the lookup indices.
    pub fn from_record(record: TablesRecord) -> Result<Self, anyhow::Error> {
        let normalizer = ChromNormalizer::default();

        let mut genes = IndexMap::new();
        for gene in record.genes {
            let symbol = gene.symbol.clone();
            let gene = validate_gene(gene, &normalizer)
                .with_context(|| format!("invalid gene {}", &symbol))?;
            if genes.insert(symbol.clone(), gene).is_some() {
                anyhow::bail!("gene {} defined more than once", symbol);
            }
        }

        let mut drugs = IndexMap::new();
        for drug in record.drugs {
            let name = canonical_drug_name(&drug.name);
            if drug.genes.is_empty() {
                anyhow::bail!("drug {} lists no genes", name);
            }
            let mut seen = BTreeSet::new();
            for gene in &drug.genes {
                if !genes.contains_key(gene) {
                    anyhow::bail!("drug {} refers to unknown gene {}", name, gene);
                }
                if !seen.insert(gene) {
                    anyhow::bail!("drug {} lists gene {} more than once", name, gene);
                }
            }
            let drug = DrugRecord {
                name: name.clone(),
                genes: drug.genes,
            };
            if drugs.insert(name.clone(), drug).is_some() {
                anyhow::bail!("drug {} defined more than once", name);
            }
        }

        let mut rules = IndexMap::new();
        for rule in record.rules {
            let drug_name = canonical_drug_name(&rule.drug);
            let drug = drugs.get(&drug_name).ok_or_else(|| {
                anyhow::anyhow!("rule for {} refers to unknown drug {}", rule.gene, drug_name)
            })?;
            if !drug.genes.contains(&rule.gene) {
                anyhow::bail!(
                    "rule for drug {} refers to gene {} which the drug does not list",
                    drug_name,
                    rule.gene
                );
            }
            if rule.phenotype == Phenotype::Indeterminate {
                anyhow::bail!(
                    "rule {}/{} must not match the indeterminate phenotype",
                    rule.gene,
                    drug_name
                );
            }
            let key = (rule.gene.clone(), rule.phenotype, drug_name.clone());
            let rule = RuleRecord {
                drug: drug_name,
                ..rule
            };
            if rules.insert(key, rule.clone()).is_some() {
                anyhow::bail!(
                    "more than one rule for {} {} {}",
                    rule.gene,
                    rule.phenotype,
                    rule.drug
                );
            }
        }

        Ok(Self {
            version: record.version,
            genome_release: record.genome_release,
            genes,
            drugs,
            rules,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn genome_release(&self) -> GenomeRelease {
        self.genome_release
    }

    pub fn genes(&self) -> impl Iterator<Item = &Gene> {
        self.genes.values()
    }

    pub fn gene(&self, symbol: &str) -> Option<&Gene> {
        self.genes.get(symbol)
    }

    pub fn drugs(&self) -> impl Iterator<Item = &DrugRecord> {
        self.drugs.values()
    }

    /// Look up a drug by its canonical name.
    pub fn drug(&self, name: &str) -> Option<&DrugRecord> {
        self.drugs.get(name)
    }

    /// The rule with exactly this gene, phenotype, and drug.
    pub fn rule(&self, gene: &str, phenotype: Phenotype, drug: &str) -> Option<&RuleRecord> {
        self.rules
            .get(&(gene.to_owned(), phenotype, drug.to_owned()))
    }
}

fn validate_gene(gene: GeneRecord, normalizer: &ChromNormalizer) -> Result<Gene, anyhow::Error> {
    let chrom = normalizer
        .canonicalize(&gene.chrom)
        .ok_or_else(|| anyhow::anyhow!("unknown chromosome {:?}", &gene.chrom))?;
    if gene.start == 0 || gene.start > gene.end {
        anyhow::bail!("invalid interval {}-{}", gene.start, gene.end);
    }
    let position = GenePosition {
        symbol: gene.symbol.clone(),
        chrom: chrom.to_owned(),
        start: gene.start,
        end: gene.end,
    };

    let mut names = BTreeSet::new();
    let mut site_sets: Vec<&BTreeSet<Site>> = Vec::new();
    let alleles = gene
        .alleles
        .into_iter()
        .map(Allele::from_record)
        .collect::<Vec<_>>();
    for allele in &alleles {
        if !names.insert(allele.name.as_str()) {
            anyhow::bail!("allele {} defined more than once", allele.name);
        }
        if !allele.activity_score.is_finite() || allele.activity_score < 0.0 {
            anyhow::bail!(
                "allele {} has invalid activity score {}",
                allele.name,
                allele.activity_score
            );
        }
        if allele.sites.len() != allele.variants.len() {
            anyhow::bail!("allele {} lists a defining variant twice", allele.name);
        }
        for variant in &allele.variants {
            if !position.contains(chrom, variant.position) {
                anyhow::bail!(
                    "defining variant {} of allele {} lies outside of the gene",
                    variant.position,
                    allele.name
                );
            }
            if variant.reference.is_empty() || variant.alternate.is_empty() {
                anyhow::bail!(
                    "defining variant {} of allele {} has empty bases",
                    variant.position,
                    allele.name
                );
            }
        }
        if !allele.sites.is_empty() {
            if site_sets.contains(&&allele.sites) {
                anyhow::bail!(
                    "allele {} has the same defining variants as another allele",
                    allele.name
                );
            }
            site_sets.push(&allele.sites);
        }
    }

    let reference = alleles
        .iter()
        .position(|a| a.name == gene.reference_allele)
        .ok_or_else(|| anyhow::anyhow!("reference allele {} not defined", &gene.reference_allele))?;
    if !alleles[reference].sites.is_empty() {
        anyhow::bail!("reference allele {} has defining variants", &gene.reference_allele);
    }
    if let Some(other) = alleles
        .iter()
        .enumerate()
        .find(|(i, a)| *i != reference && a.sites.is_empty())
    {
        anyhow::bail!("allele {} has no defining variants", other.1.name);
    }

    validate_bands(&gene.bands)?;

    Ok(Gene {
        position,
        alleles,
        reference,
        bands: gene.bands,
    })
}

fn validate_bands(bands: &[ScoreBand]) -> Result<(), anyhow::Error> {
    if bands.is_empty() {
        anyhow::bail!("no score bands");
    }
    for (i, band) in bands.iter().enumerate() {
        if band.phenotype == Phenotype::Indeterminate {
            anyhow::bail!("score band must not map to the indeterminate phenotype");
        }
        match band.max {
            Some(max) if max <= band.min => {
                anyhow::bail!("empty score band [{}, {})", band.min, max)
            }
            None if i + 1 != bands.len() => {
                anyhow::bail!("only the last score band may be unbounded")
            }
            _ => (),
        }
        if let Some(next) = bands.get(i + 1) {
            // `max` is known to be set here, see above
            if band.max.map_or(true, |max| next.min < max) {
                anyhow::bail!("score bands overlap or are not sorted at {}", next.min);
            }
        }
    }
    Ok(())
}
