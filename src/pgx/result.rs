//! Result records and their assembly into the analysis outcome.

use indexmap::{IndexMap, IndexSet};

use super::{
    caller::{GeneCall, ObservedVariant},
    diplotype::Diplotype,
    phenotype::PhenotypeCall,
    rules::Verdict,
};
use crate::{
    conf::Config,
    db::{
        canonical_drug_name,
        data::{RiskLevel, RuleRecord},
        Tables,
    },
    err::Warning,
};

/// Assessment of one gene in one sample.
#[derive(serde::Serialize, Debug, Clone, PartialEq)]
pub struct GeneAssessment {
    pub gene: String,
    pub diplotype: Diplotype,
    #[serde(flatten)]
    pub phenotype: PhenotypeCall,
    /// No unphased heterozygous site was involved in the call.
    pub phased: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub observed_variants: Vec<ObservedVariant>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub uncalled_positions: Vec<u64>,
}

impl GeneAssessment {
    pub fn new(call: GeneCall, diplotype: Diplotype, phenotype: PhenotypeCall) -> Self {
        Self {
            gene: call.gene,
            diplotype,
            phenotype,
            phased: call.phased,
            observed_variants: call.observed,
            uncalled_positions: call.uncalled_positions,
        }
    }
}

/// Risk verdict for one drug in one sample.
#[derive(serde::Serialize, Debug, Clone, PartialEq)]
pub struct PharmaGuardResult {
    pub sample: String,
    pub drug: String,
    /// Assessments of the evaluated genes of the drug.
    pub genes: Vec<GeneAssessment>,
    pub driving_genes: Vec<String>,
    pub risk: RiskLevel,
    pub recommendation: String,
    pub contributing_rules: Vec<RuleRecord>,
    pub ambiguous: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub narrative: Option<String>,
}

impl PharmaGuardResult {
    /// Combine `verdict` with the assessments of the drug's `genes`.
    pub fn new(
        sample: &str,
        drug: &str,
        genes: &[String],
        assessments: &IndexMap<String, GeneAssessment>,
        verdict: Verdict,
    ) -> Self {
        Self {
            sample: sample.to_owned(),
            drug: drug.to_owned(),
            genes: genes
                .iter()
                .filter_map(|gene| assessments.get(gene).cloned())
                .collect(),
            driving_genes: verdict.driving_genes,
            risk: verdict.risk,
            recommendation: verdict.recommendation,
            contributing_rules: verdict.contributing_rules,
            ambiguous: verdict.ambiguous,
            narrative: None,
        }
    }
}

/// Everything one analysis request produces.
#[derive(serde::Serialize, Debug, Clone, PartialEq)]
pub struct AnalysisOutcome {
    pub tables_version: String,
    /// Analyzed samples in column order.
    pub samples: Vec<String>,
    /// Ordered by sample, then by requested drug.
    pub results: Vec<PharmaGuardResult>,
    /// Requested drugs without results, in request order.
    pub unsupported_drugs: Vec<String>,
    pub warnings: Vec<Warning>,
}

/// Requested drugs sorted into what can and cannot be evaluated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrugSelection {
    /// Canonical drug names and their evaluated genes, in request order.
    pub supported: IndexMap<String, Vec<String>>,
    /// Canonical names of unsupported drugs, in request order.
    pub unsupported: Vec<String>,
    pub warnings: Vec<Warning>,
}

impl DrugSelection {
    /// Genes needed by any supported drug, in table order.
    pub fn genes<'a>(&self, tables: &'a Tables) -> Vec<&'a str> {
        tables
            .genes()
            .map(|gene| gene.symbol())
            .filter(|symbol| {
                self.supported
                    .values()
                    .any(|genes| genes.iter().any(|gene| gene == symbol))
            })
            .collect()
    }
}

/// Canonicalize and deduplicate `requested`, split off unsupported drugs.
pub fn select_drugs<S: AsRef<str>>(
    requested: &[S],
    tables: &Tables,
    config: &Config,
) -> DrugSelection {
    let mut result = DrugSelection::default();
    let mut seen = IndexSet::new();
    let mut duplicates = IndexSet::new();

    for name in requested {
        let drug = canonical_drug_name(name.as_ref());
        if !seen.insert(drug.clone()) {
            if duplicates.insert(drug.clone()) {
                result.warnings.push(Warning::DuplicateDrug { drug });
            }
            continue;
        }

        let record = tables
            .drug(&drug)
            .filter(|_| config.is_drug_enabled(&drug));
        let genes = match record {
            Some(record) => {
                let (enabled, disabled): (Vec<_>, Vec<_>) = record
                    .genes
                    .iter()
                    .cloned()
                    .partition(|gene| config.is_gene_enabled(gene));
                result
                    .warnings
                    .extend(disabled.into_iter().map(|gene| Warning::UnsupportedGene {
                        drug: drug.clone(),
                        gene,
                    }));
                enabled
            }
            None => Vec::new(),
        };

        if genes.is_empty() {
            tracing::debug!("drug {:?} is not supported", &drug);
            result
                .warnings
                .push(Warning::UnsupportedDrug { drug: drug.clone() });
            result.unsupported.push(drug);
        } else {
            result.supported.insert(drug, genes);
        }
    }

    result
}
