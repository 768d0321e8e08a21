//! Evaluate gene-phenotype-drug rules into one verdict per drug.

use indexmap::IndexMap;
use itertools::Itertools;

use super::phenotype::PhenotypeCall;
use crate::db::{
    data::{Phenotype, RiskLevel, RuleRecord},
    Tables,
};

/// Recommendation when no rule applies.
pub const NO_KNOWN_INTERACTION: &str =
    "No known interaction; insufficient evidence for an adjustment.";

/// Combined verdict for one drug in one sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub risk: RiskLevel,
    pub recommendation: String,
    /// Genes whose rules reached the combined risk, in drug gene order.
    pub driving_genes: Vec<String>,
    /// All rules that matched, in drug gene order.
    pub contributing_rules: Vec<RuleRecord>,
    /// Some gene of the drug has an indeterminate phenotype.
    pub ambiguous: bool,
}

/// Evaluate `drug` (canonical name) given the phenotype calls of the drug's
/// evaluated genes.
///
/// Genes of the drug without an entry in `phenotypes` are not evaluated.
pub fn evaluate(
    drug: &str,
    phenotypes: &IndexMap<String, PhenotypeCall>,
    tables: &Tables,
) -> Verdict {
    let genes = tables
        .drug(drug)
        .map(|record| record.genes.as_slice())
        .unwrap_or_default();

    let mut contributing_rules = Vec::new();
    let mut indeterminate = Vec::new();
    for gene in genes {
        let Some(call) = phenotypes.get(gene) else {
            continue;
        };
        if call.phenotype == Phenotype::Indeterminate {
            indeterminate.push(gene.as_str());
        }
        if let Some(rule) = tables.rule(gene, call.phenotype, drug) {
            tracing::trace!("{}: {} {} -> {}", drug, gene, call.phenotype, rule.risk);
            contributing_rules.push(rule.clone());
        }
    }
    let ambiguous = !indeterminate.is_empty();

    let risk = contributing_rules
        .iter()
        .map(|rule| rule.risk)
        .max()
        .unwrap_or_default();
    let driving = contributing_rules
        .iter()
        .filter(|rule| rule.risk == risk)
        .collect::<Vec<_>>();

    let recommendation = if driving.is_empty() {
        if ambiguous {
            format!(
                "Phenotype of {} could not be determined; no recommendation can be made.",
                indeterminate.join(", ")
            )
        } else {
            NO_KNOWN_INTERACTION.to_owned()
        }
    } else {
        driving.iter().map(|rule| rule.recommendation.as_str()).join(" ")
    };

    Verdict {
        risk,
        recommendation,
        driving_genes: driving.iter().map(|rule| rule.gene.clone()).collect(),
        contributing_rules,
        ambiguous,
    }
}
