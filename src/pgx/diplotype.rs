//! Turn allele calls into diplotypes without hiding ambiguity.

use super::caller::{CandidatePair, GeneCall};
use crate::db::Gene;

/// A named diplotype candidate; alleles are in table order.
#[derive(serde::Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub alleles: [String; 2],
    /// Number of defining variants explained by the two alleles.
    pub specificity: usize,
}

impl Candidate {
    fn from_pair(pair: &CandidatePair, gene: &Gene) -> Self {
        Self {
            alleles: [
                gene.alleles[pair.alleles[0]].name.clone(),
                gene.alleles[pair.alleles[1]].name.clone(),
            ],
            specificity: pair.specificity,
        }
    }

    /// Conventional notation, e.g., `*1/*4`.
    pub fn label(&self) -> String {
        format!("{}/{}", self.alleles[0], self.alleles[1])
    }
}

/// The diplotype of one gene in one sample.
#[derive(serde::Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Diplotype {
    /// Exactly one candidate.
    Resolved { alleles: [String; 2], label: String },
    /// Several (or, if enumeration was impossible, no) candidates, best first.
    Ambiguous {
        candidates: Vec<Candidate>,
        #[serde(skip_serializing_if = "Option::is_none")]
        note: Option<String>,
    },
}

impl Diplotype {
    /// Resolved diplotype from two allele names; the order of the names does not matter.
    ///
    /// Returns `None` if one of the names is not an allele of `gene`.
    pub fn from_names(gene: &Gene, first: &str, second: &str) -> Option<Self> {
        let (a, _) = gene.allele_by_name(first)?;
        let (b, _) = gene.allele_by_name(second)?;
        let call = GeneCall {
            gene: gene.symbol().to_owned(),
            candidates: vec![CandidatePair {
                alleles: [a.min(b), a.max(b)],
                specificity: gene.alleles[a].specificity() + gene.alleles[b].specificity(),
            }],
            phased: true,
            observed: Vec::new(),
            uncalled_positions: Vec::new(),
            note: None,
        };
        Some(resolve(&call, gene))
    }

    pub fn is_ambiguous(&self) -> bool {
        matches!(self, Diplotype::Ambiguous { .. })
    }

    /// `*1/*4` or `ambiguous`.
    pub fn label(&self) -> &str {
        match self {
            Diplotype::Resolved { label, .. } => label,
            Diplotype::Ambiguous { .. } => "ambiguous",
        }
    }
}

/// Wrap the allele call of `gene` into a `Diplotype`.
pub fn resolve(call: &GeneCall, gene: &Gene) -> Diplotype {
    match call.candidates.as_slice() {
        [pair] => {
            let candidate = Candidate::from_pair(pair, gene);
            Diplotype::Resolved {
                label: candidate.label(),
                alleles: candidate.alleles,
            }
        }
        candidates => Diplotype::Ambiguous {
            candidates: candidates
                .iter()
                .map(|pair| Candidate::from_pair(pair, gene))
                .collect(),
            note: call.note.clone(),
        },
    }
}
