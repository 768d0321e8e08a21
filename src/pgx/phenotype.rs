//! Map diplotypes to metabolizer phenotypes via summed activity scores.

use itertools::Itertools;

use super::diplotype::Diplotype;
use crate::db::{data::Phenotype, Gene};

/// Phenotype of one gene in one sample.
#[derive(serde::Serialize, Debug, Clone, PartialEq)]
pub struct PhenotypeCall {
    pub phenotype: Phenotype,
    /// Summed activity score; absent for ambiguous diplotypes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity_score: Option<f64>,
    /// Distinct phenotypes of all candidates of an ambiguous diplotype.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub candidate_phenotypes: Vec<Phenotype>,
}

/// Summed activity score of two alleles, `None` if a name is unknown.
pub fn activity_score(gene: &Gene, alleles: &[String; 2]) -> Option<f64> {
    let first = gene.allele_by_name(&alleles[0])?.1;
    let second = gene.allele_by_name(&alleles[1])?.1;
    Some(first.activity_score + second.activity_score)
}

/// Phenotype of the band containing `score`, indeterminate outside of all bands.
pub fn phenotype_for_score(gene: &Gene, score: f64) -> Phenotype {
    gene.band_for(score)
        .map(|band| band.phenotype)
        .unwrap_or(Phenotype::Indeterminate)
}

/// Resolve the phenotype of `diplotype`, a diplotype of `gene`.
pub fn resolve(diplotype: &Diplotype, gene: &Gene) -> PhenotypeCall {
    match diplotype {
        Diplotype::Resolved { alleles, .. } => {
            let activity_score = activity_score(gene, alleles);
            PhenotypeCall {
                phenotype: activity_score
                    .map(|score| phenotype_for_score(gene, score))
                    .unwrap_or(Phenotype::Indeterminate),
                activity_score,
                candidate_phenotypes: Vec::new(),
            }
        }
        Diplotype::Ambiguous { candidates, .. } => PhenotypeCall {
            phenotype: Phenotype::Indeterminate,
            activity_score: None,
            candidate_phenotypes: candidates
                .iter()
                .map(|candidate| {
                    activity_score(gene, &candidate.alleles)
                        .map(|score| phenotype_for_score(gene, score))
                        .unwrap_or(Phenotype::Indeterminate)
                })
                .unique()
                .collect(),
        },
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::{phenotype_for_score, resolve};
    use crate::{
        db::{data::Phenotype, test_fixtures::toy_tables, Tables},
        pgx::diplotype::{Candidate, Diplotype},
    };

    #[rstest]
    #[case("*1", "*1", Phenotype::Normal, 2.0)]
    #[case("*1", "*3", Phenotype::Normal, 1.5)]
    #[case("*2", "*4", Phenotype::Poor, 0.0)]
    #[case("*3", "*3", Phenotype::Intermediate, 1.0)]
    #[case("*5", "*5", Phenotype::Normal, 2.0)]
    fn resolved(
        #[case] first: &str,
        #[case] second: &str,
        #[case] expected: Phenotype,
        #[case] score: f64,
    ) {
        let tables = toy_tables();
        let gene = tables.gene("GENE1").expect("GENE1 present");
        let diplotype = Diplotype::from_names(gene, first, second).expect("known alleles");

        let call = resolve(&diplotype, gene);

        assert_eq!(call.phenotype, expected);
        assert_eq!(call.activity_score, Some(score));
        assert!(call.candidate_phenotypes.is_empty());
    }

    #[test]
    fn resolution_is_pure() {
        let tables = toy_tables();
        let gene = tables.gene("GENE1").expect("GENE1 present");
        let diplotype = Diplotype::from_names(gene, "*1", "*2").expect("known alleles");

        assert_eq!(resolve(&diplotype, gene), resolve(&diplotype, gene));
    }

    #[test]
    fn ambiguous_is_indeterminate() {
        let tables = toy_tables();
        let gene = tables.gene("GENE1").expect("GENE1 present");
        let candidate = |a: &str, b: &str, specificity| Candidate {
            alleles: [a.to_owned(), b.to_owned()],
            specificity,
        };
        let diplotype = Diplotype::Ambiguous {
            candidates: vec![
                candidate("*2", "*3", 2),
                candidate("*1", "*2", 1),
                candidate("*1", "*3", 1),
            ],
            note: None,
        };

        let call = resolve(&diplotype, gene);

        assert_eq!(call.phenotype, Phenotype::Indeterminate);
        assert_eq!(call.activity_score, None);
        // *2/*3 = 0.5 and *1/*2 = 1.0 are both intermediate, *1/*3 = 1.5 is normal
        assert_eq!(
            call.candidate_phenotypes,
            vec![Phenotype::Intermediate, Phenotype::Normal]
        );
    }

    #[test]
    fn score_outside_bands() -> Result<(), anyhow::Error> {
        let json = crate::db::test_fixtures::TOY_TABLES_JSON
            .replace(r#""min": 0.0, "max": 0.5}"#, r#""min": 0.25, "max": 0.5}"#);
        let tables = Tables::from_json_str(&json)?;
        let gene = tables.gene("GENE1").expect("GENE1 present");

        assert_eq!(phenotype_for_score(gene, 0.0), Phenotype::Indeterminate);
        assert_eq!(phenotype_for_score(gene, 0.25), Phenotype::Poor);

        Ok(())
    }

    #[test]
    fn builtin_reference_diplotypes_are_normal() -> Result<(), anyhow::Error> {
        let tables = Tables::builtin()?;

        for gene in tables.genes() {
            let reference = &gene.reference_allele().name;
            let diplotype =
                Diplotype::from_names(gene, reference, reference).expect("reference allele");
            assert_eq!(
                resolve(&diplotype, gene).phenotype,
                Phenotype::Normal,
                "gene {}",
                gene.symbol()
            );
        }

        Ok(())
    }
}
