//! Pharmacogenomic risk prediction from variant files.
//!
//! `analyze` runs the whole pipeline: parse the variant file, call star
//! alleles per (sample, gene), resolve diplotypes and phenotypes, and evaluate
//! the rules per (sample, drug).

pub mod caller;
pub mod cli;
pub mod diplotype;
pub mod narrative;
pub mod parse;
pub mod phenotype;
pub mod result;
pub mod rules;

use indexmap::IndexMap;
use rayon::prelude::*;
use thousands::Separable;

use self::result::{select_drugs, AnalysisOutcome, GeneAssessment, PharmaGuardResult};
use crate::{
    conf::Config,
    db::Tables,
    err::{StructuralParseError, Warning},
};

/// Assess one gene in the sample with index `sample`.
fn assess_gene(
    variants: &[parse::Variant],
    sample: usize,
    gene: &crate::db::Gene,
    config: &Config,
) -> GeneAssessment {
    let call = caller::call_gene(variants, sample, gene, config);
    let diplotype = diplotype::resolve(&call, gene);
    let phenotype = phenotype::resolve(&diplotype, gene);
    tracing::debug!(
        "sample #{}: {} {} -> {}",
        sample,
        gene.symbol(),
        diplotype.label(),
        phenotype.phenotype
    );
    GeneAssessment::new(call, diplotype, phenotype)
}

fn ambiguity_warning(sample: &str, assessment: &GeneAssessment) -> Option<Warning> {
    match &assessment.diplotype {
        diplotype::Diplotype::Resolved { .. } => None,
        diplotype::Diplotype::Ambiguous { candidates, note } => Some(Warning::AmbiguousCall {
            sample: sample.to_owned(),
            gene: assessment.gene.clone(),
            message: note.clone().unwrap_or_else(|| {
                format!("{} candidate diplotypes fit the data", candidates.len())
            }),
            candidates: candidates.iter().map(|c| c.label()).collect(),
        }),
    }
}

/// Analyze the variant file `bytes` for the `requested_drugs`.
///
/// Only structural problems of the variant file are errors; everything else
/// is reported in the warnings of the outcome.
pub fn analyze<S: AsRef<str>>(
    bytes: &[u8],
    requested_drugs: &[S],
    tables: &Tables,
    config: &Config,
) -> Result<AnalysisOutcome, StructuralParseError> {
    let parsed = parse::parse(bytes)?;
    tracing::debug!(
        "parsed {} variants for {} samples with {} warnings",
        parsed.variants.len().separate_with_commas(),
        parsed.samples.len(),
        parsed.warnings.len()
    );

    let samples: Vec<(usize, String)> = match &config.sample {
        Some(name) => {
            let idx = parsed
                .samples
                .iter()
                .position(|sample| sample == name)
                .ok_or_else(|| StructuralParseError::UnknownSample(name.clone()))?;
            vec![(idx, name.clone())]
        }
        None => parsed.samples.iter().cloned().enumerate().collect(),
    };

    let selection = select_drugs(requested_drugs, tables, config);
    let genes = selection.genes(tables);

    let mut warnings = parsed.warnings;
    warnings.extend(selection.warnings.iter().cloned());

    let assessments = samples
        .par_iter()
        .map(|(idx, _)| {
            genes
                .par_iter()
                .filter_map(|symbol| tables.gene(symbol))
                .map(|gene| {
                    let assessment = assess_gene(&parsed.variants, *idx, gene, config);
                    (assessment.gene.clone(), assessment)
                })
                .collect::<Vec<_>>()
                .into_iter()
                .collect::<IndexMap<_, _>>()
        })
        .collect::<Vec<_>>();

    for ((_, sample), per_gene) in samples.iter().zip(assessments.iter()) {
        warnings.extend(
            per_gene
                .values()
                .filter_map(|assessment| ambiguity_warning(sample, assessment)),
        );
    }

    let results = samples
        .par_iter()
        .zip(assessments.par_iter())
        .flat_map(|((_, sample), per_gene)| {
            selection
                .supported
                .par_iter()
                .map(|(drug, drug_genes)| {
                    let phenotypes = drug_genes
                        .iter()
                        .filter_map(|gene| {
                            per_gene
                                .get(gene)
                                .map(|assessment| (gene.clone(), assessment.phenotype.clone()))
                        })
                        .collect::<IndexMap<_, _>>();
                    let verdict = rules::evaluate(drug, &phenotypes, tables);
                    PharmaGuardResult::new(sample, drug, drug_genes, per_gene, verdict)
                })
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();

    Ok(AnalysisOutcome {
        tables_version: tables.version().to_owned(),
        samples: samples.into_iter().map(|(_, sample)| sample).collect(),
        results,
        unsupported_drugs: selection.unsupported,
        warnings,
    })
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::analyze;
    use crate::{
        conf::{Config, ConfigFile},
        db::{
            data::{Phenotype, RiskLevel},
            test_fixtures::toy_tables,
            Tables,
        },
        err::{StructuralParseError, Warning},
        pgx::{diplotype::Diplotype, rules::NO_KNOWN_INTERACTION},
    };

    #[test]
    fn codeine_without_variants() -> Result<(), anyhow::Error> {
        let tables = Tables::builtin()?;
        let config = Config::default_for(&tables)?;
        let vcf = "##fileformat=VCFv4.2\n\
                   #CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tPATIENT\n\
                   chr7\t117559590\trs113993960\tATCT\tA\t.\tPASS\t.\tGT\t0/1\n";

        let outcome = analyze(vcf.as_bytes(), &["codeine"], &tables, &config)?;

        assert_eq!(outcome.samples, vec!["PATIENT"]);
        assert_eq!(outcome.results.len(), 1);
        let result = &outcome.results[0];
        assert_eq!(result.drug, "CODEINE");
        assert_eq!(result.genes.len(), 1);
        assert_eq!(result.genes[0].gene, "CYP2D6");
        assert_eq!(result.genes[0].diplotype.label(), "*1/*1");
        assert_eq!(result.genes[0].phenotype.phenotype, Phenotype::Normal);
        assert_eq!(result.risk, RiskLevel::None);
        assert!(result.contributing_rules.is_empty());
        assert_eq!(result.recommendation, NO_KNOWN_INTERACTION);
        assert!(!result.ambiguous);
        assert!(outcome.warnings.is_empty());

        Ok(())
    }

    #[test]
    fn codeine_poor_metabolizer() -> Result<(), anyhow::Error> {
        let tables = Tables::builtin()?;
        let config = Config::default_for(&tables)?;
        // CYP2D6 *4 on both copies
        let vcf = "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tPATIENT\n\
                   chr22\t42128945\trs3892097\tC\tT\t.\tPASS\t.\tGT\t1/1\n\
                   chr22\t42130692\trs1065852\tG\tA\t.\tPASS\t.\tGT\t1/1\n";

        let outcome = analyze(vcf.as_bytes(), &["CODEINE"], &tables, &config)?;

        let result = &outcome.results[0];
        assert_eq!(result.genes[0].diplotype.label(), "*4/*4");
        assert_eq!(result.genes[0].phenotype.phenotype, Phenotype::Poor);
        assert_eq!(result.risk, RiskLevel::Avoid);
        assert_eq!(result.driving_genes, vec!["CYP2D6"]);

        Ok(())
    }

    #[test]
    fn clopidogrel_unphased_multi_allelic() -> Result<(), anyhow::Error> {
        let tables = Tables::builtin()?;
        let config = Config::default_for(&tables)?;
        // CYP2C19 *2 on one copy, an undefined alternate on the other
        let vcf = "#CHROM\tPOS\tREF\tALT\tPATIENT\n\
                   chr10\t94781859\tG\tA,T\t1/2\n";

        let outcome = analyze(vcf.as_bytes(), &["CLOPIDOGREL"], &tables, &config)?;

        let result = &outcome.results[0];
        assert_eq!(result.genes[0].diplotype.label(), "*1/*2");
        assert_eq!(result.genes[0].phenotype.phenotype, Phenotype::Intermediate);
        assert_eq!(result.risk, RiskLevel::Caution);
        assert!(!result.ambiguous);
        assert!(outcome.warnings.is_empty());

        Ok(())
    }

    #[test]
    fn unphased_ambiguity_is_indeterminate() -> Result<(), anyhow::Error> {
        let tables = toy_tables();
        let config = Config::default_for(&tables)?;
        let vcf = "#CHROM\tPOS\tREF\tALT\tS\n\
                   chr1\t100\tA\tG\t0/1\n\
                   chr1\t200\tC\tT\t0/1\n";

        let outcome = analyze(vcf.as_bytes(), &["druga"], &tables, &config)?;

        let result = &outcome.results[0];
        let gene = &result.genes[0];
        assert!(gene.diplotype.is_ambiguous());
        assert_eq!(gene.phenotype.phenotype, Phenotype::Indeterminate);
        assert_eq!(
            gene.phenotype.candidate_phenotypes,
            vec![Phenotype::Intermediate, Phenotype::Normal]
        );
        assert!(result.ambiguous);
        assert_eq!(result.risk, RiskLevel::None);
        assert_eq!(
            outcome.warnings,
            vec![Warning::AmbiguousCall {
                sample: "S".into(),
                gene: "GENE1".into(),
                message: "3 candidate diplotypes fit the data".into(),
                candidates: vec!["*2/*3".into(), "*1/*2".into(), "*1/*3".into()],
            }]
        );

        Ok(())
    }

    #[test]
    fn malformed_line_is_skipped() -> Result<(), anyhow::Error> {
        let tables = toy_tables();
        let config = Config::default_for(&tables)?;
        let vcf = "#CHROM\tPOS\tREF\tALT\tS\n\
                   1\t100\tA\tG\t0|1\n\
                   1\tabc\tC\tT\t0|1\n";

        let outcome = analyze(vcf.as_bytes(), &["DRUGA"], &tables, &config)?;

        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].genes[0].diplotype.label(), "*1/*2");
        assert_eq!(outcome.warnings.len(), 1);
        assert!(matches!(
            outcome.warnings[0],
            Warning::LineParse { line: 3, .. }
        ));

        Ok(())
    }

    #[test]
    fn unsupported_drugs_have_no_results() -> Result<(), anyhow::Error> {
        let tables = toy_tables();
        let config = Config::default_for(&tables)?;
        let vcf = "#CHROM\tPOS\tREF\tALT\tS\n1\t100\tA\tG\t0|1\n";

        let outcome = analyze(vcf.as_bytes(), &["aspirin", "DRUGA"], &tables, &config)?;

        assert_eq!(outcome.unsupported_drugs, vec!["ASPIRIN"]);
        assert_eq!(
            outcome.results.iter().map(|r| r.drug.as_str()).collect::<Vec<_>>(),
            vec!["DRUGA"]
        );
        assert_eq!(
            outcome.warnings,
            vec![Warning::UnsupportedDrug {
                drug: "ASPIRIN".into()
            }]
        );

        Ok(())
    }

    #[test]
    fn ordered_by_sample_then_drug() -> Result<(), anyhow::Error> {
        let tables = toy_tables();
        let config = Config::default_for(&tables)?;
        let vcf = "#CHROM\tPOS\tREF\tALT\tB\tA\n\
                   1\t100\tA\tG\t1|1\t0|0\n\
                   2\t1500\tT\tC\t0|1\t1|1\n";

        let outcome = analyze(vcf.as_bytes(), &["DRUGB", "DRUGA"], &tables, &config)?;

        assert_eq!(outcome.samples, vec!["B", "A"]);
        assert_eq!(
            outcome
                .results
                .iter()
                .map(|r| (r.sample.as_str(), r.drug.as_str(), r.risk))
                .collect::<Vec<_>>(),
            vec![
                // GENE1 poor has no rule for DRUGB, GENE2 *1/*2 is intermediate
                ("B", "DRUGB", RiskLevel::Caution),
                ("B", "DRUGA", RiskLevel::Avoid),
                // GENE2 *2/*2 is poor
                ("A", "DRUGB", RiskLevel::Avoid),
                ("A", "DRUGA", RiskLevel::None),
            ]
        );
        assert_eq!(outcome.results[2].driving_genes, vec!["GENE2"]);

        Ok(())
    }

    #[test]
    fn repeated_runs_are_identical() -> Result<(), anyhow::Error> {
        let tables = toy_tables();
        let config = Config::default_for(&tables)?;
        let vcf = "#CHROM\tPOS\tREF\tALT\tB\tA\n\
                   1\t100\tA\tG\t0/1\t0|0\n\
                   1\t200\tC\tT\t0/1\t./.\n\
                   2\t1500\tT\tC\t0|1\t1|1\n";

        let first = serde_json::to_string(&analyze(
            vcf.as_bytes(),
            &["DRUGB", "DRUGA", "drugb"],
            &tables,
            &config,
        )?)?;
        let second = serde_json::to_string(&analyze(
            vcf.as_bytes(),
            &["DRUGB", "DRUGA", "drugb"],
            &tables,
            &config,
        )?)?;

        assert_eq!(first, second);

        Ok(())
    }

    #[test]
    fn selected_sample() -> Result<(), anyhow::Error> {
        let tables = toy_tables();
        let vcf = "#CHROM\tPOS\tREF\tALT\tB\tA\n1\t100\tA\tG\t1|1\t0|0\n";

        let file: ConfigFile = serde_json::from_str(r#"{"sample": "A"}"#)?;
        let config = Config::new(file, &tables)?;
        let outcome = analyze(vcf.as_bytes(), &["DRUGA"], &tables, &config)?;
        assert_eq!(outcome.samples, vec!["A"]);
        assert_eq!(outcome.results[0].risk, RiskLevel::None);

        let file: ConfigFile = serde_json::from_str(r#"{"sample": "C"}"#)?;
        let config = Config::new(file, &tables)?;
        assert_eq!(
            analyze(vcf.as_bytes(), &["DRUGA"], &tables, &config),
            Err(StructuralParseError::UnknownSample("C".into()))
        );

        Ok(())
    }

    #[test]
    fn structural_errors_reject_request() -> Result<(), anyhow::Error> {
        let tables = toy_tables();
        let config = Config::default_for(&tables)?;

        assert_eq!(
            analyze(b"", &["DRUGA"], &tables, &config),
            Err(StructuralParseError::Empty)
        );
        assert!(analyze(b"1\t100\tA\tG\t0|1\n", &["DRUGA"], &tables, &config).is_err());

        Ok(())
    }

    #[test]
    fn resolved_diplotype_in_output() -> Result<(), anyhow::Error> {
        let tables = toy_tables();
        let config = Config::default_for(&tables)?;
        let vcf = "#CHROM\tPOS\tREF\tALT\tS\n1\t100\tA\tG\t0|1\n";

        let outcome = analyze(vcf.as_bytes(), &["DRUGA"], &tables, &config)?;
        let gene = tables.gene("GENE1").expect("GENE1 present");

        assert_eq!(
            Some(outcome.results[0].genes[0].diplotype.clone()),
            Diplotype::from_names(gene, "*2", "*1")
        );
        assert_eq!(outcome.results[0].risk, RiskLevel::Caution);

        Ok(())
    }
}
