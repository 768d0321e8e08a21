//! Star allele calling for one sample and one gene.
//!
//! Only variants at positions used by some allele definition influence the
//! call.  A haplotype is the set of defining sites carried by one chromosome
//! copy; an allele matches it when all of its defining sites are carried and
//! no other carried site occupies one of its positions.  The most specific
//! matching allele wins, ties are kept as candidates.

use std::{
    cmp::Reverse,
    collections::{BTreeMap, BTreeSet},
};

use itertools::Itertools;

use super::parse::Variant;
use crate::{
    conf::Config,
    db::{Gene, Site},
};

/// Zygosity of an observed defining-position variant.
#[derive(serde::Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Zygosity {
    Het,
    Hom,
}

/// A carried variant at a position used by the gene's allele definitions.
#[derive(serde::Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ObservedVariant {
    pub position: u64,
    pub reference: String,
    pub alternate: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub zygosity: Zygosity,
    pub phased: bool,
}

/// One candidate diplotype as indices into `Gene::alleles`, sorted ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CandidatePair {
    pub alleles: [usize; 2],
    /// Sum of the specificities of both alleles.
    pub specificity: usize,
}

impl CandidatePair {
    fn new(first: usize, second: usize, gene: &Gene) -> Self {
        let alleles = if first <= second {
            [first, second]
        } else {
            [second, first]
        };
        Self {
            alleles,
            specificity: gene.alleles[first].specificity() + gene.alleles[second].specificity(),
        }
    }

    /// Ranking key: higher specificity first, then table order.
    fn rank_key(&self) -> (Reverse<usize>, [usize; 2]) {
        (Reverse(self.specificity), self.alleles)
    }
}

/// Result of calling one gene in one sample.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneCall {
    pub gene: String,
    /// Distinct candidate diplotypes, best first.  Exactly one for an
    /// unambiguous call, none when enumeration was not possible.
    pub candidates: Vec<CandidatePair>,
    /// No unphased heterozygous site was involved.
    pub phased: bool,
    /// Carried variants at defining positions, in position order.
    pub observed: Vec<ObservedVariant>,
    /// Defining positions with a missing or low-quality call.
    pub uncalled_positions: Vec<u64>,
    /// Why the call could not be enumerated, if so.
    pub note: Option<String>,
}

impl GeneCall {
    pub fn is_ambiguous(&self) -> bool {
        self.candidates.len() != 1
    }
}

/// Carrier state of one site across both copies.
#[derive(Debug, Clone, Copy, Default)]
struct SiteState {
    carried: [bool; 2],
    phased: bool,
}

/// Call the alleles matching `haplotype`, most specific first; ties are all returned.
pub fn call_haplotype(gene: &Gene, haplotype: &BTreeSet<Site>) -> Vec<usize> {
    let matching = gene
        .alleles
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != gene.reference)
        .filter(|(_, allele)| {
            allele.sites.is_subset(haplotype)
                && haplotype
                    .iter()
                    .filter(|site| allele.positions().any(|pos| pos == site.position))
                    .all(|site| allele.sites.contains(site))
        })
        .map(|(i, allele)| (i, allele.specificity()))
        .collect::<Vec<_>>();

    match matching.iter().map(|(_, spec)| *spec).max() {
        Some(best) => matching
            .into_iter()
            .filter(|(_, spec)| *spec == best)
            .map(|(i, _)| i)
            .collect(),
        None => vec![gene.reference],
    }
}

/// A unit whose copy assignment is enumerated as a whole.
type PhaseUnit = Vec<(Site, [bool; 2])>;

/// Call the diplotype candidates of `gene` for sample index `sample`.
pub fn call_gene(variants: &[Variant], sample: usize, gene: &Gene, config: &Config) -> GeneCall {
    let defining_positions = gene
        .defining_sites()
        .into_iter()
        .map(|site| site.position)
        .collect::<BTreeSet<_>>();

    let mut states: BTreeMap<Site, SiteState> = BTreeMap::new();
    let mut observed: BTreeMap<Site, ObservedVariant> = BTreeMap::new();
    let mut uncalled = BTreeSet::new();
    for variant in variants
        .iter()
        .filter(|v| gene.position.contains(&v.chrom, v.pos))
        .filter(|v| defining_positions.contains(&v.pos))
    {
        let gt = &variant.genotypes[sample];
        let low_quality = match (config.min_genotype_quality, gt.quality) {
            (Some(min), Some(gq)) => gq < min,
            _ => false,
        };
        if low_quality || gt.has_missing() {
            uncalled.insert(variant.pos);
        }
        if low_quality {
            tracing::trace!(
                "{}: ignoring low-quality call at {} (GQ {:?})",
                gene.symbol(),
                variant.pos,
                gt.quality
            );
            continue;
        }

        let site = Site {
            position: variant.pos,
            reference: variant.reference.clone(),
            alternate: variant.alternate.clone(),
        };
        let state = states.entry(site.clone()).or_default();
        state.carried[0] |= gt.carries_alt(0);
        state.carried[1] |= gt.carries_alt(1);
        state.phased = gt.phased;
        if state.carried[0] || state.carried[1] {
            observed.insert(
                site,
                ObservedVariant {
                    position: variant.pos,
                    reference: variant.reference.clone(),
                    alternate: variant.alternate.clone(),
                    id: variant.id.clone(),
                    zygosity: if state.carried[0] && state.carried[1] {
                        Zygosity::Hom
                    } else {
                        Zygosity::Het
                    },
                    phased: state.phased,
                },
            );
        }
    }

    // alternates of one unphased multi-allelic record flip together
    let mut both = BTreeSet::new();
    let mut phased_block: PhaseUnit = Vec::new();
    let mut unphased: BTreeMap<u64, PhaseUnit> = BTreeMap::new();
    for (site, state) in states {
        match state.carried {
            [true, true] => {
                both.insert(site);
            }
            [false, false] => (),
            carried if state.phased => phased_block.push((site, carried)),
            carried => unphased
                .entry(site.position)
                .or_default()
                .push((site, carried)),
        }
    }
    let phased = unphased.is_empty();
    let units = std::iter::once(phased_block)
        .filter(|block| !block.is_empty())
        .chain(unphased.into_values())
        .collect::<Vec<_>>();

    let mut result = GeneCall {
        gene: gene.symbol().to_owned(),
        candidates: Vec::new(),
        phased,
        observed: observed.into_values().collect(),
        uncalled_positions: uncalled.into_iter().collect(),
        note: None,
    };

    if units.len() > config.max_phase_units {
        let note = format!(
            "{} phase units exceed the limit of {}",
            units.len(),
            config.max_phase_units
        );
        tracing::debug!("{}: {}", gene.symbol(), &note);
        result.note = Some(note);
        return result;
    }

    // the first unit keeps its orientation, the diplotype is unordered
    let n_assignments = 1usize << units.len().saturating_sub(1);
    let mut candidates = BTreeMap::new();
    for mask in 0..n_assignments {
        let mut haplotypes = [both.clone(), both.clone()];
        for (i, unit) in units.iter().enumerate() {
            let flip = i > 0 && (mask >> (i - 1)) & 1 == 1;
            for (site, carried) in unit {
                for (copy, haplotype) in haplotypes.iter_mut().enumerate() {
                    let from = if flip { 1 - copy } else { copy };
                    if carried[from] {
                        haplotype.insert(site.clone());
                    }
                }
            }
        }

        let first = call_haplotype(gene, &haplotypes[0]);
        let second = call_haplotype(gene, &haplotypes[1]);
        let pairs = first
            .iter()
            .cartesian_product(second.iter())
            .map(|(&a, &b)| CandidatePair::new(a, b, gene))
            .collect::<Vec<_>>();
        let best = pairs.iter().map(|p| p.specificity).max().unwrap_or_default();
        candidates.extend(
            pairs
                .into_iter()
                .filter(|p| p.specificity == best)
                .map(|p| (p.rank_key(), p)),
        );
    }

    result.candidates = candidates.into_values().collect();
    tracing::trace!(
        "{}: {} assignment(s), {} candidate(s)",
        gene.symbol(),
        n_assignments,
        result.candidates.len()
    );
    result
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::{call_gene, GeneCall, Zygosity};
    use crate::{
        conf::{Config, ConfigFile},
        db::{test_fixtures::toy_tables, Tables},
        pgx::parse::parse_str,
    };

    const HEADER: &str = "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tSAMPLE\n";

    fn call(body: &str, tables: &Tables, config: &Config) -> GeneCall {
        let parsed = parse_str(&format!("{}{}", HEADER, body)).expect("valid test input");
        assert!(parsed.warnings.is_empty(), "{:?}", parsed.warnings);
        let gene = tables.gene("GENE1").expect("GENE1 present");
        call_gene(&parsed.variants, 0, gene, config)
    }

    fn names(call: &GeneCall, tables: &Tables) -> Vec<String> {
        let gene = tables.gene("GENE1").expect("GENE1 present");
        call.candidates
            .iter()
            .map(|c| {
                format!(
                    "{}/{}",
                    gene.alleles[c.alleles[0]].name, gene.alleles[c.alleles[1]].name
                )
            })
            .collect()
    }

    #[test]
    fn no_variants_is_reference() -> Result<(), anyhow::Error> {
        let tables = toy_tables();
        let config = Config::default_for(&tables)?;

        let res = call("2\t1500\t.\tT\tC\t.\t.\t.\tGT\t1/1\n", &tables, &config);

        assert_eq!(names(&res, &tables), vec!["*1/*1"]);
        assert!(!res.is_ambiguous());
        assert!(res.observed.is_empty());

        Ok(())
    }

    #[test]
    fn phased_exact_alleles() -> Result<(), anyhow::Error> {
        let tables = toy_tables();
        let config = Config::default_for(&tables)?;

        let res = call(
            "1\t100\t.\tA\tG\t.\t.\t.\tGT\t1|0\n\
             1\t200\t.\tC\tT\t.\t.\t.\tGT\t0|1\n",
            &tables,
            &config,
        );

        assert_eq!(names(&res, &tables), vec!["*2/*3"]);
        assert!(res.phased);
        assert_eq!(res.candidates[0].specificity, 2);

        Ok(())
    }

    #[test]
    fn most_specific_allele_wins() -> Result<(), anyhow::Error> {
        let tables = toy_tables();
        let config = Config::default_for(&tables)?;

        let res = call(
            "1\t100\t.\tA\tG\t.\t.\t.\tGT\t0|1\n\
             1\t300\t.\tG\tA\t.\t.\t.\tGT\t0|1\n",
            &tables,
            &config,
        );

        assert_eq!(names(&res, &tables), vec!["*1/*4"]);

        Ok(())
    }

    #[test]
    fn phased_tie_is_ambiguous() -> Result<(), anyhow::Error> {
        let tables = toy_tables();
        let config = Config::default_for(&tables)?;

        let res = call(
            "1\t100\t.\tA\tG\t.\t.\t.\tGT\t1|0\n\
             1\t200\t.\tC\tT\t.\t.\t.\tGT\t1|0\n",
            &tables,
            &config,
        );

        assert_eq!(names(&res, &tables), vec!["*1/*2", "*1/*3"]);
        assert!(res.is_ambiguous());

        Ok(())
    }

    #[test]
    fn unphased_two_alleles_enumerated() -> Result<(), anyhow::Error> {
        let tables = toy_tables();
        let config = Config::default_for(&tables)?;

        let res = call(
            "1\t100\t.\tA\tG\t.\t.\t.\tGT\t0/1\n\
             1\t200\t.\tC\tT\t.\t.\t.\tGT\t0/1\n",
            &tables,
            &config,
        );

        assert_eq!(names(&res, &tables), vec!["*2/*3", "*1/*2", "*1/*3"]);
        assert!(!res.phased);
        assert_eq!(
            res.candidates.iter().map(|c| c.specificity).collect::<Vec<_>>(),
            vec![2, 1, 1]
        );

        Ok(())
    }

    #[test]
    fn homozygous_alternate() -> Result<(), anyhow::Error> {
        let tables = toy_tables();
        let config = Config::default_for(&tables)?;

        let res = call("1\t100\t.\tA\tG\t.\t.\t.\tGT\t1/1\n", &tables, &config);

        assert_eq!(names(&res, &tables), vec!["*2/*2"]);
        assert!(res.phased);
        assert_eq!(res.observed[0].zygosity, Zygosity::Hom);

        Ok(())
    }

    #[test]
    fn unknown_alternate_at_defining_position() -> Result<(), anyhow::Error> {
        let tables = toy_tables();
        let config = Config::default_for(&tables)?;

        let res = call("chr1\t200\trs99\tC\tA\t.\t.\t.\tGT\t0|1\n", &tables, &config);

        assert_eq!(names(&res, &tables), vec!["*1/*1"]);
        assert_eq!(res.observed.len(), 1);
        assert_eq!(res.observed[0].id.as_deref(), Some("rs99"));

        Ok(())
    }

    #[test]
    fn most_specific_among_several_matches() -> Result<(), anyhow::Error> {
        let tables = toy_tables();
        let config = Config::default_for(&tables)?;

        // copy 2 carries 100G and 300A (*4) plus 200T (*3): *4 is most specific
        let res = call(
            "1\t100\t.\tA\tG\t.\t.\t.\tGT\t0|1\n\
             1\t200\t.\tC\tT,G\t.\t.\t.\tGT\t2|1\n\
             1\t300\t.\tG\tA\t.\t.\t.\tGT\t0|1\n",
            &tables,
            &config,
        );

        assert_eq!(names(&res, &tables), vec!["*4/*5"]);

        Ok(())
    }

    #[test]
    fn multi_allelic_site() -> Result<(), anyhow::Error> {
        let tables = toy_tables();
        let config = Config::default_for(&tables)?;

        let res = call("1\t200\t.\tC\tT,G\t.\t.\t.\tGT\t1|2\n", &tables, &config);

        assert_eq!(names(&res, &tables), vec!["*3/*5"]);

        Ok(())
    }

    #[test]
    fn unphased_multi_allelic_site() -> Result<(), anyhow::Error> {
        let tables = toy_tables();
        let config = Config::default_for(&tables)?;

        let res = call("1\t200\t.\tC\tT,G\t.\t.\t.\tGT\t1/2\n", &tables, &config);

        assert_eq!(names(&res, &tables), vec!["*3/*5"]);
        assert!(!res.is_ambiguous());
        assert!(!res.phased);
        assert_eq!(res.observed.len(), 2);

        Ok(())
    }

    #[test]
    fn unphased_multi_allelic_site_with_other_site() -> Result<(), anyhow::Error> {
        let tables = toy_tables();
        let config = Config::default_for(&tables)?;

        let res = call(
            "1\t100\t.\tA\tG\t.\t.\t.\tGT\t0/1\n\
             1\t200\t.\tC\tT,G\t.\t.\t.\tGT\t1/2\n",
            &tables,
            &config,
        );

        assert_eq!(names(&res, &tables), vec!["*2/*3", "*2/*5", "*3/*5"]);
        assert!(!res.phased);

        Ok(())
    }

    #[test]
    fn unphased_half_call() -> Result<(), anyhow::Error> {
        let tables = toy_tables();
        let config = Config::default_for(&tables)?;

        let res = call("1\t200\t.\tC\tT\t.\t.\t.\tGT\t./1\n", &tables, &config);

        assert_eq!(names(&res, &tables), vec!["*1/*3"]);
        assert!(!res.is_ambiguous());
        assert!(!res.phased);
        assert_eq!(res.uncalled_positions, vec![200]);
        assert_eq!(res.observed[0].zygosity, Zygosity::Het);

        Ok(())
    }

    #[test]
    fn reference_bases_must_agree() -> Result<(), anyhow::Error> {
        let tables = toy_tables();
        let config = Config::default_for(&tables)?;

        let res = call("1\t100\t.\tAC\tGC\t.\t.\t.\tGT\t1|1\n", &tables, &config);

        assert_eq!(names(&res, &tables), vec!["*1/*1"]);
        assert_eq!(res.observed.len(), 1);

        Ok(())
    }

    #[test]
    fn missing_and_low_quality_calls() -> Result<(), anyhow::Error> {
        let tables = toy_tables();
        let config = Config::new(
            ConfigFile {
                min_genotype_quality: Some(20.0),
                ..Default::default()
            },
            &tables,
        )?;

        let res = call(
            "1\t100\t.\tA\tG\t.\t.\t.\tGT:GQ\t./.:99\n\
             1\t200\t.\tC\tT\t.\t.\t.\tGT:GQ\t1/1:10\n\
             1\t250\t.\tC\tT\t.\t.\t.\tGT:GQ\t./.:10\n",
            &tables,
            &config,
        );

        assert_eq!(names(&res, &tables), vec!["*1/*1"]);
        assert_eq!(res.uncalled_positions, vec![100, 200]);

        Ok(())
    }

    #[test]
    fn phased_block_with_unphased_site() -> Result<(), anyhow::Error> {
        let tables = toy_tables();
        let config = Config::default_for(&tables)?;

        let res = call(
            "1\t100\t.\tA\tG\t.\t.\t.\tGT\t0|1\n\
             1\t200\t.\tC\tT\t.\t.\t.\tGT\t0/1\n\
             1\t300\t.\tG\tA\t.\t.\t.\tGT\t0|1\n",
            &tables,
            &config,
        );

        assert_eq!(names(&res, &tables), vec!["*3/*4", "*1/*4"]);
        assert!(!res.phased);

        Ok(())
    }

    #[test]
    fn too_many_phase_units() -> Result<(), anyhow::Error> {
        let tables = toy_tables();
        let config = Config::new(
            ConfigFile {
                max_phase_units: 1,
                ..Default::default()
            },
            &tables,
        )?;

        let res = call(
            "1\t100\t.\tA\tG\t.\t.\t.\tGT\t0/1\n\
             1\t200\t.\tC\tT\t.\t.\t.\tGT\t0/1\n",
            &tables,
            &config,
        );

        assert!(res.candidates.is_empty());
        assert!(res.is_ambiguous());
        assert_eq!(
            res.note.as_deref(),
            Some("2 phase units exceed the limit of 1")
        );

        Ok(())
    }

    #[test]
    fn variants_outside_gene_are_ignored() -> Result<(), anyhow::Error> {
        let tables = toy_tables();
        let config = Config::default_for(&tables)?;

        let res = call(
            "2\t100\t.\tA\tG\t.\t.\t.\tGT\t1/1\n\
             1\t600\t.\tA\tG\t.\t.\t.\tGT\t1/1\n",
            &tables,
            &config,
        );

        assert_eq!(names(&res, &tables), vec!["*1/*1"]);

        Ok(())
    }
}
