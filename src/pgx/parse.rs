//! Parsing of VCF-like variant files into typed variant records.
//!
//! The parser is line-oriented and lenient: structural problems with the
//! header reject the file, problems with single data lines are collected as
//! warnings and the line is skipped.

use std::collections::{BTreeSet, HashSet};

use crate::{
    common::{io::gunzip_if_needed, ChromNormalizer},
    err::{StructuralParseError, Warning},
};

/// Fixed VCF columns that never hold sample data.
const FIXED_COLUMNS: &[&str] = &["CHROM", "POS", "ID", "REF", "ALT", "QUAL", "FILTER", "INFO"];

/// The state of one chromosome copy at one variant.
#[derive(serde::Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GtAllele {
    /// The reference allele.
    Ref,
    /// The alternate allele of this record.
    Alt,
    /// Another alternate allele of the same multi-allelic site.
    OtherAlt,
    /// No call (`.`).
    Missing,
}

/// Diploid genotype of one sample at one variant.
#[derive(serde::Serialize, Debug, Clone, PartialEq)]
pub struct Genotype {
    /// Allele states of the first and second copy.
    pub alleles: [GtAllele; 2],
    /// `a|b` rather than `a/b`.
    pub phased: bool,
    /// Genotype quality (`GQ`), if given.
    pub quality: Option<f32>,
}

impl Genotype {
    /// Whether chromosome copy `copy` (0 or 1) carries the alternate allele.
    pub fn carries_alt(&self, copy: usize) -> bool {
        self.alleles[copy] == GtAllele::Alt
    }

    /// Whether any copy is uncalled.
    pub fn has_missing(&self) -> bool {
        self.alleles.contains(&GtAllele::Missing)
    }
}

/// One biallelic variant record with the genotypes of all samples.
#[derive(serde::Serialize, Debug, Clone, PartialEq)]
pub struct Variant {
    /// Canonical chromosome name, or the name as given if it is unknown.
    pub chrom: String,
    /// 1-based position.
    pub pos: u64,
    /// Value of the `ID` column, e.g., an rsID.
    pub id: Option<String>,
    pub reference: String,
    pub alternate: String,
    /// One genotype per sample, in column order.
    pub genotypes: Vec<Genotype>,
}

impl Variant {
    /// Identity of the variant.
    pub fn key(&self) -> (&str, u64, &str, &str) {
        (&self.chrom, self.pos, &self.reference, &self.alternate)
    }
}

/// Result of parsing a variant file.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedVariants {
    /// Sample names in column order.
    pub samples: Vec<String>,
    /// Variants in file order, multi-allelic sites split.
    pub variants: Vec<Variant>,
    /// Skipped lines and flagged chromosomes.
    pub warnings: Vec<Warning>,
}

/// Position of the interesting columns in the column header.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ColumnLayout {
    n_columns: usize,
    chrom: usize,
    pos: usize,
    id: Option<usize>,
    reference: usize,
    alternate: usize,
    format: Option<usize>,
    /// Column index and name of each sample.
    samples: Vec<(usize, String)>,
}

/// Split a line on tabs or, if there is no tab at all, on whitespace.
fn split_fields(line: &str) -> Vec<&str> {
    if line.contains('\t') {
        line.split('\t').collect()
    } else {
        line.split_whitespace().collect()
    }
}

impl ColumnLayout {
    fn from_header(line: &str) -> Result<Self, StructuralParseError> {
        let names = split_fields(line.trim_start_matches('#'));
        let upper = names
            .iter()
            .map(|name| name.to_ascii_uppercase())
            .collect::<Vec<_>>();

        let mut seen = BTreeSet::new();
        for name in &names {
            if !seen.insert(*name) {
                return Err(StructuralParseError::DuplicateColumn(name.to_string()));
            }
        }

        let find = |name: &str| upper.iter().position(|col| col == name);
        let required = ["CHROM", "POS", "REF", "ALT"];
        let missing = required
            .into_iter()
            .filter(|&name| find(name).is_none())
            .map(String::from)
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            return Err(StructuralParseError::MissingColumns(missing));
        }

        let format = find("FORMAT");
        let samples = names
            .iter()
            .enumerate()
            .filter(|(i, _)| match format {
                Some(format) => *i > format,
                None => !FIXED_COLUMNS.contains(&upper[*i].as_str()),
            })
            .map(|(i, name)| (i, name.to_string()))
            .collect::<Vec<_>>();
        if samples.is_empty() {
            return Err(StructuralParseError::NoSamples);
        }

        // `find` cannot fail for the required columns, checked above
        let required_idx = |name: &str| find(name).unwrap_or_default();
        Ok(Self {
            n_columns: names.len(),
            chrom: required_idx("CHROM"),
            pos: required_idx("POS"),
            id: find("ID"),
            reference: required_idx("REF"),
            alternate: required_idx("ALT"),
            format,
            samples,
        })
    }
}

/// Allele indices of a genotype string before splitting by alternate allele.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RawGenotype {
    indices: [Option<usize>; 2],
    phased: bool,
}

/// Parse a `GT` value such as `0|1`, `1/2`, `./.`, or `.`.
fn parse_gt(value: &str, n_alts: usize) -> Result<RawGenotype, String> {
    if value == "." {
        return Ok(RawGenotype {
            indices: [None, None],
            phased: false,
        });
    }
    let (sep, phased) = match (value.contains('|'), value.contains('/')) {
        (true, false) => ('|', true),
        (false, true) => ('/', false),
        (true, true) => return Err(format!("mixed phasing in genotype {:?}", value)),
        (false, false) => return Err(format!("unsupported non-diploid genotype {:?}", value)),
    };
    let parts = value.split(sep).collect::<Vec<_>>();
    if parts.len() != 2 {
        return Err(format!("unsupported non-diploid genotype {:?}", value));
    }
    let mut indices = [None, None];
    for (slot, part) in indices.iter_mut().zip(parts) {
        if part == "." {
            continue;
        }
        let idx = part
            .parse::<usize>()
            .map_err(|_| format!("invalid allele index {:?} in genotype {:?}", part, value))?;
        if idx > n_alts {
            return Err(format!(
                "allele index {} in genotype {:?} exceeds the {} alternate allele(s)",
                idx, value, n_alts
            ));
        }
        *slot = Some(idx);
    }
    Ok(RawGenotype { indices, phased })
}

impl RawGenotype {
    /// Genotype from the point of view of the `alt_no`-th (1-based) alternate allele.
    fn for_alt(&self, alt_no: usize, quality: Option<f32>) -> Genotype {
        let state = |idx: Option<usize>| match idx {
            None => GtAllele::Missing,
            Some(0) => GtAllele::Ref,
            Some(i) if i == alt_no => GtAllele::Alt,
            Some(_) => GtAllele::OtherAlt,
        };
        Genotype {
            alleles: [state(self.indices[0]), state(self.indices[1])],
            phased: self.phased,
            quality,
        }
    }
}

/// Parse one data line into zero or more variants.
fn parse_data_line(
    layout: &ColumnLayout,
    fields: &[&str],
    chrom: String,
) -> Result<Vec<Variant>, String> {
    let pos = fields[layout.pos]
        .parse::<u64>()
        .ok()
        .filter(|pos| *pos > 0)
        .ok_or_else(|| format!("invalid position {:?}", fields[layout.pos]))?;
    let id = layout
        .id
        .map(|idx| fields[idx])
        .filter(|id| !id.is_empty() && *id != ".")
        .map(str::to_owned);
    let reference = fields[layout.reference].to_ascii_uppercase();
    if reference.is_empty() || reference == "." {
        return Err(String::from("missing reference allele"));
    }
    let alt_field = fields[layout.alternate];
    if alt_field.is_empty() {
        return Err(String::from("missing alternate allele"));
    }
    if alt_field == "." {
        // reference-only site, nothing to record
        return Ok(Vec::new());
    }
    let alternates = alt_field
        .split(',')
        .map(str::to_ascii_uppercase)
        .collect::<Vec<_>>();
    if alternates.iter().any(|alt| alt.is_empty() || alt == ".") {
        return Err(format!("invalid alternate alleles {:?}", alt_field));
    }

    let (gt_idx, gq_idx) = match layout.format {
        Some(format) => {
            let keys = fields[format].split(':').collect::<Vec<_>>();
            let gt_idx = keys
                .iter()
                .position(|key| *key == "GT")
                .ok_or_else(|| format!("FORMAT {:?} has no GT key", fields[format]))?;
            (gt_idx, keys.iter().position(|key| *key == "GQ"))
        }
        None => (0, None),
    };

    let raw_genotypes = layout
        .samples
        .iter()
        .map(|(col, name)| {
            let parts = if layout.format.is_some() {
                fields[*col].split(':').collect::<Vec<_>>()
            } else {
                vec![fields[*col]]
            };
            // trailing FORMAT fields may be dropped
            let gt = parts.get(gt_idx).copied().unwrap_or(".");
            let quality = gq_idx
                .and_then(|idx| parts.get(idx))
                .and_then(|gq| gq.parse::<f32>().ok());
            parse_gt(gt, alternates.len())
                .map(|raw| (raw, quality))
                .map_err(|e| format!("sample {}: {}", name, e))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(alternates
        .into_iter()
        .enumerate()
        .map(|(i, alternate)| Variant {
            chrom: chrom.clone(),
            pos,
            id: id.clone(),
            reference: reference.clone(),
            alternate,
            genotypes: raw_genotypes
                .iter()
                .map(|(raw, quality)| raw.for_alt(i + 1, *quality))
                .collect(),
        })
        .collect())
}

/// Parse variant file content, transparently decompressing gzip input.
pub fn parse(bytes: &[u8]) -> Result<ParsedVariants, StructuralParseError> {
    let bytes = gunzip_if_needed(bytes).map_err(|e| StructuralParseError::Decompress(e.to_string()))?;
    let text =
        std::str::from_utf8(&bytes).map_err(|e| StructuralParseError::NotUtf8(e.to_string()))?;
    parse_str(text)
}

/// Parse variant file text.
pub fn parse_str(text: &str) -> Result<ParsedVariants, StructuralParseError> {
    if text.trim().is_empty() {
        return Err(StructuralParseError::Empty);
    }

    let normalizer = ChromNormalizer::default();
    let mut layout: Option<ColumnLayout> = None;
    let mut variants = Vec::new();
    let mut warnings = Vec::new();
    let mut flagged_chroms = BTreeSet::new();
    let mut seen = HashSet::new();
    let mut meta_lines = 0usize;

    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        if line.starts_with("##") {
            meta_lines += 1;
            continue;
        }
        if line.starts_with('#') {
            if layout.is_some() {
                warnings.push(Warning::LineParse {
                    line: line_no,
                    message: String::from("second column header line ignored"),
                });
            } else {
                let parsed = ColumnLayout::from_header(line)?;
                tracing::debug!(
                    "column header with {} columns and samples {:?}",
                    parsed.n_columns,
                    parsed.samples.iter().map(|(_, name)| name).collect::<Vec<_>>()
                );
                layout = Some(parsed);
            }
            continue;
        }

        let layout = layout
            .as_ref()
            .ok_or(StructuralParseError::DataBeforeHeader { line: line_no })?;
        let fields = split_fields(line);
        if fields.len() != layout.n_columns {
            tracing::debug!("line {}: wrong column count, skipping", line_no);
            warnings.push(Warning::LineParse {
                line: line_no,
                message: format!(
                    "expected {} columns but found {}",
                    layout.n_columns,
                    fields.len()
                ),
            });
            continue;
        }

        let raw_chrom = fields[layout.chrom];
        let chrom = match normalizer.canonicalize(raw_chrom) {
            Some(chrom) => chrom.to_owned(),
            None => {
                if flagged_chroms.insert(raw_chrom.to_owned()) {
                    warnings.push(Warning::UnknownChromosome {
                        line: line_no,
                        chrom: raw_chrom.to_owned(),
                    });
                }
                raw_chrom.to_owned()
            }
        };

        match parse_data_line(layout, &fields, chrom) {
            Ok(records) => {
                for record in records {
                    let (chrom, pos, reference, alternate) = record.key();
                    let key = (chrom.to_owned(), pos, reference.to_owned(), alternate.to_owned());
                    if seen.insert(key) {
                        variants.push(record);
                    } else {
                        warnings.push(Warning::LineParse {
                            line: line_no,
                            message: format!(
                                "duplicate record {}:{} {}>{}",
                                chrom, pos, reference, alternate
                            ),
                        });
                    }
                }
            }
            Err(message) => {
                tracing::debug!("line {}: {}, skipping", line_no, &message);
                warnings.push(Warning::LineParse {
                    line: line_no,
                    message,
                });
            }
        }
    }

    let layout = layout.ok_or(StructuralParseError::MissingHeader)?;
    tracing::debug!(
        "parsed {} metadata lines, {} variants, {} warnings",
        meta_lines,
        variants.len(),
        warnings.len()
    );

    Ok(ParsedVariants {
        samples: layout.samples.into_iter().map(|(_, name)| name).collect(),
        variants,
        warnings,
    })
}
