//! Error and warning taxonomy of an analysis request.

/// Unrecoverable problems with the structure of the variant file.
///
/// Any of these rejects the whole request.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StructuralParseError {
    #[error("variant file is empty")]
    Empty,
    #[error("variant file could not be decompressed: {0}")]
    Decompress(String),
    #[error("variant file is not valid UTF-8: {0}")]
    NotUtf8(String),
    #[error("line {line}: data line before the column header line")]
    DataBeforeHeader { line: usize },
    #[error("no column header line (starting with a single '#') found")]
    MissingHeader,
    #[error("column header lacks required column(s): {}", .0.join(", "))]
    MissingColumns(Vec<String>),
    #[error("column {0:?} appears more than once in the column header")]
    DuplicateColumn(String),
    #[error("column header names no sample columns")]
    NoSamples,
    #[error("sample {0:?} not found in column header")]
    UnknownSample(String),
}

/// Recoverable problems, reported alongside whatever could be computed.
#[derive(thiserror::Error, serde::Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    /// One data line was skipped.
    #[error("line {line}: {message}")]
    LineParse { line: usize, message: String },
    /// Chromosome name could not be normalized; the variant is kept verbatim.
    #[error("line {line}: unknown chromosome {chrom:?}")]
    UnknownChromosome { line: usize, chrom: String },
    #[error("drug {drug:?} is not supported")]
    UnsupportedDrug { drug: String },
    #[error("gene {gene} of drug {drug} is not enabled and was not evaluated")]
    UnsupportedGene { drug: String, gene: String },
    #[error("drug {drug:?} was requested more than once")]
    DuplicateDrug { drug: String },
    /// Not an error, the result carries all candidates.
    #[error("sample {sample}: ambiguous call for {gene}: {message}")]
    AmbiguousCall {
        sample: String,
        gene: String,
        message: String,
        candidates: Vec<String>,
    },
    #[error("sample {sample}: no narrative for {drug}: {reason}")]
    NarrativeUnavailable {
        sample: String,
        drug: String,
        reason: String,
    },
}
