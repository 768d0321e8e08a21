//! Common functionality.

use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use indexmap::IndexMap;

pub mod io;

/// Commonly used command line arguments.
#[derive(Parser, Debug)]
pub struct Args {
    /// Verbosity of the program
    #[clap(flatten)]
    pub verbose: Verbosity<InfoLevel>,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            verbose: Verbosity::new(0, 0),
        }
    }
}

/// Helper to print the current memory resident set size via `tracing`.
pub fn trace_rss_now() {
    let rss = procfs::process::Process::myself()
        .and_then(|me| me.stat())
        .map(|stat| stat.rss * procfs::page_size());
    match rss {
        Ok(rss) => tracing::debug!("RSS now: {}", bytesize::ByteSize::b(rss)),
        Err(e) => tracing::trace!("could not determine RSS: {}", e),
    }
}

/// Definition of canonical chromosome names.
pub const CHROMS: &[&str] = &[
    "1", "2", "3", "4", "5", "6", "7", "8", "9", "10", "11", "12", "13", "14", "15", "16", "17",
    "18", "19", "20", "21", "22", "X", "Y", "MT",
];

/// Build mapping of chromosome names to chromosome counts.
///
/// Keys are lower case, so look up with `to_ascii_lowercase()`.
pub fn build_chrom_map() -> IndexMap<String, usize> {
    let mut result = IndexMap::new();
    for (i, &chrom_name) in CHROMS.iter().enumerate() {
        let lower = chrom_name.to_ascii_lowercase();
        result.insert(lower.clone(), i);
        result.insert(format!("chr{lower}"), i);
    }
    result.insert("m".to_owned(), 24);
    result.insert("chrm".to_owned(), 24);
    result
}

/// Translate chromosome names to the canonical spelling in `CHROMS`.
#[derive(Debug, Clone)]
pub struct ChromNormalizer {
    map: IndexMap<String, usize>,
}

impl Default for ChromNormalizer {
    fn default() -> Self {
        Self {
            map: build_chrom_map(),
        }
    }
}

impl ChromNormalizer {
    /// Return the canonical name or `None` if `name` is not a known chromosome.
    pub fn canonicalize(&self, name: &str) -> Option<&'static str> {
        self.map
            .get(&name.to_ascii_lowercase())
            .map(|&idx| CHROMS[idx])
    }
}

/// Select the genome release to use.
#[derive(
    serde::Serialize,
    serde::Deserialize,
    Clone,
    Copy,
    Debug,
    Default,
    strum::Display,
    strum::EnumString,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum GenomeRelease {
    /// GRCh37 / hg19
    Grch37,
    /// GRCh38 / hg38
    #[default]
    Grch38,
}

impl GenomeRelease {
    pub fn name(&self) -> String {
        match self {
            GenomeRelease::Grch37 => String::from("GRCh37"),
            GenomeRelease::Grch38 => String::from("GRCh38"),
        }
    }
}

/// Return the version of the `pharmaguard-worker` crate and `x.y.z` in tests.
pub fn worker_version() -> &'static str {
    if cfg!(test) {
        "x.y.z"
    } else {
        env!("CARGO_PKG_VERSION")
    }
}
