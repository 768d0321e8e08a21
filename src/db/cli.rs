//! Implementation of the `db show` sub command.

use std::io::Write;

use clap::Parser;

use super::Tables;
use crate::{
    common::{worker_version, GenomeRelease},
    conf::{Config, ConfigFile, NarrativeMode},
};

/// Command line arguments for `db show` sub command.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Show reference tables and enabled capabilities", long_about = None)]
pub struct Args {
    /// Path to alternative reference tables, built-in tables are used by default.
    #[arg(long)]
    pub path_tables: Option<String>,
    /// Path to the JSON configuration file.
    #[arg(long)]
    pub path_config: Option<String>,
}

/// What the worker can evaluate with the given tables and configuration.
#[derive(serde::Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    pub worker_version: String,
    pub tables_version: String,
    pub genome_release: GenomeRelease,
    pub genes: Vec<String>,
    pub drugs: Vec<String>,
    pub narrative_mode: NarrativeMode,
    /// Narratives will be attempted.
    pub narrative_configured: bool,
}

impl Capabilities {
    pub fn new(tables: &Tables, config: &Config) -> Self {
        Self {
            worker_version: worker_version().to_owned(),
            tables_version: tables.version().to_owned(),
            genome_release: tables.genome_release(),
            genes: config.genes.iter().cloned().collect(),
            // drugs without any enabled gene cannot be evaluated
            drugs: tables
                .drugs()
                .filter(|drug| config.is_drug_enabled(&drug.name))
                .filter(|drug| drug.genes.iter().any(|gene| config.is_gene_enabled(gene)))
                .map(|drug| drug.name.clone())
                .collect(),
            narrative_mode: config.narrative.mode,
            narrative_configured: config.narrative.mode != NarrativeMode::None,
        }
    }
}

/// Main entry point for `db show` sub command.
pub fn run(args_common: &crate::common::Args, args: &Args) -> Result<(), anyhow::Error> {
    tracing::info!("args_common = {:?}", &args_common);
    tracing::info!("args = {:?}", &args);

    let tables = Tables::load(args.path_tables.as_deref())?;
    let config = Config::new(ConfigFile::load(args.path_config.as_deref())?, &tables)?;

    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, &Capabilities::new(&tables, &config))?;
    writeln!(stdout)?;

    Ok(())
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::Capabilities;
    use crate::{
        conf::{Config, ConfigFile},
        db::{test_fixtures::toy_tables, Tables},
    };

    #[test]
    fn builtin_capabilities() -> Result<(), anyhow::Error> {
        let tables = Tables::builtin()?;
        let config = Config::default_for(&tables)?;

        let capabilities = Capabilities::new(&tables, &config);

        assert_eq!(capabilities.genes.len(), 6);
        assert_eq!(
            capabilities.drugs,
            vec![
                "CODEINE",
                "TAMOXIFEN",
                "AMITRIPTYLINE",
                "CLOPIDOGREL",
                "WARFARIN",
                "SIMVASTATIN",
                "AZATHIOPRINE",
                "FLUOROURACIL"
            ]
        );
        assert!(!capabilities.narrative_configured);

        Ok(())
    }

    #[test]
    fn restricted_serialization() -> Result<(), anyhow::Error> {
        let tables = toy_tables();
        let file: ConfigFile = serde_json::from_str(
            r#"{"genes": ["GENE2"], "narrative": {"mode": "template"}}"#,
        )?;
        let config = Config::new(file, &tables)?;

        insta::assert_snapshot!(
            serde_json::to_string_pretty(&Capabilities::new(&tables, &config))?,
            @r###"
        {
          "worker_version": "x.y.z",
          "tables_version": "toy-1",
          "genome_release": "grch38",
          "genes": [
            "GENE2"
          ],
          "drugs": [
            "DRUGB"
          ],
          "narrative_mode": "template",
          "narrative_configured": true
        }
        "###
        );

        Ok(())
    }
}
