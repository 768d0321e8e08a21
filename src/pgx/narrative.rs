//! Optional prose summaries of the verdicts.
//!
//! Narratives are best effort: a summarizer that fails or does not answer in
//! time leaves the narrative empty and adds a warning.  Verdicts are never
//! changed by this step.

use std::{process::Stdio, time::Duration};

use futures::future::{join_all, BoxFuture, FutureExt};
use itertools::Itertools;
use tokio::io::AsyncWriteExt;

use super::{
    diplotype::Diplotype,
    result::{AnalysisOutcome, GeneAssessment, PharmaGuardResult},
};
use crate::{
    db::data::{Phenotype, RiskLevel},
    err::Warning,
};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum NarrativeError {
    #[error("narrative timed out or is unavailable: {0}")]
    TimeoutOrUnavailable(String),
}

/// Something that writes prose for a verdict.
pub trait Summarizer: Send + Sync {
    fn summarize<'a>(
        &'a self,
        result: &'a PharmaGuardResult,
    ) -> BoxFuture<'a, Result<String, NarrativeError>>;
}

/// Deterministic offline summaries assembled from the verdict fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateSummarizer;

fn describe_gene(assessment: &GeneAssessment) -> String {
    match &assessment.diplotype {
        Diplotype::Resolved { label, .. } => {
            let score = assessment
                .phenotype
                .activity_score
                .map(|score| format!(", activity score {}", score))
                .unwrap_or_default();
            match assessment.phenotype.phenotype {
                Phenotype::Indeterminate => format!(
                    "{} {} (phenotype indeterminate{})",
                    assessment.gene, label, score
                ),
                phenotype => format!(
                    "{} {} ({} metabolizer{})",
                    assessment.gene, label, phenotype, score
                ),
            }
        }
        Diplotype::Ambiguous { .. } if assessment.phenotype.candidate_phenotypes.is_empty() => {
            format!("{} could not be genotyped unambiguously", assessment.gene)
        }
        Diplotype::Ambiguous { .. } => format!(
            "{} is ambiguous (possible phenotypes: {})",
            assessment.gene,
            assessment.phenotype.candidate_phenotypes.iter().join(" or ")
        ),
    }
}

impl TemplateSummarizer {
    pub fn render(result: &PharmaGuardResult) -> String {
        let risk = match result.risk {
            RiskLevel::None => "no known pharmacogenomic risk",
            RiskLevel::Caution => "a pharmacogenomic risk that calls for caution",
            RiskLevel::Avoid => "a pharmacogenomic risk that warrants avoiding the drug",
        };
        let mut text = format!("Sample {} shows {} for {}.", result.sample, risk, result.drug);
        if !result.genes.is_empty() {
            text.push_str(&format!(
                " Genotype: {}.",
                result.genes.iter().map(describe_gene).join("; ")
            ));
        }
        if !result.driving_genes.is_empty() {
            text.push_str(&format!(
                " The verdict is driven by {}.",
                result.driving_genes.join(", ")
            ));
        }
        if result.ambiguous {
            text.push_str(" At least one genotype could not be resolved, interpret with care.");
        }
        text.push(' ');
        text.push_str(&result.recommendation);
        text
    }
}

impl Summarizer for TemplateSummarizer {
    fn summarize<'a>(
        &'a self,
        result: &'a PharmaGuardResult,
    ) -> BoxFuture<'a, Result<String, NarrativeError>> {
        futures::future::ready(Ok(Self::render(result))).boxed()
    }
}

/// Runs an external program that reads the verdict JSON on stdin and writes
/// the narrative to stdout.
#[derive(Debug, Clone)]
pub struct CommandSummarizer {
    program: String,
    args: Vec<String>,
}

impl CommandSummarizer {
    /// Construct from program and arguments, `None` if `command` is empty.
    pub fn new(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    async fn run(&self, result: &PharmaGuardResult) -> Result<String, NarrativeError> {
        let unavailable = NarrativeError::TimeoutOrUnavailable;
        let input = serde_json::to_vec(result).map_err(|e| unavailable(e.to_string()))?;

        let mut child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| unavailable(format!("could not start {}: {}", &self.program, e)))?;
        // stdin is closed when the writer finishes, stdout is drained meanwhile
        let stdin = child.stdin.take();
        let write_input = async move {
            match stdin {
                Some(mut stdin) => match stdin.write_all(&input).await {
                    Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => Err(e),
                    _ => Ok(()),
                },
                None => Ok(()),
            }
        };
        let (written, output) = tokio::join!(write_input, child.wait_with_output());

        let output =
            output.map_err(|e| unavailable(format!("{} failed: {}", &self.program, e)))?;
        written.map_err(|e| unavailable(format!("could not write to {}: {}", &self.program, e)))?;
        if !output.status.success() {
            return Err(unavailable(format!(
                "{} exited with {}",
                &self.program, output.status
            )));
        }
        let text = String::from_utf8_lossy(&output.stdout).trim().to_owned();
        if text.is_empty() {
            Err(unavailable(format!("{} wrote no narrative", &self.program)))
        } else {
            Ok(text)
        }
    }
}

impl Summarizer for CommandSummarizer {
    fn summarize<'a>(
        &'a self,
        result: &'a PharmaGuardResult,
    ) -> BoxFuture<'a, Result<String, NarrativeError>> {
        self.run(result).boxed()
    }
}

/// Attach narratives to all results of `outcome`, each bounded by `timeout`.
pub async fn enrich(outcome: &mut AnalysisOutcome, summarizer: &dyn Summarizer, timeout: Duration) {
    let narratives = join_all(outcome.results.iter().map(|result| async move {
        match tokio::time::timeout(timeout, summarizer.summarize(result)).await {
            Ok(narrative) => narrative,
            Err(_) => Err(NarrativeError::TimeoutOrUnavailable(format!(
                "no narrative within {} ms",
                timeout.as_millis()
            ))),
        }
    }))
    .await;

    for (result, narrative) in outcome.results.iter_mut().zip(narratives) {
        match narrative {
            Ok(text) => result.narrative = Some(text),
            Err(e) => {
                tracing::warn!("no narrative for {}/{}: {}", &result.sample, &result.drug, &e);
                outcome.warnings.push(Warning::NarrativeUnavailable {
                    sample: result.sample.clone(),
                    drug: result.drug.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }
}
