use std::collections::BTreeMap;

use futures::{StreamExt, stream};
use serde::Serialize;
use tracing::*;

use crate::{
    error::{FailureReport, Result},
    layout::result::AnalysisResult,
    parse::{config::ParseOptions, input::ImageInput, parser::ScreenParser},
};

/// Per-input outcome of a batch, keyed by input identifier.
pub type BatchResults = BTreeMap<String, Result<AnalysisResult>>;

/// Serializable form of one batch entry.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchOutcome {
    Done(AnalysisResult),
    Failed(FailureReport),
}

impl From<Result<AnalysisResult>> for BatchOutcome {
    fn from(result: Result<AnalysisResult>) -> Self {
        match result {
            Ok(result) => BatchOutcome::Done(result),
            Err(e) => BatchOutcome::Failed(e.report()),
        }
    }
}

pub fn into_outcomes(results: BatchResults) -> BTreeMap<String, BatchOutcome> {
    results
        .into_iter()
        .map(|(key, result)| (key, result.into()))
        .collect()
}

/// Key of the `index`-th input: its path, or its position for in-memory
/// inputs. A key already taken gets the position appended until unique.
fn batch_key(input: &ImageInput, index: usize, taken: &BTreeMap<String, usize>) -> String {
    let suffix = format!("#{index}");
    let mut key = input.identifier().unwrap_or_else(|| suffix.clone());
    while taken.contains_key(&key) {
        key.push_str(&suffix);
    }
    key
}

impl ScreenParser {
    /// Analyses every input independently, at most
    /// `max_concurrent_images` at a time. One failing input never affects
    /// the others.
    #[tracing::instrument(skip_all, fields(inputs = inputs.len()))]
    pub async fn analyze_batch(&self, inputs: &[ImageInput], options: &ParseOptions) -> BatchResults {
        let mut keys = BTreeMap::new();
        for (index, input) in inputs.iter().enumerate() {
            let key = batch_key(input, index, &keys);
            keys.insert(key, index);
        }
        let mut by_index: Vec<String> = vec![String::new(); inputs.len()];
        for (key, index) in &keys {
            by_index[*index] = key.clone();
        }

        let limit = self.config().max_concurrent_images.max(1);
        info!("Analysing {} images, {} at a time", inputs.len(), limit);

        let results: BatchResults = stream::iter(inputs.iter().enumerate())
            .map(|(index, input)| async move { (index, self.parse(input, options).await) })
            .buffer_unordered(limit)
            .map(|(index, result)| {
                if let Err(e) = &result {
                    warn!("input {} failed: {}", by_index[index], e);
                }
                (by_index[index].clone(), result)
            })
            .collect()
            .await;

        let failed = results.values().filter(|result| result.is_err()).count();
        info!(
            "Batch finished: {} done, {} failed",
            results.len() - failed,
            failed
        );

        results
    }
}
