use std::path::{Path, PathBuf};

use snafu::ResultExt;
use tracing::*;

use crate::{error::*, layout::result::AnalysisResult};

/// Files written for one persisted run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedOutputs {
    pub annotated: Option<PathBuf>,
    pub report: PathBuf,
}

/// Writes `annotated_<stem>.png` (when the result carries one) and
/// `<stem>.json` into `directory`, creating it if needed. The JSON report
/// leaves the image out.
pub fn save_outputs(result: &AnalysisResult, stem: &str, directory: &Path) -> Result<SavedOutputs> {
    std::fs::create_dir_all(directory).context(IoWriteSnafu {
        path: directory.to_string_lossy(),
    })?;

    let annotated = match &result.annotated_image {
        Some(image) => {
            let path = directory.join(format!("annotated_{stem}.png"));
            std::fs::write(&path, &image.png).context(IoWriteSnafu {
                path: path.to_string_lossy(),
            })?;
            Some(path)
        }
        None => None,
    };

    let report = directory.join(format!("{stem}.json"));
    let summary = AnalysisResult {
        annotated_image: None,
        ..result.clone()
    };
    let json = serde_json::to_vec_pretty(&summary).context(JsonSnafu { stage: "report" })?;
    std::fs::write(&report, json).context(IoWriteSnafu {
        path: report.to_string_lossy(),
    })?;

    info!("Saved analysis of `{}` to {}", stem, directory.display());

    Ok(SavedOutputs { annotated, report })
}
