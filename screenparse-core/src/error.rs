use std::time::Duration;

use serde::Serialize;
use snafu::prelude::*;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ScreenParseError {
    #[snafu(display("Detector `{}` unavailable: {}", detector, message))]
    DetectorUnavailable { detector: String, message: String },
    #[snafu(display("Detector `{}` failed: {}", detector, message))]
    Detection { detector: String, message: String },
    #[snafu(display("Caption generation failed: {}", message))]
    Caption { message: String },
    #[snafu(display("Invalid input image: {}", message))]
    InvalidInput { message: String },
    #[snafu(display("Analysis exceeded its budget of {:?}", budget))]
    Timeout { budget: Duration },
    #[snafu(display("Ort Session init stage `{}` error: {}", stage, source))]
    OrtInit {
        source: ort::error::Error,
        stage: String,
    },
    #[snafu(display("Build Tensor for `{}` error: {}", stage, source))]
    Tensor {
        source: ort::error::Error,
        stage: String,
    },
    #[snafu(display("Onnx Inference error: {}", source))]
    Inference { source: ort::error::Error },
    #[snafu(display("Onnx Output can not found {}", output_name))]
    NotFoundOutput { output_name: String },
    #[snafu(display("Ndarray Shape error at stage `{}`: {}", stage, source))]
    Shape {
        source: ndarray::ShapeError,
        stage: String,
    },
    #[snafu(display("Load Font error: {}", source))]
    Font { source: ab_glyph::InvalidFont },
    #[snafu(display("Image Encode error: {}", source))]
    ImageEncode { source: image::ImageError },
    #[snafu(display("Image Decode error: {}", source))]
    ImageDecode { source: image::ImageError },
    #[snafu(display("Read `{}` error: {}", path, source))]
    IoRead {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Write `{}` error: {}", path, source))]
    IoWrite {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Environment `{}` Not Found, error {}", name, source))]
    EnvNotFound {
        source: std::env::VarError,
        name: String,
    },
    #[snafu(display("Http `{}` error: {}", stage, source))]
    Http {
        source: reqwest::Error,
        stage: String,
    },
    #[snafu(display("Json `{}` error: {}", stage, source))]
    Json {
        source: serde_json::Error,
        stage: String,
    },
    #[snafu(display("Worker for `{}` did not finish: {}", stage, source))]
    Join {
        source: tokio::task::JoinError,
        stage: String,
    },
    #[snafu(display("Lock for `{}` poisoned", stage))]
    Poisoned { stage: String },
}

/// Coarse classification callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    DetectorUnavailable,
    DetectionError,
    CaptionError,
    InvalidInput,
    Timeout,
    Internal,
}

impl ScreenParseError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ScreenParseError::DetectorUnavailable { .. } | ScreenParseError::OrtInit { .. } => {
                ErrorKind::DetectorUnavailable
            }
            ScreenParseError::Detection { .. }
            | ScreenParseError::Tensor { .. }
            | ScreenParseError::Inference { .. }
            | ScreenParseError::NotFoundOutput { .. }
            | ScreenParseError::Shape { .. } => ErrorKind::DetectionError,
            ScreenParseError::Caption { .. } => ErrorKind::CaptionError,
            ScreenParseError::InvalidInput { .. } | ScreenParseError::ImageDecode { .. } => {
                ErrorKind::InvalidInput
            }
            ScreenParseError::Timeout { .. } => ErrorKind::Timeout,
            ScreenParseError::Font { .. }
            | ScreenParseError::ImageEncode { .. }
            | ScreenParseError::IoRead { .. }
            | ScreenParseError::IoWrite { .. }
            | ScreenParseError::EnvNotFound { .. }
            | ScreenParseError::Http { .. }
            | ScreenParseError::Json { .. }
            | ScreenParseError::Join { .. }
            | ScreenParseError::Poisoned { .. } => ErrorKind::Internal,
        }
    }

    /// Wraps any error raised while a model handle was being built.
    pub fn unavailable(detector: &str, err: impl std::fmt::Display) -> Self {
        ScreenParseError::DetectorUnavailable {
            detector: detector.to_string(),
            message: err.to_string(),
        }
    }

    /// Wraps any error raised by a single detector call. Errors that already
    /// say the detector is unavailable keep that kind.
    pub fn detection(detector: &str, err: ScreenParseError) -> Self {
        match err {
            err @ ScreenParseError::DetectorUnavailable { .. } => err,
            err @ ScreenParseError::Detection { .. } => err,
            err => ScreenParseError::Detection {
                detector: detector.to_string(),
                message: err.to_string(),
            },
        }
    }

    pub fn report(&self) -> FailureReport {
        FailureReport {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

/// Serializable form of a failed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureReport {
    pub kind: ErrorKind,
    pub message: String,
}

pub type Result<T, E = ScreenParseError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        let err = ScreenParseError::unavailable("icon", "missing weights");
        assert_eq!(err.kind(), ErrorKind::DetectorUnavailable);

        let err = ScreenParseError::Timeout {
            budget: Duration::from_millis(10),
        };
        assert_eq!(err.kind(), ErrorKind::Timeout);

        let err = ScreenParseError::NotFoundOutput {
            output_name: "output0".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::DetectionError);
    }

    #[test]
    fn test_detection_wrapping_keeps_unavailable() {
        let err = ScreenParseError::detection(
            "icon",
            ScreenParseError::unavailable("icon", "no model"),
        );
        assert_eq!(err.kind(), ErrorKind::DetectorUnavailable);

        let err = ScreenParseError::detection(
            "ocr",
            ScreenParseError::Poisoned {
                stage: "det".to_string(),
            },
        );
        assert_eq!(err.kind(), ErrorKind::DetectionError);
        assert!(err.to_string().contains("ocr"));
    }

    #[test]
    fn test_report_serializes_kind() {
        let report = ScreenParseError::InvalidInput {
            message: "empty".to_string(),
        }
        .report();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["kind"], "invalid_input");
    }
}
