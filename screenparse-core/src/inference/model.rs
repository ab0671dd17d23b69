use std::path::Path;

use image::DynamicImage;
use ort::{
    execution_providers::CPUExecutionProvider,
    session::{
        Session,
        builder::{GraphOptimizationLevel, SessionBuilder},
    },
};
use snafu::ResultExt;

use crate::error::{IoReadSnafu, OrtInitSnafu, Result};

pub trait Model {
    type Input;
    type Output;
    type Config;

    const INPUT_NAME: &'static str;
    const OUTPUT_NAME: &'static str;
    const MODEL_NAME: &'static str;

    /// Raw ONNX bytes of the model.
    fn load(&self) -> Result<Vec<u8>>;
    fn config(&self) -> &Self::Config;
}

pub trait OnnxSession<M: Model> {
    type Output;
    type Extra;

    fn preprocess(&self, image: &DynamicImage) -> Result<M::Input>;

    fn postprocess(&self, output: M::Output, extra: Self::Extra) -> Result<Self::Output>;

    fn infer(&mut self, input: M::Input, input_name: &str, output_name: &str)
    -> Result<M::Output>;

    fn run(&mut self, image: &DynamicImage, extra: Self::Extra) -> Result<Self::Output> {
        let input = self.preprocess(image)?;

        let output = self.infer(input, M::INPUT_NAME, M::OUTPUT_NAME)?;

        self.postprocess(output, extra)
    }
}

/// Reads an ONNX file from disk.
pub fn read_model<P: AsRef<Path>>(path: P) -> Result<Vec<u8>> {
    let path = path.as_ref();
    std::fs::read(path).context(IoReadSnafu {
        path: path.to_string_lossy(),
    })
}

/// common session builder
pub fn session_builder(intra_threads: usize) -> Result<SessionBuilder> {
    let session_builder = Session::builder()
        .context(OrtInitSnafu { stage: "builder" })?
        .with_execution_providers(vec![
            #[cfg(all(feature = "coreml", target_os = "macos"))]
            {
                use ort::execution_providers::CoreMLExecutionProvider;
                use ort::execution_providers::coreml::*;
                CoreMLExecutionProvider::default()
                    .with_model_format(CoreMLModelFormat::MLProgram)
                    .build()
            },
            #[cfg(feature = "tensorrt")]
            {
                use ort::execution_providers::TensorRTExecutionProvider;
                TensorRTExecutionProvider::default().build()
            },
            #[cfg(feature = "cuda")]
            {
                use ort::execution_providers::CUDAExecutionProvider;
                CUDAExecutionProvider::default().build()
            },
            CPUExecutionProvider::default().build(),
        ])
        .context(OrtInitSnafu { stage: "provider" })?
        .with_optimization_level(GraphOptimizationLevel::Level1)
        .context(OrtInitSnafu {
            stage: "optimization",
        })?
        .with_intra_threads(intra_threads)
        .context(OrtInitSnafu {
            stage: "intra-threads",
        })?;

    Ok(session_builder)
}

/// Name of the first model input, `fallback` when the graph declares none.
pub fn first_input_name(session: &Session, fallback: &str) -> String {
    session
        .inputs
        .first()
        .map(|input| input.name.clone())
        .unwrap_or_else(|| fallback.to_string())
}

/// Name of the first model output, `fallback` when the graph declares none.
pub fn first_output_name(session: &Session, fallback: &str) -> String {
    session
        .outputs
        .first()
        .map(|output| output.name.clone())
        .unwrap_or_else(|| fallback.to_string())
}
