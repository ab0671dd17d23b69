use std::{
    fmt,
    path::{Path, PathBuf},
};

use base64::{Engine, engine::general_purpose::STANDARD};
use image::DynamicImage;
use snafu::ResultExt;

use crate::error::*;

/// A screenshot handed to the parser.
#[derive(Clone)]
pub enum ImageInput {
    Path(PathBuf),
    /// Base64 image bytes, optionally prefixed with a `data:` URL header.
    Base64(String),
    Image(DynamicImage),
}

impl ImageInput {
    pub fn path<P: AsRef<Path>>(path: P) -> Self {
        ImageInput::Path(path.as_ref().to_path_buf())
    }

    pub fn base64(data: impl Into<String>) -> Self {
        ImageInput::Base64(data.into())
    }

    /// Identifier used as the batch-result key and the output file stem.
    pub fn identifier(&self) -> Option<String> {
        match self {
            ImageInput::Path(path) => Some(path.to_string_lossy().into_owned()),
            _ => None,
        }
    }

    /// Decodes the input into pixels. Every failure is `InvalidInput`.
    pub fn decode(&self) -> Result<DynamicImage> {
        let image = match self {
            ImageInput::Path(path) => {
                let bytes = std::fs::read(path).map_err(|e| ScreenParseError::InvalidInput {
                    message: format!("read `{}`: {}", path.display(), e),
                })?;
                image::load_from_memory(&bytes).context(ImageDecodeSnafu {})?
            }
            ImageInput::Base64(data) => {
                let payload = strip_data_url(data);
                let bytes = STANDARD
                    .decode(payload.trim())
                    .map_err(|e| ScreenParseError::InvalidInput {
                        message: format!("base64: {e}"),
                    })?;
                image::load_from_memory(&bytes).context(ImageDecodeSnafu {})?
            }
            ImageInput::Image(image) => image.clone(),
        };

        if image.width() == 0 || image.height() == 0 {
            return Err(ScreenParseError::InvalidInput {
                message: format!("image has no pixels ({}x{})", image.width(), image.height()),
            });
        }

        Ok(image)
    }
}

fn strip_data_url(data: &str) -> &str {
    match data.split_once(";base64,") {
        Some((header, payload)) if header.starts_with("data:") => payload,
        _ => data,
    }
}

impl fmt::Debug for ImageInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageInput::Path(path) => f.debug_tuple("Path").field(path).finish(),
            ImageInput::Base64(data) => write!(f, "Base64({} bytes)", data.len()),
            ImageInput::Image(image) => write!(f, "Image({}x{})", image.width(), image.height()),
        }
    }
}

impl From<PathBuf> for ImageInput {
    fn from(path: PathBuf) -> Self {
        ImageInput::Path(path)
    }
}

impl From<&Path> for ImageInput {
    fn from(path: &Path) -> Self {
        ImageInput::Path(path.to_path_buf())
    }
}

impl From<DynamicImage> for ImageInput {
    fn from(image: DynamicImage) -> Self {
        ImageInput::Image(image)
    }
}
