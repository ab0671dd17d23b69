//! Lazily initialized, shareable model handles.

use std::{fmt, sync::Arc};

use snafu::ResultExt;
use tokio::sync::OnceCell;
use tracing::*;

use crate::error::{JoinSnafu, Result, ScreenParseError};

type Loader<T> = Arc<dyn Fn() -> Result<Arc<T>> + Send + Sync>;

/// A model handle that is built at most once, on first use or on an explicit
/// warm-up. Concurrent first callers wait on the same initialization.
///
/// A failed load leaves the slot empty, every caller gets
/// `DetectorUnavailable`, and the next call tries again.
pub struct ModelSlot<T: ?Sized> {
    name: String,
    cell: OnceCell<Arc<T>>,
    loader: Option<Loader<T>>,
}

impl<T: ?Sized + Send + Sync + 'static> ModelSlot<T> {
    /// Slot whose handle is produced by a blocking `loader`, run on the
    /// blocking thread pool.
    pub fn lazy<F>(name: impl Into<String>, loader: F) -> Self
    where
        F: Fn() -> Result<Arc<T>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            cell: OnceCell::new(),
            loader: Some(Arc::new(loader)),
        }
    }

    /// Slot holding an already constructed handle.
    pub fn ready(name: impl Into<String>, handle: Arc<T>) -> Self {
        Self {
            name: name.into(),
            cell: OnceCell::new_with(Some(handle)),
            loader: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.initialized()
    }

    pub async fn get(&self) -> Result<Arc<T>> {
        let handle = self
            .cell
            .get_or_try_init(|| async {
                let loader = match &self.loader {
                    Some(loader) => Arc::clone(loader),
                    None => {
                        return Err(ScreenParseError::unavailable(
                            &self.name,
                            "no loader configured",
                        ));
                    }
                };

                let start = std::time::Instant::now();
                info!("Loading model `{}`", self.name);

                let handle = tokio::task::spawn_blocking(move || loader())
                    .await
                    .context(JoinSnafu {
                        stage: format!("load-{}", self.name),
                    })?
                    .map_err(|err| match err {
                        err @ ScreenParseError::DetectorUnavailable { .. } => err,
                        err => ScreenParseError::unavailable(&self.name, err),
                    });

                match &handle {
                    Ok(_) => info!("Model `{}` ready in {:?}", self.name, start.elapsed()),
                    Err(e) => error!("Model `{}` failed to load: {}", self.name, e),
                }

                handle
            })
            .await?;

        Ok(Arc::clone(handle))
    }
}

impl<T: ?Sized> fmt::Debug for ModelSlot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelSlot")
            .field("name", &self.name)
            .field("initialized", &self.cell.initialized())
            .finish()
    }
}
