//! Error types for the rendering core.

use thiserror::Error;

use crate::backend::BackendError;
use crate::loader::hdr::HdrError;

/// Resource lifetime and usage errors.
///
/// These signal a bug in the caller rather than a device problem.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    #[error("buffer '{label}' is still referenced by {count} sub-mesh(es)")]
    BufferInUse { label: String, count: u32 },
    #[error("mesh '{0}' is still shared by other owners")]
    MeshInUse(String),
    #[error("model-view matrix is singular, no normal matrix exists")]
    SingularMatrix,
    #[error("draw without a material requires a bound program")]
    NoProgramBound,
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),
    #[error("unknown render pass id {0}")]
    UnknownPass(usize),
}

/// Errors from decoding external assets.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error(transparent)]
    Hdr(#[from] HdrError),
    #[error("image decode failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("asset '{name}' failed to load: {reason}")]
    Failed { name: String, reason: String },
}

/// Top-level error of the rendering core.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error(transparent)]
    Load(#[from] LoadError),
}

pub type RenderResult<T> = Result<T, RenderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RenderError::from(ResourceError::BufferInUse {
            label: "cube.vertices".to_string(),
            count: 2,
        });
        assert_eq!(
            err.to_string(),
            "buffer 'cube.vertices' is still referenced by 2 sub-mesh(es)"
        );

        let err = RenderError::from(BackendError::FeatureNotSupported("float linear".into()));
        assert_eq!(err.to_string(), "Feature not supported: float linear");
    }
}
