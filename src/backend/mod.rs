//! Backend abstraction layer
//!
//! Provides the GL-style trait the renderer drives, plus the glow (WebGL2 /
//! OpenGL ES 3.0) backend and a CPU-only headless backend.

pub mod headless;
pub mod traits;
pub mod types;

#[cfg(feature = "glow-backend")]
pub mod glow_backend;

pub use headless::HeadlessBackend;
pub use traits::*;
pub use types::*;

#[cfg(feature = "glow-backend")]
pub use glow_backend::GlowBackend;
