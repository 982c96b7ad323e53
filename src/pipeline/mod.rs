//! Frame orchestration
//!
//! A [`RenderQueue`] runs its [`RenderPass`]es in order into a multisampled
//! offscreen target, resolves it, and feeds the result through a chain of
//! [`PostProcessPass`]es that ends on the screen.

pub mod pass;
pub mod post;
pub mod queue;

pub use pass::{Drawable, Hook, RenderCommand, RenderPass, SetupHook};
pub use post::{PostEffect, PostProcessPass, TonemapOperator};
pub use queue::{PassId, PingPong, RenderQueue};
