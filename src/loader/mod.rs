//! Asset decoding and the slots that deliver assets to materials.
//!
//! Fetching bytes is the host's job. Once they arrive, the host decodes them
//! with [`hdr::decode`] or [`image::decode`] and completes an [`AssetSlot`];
//! materials holding the slot pick the result up on their next activation.

pub mod hdr;
pub mod image;

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::error::LoadError;

pub use hdr::{HdrError, HdrImage};

/// Progress of one asset
#[derive(Debug)]
pub enum AssetState<T> {
    Pending,
    Ready(T),
    Failed(LoadError),
}

/// Shared handle to an asset that may still be loading
pub struct AssetSlot<T> {
    name: Rc<str>,
    state: Rc<RefCell<AssetState<T>>>,
}

impl<T> Clone for AssetSlot<T> {
    fn clone(&self) -> Self {
        Self {
            name: Rc::clone(&self.name),
            state: Rc::clone(&self.state),
        }
    }
}

impl<T> fmt::Debug for AssetSlot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.state.borrow() {
            AssetState::Pending => "pending",
            AssetState::Ready(_) => "ready",
            AssetState::Failed(_) => "failed",
        };
        f.debug_struct("AssetSlot")
            .field("name", &self.name)
            .field("state", &state)
            .finish()
    }
}

impl<T> AssetSlot<T> {
    pub fn new(name: &str) -> Self {
        Self {
            name: Rc::from(name),
            state: Rc::new(RefCell::new(AssetState::Pending)),
        }
    }

    /// A slot that is already resolved.
    pub fn ready(name: &str, value: T) -> Self {
        let slot = Self::new(name);
        slot.resolve(value);
        slot
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn resolve(&self, value: T) {
        log::debug!("Asset '{}' ready", self.name);
        *self.state.borrow_mut() = AssetState::Ready(value);
    }

    pub fn fail(&self, error: LoadError) {
        log::warn!("Asset '{}' failed: {}", self.name, error);
        *self.state.borrow_mut() = AssetState::Failed(error);
    }

    /// Resolve or fail from a loader result.
    pub fn complete(&self, result: Result<T, LoadError>) {
        match result {
            Ok(value) => self.resolve(value),
            Err(error) => self.fail(error),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(*self.state.borrow(), AssetState::Pending)
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.state.borrow(), AssetState::Ready(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(*self.state.borrow(), AssetState::Failed(_))
    }

    /// Run `f` on the value if it has arrived.
    pub fn with_ready<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        match &*self.state.borrow() {
            AssetState::Ready(value) => Some(f(value)),
            _ => None,
        }
    }

    pub fn error_message(&self) -> Option<String> {
        match &*self.state.borrow() {
            AssetState::Failed(error) => Some(error.to_string()),
            _ => None,
        }
    }
}

/// Decode Radiance bytes into `slot`.
pub fn complete_hdr(slot: &AssetSlot<HdrImage>, bytes: &[u8]) {
    slot.complete(hdr::decode(bytes).map_err(LoadError::from));
}

/// Decode PNG or JPEG bytes into `slot`.
pub fn complete_image(slot: &AssetSlot<::image::RgbaImage>, bytes: &[u8]) {
    slot.complete(image::decode(bytes));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_transitions_are_shared() {
        let slot: AssetSlot<u32> = AssetSlot::new("answer");
        let observer = slot.clone();
        assert!(observer.is_pending());
        assert_eq!(observer.with_ready(|v| *v), None);

        slot.resolve(42);
        assert!(observer.is_ready());
        assert_eq!(observer.with_ready(|v| *v + 1), Some(43));
    }

    #[test]
    fn test_failed_decode_reaches_the_slot() {
        let slot = AssetSlot::new("sky.hdr");
        complete_hdr(&slot, b"not a radiance file");
        assert!(slot.is_failed());
        assert!(slot.error_message().unwrap().contains("magic"));
    }
}
