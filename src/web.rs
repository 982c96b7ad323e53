//! Web-specific functionality for running the renderer in a browser.
//!
//! The host owns the canvas and the animation loop; this module only turns a
//! canvas into a WebGL2-backed [`GlowBackend`] and keeps its size in sync.

use wasm_bindgen::JsCast;
use web_sys::{HtmlCanvasElement, WebGl2RenderingContext};

use crate::backend::{BackendError, GlowBackend};
use crate::error::RenderResult;

/// Look up a canvas element by id.
pub fn find_canvas(canvas_id: &str) -> RenderResult<HtmlCanvasElement> {
    let document = web_sys::window()
        .and_then(|window| window.document())
        .ok_or_else(|| BackendError::InitializationFailed("no document".to_string()))?;
    let element = document.get_element_by_id(canvas_id).ok_or_else(|| {
        BackendError::InitializationFailed(format!("no element with id '{canvas_id}'"))
    })?;
    Ok(element.dyn_into::<HtmlCanvasElement>().map_err(|_| {
        BackendError::InitializationFailed(format!("'{canvas_id}' is not a canvas"))
    })?)
}

/// Resize the canvas backing store to its CSS size times the device pixel
/// ratio. Returns the new drawable size.
pub fn fit_canvas(canvas: &HtmlCanvasElement) -> (u32, u32) {
    let dpr = web_sys::window()
        .map(|window| window.device_pixel_ratio())
        .unwrap_or(1.0);
    let width = ((canvas.client_width().max(1) as f64) * dpr) as u32;
    let height = ((canvas.client_height().max(1) as f64) * dpr) as u32;
    if canvas.width() != width || canvas.height() != height {
        canvas.set_width(width);
        canvas.set_height(height);
        log::debug!("Canvas resized to {}x{} (DPR: {})", width, height, dpr);
    }
    (width, height)
}

/// Create a WebGL2 backend drawing into `canvas`.
pub fn create_backend(canvas: &HtmlCanvasElement) -> RenderResult<GlowBackend> {
    let context = canvas
        .get_context("webgl2")
        .map_err(|_| BackendError::InitializationFailed("getContext('webgl2') threw".to_string()))?
        .ok_or_else(|| BackendError::FeatureNotSupported("WebGL2".to_string()))?
        .dyn_into::<WebGl2RenderingContext>()
        .map_err(|_| BackendError::InitializationFailed("not a WebGL2 context".to_string()))?;

    let size = fit_canvas(canvas);
    let gl = glow::Context::from_webgl2_context(context);
    log::info!("WebGL2 context created, drawable {}x{}", size.0, size.1);
    Ok(GlowBackend::new(gl, size)?)
}
