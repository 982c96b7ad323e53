//! Render passes and the commands queued into them.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use glam::Mat4;

use crate::error::RenderResult;
use crate::renderer::Renderer;
use crate::resources::mesh::{InstancedMesh, MeshInstance};

/// Callback run around a pass or a command
pub type Hook = Box<dyn FnMut(&mut Renderer) -> RenderResult<()>>;

/// Replaces the default per-frame upload; receives the pass view and projection
pub type SetupHook = Box<dyn FnMut(&mut Renderer, Mat4, Mat4) -> RenderResult<()>>;

/// Something a command draws
#[derive(Debug, Clone)]
pub enum Drawable {
    Instance(MeshInstance),
    Instanced(Rc<RefCell<InstancedMesh>>),
}

impl From<MeshInstance> for Drawable {
    fn from(instance: MeshInstance) -> Self {
        Drawable::Instance(instance)
    }
}

impl From<Rc<RefCell<InstancedMesh>>> for Drawable {
    fn from(instanced: Rc<RefCell<InstancedMesh>>) -> Self {
        Drawable::Instanced(instanced)
    }
}

/// One queued draw with optional hooks
pub struct RenderCommand {
    drawable: Drawable,
    before: Option<Hook>,
    after: Option<Hook>,
}

impl RenderCommand {
    pub fn new(drawable: impl Into<Drawable>) -> Self {
        Self {
            drawable: drawable.into(),
            before: None,
            after: None,
        }
    }

    pub fn with_before(mut self, hook: impl FnMut(&mut Renderer) -> RenderResult<()> + 'static) -> Self {
        self.before = Some(Box::new(hook));
        self
    }

    pub fn with_after(mut self, hook: impl FnMut(&mut Renderer) -> RenderResult<()> + 'static) -> Self {
        self.after = Some(Box::new(hook));
        self
    }

    pub fn drawable(&self) -> &Drawable {
        &self.drawable
    }

    fn execute(&mut self, renderer: &mut Renderer) -> RenderResult<()> {
        if let Some(before) = &mut self.before {
            before(renderer)?;
        }
        match &self.drawable {
            Drawable::Instance(instance) => renderer.render_mesh_instance(instance)?,
            Drawable::Instanced(instanced) => {
                renderer.render_instanced_mesh(&mut instanced.borrow_mut())?
            }
        }
        if let Some(after) = &mut self.after {
            after(renderer)?;
        }
        Ok(())
    }
}

impl fmt::Debug for RenderCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderCommand")
            .field("drawable", &self.drawable)
            .field("before", &self.before.is_some())
            .field("after", &self.after.is_some())
            .finish()
    }
}

/// An ordered list of commands drawn with one camera
///
/// The view and projection are shared cells: a camera holding the same
/// `Rc` updates the pass without re-registering it.
pub struct RenderPass {
    label: String,
    view: Rc<Cell<Mat4>>,
    projection: Rc<Cell<Mat4>>,
    shadow: Option<Mat4>,
    commands: Vec<RenderCommand>,
    setup: Option<SetupHook>,
    teardown: Option<Hook>,
    before: Option<Hook>,
    after: Option<Hook>,
}

impl RenderPass {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            view: Rc::new(Cell::new(Mat4::IDENTITY)),
            projection: Rc::new(Cell::new(Mat4::IDENTITY)),
            shadow: None,
            commands: Vec::new(),
            setup: None,
            teardown: None,
            before: None,
            after: None,
        }
    }

    /// Share camera matrices with the caller.
    pub fn with_camera(mut self, view: Rc<Cell<Mat4>>, projection: Rc<Cell<Mat4>>) -> Self {
        self.view = view;
        self.projection = projection;
        self
    }

    /// Light-space view-projection sampled by shadowed materials.
    pub fn with_shadow_matrix(mut self, shadow: Mat4) -> Self {
        self.shadow = Some(shadow);
        self
    }

    pub fn with_setup(
        mut self,
        hook: impl FnMut(&mut Renderer, Mat4, Mat4) -> RenderResult<()> + 'static,
    ) -> Self {
        self.setup = Some(Box::new(hook));
        self
    }

    pub fn with_teardown(mut self, hook: impl FnMut(&mut Renderer) -> RenderResult<()> + 'static) -> Self {
        self.teardown = Some(Box::new(hook));
        self
    }

    pub fn with_before(mut self, hook: impl FnMut(&mut Renderer) -> RenderResult<()> + 'static) -> Self {
        self.before = Some(Box::new(hook));
        self
    }

    pub fn with_after(mut self, hook: impl FnMut(&mut Renderer) -> RenderResult<()> + 'static) -> Self {
        self.after = Some(Box::new(hook));
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn view(&self) -> &Rc<Cell<Mat4>> {
        &self.view
    }

    pub fn projection(&self) -> &Rc<Cell<Mat4>> {
        &self.projection
    }

    pub fn set_shadow_matrix(&mut self, shadow: Option<Mat4>) {
        self.shadow = shadow;
    }

    pub fn enqueue(&mut self, command: RenderCommand) {
        self.commands.push(command);
    }

    pub fn commands(&self) -> &[RenderCommand] {
        &self.commands
    }

    /// Draw every queued command and empty the queue.
    pub(crate) fn execute(&mut self, renderer: &mut Renderer) -> RenderResult<()> {
        log::trace!("RenderPass '{}': {} command(s)", self.label, self.commands.len());
        let (view, projection) = (self.view.get(), self.projection.get());
        match &mut self.setup {
            Some(setup) => setup(renderer, view, projection)?,
            None => renderer.set_per_frame_uniforms(view, projection, self.shadow),
        }
        if let Some(before) = &mut self.before {
            before(renderer)?;
        }

        for mut command in self.commands.drain(..) {
            command.execute(renderer)?;
        }

        if let Some(teardown) = &mut self.teardown {
            teardown(renderer)?;
        }
        if let Some(after) = &mut self.after {
            after(renderer)?;
        }
        Ok(())
    }
}

impl fmt::Debug for RenderPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderPass")
            .field("label", &self.label)
            .field("commands", &self.commands.len())
            .finish()
    }
}
