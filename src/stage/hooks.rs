//! What a stage implements, and what it is handed while it runs.

use glam::UVec2;

use crate::camera::Camera;
use crate::context::GraphicsContext;
use crate::error::StageError;
use crate::options::EngineOptions;
use crate::scene::SceneQuery;
use crate::stage::deferred::DeferredShared;
use crate::stage::post_process::PingPong;
use crate::stage::RenderStage;

/// The kind of a stage, as seen by its children.
///
/// Stages that depend on an enclosing stage check this (or the matching field
/// of their context) instead of the concrete type of their parent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StageKind {
    /// Plain grouping or user stage.
    Generic,
    /// Renders a generator offscreen and composites it; owns a [`PingPong`].
    PostProcess,
    /// The main deferred stage; owns the [`DeferredShared`] resources.
    Deferred,
    /// Binds or unbinds the enclosing ping-pong destination.
    Bracket,
    /// A single draw pass.
    Pass,
}

/// Something that happened to a camera since its last frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameEvent {
    /// The camera's target changed size.
    Resized(UVec2),
    /// The camera entered or left XR immersive presentation.
    Immersive(bool),
}

/// Services available while a stage starts.
///
/// `ping_pong` and `deferred` are the resources of the nearest enclosing
/// post-process and deferred stage, if any. `parent` is the kind of the direct
/// parent, `None` for a root.
pub struct StartContext<'a> {
    pub gfx: &'a mut dyn GraphicsContext,
    pub options: &'a EngineOptions,
    pub camera: &'a Camera,
    pub ping_pong: Option<&'a PingPong>,
    pub deferred: Option<&'a DeferredShared>,
    pub parent: Option<StageKind>,
}

impl<'a> StartContext<'a> {
    /// A root context.
    pub fn new(
        gfx: &'a mut dyn GraphicsContext,
        options: &'a EngineOptions,
        camera: &'a Camera,
    ) -> Self {
        Self {
            gfx,
            options,
            camera,
            ping_pong: None,
            deferred: None,
            parent: None,
        }
    }

    /// Context for the children of a stage of kind `parent`.
    pub fn nested<'b>(
        &'b mut self,
        parent: StageKind,
        deferred: Option<&'b DeferredShared>,
    ) -> StartContext<'b> {
        StartContext {
            gfx: &mut *self.gfx,
            options: self.options,
            camera: self.camera,
            ping_pong: self.ping_pong,
            deferred: deferred.or(self.deferred),
            parent: Some(parent),
        }
    }

    /// Context for a post-process generator.
    pub fn with_ping_pong<'b>(&'b mut self, ping_pong: &'b PingPong) -> StartContext<'b> {
        StartContext {
            gfx: &mut *self.gfx,
            options: self.options,
            camera: self.camera,
            ping_pong: Some(ping_pong),
            deferred: self.deferred,
            parent: Some(StageKind::PostProcess),
        }
    }
}

/// Services available during the frame phases.
pub struct FrameContext<'a> {
    pub gfx: &'a mut dyn GraphicsContext,
    pub scene: &'a dyn SceneQuery,
    /// Post-process stages repoint `camera.target` while their generator runs.
    pub camera: &'a mut Camera,
    pub options: &'a EngineOptions,
    /// Events queued for this camera since its previous frame.
    pub events: &'a [FrameEvent],
    pub ping_pong: Option<&'a mut PingPong>,
    pub deferred: Option<&'a DeferredShared>,
    pub parent: Option<StageKind>,
}

impl<'a> FrameContext<'a> {
    /// A root context.
    pub fn new(
        gfx: &'a mut dyn GraphicsContext,
        scene: &'a dyn SceneQuery,
        camera: &'a mut Camera,
        options: &'a EngineOptions,
        events: &'a [FrameEvent],
    ) -> Self {
        Self {
            gfx,
            scene,
            camera,
            options,
            events,
            ping_pong: None,
            deferred: None,
            parent: None,
        }
    }

    /// Context for the children of a stage of kind `parent`.
    pub fn nested<'b>(
        &'b mut self,
        parent: StageKind,
        deferred: Option<&'b DeferredShared>,
    ) -> FrameContext<'b> {
        FrameContext {
            gfx: &mut *self.gfx,
            scene: self.scene,
            camera: &mut *self.camera,
            options: self.options,
            events: self.events,
            ping_pong: self.ping_pong.as_deref_mut(),
            deferred: deferred.or(self.deferred),
            parent: Some(parent),
        }
    }

    /// Context for a post-process generator.
    pub fn with_ping_pong<'b>(&'b mut self, ping_pong: &'b mut PingPong) -> FrameContext<'b> {
        FrameContext {
            gfx: &mut *self.gfx,
            scene: self.scene,
            camera: &mut *self.camera,
            options: self.options,
            events: self.events,
            ping_pong: Some(ping_pong),
            deferred: self.deferred,
            parent: Some(StageKind::PostProcess),
        }
    }

    /// A start context over the same services, for stages started lazily
    /// mid-frame.
    pub fn as_start(&mut self) -> StartContext<'_> {
        StartContext {
            gfx: &mut *self.gfx,
            options: self.options,
            camera: &*self.camera,
            ping_pong: self.ping_pong.as_deref(),
            deferred: self.deferred,
            parent: self.parent,
        }
    }

    /// The last immersive state reported this frame, if any.
    pub fn immersive_event(&self) -> Option<bool> {
        self.events.iter().rev().find_map(|event| match event {
            FrameEvent::Immersive(immersive) => Some(*immersive),
            FrameEvent::Resized(_) => None,
        })
    }
}

/// The behavior of one stage.
///
/// Every method has a no-op default, so a stage only overrides the phases it
/// uses. Children are driven by the [`RenderStage`] holding the hooks; a hook
/// never runs them itself, except a post-process stage running its generator.
///
/// # Example
///
/// ```ignore
/// struct ClearStage(Vec4);
///
/// impl StageHooks for ClearStage {
///     fn name(&self) -> &str {
///         "clear"
///     }
///
///     fn on_render(&mut self, cx: &mut FrameContext<'_>) {
///         cx.gfx.bind_target(cx.camera.target.id);
///         cx.gfx.clear(self.0);
///         cx.gfx.unbind_target(cx.camera.target.id);
///     }
/// }
///
/// let root = RenderStage::group("root").with_child(RenderStage::new(ClearStage(Vec4::ZERO)));
/// ```
pub trait StageHooks {
    fn name(&self) -> &str;

    fn kind(&self) -> StageKind {
        StageKind::Generic
    }

    /// Allocates resources. Called once, before the stage's children start.
    ///
    /// `children` may be enabled or disabled here; children disabled when this
    /// returns are started the first frame they are enabled.
    fn on_start(
        &mut self,
        _cx: &mut StartContext<'_>,
        _children: &mut [RenderStage],
    ) -> Result<(), StageError> {
        Ok(())
    }

    fn on_pre_render(&mut self, _cx: &mut FrameContext<'_>) {}

    /// Runs before the stage's children render.
    fn on_render(&mut self, _cx: &mut FrameContext<'_>) {}

    fn on_post_render(&mut self, _cx: &mut FrameContext<'_>) {}

    /// Resources this stage shares with its descendants.
    fn deferred(&self) -> Option<&DeferredShared> {
        None
    }

    /// The ping-pong pair this stage owns.
    fn ping_pong(&self) -> Option<&PingPong> {
        None
    }

    /// A sub-stage driven by this stage's hooks rather than the tree.
    fn generator(&self) -> Option<&RenderStage> {
        None
    }

    fn generator_mut(&mut self) -> Option<&mut RenderStage> {
        None
    }
}

/// Hooks that do nothing themselves; a named container for children.
#[derive(Debug, Clone)]
pub struct Group {
    name: String,
}

impl Group {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl StageHooks for Group {
    fn name(&self) -> &str {
        &self.name
    }
}
