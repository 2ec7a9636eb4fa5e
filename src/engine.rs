//! The per-frame driver.
//!
//! An [`Engine`] owns the [`EngineOptions`] and one root stage per camera. Each
//! frame it walks the active cameras in insertion order, starting a root the
//! first time it renders and handing it the events queued since its last frame.
//!
//! # Example
//!
//! ```ignore
//! let mut engine = Engine::new(EngineOptions::load_from_path("strata.json"));
//! let main = engine.add_deferred_camera(Camera::new().at(0.0, 1.0, 5.0));
//!
//! loop {
//!     // window resized?
//!     engine.resize(main, UVec2::new(1280, 720));
//!     engine.render_frame(&mut gfx, &scene)?;
//! }
//! ```

use glam::UVec2;
use log::{debug, info};

use crate::camera::Camera;
use crate::context::GraphicsContext;
use crate::error::StageError;
use crate::options::EngineOptions;
use crate::scene::SceneQuery;
use crate::stage::{FrameContext, FrameEvent, RenderStage, StartContext, deferred_pipeline};

/// Identifies a camera registered with an [`Engine`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CameraHandle(usize);

struct CameraSlot {
    camera: Camera,
    root: RenderStage,
    events: Vec<FrameEvent>,
    active: bool,
}

/// Drives the stage trees of every camera.
pub struct Engine {
    options: EngineOptions,
    cameras: Vec<CameraSlot>,
    frame: u64,
}

impl Engine {
    pub fn new(options: EngineOptions) -> Self {
        Self {
            options,
            cameras: Vec::new(),
            frame: 0,
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Registers a camera rendered by `root`. The tree is started on the
    /// camera's first frame.
    pub fn add_camera(&mut self, camera: Camera, root: RenderStage) -> CameraHandle {
        self.cameras.push(CameraSlot {
            camera,
            root,
            events: Vec::new(),
            active: true,
        });
        CameraHandle(self.cameras.len() - 1)
    }

    /// Registers a camera rendered by the standard deferred pipeline.
    pub fn add_deferred_camera(&mut self, camera: Camera) -> CameraHandle {
        self.add_camera(camera, deferred_pipeline())
    }

    pub fn camera(&self, handle: CameraHandle) -> Option<&Camera> {
        self.cameras.get(handle.0).map(|slot| &slot.camera)
    }

    /// Mutable camera access for pose updates. Use [`resize`](Self::resize) to
    /// change the output size so stages are told about it.
    pub fn camera_mut(&mut self, handle: CameraHandle) -> Option<&mut Camera> {
        self.cameras.get_mut(handle.0).map(|slot| &mut slot.camera)
    }

    pub fn root(&self, handle: CameraHandle) -> Option<&RenderStage> {
        self.cameras.get(handle.0).map(|slot| &slot.root)
    }

    pub fn root_mut(&mut self, handle: CameraHandle) -> Option<&mut RenderStage> {
        self.cameras.get_mut(handle.0).map(|slot| &mut slot.root)
    }

    /// Changes a camera's output size and queues a [`FrameEvent::Resized`].
    pub fn resize(&mut self, handle: CameraHandle, size: UVec2) {
        if let Some(slot) = self.cameras.get_mut(handle.0) {
            if slot.camera.target.size != size {
                slot.camera.target.size = size;
                slot.events.push(FrameEvent::Resized(size));
            }
        }
    }

    /// Queues an event for a camera's next frame.
    pub fn send(&mut self, handle: CameraHandle, event: FrameEvent) {
        if let Some(slot) = self.cameras.get_mut(handle.0) {
            slot.events.push(event);
        }
    }

    /// Inactive cameras are skipped entirely; their events wait.
    pub fn set_active(&mut self, handle: CameraHandle, active: bool) {
        if let Some(slot) = self.cameras.get_mut(handle.0) {
            slot.active = active;
        }
    }

    pub fn is_active(&self, handle: CameraHandle) -> bool {
        self.cameras.get(handle.0).is_some_and(|slot| slot.active)
    }

    /// Number of frames rendered so far.
    pub fn frame_count(&self) -> u64 {
        self.frame
    }

    /// Renders one frame for every active camera.
    ///
    /// # Errors
    ///
    /// Returns the first [`StageError`] raised while starting a camera's root.
    /// Cameras before it have rendered; the failing root stays unstarted and
    /// is retried next frame.
    pub fn render_frame(
        &mut self,
        gfx: &mut dyn GraphicsContext,
        scene: &dyn SceneQuery,
    ) -> Result<(), StageError> {
        for (index, slot) in self.cameras.iter_mut().enumerate() {
            if !slot.active {
                continue;
            }

            if !slot.root.is_started() {
                info!(
                    "Starting pipeline '{}' for camera {index}",
                    slot.root.name()
                );
                let mut cx = StartContext::new(gfx, &self.options, &slot.camera);
                slot.root.start(&mut cx)?;
            }

            let events = std::mem::take(&mut slot.events);
            if !events.is_empty() {
                debug!("Camera {index}: {} queued events", events.len());
            }
            let mut cx = FrameContext::new(gfx, scene, &mut slot.camera, &self.options, &events);
            slot.root.frame(&mut cx);
        }
        self.frame += 1;
        Ok(())
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("options", &self.options)
            .field("cameras", &self.cameras.len())
            .field("frame", &self.frame)
            .finish()
    }
}
