//! Render stages: a tree of composable pipeline work.
//!
//! A [`RenderStage`] is a node with [`StageHooks`] (what it does), ordered
//! children and an enabled flag. Stages receive everything they use through a
//! [`StartContext`] or [`FrameContext`]: the graphics context, the options, the
//! camera, and the resources of their enclosing post-process and deferred
//! stages. There are no parent pointers and no globals.
//!
//! ```text
//! main (PostProcessStage)            ping-pong src/dst, composite to camera
//! └── generator: deferred            G-buffer, OIT, shadow map, batches
//!     ├── shadow-maps
//!     ├── gbuffer
//!     ├── ...
//!     └── unbind-dst
//! ```
//!
//! Use [`deferred_pipeline`] for the standard tree, or build your own from
//! [`RenderStage::group`], [`PostProcessStage`] and custom hooks.

pub mod deferred;
mod hooks;
pub mod post_process;
pub mod programs;
mod tree;

pub use deferred::{DeferredShared, DeferredStage, deferred_pipeline};
pub use hooks::{FrameContext, FrameEvent, Group, StageHooks, StageKind, StartContext};
pub use post_process::{PingPong, PostProcessStage};
pub use tree::{RenderStage, StageState};
