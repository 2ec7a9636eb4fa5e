//! [`GraphicsContext`](crate::GraphicsContext) implementations.
//!
//! - [`recording`]: headless, records and validates calls. Tests and the demo use it.
//! - [`wgpu`]: real GPU rendering through wgpu.

pub mod recording;
pub mod wgpu;
