//! Render-thread lifecycle and the synchronous cross-thread call protocol.
//!
//! All window-system and GL work happens on one dedicated render thread; the
//! embedding application's threads talk to it through [`RenderController`].
//! Add, remove, and shutdown requests are marshalled onto the render thread
//! and block the caller until acknowledged. The render thread runs a
//! self-rescheduling loop: service calls until the pacing deadline, run one
//! paint/swap cycle, re-arm with the pacer's delay.

mod controller;

pub use controller::{ControllerPhase, RenderControlConfig, RenderController};
