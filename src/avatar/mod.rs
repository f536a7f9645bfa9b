//! Avatar display synced to speech playback.
//!
//! Components:
//! - `compose`: image listing, alpha compositing, placeholder frame
//! - `selector`: playback state → frame to show
//! - `window`: eframe/egui surface driving the selector every frame

pub mod compose;
pub mod selector;
pub mod window;
