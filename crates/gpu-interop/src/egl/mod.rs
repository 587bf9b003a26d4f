//! EGL/GL backend: headless context, dma-buf export and import, glium
//! presentation.

mod display;
mod gl_state;
mod glium_backend;
mod interop;
mod scene;

pub use display::EglDisplay;
pub use interop::{EglProvider, GlTexture, SharedTexture};
