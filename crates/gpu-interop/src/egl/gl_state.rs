//! GL state save / restore around raw `gl` calls.
//!
//! glium caches bindings; anything changed behind its back has to be put
//! back before glium draws again.

use dmabuf_core::GpuError;
use gl::types::{GLenum, GLint, GLuint};

/// The texture unit and its `TEXTURE_2D` binding, which is all a raw
/// texture import touches.
pub(crate) struct SavedGlState {
    active_texture: GLint,
    texture_2d: GLint,
}

impl SavedGlState {
    /// Save, then switch to unit 0.
    pub(crate) unsafe fn save() -> Self {
        let mut s = Self {
            active_texture: 0,
            texture_2d: 0,
        };
        gl::GetIntegerv(gl::ACTIVE_TEXTURE, &mut s.active_texture);
        gl::ActiveTexture(gl::TEXTURE0);
        gl::GetIntegerv(gl::TEXTURE_BINDING_2D, &mut s.texture_2d);
        s
    }

    pub(crate) unsafe fn restore(&self) {
        gl::ActiveTexture(gl::TEXTURE0);
        gl::BindTexture(gl::TEXTURE_2D, self.texture_2d as GLuint);
        gl::ActiveTexture(self.active_texture as GLenum);
    }
}

/// Take the oldest recorded GL error, if any.
pub(crate) fn take_gl_error() -> Option<GpuError> {
    match unsafe { gl::GetError() } {
        gl::NO_ERROR => None,
        code => Some(GpuError::gl(code)),
    }
}
