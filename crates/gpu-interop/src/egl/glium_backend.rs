//! glium backend over the headless EGL context.

use std::rc::Rc;
use std::sync::Once;

use tracing::warn;

use super::display::EglDisplay;

pub(crate) static GL_INIT_ONCE: Once = Once::new();

pub(crate) struct RawEglBackend {
    display: Rc<EglDisplay>,
}

impl RawEglBackend {
    /// Wrap `display`, whose context is already current.
    ///
    /// GL function pointers for the raw `gl` calls are loaded exactly once,
    /// through `eglGetProcAddress`.
    pub(crate) fn new(display: Rc<EglDisplay>) -> Self {
        GL_INIT_ONCE.call_once(|| {
            gl::load_with(|s| display.get_proc_address(s));
        });

        Self { display }
    }
}

impl std::fmt::Debug for RawEglBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawEglBackend")
            .field("size", &self.display.size())
            .finish()
    }
}

/// # Safety
///
/// The wrapped context is only ever made current on the thread that created
/// the [`EglDisplay`], and glium is driven from that thread only.
unsafe impl glium::backend::Backend for RawEglBackend {
    fn swap_buffers(&self) -> Result<(), glium::SwapBuffersError> {
        self.display.swap_buffers().map_err(|e| {
            warn!("eglSwapBuffers failed: {e}");
            glium::SwapBuffersError::ContextLost
        })
    }

    unsafe fn get_proc_address(&self, symbol: &str) -> *const std::os::raw::c_void {
        self.display.get_proc_address(symbol)
    }

    fn get_framebuffer_dimensions(&self) -> (u32, u32) {
        let size = self.display.size();
        (size.width, size.height)
    }

    fn is_current(&self) -> bool {
        self.display.is_current()
    }

    unsafe fn make_current(&self) {
        if let Err(e) = self.display.make_current() {
            warn!("eglMakeCurrent failed: {e}");
        }
    }

    fn resize(&self, _new_size: (u32, u32)) {}
}
