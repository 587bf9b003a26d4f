//! Headless EGL display with a current desktop GL context.
//!
//! Holds only the EGL objects: display, context and a small pbuffer used as
//! the default framebuffer. Texture sharing lives in [`super::interop`].

#![allow(unused_unsafe)]

use std::collections::HashSet;
use std::ffi::c_void;

use anyhow::{anyhow, Context as _, Result};
use dmabuf_core::{Extent, GpuApi, GpuError};
use khronos_egl as egl;
use tracing::{debug, warn};

/// `EGL_PLATFORM_SURFACELESS_MESA`
const PLATFORM_SURFACELESS_MESA: egl::Enum = 0x31DD;

pub(crate) type EglInstance = egl::DynamicInstance<egl::EGL1_5>;

fn egl_error(e: egl::Error) -> GpuError {
    GpuError::new(GpuApi::Egl, e.native() as u32, e.to_string())
}

/// An initialised EGL display with its context made current on this thread.
pub struct EglDisplay {
    egl: EglInstance,
    display: egl::Display,
    context: egl::Context,
    surface: egl::Surface,
    size: Extent,
    extensions: HashSet<String>,
}

impl EglDisplay {
    /// Load `libEGL`, open a display and make a GL context current.
    ///
    /// Prefers Mesa's surfaceless platform, which needs neither a window
    /// system nor a DRM master. Falls back to the default display.
    pub fn new(size: Extent) -> Result<Self> {
        let egl = unsafe { EglInstance::load_required() }
            .map_err(|e| anyhow!("failed to load libEGL: {e}"))?;

        let display = Self::open_display(&egl)?;
        let (major, minor) = egl
            .initialize(display)
            .context("eglInitialize failed")?;
        debug!("EGL {major}.{minor}");

        let extensions = egl
            .query_string(Some(display), egl::EXTENSIONS)
            .map(|s| {
                s.to_string_lossy()
                    .split_ascii_whitespace()
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();

        egl.bind_api(egl::OPENGL_API)
            .context("desktop OpenGL is not available through EGL")?;

        let config_attribs = [
            egl::SURFACE_TYPE,
            egl::PBUFFER_BIT,
            egl::RENDERABLE_TYPE,
            egl::OPENGL_BIT,
            egl::RED_SIZE,
            8,
            egl::GREEN_SIZE,
            8,
            egl::BLUE_SIZE,
            8,
            egl::ALPHA_SIZE,
            8,
            egl::NONE,
        ];
        let config = egl
            .choose_first_config(display, &config_attribs)
            .context("eglChooseConfig failed")?
            .ok_or_else(|| anyhow!("no RGBA8 pbuffer config with OpenGL support"))?;

        let context = egl
            .create_context(display, config, None, &[egl::NONE])
            .context("eglCreateContext failed")?;

        let surface_attribs = [
            egl::WIDTH,
            size.width as egl::Int,
            egl::HEIGHT,
            size.height as egl::Int,
            egl::NONE,
        ];
        let surface = egl
            .create_pbuffer_surface(display, config, &surface_attribs)
            .context("eglCreatePbufferSurface failed")?;

        egl.make_current(display, Some(surface), Some(surface), Some(context))
            .context("eglMakeCurrent failed")?;

        Ok(Self {
            egl,
            display,
            context,
            surface,
            size,
            extensions,
        })
    }

    fn open_display(egl: &EglInstance) -> Result<egl::Display> {
        let surfaceless = unsafe {
            egl.get_platform_display(
                PLATFORM_SURFACELESS_MESA,
                egl::DEFAULT_DISPLAY,
                &[egl::ATTRIB_NONE],
            )
        };
        match surfaceless {
            Ok(display) => {
                debug!("using surfaceless EGL platform");
                return Ok(display);
            }
            Err(e) => warn!("surfaceless EGL platform unavailable ({e}), trying default display"),
        }
        unsafe { egl.get_display(egl::DEFAULT_DISPLAY) }
            .ok_or_else(|| anyhow!("no EGL display available"))
    }

    pub(crate) fn instance(&self) -> &EglInstance {
        &self.egl
    }

    pub(crate) fn raw(&self) -> egl::Display {
        self.display
    }

    pub(crate) fn context(&self) -> egl::Context {
        self.context
    }

    pub fn size(&self) -> Extent {
        self.size
    }

    pub fn has_extension(&self, name: &str) -> bool {
        self.extensions.contains(name)
    }

    pub(crate) fn get_proc_address(&self, symbol: &str) -> *const c_void {
        self.egl
            .get_proc_address(symbol)
            .map_or(std::ptr::null(), |f| f as *const c_void)
    }

    pub(crate) fn swap_buffers(&self) -> Result<(), GpuError> {
        self.egl
            .swap_buffers(self.display, self.surface)
            .map_err(egl_error)
    }

    pub(crate) fn is_current(&self) -> bool {
        self.egl.get_current_context() == Some(self.context)
    }

    pub(crate) fn make_current(&self) -> Result<(), GpuError> {
        self.egl
            .make_current(
                self.display,
                Some(self.surface),
                Some(self.surface),
                Some(self.context),
            )
            .map_err(egl_error)
    }

    /// Take the pending EGL error of this thread.
    pub(crate) fn poll_error(&self) -> Option<GpuError> {
        self.egl.get_error().map(egl_error)
    }
}

// The EGLDisplay handle is shared by every context in the process, so it is
// never terminated here.
impl Drop for EglDisplay {
    fn drop(&mut self) {
        let _ = self.egl.make_current(self.display, None, None, None);
        if let Err(e) = self.egl.destroy_surface(self.display, self.surface) {
            warn!("eglDestroySurface failed: {e}");
        }
        if let Err(e) = self.egl.destroy_context(self.display, self.context) {
            warn!("eglDestroyContext failed: {e}");
        }
    }
}
