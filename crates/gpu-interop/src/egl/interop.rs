//! GL textures shared across processes as dma-bufs.
//!
//! Export goes through `EGL_MESA_image_dma_buf_export`: the texture is
//! wrapped in an EGLImage, which is asked for its fourcc, plane count and
//! plane-0 layout. Import goes the other way with
//! `EGL_EXT_image_dma_buf_import` and `glEGLImageTargetTexture2DOES`, which
//! makes a fresh GL texture alias the foreign memory.

#![allow(unused_unsafe)]

use std::ffi::{c_int, c_void};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::rc::Rc;

use anyhow::{anyhow, Result};
use dmabuf_core::{
    BufferMetadata, DmaBufHandle, ExportError, Extent, FourCc, GpuApi, GpuError, ImportError,
    PixelQuad,
};
use gl::types::{GLenum, GLint, GLuint};
use glium::backend::Context;
use glium::texture::{Dimensions, MipmapsOption, RawImage2d, UncompressedFloatFormat};
use glium::{Frame, GlObject, Rect, Texture2d};
use khronos_egl as egl;
use once_cell::unsync::OnceCell;
use tracing::{debug, trace, warn};

use super::display::EglDisplay;
use super::gl_state::{take_gl_error, SavedGlState};
use super::glium_backend::RawEglBackend;
use super::scene::QuadScene;
use crate::{GpuContextProvider, PresentationSurface};

const EXPORT_EXTENSION: &str = "EGL_MESA_image_dma_buf_export";
const IMPORT_EXTENSION: &str = "EGL_EXT_image_dma_buf_import";

// EGL_KHR_gl_texture_2D_image / EGL_EXT_image_dma_buf_import tokens.
const EGL_GL_TEXTURE_2D: egl::Enum = 0x30B1;
const EGL_LINUX_DMA_BUF_EXT: egl::Enum = 0x3270;
const EGL_LINUX_DRM_FOURCC_EXT: egl::Attrib = 0x3271;
const EGL_DMA_BUF_PLANE0_FD_EXT: egl::Attrib = 0x3272;
const EGL_DMA_BUF_PLANE0_OFFSET_EXT: egl::Attrib = 0x3273;
const EGL_DMA_BUF_PLANE0_PITCH_EXT: egl::Attrib = 0x3274;

/// Modifiers other than these mean a tiled layout the importer cannot
/// describe with offset and pitch alone.
const DRM_FORMAT_MOD_LINEAR: u64 = 0;
const DRM_FORMAT_MOD_INVALID: u64 = 0x00ff_ffff_ffff_ffff;

// ---------------------------------------------------------------------------
// Extension function pointer types
// ---------------------------------------------------------------------------

type EglImageHandle = *mut c_void;
type EglDisplayHandle = *mut c_void;

type ExportDmaBufImageQueryMesa = unsafe extern "system" fn(
    dpy: EglDisplayHandle,
    image: EglImageHandle,
    fourcc: *mut c_int,
    num_planes: *mut c_int,
    modifiers: *mut u64,
) -> egl::Boolean;
type ExportDmaBufImageMesa = unsafe extern "system" fn(
    dpy: EglDisplayHandle,
    image: EglImageHandle,
    fds: *mut c_int,
    strides: *mut egl::Int,
    offsets: *mut egl::Int,
) -> egl::Boolean;
type EglImageTargetTexture2dOes = unsafe extern "system" fn(target: GLenum, image: EglImageHandle);

/// Loaded `EGL_MESA_image_dma_buf_export` entry points.
struct ExportFunctions {
    query: ExportDmaBufImageQueryMesa,
    export: ExportDmaBufImageMesa,
}

impl ExportFunctions {
    fn load(display: &EglDisplay) -> Option<Self> {
        if !display.has_extension(EXPORT_EXTENSION) {
            return None;
        }
        let egl = display.instance();
        unsafe {
            Some(Self {
                query: std::mem::transmute::<extern "system" fn(), ExportDmaBufImageQueryMesa>(
                    egl.get_proc_address("eglExportDMABUFImageQueryMESA")?,
                ),
                export: std::mem::transmute::<extern "system" fn(), ExportDmaBufImageMesa>(
                    egl.get_proc_address("eglExportDMABUFImageMESA")?,
                ),
            })
        }
    }
}

fn load_image_target(display: &EglDisplay) -> Option<EglImageTargetTexture2dOes> {
    let f = display
        .instance()
        .get_proc_address("glEGLImageTargetTexture2DOES")?;
    Some(unsafe { std::mem::transmute::<extern "system" fn(), EglImageTargetTexture2dOes>(f) })
}

// ---------------------------------------------------------------------------
// SharedTexture
// ---------------------------------------------------------------------------

/// A GL texture owned by an [`EglProvider`], possibly aliasing foreign
/// memory.
pub struct SharedTexture {
    texture: Texture2d,
    /// The EGLImage an imported texture is bound to.
    egl_image: Option<egl::Image>,
    display: Rc<EglDisplay>,
    extent: Extent,
}

impl SharedTexture {
    pub fn gl_texture(&self) -> GlTexture {
        GlTexture(self.texture.get_id())
    }

    pub fn extent(&self) -> Extent {
        self.extent
    }

    pub fn is_imported(&self) -> bool {
        self.egl_image.is_some()
    }
}

impl std::fmt::Debug for SharedTexture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedTexture")
            .field("texture", &self.texture.get_id())
            .field("extent", &self.extent)
            .field("imported", &self.is_imported())
            .finish()
    }
}

impl Drop for SharedTexture {
    fn drop(&mut self) {
        if let Some(image) = self.egl_image.take() {
            let display = &self.display;
            if let Err(e) = display.instance().destroy_image(display.raw(), image) {
                warn!("eglDestroyImage failed: {e}");
            }
        }
    }
}

/// Raw GL texture name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlTexture(pub GLuint);

// ---------------------------------------------------------------------------
// EglProvider
// ---------------------------------------------------------------------------

/// [`GpuContextProvider`] on a headless EGL context.
pub struct EglProvider {
    // Field order matters: glium objects must go before the display.
    pending_frame: Option<Frame>,
    scene: OnceCell<QuadScene>,
    ctx: Rc<Context>,
    export_fns: Option<ExportFunctions>,
    image_target: Option<EglImageTargetTexture2dOes>,
    last_error: Option<GpuError>,
    display: Rc<EglDisplay>,
}

impl EglProvider {
    /// Open a headless display whose default framebuffer is `size`.
    pub fn new(size: Extent) -> Result<Self> {
        let display = Rc::new(EglDisplay::new(size)?);
        let backend = Rc::new(RawEglBackend::new(display.clone()));

        let ctx = unsafe {
            Context::new(
                backend,
                false,
                glium::debug::DebugCallbackBehavior::Ignore,
            )
        }
        .map_err(|e| anyhow!("glium context: {e}"))?;
        debug!("OPENGL_VERSION {}", ctx.get_opengl_version_string());

        let export_fns = ExportFunctions::load(&display);
        if export_fns.is_none() {
            debug!("{EXPORT_EXTENSION} not available");
        }
        let image_target = if display.has_extension(IMPORT_EXTENSION) {
            load_image_target(&display)
        } else {
            debug!("{IMPORT_EXTENSION} not available");
            None
        };

        Ok(Self {
            pending_frame: None,
            scene: OnceCell::new(),
            ctx,
            export_fns,
            image_target,
            last_error: None,
            display,
        })
    }

    pub fn display(&self) -> &EglDisplay {
        &self.display
    }

    fn wrap(&self, texture: Texture2d, egl_image: Option<egl::Image>, extent: Extent) -> SharedTexture {
        SharedTexture {
            texture,
            egl_image,
            display: self.display.clone(),
            extent,
        }
    }

    fn scene(&self) -> Result<&QuadScene, GpuError> {
        self.scene
            .get_or_try_init(|| QuadScene::new(&self.ctx))
            .map_err(|e| GpuError::new(GpuApi::Gl, 0, e.to_string()))
    }

    fn record(&mut self, error: GpuError) {
        self.last_error.get_or_insert(error);
    }

    fn finish_pending_frame(&mut self) -> Result<(), GpuError> {
        match self.pending_frame.take() {
            Some(frame) => frame
                .finish()
                .map_err(|e| GpuError::new(GpuApi::Egl, 0, e.to_string())),
            None => Ok(()),
        }
    }

    /// Wrap `texture` in a temporary EGLImage and export it.
    fn export_texture(
        &self,
        fns: &ExportFunctions,
        texture: GLuint,
    ) -> Result<(DmaBufHandle, BufferMetadata), ExportError> {
        let egl = self.display.instance();
        let image = unsafe {
            egl.create_image(
                self.display.raw(),
                self.display.context(),
                EGL_GL_TEXTURE_2D,
                egl::ClientBuffer::from_ptr(texture as usize as *mut c_void),
                &[egl::ATTRIB_NONE],
            )
        }
        .map_err(|e| ExportError::failed(format!("eglCreateImage from texture {texture}: {e}")))?;

        let result = self.export_egl_image(fns, &image);
        if let Err(e) = egl.destroy_image(self.display.raw(), image) {
            warn!("eglDestroyImage failed: {e}");
        }
        result
    }

    fn export_egl_image(
        &self,
        fns: &ExportFunctions,
        image: &egl::Image,
    ) -> Result<(DmaBufHandle, BufferMetadata), ExportError> {
        let dpy = self.display.raw().as_ptr();
        let mut fourcc: c_int = 0;
        let mut num_planes: c_int = 0;
        let mut modifiers = [0u64; 4];
        let ok = unsafe {
            (fns.query)(
                dpy,
                image.as_ptr(),
                &mut fourcc,
                &mut num_planes,
                modifiers.as_mut_ptr(),
            )
        };
        if ok != egl::TRUE {
            return Err(ExportError::failed("eglExportDMABUFImageQueryMESA"));
        }
        if num_planes != 1 {
            return Err(ExportError::unsupported(format!(
                "image has {num_planes} planes, only single-plane layouts can be shared"
            )));
        }
        if modifiers[0] != DRM_FORMAT_MOD_LINEAR && modifiers[0] != DRM_FORMAT_MOD_INVALID {
            warn!(modifier = modifiers[0], "exporting non-linear layout; importer ignores modifiers");
        }

        let mut fds: [c_int; 4] = [-1; 4];
        let mut strides: [egl::Int; 4] = [0; 4];
        let mut offsets: [egl::Int; 4] = [0; 4];
        let ok = unsafe {
            (fns.export)(
                dpy,
                image.as_ptr(),
                fds.as_mut_ptr(),
                strides.as_mut_ptr(),
                offsets.as_mut_ptr(),
            )
        };
        if ok != egl::TRUE || fds[0] < 0 {
            return Err(ExportError::failed("eglExportDMABUFImageMESA"));
        }
        // SAFETY: the driver just created this descriptor for us.
        let fd = unsafe { OwnedFd::from_raw_fd(fds[0]) };

        let metadata = BufferMetadata::new(
            FourCc(fourcc as u32),
            u32::try_from(offsets[0])
                .map_err(|_| ExportError::failed(format!("negative plane offset {}", offsets[0])))?,
            u32::try_from(strides[0])
                .map_err(|_| ExportError::failed(format!("negative plane stride {}", strides[0])))?,
        )
        .map_err(|e| ExportError::failed(e.to_string()))?;
        Ok((DmaBufHandle::from(fd), metadata))
    }
}

fn check_quad(extent: Extent) -> Result<(), GpuError> {
    if extent.width < 2 || extent.height < 2 {
        return Err(GpuError::new(
            GpuApi::Gl,
            gl::INVALID_VALUE,
            format!("texture {}x{} is smaller than 2x2", extent.width, extent.height),
        ));
    }
    Ok(())
}

impl Drop for EglProvider {
    fn drop(&mut self) {
        // glium panics if a frame is dropped unfinished.
        if let Err(e) = self.finish_pending_frame() {
            warn!("finishing frame on drop: {e}");
        }
    }
}

impl GpuContextProvider for EglProvider {
    type Image = SharedTexture;

    fn create_image(&mut self, extent: Extent, pixels: &PixelQuad) -> Result<SharedTexture> {
        let texture = Texture2d::empty_with_format(
            &self.ctx,
            UncompressedFloatFormat::U8U8U8U8,
            MipmapsOption::NoMipmap,
            extent.width,
            extent.height,
        )?;
        let image = self.wrap(texture, None, extent);
        self.upload(&image, pixels)?;
        debug!(texture = image.texture.get_id(), ?extent, "created texture");
        Ok(image)
    }

    fn flush(&mut self) {
        self.ctx.flush();
    }

    fn export_image(
        &mut self,
        image: &SharedTexture,
    ) -> Result<(DmaBufHandle, BufferMetadata), ExportError> {
        let fns = self
            .export_fns
            .as_ref()
            .ok_or_else(|| ExportError::unsupported(EXPORT_EXTENSION))?;
        let exported = self.export_texture(fns, image.texture.get_id())?;
        debug!(metadata = %exported.1, fd = exported.0.as_raw_fd(), "exported texture");
        Ok(exported)
    }

    fn import_image(
        &mut self,
        handle: &DmaBufHandle,
        metadata: &BufferMetadata,
        extent: Extent,
    ) -> Result<SharedTexture, ImportError> {
        let image_target = self
            .image_target
            .ok_or_else(|| ImportError::unsupported(IMPORT_EXTENSION))?;

        let attribs = [
            egl::WIDTH as egl::Attrib,
            extent.width as egl::Attrib,
            egl::HEIGHT as egl::Attrib,
            extent.height as egl::Attrib,
            EGL_LINUX_DRM_FOURCC_EXT,
            metadata.fourcc().0 as egl::Attrib,
            EGL_DMA_BUF_PLANE0_FD_EXT,
            handle.as_raw_fd() as egl::Attrib,
            EGL_DMA_BUF_PLANE0_OFFSET_EXT,
            metadata.offset() as egl::Attrib,
            EGL_DMA_BUF_PLANE0_PITCH_EXT,
            metadata.stride() as egl::Attrib,
            egl::ATTRIB_NONE,
        ];
        while let Some(stale) = take_gl_error() {
            self.record(stale);
        }

        let display = Rc::clone(&self.display);
        let egl = display.instance();
        let egl_image = unsafe {
            egl.create_image(
                display.raw(),
                egl::Context::from_ptr(egl::NO_CONTEXT),
                EGL_LINUX_DMA_BUF_EXT,
                egl::ClientBuffer::from_ptr(std::ptr::null_mut()),
                &attribs,
            )
        }
        .map_err(|e| ImportError::failed(format!("eglCreateImage from dma-buf: {e}")))?;

        let mut id: GLuint = 0;
        let gl_error = unsafe {
            let saved = SavedGlState::save();
            gl::GenTextures(1, &mut id);
            gl::BindTexture(gl::TEXTURE_2D, id);
            image_target(gl::TEXTURE_2D, egl_image.as_ptr());
            gl::TexParameteri(gl::TEXTURE_2D, gl::TEXTURE_MIN_FILTER, gl::NEAREST as GLint);
            gl::TexParameteri(gl::TEXTURE_2D, gl::TEXTURE_MAG_FILTER, gl::NEAREST as GLint);
            let err = take_gl_error();
            saved.restore();
            err
        };
        if let Some(e) = gl_error {
            unsafe { gl::DeleteTextures(1, &id) };
            if let Err(err) = egl.destroy_image(display.raw(), egl_image) {
                warn!("eglDestroyImage failed: {err}");
            }
            return Err(ImportError::failed(format!(
                "glEGLImageTargetTexture2DOES: {e}"
            )));
        }

        // SAFETY: `id` is a complete texture of `extent` that glium now owns.
        let texture = unsafe {
            Texture2d::from_id(
                &self.ctx,
                UncompressedFloatFormat::U8U8U8U8,
                id,
                true,
                MipmapsOption::NoMipmap,
                Dimensions::Texture2d {
                    width: extent.width,
                    height: extent.height,
                },
            )
        };
        debug!(texture = id, %metadata, ?extent, "imported dma-buf");
        Ok(self.wrap(texture, Some(egl_image), extent))
    }

    fn upload(&mut self, image: &SharedTexture, pixels: &PixelQuad) -> Result<(), GpuError> {
        check_quad(image.extent)?;
        let mut data = Vec::with_capacity(16);
        data.extend_from_slice(&pixels.row_bytes(0));
        data.extend_from_slice(&pixels.row_bytes(1));
        let raw = RawImage2d::from_raw_rgba(data, (2, 2));
        image.texture.write(
            Rect {
                left: 0,
                bottom: 0,
                width: 2,
                height: 2,
            },
            raw,
        );
        trace!(texture = image.texture.get_id(), %pixels, "uploaded");
        Ok(())
    }

    fn read_back(&mut self, image: &SharedTexture) -> Result<PixelQuad, GpuError> {
        check_quad(image.extent)?;
        let rows: Vec<Vec<(u8, u8, u8, u8)>> = image.texture.read();
        let row = |r: usize| -> Result<[u8; 8], GpuError> {
            let texels = rows
                .get(r)
                .filter(|row| row.len() >= 2)
                .ok_or_else(|| GpuError::new(GpuApi::Gl, 0, "texture smaller than 2x2"))?;
            let [(a0, a1, a2, a3), (b0, b1, b2, b3)] = [texels[0], texels[1]];
            Ok([a0, a1, a2, a3, b0, b1, b2, b3])
        };
        Ok(PixelQuad::from_rows(row(0)?, row(1)?))
    }

    fn poll_error(&mut self) -> Option<GpuError> {
        take_gl_error()
            .or_else(|| self.last_error.take())
            .or_else(|| self.display.poll_error())
    }
}

impl PresentationSurface for EglProvider {
    fn draw(&mut self, image: &SharedTexture) -> Result<(), GpuError> {
        self.finish_pending_frame()?;
        let mut frame = Frame::new(self.ctx.clone(), self.ctx.get_framebuffer_dimensions());
        let drawn = self
            .scene()
            .and_then(|scene| {
                scene
                    .draw(&mut frame, &image.texture)
                    .map_err(|e| GpuError::new(GpuApi::Gl, 0, e.to_string()))
            });
        self.pending_frame = Some(frame);
        if let Err(e) = &drawn {
            self.record(e.clone());
        }
        drawn
    }

    fn present(&mut self) -> Result<(), GpuError> {
        if self.pending_frame.is_none() {
            let mut frame = Frame::new(self.ctx.clone(), self.ctx.get_framebuffer_dimensions());
            let (r, g, b, a) = super::scene::CLEAR_COLOR;
            glium::Surface::clear_color(&mut frame, r, g, b, a);
            self.pending_frame = Some(frame);
        }
        self.finish_pending_frame().map_err(|e| {
            self.record(e.clone());
            e
        })
    }
}
