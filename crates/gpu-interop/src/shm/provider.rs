//! [`ShmProvider`]: memfd-backed images with dma-buf sharing semantics.
//!
//! Each image is an anonymous memfd laid out like a linear GPU surface: a
//! row pitch aligned to [`PITCH_ALIGN`] bytes and ABGR8888 pixels. Exporting
//! duplicates the descriptor, importing takes a duplicate of the received
//! one, and every access goes straight to the shared pages, so writes in one
//! process are visible in the other without any copy of the buffer.

use std::fs::File;
use std::io;
use std::os::fd::OwnedFd;
use std::os::unix::fs::FileExt;

use anyhow::{Context as _, Result};
use dmabuf_core::{
    BufferMetadata, DmaBufHandle, ExportError, Extent, FourCc, GpuApi, GpuError, ImportError,
    PixelQuad,
};
use nix::sys::memfd::{memfd_create, MemFdCreateFlag};
use tracing::{debug, trace};

use crate::{GpuContextProvider, PresentationSurface};

/// Row pitch alignment, matching what linear scan-out buffers typically use.
pub const PITCH_ALIGN: u32 = 64;

const BYTES_PER_PIXEL: u32 = 4;

/// A shared-memory image.
#[derive(Debug)]
pub struct ShmImage {
    file: File,
    metadata: BufferMetadata,
    extent: Extent,
}

impl ShmImage {
    pub fn metadata(&self) -> &BufferMetadata {
        &self.metadata
    }

    pub fn extent(&self) -> Extent {
        self.extent
    }

    fn row_offset(&self, row: u32) -> u64 {
        self.metadata.offset() as u64 + row as u64 * self.metadata.stride() as u64
    }
}

/// CPU stand-in for a GPU context.
///
/// "Presenting" records the quad that was drawn and logs it.
#[derive(Debug, Default)]
pub struct ShmProvider {
    back_buffer: Option<PixelQuad>,
    frames_presented: u64,
    flushes: u64,
    pending_error: Option<GpuError>,
}

fn io_error(op: &str, e: io::Error) -> GpuError {
    let code = e.raw_os_error().unwrap_or(0) as u32;
    GpuError::new(GpuApi::Shm, code, format!("{op}: {e}"))
}

impl ShmProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    pub fn flushes(&self) -> u64 {
        self.flushes
    }

    /// The quad most recently drawn to the back buffer.
    pub fn back_buffer(&self) -> Option<PixelQuad> {
        self.back_buffer
    }

    /// Record an error for the next [`GpuContextProvider::poll_error`].
    pub fn raise_error(&mut self, error: GpuError) {
        self.pending_error.get_or_insert(error);
    }

    fn check_quad(image: &ShmImage) -> Result<(), GpuError> {
        if image.extent.width < 2 || image.extent.height < 2 {
            return Err(GpuError::new(
                GpuApi::Shm,
                0,
                format!("image {}x{} is smaller than 2x2", image.extent.width, image.extent.height),
            ));
        }
        Ok(())
    }
}

impl GpuContextProvider for ShmProvider {
    type Image = ShmImage;

    fn create_image(&mut self, extent: Extent, pixels: &PixelQuad) -> Result<ShmImage> {
        let stride = (extent.width * BYTES_PER_PIXEL).next_multiple_of(PITCH_ALIGN);
        let metadata = BufferMetadata::new(FourCc::ABGR8888, 0, stride)?;
        let fd = memfd_create(c"dmabuf-share", MemFdCreateFlag::MFD_CLOEXEC)
            .context("memfd_create")?;
        let file = File::from(fd);
        file.set_len(stride as u64 * extent.height as u64)
            .context("size shared image")?;

        let image = ShmImage {
            file,
            metadata,
            extent,
        };
        self.upload(&image, pixels)?;
        debug!(%metadata, ?extent, "created shared-memory image");
        Ok(image)
    }

    fn flush(&mut self) {
        // Stores to a memfd are visible to every mapping immediately.
        self.flushes += 1;
        trace!(flushes = self.flushes, "flush");
    }

    fn export_image(&mut self, image: &ShmImage) -> Result<(DmaBufHandle, BufferMetadata), ExportError> {
        let fd = image
            .file
            .try_clone()
            .map_err(|e| ExportError::failed(format!("duplicate memfd: {e}")))?;
        Ok((DmaBufHandle::from(OwnedFd::from(fd)), image.metadata))
    }

    fn import_image(
        &mut self,
        handle: &DmaBufHandle,
        metadata: &BufferMetadata,
        extent: Extent,
    ) -> Result<ShmImage, ImportError> {
        let bpp = metadata.fourcc().bytes_per_pixel().ok_or_else(|| {
            ImportError::unsupported(format!("pixel format {}", metadata.fourcc()))
        })?;
        if extent.width * bpp > metadata.stride() {
            return Err(ImportError::failed(format!(
                "stride {} is too small for {} pixels per row",
                metadata.stride(),
                extent.width
            )));
        }

        let own = handle
            .try_clone()
            .map_err(|e| ImportError::failed(format!("duplicate handle: {e}")))?;
        let file = File::from(own.into_owned_fd());
        let len = file
            .metadata()
            .map_err(|e| ImportError::failed(format!("stat handle: {e}")))?
            .len();
        let needed = metadata.required_len(extent, bpp);
        if len < needed {
            return Err(ImportError::failed(format!(
                "buffer is {len} bytes, layout needs {needed}"
            )));
        }

        debug!(%metadata, ?extent, "imported shared-memory image");
        Ok(ShmImage {
            file,
            metadata: *metadata,
            extent,
        })
    }

    fn upload(&mut self, image: &ShmImage, pixels: &PixelQuad) -> Result<(), GpuError> {
        Self::check_quad(image)?;
        for row in 0..2 {
            image
                .file
                .write_all_at(&pixels.row_bytes(row), image.row_offset(row as u32))
                .map_err(|e| io_error("write shared image", e))?;
        }
        Ok(())
    }

    fn read_back(&mut self, image: &ShmImage) -> Result<PixelQuad, GpuError> {
        Self::check_quad(image)?;
        let mut rows = [[0u8; 8]; 2];
        for (row, buf) in rows.iter_mut().enumerate() {
            image
                .file
                .read_exact_at(buf, image.row_offset(row as u32))
                .map_err(|e| io_error("read shared image", e))?;
        }
        Ok(PixelQuad::from_rows(rows[0], rows[1]))
    }

    fn poll_error(&mut self) -> Option<GpuError> {
        self.pending_error.take()
    }
}

impl PresentationSurface for ShmProvider {
    fn draw(&mut self, image: &ShmImage) -> Result<(), GpuError> {
        self.back_buffer = Some(self.read_back(image)?);
        Ok(())
    }

    fn present(&mut self) -> Result<(), GpuError> {
        self.frames_presented += 1;
        match self.back_buffer {
            Some(quad) => debug!(frame = self.frames_presented, %quad, "presented"),
            None => debug!(frame = self.frames_presented, "presented empty frame"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn created_image_uses_aligned_pitch() {
        let mut gpu = ShmProvider::new();
        let image = gpu.create_image(Extent::new(2, 2), &PixelQuad::INITIAL).unwrap();
        assert_eq!(image.metadata().stride(), PITCH_ALIGN);
        assert_eq!(image.metadata().fourcc(), FourCc::ABGR8888);
        assert_eq!(gpu.read_back(&image).unwrap(), PixelQuad::INITIAL);
    }

    #[test]
    fn imported_image_shares_memory_with_export() {
        let mut producer = ShmProvider::new();
        let mut consumer = ShmProvider::new();
        let image = producer.create_image(Extent::new(2, 2), &PixelQuad::INITIAL).unwrap();

        let (handle, metadata) = producer.export_image(&image).unwrap();
        let imported = consumer
            .import_image(&handle, &metadata, Extent::new(2, 2))
            .unwrap();
        drop(handle);

        let rotated = PixelQuad::INITIAL.rotate();
        consumer.upload(&imported, &rotated).unwrap();
        assert_eq!(producer.read_back(&image).unwrap(), rotated);
    }

    #[test]
    fn import_rejects_layout_larger_than_buffer() {
        let mut gpu = ShmProvider::new();
        let image = gpu.create_image(Extent::new(2, 2), &PixelQuad::INITIAL).unwrap();
        let (handle, metadata) = gpu.export_image(&image).unwrap();
        let err = gpu
            .import_image(&handle, &metadata, Extent::new(2, 64))
            .unwrap_err();
        assert!(matches!(err, ImportError::Failed(_)));
    }

    #[test]
    fn import_rejects_unknown_format() {
        let mut gpu = ShmProvider::new();
        let image = gpu.create_image(Extent::new(2, 2), &PixelQuad::INITIAL).unwrap();
        let (handle, _) = gpu.export_image(&image).unwrap();
        let nv12 = BufferMetadata::new(FourCc::from_chars(*b"NV12"), 0, 64).unwrap();
        let err = gpu.import_image(&handle, &nv12, Extent::new(2, 2)).unwrap_err();
        assert!(matches!(err, ImportError::Unsupported(_)));
    }

    #[test]
    fn raised_error_is_reported_once() {
        let mut gpu = ShmProvider::new();
        gpu.raise_error(GpuError::gl(0x0505));
        assert_eq!(gpu.poll_error(), Some(GpuError::gl(0x0505)));
        assert_eq!(gpu.poll_error(), None);
    }
}
