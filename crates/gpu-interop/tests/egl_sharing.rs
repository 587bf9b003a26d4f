//! Exercises the EGL backend on machines that have a dma-buf capable driver.
//! Everything is skipped (with a note on stderr) where that is missing.

#![cfg(target_os = "linux")]

use dmabuf_core::{ExportError, Extent, PixelQuad};
use gpu_interop::egl::{EglProvider, GlTexture};
use gpu_interop::{GpuContextProvider, PresentationSurface};

const EXTENT: Extent = Extent::new(2, 2);

fn provider() -> Option<EglProvider> {
    match EglProvider::new(EXTENT) {
        Ok(p) => Some(p),
        Err(e) => {
            eprintln!("skipping: no EGL context ({e:#})");
            None
        }
    }
}

#[test]
fn texture_round_trips_through_dma_buf() {
    let Some(mut gpu) = provider() else { return };
    let image = gpu.create_image(EXTENT, &PixelQuad::INITIAL).unwrap();
    gpu.flush();

    let (handle, metadata) = match gpu.export_image(&image) {
        Ok(exported) => exported,
        Err(ExportError::Unsupported(what)) => {
            eprintln!("skipping: {what}");
            return;
        }
        Err(e) => panic!("{e}"),
    };
    assert!(metadata.stride() >= 8);

    let imported = match gpu.import_image(&handle, &metadata, EXTENT) {
        Ok(image) => image,
        Err(e) => {
            eprintln!("skipping: {e}");
            return;
        }
    };
    drop(handle);

    // A fresh GL name aliasing the exported memory.
    assert!(imported.is_imported());
    assert_ne!(imported.gl_texture(), GlTexture(0));
    assert_ne!(imported.gl_texture(), image.gl_texture());
    assert_eq!(gpu.read_back(&imported).unwrap(), PixelQuad::INITIAL);

    let rotated = PixelQuad::INITIAL.rotate();
    gpu.upload(&imported, &rotated).unwrap();
    gpu.flush();
    assert_eq!(gpu.read_back(&image).unwrap(), rotated);
    assert_eq!(gpu.poll_error(), None);
}

#[test]
fn presenting_without_drawing_clears_the_frame() {
    let Some(mut gpu) = provider() else { return };
    gpu.present().unwrap();
    let image = gpu.create_image(EXTENT, &PixelQuad::INITIAL).unwrap();
    gpu.draw(&image).unwrap();
    gpu.present().unwrap();
    assert_eq!(gpu.poll_error(), None);
}

#[test]
fn glium_keeps_working_after_a_raw_import() {
    let Some(mut gpu) = provider() else { return };
    let image = gpu.create_image(EXTENT, &PixelQuad::INITIAL).unwrap();
    let Ok((handle, metadata)) = gpu.export_image(&image) else {
        eprintln!("skipping: no dma-buf export");
        return;
    };
    let imported = match gpu.import_image(&handle, &metadata, EXTENT) {
        Ok(image) => image,
        Err(e) => {
            eprintln!("skipping: {e}");
            return;
        }
    };

    // The import binds textures behind glium's back; its cached state must
    // still match so later draws and uploads land where they should.
    gpu.draw(&imported).unwrap();
    gpu.present().unwrap();
    let other = gpu.create_image(EXTENT, &PixelQuad::INITIAL.rotate()).unwrap();
    assert_eq!(gpu.read_back(&other).unwrap(), PixelQuad::INITIAL.rotate());
    assert_eq!(gpu.read_back(&imported).unwrap(), PixelQuad::INITIAL);
    assert_eq!(gpu.poll_error(), None);
}
