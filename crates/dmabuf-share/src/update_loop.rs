//! Fixed-cadence loop run by both processes after the handoff.
//!
//! Each tick runs the role's [`Duty`] and then checks the GPU for errors.
//! The writer rotates the pixel quad and uploads it into the shared image;
//! the presenter draws the shared image and presents it. Nothing orders the
//! two processes' ticks against each other.

use std::time::{Duration, Instant};

use dmabuf_core::GpuError;
use gpu_interop::PresentationSurface;
use rendezvous::CancelToken;
use tracing::{error, info, trace};

use crate::config::{Duty, ShareConfig};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopState {
    Running,
    /// A GPU error was reported. Terminal: no further ticks run.
    ErrorHalted(GpuError),
    /// Cancelled, or the tick limit was reached.
    Stopped,
}

pub struct UpdateLoop<'a, G: PresentationSurface> {
    gpu: &'a mut G,
    image: &'a G::Image,
    duty: Duty,
    state: LoopState,
    ticks: u64,
    tick_interval: Duration,
    idle_interval: Duration,
    max_ticks: Option<u64>,
}

impl<'a, G: PresentationSurface> UpdateLoop<'a, G> {
    pub fn new(gpu: &'a mut G, image: &'a G::Image, duty: Duty, config: &ShareConfig) -> Self {
        Self {
            gpu,
            image,
            duty,
            state: LoopState::Running,
            ticks: 0,
            tick_interval: config.tick_interval,
            idle_interval: config.idle_interval,
            max_ticks: config.max_ticks,
        }
    }

    pub fn state(&self) -> &LoopState {
        &self.state
    }

    /// Ticks completed without error.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn duty(&self) -> Duty {
        self.duty
    }

    /// Run one tick now, if the loop is still running.
    pub fn tick(&mut self) -> &LoopState {
        if self.state != LoopState::Running {
            return &self.state;
        }

        let result = self
            .run_duty()
            .and_then(|()| self.gpu.poll_error().map_or(Ok(()), Err));
        match result {
            Ok(()) => {
                self.ticks += 1;
                trace!(tick = self.ticks, duty = ?self.duty, "tick");
                if self.max_ticks.is_some_and(|max| self.ticks >= max) {
                    info!(ticks = self.ticks, "tick limit reached");
                    self.state = LoopState::Stopped;
                }
            }
            Err(e) => {
                error!(tick = self.ticks + 1, "halting update loop: {e}");
                self.state = LoopState::ErrorHalted(e);
            }
        }
        &self.state
    }

    fn run_duty(&mut self) -> Result<(), GpuError> {
        match self.duty {
            Duty::Writer { pixels } => {
                let next = pixels.rotate();
                self.gpu.upload(self.image, &next)?;
                self.gpu.flush();
                self.duty = Duty::Writer { pixels: next };
            }
            Duty::Presenter => {
                self.gpu.draw(self.image)?;
                self.gpu.present()?;
            }
        }
        Ok(())
    }

    /// Tick once per interval until halted, stopped or cancelled.
    ///
    /// The first tick runs one interval after the call.
    pub fn run(&mut self, cancel: &CancelToken) -> &LoopState {
        if self.max_ticks == Some(0) {
            self.state = LoopState::Stopped;
        }
        let mut next_tick = Instant::now() + self.tick_interval;
        while self.state == LoopState::Running {
            let now = Instant::now();
            if now >= next_tick {
                self.tick();
                next_tick += self.tick_interval;
                if next_tick < now {
                    // Fell behind; skip the missed ticks rather than bursting.
                    next_tick = now + self.tick_interval;
                }
                continue;
            }
            if !cancel.sleep(self.idle_interval.min(next_tick - now)) {
                info!(ticks = self.ticks, "update loop cancelled");
                self.state = LoopState::Stopped;
            }
        }
        &self.state
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use dmabuf_core::{
        BufferMetadata, DmaBufHandle, ExportError, Extent, GpuApi, ImportError, PixelQuad,
    };
    use gpu_interop::GpuContextProvider;

    use super::*;

    /// Records every call; fails on request.
    #[derive(Default)]
    struct Recorder {
        uploads: Vec<PixelQuad>,
        draws: u32,
        presents: u32,
        flushes: u32,
        fail_upload_at: Option<usize>,
        error_after_ticks: Option<usize>,
        polls: usize,
    }

    impl GpuContextProvider for Recorder {
        type Image = ();

        fn create_image(&mut self, _: Extent, _: &PixelQuad) -> Result<()> {
            Ok(())
        }

        fn flush(&mut self) {
            self.flushes += 1;
        }

        fn export_image(&mut self, _: &()) -> Result<(DmaBufHandle, BufferMetadata), ExportError> {
            Err(ExportError::unsupported("recorder"))
        }

        fn import_image(
            &mut self,
            _: &DmaBufHandle,
            _: &BufferMetadata,
            _: Extent,
        ) -> Result<(), ImportError> {
            Err(ImportError::unsupported("recorder"))
        }

        fn upload(&mut self, _: &(), pixels: &PixelQuad) -> Result<(), GpuError> {
            if self.fail_upload_at == Some(self.uploads.len()) {
                return Err(GpuError::gl(0x0505));
            }
            self.uploads.push(*pixels);
            Ok(())
        }

        fn read_back(&mut self, _: &()) -> Result<PixelQuad, GpuError> {
            Ok(self.uploads.last().copied().unwrap_or_default())
        }

        fn poll_error(&mut self) -> Option<GpuError> {
            self.polls += 1;
            match self.error_after_ticks {
                Some(n) if self.polls > n => {
                    Some(GpuError::new(GpuApi::Egl, 0x300B, "EGL_BAD_NATIVE_WINDOW"))
                }
                _ => None,
            }
        }
    }

    impl PresentationSurface for Recorder {
        fn draw(&mut self, _: &()) -> Result<(), GpuError> {
            self.draws += 1;
            Ok(())
        }

        fn present(&mut self) -> Result<(), GpuError> {
            self.presents += 1;
            Ok(())
        }
    }

    fn fast_config(max_ticks: Option<u64>) -> ShareConfig {
        ShareConfig {
            tick_interval: Duration::from_millis(2),
            idle_interval: Duration::from_micros(100),
            max_ticks,
            ..ShareConfig::in_dir("/nonexistent")
        }
    }

    fn writer() -> Duty {
        Duty::Writer {
            pixels: PixelQuad::INITIAL,
        }
    }

    #[test]
    fn writer_rotates_and_uploads_each_tick() {
        let mut gpu = Recorder::default();
        let config = fast_config(Some(4));
        let mut update = UpdateLoop::new(&mut gpu, &(), writer(), &config);
        assert_eq!(update.run(&CancelToken::new()), &LoopState::Stopped);
        assert_eq!(update.ticks(), 4);
        // Four rotations bring the quad back around.
        assert_eq!(update.duty(), writer());

        let expected: Vec<_> = std::iter::successors(Some(PixelQuad::INITIAL.rotate()), |q| {
            Some(q.rotate())
        })
        .take(4)
        .collect();
        assert_eq!(gpu.uploads, expected);
        assert_eq!(gpu.flushes, 4);
        assert_eq!(gpu.draws, 0);
    }

    #[test]
    fn presenter_draws_and_presents_each_tick() {
        let mut gpu = Recorder::default();
        let config = fast_config(Some(3));
        UpdateLoop::new(&mut gpu, &(), Duty::Presenter, &config).run(&CancelToken::new());
        assert_eq!((gpu.draws, gpu.presents), (3, 3));
        assert!(gpu.uploads.is_empty());
    }

    #[test]
    fn polled_error_halts_with_no_further_ticks() {
        let mut gpu = Recorder {
            error_after_ticks: Some(2),
            ..Default::default()
        };
        let config = fast_config(Some(10));
        let mut update = UpdateLoop::new(&mut gpu, &(), writer(), &config);
        let state = update.run(&CancelToken::new()).clone();
        assert!(matches!(
            state,
            LoopState::ErrorHalted(GpuError { api: GpuApi::Egl, code: 0x300B, .. })
        ));
        assert_eq!(update.ticks(), 2);

        // A halted loop ignores further ticks.
        update.tick();
        drop(update);
        assert_eq!(gpu.uploads.len(), 3);
        assert_eq!(gpu.polls, 3);
    }

    #[test]
    fn failed_upload_halts_and_keeps_last_good_pixels() {
        let mut gpu = Recorder {
            fail_upload_at: Some(1),
            ..Default::default()
        };
        let config = fast_config(None);
        let mut update = UpdateLoop::new(&mut gpu, &(), writer(), &config);
        let state = update.run(&CancelToken::new()).clone();
        assert_eq!(state, LoopState::ErrorHalted(GpuError::gl(0x0505)));
        assert_eq!(
            update.duty(),
            Duty::Writer {
                pixels: PixelQuad::INITIAL.rotate()
            }
        );
        drop(update);
        assert_eq!(gpu.uploads.len(), 1);
        assert_eq!(gpu.polls, 1);
    }

    #[test]
    fn cancellation_stops_an_unbounded_loop() {
        let mut gpu = Recorder::default();
        let config = ShareConfig {
            tick_interval: Duration::from_secs(3600),
            ..fast_config(None)
        };
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut update = UpdateLoop::new(&mut gpu, &(), Duty::Presenter, &config);
        assert_eq!(update.run(&cancel), &LoopState::Stopped);
        assert_eq!(update.ticks(), 0);
    }

    #[test]
    fn zero_tick_limit_never_ticks() {
        let mut gpu = Recorder::default();
        let config = fast_config(Some(0));
        UpdateLoop::new(&mut gpu, &(), writer(), &config).run(&CancelToken::new());
        assert!(gpu.uploads.is_empty());
    }
}
