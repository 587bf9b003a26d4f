use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context as _, Result};
use clap::{Parser, ValueEnum};
use dmabuf_share::config::SOCKET_DIR_ENV;
use dmabuf_share::{logging, run_session, LoopState, Role, ShareConfig, WriterPolicy};
use gpu_interop::egl::EglProvider;
use gpu_interop::shm::ShmProvider;
use gpu_interop::PresentationSurface;
use rendezvous::CancelToken;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// Headless EGL with dma-buf export and import.
    Egl,
    /// memfd-backed images; no GPU needed.
    Shm,
}

/// Share a GPU buffer between two processes through a dma-buf handle.
#[derive(Debug, Parser)]
#[command(name = "dmabuf-share", version, about)]
struct Args {
    /// Side of the handoff this process plays.
    #[arg(value_enum)]
    role: Role,

    #[arg(long, value_enum, default_value_t = Backend::Egl)]
    backend: Backend,

    /// Which role rotates the pixels. Give both processes the same value.
    #[arg(long, value_enum, default_value_t = WriterPolicy::Consumer)]
    writer: WriterPolicy,

    /// Directory holding both sockets. Defaults to the system temp dir.
    #[arg(long, env = SOCKET_DIR_ENV)]
    socket_dir: Option<PathBuf>,

    /// Update loop interval in milliseconds.
    #[arg(long, default_value_t = 1000, value_parser = clap::value_parser!(u64).range(1..))]
    tick_ms: u64,

    /// Stop after this many ticks instead of running forever.
    #[arg(long)]
    ticks: Option<u64>,
}

impl Args {
    fn config(&self) -> ShareConfig {
        let dir = self
            .socket_dir
            .clone()
            .unwrap_or_else(ShareConfig::default_socket_dir);
        ShareConfig {
            tick_interval: Duration::from_millis(self.tick_ms),
            writer: self.writer,
            max_ticks: self.ticks,
            ..ShareConfig::in_dir(dir)
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    logging::init("info");

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<()> {
    let config = args.config();
    info!(
        role = %args.role,
        backend = ?args.backend,
        writer = ?config.writer,
        consumer_socket = %config.consumer.path().display(),
        "starting"
    );
    match args.backend {
        Backend::Egl => {
            let mut gpu = EglProvider::new(config.extent).context("opening EGL display")?;
            share(&mut gpu, args.role, &config)
        }
        Backend::Shm => share(&mut ShmProvider::new(), args.role, &config),
    }
}

fn share<G: PresentationSurface>(gpu: &mut G, role: Role, config: &ShareConfig) -> Result<()> {
    let cancel = CancelToken::new();
    let state = run_session(gpu, role, config, &cancel)
        .with_context(|| format!("{role} handoff failed"))?;
    match state {
        LoopState::ErrorHalted(e) => bail!("update loop halted: {e}"),
        state => {
            info!(?state, "done");
            Ok(())
        }
    }
}
