//! Oxidized-Cafe - Latte GPU command stream player
//!
//! Replays a captured PM4 command buffer through the GPU thread and prints
//! the command processor statistics.

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use cafe_core::config::GpuBackend;
use cafe_core::{create_command_queue, BufferStatus, Config};
use cafe_gpu::backend::null::NullBackend;
use cafe_gpu::backend::HostBackend;
use cafe_gpu::{DriverOptions, GpuDriver, GpuThread, NoMemory, ScreenQuad};

#[derive(Parser, Debug)]
#[command(name = "oxidized-cafe")]
#[command(about = "Replay a captured Latte PM4 command buffer", long_about = None)]
struct Args {
    /// Capture of little-endian PM4 words
    capture: PathBuf,

    /// Configuration file (defaults to the user config directory)
    #[arg(long)]
    config: Option<PathBuf>,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<Config> {
    let config = match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    config.context("failed to load configuration")
}

/// Read a capture of little-endian PM4 words
fn read_capture(path: &PathBuf) -> anyhow::Result<Vec<u32>> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    if bytes.len() % 4 != 0 {
        bail!("{} is not a whole number of words ({} bytes)", path.display(), bytes.len());
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config(args.config.as_ref())?;
    cafe_core::logging::init(config.debug.log_level);

    tracing::info!("Starting Oxidized-Cafe");

    let words = read_capture(&args.capture)?;
    tracing::info!("Loaded {} words from {}", words.len(), args.capture.display());

    let backend: Box<dyn HostBackend> = match config.gpu.backend {
        GpuBackend::Null => Box::new(NullBackend::new()),
    };
    let driver = GpuDriver::new(backend, Box::new(NoMemory), DriverOptions::from_config(&config))
        .with_screen(ScreenQuad::load(&config.gpu.shader_resource_dir));

    let (sender, receiver) = create_command_queue(config.gpu.queue_capacity);
    let thread = GpuThread::spawn(driver, receiver).context("failed to start GPU thread")?;

    let id = sender.submit(words).context("command queue closed")?;
    match sender.wait_retired() {
        Some(retired) => match retired.status {
            BufferStatus::Completed => tracing::info!("Command buffer {} completed", id),
            BufferStatus::Aborted { reason } => tracing::error!("Command buffer {} aborted: {}", id, reason),
        },
        None => tracing::warn!("Command queue closed before buffer {} retired", id),
    }

    let driver = thread.stop().context("GPU thread panicked")?;
    println!("{}", driver.stats());
    println!("{}", driver.shaders().stats());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_capture_and_config() {
        let args = Args::try_parse_from(["oxidized-cafe", "frame.bin", "--config", "cafe.toml"]).unwrap();
        assert_eq!(args.capture, PathBuf::from("frame.bin"));
        assert_eq!(args.config, Some(PathBuf::from("cafe.toml")));
    }

    #[test]
    fn test_args_config_is_optional() {
        let args = Args::try_parse_from(["oxidized-cafe", "frame.bin"]).unwrap();
        assert_eq!(args.config, None);
    }

    #[test]
    fn test_args_reject_missing_capture_and_extras() {
        assert!(Args::try_parse_from(["oxidized-cafe"]).is_err());
        assert!(Args::try_parse_from(["oxidized-cafe", "a.bin", "b.bin"]).is_err());
        assert!(Args::try_parse_from(["oxidized-cafe", "a.bin", "--config"]).is_err());
    }
}
