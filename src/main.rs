// =============================================================================
// VULKAN TEXTURED QUAD
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  App (winit event loop, input, FPS title)                       │
// │    └── Renderer (per-frame loop, swapchain recreation)          │
// │          └── backend: device, swapchain, pipeline, buffers,     │
// │                       texture, descriptors, sync                │
// └─────────────────────────────────────────────────────────────────┘
//
// =============================================================================

mod app;
mod backend;
mod config;
mod renderer;
mod scene;

use anyhow::{Context, Result};
use config::Config;
use std::fs::File;
use std::io::Write;
use std::time::SystemTime;
use winit::event_loop::{ControlFlow, EventLoop};

fn main() -> Result<()> {
    let (config, source) = Config::load();

    // The log level lives in the config, so the outcome of loading it is
    // only reported once logging is up
    init_logging(&config)?;
    source.log();
    log::debug!("Config: {:?}", config);

    log::info!("Starting Vulkan renderer");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen { "fullscreen" } else { "windowed" }
    );
    log::info!("Present mode: {}", config.graphics.present_mode);

    let event_loop = EventLoop::new().context("Failed to create event loop")?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = app::App::new(config);
    event_loop.run_app(&mut app)?;

    match app.take_error() {
        Some(e) => Err(e),
        None => {
            log::info!("Exited cleanly");
            Ok(())
        }
    }
}

/// RUST_LOG overrides the configured level. Optionally log to a file instead of stderr.
fn init_logging(config: &Config) -> Result<()> {
    use env_logger::{Builder, Env, Target};

    let mut builder = Builder::from_env(Env::default().default_filter_or(&config.debug.log_level));

    if config.debug.log_to_file {
        let mut file = File::create(&config.debug.log_file)
            .with_context(|| format!("Failed to create log file {:?}", config.debug.log_file))?;
        write_log_header(&mut file)
            .with_context(|| format!("Failed to write log file {:?}", config.debug.log_file))?;
        builder.target(Target::Pipe(Box::new(file)));
    }

    builder.try_init().context("Failed to initialize logger")
}

fn write_log_header(out: &mut impl Write) -> std::io::Result<()> {
    writeln!(out, "=== Vulkan Renderer Log ===")?;
    writeln!(out, "Started: {:?}", SystemTime::now())?;
    writeln!(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_file_starts_with_a_header() {
        let mut out = Vec::new();
        write_log_header(&mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("=== Vulkan Renderer Log ==="));
        assert!(lines.next().unwrap().starts_with("Started: "));
        assert_eq!(lines.next(), Some(""));
    }
}
