// =============================================================================
// APPLICATION - winit event handling around the renderer
// =============================================================================

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::ActiveEventLoop,
    keyboard::PhysicalKey,
    window::{Fullscreen, Window, WindowAttributes, WindowId},
};

use crate::config::Config;
use crate::renderer::Renderer;

/// Frames per second over roughly one-second windows
pub struct FpsCounter {
    frame_count: u32,
    last_report: Instant,
    last_frame: Instant,
}

impl FpsCounter {
    const REPORT_INTERVAL: Duration = Duration::from_secs(1);

    pub fn new(now: Instant) -> Self {
        Self {
            frame_count: 0,
            last_report: now,
            last_frame: now,
        }
    }

    /// Count a frame. Returns (fps, last frame time in ms) once per interval.
    pub fn tick(&mut self, now: Instant) -> Option<(f32, f32)> {
        let frame_ms = now.duration_since(self.last_frame).as_secs_f32() * 1000.0;
        self.last_frame = now;
        self.frame_count += 1;

        let elapsed = now.duration_since(self.last_report);
        if elapsed < Self::REPORT_INTERVAL {
            return None;
        }

        let fps = self.frame_count as f32 / elapsed.as_secs_f32();
        self.frame_count = 0;
        self.last_report = now;
        Some((fps, frame_ms))
    }
}

pub fn fps_title(base: &str, fps: f32, frame_ms: f32) -> String {
    format!("{} - {:.0} FPS ({:.2}ms)", base, fps, frame_ms)
}

pub struct App {
    config: Config,
    // Dropped before the window
    renderer: Option<Renderer>,
    window: Option<Arc<Window>>,
    is_fullscreen: bool,
    fps: FpsCounter,
    /// First fatal error, handed back to main after the loop exits
    error: Option<anyhow::Error>,
}

impl App {
    pub fn new(config: Config) -> Self {
        let is_fullscreen = config.window.fullscreen;
        Self {
            config,
            renderer: None,
            window: None,
            is_fullscreen,
            fps: FpsCounter::new(Instant::now()),
            error: None,
        }
    }

    /// Error that stopped the event loop, if any
    pub fn take_error(&mut self) -> Option<anyhow::Error> {
        self.error.take()
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("{:#}", error);
        if self.error.is_none() {
            self.error = Some(error);
        }
        event_loop.exit();
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let mut window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ))
            .with_resizable(self.config.window.resizable);

        if self.config.window.fullscreen {
            window_attributes = window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = Arc::new(
            event_loop
                .create_window(window_attributes)
                .context("Failed to create window")?,
        );

        let renderer = Renderer::new(window.clone(), self.config.clone())
            .context("Failed to initialize Vulkan")?;

        self.renderer = Some(renderer);
        self.window = Some(window);
        self.fps = FpsCounter::new(Instant::now());
        Ok(())
    }

    fn toggle_fullscreen(&mut self) {
        let Some(window) = self.window.as_ref() else {
            return;
        };

        self.is_fullscreen = !self.is_fullscreen;
        if self.is_fullscreen {
            window.set_fullscreen(Some(Fullscreen::Borderless(None)));
            log::info!("Entered fullscreen mode");
        } else {
            window.set_fullscreen(None);
            log::info!("Exited fullscreen mode");
        }

        // Some platforms don't send Resized for fullscreen switches
        let size = window.inner_size();
        if let Some(renderer) = self.renderer.as_mut() {
            renderer.notify_resized(size.width, size.height);
        }
    }

    fn update_fps(&mut self) {
        let Some((fps, frame_ms)) = self.fps.tick(Instant::now()) else {
            return;
        };

        log::debug!("{:.0} FPS ({:.2}ms)", fps, frame_ms);
        if self.config.debug.show_fps {
            if let Some(window) = self.window.as_ref() {
                window.set_title(&fps_title(&self.config.window.title, fps, frame_ms));
            }
        }
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        if let Err(e) = self.init(event_loop) {
            self.fail(event_loop, e);
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                if let Some(renderer) = self.renderer.as_ref() {
                    if let Err(e) = renderer.wait_idle() {
                        log::warn!("Failed to wait for device idle: {:#}", e);
                    }
                }
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.notify_resized(size.width, size.height);
                }
            }

            WindowEvent::RedrawRequested => {
                let Some(renderer) = self.renderer.as_mut() else {
                    return;
                };

                match renderer.draw_frame() {
                    Ok(true) => self.update_fps(),
                    Ok(false) => {}
                    Err(e) => self.fail(event_loop, e.context("Failed to draw frame")),
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                if !event.state.is_pressed() || event.repeat {
                    return;
                }
                let PhysicalKey::Code(key) = event.physical_key else {
                    return;
                };

                if key == self.config.controls.quit_key() {
                    log::info!("{:?} pressed, exiting...", key);
                    event_loop.exit();
                } else if key == self.config.controls.fullscreen_key() {
                    self.toggle_fullscreen();
                }
            }

            _ => {}
        }
    }

    /// Continuous rendering: ask for the next frame as soon as events are drained
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = self.window.as_ref() {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        // Tear down Vulkan while the window still exists
        self.renderer = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fps_counter_is_quiet_within_the_interval() {
        let start = Instant::now();
        let mut counter = FpsCounter::new(start);

        for i in 1..10 {
            assert!(counter.tick(start + Duration::from_millis(i * 100)).is_none());
        }
    }

    #[test]
    fn fps_counter_reports_after_one_second() {
        let start = Instant::now();
        let mut counter = FpsCounter::new(start);

        let mut report = None;
        for i in 1..=60u32 {
            report = counter.tick(start + Duration::from_micros(u64::from(i) * 16_667));
        }

        let (fps, frame_ms) = report.expect("should report at the one second mark");
        assert!((fps - 60.0).abs() < 0.5, "fps = {}", fps);
        assert!((frame_ms - 16.667).abs() < 0.01, "frame_ms = {}", frame_ms);
    }

    #[test]
    fn fps_counter_resets_after_reporting() {
        let start = Instant::now();
        let mut counter = FpsCounter::new(start);

        assert!(counter.tick(start + Duration::from_secs(1)).is_some());
        assert!(counter.tick(start + Duration::from_millis(1500)).is_none());

        let (fps, _) = counter
            .tick(start + Duration::from_secs(2))
            .expect("second report");
        assert!((fps - 2.0).abs() < 1e-3);
    }

    #[test]
    fn title_shows_fps_and_frame_time() {
        assert_eq!(fps_title("Vulkan", 59.6, 16.7777), "Vulkan - 60 FPS (16.78ms)");
    }
}
