// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// This module handles loading and parsing configuration from config.toml.
// Every section falls back to its defaults, so a missing or partial file
// still yields a runnable setup.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use winit::keyboard::KeyCode;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub assets: AssetsConfig,
    pub scene: SceneConfig,
    pub debug: DebugConfig,
    pub controls: ControlsConfig,
}

/// Window settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
    pub resizable: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Vulkan".to_string(),
            width: 800,
            height: 600,
            fullscreen: false,
            resizable: true,
        }
    }
}

/// Graphics settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub present_mode: String,
    pub clear_color: [f32; 4],
    pub max_frames_in_flight: usize,
    pub anisotropy: bool,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "mailbox".to_string(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            max_frames_in_flight: 2,
            anisotropy: true,
        }
    }
}

/// Paths of the pre-compiled shaders and the quad texture
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AssetsConfig {
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
    pub texture: PathBuf,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            vertex_shader: PathBuf::from("resources/vert.spv"),
            fragment_shader: PathBuf::from("resources/frag.spv"),
            texture: PathBuf::from("resources/textures/vox.png"),
        }
    }
}

/// Camera and animation parameters for the quad
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    pub rotation_degrees_per_second: f32,
    pub camera_eye: [f32; 3],
    pub camera_target: [f32; 3],
    pub camera_up: [f32; 3],
    pub fov_degrees: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            rotation_degrees_per_second: 90.0,
            camera_eye: [2.0, 2.0, 2.0],
            camera_target: [0.0, 0.0, 0.0],
            camera_up: [0.0, 0.0, 1.0],
            fov_degrees: 45.0,
            near: 0.1,
            far: 10.0,
        }
    }
}

/// Debug settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_level: String,
    pub log_to_file: bool,
    pub log_file: String,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_level: "info".to_string(),
            log_to_file: false,
            log_file: "vulkan_debug.log".to_string(),
            show_fps: true,
        }
    }
}

/// Control key bindings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControlsConfig {
    pub fullscreen_key: String,
    pub quit_key: String,
}

impl Default for ControlsConfig {
    fn default() -> Self {
        Self {
            fullscreen_key: "F11".to_string(),
            quit_key: "Escape".to_string(),
        }
    }
}

impl ControlsConfig {
    pub fn quit_key(&self) -> KeyCode {
        parse_key(&self.quit_key).unwrap_or_else(|| {
            log::warn!("Unknown quit key '{}', defaulting to Escape", self.quit_key);
            KeyCode::Escape
        })
    }

    pub fn fullscreen_key(&self) -> KeyCode {
        parse_key(&self.fullscreen_key).unwrap_or_else(|| {
            log::warn!("Unknown fullscreen key '{}', defaulting to F11", self.fullscreen_key);
            KeyCode::F11
        })
    }
}

/// Map a key name from the config file to a physical key code.
fn parse_key(name: &str) -> Option<KeyCode> {
    let key = match name.to_ascii_lowercase().as_str() {
        "escape" | "esc" => KeyCode::Escape,
        "space" => KeyCode::Space,
        "enter" | "return" => KeyCode::Enter,
        "tab" => KeyCode::Tab,
        "f1" => KeyCode::F1,
        "f2" => KeyCode::F2,
        "f3" => KeyCode::F3,
        "f4" => KeyCode::F4,
        "f5" => KeyCode::F5,
        "f6" => KeyCode::F6,
        "f7" => KeyCode::F7,
        "f8" => KeyCode::F8,
        "f9" => KeyCode::F9,
        "f10" => KeyCode::F10,
        "f11" => KeyCode::F11,
        "f12" => KeyCode::F12,
        "f" => KeyCode::KeyF,
        "q" => KeyCode::KeyQ,
        _ => return None,
    };
    Some(key)
}

pub const CONFIG_PATH: &str = "config.toml";

/// Where the active configuration came from. Reading happens before the
/// logger exists, so the outcome is reported afterwards with `log`.
#[derive(Debug)]
pub enum ConfigSource {
    File(PathBuf),
    Missing(PathBuf),
    /// The file exists but couldn't be read or parsed; defaults are in use
    Invalid(PathBuf, anyhow::Error),
}

impl ConfigSource {
    pub fn log(&self) {
        match self {
            ConfigSource::File(path) => log::info!("Loaded configuration from {:?}", path),
            ConfigSource::Missing(path) => {
                log::info!("Config file not found at {:?}, using defaults", path)
            }
            ConfigSource::Invalid(path, e) => {
                log::warn!("Failed to load {:?}: {:#}. Using defaults.", path, e)
            }
        }
    }
}

impl Config {
    /// Load `config.toml` from the working directory
    pub fn load() -> (Self, ConfigSource) {
        Self::load_or_default(CONFIG_PATH)
    }

    /// Load a config file, falling back to defaults when it is missing or invalid
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> (Self, ConfigSource) {
        let path = path.as_ref();

        if !path.exists() {
            return (Config::default(), ConfigSource::Missing(path.to_path_buf()));
        }

        match Self::load_from_path(path) {
            Ok(config) => (config, ConfigSource::File(path.to_path_buf())),
            Err(e) => (Config::default(), ConfigSource::Invalid(path.to_path_buf(), e)),
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Preferred present mode as Vulkan enum. The swapchain falls back to
    /// FIFO when the surface doesn't offer it.
    pub fn present_mode(&self) -> ash::vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => ash::vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => ash::vk::PresentModeKHR::MAILBOX,
            "fifo" => ash::vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => ash::vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to MAILBOX",
                    self.graphics.present_mode
                );
                ash::vk::PresentModeKHR::MAILBOX
            }
        }
    }

    /// Number of frames the CPU may record ahead of the GPU (at least one).
    pub fn frames_in_flight(&self) -> usize {
        if self.graphics.max_frames_in_flight == 0 {
            log::warn!("max_frames_in_flight = 0 is invalid, using 1");
            return 1;
        }
        self.graphics.max_frames_in_flight
    }

    /// Validation layers follow the build profile, like a debug/release switch.
    pub fn validation_enabled(&self) -> bool {
        cfg!(debug_assertions) && self.debug.validation_layers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk;

    #[test]
    fn defaults_match_tutorial_setup() {
        let config = Config::default();
        assert_eq!(config.window.width, 800);
        assert_eq!(config.window.height, 600);
        assert_eq!(config.frames_in_flight(), 2);
        assert_eq!(config.present_mode(), vk::PresentModeKHR::MAILBOX);
        assert_eq!(config.assets.texture, PathBuf::from("resources/textures/vox.png"));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config = Config::from_toml_str(
            r#"
            [window]
            title = "Cloth"

            [graphics]
            present_mode = "fifo"
            "#,
        )
        .unwrap();

        assert_eq!(config.window.title, "Cloth");
        assert_eq!(config.window.width, 800);
        assert_eq!(config.present_mode(), vk::PresentModeKHR::FIFO);
        assert_eq!(config.graphics.clear_color, [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(config.scene.fov_degrees, 45.0);
    }

    #[test]
    fn malformed_file_is_an_error() {
        assert!(Config::from_toml_str("[window\nwidth = ").is_err());
        assert!(Config::from_toml_str("[window]\nwidth = \"wide\"").is_err());
    }

    fn scratch_file(name: &str, content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("vulkan-cloth-sim-{}-{}", std::process::id(), name));
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn missing_file_yields_defaults() {
        let (config, source) = Config::load_or_default("definitely/not/here.toml");
        assert_eq!(config.window.title, "Vulkan");
        assert!(matches!(source, ConfigSource::Missing(_)));
    }

    #[test]
    fn malformed_file_falls_back_to_defaults_and_keeps_the_error() {
        let path = scratch_file("malformed.toml", "[window\nwidth = ");

        let (config, source) = Config::load_or_default(&path);
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.window.width, 800);
        match source {
            ConfigSource::Invalid(p, e) => {
                assert_eq!(p, path);
                assert!(format!("{:#}", e).contains("Failed to parse config file"));
            }
            other => panic!("expected an invalid config source, got {:?}", other),
        }
    }

    #[test]
    fn valid_file_is_used() {
        let path = scratch_file("valid.toml", "[window]\nwidth = 1024\n");

        let (config, source) = Config::load_or_default(&path);
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.window.width, 1024);
        assert!(matches!(source, ConfigSource::File(_)));
    }

    #[test]
    fn unknown_present_mode_falls_back_to_mailbox() {
        let mut config = Config::default();
        config.graphics.present_mode = "vsync-ish".to_string();
        assert_eq!(config.present_mode(), vk::PresentModeKHR::MAILBOX);

        config.graphics.present_mode = "Immediate".to_string();
        assert_eq!(config.present_mode(), vk::PresentModeKHR::IMMEDIATE);
    }

    #[test]
    fn zero_frames_in_flight_is_clamped() {
        let mut config = Config::default();
        config.graphics.max_frames_in_flight = 0;
        assert_eq!(config.frames_in_flight(), 1);
    }

    #[test]
    fn key_names_resolve() {
        let controls = ControlsConfig {
            fullscreen_key: "f".to_string(),
            quit_key: "ESC".to_string(),
        };
        assert_eq!(controls.fullscreen_key(), KeyCode::KeyF);
        assert_eq!(controls.quit_key(), KeyCode::Escape);

        let controls = ControlsConfig {
            fullscreen_key: "Hyper".to_string(),
            quit_key: "Meta".to_string(),
        };
        assert_eq!(controls.fullscreen_key(), KeyCode::F11);
        assert_eq!(controls.quit_key(), KeyCode::Escape);
    }
}
