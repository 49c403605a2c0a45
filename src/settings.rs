use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, RwLock};
use std::time::Duration;

use crate::export::{DEFAULT_PLANNER_YEAR, RegionMarkers};
use crate::pdf::DEFAULT_RASTER_DPI;
use crate::render::DEFAULT_RENDER_TIMEOUT;

pub const CURRENT_VERSION: u32 = 2;
const SETTINGS_FILENAME: &str = "config.yaml";
const APP_NAME: &str = "supernote-viewer";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_version")]
    pub version: u32,

    /// Render worker count; 0 picks one from the available parallelism
    #[serde(default)]
    pub workers: usize,

    #[serde(default = "default_render_timeout_secs")]
    pub render_timeout_secs: u64,

    #[serde(default = "default_raster_dpi")]
    pub raster_dpi: u32,

    #[serde(default = "default_region_begin")]
    pub region_begin: String,

    #[serde(default = "default_region_end")]
    pub region_end: String,

    #[serde(default = "default_planner_year")]
    pub planner_year: i32,

    /// YAML bucket layout replacing the built-in planner
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_config: Option<PathBuf>,
}

fn default_version() -> u32 {
    CURRENT_VERSION
}

fn default_render_timeout_secs() -> u64 {
    DEFAULT_RENDER_TIMEOUT.as_secs()
}

fn default_raster_dpi() -> u32 {
    DEFAULT_RASTER_DPI
}

fn default_region_begin() -> String {
    RegionMarkers::default().begin
}

fn default_region_end() -> String {
    RegionMarkers::default().end
}

fn default_planner_year() -> i32 {
    DEFAULT_PLANNER_YEAR
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            workers: 0,
            render_timeout_secs: default_render_timeout_secs(),
            raster_dpi: default_raster_dpi(),
            region_begin: default_region_begin(),
            region_end: default_region_end(),
            planner_year: default_planner_year(),
            bucket_config: None,
        }
    }
}

static SETTINGS: LazyLock<RwLock<Settings>> = LazyLock::new(|| RwLock::new(Settings::default()));

fn preferred_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|config| config.join(APP_NAME).join(SETTINGS_FILENAME))
}

pub fn load_settings() {
    let Some(path) = preferred_config_path() else {
        warn!("Could not determine config directory, using default settings");
        return;
    };
    if path.exists() {
        load_settings_from_path(&path);
    } else {
        info!("Settings file not found, creating with defaults at {path:?}");
        if let Ok(settings) = SETTINGS.read() {
            save_settings_to_file(&settings, &path);
        }
    }
}

pub fn load_settings_from_path(path: &Path) {
    match fs::read_to_string(path) {
        Ok(content) => match serde_yaml::from_str::<Settings>(&content) {
            Ok(mut settings) => {
                debug!("Loaded settings from {path:?}");

                if settings.version < CURRENT_VERSION {
                    migrate_settings(&mut settings);
                    save_settings_to_file(&settings, path);
                }

                if let Ok(mut global) = SETTINGS.write() {
                    *global = settings;
                }
            }
            Err(e) => {
                error!("Failed to parse settings file {path:?}: {e}");
            }
        },
        Err(e) => {
            error!("Failed to read settings file {path:?}: {e}");
        }
    }
}

fn migrate_settings(settings: &mut Settings) {
    info!(
        "Migrating settings from v{} to v{}",
        settings.version, CURRENT_VERSION
    );

    // v1 accepted a zero DPI and fell back to the default at render time
    if settings.version < 2 && settings.raster_dpi == 0 {
        settings.raster_dpi = DEFAULT_RASTER_DPI;
    }

    settings.version = CURRENT_VERSION;
}

fn save_settings_to_file(settings: &Settings, path: &Path) {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            if let Err(e) = fs::create_dir_all(parent) {
                error!("Failed to create config directory {parent:?}: {e}");
                return;
            }
        }
    }

    let content = generate_settings_yaml(settings);

    match fs::write(path, content) {
        Ok(()) => debug!("Saved settings to {path:?}"),
        Err(e) => error!("Failed to save settings to {path:?}: {e}"),
    }
}

fn generate_settings_yaml(settings: &Settings) -> String {
    let mut content = String::new();

    content.push_str(&format!("version: {}\n", settings.version));
    content.push('\n');
    content.push_str("# Render workers, 0 = available parallelism - 1\n");
    content.push_str(&format!("workers: {}\n", settings.workers));
    content.push_str("# Seconds a render chunk may take before its pages fail\n");
    content.push_str(&format!(
        "render_timeout_secs: {}\n",
        settings.render_timeout_secs
    ));
    content.push_str(&format!("raster_dpi: {}\n", settings.raster_dpi));
    content.push('\n');
    content.push_str("# Lines delimiting the generated block in Markdown files\n");
    content.push_str(&format!("region_begin: \"{}\"\n", settings.region_begin));
    content.push_str(&format!("region_end: \"{}\"\n", settings.region_end));
    content.push('\n');
    content.push_str(&format!("planner_year: {}\n", settings.planner_year));
    match &settings.bucket_config {
        Some(path) => content.push_str(&format!("bucket_config: \"{}\"\n", path.display())),
        None => content.push_str("# bucket_config: \"/path/to/buckets.yaml\"\n"),
    }

    content
}

// Public API for accessing settings

pub fn get_settings() -> Settings {
    SETTINGS.read().map(|s| s.clone()).unwrap_or_default()
}

pub fn get_workers() -> Option<usize> {
    SETTINGS
        .read()
        .ok()
        .map(|s| s.workers)
        .filter(|&w| w > 0)
}

pub fn get_render_timeout() -> Duration {
    SETTINGS
        .read()
        .map(|s| Duration::from_secs(s.render_timeout_secs.max(1)))
        .unwrap_or(DEFAULT_RENDER_TIMEOUT)
}

pub fn get_raster_dpi() -> u32 {
    SETTINGS
        .read()
        .map(|s| s.raster_dpi)
        .unwrap_or_else(|_| default_raster_dpi())
}

pub fn get_region_markers() -> RegionMarkers {
    SETTINGS
        .read()
        .map(|s| RegionMarkers::new(s.region_begin.clone(), s.region_end.clone()))
        .unwrap_or_default()
}

pub fn get_planner_year() -> i32 {
    SETTINGS
        .read()
        .map(|s| s.planner_year)
        .unwrap_or_else(|_| default_planner_year())
}

pub fn get_bucket_config() -> Option<PathBuf> {
    SETTINGS.read().ok().and_then(|s| s.bucket_config.clone())
}

#[cfg(test)]
fn reset_settings() {
    if let Ok(mut settings) = SETTINGS.write() {
        *settings = Settings::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    #[serial]
    fn defaults_without_file() {
        reset_settings();
        assert_eq!(get_workers(), None);
        assert_eq!(get_render_timeout(), Duration::from_secs(120));
        assert_eq!(get_raster_dpi(), 300);
        assert_eq!(get_planner_year(), 2025);
        assert_eq!(get_region_markers(), RegionMarkers::default());
        assert_eq!(get_bucket_config(), None);
    }

    #[test]
    #[serial]
    fn loads_values_from_yaml() {
        reset_settings();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "version: 2\nworkers: 3\nrender_timeout_secs: 10\nregion_begin: \"%% a\"\n\
             region_end: \"%% b\"\nplanner_year: 2026\nbucket_config: /tmp/b.yaml\n",
        )
        .unwrap();

        load_settings_from_path(&path);

        assert_eq!(get_workers(), Some(3));
        assert_eq!(get_render_timeout(), Duration::from_secs(10));
        assert_eq!(get_raster_dpi(), 300);
        assert_eq!(get_region_markers(), RegionMarkers::new("%% a", "%% b"));
        assert_eq!(get_planner_year(), 2026);
        assert_eq!(get_bucket_config(), Some(PathBuf::from("/tmp/b.yaml")));
        reset_settings();
    }

    #[test]
    #[serial]
    fn old_version_is_migrated_and_rewritten() {
        reset_settings();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "version: 1\nraster_dpi: 0\n").unwrap();

        load_settings_from_path(&path);

        assert_eq!(get_raster_dpi(), 300);
        let rewritten: Settings =
            serde_yaml::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(rewritten.version, CURRENT_VERSION);
        assert_eq!(rewritten.raster_dpi, 300);
        reset_settings();
    }

    #[test]
    #[serial]
    fn broken_file_keeps_previous_settings() {
        reset_settings();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "workers: [").unwrap();

        load_settings_from_path(&path);

        assert_eq!(get_settings(), Settings::default());
    }

    #[test]
    fn generated_yaml_parses_back() {
        let settings = Settings {
            workers: 4,
            bucket_config: Some(PathBuf::from("/cfg/buckets.yaml")),
            ..Settings::default()
        };
        let parsed: Settings = serde_yaml::from_str(&generate_settings_yaml(&settings)).unwrap();
        assert_eq!(parsed, settings);
    }
}
