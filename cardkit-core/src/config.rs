//! Configuration for the cardkit pipeline.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! workspace config file -> environment -> explicit overrides.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::render::OutputFormat;
use crate::schema::CURRENT_SCHEMA_VERSION;
use crate::sources::{FieldMapping, default_mappings};

const APP_QUALIFIER: &str = "dev";
const APP_ORGANIZATION: &str = "cardkit";
const APP_NAME: &str = "cardkit";
const WORKSPACE_DIR: &str = ".cardkit";
const CONFIG_FILE: &str = "config.toml";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardkitConfig {
    /// Extra schema versions to register next to the built-in ones.
    #[serde(default)]
    pub schema_dir: Option<PathBuf>,
    /// User templates (`*.hbs`) to register next to the built-in ones.
    #[serde(default)]
    pub template_dir: Option<PathBuf>,
    /// Where rendered cards are written when no explicit path is given.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Version documents are migrated to before rendering.
    #[serde(default = "default_target_version")]
    pub target_version: String,
    #[serde(default)]
    pub render: RenderConfig,
    /// How metadata-store records map onto card fields.
    #[serde(default = "default_mappings")]
    pub field_mappings: Vec<FieldMapping>,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("model_card")
}

fn default_target_version() -> String {
    CURRENT_SCHEMA_VERSION.to_string()
}

impl Default for CardkitConfig {
    fn default() -> Self {
        Self {
            schema_dir: None,
            template_dir: None,
            output_dir: default_output_dir(),
            target_version: default_target_version(),
            render: RenderConfig::default(),
            field_mappings: default_mappings(),
        }
    }
}

/// Renderer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderConfig {
    #[serde(default = "default_format")]
    pub default_format: OutputFormat,
    /// Base name of exported files, extension added per format.
    #[serde(default = "default_file_stem")]
    pub file_stem: String,
}

fn default_format() -> OutputFormat {
    OutputFormat::Html
}

fn default_file_stem() -> String {
    "model_card".to_string()
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            default_format: default_format(),
            file_stem: default_file_stem(),
        }
    }
}

impl CardkitConfig {
    /// Output path for a format under `output_dir`.
    pub fn output_path(&self, format: OutputFormat) -> PathBuf {
        self.output_dir
            .join(format!("{}.{}", self.render.file_stem, format.extension()))
    }

    /// Resolve relative directories against `base`.
    pub fn resolve_paths(mut self, base: &Path) -> Self {
        let absolute = |p: PathBuf| if p.is_relative() { base.join(p) } else { p };
        self.schema_dir = self.schema_dir.map(absolute);
        self.template_dir = self.template_dir.map(absolute);
        self.output_dir = absolute(self.output_dir);
        self
    }
}

/// Path of the per-user config file, if the platform has a config directory.
pub fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
}

/// Path of the workspace config file.
pub fn workspace_config_path(workspace: &Path) -> PathBuf {
    workspace.join(WORKSPACE_DIR).join(CONFIG_FILE)
}

/// Load configuration with layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `CARDKIT_`)
/// 3. Workspace-local config (`.cardkit/config.toml`)
/// 4. User config (`~/.config/cardkit/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&CardkitConfig>,
) -> Result<CardkitConfig, Box<figment::Error>> {
    load_config_from(user_config_path().as_deref(), workspace, overrides)
}

/// Like [`load_config`], with the user config file given explicitly.
/// `None` skips the user layer.
pub fn load_config_from(
    user_config: Option<&Path>,
    workspace: Option<&Path>,
    overrides: Option<&CardkitConfig>,
) -> Result<CardkitConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(CardkitConfig::default()));

    if let Some(user_config) = user_config
        && user_config.exists()
    {
        figment = figment.merge(Toml::file(user_config));
    }

    if let Some(ws) = workspace {
        let ws_config = workspace_config_path(ws);
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // CARDKIT_TARGET_VERSION, CARDKIT_RENDER__DEFAULT_FORMAT, etc.
    figment = figment.merge(Env::prefixed("CARDKIT_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

/// Check whether a user-level or workspace-level config file exists.
pub fn config_exists(workspace: Option<&Path>) -> bool {
    if user_config_path().is_some_and(|p| p.exists()) {
        return true;
    }
    workspace.is_some_and(|ws| workspace_config_path(ws).exists())
}
