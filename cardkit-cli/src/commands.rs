//! CLI subcommand handlers.

use cardkit_core::config::{load_config_from, user_config_path, workspace_config_path};
use cardkit_core::persistence::{atomic_write_json, read_document};
use cardkit_core::schema::parse_version;
use cardkit_core::sources::load_metrics;
use cardkit_core::validate::{check_complete, declared_version, validate_document};
use cardkit_core::{
    CardValidation, CardkitConfig, InMemoryStore, JsonFileStore, MetadataStore, ModelCard,
    OutputFormat, PartialModelCard, TemplateSelector, Toolkit, Violation,
};
use std::path::{Path, PathBuf};

use crate::Commands;
use crate::ConfigAction;

/// The directory a command runs in, plus the user config layered under it.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    user_config: Option<PathBuf>,
}

impl Workspace {
    /// A workspace that also reads the per-user config file.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            user_config: user_config_path(),
        }
    }

    /// Replace the user config file; `None` skips that layer.
    pub fn with_user_config(mut self, user_config: Option<PathBuf>) -> Self {
        self.user_config = user_config;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Relative CLI paths are taken relative to the workspace.
    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_relative() {
            self.root.join(path)
        } else {
            path.to_path_buf()
        }
    }

    fn config(&self) -> anyhow::Result<CardkitConfig> {
        let config = load_config_from(self.user_config.as_deref(), Some(&self.root), None)
            .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
        Ok(config.resolve_paths(&self.root))
    }

    fn toolkit(&self) -> anyhow::Result<Toolkit> {
        let toolkit = Toolkit::new(self.config()?)?;
        tracing::debug!(
            workspace = %self.root.display(),
            target = %toolkit.target_version(),
            "toolkit ready"
        );
        Ok(toolkit)
    }
}

/// Handle a CLI subcommand.
pub fn handle_command(command: Commands, workspace: &Workspace) -> anyhow::Result<()> {
    match command {
        Commands::Config { action } => handle_config(action, workspace),
        Commands::Scaffold {
            model_id,
            store,
            metrics,
            annotations,
            output,
        } => handle_scaffold(
            workspace,
            &model_id,
            store.as_deref(),
            metrics.as_deref(),
            annotations.as_deref(),
            &output,
        ),
        Commands::Validate { card, complete } => handle_validate(workspace, &card, complete),
        Commands::Merge {
            base,
            update,
            output,
        } => handle_merge(workspace, &base, &update, output.as_deref()),
        Commands::Migrate { card, to, output } => {
            handle_migrate(workspace, &card, to.as_deref(), output.as_deref())
        }
        Commands::Render {
            card,
            format,
            template,
            output,
        } => handle_render(
            workspace,
            &card,
            format.as_deref(),
            template,
            output.as_deref(),
        ),
        Commands::Schemas => handle_schemas(workspace),
        Commands::Templates => handle_templates(workspace),
    }
}

fn print_violations(violations: &[Violation]) {
    for violation in violations {
        println!("  {}", violation);
    }
}

fn handle_config(action: ConfigAction, workspace: &Workspace) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_path = workspace_config_path(workspace.root());
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }
            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let default_config = CardkitConfig::default();
            let toml_str = toml::to_string_pretty(&default_config)?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let config = workspace.config()?;
            let toml_str = toml::to_string_pretty(&config)?;
            println!("{}", toml_str);
            Ok(())
        }
    }
}

fn handle_scaffold(
    workspace: &Workspace,
    model_id: &str,
    store: Option<&Path>,
    metrics: Option<&Path>,
    annotations: Option<&Path>,
    output: &Path,
) -> anyhow::Result<()> {
    let toolkit = workspace.toolkit()?;

    let store: Box<dyn MetadataStore> = match store {
        Some(path) => Box::new(JsonFileStore::open(&workspace.resolve(path))?),
        None => Box::new(InMemoryStore::new()),
    };
    let metrics = match metrics {
        Some(path) => load_metrics(&workspace.resolve(path))?,
        None => Vec::new(),
    };
    let annotations = match annotations {
        Some(path) => Some(PartialModelCard::from_document(&read_document(
            &workspace.resolve(path),
        )?)?),
        None => None,
    };

    let card = toolkit.scaffold(model_id, store.as_ref(), &metrics, annotations.as_ref())?;
    let output = workspace.resolve(output);
    atomic_write_json(&output, &card.to_document()?)?;
    println!("Wrote model card to {}", output.display());

    let missing = card.missing_sections();
    if !card.is_complete() {
        println!(
            "Card is not yet renderable; missing sections: {}",
            missing.join(", ")
        );
    }
    Ok(())
}

fn handle_validate(workspace: &Workspace, card: &Path, complete: bool) -> anyhow::Result<()> {
    let toolkit = workspace.toolkit()?;
    let path = workspace.resolve(card);
    let document = read_document(&path)?;

    let mut result = validate_document(&document, toolkit.registry())?;
    if complete {
        result = result.and(check_complete(&ModelCard::from_document(&document)?));
    }
    if result.is_valid() {
        println!(
            "{} is a valid {} model card",
            path.display(),
            declared_version(&document).unwrap_or("?")
        );
        return Ok(());
    }
    println!("{} has {} problem(s):", path.display(), result.violations().len());
    print_violations(result.violations());
    anyhow::bail!("validation failed")
}

fn handle_merge(
    workspace: &Workspace,
    base: &Path,
    update: &Path,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    let toolkit = workspace.toolkit()?;
    let base_path = workspace.resolve(base);
    let base = ModelCard::from_document(&read_document(&base_path)?)?;
    let update = PartialModelCard::from_document(&read_document(&workspace.resolve(update))?)?;

    let merged = toolkit.merge(&base, &update)?;
    let output = output
        .map(|p| workspace.resolve(p))
        .unwrap_or(base_path);
    atomic_write_json(&output, &merged.to_document()?)?;
    println!("Wrote merged card to {}", output.display());
    Ok(())
}

fn handle_migrate(
    workspace: &Workspace,
    card: &Path,
    to: Option<&str>,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    let toolkit = workspace.toolkit()?;
    let input = workspace.resolve(card);
    let document = read_document(&input)?;

    let Some(declared) = declared_version(&document) else {
        anyhow::bail!("{} does not declare a schema_version", input.display());
    };
    let from = parse_version(declared)?;
    let to = match to {
        Some(raw) => parse_version(raw)?,
        None => toolkit.target_version().clone(),
    };
    if from == to {
        println!("{} is already at {}", input.display(), to);
        return Ok(());
    }

    let migrated = toolkit.migrator().migrate_document(&document, &from, &to)?;
    let output = output
        .map(|p| workspace.resolve(p))
        .unwrap_or(input);
    atomic_write_json(&output, &migrated)?;
    println!("Migrated {} -> {}, wrote {}", from, to, output.display());
    Ok(())
}

fn handle_render(
    workspace: &Workspace,
    card: &Path,
    format: Option<&str>,
    template: Option<String>,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    let toolkit = workspace.toolkit()?;
    let document = read_document(&workspace.resolve(card))?;

    let selector = match (template, format) {
        (Some(name), _) => TemplateSelector::Named(name),
        (None, Some(format)) => TemplateSelector::Default(
            format.parse::<OutputFormat>().map_err(|e| anyhow::anyhow!(e))?,
        ),
        (None, None) => TemplateSelector::Default(toolkit.config().render.default_format),
    };

    let validated = match toolkit.prepare(&document)? {
        CardValidation::Valid(card) => card,
        CardValidation::Invalid(violations) => {
            println!("Card cannot be rendered, {} problem(s):", violations.len());
            print_violations(&violations);
            anyhow::bail!("validation failed");
        }
    };

    let output = output.map(|p| workspace.resolve(p));
    let written = toolkit.export(&validated, &selector, output.as_deref())?;
    println!("Rendered {} to {}", selector, written.display());
    Ok(())
}

fn handle_schemas(workspace: &Workspace) -> anyhow::Result<()> {
    let toolkit = workspace.toolkit()?;
    let target = toolkit.target_version();
    println!("Schema versions:");
    for version in toolkit.registry().versions() {
        let marker = if &version == target { " (target)" } else { "" };
        println!("  {}{}", version, marker);
    }
    Ok(())
}

fn handle_templates(workspace: &Workspace) -> anyhow::Result<()> {
    let toolkit = workspace.toolkit()?;
    let templates = toolkit.renderer().templates();
    println!("Templates ({}):", templates.len());
    for name in templates {
        println!("  {}", name);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    fn write_json(dir: &Path, name: &str, value: serde_json::Value) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, value.to_string()).unwrap();
        path
    }

    /// Run a command without the developer's own user config.
    fn run(command: Commands, workspace: &Path) -> anyhow::Result<()> {
        handle_command(command, &Workspace::new(workspace).with_user_config(None))
    }

    fn legacy_card() -> serde_json::Value {
        json!({
            "schema_version": "0.0.2",
            "model_details": {"name": "census-income", "licenses": [{"identifier": "MIT"}]},
            "model_parameters": {"model_architecture": "gbdt"},
            "quantitative_analysis": {"performance_metrics": [{"type": "accuracy", "value": 0.9}]},
            "considerations": {"limitations": ["1994 census data"]}
        })
    }

    #[test]
    fn test_config_init_creates_file() {
        let dir = TempDir::new().unwrap();
        let workspace = dir.path();

        let command = Commands::Config {
            action: ConfigAction::Init,
        };
        run(command, workspace).unwrap();

        let config_path = workspace.join(".cardkit").join("config.toml");
        let content = std::fs::read_to_string(&config_path).unwrap();
        let parsed: CardkitConfig = toml::from_str(&content).unwrap();
        assert_eq!(parsed, CardkitConfig::default());
    }

    #[test]
    fn test_user_config_layer_is_optional() {
        let dir = TempDir::new().unwrap();
        let user_config = dir.path().join("user.toml");
        std::fs::write(&user_config, "target_version = \"0.0.2\"\n").unwrap();
        let root = dir.path().join("ws");
        std::fs::create_dir_all(&root).unwrap();

        let with_user = Workspace::new(&root).with_user_config(Some(user_config));
        assert_eq!(with_user.config().unwrap().target_version, "0.0.2");

        let isolated = Workspace::new(&root).with_user_config(None);
        let config = isolated.config().unwrap();
        assert_eq!(config.target_version, "0.1.0");
        assert_eq!(config.output_dir, root.join("model_card"));
    }

    #[test]
    fn test_config_init_idempotent() {
        let dir = TempDir::new().unwrap();
        let workspace = dir.path();
        let config_path = workspace.join(".cardkit").join("config.toml");

        run(
            Commands::Config {
                action: ConfigAction::Init,
            },
            workspace,
        )
        .unwrap();
        std::fs::write(&config_path, "target_version = \"0.0.2\"\n").unwrap();
        run(
            Commands::Config {
                action: ConfigAction::Init,
            },
            workspace,
        )
        .unwrap();

        assert_eq!(
            std::fs::read_to_string(&config_path).unwrap(),
            "target_version = \"0.0.2\"\n"
        );
    }

    #[test]
    fn test_migrate_then_render() {
        let dir = TempDir::new().unwrap();
        let workspace = dir.path();
        write_json(workspace, "card.json", legacy_card());

        run(
            Commands::Migrate {
                card: PathBuf::from("card.json"),
                to: None,
                output: Some(PathBuf::from("card.v010.json")),
            },
            workspace,
        )
        .unwrap();
        let migrated = read_document(&workspace.join("card.v010.json")).unwrap();
        assert_eq!(migrated["schema_version"], "0.1.0");
        assert_eq!(
            migrated["quantitative_analysis"]["performance_metrics"][0]["name"],
            "accuracy"
        );

        run(
            Commands::Render {
                card: PathBuf::from("card.json"),
                format: Some("md".into()),
                template: None,
                output: None,
            },
            workspace,
        )
        .unwrap();
        let rendered =
            std::fs::read_to_string(workspace.join("model_card").join("model_card.md")).unwrap();
        assert!(rendered.contains("# Model Card for census-income"));
    }

    #[test]
    fn test_validate_reports_failure() {
        let dir = TempDir::new().unwrap();
        let workspace = dir.path();
        write_json(
            workspace,
            "bad.json",
            json!({"schema_version": "0.1.0", "model_details": {}}),
        );
        let result = run(
            Commands::Validate {
                card: PathBuf::from("bad.json"),
                complete: false,
            },
            workspace,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_scaffold_and_merge() {
        let dir = TempDir::new().unwrap();
        let workspace = dir.path();
        write_json(
            workspace,
            "mlmd.json",
            json!({"models": {"census": {"artifacts": [
                {"id": "12", "type": "Model", "properties": {"name": "census-income"}}
            ]}}}),
        );
        write_json(
            workspace,
            "eval.json",
            json!([{"name": "accuracy", "value": 0.9}]),
        );

        run(
            Commands::Scaffold {
                model_id: "census".into(),
                store: Some(PathBuf::from("mlmd.json")),
                metrics: Some(PathBuf::from("eval.json")),
                annotations: None,
                output: PathBuf::from("card.json"),
            },
            workspace,
        )
        .unwrap();

        write_json(
            workspace,
            "update.json",
            json!({"quantitative_analysis": {"performance_metrics": [
                {"name": "accuracy", "value": 0.95},
                {"name": "f1", "value": 0.8}
            ]}}),
        );
        run(
            Commands::Merge {
                base: PathBuf::from("card.json"),
                update: PathBuf::from("update.json"),
                output: None,
            },
            workspace,
        )
        .unwrap();

        let card = ModelCard::from_document(&read_document(&workspace.join("card.json")).unwrap())
            .unwrap();
        let metrics: Vec<(&str, f64)> = card
            .metrics()
            .iter()
            .map(|m| (m.name.as_str(), m.value))
            .collect();
        assert_eq!(metrics, vec![("accuracy", 0.95), ("f1", 0.8)]);
        assert_eq!(
            card.model_details().unwrap().name.as_deref(),
            Some("census-income")
        );
    }

    #[test]
    fn test_render_unknown_template() {
        let dir = TempDir::new().unwrap();
        let workspace = dir.path();
        write_json(workspace, "card.json", legacy_card());
        let result = run(
            Commands::Render {
                card: PathBuf::from("card.json"),
                format: None,
                template: Some("fancy.html".into()),
                output: None,
            },
            workspace,
        );
        assert!(result.is_err());
        assert!(!workspace.join("model_card").exists());
    }
}
