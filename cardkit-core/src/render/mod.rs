//! Template rendering of validated model cards.
//!
//! Templates are Handlebars, evaluated in strict mode against the pruned card
//! document. A template that names a member the card does not carry fails
//! instead of printing nothing, so optional members must be guarded with
//! `{{#if}}` or `{{#with}}..{{else}}`. HTML templates get HTML escaping;
//! Markdown and proto text templates are rendered verbatim.
//!
//! Rendering happens entirely in memory. [`Renderer::export`] only touches
//! the filesystem once the output is complete.

use handlebars::{Handlebars, handlebars_helper};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::{Result, TemplateError};
use crate::persistence;
use crate::validate::ValidatedCard;

const TEMPLATE_EXTENSION: &str = ".hbs";

static BUILTIN_TEMPLATES: &[(&str, &str)] = &[
    (
        "default.html",
        include_str!("../../templates/default.html.hbs"),
    ),
    ("default.md", include_str!("../../templates/default.md.hbs")),
    (
        "default.pbtxt",
        include_str!("../../templates/default.pbtxt.hbs"),
    ),
];

/// Output formats with a built-in rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutputFormat {
    #[serde(rename = "html")]
    Html,
    #[serde(rename = "md", alias = "markdown")]
    Markdown,
    /// Protocol buffer text format.
    #[serde(rename = "pbtxt", alias = "proto")]
    ProtoText,
    /// The pruned JSON document itself.
    #[serde(rename = "json")]
    Json,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 4] = [
        OutputFormat::Html,
        OutputFormat::Markdown,
        OutputFormat::ProtoText,
        OutputFormat::Json,
    ];

    /// File extension for exported files.
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Html => "html",
            OutputFormat::Markdown => "md",
            OutputFormat::ProtoText => "pbtxt",
            OutputFormat::Json => "json",
        }
    }

    /// Name of the built-in template, `None` for JSON.
    pub fn default_template(self) -> Option<&'static str> {
        match self {
            OutputFormat::Html => Some("default.html"),
            OutputFormat::Markdown => Some("default.md"),
            OutputFormat::ProtoText => Some("default.pbtxt"),
            OutputFormat::Json => None,
        }
    }

    /// Infer the format from a template name such as `summary.md`.
    pub fn from_template_name(name: &str) -> Option<Self> {
        let (_, extension) = name.rsplit_once('.')?;
        extension.parse().ok()
    }

    fn escapes_html(self) -> bool {
        matches!(self, OutputFormat::Html)
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "html" | "htm" => Ok(OutputFormat::Html),
            "md" | "markdown" => Ok(OutputFormat::Markdown),
            "pbtxt" | "proto" | "textproto" => Ok(OutputFormat::ProtoText),
            "json" => Ok(OutputFormat::Json),
            other => Err(format!("unknown output format '{}'", other)),
        }
    }
}

/// Which template a render call uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateSelector {
    /// A registered template, by exact name.
    Named(String),
    /// The built-in template for a format.
    Default(OutputFormat),
}

impl TemplateSelector {
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    /// Format of the produced output, if it can be told from the selector.
    pub fn format(&self) -> Option<OutputFormat> {
        match self {
            TemplateSelector::Named(name) => OutputFormat::from_template_name(name),
            TemplateSelector::Default(format) => Some(*format),
        }
    }
}

impl fmt::Display for TemplateSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateSelector::Named(name) => f.write_str(name),
            TemplateSelector::Default(format) => write!(f, "default ({})", format),
        }
    }
}

handlebars_helper!(fmt_metric: |value: f64| format!("{:.3}", value));

handlebars_helper!(join: |items: array, separator: str| {
    items
        .iter()
        .map(|item| match item {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(separator)
});

handlebars_helper!(quote: |text: str| {
    let mut quoted = String::with_capacity(text.len() + 2);
    quoted.push('"');
    for c in text.chars() {
        match c {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            '\t' => quoted.push_str("\\t"),
            c => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
});

fn registry(escape_html: bool) -> Handlebars<'static> {
    let mut registry = Handlebars::new();
    registry.set_strict_mode(true);
    if !escape_html {
        registry.register_escape_fn(handlebars::no_escape);
    }
    registry.register_helper("fmt_metric", Box::new(fmt_metric));
    registry.register_helper("join", Box::new(join));
    registry.register_helper("quote", Box::new(quote));
    registry
}

/// Renders validated cards through Handlebars templates.
pub struct Renderer {
    html: Handlebars<'static>,
    raw: Handlebars<'static>,
}

impl fmt::Debug for Renderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Renderer")
            .field("templates", &self.templates())
            .finish()
    }
}

impl Renderer {
    /// A renderer with the built-in templates registered.
    pub fn new() -> Result<Self> {
        let mut renderer = Self {
            html: registry(true),
            raw: registry(false),
        };
        for (name, source) in BUILTIN_TEMPLATES {
            renderer.register_template(name, source)?;
        }
        Ok(renderer)
    }

    /// Register (or replace) a template. A name ending in `.html` gets HTML
    /// escaping, anything else renders verbatim.
    pub fn register_template(&mut self, name: &str, source: &str) -> Result<()> {
        let escape = OutputFormat::from_template_name(name).is_some_and(OutputFormat::escapes_html);
        let (target, other) = if escape {
            (&mut self.html, &mut self.raw)
        } else {
            (&mut self.raw, &mut self.html)
        };
        target
            .register_template_string(name, source)
            .map_err(|e| TemplateError::Render {
                template: name.to_string(),
                message: e.to_string(),
            })?;
        other.unregister_template(name);
        tracing::debug!(template = name, escape_html = escape, "registered template");
        Ok(())
    }

    /// Register every `*.hbs` file in `dir`. The template name is the file
    /// name without `.hbs`, e.g. `summary.md.hbs` registers `summary.md`.
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize> {
        if !dir.is_dir() {
            return Err(crate::error::ConfigError::DirNotFound {
                path: dir.to_path_buf(),
            }
            .into());
        }
        let mut files: Vec<_> = std::fs::read_dir(dir)?
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();
        files.sort();

        let mut count = 0;
        for path in files {
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let Some(name) = file_name.strip_suffix(TEMPLATE_EXTENSION) else {
                continue;
            };
            let source = std::fs::read_to_string(&path)?;
            self.register_template(name, &source)?;
            count += 1;
        }
        Ok(count)
    }

    /// Registered template names, sorted.
    pub fn templates(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .html
            .get_templates()
            .keys()
            .chain(self.raw.get_templates().keys())
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn has_template(&self, name: &str) -> bool {
        self.html.has_template(name) || self.raw.has_template(name)
    }

    /// Render a card. Nothing is returned unless the whole output rendered.
    pub fn render(&self, card: &ValidatedCard, selector: &TemplateSelector) -> Result<Vec<u8>> {
        let name = match selector {
            TemplateSelector::Default(OutputFormat::Json) => {
                return Ok(card.card().to_json_pretty()?.into_bytes());
            }
            TemplateSelector::Default(format) => format.default_template().unwrap_or_default(),
            TemplateSelector::Named(name) => name.as_str(),
        };
        let context = card.card().to_document()?;
        self.render_value(name, &context).map(String::into_bytes)
    }

    /// Render a named template against an arbitrary JSON context.
    pub(crate) fn render_value(&self, name: &str, context: &Value) -> Result<String> {
        let registry = if self.html.has_template(name) {
            &self.html
        } else if self.raw.has_template(name) {
            &self.raw
        } else {
            return Err(TemplateError::NotFound {
                name: name.to_string(),
            }
            .into());
        };
        let rendered = registry
            .render(name, context)
            .map_err(|e| TemplateError::Render {
                template: name.to_string(),
                message: e.to_string(),
            })?;
        tracing::debug!(template = name, bytes = rendered.len(), "rendered template");
        Ok(rendered)
    }

    /// Render a card and write it to `path`. A failed render leaves no file.
    pub fn export(&self, card: &ValidatedCard, selector: &TemplateSelector, path: &Path) -> Result<()> {
        let output = self.render(card, selector)?;
        persistence::atomic_write(path, &output)?;
        tracing::info!(path = %path.display(), template = %selector, "exported model card");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::ModelCard;
    use crate::error::CardError;
    use serde_json::json;
    use tempfile::TempDir;

    fn validated() -> ValidatedCard {
        let card = ModelCard::from_document(&json!({
            "schema_version": "0.1.0",
            "model_details": {
                "name": "census <income>",
                "owners": [{"name": "ML Team", "contact": "ml@example.com"}],
                "version": {"name": "v2", "date": "2024-03-01"},
                "licenses": [{"identifier": "Apache-2.0"}]
            },
            "model_parameters": {"model_architecture": "gbdt"},
            "quantitative_analysis": {"performance_metrics": [
                {"name": "accuracy", "value": 0.95, "confidence_interval": {"lower_bound": 0.93, "upper_bound": 0.97}},
                {"name": "f1", "value": 0.8, "slice": "sex:F"}
            ]},
            "considerations": {"limitations": ["Says \"hi\""], "users": ["analysts"]}
        }))
        .unwrap();
        ValidatedCard::new(card)
    }

    #[test]
    fn test_builtin_templates_registered() {
        let renderer = Renderer::new().unwrap();
        assert_eq!(
            renderer.templates(),
            vec!["default.html", "default.md", "default.pbtxt"]
        );
    }

    #[test]
    fn test_render_html_escapes() {
        let renderer = Renderer::new().unwrap();
        let out = renderer
            .render(&validated(), &TemplateSelector::Default(OutputFormat::Html))
            .unwrap();
        let html = String::from_utf8(out).unwrap();
        assert!(html.contains("Model Card for census &lt;income&gt;"));
        assert!(html.contains("<td>0.950</td>"));
        assert!(html.contains("[0.930, 0.970]"));
        assert!(html.contains("ML Team, ml@example.com"));
    }

    #[test]
    fn test_render_markdown_verbatim() {
        let renderer = Renderer::new().unwrap();
        let out = renderer
            .render(&validated(), &TemplateSelector::Default(OutputFormat::Markdown))
            .unwrap();
        let md = String::from_utf8(out).unwrap();
        assert!(md.contains("# Model Card for census <income>"));
        assert!(md.contains("| f1 | 0.800 | sex:F |"));
        assert!(md.contains("- Says \"hi\""));
    }

    #[test]
    fn test_render_proto_text_quotes_strings() {
        let renderer = Renderer::new().unwrap();
        let out = renderer
            .render(&validated(), &TemplateSelector::Default(OutputFormat::ProtoText))
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("schema_version: \"0.1.0\""));
        assert!(text.contains("name: \"accuracy\""));
        assert!(text.contains("limitations: \"Says \\\"hi\\\"\""));
    }

    #[test]
    fn test_render_json_is_pruned_document() {
        let renderer = Renderer::new().unwrap();
        let out = renderer
            .render(&validated(), &TemplateSelector::Default(OutputFormat::Json))
            .unwrap();
        let doc: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(doc["model_details"]["version"]["name"], "v2");
        assert!(doc.get("graphics").is_none());
    }

    #[test]
    fn test_render_is_deterministic() {
        let renderer = Renderer::new().unwrap();
        let selector = TemplateSelector::Default(OutputFormat::Html);
        let card = validated();
        assert_eq!(
            renderer.render(&card, &selector).unwrap(),
            renderer.render(&card, &selector).unwrap()
        );
    }

    #[test]
    fn test_named_template_lookup() {
        let mut renderer = Renderer::new().unwrap();
        renderer
            .register_template(
                "summary.md",
                "{{#with model_details}}{{name}}{{/with}}: {{join considerations.users \", \"}}",
            )
            .unwrap();
        let out = renderer
            .render(&validated(), &TemplateSelector::named("summary.md"))
            .unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "census <income>: analysts");
    }

    #[test]
    fn test_unknown_template_name() {
        let renderer = Renderer::new().unwrap();
        let err = renderer
            .render(&validated(), &TemplateSelector::named("fancy.html"))
            .unwrap_err();
        assert!(matches!(
            err,
            CardError::Template(TemplateError::NotFound { ref name }) if name == "fancy.html"
        ));
    }

    #[test]
    fn test_missing_member_fails_and_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let mut renderer = Renderer::new().unwrap();
        renderer
            .register_template("broken.html", "<p>{{model_details.nickname}}</p>")
            .unwrap();
        let path = dir.path().join("card.html");
        let err = renderer
            .export(&validated(), &TemplateSelector::named("broken.html"), &path)
            .unwrap_err();
        assert!(matches!(
            err,
            CardError::Template(TemplateError::Render { .. })
        ));
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_known_but_absent_member_fails() {
        let dir = TempDir::new().unwrap();
        let mut renderer = Renderer::new().unwrap();
        renderer
            .register_template("overview.md", "Overview: {{model_details.overview}}")
            .unwrap();
        let err = renderer
            .render(&validated(), &TemplateSelector::named("overview.md"))
            .unwrap_err();
        assert!(matches!(
            err,
            CardError::Template(TemplateError::Render { ref template, .. }) if template == "overview.md"
        ));

        let path = dir.path().join("overview.md");
        assert!(
            renderer
                .export(&validated(), &TemplateSelector::named("overview.md"), &path)
                .is_err()
        );
        assert!(!path.exists());
    }

    #[test]
    fn test_default_templates_render_sparse_card() {
        let card = ModelCard::from_document(&json!({
            "schema_version": "0.1.0",
            "model_details": {
                "owners": [{"contact": "ml@example.com"}],
                "licenses": [{"custom_text": "internal use"}]
            },
            "model_parameters": {"data": [{"link": "gs://train"}]},
            "quantitative_analysis": {"performance_metrics": [{"name": "auc", "value": 0.7}]},
            "considerations": {}
        }))
        .unwrap();
        let card = ValidatedCard::new(card);
        let renderer = Renderer::new().unwrap();
        for format in [OutputFormat::Html, OutputFormat::Markdown, OutputFormat::ProtoText] {
            let out = renderer
                .render(&card, &TemplateSelector::Default(format))
                .unwrap();
            let text = String::from_utf8(out).unwrap();
            assert!(text.contains("auc"), "{} output lost metrics", format);
            assert!(text.contains("internal use"), "{} output lost license", format);
        }
    }

    #[test]
    fn test_syntax_error_is_render_error() {
        let mut renderer = Renderer::new().unwrap();
        let err = renderer
            .register_template("bad.md", "{{#each model_details.owners}}")
            .unwrap_err();
        assert!(matches!(
            err,
            CardError::Template(TemplateError::Render { .. })
        ));
    }

    #[test]
    fn test_export_writes_file() {
        let dir = TempDir::new().unwrap();
        let renderer = Renderer::new().unwrap();
        let path = dir.path().join("out").join("card.md");
        renderer
            .export(&validated(), &TemplateSelector::Default(OutputFormat::Markdown), &path)
            .unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().contains("## Quantitative Analysis"));
    }

    #[test]
    fn test_load_dir_registers_hbs_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("brief.md.hbs"), "{{schema_version}}").unwrap();
        std::fs::write(dir.path().join("readme.txt"), "ignored").unwrap();
        let mut renderer = Renderer::new().unwrap();
        assert_eq!(renderer.load_dir(dir.path()).unwrap(), 1);
        assert!(renderer.has_template("brief.md"));
        let out = renderer
            .render(&validated(), &TemplateSelector::named("brief.md"))
            .unwrap();
        assert_eq!(out, b"0.1.0".to_vec());
    }

    #[test]
    fn test_output_format_parsing() {
        assert_eq!("markdown".parse::<OutputFormat>(), Ok(OutputFormat::Markdown));
        assert_eq!("proto".parse::<OutputFormat>(), Ok(OutputFormat::ProtoText));
        assert!("pdf".parse::<OutputFormat>().is_err());
        assert_eq!(
            OutputFormat::from_template_name("summary.html"),
            Some(OutputFormat::Html)
        );
        assert_eq!(
            serde_json::to_value(OutputFormat::ProtoText).unwrap(),
            json!("pbtxt")
        );
    }
}
