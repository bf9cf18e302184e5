//! Prompt template selection and placeholder substitution.
//!
//! Templates are looked up per stage with project precedence:
//! `project-override` → `project-default` → `global-default`. Only active
//! templates that carry a prompt for the requested capability are
//! considered, and the highest version wins within a tier.
//!
//! Placeholders are `{name}` or `{name.path}` and are replaced in a single
//! left-to-right pass, so substituted text is never scanned again.

use std::sync::Arc;

use cadence_config::{Capability, PromptTemplate, TemplateScope, select_path};
use cadence_store::{Diagnostic, Severity, Store, StoreError};
use serde_json::{Map, Value};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum PromptError {
  #[error("no active prompt template for {capability} in stage {stage_type} (project {project_id})")]
  NotFound {
    stage_type: String,
    capability: Capability,
    project_id: String,
  },

  #[error("store error: {0}")]
  Store(#[from] StoreError),
}

/// A rendered prompt ready to hand to a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPrompt {
  pub template_id: String,
  pub template_version: u32,
  pub scope: TemplateScope,
  pub system_prompt: Option<String>,
  pub text: String,
  pub output_format: Option<String>,
  pub diagnostics: Vec<Diagnostic>,
}

impl ResolvedPrompt {
  /// Whether any diagnostic blocks dispatch.
  pub fn has_errors(&self) -> bool {
    self
      .diagnostics
      .iter()
      .any(|d| d.severity == Severity::Error)
  }
}

pub struct PromptResolver {
  store: Arc<dyn Store>,
  strict_variables: bool,
}

impl PromptResolver {
  /// With `strict_variables`, every unresolved placeholder is an error.
  pub fn new(store: Arc<dyn Store>, strict_variables: bool) -> Self {
    Self {
      store,
      strict_variables,
    }
  }

  /// Find the template that applies to this project, stage and capability.
  pub async fn select(
    &self,
    project_id: &str,
    stage_type: &str,
    capability: Capability,
  ) -> Result<PromptTemplate, PromptError> {
    let templates = self.store.list_prompt_templates(stage_type).await?;
    select_template(&templates, project_id, capability)
      .cloned()
      .ok_or_else(|| PromptError::NotFound {
        stage_type: stage_type.to_string(),
        capability,
        project_id: project_id.to_string(),
      })
  }

  /// Select a template and render it against `variables`.
  pub async fn resolve(
    &self,
    project_id: &str,
    stage_type: &str,
    capability: Capability,
    variables: &Map<String, Value>,
  ) -> Result<ResolvedPrompt, PromptError> {
    let template = self.select(project_id, stage_type, capability).await?;
    let prompt = template
      .prompts
      .get(&capability)
      .ok_or_else(|| PromptError::NotFound {
        stage_type: stage_type.to_string(),
        capability,
        project_id: project_id.to_string(),
      })?;

    let required = &prompt.required_variables;
    let (text, mut diagnostics) =
      substitute(&prompt.user_template, variables, required, self.strict_variables);
    let system_prompt = prompt.system_prompt.as_deref().map(|system| {
      let (system, notes) = substitute(system, variables, required, self.strict_variables);
      diagnostics.extend(notes);
      system
    });
    let sources = [
      prompt.user_template.as_str(),
      prompt.system_prompt.as_deref().unwrap_or_default(),
    ];
    diagnostics.extend(unreferenced_required(required, &sources));

    debug!(
      template_id = %template.id,
      version = template.version,
      scope = ?template.scope,
      diagnostics = diagnostics.len(),
      "prompt_resolved"
    );

    Ok(ResolvedPrompt {
      template_id: template.id.clone(),
      template_version: template.version,
      scope: template.scope,
      system_prompt,
      text,
      output_format: prompt.output_format.clone(),
      diagnostics,
    })
  }
}

fn select_template<'a>(
  templates: &'a [PromptTemplate],
  project_id: &str,
  capability: Capability,
) -> Option<&'a PromptTemplate> {
  let usable = |t: &&PromptTemplate| t.is_active && t.prompts.contains_key(&capability);
  let in_project = |t: &&PromptTemplate| t.project_id.as_deref() == Some(project_id);

  [
    TemplateScope::ProjectOverride,
    TemplateScope::ProjectDefault,
    TemplateScope::GlobalDefault,
  ]
  .into_iter()
  .find_map(|scope| {
    templates
      .iter()
      .filter(usable)
      .filter(|t| t.scope == scope)
      .filter(|t| scope == TemplateScope::GlobalDefault || in_project(t))
      .max_by_key(|t| t.version)
  })
}

/// Output of [`render`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
  pub text: String,
  /// Placeholders left verbatim, first occurrence order, without duplicates.
  pub unresolved: Vec<String>,
}

/// Replace every `{name}` / `{name.path}` found in `variables`.
///
/// Strings are inserted raw, other JSON values in compact form. Braces that
/// do not enclose a well-formed placeholder are copied through untouched.
pub fn render(template: &str, variables: &Map<String, Value>) -> Rendered {
  let mut text = String::with_capacity(template.len());
  let mut unresolved: Vec<String> = Vec::new();
  let mut rest = template;

  while let Some(open) = rest.find('{') {
    text.push_str(&rest[..open]);
    let after = &rest[open + 1..];
    match after.find('}') {
      Some(close) if is_placeholder(&after[..close]) => {
        let name = &after[..close];
        match lookup(variables, name) {
          Some(Value::String(s)) => text.push_str(s),
          Some(value) => text.push_str(&value.to_string()),
          None => {
            text.push_str(&rest[open..open + close + 2]);
            if !unresolved.iter().any(|u| u == name) {
              unresolved.push(name.to_string());
            }
          }
        }
        rest = &after[close + 1..];
      }
      _ => {
        text.push('{');
        rest = after;
      }
    }
  }
  text.push_str(rest);

  Rendered { text, unresolved }
}

/// Render `template` and turn unresolved placeholders into diagnostics.
///
/// A placeholder is an error when its root variable is listed in `required`
/// or `strict` is set; otherwise it is a warning.
pub fn substitute(
  template: &str,
  variables: &Map<String, Value>,
  required: &[String],
  strict: bool,
) -> (String, Vec<Diagnostic>) {
  let rendered = render(template, variables);
  let diagnostics = rendered
    .unresolved
    .into_iter()
    .map(|name| {
      let root = name.split('.').next().unwrap_or(&name);
      let is_required = required.iter().any(|r| r == &name || r == root);
      let severity = if strict || is_required {
        Severity::Error
      } else {
        Severity::Warning
      };
      Diagnostic {
        severity,
        message: format!("unresolved placeholder {{{name}}}"),
        placeholder: Some(name),
      }
    })
    .collect();
  (rendered.text, diagnostics)
}

/// Warn about required variables that no placeholder in `templates` refers to.
///
/// Such a variable has no effect on the rendered text, so it never makes the
/// prompt fail.
pub fn unreferenced_required(required: &[String], templates: &[&str]) -> Vec<Diagnostic> {
  let referenced: Vec<String> = templates
    .iter()
    .flat_map(|template| render(template, &Map::new()).unresolved)
    .collect();

  required
    .iter()
    .filter(|name| {
      !referenced
        .iter()
        .any(|p| p == *name || p.split('.').next() == Some(name.as_str()))
    })
    .map(|name| Diagnostic {
      severity: Severity::Warning,
      message: format!("required variable {name} is not referenced by the template"),
      placeholder: None,
    })
    .collect()
}

fn is_placeholder(candidate: &str) -> bool {
  let starts_well = candidate
    .chars()
    .next()
    .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
  starts_well
    && candidate
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    && candidate.split('.').all(|segment| !segment.is_empty())
}

fn lookup<'a>(variables: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
  let mut segments = name.split('.');
  let root = variables.get(segments.next()?)?;
  let path: Vec<&str> = segments.collect();
  select_path(root, &path)
}
