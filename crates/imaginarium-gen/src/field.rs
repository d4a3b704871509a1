//! Typed job parameters and the fields built from a generator's schema
//!
//! A generator declares a parameter schema; the presentation layer renders
//! one field per schema entry plus one synthetic style-selection field that
//! is appended to every generator's field set.

use serde::{Deserialize, Serialize};

/// Field key whose default is forced to `"true"` regardless of the schema
pub const RETURN_DEPTH_KEY: &str = "return_depth";

/// Key of the synthetic style-selection field appended to every field set
pub const STYLE_FIELD_KEY: &str = "skybox_style_id";

/// How a field is entered and submitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Text,
    Boolean,
    SingleSelect,
}

/// One choice of a single-select field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamOption {
    pub label: String,
    pub value: String,
}

/// Schema entry for one generator parameter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    /// Display name (e.g. "Prompt")
    pub name: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub default_value: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub options: Vec<ParamOption>,
}

/// A remote generation capability with its declared parameter schema.
///
/// Schema entries keep the order the catalog declared them in; the catalog
/// is replaced wholesale on refresh, never merged.
#[derive(Debug, Clone)]
pub struct Generator {
    pub name: String,
    pub params: Vec<(String, ParamSpec)>,
}

/// A skybox style preset from the remote catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkyboxStyle {
    pub id: i32,
    pub name: String,
}

/// A user-editable field materialized from a schema entry.
///
/// `value` is authoritative for text and boolean fields; single-select
/// fields resolve through `selected_index` into `options` instead.
#[derive(Debug, Clone)]
pub struct GeneratorField {
    pub key: String,
    pub kind: FieldKind,
    pub required: bool,
    pub value: String,
    pub selected_index: usize,
    pub options: Vec<ParamOption>,
}

impl GeneratorField {
    /// Materialize a field from a schema entry, applying documented
    /// default overrides.
    pub fn from_spec(key: &str, spec: &ParamSpec) -> Self {
        let value = if key == RETURN_DEPTH_KEY {
            "true".to_string()
        } else {
            spec.default_value.clone()
        };

        Self {
            key: key.to_string(),
            kind: spec.kind,
            required: spec.required,
            value,
            selected_index: 0,
            options: spec.options.clone(),
        }
    }

    /// A plain text field with an empty initial value
    pub fn text(key: &str, required: bool) -> Self {
        Self {
            key: key.to_string(),
            kind: FieldKind::Text,
            required,
            value: String::new(),
            selected_index: 0,
            options: Vec::new(),
        }
    }

    /// The string sent to the submission service for this field
    pub fn submission_value(&self) -> &str {
        match self.kind {
            FieldKind::SingleSelect => self
                .options
                .get(self.selected_index)
                .map(|o| o.value.as_str())
                .unwrap_or(""),
            _ => &self.value,
        }
    }
}

/// Build the field set for a generator.
///
/// One field per schema entry in schema order, with `return_depth`
/// defaulted to `"true"`, followed by the synthetic `skybox_style_id`
/// select whose options are every style in the supplied catalog.
pub fn build_generator_fields(
    generator: &Generator,
    styles: &[SkyboxStyle],
) -> Vec<GeneratorField> {
    let mut fields: Vec<GeneratorField> = generator
        .params
        .iter()
        .map(|(key, spec)| GeneratorField::from_spec(key, spec))
        .collect();

    let style_options = styles
        .iter()
        .map(|style| ParamOption {
            label: style.name.clone(),
            value: format!("{}: {}", style.id, style.name),
        })
        .collect();

    fields.push(GeneratorField {
        key: STYLE_FIELD_KEY.to_string(),
        kind: FieldKind::SingleSelect,
        required: false,
        value: String::new(),
        selected_index: 0,
        options: style_options,
    });

    fields
}

/// The field set of the plain skybox form: a single required prompt
pub fn build_skybox_style_fields() -> Vec<GeneratorField> {
    vec![GeneratorField::text("prompt", true)]
}
