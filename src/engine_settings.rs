//! Translation engine settings models.
//!
//! Every engine field is carried as an optional string so the same models can
//! be filled from TOML, CLI `--set` pairs and HTTP override objects. Parsing
//! into concrete types (timeouts, enums) happens in [`validate`] and in the
//! translator implementations.
//!
//! [`validate`]: TranslateEngineSettings::validate

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineSettingsError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("{field} {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Kinds of engine, one per [`TranslateEngineSettings`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineKind {
    GenericApi,
    Dify,
}

impl EngineKind {
    pub const ALL: [EngineKind; 2] = [EngineKind::GenericApi, EngineKind::Dify];

    pub fn engine_type(self) -> &'static str {
        match self {
            EngineKind::GenericApi => "GenericAPI",
            EngineKind::Dify => "Dify",
        }
    }

    /// Name of the boolean selector flag (`genericapi`, `dify`).
    pub fn cli_flag_name(self) -> String {
        self.engine_type().to_ascii_lowercase()
    }

    /// Prefix for per-field overrides (`genericapi_detail`, `dify_detail`).
    pub fn detail_field_name(self) -> String {
        format!("{}_detail", self.cli_flag_name())
    }

    pub fn default_settings(self) -> TranslateEngineSettings {
        match self {
            EngineKind::GenericApi => TranslateEngineSettings::GenericApi(Default::default()),
            EngineKind::Dify => TranslateEngineSettings::Dify(Default::default()),
        }
    }

    pub fn from_flag(flag: &str) -> Option<EngineKind> {
        EngineKind::ALL
            .into_iter()
            .find(|k| k.cli_flag_name() == flag)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "translate_engine_type")]
pub enum TranslateEngineSettings {
    #[serde(rename = "GenericAPI")]
    GenericApi(GenericApiSettings),
    #[serde(rename = "Dify")]
    Dify(DifySettings),
}

impl Default for TranslateEngineSettings {
    fn default() -> Self {
        TranslateEngineSettings::GenericApi(GenericApiSettings::default())
    }
}

impl TranslateEngineSettings {
    pub fn kind(&self) -> EngineKind {
        match self {
            TranslateEngineSettings::GenericApi(_) => EngineKind::GenericApi,
            TranslateEngineSettings::Dify(_) => EngineKind::Dify,
        }
    }

    /// Returns cleaned settings, or the first problem found.
    pub fn validate(self) -> Result<Self, EngineSettingsError> {
        Ok(match self {
            TranslateEngineSettings::GenericApi(s) => {
                TranslateEngineSettings::GenericApi(s.validate()?)
            }
            TranslateEngineSettings::Dify(s) => TranslateEngineSettings::Dify(s.validate()?),
        })
    }

    /// Sets a single detail field by name. Returns `false` for unknown fields.
    pub fn set_field(&mut self, field: &str, value: String) -> bool {
        match self {
            TranslateEngineSettings::GenericApi(s) => s.set_field(field, value),
            TranslateEngineSettings::Dify(s) => s.set_field(field, value),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DifySettings {
    #[serde(default)]
    pub dify_url: Option<String>,
    #[serde(default)]
    pub dify_apikey: Option<String>,
}

impl DifySettings {
    pub const FIELDS: &'static [&'static str] = &["dify_url", "dify_apikey"];

    pub fn validate(self) -> Result<Self, EngineSettingsError> {
        if self.dify_apikey.as_deref().is_none_or(str::is_empty) {
            return Err(EngineSettingsError::Missing("Dify API Key"));
        }
        Ok(Self {
            dify_url: clean_string(self.dify_url),
            dify_apikey: clean_string(self.dify_apikey),
        })
    }

    fn set_field(&mut self, field: &str, value: String) -> bool {
        match field {
            "dify_url" => self.dify_url = Some(value),
            "dify_apikey" => self.dify_apikey = Some(value),
            _ => return false,
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenericApiSettings {
    #[serde(default = "default_support_llm")]
    pub support_llm: String,
    #[serde(default)]
    pub generic_api_model: Option<String>,
    #[serde(default)]
    pub generic_api_url: Option<String>,
    #[serde(default)]
    pub generic_api_method: Option<String>,
    #[serde(default)]
    pub generic_api_headers: Option<String>,
    #[serde(default)]
    pub generic_api_params: Option<String>,
    #[serde(default)]
    pub generic_api_body: Option<String>,
    #[serde(default)]
    pub generic_api_body_type: Option<String>,
    #[serde(default)]
    pub generic_api_timeout: Option<String>,
    #[serde(default)]
    pub generic_api_extract_json_path: Option<String>,
}

fn default_support_llm() -> String {
    "no".into()
}

impl Default for GenericApiSettings {
    fn default() -> Self {
        Self {
            support_llm: default_support_llm(),
            generic_api_model: Some("generic".into()),
            generic_api_url: None,
            generic_api_method: Some("POST".into()),
            generic_api_headers: None,
            generic_api_params: None,
            generic_api_body: None,
            generic_api_body_type: Some("json".into()),
            generic_api_timeout: None,
            generic_api_extract_json_path: None,
        }
    }
}

impl GenericApiSettings {
    pub const FIELDS: &'static [&'static str] = &[
        "support_llm",
        "generic_api_model",
        "generic_api_url",
        "generic_api_method",
        "generic_api_headers",
        "generic_api_params",
        "generic_api_body",
        "generic_api_body_type",
        "generic_api_timeout",
        "generic_api_extract_json_path",
    ];

    pub fn validate(self) -> Result<Self, EngineSettingsError> {
        // Deployments may pin the endpoint through the environment instead.
        let url = clean_string(self.generic_api_url)
            .filter(|u| !u.is_empty())
            .or_else(|| std::env::var("GENERIC_API_URL").ok())
            .and_then(|u| clean_url(Some(u)))
            .filter(|u| !u.is_empty())
            .ok_or(EngineSettingsError::Missing("Generic API URL"))?;

        let support_llm = self.support_llm.trim().to_ascii_lowercase();
        if support_llm != "yes" && support_llm != "no" {
            return Err(EngineSettingsError::Invalid {
                field: "support_llm",
                reason: format!("must be yes or no, got {support_llm:?}"),
            });
        }

        let method = non_empty(clean_string(self.generic_api_method))
            .unwrap_or_else(|| "POST".into())
            .to_ascii_uppercase();
        if !matches!(method.as_str(), "GET" | "POST" | "PUT" | "PATCH") {
            return Err(EngineSettingsError::Invalid {
                field: "generic_api_method",
                reason: format!("must be GET/POST/PUT/PATCH, got {method}"),
            });
        }

        let body_type = non_empty(clean_string(self.generic_api_body_type))
            .unwrap_or_else(|| "json".into())
            .to_ascii_lowercase();
        if !matches!(body_type.as_str(), "json" | "form" | "raw") {
            return Err(EngineSettingsError::Invalid {
                field: "generic_api_body_type",
                reason: format!("must be json|form|raw, got {body_type}"),
            });
        }

        let timeout = check_positive_float(
            non_empty(clean_string(self.generic_api_timeout)),
            "generic_api_timeout",
        )?;

        Ok(Self {
            support_llm,
            generic_api_model: Some(
                non_empty(clean_string(self.generic_api_model)).unwrap_or_else(|| "generic".into()),
            ),
            generic_api_url: Some(url),
            generic_api_method: Some(method),
            generic_api_headers: non_empty(clean_string(self.generic_api_headers)),
            generic_api_params: non_empty(clean_string(self.generic_api_params)),
            generic_api_body: non_empty(clean_string(self.generic_api_body)),
            generic_api_body_type: Some(body_type),
            generic_api_timeout: timeout,
            generic_api_extract_json_path: non_empty(clean_string(
                self.generic_api_extract_json_path,
            )),
        })
    }

    fn set_field(&mut self, field: &str, value: String) -> bool {
        let slot = match field {
            "support_llm" => {
                self.support_llm = value;
                return true;
            }
            "generic_api_model" => &mut self.generic_api_model,
            "generic_api_url" => &mut self.generic_api_url,
            "generic_api_method" => &mut self.generic_api_method,
            "generic_api_headers" => &mut self.generic_api_headers,
            "generic_api_params" => &mut self.generic_api_params,
            "generic_api_body" => &mut self.generic_api_body,
            "generic_api_body_type" => &mut self.generic_api_body_type,
            "generic_api_timeout" => &mut self.generic_api_timeout,
            "generic_api_extract_json_path" => &mut self.generic_api_extract_json_path,
            _ => return false,
        };
        *slot = Some(value);
        true
    }
}

/// Static description of an engine, used by the CLI and override parsing.
#[derive(Debug, Clone, Serialize)]
pub struct EngineMetadata {
    pub translate_engine_type: &'static str,
    pub cli_flag_name: String,
    pub cli_detail_field_name: String,
    pub fields: &'static [&'static str],
    pub support_llm: bool,
}

pub fn metadata() -> Vec<EngineMetadata> {
    EngineKind::ALL
        .into_iter()
        .map(|kind| EngineMetadata {
            translate_engine_type: kind.engine_type(),
            cli_flag_name: kind.cli_flag_name(),
            cli_detail_field_name: kind.detail_field_name(),
            fields: match kind {
                EngineKind::GenericApi => GenericApiSettings::FIELDS,
                EngineKind::Dify => DifySettings::FIELDS,
            },
            support_llm: match kind {
                EngineKind::GenericApi => GenericApiSettings::default().support_llm == "yes",
                EngineKind::Dify => false,
            },
        })
        .collect()
}

pub fn by_flag(flag: &str) -> Option<EngineMetadata> {
    metadata()
        .into_iter()
        .find(|m| m.cli_flag_name.eq_ignore_ascii_case(flag))
}

fn clean_string(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

static CHAT_COMPLETIONS_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/chat/completions/?$").expect("static regex"));

/// Trims, drops trailing slashes and an OpenAI-style `/chat/completions` suffix.
pub fn clean_url(value: Option<String>) -> Option<String> {
    let value = value?;
    let trimmed = value.trim().trim_end_matches('/');
    let stripped = CHAT_COMPLETIONS_SUFFIX.replace(trimmed, "");
    Some(stripped.trim_end_matches('/').to_string())
}

fn check_positive_float(
    value: Option<String>,
    field: &'static str,
) -> Result<Option<String>, EngineSettingsError> {
    let Some(raw) = value else {
        return Ok(None);
    };
    let parsed: f64 = raw.parse().map_err(|_| EngineSettingsError::Invalid {
        field,
        reason: "must be a float".into(),
    })?;
    if parsed <= 0.0 || !parsed.is_finite() {
        return Err(EngineSettingsError::Invalid {
            field,
            reason: "must be greater than 0".into(),
        });
    }
    Ok(Some(raw))
}
