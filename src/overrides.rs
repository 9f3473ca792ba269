//! Typed per-job setting overrides.
//!
//! Submitters send a flat object of dotted keys. Each key is parsed into an
//! [`OverrideKey`] and its value type-checked before anything is merged, so a
//! typo fails the submission instead of being ignored.

use crate::engine_settings::{DifySettings, EngineKind, GenericApiSettings};
use crate::settings::JobSettings;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OverrideError {
    #[error("unknown override key: {0}")]
    UnknownKey(String),
    #[error("invalid value for {key}: expected {expected}")]
    InvalidValue { key: String, expected: &'static str },
    #[error("{key} targets {engine} settings but the selected engine is {selected}")]
    EngineMismatch {
        key: String,
        engine: &'static str,
        selected: &'static str,
    },
    #[error("overrides must be a JSON object")]
    NotAnObject,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverrideKey {
    LangIn,
    LangOut,
    Qps,
    NoMono,
    NoDual,
    Pages,
    SelectEngine(EngineKind),
    EngineField { engine: EngineKind, field: String },
}

impl OverrideKey {
    pub fn parse(key: &str) -> Result<Self, OverrideError> {
        let unknown = || OverrideError::UnknownKey(key.to_string());
        let parsed = match key {
            "translation.lang_in" => OverrideKey::LangIn,
            "translation.lang_out" => OverrideKey::LangOut,
            "translation.qps" => OverrideKey::Qps,
            "pdf.no_mono" => OverrideKey::NoMono,
            "pdf.no_dual" => OverrideKey::NoDual,
            "pdf.pages" => OverrideKey::Pages,
            other => {
                if let Some(kind) = EngineKind::from_flag(other) {
                    return Ok(OverrideKey::SelectEngine(kind));
                }
                let (root, field) = other.split_once('.').ok_or_else(unknown)?;
                let engine = EngineKind::ALL
                    .into_iter()
                    .find(|k| k.detail_field_name() == root)
                    .ok_or_else(unknown)?;
                let known = match engine {
                    EngineKind::GenericApi => GenericApiSettings::FIELDS,
                    EngineKind::Dify => DifySettings::FIELDS,
                };
                if !known.contains(&field) {
                    return Err(unknown());
                }
                OverrideKey::EngineField {
                    engine,
                    field: field.to_string(),
                }
            }
        };
        Ok(parsed)
    }

    /// Engine selection has to land before any engine detail field.
    fn order(&self) -> u8 {
        match self {
            OverrideKey::SelectEngine(_) => 0,
            OverrideKey::EngineField { .. } => 2,
            _ => 1,
        }
    }
}

/// A parsed, type-checked override ready to merge.
#[derive(Debug, Clone, PartialEq)]
pub struct Override {
    pub raw_key: String,
    pub key: OverrideKey,
    pub value: Value,
}

impl Override {
    pub fn new(raw_key: &str, value: Value) -> Result<Self, OverrideError> {
        let key = OverrideKey::parse(raw_key)?;
        let ov = Self {
            raw_key: raw_key.to_string(),
            key,
            value,
        };
        ov.check_type()?;
        Ok(ov)
    }

    fn check_type(&self) -> Result<(), OverrideError> {
        let ok = match &self.key {
            OverrideKey::LangIn
            | OverrideKey::LangOut
            | OverrideKey::Pages
            | OverrideKey::EngineField { .. } => self.value.is_string(),
            OverrideKey::Qps => self.value.as_u64().is_some_and(|q| q > 0 && q <= u32::MAX as u64),
            OverrideKey::NoMono | OverrideKey::NoDual | OverrideKey::SelectEngine(_) => {
                self.value.is_boolean()
            }
        };
        if ok {
            Ok(())
        } else {
            Err(OverrideError::InvalidValue {
                key: self.raw_key.clone(),
                expected: self.expected(),
            })
        }
    }

    fn expected(&self) -> &'static str {
        match self.key {
            OverrideKey::Qps => "a positive integer",
            OverrideKey::NoMono | OverrideKey::NoDual | OverrideKey::SelectEngine(_) => "a boolean",
            _ => "a string",
        }
    }

    fn string(&self) -> String {
        self.value.as_str().unwrap_or_default().to_string()
    }
}

/// An ordered set of overrides parsed from a JSON object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overrides(Vec<Override>);

impl Overrides {
    pub fn from_json(value: &Value) -> Result<Self, OverrideError> {
        let obj = value.as_object().ok_or(OverrideError::NotAnObject)?;
        let mut out = Vec::with_capacity(obj.len());
        for (k, v) in obj {
            out.push(Override::new(k, v.clone())?);
        }
        out.sort_by_key(|o| o.key.order());
        Ok(Self(out))
    }

    /// Parses CLI style `key=value` pairs. Values are read as JSON when they
    /// parse, otherwise as plain strings.
    pub fn from_pairs<S: AsRef<str>>(pairs: &[S]) -> Result<Self, OverrideError> {
        let mut obj = serde_json::Map::new();
        for pair in pairs {
            let pair = pair.as_ref();
            let (k, v) = pair
                .split_once('=')
                .ok_or_else(|| OverrideError::UnknownKey(pair.to_string()))?;
            let value = serde_json::from_str(v).unwrap_or_else(|_| Value::String(v.to_string()));
            obj.insert(k.trim().to_string(), value);
        }
        Self::from_json(&Value::Object(obj))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn apply(&self, settings: &mut JobSettings) -> Result<(), OverrideError> {
        for ov in &self.0 {
            match &ov.key {
                OverrideKey::LangIn => settings.translation.lang_in = ov.string(),
                OverrideKey::LangOut => settings.translation.lang_out = ov.string(),
                OverrideKey::Qps => {
                    settings.translation.qps = ov.value.as_u64().unwrap_or(1) as u32;
                }
                OverrideKey::NoMono => settings.pdf.no_mono = ov.value.as_bool().unwrap_or(false),
                OverrideKey::NoDual => settings.pdf.no_dual = ov.value.as_bool().unwrap_or(false),
                OverrideKey::Pages => settings.pdf.pages = Some(ov.string()),
                OverrideKey::SelectEngine(kind) => {
                    if ov.value.as_bool() == Some(true) && settings.engine.kind() != *kind {
                        settings.engine = kind.default_settings();
                    }
                }
                OverrideKey::EngineField { engine, field } => {
                    let selected = settings.engine.kind();
                    if selected != *engine {
                        return Err(OverrideError::EngineMismatch {
                            key: ov.raw_key.clone(),
                            engine: engine.engine_type(),
                            selected: selected.engine_type(),
                        });
                    }
                    settings.engine.set_field(field, ov.string());
                }
            }
        }
        Ok(())
    }
}
