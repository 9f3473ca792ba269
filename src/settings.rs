use crate::config::Config;
use crate::engine_settings::{EngineSettingsError, TranslateEngineSettings};
use crate::overrides::{OverrideError, Overrides};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettingsError {
    #[error("invalid parameters: {0}")]
    Override(#[from] OverrideError),
    #[error("{0}")]
    Engine(#[from] EngineSettingsError),
    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationSettings {
    pub lang_in: String,
    pub lang_out: String,
    pub qps: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PdfSettings {
    pub no_mono: bool,
    pub no_dual: bool,
    pub pages: Option<String>,
}

/// Effective settings for one job: config defaults with overrides applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSettings {
    pub translation: TranslationSettings,
    pub pdf: PdfSettings,
    pub engine: TranslateEngineSettings,
}

impl JobSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            translation: TranslationSettings {
                lang_in: cfg.translation.lang_in.clone(),
                lang_out: cfg.translation.lang_out.clone(),
                qps: cfg.translation.qps,
            },
            pdf: PdfSettings {
                no_mono: cfg.pdf.no_mono,
                no_dual: cfg.pdf.no_dual,
                pages: cfg.pdf.pages.clone(),
            },
            engine: cfg.translate_engine.clone(),
        }
    }

    /// Builds validated settings for a submission.
    pub fn build(cfg: &Config, overrides: &Overrides) -> Result<Self, SettingsError> {
        let mut settings = Self::from_config(cfg);
        overrides.apply(&mut settings)?;
        settings.validate()
    }

    pub fn validate(self) -> Result<Self, SettingsError> {
        let lang_in = self.translation.lang_in.trim().to_string();
        let lang_out = self.translation.lang_out.trim().to_string();
        if lang_in.is_empty() || lang_out.is_empty() {
            return Err(SettingsError::Invalid(
                "translation.lang_in and translation.lang_out are required".into(),
            ));
        }
        if self.translation.qps == 0 {
            return Err(SettingsError::Invalid("translation.qps must be > 0".into()));
        }
        if self.pdf.no_mono && self.pdf.no_dual {
            return Err(SettingsError::Invalid(
                "pdf.no_mono and pdf.no_dual cannot both be set; nothing would be produced".into(),
            ));
        }
        let pages = self
            .pdf
            .pages
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());
        if let Some(p) = &pages {
            validate_pages(p)?;
        }

        Ok(Self {
            translation: TranslationSettings {
                lang_in,
                lang_out,
                qps: self.translation.qps,
            },
            pdf: PdfSettings {
                no_mono: self.pdf.no_mono,
                no_dual: self.pdf.no_dual,
                pages,
            },
            engine: self.engine.validate()?,
        })
    }
}

/// Page selections look like `1,3,5-9,12-`.
fn validate_pages(raw: &str) -> Result<(), SettingsError> {
    let bad = || SettingsError::Invalid(format!("pdf.pages is not a page selection: {raw}"));
    for part in raw.split(',') {
        let part = part.trim();
        let (start, end) = match part.split_once('-') {
            Some((s, e)) => (s.trim(), e.trim()),
            None => (part, part),
        };
        let start_ok = start.is_empty() || start.parse::<u32>().is_ok_and(|n| n > 0);
        let end_ok = end.is_empty() || end.parse::<u32>().is_ok_and(|n| n > 0);
        if !start_ok || !end_ok || (start.is_empty() && end.is_empty()) {
            return Err(bad());
        }
        if let (Ok(lo), Ok(hi)) = (start.parse::<u32>(), end.parse::<u32>()) {
            if lo > hi {
                return Err(bad());
            }
        }
    }
    Ok(())
}
