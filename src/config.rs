use crate::engine_settings::TranslateEngineSettings;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: Server,
    #[serde(default)]
    pub paths: Paths,
    #[serde(default)]
    pub jobs: Jobs,
    #[serde(default)]
    pub engine: Engine,
    #[serde(default)]
    pub translation: Translation,
    #[serde(default)]
    pub pdf: Pdf,
    #[serde(default)]
    pub translate_engine: TranslateEngineSettings,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub security: Security,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw).with_context(|| "parsing TOML")?;
        Ok(cfg)
    }

    pub fn jobs_dir(&self) -> PathBuf {
        PathBuf::from(&self.paths.jobs_dir)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Server {
    pub bind: String,
    pub max_upload_bytes: usize,
}
impl Default for Server {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:7861".into(),
            max_upload_bytes: 200 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Paths {
    pub jobs_dir: String,
    pub scripts_dir: String,
}
impl Default for Paths {
    fn default() -> Self {
        Self {
            jobs_dir: "pdf2zh_jobs".into(),
            scripts_dir: "scripts".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Jobs {
    /// Seconds a finished job is kept before the sweeper evicts it. 0 keeps forever.
    pub retention_seconds: u64,
    pub sweep_interval_seconds: u64,
    /// Also delete the job directory when a record is evicted.
    pub purge_artifacts: bool,
    pub event_buffer: usize,
}
impl Default for Jobs {
    fn default() -> Self {
        Self {
            retention_seconds: 0,
            sweep_interval_seconds: 300,
            purge_artifacts: false,
            event_buffer: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Engine {
    pub python_exe: String,
    pub runner_script: String,
    pub keep_stderr: bool,
    #[serde(default)]
    pub env: std::collections::BTreeMap<String, String>,
}
impl Default for Engine {
    fn default() -> Self {
        Self {
            python_exe: "python3".into(),
            runner_script: "translate_runner.py".into(),
            keep_stderr: true,
            env: Default::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Translation {
    pub lang_in: String,
    pub lang_out: String,
    pub qps: u32,
}
impl Default for Translation {
    fn default() -> Self {
        Self {
            lang_in: "en".into(),
            lang_out: "zh".into(),
            qps: 4,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Pdf {
    pub no_mono: bool,
    pub no_dual: bool,
    #[serde(default)]
    pub pages: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Logging {
    pub level: String,
    pub json: bool,
    pub write_to_file: bool,
    pub file_path: String,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            write_to_file: false,
            file_path: "".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Security {
    pub reject_url_inputs: bool,
}
impl Default for Security {
    fn default() -> Self {
        Self {
            reject_url_inputs: true,
        }
    }
}
