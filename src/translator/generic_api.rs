use super::retry::RetryPolicy;
use crate::engine_settings::GenericApiSettings;
use crate::util::sha256_hex;
use anyhow::{Context, Result, anyhow, bail};
use reqwest::Method;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

const DEFAULT_TIMEOUT_SECS: f64 = 60.0;
const DEFAULT_RESULT_KEYS: [&str; 5] = [
    "text",
    "translation",
    "translated_text",
    "translatedText",
    "result",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyType {
    Json,
    Form,
    Raw,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    None,
    Json(Value),
    Form(Vec<(String, String)>),
    Raw(String),
}

/// Translator for arbitrary HTTP endpoints described by templates.
///
/// URL, headers, params and body may contain `{text}`, `{lang_in}` and
/// `{lang_out}`. In JSON templates the values are inserted JSON-escaped so a
/// quote in the source text cannot break the document.
#[derive(Debug, Clone)]
pub struct GenericApiTranslator {
    client: reqwest::Client,
    url_template: String,
    method: Method,
    headers_template: Option<String>,
    params_template: Option<String>,
    body_template: Option<String>,
    body_type: BodyType,
    extract_path: Option<String>,
    model: String,
    lang_in: String,
    lang_out: String,
    retry: RetryPolicy,
}

impl GenericApiTranslator {
    /// Expects settings that already passed validation.
    pub fn new(settings: &GenericApiSettings, lang_in: &str, lang_out: &str) -> Result<Self> {
        let url_template = settings
            .generic_api_url
            .clone()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| anyhow!("Generic API URL is required"))?;
        let method = settings
            .generic_api_method
            .as_deref()
            .unwrap_or("POST")
            .to_ascii_uppercase()
            .parse::<Method>()
            .with_context(|| "parsing generic_api_method")?;
        let body_type = match settings
            .generic_api_body_type
            .as_deref()
            .unwrap_or("json")
            .to_ascii_lowercase()
            .as_str()
        {
            "json" => BodyType::Json,
            "form" => BodyType::Form,
            "raw" => BodyType::Raw,
            other => bail!("unsupported generic_api_body_type: {other}"),
        };
        let timeout = match settings.generic_api_timeout.as_deref() {
            Some(raw) => raw
                .parse::<f64>()
                .with_context(|| format!("parsing generic_api_timeout: {raw}"))?,
            None => DEFAULT_TIMEOUT_SECS,
        };
        let client = reqwest::Client::builder()
            .timeout(
                Duration::try_from_secs_f64(timeout)
                    .with_context(|| format!("generic_api_timeout out of range: {timeout}"))?,
            )
            .build()
            .with_context(|| "building HTTP client")?;

        Ok(Self {
            client,
            url_template,
            method,
            headers_template: settings.generic_api_headers.clone(),
            params_template: settings.generic_api_params.clone(),
            body_template: settings.generic_api_body.clone(),
            body_type,
            extract_path: settings.generic_api_extract_json_path.clone(),
            model: settings
                .generic_api_model
                .clone()
                .unwrap_or_else(|| "generic".into()),
            lang_in: lang_in.to_string(),
            lang_out: lang_out.to_string(),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Identifies the parameters that change translation output, for caching.
    pub fn cache_fingerprint(&self) -> String {
        let mut parts = vec![
            format!("model={}", self.model),
            format!("endpoint={}", self.url_template),
            format!("method={}", self.method),
        ];
        if let Some(p) = &self.extract_path {
            parts.push(format!("extract_path={p}"));
        }
        sha256_hex(parts.join("\n").as_bytes())
    }

    pub async fn translate(&self, text: &str) -> Result<String> {
        self.retry
            .run("generic api translate", || self.request(text))
            .await
    }

    async fn request(&self, text: &str) -> Result<String> {
        let url = self.render(&self.url_template, text);
        let headers = self.headers(text)?;
        let params = self.params(text)?;
        let body = self.body(text)?;
        debug!("GenericAPI request to {url} method={}", self.method);

        let mut req = self.client.request(self.method.clone(), &url);
        for (k, v) in &headers {
            req = req.header(k, v);
        }
        if !params.is_empty() {
            req = req.query(&params);
        }
        req = match body {
            RequestBody::None => req,
            RequestBody::Json(v) => req.json(&v),
            RequestBody::Form(pairs) => req.form(&pairs),
            RequestBody::Raw(s) => req.body(s),
        };

        let resp = req.send().await?.error_for_status()?;
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = resp.text().await?;
        let trimmed = body.trim();
        if content_type.contains("application/json")
            || trimmed.starts_with('{')
            || trimmed.starts_with('[')
        {
            let payload: Value =
                serde_json::from_str(trimmed).with_context(|| "parsing JSON response")?;
            return extract_from_json_path(self.extract_path.as_deref(), &payload);
        }
        Ok(trimmed.to_string())
    }

    pub fn render(&self, template: &str, text: &str) -> String {
        template
            .replace("{text}", text)
            .replace("{lang_in}", &self.lang_in)
            .replace("{lang_out}", &self.lang_out)
    }

    fn render_json_escaped(&self, template: &str, text: &str) -> String {
        let esc = |s: &str| {
            let quoted = Value::String(s.to_string()).to_string();
            quoted[1..quoted.len() - 1].to_string()
        };
        template
            .replace("{text}", &esc(text))
            .replace("{lang_in}", &esc(&self.lang_in))
            .replace("{lang_out}", &esc(&self.lang_out))
    }

    /// Renders a template and reads it as JSON, unwrapping one level of
    /// string encoding. Falls back to the rendered string.
    fn load_json(&self, template: &str, text: &str) -> Value {
        let rendered = self.render_json_escaped(template, text);
        match serde_json::from_str::<Value>(&rendered) {
            Ok(Value::String(inner)) => {
                serde_json::from_str(&inner).unwrap_or(Value::String(inner))
            }
            Ok(v) => v,
            Err(_) => Value::String(self.render(template, text)),
        }
    }

    pub fn headers(&self, text: &str) -> Result<BTreeMap<String, String>> {
        let default = || {
            BTreeMap::from([("Content-Type".to_string(), "application/json".to_string())])
        };
        let Some(template) = &self.headers_template else {
            return Ok(default());
        };
        match self.load_json(template, text) {
            Value::Object(map) => Ok(map.into_iter().map(|(k, v)| (k, stringify(v))).collect()),
            // Raw header strings are not supported; keep the default.
            Value::String(_) => Ok(default()),
            _ => bail!("generic_api_headers must be a JSON object"),
        }
    }

    pub fn params(&self, text: &str) -> Result<Vec<(String, String)>> {
        let Some(template) = &self.params_template else {
            return Ok(Vec::new());
        };
        match self.load_json(template, text) {
            Value::Object(map) => Ok(map.into_iter().map(|(k, v)| (k, stringify(v))).collect()),
            Value::String(_) => Ok(Vec::new()),
            _ => bail!("generic_api_params must be a JSON object"),
        }
    }

    pub fn body(&self, text: &str) -> Result<RequestBody> {
        if self.method == Method::GET {
            return Ok(RequestBody::None);
        }
        let Some(template) = &self.body_template else {
            return Ok(RequestBody::None);
        };
        match self.body_type {
            BodyType::Json => match self.load_json(template, text) {
                Value::String(_) => {
                    bail!("generic_api_body is not valid JSON when body_type=json")
                }
                v => Ok(RequestBody::Json(v)),
            },
            BodyType::Form => match self.load_json(template, text) {
                Value::Object(map) => Ok(RequestBody::Form(
                    map.into_iter().map(|(k, v)| (k, stringify(v))).collect(),
                )),
                // `key=value&key2=value2` goes out as is.
                Value::String(raw) => Ok(RequestBody::Raw(raw)),
                _ => bail!("generic_api_body must be a JSON object for form body type"),
            },
            BodyType::Raw => Ok(RequestBody::Raw(self.render(template, text))),
        }
    }
}

fn stringify(v: Value) -> String {
    match v {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

/// Walks a dotted path (`choices.0.message.content`) through a response.
///
/// Without a path the usual result keys are tried. An object at the end of
/// the path yields its `content`, `text` or `message` string.
pub fn extract_from_json_path(path: Option<&str>, payload: &Value) -> Result<String> {
    let Some(path) = path else {
        if let Value::Object(map) = payload {
            for key in DEFAULT_RESULT_KEYS {
                if let Some(Value::String(s)) = map.get(key) {
                    return Ok(s.clone());
                }
            }
        }
        bail!("No extract path provided and default keys not found in response");
    };

    let mut current = payload;
    for part in path.split('.').filter(|p| !p.is_empty()) {
        current = match current {
            Value::Array(items) if part.chars().all(|c| c.is_ascii_digit()) => {
                let idx: usize = part.parse()?;
                items
                    .get(idx)
                    .ok_or_else(|| anyhow!("Index {idx} out of range in response"))?
            }
            Value::Object(map) => map
                .get(part)
                .ok_or_else(|| anyhow!("Path segment '{part}' not found in response"))?,
            _ => bail!("Invalid path traversal in response payload"),
        };
    }

    match current {
        Value::String(s) => Ok(s.clone()),
        Value::Object(map) => ["content", "text", "message"]
            .into_iter()
            .find_map(|k| map.get(k).and_then(Value::as_str))
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Extracted value is not a string")),
        _ => bail!("Extracted value is not a string"),
    }
}
