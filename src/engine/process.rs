use super::types::{DocDiag, RunnerEvent, RunnerRequest};
use super::{JobSpec, TranslationEngine};
use crate::config::Config;
use crate::jobs::{EventStream, ProgressEvent};
use anyhow::{Context, Result, anyhow};
use futures::StreamExt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const DOCTOR_TIMEOUT: Duration = Duration::from_secs(60);

/// Runs translations through an external Python runner script.
///
/// The runner reads one JSON request on stdin and reports NDJSON events on
/// stdout, ending with a `finish` or `error` event.
#[derive(Debug, Clone)]
pub struct ProcessEngine {
    python_exe: PathBuf,
    runner: PathBuf,
    env: Vec<(String, String)>,
    keep_stderr: bool,
}

impl ProcessEngine {
    pub fn new(cfg: &Config) -> Result<Self> {
        let runner = PathBuf::from(&cfg.paths.scripts_dir).join(&cfg.engine.runner_script);
        if !runner.exists() {
            return Err(anyhow!("missing runner script: {}", runner.display()));
        }
        Ok(Self {
            python_exe: resolve_python_exe(&cfg.engine.python_exe),
            runner,
            env: cfg
                .engine
                .env
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            keep_stderr: cfg.engine.keep_stderr,
        })
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.python_exe);
        cmd.arg(&self.runner)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (k, v) in &self.env {
            cmd.env(k, v);
        }
        cmd
    }

    fn spawn(&self, request: &RunnerRequest<'_>) -> Result<(Child, Vec<u8>)> {
        let payload = serde_json::to_vec(request)?;
        let child = self
            .command()
            .spawn()
            .with_context(|| format!("spawning runner: {}", self.runner.display()))?;
        Ok((child, payload))
    }

    pub async fn doctor(&self) -> Result<DocDiag> {
        let (mut child, payload) = self.spawn(&RunnerRequest::Doctor)?;
        write_stdin(&mut child, &payload).await?;
        let output = tokio::time::timeout(DOCTOR_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| anyhow!("runner doctor exceeded {DOCTOR_TIMEOUT:?}"))?
            .with_context(|| "waiting for runner")?;
        if !output.status.success() {
            return Err(anyhow!(
                "runner doctor failed ({}): {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            ));
        }
        serde_json::from_slice(&output.stdout).with_context(|| "parsing runner doctor output")
    }

    fn run(&self, spec: JobSpec, cancel: CancellationToken) -> EventStream {
        let engine = self.clone();
        async_stream::try_stream! {
            let input = spec.input_pdf.display().to_string();
            let output = spec.output_dir.display().to_string();
            let request = RunnerRequest::Translate {
                input_pdf: &input,
                output_dir: &output,
                settings: &spec.settings,
            };
            let (mut child, payload) = engine.spawn(&request)?;
            write_stdin(&mut child, &payload).await?;

            // Drain stderr alongside stdout so a chatty runner cannot block on
            // a full pipe.
            let stderr = child.stderr.take();
            let stderr_task = tokio::spawn(async move {
                let mut buf = Vec::new();
                if let Some(mut err) = stderr {
                    let _ = err.read_to_end(&mut buf).await;
                }
                buf
            });

            let stdout = child.stdout.take().ok_or_else(|| anyhow!("runner has no stdout"))?;
            let mut lines = BufReader::new(stdout).lines();
            let mut finished = false;
            loop {
                let line = tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!(job_id = %spec.id, "killing runner on cancellation");
                        let _ = child.kill().await;
                        return;
                    }
                    line = lines.next_line() => line,
                };
                let Some(line) = line.with_context(|| "reading runner output")? else {
                    break;
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let event: RunnerEvent = match serde_json::from_str(line) {
                    Ok(ev) => ev,
                    Err(err) => {
                        debug!(job_id = %spec.id, "ignoring non-event runner output ({err}): {line}");
                        continue;
                    }
                };
                let event = ProgressEvent::from(event);
                let terminal = event.is_terminal();
                yield event;
                if terminal {
                    finished = true;
                    break;
                }
            }

            let status = child.wait().await.with_context(|| "waiting for runner")?;
            let stderr = stderr_task.await.unwrap_or_default();
            if engine.keep_stderr && !stderr.is_empty() {
                debug!(job_id = %spec.id, "runner stderr: {}", String::from_utf8_lossy(&stderr).trim());
            }
            if !finished {
                Err::<(), _>(anyhow!(
                    "runner exited ({status}) without a result: {}",
                    String::from_utf8_lossy(&stderr).trim()
                ))?;
            }
            if !status.success() {
                warn!(job_id = %spec.id, "runner exited with {status} after reporting a result");
            }
        }
        .boxed()
    }
}

impl TranslationEngine for ProcessEngine {
    fn translate(&self, spec: JobSpec, cancel: CancellationToken) -> EventStream {
        self.run(spec, cancel)
    }
}

async fn write_stdin(child: &mut Child, payload: &[u8]) -> Result<()> {
    let mut stdin = child.stdin.take().ok_or_else(|| anyhow!("runner has no stdin"))?;
    stdin.write_all(payload).await.with_context(|| "writing runner request")?;
    stdin.write_all(b"\n").await?;
    stdin.flush().await.ok();
    Ok(())
}

fn resolve_python_exe(raw: &str) -> PathBuf {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("auto") {
        if let Ok(env_val) = std::env::var("PDF2ZH_PYTHON") {
            let p = expand_tilde(&env_val);
            if p.exists() {
                return p;
            }
        }
        return PathBuf::from("python3");
    }
    expand_tilde(raw)
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}
