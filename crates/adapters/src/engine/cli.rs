// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CLI subprocess engine.
//!
//! Runs one subprocess per invocation: the prompt is written to stdin,
//! stdout lines stream back as deltas, and the exit status becomes the
//! terminal Completed. Resume lines embedded in stdout are captured
//! rather than forwarded.

use super::{Engine, EngineError, EngineSink, StartCtx};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use swb_core::{Completed, EngineEvent, Job, ResumeToken, RunRef};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};

/// Configuration for a CLI engine instance.
#[derive(Debug, Clone)]
pub struct CliConfig {
    /// Engine id this instance registers under (e.g. "lemon").
    pub id: String,
    /// Program to execute for each run.
    pub program: String,
    /// Fixed leading arguments.
    pub args: Vec<String>,
    /// Flag inserted before the resume value when the job carries a
    /// resume token (e.g. `--resume`). None disables resume pass-through.
    pub resume_arg: Option<String>,
}

impl CliConfig {
    pub fn new(id: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            program: program.into(),
            args: Vec::new(),
            resume_arg: None,
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_resume_arg(mut self, flag: impl Into<String>) -> Self {
        self.resume_arg = Some(flag.into());
        self
    }
}

struct CliRun {
    child: Arc<tokio::sync::Mutex<Child>>,
}

/// Engine adapter that shells out to a CLI program per run.
#[derive(Clone)]
pub struct CliEngine {
    config: CliConfig,
    runs: Arc<Mutex<HashMap<RunRef, CliRun>>>,
}

impl CliEngine {
    pub fn new(config: CliConfig) -> Self {
        Self {
            config,
            runs: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

/// Parse a resume line of the form `[<id>:resume] <value>`.
///
/// An empty value is accepted so every formatted token parses back.
fn parse_resume_line(id: &str, line: &str) -> Option<ResumeToken> {
    let rest = line.strip_prefix('[')?;
    let (head, value) = rest.split_once("] ")?;
    let engine = head.strip_suffix(":resume")?;
    if engine != id {
        return None;
    }
    Some(ResumeToken::new(engine, value))
}

#[async_trait]
impl Engine for CliEngine {
    fn id(&self) -> &str {
        &self.config.id
    }

    async fn start_run(
        &self,
        job: &Job,
        _ctx: StartCtx,
        sink: EngineSink,
    ) -> Result<RunRef, EngineError> {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.args);
        if let (Some(flag), Some(resume)) = (&self.config.resume_arg, &job.resume) {
            cmd.arg(flag).arg(&resume.value);
        }
        if let Some(cwd) = &job.cwd {
            cmd.current_dir(cwd);
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| EngineError::StartFailed(format!("{}: {}", self.config.program, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::StartFailed("stdout unavailable".into()))?;
        let stderr = child.stderr.take();
        let stdin = child.stdin.take();

        let run_ref = RunRef::generate();
        let child = Arc::new(tokio::sync::Mutex::new(child));
        self.runs.lock().insert(
            run_ref.clone(),
            CliRun {
                child: Arc::clone(&child),
            },
        );

        let engine_id = self.config.id.clone();
        sink.event(
            &run_ref,
            EngineEvent::Started {
                engine: engine_id.clone(),
                resume: None,
                title: None,
                meta: None,
            },
        );

        // Feed the prompt and close stdin so line-oriented programs see EOF.
        if let Some(mut stdin) = stdin {
            let prompt = job.prompt.clone();
            tokio::spawn(async move {
                let _ = stdin.write_all(prompt.as_bytes()).await;
                let _ = stdin.write_all(b"\n").await;
            });
        }

        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(stderr) = stderr {
                let _ = BufReader::new(stderr).read_to_string(&mut buf).await;
            }
            buf
        });

        let emit_ref = run_ref.clone();
        let runs = Arc::clone(&self.runs);
        tokio::spawn(async move {
            let mut resume_token = None;
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(token) = parse_resume_line(&engine_id, &line) {
                    resume_token = Some(token);
                    continue;
                }
                sink.delta(&emit_ref, format!("{}\n", line));
            }

            let status = child.lock().await.wait().await;
            let stderr_out = stderr_task.await.unwrap_or_default();
            let completed = match status {
                Ok(st) if st.success() => Completed {
                    engine: engine_id.clone(),
                    ok: true,
                    resume: resume_token,
                    ..Completed::default()
                },
                Ok(st) => {
                    let mut error = match st.code() {
                        Some(code) => format!("exit status {}", code),
                        None => "terminated by signal".to_string(),
                    };
                    let stderr_out = stderr_out.trim();
                    if !stderr_out.is_empty() {
                        error = format!("{}: {}", error, stderr_out);
                    }
                    Completed {
                        engine: engine_id.clone(),
                        ok: false,
                        error: Some(error),
                        resume: resume_token,
                        ..Completed::default()
                    }
                }
                Err(e) => Completed {
                    engine: engine_id.clone(),
                    ok: false,
                    error: Some(format!("wait failed: {}", e)),
                    ..Completed::default()
                },
            };
            sink.event(&emit_ref, EngineEvent::Completed(completed));
            runs.lock().remove(&emit_ref);
        });

        Ok(run_ref)
    }

    async fn cancel(&self, run_ref: &RunRef) -> Result<(), EngineError> {
        let child = match self.runs.lock().get(run_ref) {
            Some(run) => Arc::clone(&run.child),
            None => {
                // Already finished; nothing to kill.
                tracing::debug!(run_ref = %run_ref, "cancel for finished run");
                return Ok(());
            }
        };
        let result = child
            .lock()
            .await
            .start_kill()
            .map_err(|e| EngineError::CancelFailed(e.to_string()));
        result
    }

    fn format_resume(&self, token: &ResumeToken) -> String {
        format!("[{}:resume] {}", token.engine, token.value)
    }

    fn extract_resume(&self, line: &str) -> Option<ResumeToken> {
        parse_resume_line(&self.config.id, line)
    }
}

#[cfg(test)]
#[path = "cli_tests.rs"]
mod tests;
