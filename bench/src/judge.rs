//! Judge phase: assemble captured artifacts into a prompt and record a verdict.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use harness::core::types::RunSnapshot;
use harness::io::artifacts::{
    COMMITS_FILE, DIFF_FILE, EVAL_PROMPT_FILE, LINT_RESULTS_FILE, TEST_RESULTS_FILE,
    VERDICT_FILE, write_text,
};
use harness::io::agents::TRANSCRIPT_FILE;
use harness::io::config::JudgeConfig;
use harness::io::tasks::{CRITERIA_FILE, PROMPT_FILE, TASK_FILE};
use harness::scheduler::{BatchSummary, ParallelOptions, run_batch};
use minijinja::{Environment, context};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

const JUDGE_TEMPLATE: &str = include_str!("prompts/judge.md");

/// Something that turns an assembled prompt into a markdown verdict.
#[async_trait]
pub trait Judge: Send + Sync {
    async fn judge(&self, prompt: &str) -> Result<String>;
}

/// Judge backed by an OpenAI-compatible chat-completions endpoint.
#[derive(Debug, Clone)]
pub struct HttpJudge {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
}

impl HttpJudge {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            model: model.into(),
            api_key: api_key.into(),
        }
    }

    /// Build from config, reading the API key from `config.api_key_env`.
    pub fn from_config(config: &JudgeConfig, client: reqwest::Client) -> Result<Self> {
        let api_key = match std::env::var(&config.api_key_env) {
            Ok(key) if !key.trim().is_empty() => key,
            _ => bail!("set {} to the judge API key", config.api_key_env),
        };
        Ok(Self::new(
            client,
            config.base_url.clone(),
            config.model.clone(),
            api_key,
        ))
    }
}

#[async_trait]
impl Judge for HttpJudge {
    #[instrument(skip_all, fields(model = %self.model))]
    async fn judge(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: 0.0,
        };
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("POST {url}"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("judge request failed with status {status}: {}", body.trim());
        }
        let parsed: ChatResponse = response.json().await.context("parse judge response")?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty());
        match content {
            Some(content) => Ok(content),
            None => bail!("judge returned no content"),
        }
    }
}

/// Judge-phase knobs.
#[derive(Debug, Clone, Copy)]
pub struct JudgeOptions {
    pub parallel: usize,
    /// Re-judge runs that already have `final-result.md`.
    pub force: bool,
    pub max_section_bytes: usize,
}

#[derive(Debug)]
pub struct JudgeOutcome {
    pub summary: BatchSummary,
    /// Runs left alone because they already had a verdict.
    pub skipped: usize,
}

/// Judge every run directory of a batch through the scheduler.
pub async fn judge_runs(
    judge: &dyn Judge,
    batch_dir: &Path,
    options: JudgeOptions,
) -> Result<JudgeOutcome> {
    let mut pending = Vec::new();
    let mut skipped = 0;
    for dir in run_dirs(batch_dir)? {
        if !options.force && dir.join(VERDICT_FILE).exists() {
            skipped += 1;
            continue;
        }
        pending.push(dir);
    }
    debug!(pending = pending.len(), skipped, "judging batch");

    let engine = PromptEngine::new()?;
    let summary = run_batch(
        pending,
        ParallelOptions {
            concurrency: options.parallel,
            show_status: true,
        },
        |dir| run_id(dir),
        |dir| format!("judge {}", run_id(dir)),
        |dir| {
            let engine = &engine;
            async move { judge_run(judge, engine, &dir, options.max_section_bytes).await }
        },
    )
    .await;
    Ok(JudgeOutcome { summary, skipped })
}

#[instrument(skip_all, fields(run = %run_id(dir)))]
async fn judge_run(
    judge: &dyn Judge,
    engine: &PromptEngine,
    dir: &Path,
    max_section_bytes: usize,
) -> Result<()> {
    let evidence = Evidence::load(dir, max_section_bytes)?;
    let prompt = engine.render(&evidence)?;
    write_text(&dir.join(EVAL_PROMPT_FILE), &prompt).await?;
    let verdict = judge.judge(&prompt).await?;
    let mut verdict = verdict.trim_end().to_string();
    verdict.push('\n');
    write_text(&dir.join(VERDICT_FILE), &verdict).await
}

/// Sub-folders of a batch that hold a run snapshot, sorted.
pub fn run_dirs(batch_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(batch_dir)
        .with_context(|| format!("read {}", batch_dir.display()))?
    {
        let entry = entry.context("read entry")?;
        let path = entry.path();
        if path.is_dir() && path.join(TASK_FILE).is_file() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

fn run_id(dir: &Path) -> String {
    dir.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| dir.display().to_string())
}

/// Everything the judge sees about one run, already bounded.
#[derive(Debug, Clone, Serialize)]
struct Evidence {
    task: RunSnapshot,
    prompt: String,
    criteria: String,
    lint: String,
    tests: Option<String>,
    commits: Option<String>,
    diff: String,
    transcript: String,
}

impl Evidence {
    fn load(dir: &Path, max_bytes: usize) -> Result<Self> {
        let snapshot_path = dir.join(TASK_FILE);
        let raw = std::fs::read_to_string(&snapshot_path)
            .with_context(|| format!("read {}", snapshot_path.display()))?;
        let task: RunSnapshot = serde_json::from_str(&raw)
            .with_context(|| format!("parse {}", snapshot_path.display()))?;

        let read = |name: &str| -> Result<Option<String>> {
            let path = dir.join(name);
            if !path.exists() {
                return Ok(None);
            }
            std::fs::read_to_string(&path)
                .map(Some)
                .with_context(|| format!("read {}", path.display()))
        };

        Ok(Self {
            task,
            prompt: read(PROMPT_FILE)?.unwrap_or_default(),
            criteria: read(CRITERIA_FILE)?.unwrap_or_default(),
            lint: head(
                read(LINT_RESULTS_FILE)?
                    .as_deref()
                    .unwrap_or(r#"{"skipped": true, "reason": "not captured"}"#),
                max_bytes,
            ),
            tests: read(TEST_RESULTS_FILE)?.map(|text| head(&text, max_bytes)),
            commits: read(COMMITS_FILE)?.map(|text| head(&text, max_bytes)),
            diff: head(read(DIFF_FILE)?.as_deref().unwrap_or_default(), max_bytes),
            transcript: tail(read(TRANSCRIPT_FILE)?.as_deref().unwrap_or_default(), max_bytes),
        })
    }
}

struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("judge", JUDGE_TEMPLATE)
            .context("load judge template")?;
        Ok(Self { env })
    }

    fn render(&self, evidence: &Evidence) -> Result<String> {
        let template = self.env.get_template("judge")?;
        let rendered = template.render(context! {
            task => &evidence.task,
            prompt => evidence.prompt.trim(),
            criteria => evidence.criteria.trim(),
            lint => evidence.lint.trim(),
            tests => evidence.tests.as_deref().map(str::trim),
            commits => evidence.commits.as_deref().map(str::trim),
            diff => evidence.diff.trim_end(),
            transcript => evidence.transcript.trim(),
        })?;
        Ok(rendered)
    }
}

/// First `max` bytes on a char boundary, with a truncation note.
fn head(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n[truncated {} bytes]", &text[..end], text.len() - end)
}

/// Last `max` bytes on a char boundary, with a truncation note.
fn tail(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("[truncated {} bytes]\n{}", start, &text[start..])
}
