//! Test-only fixtures: task definitions, local git origins, scripted stages and agents.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;

use anyhow::{Result, bail};
use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::core::enrich::{BatchRoots, enrich_at};
use crate::core::types::{CheckOutcome, RunRecord, TaskDefinition};
use crate::io::agents::{Agent, AgentOutput, TRANSCRIPT_FILE};
use crate::io::artifacts::{DIFF_FILE, LINT_RESULTS_FILE};
use crate::pipeline::RunStages;

/// Fixed batch timestamp used by fixtures.
pub const TEST_TIMESTAMP: &str = "20260101_120000";

/// A task with deterministic defaults and no augmentations.
pub fn task(name: &str) -> TaskDefinition {
    TaskDefinition {
        name: name.to_string(),
        description: format!("{name} description"),
        tags: BTreeSet::new(),
        start_from: "https://github.com/acme/app".to_string(),
        augmentations: Vec::new(),
        prompt: format!("{name} prompt"),
        criteria: format!("{name} criteria"),
        dir: PathBuf::from("tasks").join(name),
    }
}

/// A task with the given tags.
pub fn tagged_task(name: &str, tags: &[&str]) -> TaskDefinition {
    TaskDefinition {
        tags: tags.iter().map(|tag| tag.to_string()).collect(),
        ..task(name)
    }
}

/// Roots for workspaces and results under `root`.
pub fn batch_roots(root: &Path) -> BatchRoots {
    BatchRoots {
        workspace_root: root.join("workspaces"),
        results_root: root.join("results"),
    }
}

/// Enrich one task for one agent under `root` with [`TEST_TIMESTAMP`].
pub fn run_record(task: &TaskDefinition, agent: &str, root: &Path) -> RunRecord {
    let mut records = enrich_at(
        std::slice::from_ref(task),
        &[agent.to_string()],
        &batch_roots(root),
        TEST_TIMESTAMP,
    );
    records.remove(0)
}

/// Run a command in `dir`, panicking with its stderr on failure. Returns stdout.
pub fn run_ok(dir: &Path, program: &str, args: &[&str]) -> String {
    let out = Command::new(program)
        .args(args)
        .current_dir(dir)
        .output()
        .expect("run command");
    assert!(
        out.status.success(),
        "{program} {args:?} failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).trim().to_string()
}

pub fn git(dir: &Path, args: &[&str]) -> String {
    run_ok(dir, "git", args)
}

/// Local stand-in for a hosting service: repositories live at `{root}/{org}/{repo}`.
#[derive(Debug)]
pub struct TestOrigin {
    root: PathBuf,
}

impl TestOrigin {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        fs::create_dir_all(&root).expect("create origin root");
        Self { root }
    }

    /// Value for `git_base_url`.
    pub fn base_url(&self) -> String {
        format!("file://{}", self.root.display())
    }

    pub fn repo_dir(&self, org: &str, repo: &str) -> PathBuf {
        self.root.join(org).join(repo)
    }

    /// Create a repository on `main` with one commit holding `files`.
    pub fn create_repo(&self, org: &str, repo: &str, files: &[(&str, &str)]) -> PathBuf {
        let dir = self.repo_dir(org, repo);
        fs::create_dir_all(&dir).expect("create repo dir");
        git(&dir, &["init", "--quiet", "-b", "main"]);
        git(&dir, &["config", "user.name", "Origin"]);
        git(&dir, &["config", "user.email", "origin@example.com"]);
        // Allow pushes into the checked-out branch of a non-bare origin.
        git(&dir, &["config", "receive.denyCurrentBranch", "ignore"]);
        self.commit(org, repo, files, "initial commit");
        dir
    }

    /// Write `files` and commit them on the current branch. Returns the new HEAD.
    pub fn commit(&self, org: &str, repo: &str, files: &[(&str, &str)], message: &str) -> String {
        let dir = self.repo_dir(org, repo);
        write_files(&dir, files);
        git(&dir, &["add", "-A"]);
        git(&dir, &["commit", "--quiet", "-m", message]);
        git(&dir, &["rev-parse", "HEAD"])
    }

    /// Create `branch` from the current HEAD with one extra commit, then return to `main`.
    pub fn branch(&self, org: &str, repo: &str, branch: &str, files: &[(&str, &str)]) -> String {
        let dir = self.repo_dir(org, repo);
        git(&dir, &["checkout", "--quiet", "-b", branch]);
        let head = self.commit(org, repo, files, &format!("work on {branch}"));
        git(&dir, &["checkout", "--quiet", "main"]);
        head
    }
}

pub fn write_files(dir: &Path, files: &[(&str, &str)]) {
    for (path, contents) in files {
        let path = dir.join(path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(&path, contents).expect("write file");
    }
}

/// Stages that touch only the result and workspace folders, with per-agent
/// failure injection.
#[derive(Debug, Default)]
pub struct ScriptedStages {
    pub fail_provision: BTreeSet<String>,
    pub fail_invoke: BTreeSet<String>,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedStages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_invoke(agent: &str) -> Self {
        Self {
            fail_invoke: BTreeSet::from([agent.to_string()]),
            ..Self::default()
        }
    }

    pub fn failing_provision(agent: &str) -> Self {
        Self {
            fail_provision: BTreeSet::from([agent.to_string()]),
            ..Self::default()
        }
    }

    /// `(stage, record id)` pairs in call order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().expect("calls lock").clone()
    }

    /// Stages called for one record, in order.
    pub fn stages_for(&self, id: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|(_, call_id)| call_id == id)
            .map(|(stage, _)| stage)
            .collect()
    }

    fn record(&self, stage: &str, record: &RunRecord) {
        self.calls
            .lock()
            .expect("calls lock")
            .push((stage.to_string(), record.id()));
    }
}

#[async_trait]
impl RunStages for ScriptedStages {
    async fn provision(&self, record: &RunRecord) -> Result<()> {
        self.record("provision", record);
        if self.fail_provision.contains(&record.agent) {
            bail!("scripted provision failure for {}", record.agent);
        }
        fs::create_dir_all(&record.workspace_dir)?;
        Ok(())
    }

    async fn invoke(&self, record: &RunRecord) -> Result<()> {
        self.record("invoke", record);
        fs::write(
            record.result_dir.join(TRANSCRIPT_FILE),
            format!("{{\"agent\":\"{}\"}}\n", record.agent),
        )?;
        if self.fail_invoke.contains(&record.agent) {
            bail!("scripted invoke failure for {}", record.agent);
        }
        Ok(())
    }

    async fn capture(&self, record: &RunRecord) -> Result<()> {
        self.record("capture", record);
        let lint = serde_json::to_string(&CheckOutcome::skipped("scripted"))?;
        fs::write(record.result_dir.join(LINT_RESULTS_FILE), lint)?;
        fs::write(record.result_dir.join(DIFF_FILE), "")?;
        Ok(())
    }

    async fn cleanup(&self, record: &RunRecord) {
        self.record("cleanup", record);
        let _ = fs::remove_dir_all(&record.workspace_dir);
    }
}

/// An agent that edits its working directory the way a real one would.
#[derive(Debug, Clone, Default)]
pub struct ScriptedAgent {
    pub name: String,
    /// Written and committed, one commit per entry.
    pub commits: Vec<(String, BTreeMap<String, String>)>,
    /// Written and left uncommitted.
    pub uncommitted: BTreeMap<String, String>,
    pub exit_code: i32,
    pub transcript: String,
}

impl ScriptedAgent {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            transcript: "{\"type\":\"result\"}\n".to_string(),
            ..Self::default()
        }
    }

    pub fn commit(mut self, message: &str, files: &[(&str, &str)]) -> Self {
        self.commits.push((message.to_string(), to_map(files)));
        self
    }

    pub fn leave(mut self, files: &[(&str, &str)]) -> Self {
        self.uncommitted.extend(to_map(files));
        self
    }

    pub fn exit_code(mut self, code: i32) -> Self {
        self.exit_code = code;
        self
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, _prompt: &str, cwd: &Path) -> Result<AgentOutput> {
        for (message, files) in &self.commits {
            let files: Vec<(&str, &str)> = files
                .iter()
                .map(|(path, contents)| (path.as_str(), contents.as_str()))
                .collect();
            write_files(cwd, &files);
            git(cwd, &["add", "-A"]);
            git(cwd, &["commit", "--quiet", "-m", message]);
        }
        let files: Vec<(&str, &str)> = self
            .uncommitted
            .iter()
            .map(|(path, contents)| (path.as_str(), contents.as_str()))
            .collect();
        write_files(cwd, &files);
        Ok(AgentOutput {
            exit_code: Some(self.exit_code),
            stdout: self.transcript.clone(),
            stderr: String::new(),
            timed_out: false,
        })
    }
}

fn to_map(files: &[(&str, &str)]) -> BTreeMap<String, String> {
    files
        .iter()
        .map(|(path, contents)| (path.to_string(), contents.to_string()))
        .collect()
}

/// A local HTTP server that answers exactly one request with a fixed response.
#[derive(Debug)]
pub struct OneShotHttp {
    /// `http://127.0.0.1:{port}`, no trailing slash.
    pub url: String,
    handle: JoinHandle<String>,
}

impl OneShotHttp {
    /// `status` is the status-line tail, e.g. `"200 OK"`.
    pub async fn start(status: &str, body: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let url = format!("http://{}", listener.local_addr().expect("addr"));
        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let request = read_request(&mut socket).await;
            socket.write_all(response.as_bytes()).await.expect("write");
            request
        });
        Self { url, handle }
    }

    /// The raw request the server received.
    pub async fn request(self) -> String {
        self.handle.await.expect("server task")
    }
}

async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
    let mut request = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = socket.read(&mut buf).await.expect("read");
        if n == 0 {
            break;
        }
        request.extend_from_slice(&buf[..n]);
        let text = String::from_utf8_lossy(&request);
        if let Some(split) = text.find("\r\n\r\n") {
            let length = text[..split]
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            if request.len() >= split + 4 + length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&request).to_string()
}
