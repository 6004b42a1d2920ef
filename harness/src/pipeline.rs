//! Per-record lifecycle: provision, invoke, capture, cleanup.
//!
//! The stages sit behind [`RunStages`] so tests can script them without
//! git, network or agent binaries.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{instrument, warn};

use crate::core::types::RunRecord;
use crate::io::agents::{AgentRegistry, invoke_agent};
use crate::io::artifacts::prepare_result_dir;
use crate::io::capture::Capturer;
use crate::io::cleanup::cleanup;
use crate::io::config::BenchConfig;
use crate::io::provision::Provisioner;
use crate::scheduler::{BatchSummary, ParallelOptions, run_batch};

/// The four stages every RunRecord goes through, strictly in order.
#[async_trait]
pub trait RunStages: Send + Sync {
    async fn provision(&self, record: &RunRecord) -> Result<()>;

    async fn invoke(&self, record: &RunRecord) -> Result<()>;

    async fn capture(&self, record: &RunRecord) -> Result<()>;

    /// Must not fail; problems are logged.
    async fn cleanup(&self, record: &RunRecord);
}

/// Production stages: real git, real agents, real lint/test commands.
#[derive(Debug, Clone)]
pub struct HarnessStages {
    provisioner: Provisioner,
    agents: AgentRegistry,
    capturer: Capturer,
}

impl HarnessStages {
    pub fn new(provisioner: Provisioner, agents: AgentRegistry, capturer: Capturer) -> Self {
        Self {
            provisioner,
            agents,
            capturer,
        }
    }

    pub fn from_config(config: &BenchConfig, http: reqwest::Client) -> Self {
        Self::new(
            Provisioner::from_config(config, http),
            AgentRegistry::builtin(&config.agent),
            Capturer::new(&config.capture),
        )
    }

    pub fn agents(&self) -> &AgentRegistry {
        &self.agents
    }
}

#[async_trait]
impl RunStages for HarnessStages {
    async fn provision(&self, record: &RunRecord) -> Result<()> {
        self.provisioner.provision(record).await
    }

    async fn invoke(&self, record: &RunRecord) -> Result<()> {
        let agent = self.agents.get(&record.agent)?;
        invoke_agent(agent.as_ref(), record).await?;
        Ok(())
    }

    async fn capture(&self, record: &RunRecord) -> Result<()> {
        self.capturer.capture(record).await
    }

    async fn cleanup(&self, record: &RunRecord) {
        cleanup(record).await;
    }
}

/// Run one record to completion.
///
/// A provisioning failure skips invocation and capture. An invocation failure
/// still captures, since partial work is evidence for the judge. Cleanup always
/// runs. The first stage error becomes the record's error.
#[instrument(skip_all, fields(task = %record.task.name, agent = %record.agent))]
pub async fn run_record<S: RunStages + ?Sized>(stages: &S, record: &RunRecord) -> Result<()> {
    prepare_result_dir(record).await?;
    let outcome = run_stages(stages, record).await;
    stages.cleanup(record).await;
    outcome
}

async fn run_stages<S: RunStages + ?Sized>(stages: &S, record: &RunRecord) -> Result<()> {
    stages.provision(record).await.context("provision workspace")?;
    let invoked = stages.invoke(record).await.context("invoke agent");
    let captured = stages.capture(record).await.context("capture results");
    match (invoked, captured) {
        (Err(err), Err(capture_err)) => {
            warn!(err = %format!("{capture_err:#}"), "capture failed after agent failure");
            Err(err)
        }
        (Err(err), Ok(())) => Err(err),
        (Ok(()), captured) => captured,
    }
}

/// Run a whole batch of records through the scheduler.
pub async fn run_records<S: RunStages + ?Sized>(
    stages: &S,
    records: Vec<RunRecord>,
    options: ParallelOptions,
) -> BatchSummary {
    run_batch(
        records,
        options,
        RunRecord::id,
        RunRecord::label,
        |record| async move { run_record(stages, &record).await },
    )
    .await
}
