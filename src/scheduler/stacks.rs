//! Round-based scheduling of scenarios over active, waiting and dead stacks.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::pipeline::{PipelineError, Scenario, ScenarioOrchestrator, ScenarioOutcome};

/// Summary of a completed scheduling loop.
#[derive(Debug, Clone)]
pub struct LoopReport {
    /// Number of rounds over the active stack.
    pub rounds: usize,
    /// Number of pauses between rounds.
    pub sleeps: usize,
    /// Scenarios that completed the fit stage.
    pub finished: Vec<PathBuf>,
    /// Scenarios on the dead stack.
    pub dead: Vec<PathBuf>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl LoopReport {
    /// Wall-clock duration of the loop.
    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// Holds every scenario of a run on exactly one of three stacks.
#[derive(Debug)]
pub struct ScenarioScheduler {
    active: Vec<Scenario>,
    waiting: Vec<Scenario>,
    dead: Vec<Scenario>,
    finished: Vec<PathBuf>,
    poll_interval: Duration,
    rounds: usize,
    sleeps: usize,
}

impl ScenarioScheduler {
    /// Creates a scheduler with all `scenarios` on the active stack.
    pub fn new(scenarios: impl IntoIterator<Item = Scenario>, poll_interval: Duration) -> Self {
        Self {
            active: scenarios.into_iter().collect(),
            waiting: Vec::new(),
            dead: Vec::new(),
            finished: Vec::new(),
            poll_interval,
            rounds: 0,
            sleeps: 0,
        }
    }

    pub fn active(&self) -> &[Scenario] {
        &self.active
    }

    pub fn waiting(&self) -> &[Scenario] {
        &self.waiting
    }

    pub fn dead(&self) -> &[Scenario] {
        &self.dead
    }

    pub fn finished(&self) -> &[PathBuf] {
        &self.finished
    }

    /// True when neither the active nor the waiting stack holds a scenario.
    pub fn is_idle(&self) -> bool {
        self.active.is_empty() && self.waiting.is_empty()
    }

    /// Advances every active scenario exactly once.
    ///
    /// Afterwards the active stack is empty: each scenario was dropped as
    /// finished, moved to the dead stack, or pushed on the waiting stack.
    ///
    /// # Errors
    ///
    /// Returns the first fatal `PipelineError`; the run must not continue.
    pub async fn run_round(
        &mut self,
        orchestrator: &ScenarioOrchestrator,
    ) -> Result<(), PipelineError> {
        self.rounds += 1;
        let active = std::mem::take(&mut self.active);
        info!(round = self.rounds, scenarios = active.len(), "Starting scheduling round");

        for mut scenario in active {
            match orchestrator.tick(&mut scenario).await {
                Ok(ScenarioOutcome::Finished) => {
                    self.finished.push(scenario.root().to_path_buf());
                }
                Ok(ScenarioOutcome::Pending) => self.waiting.push(scenario),
                Ok(ScenarioOutcome::Broken) => {
                    warn!(
                        scenario = %scenario.root().display(),
                        stage = %scenario.stage(),
                        "Scenario failed, moved to dead stack"
                    );
                    self.dead.push(scenario);
                }
                Err(e) if e.is_fatal() => {
                    error!(
                        scenario = %scenario.root().display(),
                        error = %e,
                        "Invalid scenario input, aborting run"
                    );
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        scenario = %scenario.root().display(),
                        stage = %scenario.stage(),
                        error = %e,
                        "Scenario failed, moved to dead stack"
                    );
                    scenario.mark_broken();
                    self.dead.push(scenario);
                }
            }
        }
        Ok(())
    }

    /// Runs rounds until no scenario is active or waiting, pausing for the
    /// poll interval whenever scenarios are left waiting.
    ///
    /// # Errors
    ///
    /// Returns the first fatal `PipelineError`.
    pub async fn run(
        &mut self,
        orchestrator: &ScenarioOrchestrator,
    ) -> Result<LoopReport, PipelineError> {
        let started_at = Utc::now();

        while !self.is_idle() {
            self.run_round(orchestrator).await?;

            if !self.waiting.is_empty() {
                info!(
                    waiting = self.waiting.len(),
                    interval_secs = self.poll_interval.as_secs(),
                    "Waiting before processing scenarios again"
                );
                tokio::time::sleep(self.poll_interval).await;
                self.sleeps += 1;
                self.active = std::mem::take(&mut self.waiting);
            }
        }

        let report = LoopReport {
            rounds: self.rounds,
            sleeps: self.sleeps,
            finished: self.finished.clone(),
            dead: self.dead.iter().map(|s| s.root().to_path_buf()).collect(),
            started_at,
            finished_at: Utc::now(),
        };
        info!(
            rounds = report.rounds,
            finished = report.finished.len(),
            dead = report.dead.len(),
            "Scheduling loop complete"
        );
        Ok(report)
    }
}
