//! Sequential step pipeline
//!
//! A [`Pipeline`] runs its steps in declared order against a caller-owned
//! context. The first failing step ends the run; steps after it never start
//! and nothing done by earlier steps is undone.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Serialize;
use tracing::{debug, info};

use crate::errors::OrchestratorError;
use crate::events::Emitter;

/// Work performed by a step
#[async_trait]
pub trait StepAction<C: Send>: Send + Sync {
    async fn run(&self, ctx: &mut C, emitter: &Emitter) -> Result<(), OrchestratorError>;
}

struct FnAction<F>(F);

#[async_trait]
impl<C, F> StepAction<C> for FnAction<F>
where
    C: Send,
    F: for<'a> Fn(&'a mut C, &'a Emitter) -> BoxFuture<'a, Result<(), OrchestratorError>>
        + Send
        + Sync,
{
    async fn run(&self, ctx: &mut C, emitter: &Emitter) -> Result<(), OrchestratorError> {
        (self.0)(ctx, emitter).await
    }
}

/// A named unit of work
pub struct StepDefinition<C> {
    pub name: String,
    pub description: String,
    action: Box<dyn StepAction<C>>,
}

impl<C: Send + 'static> StepDefinition<C> {
    /// Build a step from a closure returning a boxed future
    pub fn new<F>(name: impl Into<String>, description: impl Into<String>, action: F) -> Self
    where
        F: for<'a> Fn(&'a mut C, &'a Emitter) -> BoxFuture<'a, Result<(), OrchestratorError>>
            + Send
            + Sync
            + 'static,
    {
        Self::from_action(name, description, FnAction(action))
    }

    /// Build a step from any [`StepAction`]
    pub fn from_action(
        name: impl Into<String>,
        description: impl Into<String>,
        action: impl StepAction<C> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            action: Box::new(action),
        }
    }
}

impl<C> fmt::Debug for StepDefinition<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepDefinition")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Outcome of one executed step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepResult {
    pub name: String,
    pub succeeded: bool,
    pub error_detail: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Record of one pipeline execution
#[derive(Debug)]
pub struct PipelineRun {
    pub pipeline: String,
    /// Results of the steps that actually ran, in order
    pub results: Vec<StepResult>,
    /// The failing step's error, wrapped with its name
    pub error: Option<OrchestratorError>,
}

impl PipelineRun {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    pub fn failed_step(&self) -> Option<&StepResult> {
        self.results.iter().find(|r| !r.succeeded)
    }

    pub fn into_result(self) -> Result<Vec<StepResult>, OrchestratorError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.results),
        }
    }
}

/// An ordered, immutable list of steps
pub struct Pipeline<C> {
    name: String,
    steps: Vec<StepDefinition<C>>,
}

impl<C: Send + 'static> Pipeline<C> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn with_steps(name: impl Into<String>, steps: Vec<StepDefinition<C>>) -> Self {
        Self {
            name: name.into(),
            steps,
        }
    }

    /// Append a step
    pub fn step(mut self, step: StepDefinition<C>) -> Self {
        self.steps.push(step);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }

    /// Run every step in order, stopping at the first failure
    pub async fn run(&self, ctx: &mut C, emitter: &Emitter) -> PipelineRun {
        let total = self.steps.len();
        let mut results = Vec::with_capacity(total);
        info!("Running pipeline '{}' ({} steps)", self.name, total);

        for (index, step) in self.steps.iter().enumerate() {
            emitter
                .progress(index, total, step.description.clone(), false)
                .await;
            debug!("Step {}/{}: {}", index + 1, total, step.name);

            let started_at = Utc::now();
            let outcome = step.action.run(ctx, emitter).await;
            let finished_at = Utc::now();

            match outcome {
                Ok(()) => {
                    results.push(StepResult {
                        name: step.name.clone(),
                        succeeded: true,
                        error_detail: None,
                        started_at,
                        finished_at,
                    });
                    emitter
                        .success(format!("{} completed", step.description))
                        .await;
                    emitter
                        .progress(index + 1, total, step.description.clone(), index + 1 == total)
                        .await;
                }
                Err(e) => {
                    let error = OrchestratorError::in_step(step.name.clone(), e);
                    results.push(StepResult {
                        name: step.name.clone(),
                        succeeded: false,
                        error_detail: Some(error.to_string()),
                        started_at,
                        finished_at,
                    });
                    emitter.error(error.to_string()).await;
                    emitter
                        .progress(index, total, format!("{} failed", step.description), true)
                        .await;
                    return PipelineRun {
                        pipeline: self.name.clone(),
                        results,
                        error: Some(error),
                    };
                }
            }
        }

        if total == 0 {
            emitter.progress(0, 0, "Nothing to do", true).await;
        }
        info!("Pipeline '{}' finished", self.name);
        PipelineRun {
            pipeline: self.name.clone(),
            results,
            error: None,
        }
    }
}
