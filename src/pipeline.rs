//! Ordered step execution with a per-step outcome and a configurable error policy.

use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::provider::ProviderError;
use crate::waiter::WaitError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    CreateBucket,
    LaunchInstance,
    WaitInstanceRunning,
    CreateLoadBalancer,
    CreateTargetGroup,
    RegisterTarget,
    CreateLaunchTemplate,
    CreateAutoScalingGroup,
    PutScalingPolicy,
    CreateTopic,
    SubscribeEmail,

    EmptyBucket,
    DeleteBucket,
    TerminateInstances,
    DeleteLoadBalancer,
    DeleteTargetGroup,
    ScaleDownGroup,
    DeleteAutoScalingGroup,
    DeleteLaunchTemplate,
    DeleteTopic,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::CreateBucket => "create bucket",
            Step::LaunchInstance => "launch instance",
            Step::WaitInstanceRunning => "wait for instance running",
            Step::CreateLoadBalancer => "create load balancer",
            Step::CreateTargetGroup => "create target group",
            Step::RegisterTarget => "register target",
            Step::CreateLaunchTemplate => "create launch template",
            Step::CreateAutoScalingGroup => "create auto scaling group",
            Step::PutScalingPolicy => "put scaling policy",
            Step::CreateTopic => "create topic",
            Step::SubscribeEmail => "subscribe email",
            Step::EmptyBucket => "empty bucket",
            Step::DeleteBucket => "delete bucket",
            Step::TerminateInstances => "terminate instances",
            Step::DeleteLoadBalancer => "delete load balancer",
            Step::DeleteTargetGroup => "delete target group",
            Step::ScaleDownGroup => "scale down auto scaling group",
            Step::DeleteAutoScalingGroup => "delete auto scaling group",
            Step::DeleteLaunchTemplate => "delete launch template",
            Step::DeleteTopic => "delete topic",
        };
        f.write_str(name)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum StepError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Wait(#[from] WaitError),

    #[error("Missing {0}: the step producing it did not succeed")]
    MissingInput(&'static str),

    #[error("Blocked: `{0}` did not succeed")]
    Blocked(Step),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Recoverable,
    Fatal,
}

impl StepError {
    /// Credentials problems affect every later call, so they are fatal.
    pub fn severity(&self) -> Severity {
        match self {
            StepError::Provider(ProviderError::Auth(_))
            | StepError::Wait(WaitError::Provider(ProviderError::Auth(_))) => Severity::Fatal,
            _ => Severity::Recoverable,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorPolicy {
    /// Keep going past recoverable errors; stop on fatal ones.
    #[default]
    ContinueOnError,
    /// Stop at the first failed step.
    AbortOnError,
}

impl ErrorPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "continue-on-error" | "continue" => Some(ErrorPolicy::ContinueOnError),
            "abort-on-error" | "abort" => Some(ErrorPolicy::AbortOnError),
            _ => None,
        }
    }

    fn halts_on(&self, severity: Severity) -> bool {
        match self {
            ErrorPolicy::ContinueOnError => severity == Severity::Fatal,
            ErrorPolicy::AbortOnError => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Succeeded { detail: String },
    Failed { severity: Severity, error: StepError },
    Skipped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub step: Step,
    pub outcome: StepOutcome,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PipelineReport {
    pub steps: Vec<StepReport>,
    pub halted: bool,
}

impl PipelineReport {
    pub fn is_success(&self) -> bool {
        self.steps
            .iter()
            .all(|report| matches!(report.outcome, StepOutcome::Succeeded { .. }))
    }

    pub fn failures(&self) -> Vec<&StepReport> {
        self.steps
            .iter()
            .filter(|report| matches!(report.outcome, StepOutcome::Failed { .. }))
            .collect()
    }

    pub fn succeeded(&self) -> usize {
        self.steps
            .iter()
            .filter(|report| matches!(report.outcome, StepOutcome::Succeeded { .. }))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.steps
            .iter()
            .filter(|report| report.outcome == StepOutcome::Skipped)
            .count()
    }

    pub fn outcome(&self, step: Step) -> Option<&StepOutcome> {
        self.steps
            .iter()
            .find(|report| report.step == step)
            .map(|report| &report.outcome)
    }

    pub fn order(&self) -> Vec<Step> {
        self.steps.iter().map(|report| report.step).collect()
    }
}

/// What a step hands back on success: the value threaded to later steps and a
/// status line for the log.
pub struct Done<T> {
    pub value: T,
    pub detail: String,
}

impl<T> Done<T> {
    pub fn new(value: T, detail: impl Into<String>) -> Self {
        return Self {
            value,
            detail: detail.into(),
        };
    }
}

pub type StepResult<T> = Result<Done<T>, StepError>;

/// Runs steps strictly in call order and records each outcome.
pub struct Runner {
    name: &'static str,
    policy: ErrorPolicy,
    report: PipelineReport,
}

impl Runner {
    pub fn new(name: &'static str, policy: ErrorPolicy) -> Self {
        return Self {
            name,
            policy,
            report: PipelineReport::default(),
        };
    }

    /// Runs `work` unless the pipeline already halted, in which case the future
    /// is dropped unpolled and the step is recorded as skipped.
    pub async fn run<T, Fut>(&mut self, step: Step, work: Fut) -> Option<T>
    where
        Fut: Future<Output = StepResult<T>>,
    {
        if self.report.halted {
            warn!(pipeline = self.name, %step, "Skipped");
            self.record(step, StepOutcome::Skipped);
            return None;
        }

        match work.await {
            Ok(done) => {
                info!(pipeline = self.name, %step, "{}", done.detail);
                self.record(
                    step,
                    StepOutcome::Succeeded {
                        detail: done.detail,
                    },
                );
                Some(done.value)
            }
            Err(step_error) => {
                let severity = step_error.severity();
                error!(pipeline = self.name, %step, ?severity, error = %step_error, "Step failed");
                self.record(
                    step,
                    StepOutcome::Failed {
                        severity,
                        error: step_error,
                    },
                );

                if self.policy.halts_on(severity) {
                    warn!(pipeline = self.name, policy = ?self.policy, "Halting pipeline");
                    self.report.halted = true;
                }
                None
            }
        }
    }

    fn record(&mut self, step: Step, outcome: StepOutcome) {
        self.report.steps.push(StepReport { step, outcome });
    }

    pub fn finish(self) -> PipelineReport {
        self.report
    }
}
