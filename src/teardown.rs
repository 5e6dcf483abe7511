//! Teardown pipeline, in reverse dependency order of the deploy.
//!
//! Resources that are already gone count as torn down.

use tracing::{info, warn};

use crate::config::{StackConfig, TopicMatch};
use crate::pipeline::{Done, PipelineReport, Runner, Step, StepError, StepResult};
use crate::provider::{InstanceState, Provider, ProviderError};
use crate::waiter::{poll_until, Poll};

/// States that still need terminating.
const LIVE_STATES: [InstanceState; 2] = [InstanceState::Running, InstanceState::Pending];

/// Picks the topic ARN to delete from a listing, in listing order.
///
/// `Exact` compares the name component (text after the last `:`). `Substring`
/// returns the first ARN containing `name` anywhere, so `alerts` also matches
/// `arn:...:alerts-staging` if that is listed first.
pub fn find_topic<'t>(topic_arns: &'t [String], name: &str, mode: TopicMatch) -> Option<&'t str> {
    topic_arns
        .iter()
        .map(String::as_str)
        .find(|arn| match mode {
            TopicMatch::Exact => arn.rsplit(':').next() == Some(name),
            TopicMatch::Substring => arn.contains(name),
        })
}

pub struct Teardown<'a, P: Provider + ?Sized> {
    provider: &'a P,
    config: &'a StackConfig,
}

impl<'a, P: Provider + ?Sized> Teardown<'a, P> {
    pub fn new(provider: &'a P, config: &'a StackConfig) -> Self {
        return Self { provider, config };
    }

    pub async fn run(&self) -> PipelineReport {
        info!("Starting infrastructure teardown");
        let mut runner = Runner::new("teardown", self.config.on_error);

        let emptied = runner
            .run(Step::EmptyBucket, self.empty_bucket())
            .await
            .is_some();
        runner
            .run(Step::DeleteBucket, self.delete_bucket(emptied))
            .await;
        runner
            .run(Step::TerminateInstances, self.terminate_instances())
            .await;
        let load_balancer_gone = runner
            .run(Step::DeleteLoadBalancer, self.delete_load_balancer())
            .await
            .is_some();
        runner
            .run(
                Step::DeleteTargetGroup,
                self.delete_target_group(load_balancer_gone),
            )
            .await;
        let scaled_down = runner
            .run(Step::ScaleDownGroup, self.scale_down_group())
            .await
            .is_some();
        runner
            .run(
                Step::DeleteAutoScalingGroup,
                self.delete_auto_scaling_group(scaled_down),
            )
            .await;
        runner
            .run(Step::DeleteLaunchTemplate, self.delete_launch_template())
            .await;
        runner.run(Step::DeleteTopic, self.delete_topic()).await;

        let report = runner.finish();
        if report.halted {
            warn!(
                succeeded = report.succeeded(),
                failed = report.failures().len(),
                skipped = report.skipped(),
                "Infrastructure teardown halted"
            );
        } else {
            info!(
                succeeded = report.succeeded(),
                failed = report.failures().len(),
                "Infrastructure teardown completed"
            );
        }

        return report;
    }

    async fn empty_bucket(&self) -> StepResult<usize> {
        let bucket = &self.config.bucket_name;

        let keys = match self.provider.list_objects(bucket).await {
            Ok(keys) => keys,
            Err(ProviderError::NotFound(_)) => {
                return Ok(Done::new(0, format!("Bucket '{}' not found", bucket)));
            }
            Err(error) => return Err(error.into()),
        };

        for key in &keys {
            self.provider.delete_object(bucket, key).await?;
            info!(bucket = %bucket, key = %key, "Deleted object");
        }

        let detail = format!("Deleted {} objects from '{}'", keys.len(), bucket);
        return Ok(Done::new(keys.len(), detail));
    }

    /// Only issued once every listed object is gone.
    async fn delete_bucket(&self, emptied: bool) -> StepResult<()> {
        if !emptied {
            return Err(StepError::Blocked(Step::EmptyBucket));
        }

        let bucket = &self.config.bucket_name;

        return match self.provider.delete_bucket(bucket).await {
            Ok(()) => Ok(Done::new((), format!("Bucket '{}' deleted", bucket))),
            Err(ProviderError::NotFound(_)) => Ok(Done::new(
                (),
                format!("Bucket '{}' not found, nothing to delete", bucket),
            )),
            Err(error) => Err(error.into()),
        };
    }

    async fn terminate_instances(&self) -> StepResult<Vec<String>> {
        let instance_ids = self.provider.find_instances(&LIVE_STATES).await?;
        if instance_ids.is_empty() {
            return Ok(Done::new(instance_ids, "No instances to terminate"));
        }

        self.provider.terminate_instances(&instance_ids).await?;
        info!(instances = ?instance_ids, "Terminating instances");

        let provider = self.provider;
        let ids = &instance_ids;
        poll_until(
            "instances terminated",
            &self.config.waits.instances_terminated,
            move || async move {
                let states = match provider.instance_states(ids).await {
                    Ok(states) => states,
                    Err(ProviderError::NotFound(_)) => return Ok(Poll::Ready(())),
                    Err(error) => return Err(error),
                };

                let remaining = states
                    .iter()
                    .filter(|(_, state)| *state != InstanceState::Terminated)
                    .count();
                if remaining == 0 {
                    Ok(Poll::Ready(()))
                } else {
                    Ok(Poll::Pending(format!(
                        "{} of {} not yet terminated",
                        remaining,
                        ids.len()
                    )))
                }
            },
        )
        .await?;

        let detail = format!("Terminated {} instances", instance_ids.len());
        return Ok(Done::new(instance_ids, detail));
    }

    async fn delete_load_balancer(&self) -> StepResult<()> {
        let name = &self.config.load_balancer_name;

        let arn = match self.provider.find_load_balancer(name).await? {
            Some(arn) => arn,
            None => {
                return Ok(Done::new(
                    (),
                    format!("Load balancer '{}' not found, nothing to delete", name),
                ))
            }
        };

        self.provider.delete_load_balancer(&arn).await?;
        info!(load_balancer = %name, "Deleting load balancer");

        let provider = self.provider;
        let lb_arn = arn.as_str();
        poll_until(
            "load balancer deleted",
            &self.config.waits.load_balancer_deleted,
            move || async move {
                match provider.load_balancer_exists(lb_arn).await {
                    Ok(true) => Ok(Poll::Pending(String::from("still exists"))),
                    Ok(false) => Ok(Poll::Ready(())),
                    Err(error) => Err(error),
                }
            },
        )
        .await?;

        return Ok(Done::new((), format!("Load balancer '{}' deleted", name)));
    }

    /// Waits on the load balancer step; a listener still referencing the group
    /// makes the delete fail with `ResourceInUse`.
    async fn delete_target_group(&self, load_balancer_gone: bool) -> StepResult<()> {
        if !load_balancer_gone {
            return Err(StepError::Blocked(Step::DeleteLoadBalancer));
        }

        let name = &self.config.target_group_name;

        let arn = match self.provider.find_target_group(name).await? {
            Some(arn) => arn,
            None => {
                return Ok(Done::new(
                    (),
                    format!("Target group '{}' not found, nothing to delete", name),
                ))
            }
        };
        self.provider.delete_target_group(&arn).await?;

        return Ok(Done::new((), format!("Target group '{}' deleted", name)));
    }

    async fn scale_down_group(&self) -> StepResult<()> {
        let name = &self.config.auto_scaling_group_name;
        self.provider.set_group_capacity(name, 0, 0).await?;

        return Ok(Done::new(
            (),
            format!("Auto scaling group '{}' scaled to zero", name),
        ));
    }

    /// Forced delete; the provider finishes draining instances on its own.
    async fn delete_auto_scaling_group(&self, scaled_down: bool) -> StepResult<()> {
        if !scaled_down {
            return Err(StepError::Blocked(Step::ScaleDownGroup));
        }

        let name = &self.config.auto_scaling_group_name;
        self.provider.delete_auto_scaling_group(name, true).await?;

        return Ok(Done::new(
            (),
            format!("Auto scaling group '{}' deleted", name),
        ));
    }

    async fn delete_launch_template(&self) -> StepResult<()> {
        let name = &self.config.launch_template_name;

        return match self.provider.delete_launch_template(name).await {
            Ok(()) => Ok(Done::new((), format!("Launch template '{}' deleted", name))),
            Err(ProviderError::NotFound(_)) => Ok(Done::new(
                (),
                format!("Launch template '{}' not found, nothing to delete", name),
            )),
            Err(error) => Err(error.into()),
        };
    }

    async fn delete_topic(&self) -> StepResult<Option<String>> {
        let name = &self.config.topic_name;
        let topic_arns = self.provider.list_topics().await?;

        let arn = match find_topic(&topic_arns, name, self.config.topic_match) {
            Some(arn) => arn.to_string(),
            None => {
                return Ok(Done::new(
                    None,
                    format!("No topic matching '{}', nothing to delete", name),
                ))
            }
        };
        self.provider.delete_topic(&arn).await?;

        let detail = format!("Topic '{}' deleted: {}", name, arn);
        return Ok(Done::new(Some(arn), detail));
    }
}

#[cfg(test)]
mod tests {
    use super::find_topic;
    use crate::config::TopicMatch;

    fn topics() -> Vec<String> {
        vec![
            String::from("arn:aws:sns:us-east-1:123456789012:my-infra-alerts-staging"),
            String::from("arn:aws:sns:us-east-1:123456789012:my-infra-alerts"),
            String::from("arn:aws:sns:us-east-1:123456789012:billing"),
        ]
    }

    #[test]
    fn exact_match_uses_the_topic_name() {
        let topics = topics();
        assert_eq!(
            find_topic(&topics, "my-infra-alerts", TopicMatch::Exact),
            Some("arn:aws:sns:us-east-1:123456789012:my-infra-alerts")
        );
    }

    #[test]
    fn substring_match_takes_the_first_listed() {
        let topics = topics();
        assert_eq!(
            find_topic(&topics, "my-infra-alerts", TopicMatch::Substring),
            Some("arn:aws:sns:us-east-1:123456789012:my-infra-alerts-staging")
        );
    }

    #[test]
    fn substring_match_can_hit_the_account_or_region() {
        let topics = topics();
        assert_eq!(
            find_topic(&topics, "us-east", TopicMatch::Substring),
            Some("arn:aws:sns:us-east-1:123456789012:my-infra-alerts-staging")
        );
        assert_eq!(find_topic(&topics, "us-east", TopicMatch::Exact), None);
    }

    #[test]
    fn no_match() {
        assert_eq!(find_topic(&topics(), "payments", TopicMatch::Exact), None);
        assert_eq!(find_topic(&[], "payments", TopicMatch::Substring), None);
    }
}
