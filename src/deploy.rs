//! Deploy pipeline: bucket, web server, load balancer, auto scaling, alerts.
//!
//! Steps run strictly in order and identifiers flow forward from the step that
//! creates them to the steps that need them. A step whose input never
//! materialised fails with [`StepError::MissingInput`] instead of calling the
//! provider with a made-up value.

use tracing::{info, warn};

use crate::config::StackConfig;
use crate::pipeline::{Done, PipelineReport, Runner, Step, StepError, StepResult};
use crate::provider::{
    AutoScalingGroupSpec, InstanceLaunch, InstanceState, LaunchTemplateSpec, Provider,
    ProviderError, ScalingPolicySpec,
};
use crate::waiter::{poll_until, Poll};

/// Installs Apache and serves a static page. Used for the instance and the template.
pub const WEB_SERVER_BOOTSTRAP: &str = "#!/bin/bash
sudo apt update
sudo apt install -y apache2
echo \"Hello World from EC2\" | sudo tee /var/www/html/index.html
sudo systemctl start apache2
";

/// Identifiers of everything the deploy managed to create.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeployedResources {
    pub bucket: Option<String>,
    pub instance_id: Option<String>,
    pub load_balancer_arn: Option<String>,
    pub target_group_arn: Option<String>,
    pub launch_template_id: Option<String>,
    pub auto_scaling_group: Option<String>,
    pub topic_arn: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Deployment {
    pub report: PipelineReport,
    pub resources: DeployedResources,
}

pub struct Deployer<'a, P: Provider + ?Sized> {
    provider: &'a P,
    config: &'a StackConfig,
}

impl<'a, P: Provider + ?Sized> Deployer<'a, P> {
    pub fn new(provider: &'a P, config: &'a StackConfig) -> Self {
        return Self { provider, config };
    }

    pub async fn run(&self) -> Deployment {
        info!("Starting infrastructure deployment");
        let mut runner = Runner::new("deploy", self.config.on_error);
        let mut resources = DeployedResources::default();

        resources.bucket = runner.run(Step::CreateBucket, self.create_bucket()).await;

        resources.instance_id = runner
            .run(Step::LaunchInstance, self.launch_instance())
            .await;
        let running = runner
            .run(
                Step::WaitInstanceRunning,
                self.wait_instance_running(resources.instance_id.as_deref()),
            )
            .await
            .is_some();

        resources.load_balancer_arn = runner
            .run(Step::CreateLoadBalancer, self.create_load_balancer())
            .await;
        resources.target_group_arn = runner
            .run(Step::CreateTargetGroup, self.create_target_group())
            .await;
        runner
            .run(
                Step::RegisterTarget,
                self.register_target(
                    resources.target_group_arn.as_deref(),
                    resources.instance_id.as_deref(),
                    running,
                ),
            )
            .await;

        resources.launch_template_id = runner
            .run(Step::CreateLaunchTemplate, self.create_launch_template())
            .await;
        resources.auto_scaling_group = runner
            .run(
                Step::CreateAutoScalingGroup,
                self.create_auto_scaling_group(
                    resources.launch_template_id.as_deref(),
                    resources.target_group_arn.as_deref(),
                ),
            )
            .await;
        runner
            .run(
                Step::PutScalingPolicy,
                self.put_scaling_policy(resources.auto_scaling_group.as_deref()),
            )
            .await;

        resources.topic_arn = runner.run(Step::CreateTopic, self.create_topic()).await;
        runner
            .run(
                Step::SubscribeEmail,
                self.subscribe_email(resources.topic_arn.as_deref()),
            )
            .await;

        let report = runner.finish();
        if report.halted {
            warn!(
                succeeded = report.succeeded(),
                failed = report.failures().len(),
                skipped = report.skipped(),
                "Infrastructure deployment halted"
            );
        } else {
            info!(
                succeeded = report.succeeded(),
                failed = report.failures().len(),
                "Infrastructure deployed"
            );
        }

        return Deployment { report, resources };
    }

    async fn create_bucket(&self) -> StepResult<String> {
        let name = &self.config.bucket_name;

        return match self.provider.create_bucket(name).await {
            Ok(()) => Ok(Done::new(name.clone(), format!("Bucket '{}' created", name))),
            Err(ProviderError::AlreadyExists(message)) => Ok(Done::new(
                name.clone(),
                format!("Bucket '{}' already exists: {}", name, message),
            )),
            Err(error) => Err(error.into()),
        };
    }

    async fn launch_instance(&self) -> StepResult<String> {
        let subnet_id = self
            .config
            .subnet_ids
            .first()
            .ok_or(StepError::MissingInput("subnet id"))?;

        let launch = InstanceLaunch {
            ami_id: self.config.ami_id.clone(),
            instance_type: self.config.instance_type.clone(),
            key_name: self.config.key_name.clone(),
            security_group_id: self.config.security_group_id.clone(),
            subnet_id: subnet_id.clone(),
            user_data: String::from(WEB_SERVER_BOOTSTRAP),
        };
        let instance_id = self.provider.run_instance(&launch).await?;

        let detail = format!("Instance '{}' launched", instance_id);
        return Ok(Done::new(instance_id, detail));
    }

    async fn wait_instance_running(&self, instance_id: Option<&str>) -> StepResult<()> {
        let instance_id = instance_id.ok_or(StepError::MissingInput("instance id"))?;
        info!(instance_id, "Waiting for instance to reach 'running'");

        let provider = self.provider;
        poll_until(
            "instance running",
            &self.config.waits.instance_running,
            move || async move {
                match provider.instance_state(instance_id).await {
                    Ok(InstanceState::Running) => Ok(Poll::Ready(())),
                    Ok(state @ (InstanceState::Pending | InstanceState::Unknown)) => {
                        Ok(Poll::Pending(state.to_string()))
                    }
                    Ok(state) => Err(ProviderError::Rejected {
                        code: String::from("IncorrectInstanceState"),
                        message: format!("instance {} is {}", instance_id, state),
                    }),
                    // Freshly launched ids can lag behind in describe calls.
                    Err(ProviderError::NotFound(_)) => {
                        Ok(Poll::Pending(String::from("not yet visible")))
                    }
                    Err(error) => Err(error),
                }
            },
        )
        .await?;

        return Ok(Done::new((), format!("Instance '{}' is running", instance_id)));
    }

    async fn create_load_balancer(&self) -> StepResult<String> {
        let arn = self
            .provider
            .create_load_balancer(
                &self.config.load_balancer_name,
                &self.config.subnet_ids,
                &self.config.security_group_id,
            )
            .await?;

        let detail = format!("Load balancer created: {}", arn);
        return Ok(Done::new(arn, detail));
    }

    async fn create_target_group(&self) -> StepResult<String> {
        let arn = self
            .provider
            .create_target_group(&self.config.target_group_name, &self.config.vpc_id)
            .await?;

        let detail = format!("Target group created: {}", arn);
        return Ok(Done::new(arn, detail));
    }

    async fn register_target(
        &self,
        target_group_arn: Option<&str>,
        instance_id: Option<&str>,
        running: bool,
    ) -> StepResult<()> {
        let target_group_arn =
            target_group_arn.ok_or(StepError::MissingInput("target group ARN"))?;
        let instance_id = instance_id.ok_or(StepError::MissingInput("instance id"))?;
        if !running {
            return Err(StepError::Blocked(Step::WaitInstanceRunning));
        }

        self.provider
            .register_target(target_group_arn, instance_id)
            .await?;

        return Ok(Done::new(
            (),
            format!("Instance '{}' registered with the target group", instance_id),
        ));
    }

    async fn create_launch_template(&self) -> StepResult<String> {
        let spec = LaunchTemplateSpec {
            name: self.config.launch_template_name.clone(),
            ami_id: self.config.ami_id.clone(),
            instance_type: self.config.instance_type.clone(),
            key_name: self.config.key_name.clone(),
            security_group_id: self.config.security_group_id.clone(),
            user_data: String::from(WEB_SERVER_BOOTSTRAP),
        };
        let template_id = self.provider.create_launch_template(&spec).await?;

        let detail = format!("Launch template created: {}", template_id);
        return Ok(Done::new(template_id, detail));
    }

    async fn create_auto_scaling_group(
        &self,
        launch_template_id: Option<&str>,
        target_group_arn: Option<&str>,
    ) -> StepResult<String> {
        let launch_template_id =
            launch_template_id.ok_or(StepError::MissingInput("launch template id"))?;
        if target_group_arn.is_none() {
            warn!("No target group available, the auto scaling group will not be attached to one");
        }

        let scaling = &self.config.scaling;
        let spec = AutoScalingGroupSpec {
            name: self.config.auto_scaling_group_name.clone(),
            launch_template_id: launch_template_id.to_string(),
            min_size: scaling.min_size,
            max_size: scaling.max_size,
            desired_capacity: scaling.desired_capacity,
            target_group_arn: target_group_arn.map(String::from),
            subnet_ids: self.config.subnet_ids.clone(),
        };
        self.provider.create_auto_scaling_group(&spec).await?;

        let detail = format!("Auto scaling group '{}' created", spec.name);
        return Ok(Done::new(spec.name, detail));
    }

    async fn put_scaling_policy(&self, group_name: Option<&str>) -> StepResult<()> {
        let group_name = group_name.ok_or(StepError::MissingInput("auto scaling group"))?;

        let scaling = &self.config.scaling;
        let spec = ScalingPolicySpec {
            group_name: group_name.to_string(),
            policy_name: scaling.policy_name.clone(),
            adjustment_type: scaling.adjustment_type.clone(),
            scaling_adjustment: scaling.scaling_adjustment,
            cooldown_secs: scaling.cooldown_secs,
        };
        self.provider.put_scaling_policy(&spec).await?;

        return Ok(Done::new(
            (),
            format!("Scaling policy '{}' configured", spec.policy_name),
        ));
    }

    async fn create_topic(&self) -> StepResult<String> {
        let arn = self.provider.create_topic(&self.config.topic_name).await?;

        let detail = format!("Topic created: {}", arn);
        return Ok(Done::new(arn, detail));
    }

    async fn subscribe_email(&self, topic_arn: Option<&str>) -> StepResult<()> {
        let topic_arn = topic_arn.ok_or(StepError::MissingInput("topic ARN"))?;

        self.provider
            .subscribe_email(topic_arn, &self.config.subscription_email)
            .await?;

        return Ok(Done::new(
            (),
            format!(
                "Email subscription for '{}' added to {}",
                self.config.subscription_email, topic_arn
            ),
        ));
    }
}
