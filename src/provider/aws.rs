use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_sdk_s3::types::SdkError;
use aws_types::region::Region;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::TryStreamExt;
use tracing::debug;

use super::{
    AutoScalingGroupSpec, InstanceLaunch, InstanceState, LaunchTemplateSpec, Provider,
    ProviderError, ProviderResult, ScalingPolicySpec,
};

/// Region in which buckets must be created without a location constraint.
const DEFAULT_BUCKET_REGION: &str = "us-east-1";

const LAUNCH_TEMPLATE_VERSION: &str = "$Latest";

pub struct AwsProvider {
    region: String,

    s3: aws_sdk_s3::Client,
    ec2: aws_sdk_ec2::Client,
    elb: aws_sdk_elasticloadbalancingv2::Client,
    autoscaling: aws_sdk_autoscaling::Client,
    sns: aws_sdk_sns::Client,
}

impl AwsProvider {
    pub async fn new(region: Option<&str>) -> Result<Self, ProviderError> {
        let region = match region {
            Some(provided_region) => Region::new(provided_region.to_string()),
            None => RegionProviderChain::default_provider()
                .region()
                .await
                .ok_or_else(|| ProviderError::Transport(String::from("No region configured")))?,
        };

        let region_name = region.as_ref().to_string();
        let sdk_config = aws_config::from_env().region(region).load().await;

        return Ok(Self {
            region: region_name,
            s3: aws_sdk_s3::Client::new(&sdk_config),
            ec2: aws_sdk_ec2::Client::new(&sdk_config),
            elb: aws_sdk_elasticloadbalancingv2::Client::new(&sdk_config),
            autoscaling: aws_sdk_autoscaling::Client::new(&sdk_config),
            sns: aws_sdk_sns::Client::new(&sdk_config),
        });
    }

    pub fn region(&self) -> &str {
        &self.region
    }
}

/// Every SDK crate re-exports the same `SdkError`; only the service error type varies.
fn sdk_error<E>(error: SdkError<E>, code: impl FnOnce(&E) -> Option<&str>) -> ProviderError
where
    E: std::error::Error + 'static,
{
    match error {
        SdkError::ServiceError { err, .. } => ProviderError::from_code(code(&err), err.to_string()),
        other => ProviderError::Transport(other.to_string()),
    }
}

fn missing(field: &str) -> ProviderError {
    ProviderError::InvalidResponse(format!("response did not include {}", field))
}

fn encode_user_data(script: &str) -> String {
    STANDARD.encode(script.as_bytes())
}

#[async_trait]
impl Provider for AwsProvider {
    async fn create_bucket(&self, name: &str) -> ProviderResult<()> {
        let mut request = self.s3.create_bucket().bucket(name);
        if self.region != DEFAULT_BUCKET_REGION {
            let constraint = aws_sdk_s3::model::BucketLocationConstraint::from(self.region.as_str());
            request = request.create_bucket_configuration(
                aws_sdk_s3::model::CreateBucketConfiguration::builder()
                    .location_constraint(constraint)
                    .build(),
            );
        }

        request
            .send()
            .await
            .map_err(|error| sdk_error(error, |err| err.code()))?;

        return Ok(());
    }

    async fn list_objects(&self, bucket: &str) -> ProviderResult<Vec<String>> {
        let pages: Vec<aws_sdk_s3::output::ListObjectsV2Output> = self
            .s3
            .list_objects_v2()
            .bucket(bucket)
            .into_paginator()
            .send()
            .try_collect()
            .await
            .map_err(|error| sdk_error(error, |err| err.code()))?;

        let keys = pages
            .iter()
            .flat_map(|page| page.contents().unwrap_or_else(|| &[]))
            .filter_map(|object| object.key())
            .map(String::from)
            .collect::<Vec<_>>();
        debug!(bucket, pages = pages.len(), objects = keys.len(), "Listed bucket");

        return Ok(keys);
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> ProviderResult<()> {
        self.s3
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|error| sdk_error(error, |err| err.code()))?;

        return Ok(());
    }

    async fn delete_bucket(&self, name: &str) -> ProviderResult<()> {
        self.s3
            .delete_bucket()
            .bucket(name)
            .send()
            .await
            .map_err(|error| sdk_error(error, |err| err.code()))?;

        return Ok(());
    }

    async fn run_instance(&self, launch: &InstanceLaunch) -> ProviderResult<String> {
        let result = self
            .ec2
            .run_instances()
            .image_id(&launch.ami_id)
            .instance_type(aws_sdk_ec2::model::InstanceType::from(
                launch.instance_type.as_str(),
            ))
            .key_name(&launch.key_name)
            .security_group_ids(&launch.security_group_id)
            .subnet_id(&launch.subnet_id)
            .user_data(encode_user_data(&launch.user_data))
            .min_count(1)
            .max_count(1)
            .send()
            .await
            .map_err(|error| sdk_error(error, |err| err.code()))?;

        let instance_id = result
            .instances()
            .unwrap_or_else(|| &[])
            .first()
            .and_then(|instance| instance.instance_id())
            .ok_or_else(|| missing("an instance id"))?;

        return Ok(instance_id.to_string());
    }

    async fn instance_state(&self, instance_id: &str) -> ProviderResult<InstanceState> {
        let states = self.instance_states(&[instance_id.to_string()]).await?;

        return match states.into_iter().find(|(id, _)| id == instance_id) {
            Some((_, state)) => Ok(state),
            None => Err(ProviderError::NotFound(instance_id.to_string())),
        };
    }

    async fn find_instances(&self, states: &[InstanceState]) -> ProviderResult<Vec<String>> {
        let filter = aws_sdk_ec2::model::Filter::builder()
            .name("instance-state-name")
            .set_values(Some(
                states.iter().map(|state| state.as_str().to_string()).collect(),
            ))
            .build();

        let pages: Vec<aws_sdk_ec2::output::DescribeInstancesOutput> = self
            .ec2
            .describe_instances()
            .filters(filter)
            .into_paginator()
            .send()
            .try_collect()
            .await
            .map_err(|error| sdk_error(error, |err| err.code()))?;

        let instance_ids = pages
            .iter()
            .flat_map(|page| page.reservations().unwrap_or_else(|| &[]))
            .flat_map(|reservation| reservation.instances().unwrap_or_else(|| &[]))
            .filter_map(|instance| instance.instance_id())
            .map(String::from)
            .collect();

        return Ok(instance_ids);
    }

    async fn terminate_instances(&self, instance_ids: &[String]) -> ProviderResult<()> {
        self.ec2
            .terminate_instances()
            .set_instance_ids(Some(instance_ids.to_vec()))
            .send()
            .await
            .map_err(|error| sdk_error(error, |err| err.code()))?;

        return Ok(());
    }

    async fn instance_states(
        &self,
        instance_ids: &[String],
    ) -> ProviderResult<Vec<(String, InstanceState)>> {
        let result = self
            .ec2
            .describe_instances()
            .set_instance_ids(Some(instance_ids.to_vec()))
            .send()
            .await
            .map_err(|error| sdk_error(error, |err| err.code()))?;

        let states = result
            .reservations()
            .unwrap_or_else(|| &[])
            .iter()
            .flat_map(|reservation| reservation.instances().unwrap_or_else(|| &[]))
            .filter_map(|instance| {
                let id = instance.instance_id()?;
                let state = instance
                    .state()
                    .and_then(|state| state.name())
                    .map(|name| InstanceState::parse(name.as_str()))
                    .unwrap_or(InstanceState::Unknown);
                Some((id.to_string(), state))
            })
            .collect();

        return Ok(states);
    }

    async fn create_load_balancer(
        &self,
        name: &str,
        subnet_ids: &[String],
        security_group_id: &str,
    ) -> ProviderResult<String> {
        let result = self
            .elb
            .create_load_balancer()
            .name(name)
            .set_subnets(Some(subnet_ids.to_vec()))
            .security_groups(security_group_id)
            .scheme(aws_sdk_elasticloadbalancingv2::model::LoadBalancerSchemeEnum::InternetFacing)
            .send()
            .await
            .map_err(|error| sdk_error(error, |err| err.code()))?;

        let arn = result
            .load_balancers()
            .unwrap_or_else(|| &[])
            .first()
            .and_then(|load_balancer| load_balancer.load_balancer_arn())
            .ok_or_else(|| missing("a load balancer ARN"))?;

        return Ok(arn.to_string());
    }

    async fn create_target_group(&self, name: &str, vpc_id: &str) -> ProviderResult<String> {
        let result = self
            .elb
            .create_target_group()
            .name(name)
            .protocol(aws_sdk_elasticloadbalancingv2::model::ProtocolEnum::Http)
            .port(80)
            .vpc_id(vpc_id)
            .send()
            .await
            .map_err(|error| sdk_error(error, |err| err.code()))?;

        let arn = result
            .target_groups()
            .unwrap_or_else(|| &[])
            .first()
            .and_then(|target_group| target_group.target_group_arn())
            .ok_or_else(|| missing("a target group ARN"))?;

        return Ok(arn.to_string());
    }

    async fn register_target(
        &self,
        target_group_arn: &str,
        instance_id: &str,
    ) -> ProviderResult<()> {
        self.elb
            .register_targets()
            .target_group_arn(target_group_arn)
            .targets(
                aws_sdk_elasticloadbalancingv2::model::TargetDescription::builder()
                    .id(instance_id)
                    .build(),
            )
            .send()
            .await
            .map_err(|error| sdk_error(error, |err| err.code()))?;

        return Ok(());
    }

    async fn find_load_balancer(&self, name: &str) -> ProviderResult<Option<String>> {
        let result = self
            .elb
            .describe_load_balancers()
            .names(name)
            .send()
            .await
            .map_err(|error| sdk_error(error, |err| err.code()));

        let result = match result {
            Ok(data) => data,
            Err(ProviderError::NotFound(_)) => return Ok(None),
            Err(error) => return Err(error),
        };

        let arn = result
            .load_balancers()
            .unwrap_or_else(|| &[])
            .first()
            .and_then(|load_balancer| load_balancer.load_balancer_arn())
            .map(String::from);

        return Ok(arn);
    }

    async fn load_balancer_exists(&self, arn: &str) -> ProviderResult<bool> {
        let result = self
            .elb
            .describe_load_balancers()
            .load_balancer_arns(arn)
            .send()
            .await
            .map_err(|error| sdk_error(error, |err| err.code()));

        return match result {
            Ok(data) => Ok(!data.load_balancers().unwrap_or_else(|| &[]).is_empty()),
            Err(ProviderError::NotFound(_)) => Ok(false),
            Err(error) => Err(error),
        };
    }

    async fn delete_load_balancer(&self, arn: &str) -> ProviderResult<()> {
        self.elb
            .delete_load_balancer()
            .load_balancer_arn(arn)
            .send()
            .await
            .map_err(|error| sdk_error(error, |err| err.code()))?;

        return Ok(());
    }

    async fn find_target_group(&self, name: &str) -> ProviderResult<Option<String>> {
        let result = self
            .elb
            .describe_target_groups()
            .names(name)
            .send()
            .await
            .map_err(|error| sdk_error(error, |err| err.code()));

        let result = match result {
            Ok(data) => data,
            Err(ProviderError::NotFound(_)) => return Ok(None),
            Err(error) => return Err(error),
        };

        let arn = result
            .target_groups()
            .unwrap_or_else(|| &[])
            .first()
            .and_then(|target_group| target_group.target_group_arn())
            .map(String::from);

        return Ok(arn);
    }

    async fn delete_target_group(&self, arn: &str) -> ProviderResult<()> {
        self.elb
            .delete_target_group()
            .target_group_arn(arn)
            .send()
            .await
            .map_err(|error| sdk_error(error, |err| err.code()))?;

        return Ok(());
    }

    async fn create_launch_template(&self, spec: &LaunchTemplateSpec) -> ProviderResult<String> {
        let data = aws_sdk_ec2::model::RequestLaunchTemplateData::builder()
            .image_id(&spec.ami_id)
            .instance_type(aws_sdk_ec2::model::InstanceType::from(
                spec.instance_type.as_str(),
            ))
            .key_name(&spec.key_name)
            .security_group_ids(&spec.security_group_id)
            .user_data(encode_user_data(&spec.user_data))
            .build();

        let result = self
            .ec2
            .create_launch_template()
            .launch_template_name(&spec.name)
            .launch_template_data(data)
            .send()
            .await
            .map_err(|error| sdk_error(error, |err| err.code()))?;

        let template_id = result
            .launch_template()
            .and_then(|template| template.launch_template_id())
            .ok_or_else(|| missing("a launch template id"))?;

        return Ok(template_id.to_string());
    }

    async fn delete_launch_template(&self, name: &str) -> ProviderResult<()> {
        self.ec2
            .delete_launch_template()
            .launch_template_name(name)
            .send()
            .await
            .map_err(|error| sdk_error(error, |err| err.code()))?;

        return Ok(());
    }

    async fn create_auto_scaling_group(&self, spec: &AutoScalingGroupSpec) -> ProviderResult<()> {
        let template = aws_sdk_autoscaling::model::LaunchTemplateSpecification::builder()
            .launch_template_id(&spec.launch_template_id)
            .version(LAUNCH_TEMPLATE_VERSION)
            .build();

        self.autoscaling
            .create_auto_scaling_group()
            .auto_scaling_group_name(&spec.name)
            .launch_template(template)
            .min_size(spec.min_size)
            .max_size(spec.max_size)
            .desired_capacity(spec.desired_capacity)
            .set_target_group_ar_ns(spec.target_group_arn.clone().map(|arn| vec![arn]))
            .vpc_zone_identifier(spec.subnet_ids.join(","))
            .send()
            .await
            .map_err(|error| sdk_error(error, |err| err.code()))?;

        return Ok(());
    }

    async fn put_scaling_policy(&self, spec: &ScalingPolicySpec) -> ProviderResult<()> {
        self.autoscaling
            .put_scaling_policy()
            .auto_scaling_group_name(&spec.group_name)
            .policy_name(&spec.policy_name)
            .adjustment_type(&spec.adjustment_type)
            .scaling_adjustment(spec.scaling_adjustment)
            .cooldown(spec.cooldown_secs)
            .send()
            .await
            .map_err(|error| sdk_error(error, |err| err.code()))?;

        return Ok(());
    }

    async fn set_group_capacity(
        &self,
        name: &str,
        min_size: i32,
        desired_capacity: i32,
    ) -> ProviderResult<()> {
        self.autoscaling
            .update_auto_scaling_group()
            .auto_scaling_group_name(name)
            .min_size(min_size)
            .desired_capacity(desired_capacity)
            .send()
            .await
            .map_err(|error| sdk_error(error, |err| err.code()))?;

        return Ok(());
    }

    async fn delete_auto_scaling_group(&self, name: &str, force: bool) -> ProviderResult<()> {
        self.autoscaling
            .delete_auto_scaling_group()
            .auto_scaling_group_name(name)
            .force_delete(force)
            .send()
            .await
            .map_err(|error| sdk_error(error, |err| err.code()))?;

        return Ok(());
    }

    async fn create_topic(&self, name: &str) -> ProviderResult<String> {
        let result = self
            .sns
            .create_topic()
            .name(name)
            .send()
            .await
            .map_err(|error| sdk_error(error, |err| err.code()))?;

        let arn = result.topic_arn().ok_or_else(|| missing("a topic ARN"))?;

        return Ok(arn.to_string());
    }

    async fn subscribe_email(&self, topic_arn: &str, email: &str) -> ProviderResult<()> {
        self.sns
            .subscribe()
            .topic_arn(topic_arn)
            .protocol("email")
            .endpoint(email)
            .send()
            .await
            .map_err(|error| sdk_error(error, |err| err.code()))?;

        return Ok(());
    }

    async fn list_topics(&self) -> ProviderResult<Vec<String>> {
        let pages: Vec<aws_sdk_sns::output::ListTopicsOutput> = self
            .sns
            .list_topics()
            .into_paginator()
            .send()
            .try_collect()
            .await
            .map_err(|error| sdk_error(error, |err| err.code()))?;

        let arns = pages
            .iter()
            .flat_map(|page| page.topics().unwrap_or_else(|| &[]))
            .filter_map(|topic| topic.topic_arn())
            .map(String::from)
            .collect();

        return Ok(arns);
    }

    async fn delete_topic(&self, arn: &str) -> ProviderResult<()> {
        self.sns
            .delete_topic()
            .topic_arn(arn)
            .send()
            .await
            .map_err(|error| sdk_error(error, |err| err.code()))?;

        return Ok(());
    }
}
