//! In-memory provider that records every control-plane call in order.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use webstack::config::{ScalingSettings, StackConfig, TopicMatch, WaitSettings};
use webstack::pipeline::ErrorPolicy;
use webstack::provider::{
    AutoScalingGroupSpec, InstanceLaunch, InstanceState, LaunchTemplateSpec, Provider,
    ProviderError, ProviderResult, ScalingPolicySpec,
};
use webstack::waiter::PollSettings;

pub const INSTANCE_ID: &str = "i-0123456789abcdef0";
pub const LOAD_BALANCER_ARN: &str =
    "arn:aws:elasticloadbalancing:us-east-1:123456789012:loadbalancer/app/web-lb/50dc6c495c0c9188";
pub const TARGET_GROUP_ARN: &str =
    "arn:aws:elasticloadbalancing:us-east-1:123456789012:targetgroup/web-tg/73e2d6bc24d8a067";
pub const TEMPLATE_ID: &str = "lt-0abcd290751193123";
pub const TOPIC_ARN: &str = "arn:aws:sns:us-east-1:123456789012:web-alerts";

pub fn test_config() -> StackConfig {
    let quick = PollSettings {
        interval_secs: 0,
        max_attempts: 5,
    };

    StackConfig {
        region: Some(String::from("us-east-1")),
        bucket_name: String::from("web-bucket"),
        ami_id: String::from("ami-0e2c8caa4b6378d8c"),
        instance_type: String::from("t2.micro"),
        key_name: String::from("deploy-key"),
        security_group_id: String::from("sg-00254169f81cec7df"),
        subnet_ids: vec![
            String::from("subnet-044e72c086482387d"),
            String::from("subnet-004a47b3f20739b81"),
        ],
        vpc_id: String::from("vpc-0719c24f48530d957"),
        load_balancer_name: String::from("web-lb"),
        target_group_name: String::from("web-tg"),
        auto_scaling_group_name: String::from("web-asg"),
        launch_template_name: String::from("web-template"),
        topic_name: String::from("web-alerts"),
        subscription_email: String::from("ops@example.com"),
        on_error: ErrorPolicy::ContinueOnError,
        topic_match: TopicMatch::Exact,
        scaling: ScalingSettings::default(),
        waits: WaitSettings {
            instance_running: quick,
            instances_terminated: quick,
            load_balancer_deleted: quick,
        },
    }
}

pub fn rejected(code: &str) -> ProviderError {
    ProviderError::Rejected {
        code: code.to_string(),
        message: format!("{} (simulated)", code),
    }
}

#[derive(Default)]
struct State {
    calls: Vec<String>,
    failures: HashMap<&'static str, ProviderError>,

    objects: Vec<String>,

    polls_until_running: u32,
    stuck_pending: bool,
    launches: Vec<InstanceLaunch>,

    live_instances: Vec<String>,
    polls_until_terminated: u32,

    load_balancer: Option<String>,
    polls_until_load_balancer_gone: u32,
    target_group: Option<String>,

    groups: Vec<AutoScalingGroupSpec>,

    topics: Vec<String>,
}

#[derive(Default)]
pub struct RecordingProvider {
    state: Mutex<State>,
}

impl RecordingProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every later call to `method` fails with `error`.
    pub fn fail(self, method: &'static str, error: ProviderError) -> Self {
        self.state.lock().unwrap().failures.insert(method, error);
        self
    }

    pub fn with_objects(self, keys: &[&str]) -> Self {
        self.state.lock().unwrap().objects = keys.iter().map(|key| key.to_string()).collect();
        self
    }

    pub fn pending_for(self, polls: u32) -> Self {
        self.state.lock().unwrap().polls_until_running = polls;
        self
    }

    pub fn stuck_pending(self) -> Self {
        self.state.lock().unwrap().stuck_pending = true;
        self
    }

    pub fn with_live_instances(self, ids: &[&str], polls_until_terminated: u32) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.live_instances = ids.iter().map(|id| id.to_string()).collect();
            state.polls_until_terminated = polls_until_terminated;
        }
        self
    }

    pub fn with_load_balancer(self, polls_until_gone: u32) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.load_balancer = Some(LOAD_BALANCER_ARN.to_string());
            state.polls_until_load_balancer_gone = polls_until_gone;
        }
        self
    }

    pub fn with_target_group(self) -> Self {
        self.state.lock().unwrap().target_group = Some(TARGET_GROUP_ARN.to_string());
        self
    }

    pub fn with_topics(self, arns: &[&str]) -> Self {
        self.state.lock().unwrap().topics = arns.iter().map(|arn| arn.to_string()).collect();
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Index of the first call starting with `prefix`.
    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.calls().iter().position(|call| call.starts_with(prefix))
    }

    /// Index of the last call starting with `prefix`.
    pub fn last_position(&self, prefix: &str) -> Option<usize> {
        self.calls().iter().rposition(|call| call.starts_with(prefix))
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    pub fn launches(&self) -> Vec<InstanceLaunch> {
        self.state.lock().unwrap().launches.clone()
    }

    pub fn groups(&self) -> Vec<AutoScalingGroupSpec> {
        self.state.lock().unwrap().groups.clone()
    }

    fn record(&self, method: &'static str, call: String) -> ProviderResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        match state.failures.get(method) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Provider for RecordingProvider {
    async fn create_bucket(&self, name: &str) -> ProviderResult<()> {
        self.record("create_bucket", format!("create_bucket:{}", name))
    }

    async fn list_objects(&self, bucket: &str) -> ProviderResult<Vec<String>> {
        self.record("list_objects", format!("list_objects:{}", bucket))?;
        Ok(self.state.lock().unwrap().objects.clone())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> ProviderResult<()> {
        self.record("delete_object", format!("delete_object:{}/{}", bucket, key))
    }

    async fn delete_bucket(&self, name: &str) -> ProviderResult<()> {
        self.record("delete_bucket", format!("delete_bucket:{}", name))
    }

    async fn run_instance(&self, launch: &InstanceLaunch) -> ProviderResult<String> {
        self.record(
            "run_instance",
            format!("run_instance:{}@{}", launch.ami_id, launch.subnet_id),
        )?;
        self.state.lock().unwrap().launches.push(launch.clone());
        Ok(INSTANCE_ID.to_string())
    }

    async fn instance_state(&self, instance_id: &str) -> ProviderResult<InstanceState> {
        self.record("instance_state", format!("instance_state:{}", instance_id))?;

        let mut state = self.state.lock().unwrap();
        if state.stuck_pending {
            return Ok(InstanceState::Pending);
        }
        if state.polls_until_running > 0 {
            state.polls_until_running -= 1;
            return Ok(InstanceState::Pending);
        }
        Ok(InstanceState::Running)
    }

    async fn find_instances(&self, states: &[InstanceState]) -> ProviderResult<Vec<String>> {
        let names: Vec<&str> = states.iter().map(|state| state.as_str()).collect();
        self.record("find_instances", format!("find_instances:{}", names.join(",")))?;
        Ok(self.state.lock().unwrap().live_instances.clone())
    }

    async fn terminate_instances(&self, instance_ids: &[String]) -> ProviderResult<()> {
        self.record(
            "terminate_instances",
            format!("terminate_instances:{}", instance_ids.join(",")),
        )
    }

    async fn instance_states(
        &self,
        instance_ids: &[String],
    ) -> ProviderResult<Vec<(String, InstanceState)>> {
        self.record(
            "instance_states",
            format!("instance_states:{}", instance_ids.join(",")),
        )?;

        let mut state = self.state.lock().unwrap();
        let current = if state.polls_until_terminated > 0 {
            state.polls_until_terminated -= 1;
            InstanceState::ShuttingDown
        } else {
            InstanceState::Terminated
        };
        Ok(instance_ids
            .iter()
            .map(|id| (id.clone(), current))
            .collect())
    }

    async fn create_load_balancer(
        &self,
        name: &str,
        subnet_ids: &[String],
        security_group_id: &str,
    ) -> ProviderResult<String> {
        self.record(
            "create_load_balancer",
            format!(
                "create_load_balancer:{} subnets={} sg={}",
                name,
                subnet_ids.join(","),
                security_group_id
            ),
        )?;
        Ok(LOAD_BALANCER_ARN.to_string())
    }

    async fn create_target_group(&self, name: &str, vpc_id: &str) -> ProviderResult<String> {
        self.record(
            "create_target_group",
            format!("create_target_group:{} vpc={}", name, vpc_id),
        )?;
        Ok(TARGET_GROUP_ARN.to_string())
    }

    async fn register_target(
        &self,
        target_group_arn: &str,
        instance_id: &str,
    ) -> ProviderResult<()> {
        self.record(
            "register_target",
            format!("register_target:{}<-{}", target_group_arn, instance_id),
        )
    }

    async fn find_load_balancer(&self, name: &str) -> ProviderResult<Option<String>> {
        self.record("find_load_balancer", format!("find_load_balancer:{}", name))?;
        Ok(self.state.lock().unwrap().load_balancer.clone())
    }

    async fn load_balancer_exists(&self, arn: &str) -> ProviderResult<bool> {
        self.record("load_balancer_exists", format!("load_balancer_exists:{}", arn))?;

        let mut state = self.state.lock().unwrap();
        if state.polls_until_load_balancer_gone > 0 {
            state.polls_until_load_balancer_gone -= 1;
            return Ok(true);
        }
        Ok(false)
    }

    async fn delete_load_balancer(&self, arn: &str) -> ProviderResult<()> {
        self.record("delete_load_balancer", format!("delete_load_balancer:{}", arn))
    }

    async fn find_target_group(&self, name: &str) -> ProviderResult<Option<String>> {
        self.record("find_target_group", format!("find_target_group:{}", name))?;
        Ok(self.state.lock().unwrap().target_group.clone())
    }

    async fn delete_target_group(&self, arn: &str) -> ProviderResult<()> {
        self.record("delete_target_group", format!("delete_target_group:{}", arn))
    }

    async fn create_launch_template(&self, spec: &LaunchTemplateSpec) -> ProviderResult<String> {
        self.record(
            "create_launch_template",
            format!("create_launch_template:{}", spec.name),
        )?;
        Ok(TEMPLATE_ID.to_string())
    }

    async fn delete_launch_template(&self, name: &str) -> ProviderResult<()> {
        self.record(
            "delete_launch_template",
            format!("delete_launch_template:{}", name),
        )
    }

    async fn create_auto_scaling_group(&self, spec: &AutoScalingGroupSpec) -> ProviderResult<()> {
        self.record(
            "create_auto_scaling_group",
            format!(
                "create_auto_scaling_group:{} template={} tg={}",
                spec.name,
                spec.launch_template_id,
                spec.target_group_arn.as_deref().unwrap_or("none")
            ),
        )?;
        self.state.lock().unwrap().groups.push(spec.clone());
        Ok(())
    }

    async fn put_scaling_policy(&self, spec: &ScalingPolicySpec) -> ProviderResult<()> {
        self.record(
            "put_scaling_policy",
            format!("put_scaling_policy:{}/{}", spec.group_name, spec.policy_name),
        )
    }

    async fn set_group_capacity(
        &self,
        name: &str,
        min_size: i32,
        desired_capacity: i32,
    ) -> ProviderResult<()> {
        self.record(
            "set_group_capacity",
            format!(
                "set_group_capacity:{} min={} desired={}",
                name, min_size, desired_capacity
            ),
        )
    }

    async fn delete_auto_scaling_group(&self, name: &str, force: bool) -> ProviderResult<()> {
        self.record(
            "delete_auto_scaling_group",
            format!("delete_auto_scaling_group:{} force={}", name, force),
        )
    }

    async fn create_topic(&self, name: &str) -> ProviderResult<String> {
        self.record("create_topic", format!("create_topic:{}", name))?;
        Ok(TOPIC_ARN.to_string())
    }

    async fn subscribe_email(&self, topic_arn: &str, email: &str) -> ProviderResult<()> {
        self.record(
            "subscribe_email",
            format!("subscribe_email:{}<-{}", topic_arn, email),
        )
    }

    async fn list_topics(&self) -> ProviderResult<Vec<String>> {
        self.record("list_topics", String::from("list_topics"))?;
        Ok(self.state.lock().unwrap().topics.clone())
    }

    async fn delete_topic(&self, arn: &str) -> ProviderResult<()> {
        self.record("delete_topic", format!("delete_topic:{}", arn))
    }
}
