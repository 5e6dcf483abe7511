//! Control-plane seam.
//!
//! The orchestrators only ever talk to a [`Provider`]. [`aws::AwsProvider`] backs it
//! with the AWS SDK; tests back it with an in-memory recorder.

use async_trait::async_trait;

pub mod aws;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Resource in use: {0}")]
    InUse(String),

    #[error("Not authorized: {0}")]
    Auth(String),

    #[error("Request rejected ({code}): {message}")]
    Rejected { code: String, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Maps a control-plane error code onto the error taxonomy.
    pub fn from_code(code: Option<&str>, message: impl Into<String>) -> Self {
        let message = message.into();
        let code = match code {
            Some(code) => code,
            None => return ProviderError::Transport(message),
        };

        match code {
            "BucketAlreadyExists" | "BucketAlreadyOwnedByYou" | "AlreadyExists" => {
                ProviderError::AlreadyExists(message)
            }
            "ResourceInUse" | "DependencyViolation" => ProviderError::InUse(message),
            "AuthFailure"
            | "UnauthorizedOperation"
            | "InvalidClientTokenId"
            | "ExpiredToken"
            | "SignatureDoesNotMatch" => ProviderError::Auth(message),
            _ if code.starts_with("AccessDenied") => ProviderError::Auth(message),
            _ if code.starts_with("NoSuch") || code.contains("NotFound") => {
                ProviderError::NotFound(message)
            }
            _ if code.ends_with("AlreadyExists") || code.starts_with("Duplicate") => {
                ProviderError::AlreadyExists(message)
            }
            _ => ProviderError::Rejected {
                code: code.to_string(),
                message,
            },
        }
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Lifecycle state of a compute instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Pending,
    Running,
    ShuttingDown,
    Stopping,
    Stopped,
    Terminated,
    Unknown,
}

impl InstanceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceState::Pending => "pending",
            InstanceState::Running => "running",
            InstanceState::ShuttingDown => "shutting-down",
            InstanceState::Stopping => "stopping",
            InstanceState::Stopped => "stopped",
            InstanceState::Terminated => "terminated",
            InstanceState::Unknown => "unknown",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "pending" => InstanceState::Pending,
            "running" => InstanceState::Running,
            "shutting-down" => InstanceState::ShuttingDown,
            "stopping" => InstanceState::Stopping,
            "stopped" => InstanceState::Stopped,
            "terminated" => InstanceState::Terminated,
            _ => InstanceState::Unknown,
        }
    }
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters for launching the single web server instance.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceLaunch {
    pub ami_id: String,
    pub instance_type: String,
    pub key_name: String,
    pub security_group_id: String,
    pub subnet_id: String,
    /// Plain-text bootstrap script; the provider encodes it.
    pub user_data: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LaunchTemplateSpec {
    pub name: String,
    pub ami_id: String,
    pub instance_type: String,
    pub key_name: String,
    pub security_group_id: String,
    pub user_data: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AutoScalingGroupSpec {
    pub name: String,
    pub launch_template_id: String,
    pub min_size: i32,
    pub max_size: i32,
    pub desired_capacity: i32,
    /// Absent when the target group could not be created.
    pub target_group_arn: Option<String>,
    pub subnet_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScalingPolicySpec {
    pub group_name: String,
    pub policy_name: String,
    pub adjustment_type: String,
    pub scaling_adjustment: i32,
    pub cooldown_secs: i32,
}

/// Every control-plane call the deploy and teardown pipelines make.
#[async_trait]
pub trait Provider: Send + Sync {
    // Object storage

    async fn create_bucket(&self, name: &str) -> ProviderResult<()>;

    /// Lists every object key in the bucket, following pagination.
    async fn list_objects(&self, bucket: &str) -> ProviderResult<Vec<String>>;

    async fn delete_object(&self, bucket: &str, key: &str) -> ProviderResult<()>;

    async fn delete_bucket(&self, name: &str) -> ProviderResult<()>;

    // Compute

    /// Launches one instance and returns its id.
    async fn run_instance(&self, launch: &InstanceLaunch) -> ProviderResult<String>;

    async fn instance_state(&self, instance_id: &str) -> ProviderResult<InstanceState>;

    /// Ids of every instance currently in one of `states`.
    async fn find_instances(&self, states: &[InstanceState]) -> ProviderResult<Vec<String>>;

    async fn terminate_instances(&self, instance_ids: &[String]) -> ProviderResult<()>;

    /// States of the given instances, in no particular order.
    async fn instance_states(
        &self,
        instance_ids: &[String],
    ) -> ProviderResult<Vec<(String, InstanceState)>>;

    // Load balancing

    async fn create_load_balancer(
        &self,
        name: &str,
        subnet_ids: &[String],
        security_group_id: &str,
    ) -> ProviderResult<String>;

    async fn create_target_group(&self, name: &str, vpc_id: &str) -> ProviderResult<String>;

    async fn register_target(&self, target_group_arn: &str, instance_id: &str)
        -> ProviderResult<()>;

    async fn find_load_balancer(&self, name: &str) -> ProviderResult<Option<String>>;

    async fn load_balancer_exists(&self, arn: &str) -> ProviderResult<bool>;

    async fn delete_load_balancer(&self, arn: &str) -> ProviderResult<()>;

    async fn find_target_group(&self, name: &str) -> ProviderResult<Option<String>>;

    async fn delete_target_group(&self, arn: &str) -> ProviderResult<()>;

    // Launch templates and auto scaling

    /// Returns the template id.
    async fn create_launch_template(&self, spec: &LaunchTemplateSpec) -> ProviderResult<String>;

    async fn delete_launch_template(&self, name: &str) -> ProviderResult<()>;

    async fn create_auto_scaling_group(&self, spec: &AutoScalingGroupSpec) -> ProviderResult<()>;

    async fn put_scaling_policy(&self, spec: &ScalingPolicySpec) -> ProviderResult<()>;

    async fn set_group_capacity(
        &self,
        name: &str,
        min_size: i32,
        desired_capacity: i32,
    ) -> ProviderResult<()>;

    async fn delete_auto_scaling_group(&self, name: &str, force: bool) -> ProviderResult<()>;

    // Notifications

    /// Returns the topic ARN.
    async fn create_topic(&self, name: &str) -> ProviderResult<String>;

    async fn subscribe_email(&self, topic_arn: &str, email: &str) -> ProviderResult<()>;

    /// Every topic ARN in listing order, following pagination.
    async fn list_topics(&self) -> ProviderResult<Vec<String>>;

    async fn delete_topic(&self, arn: &str) -> ProviderResult<()>;
}

#[cfg(test)]
mod tests {
    use super::{InstanceState, ProviderError};

    #[test]
    fn classifies_bucket_conflicts_as_already_exists() {
        for code in ["BucketAlreadyExists", "BucketAlreadyOwnedByYou"] {
            match ProviderError::from_code(Some(code), "taken") {
                ProviderError::AlreadyExists(_) => {}
                other => panic!("Expected `AlreadyExists`, got {:?}", other),
            }
        }
    }

    #[test]
    fn classifies_not_found_codes() {
        for code in [
            "NoSuchBucket",
            "LoadBalancerNotFound",
            "TargetGroupNotFound",
            "InvalidInstanceID.NotFound",
            "NotFound",
        ] {
            assert_eq!(
                ProviderError::from_code(Some(code), "gone"),
                ProviderError::NotFound(String::from("gone"))
            );
        }
    }

    #[test]
    fn classifies_auth_codes() {
        for code in ["AuthFailure", "AccessDenied", "AccessDeniedException", "ExpiredToken"] {
            assert_eq!(
                ProviderError::from_code(Some(code), "no"),
                ProviderError::Auth(String::from("no"))
            );
        }
    }

    #[test]
    fn unknown_codes_are_rejections() {
        assert_eq!(
            ProviderError::from_code(Some("InvalidAMIID.Malformed"), "bad ami"),
            ProviderError::Rejected {
                code: String::from("InvalidAMIID.Malformed"),
                message: String::from("bad ami"),
            }
        );
    }

    #[test]
    fn missing_code_is_transport() {
        assert_eq!(
            ProviderError::from_code(None, "dispatch failure"),
            ProviderError::Transport(String::from("dispatch failure"))
        );
    }

    #[test]
    fn instance_state_parses_provider_names() {
        assert_eq!(InstanceState::parse("shutting-down"), InstanceState::ShuttingDown);
        assert_eq!(InstanceState::parse("running"), InstanceState::Running);
        assert_eq!(InstanceState::parse("rebooting"), InstanceState::Unknown);
        assert_eq!(InstanceState::Terminated.to_string(), "terminated");
    }
}
