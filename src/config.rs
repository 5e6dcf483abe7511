use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::{fs, io};
use validator::{Validate, ValidationError};

use crate::pipeline::ErrorPolicy;
use crate::waiter::PollSettings;

pub const CONFIG_PATH_VAR: &str = "WEBSTACK_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "./config.yaml";

const ENV_PREFIX: &str = "WEBSTACK_";

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("File {0} not found")]
    FileNotFound(String),

    #[error("Parsing error: {0}")]
    ParsingError(String),

    #[error("Validation errors: {0}")]
    ValidationError(String),

    #[error("Unknown error occurred: {0}")]
    Unknown(String),
}

/// How the teardown finds the notification topic among all listed topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TopicMatch {
    /// The name component of the topic ARN equals the configured name.
    #[default]
    Exact,
    /// The first listed ARN that contains the configured name anywhere.
    Substring,
}

impl TopicMatch {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "exact" => Some(TopicMatch::Exact),
            "substring" => Some(TopicMatch::Substring),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_capacity"))]
#[serde(default)]
pub struct ScalingSettings {
    #[validate(range(min = 0))]
    pub min_size: i32,
    #[validate(range(min = 1))]
    pub max_size: i32,
    pub desired_capacity: i32,

    #[validate(length(min = 1))]
    pub policy_name: String,
    #[validate(length(min = 1))]
    pub adjustment_type: String,
    pub scaling_adjustment: i32,
    #[validate(range(min = 0))]
    pub cooldown_secs: i32,
}

impl Default for ScalingSettings {
    fn default() -> Self {
        return Self {
            min_size: 1,
            max_size: 3,
            desired_capacity: 1,
            policy_name: String::from("scale-out"),
            adjustment_type: String::from("ChangeInCapacity"),
            scaling_adjustment: 1,
            cooldown_secs: 300,
        };
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct WaitSettings {
    #[validate]
    pub instance_running: PollSettings,
    #[validate]
    pub instances_terminated: PollSettings,
    #[validate]
    pub load_balancer_deleted: PollSettings,
}

/// The configuration file as written, before environment overrides.
#[derive(Debug, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ConfigFile {
    pub region: Option<String>,

    #[validate(required, length(min = 3, max = 63))]
    pub bucket_name: Option<String>,

    #[validate(required, custom = "validate_ami_id")]
    pub ami_id: Option<String>,

    pub instance_type: Option<String>,

    #[validate(required, length(min = 1))]
    pub key_name: Option<String>,

    #[validate(required, custom = "validate_security_group_id")]
    pub security_group_id: Option<String>,

    #[validate(required, length(min = 1), custom = "validate_subnet_ids")]
    pub subnet_ids: Option<Vec<String>>,

    #[validate(required, custom = "validate_vpc_id")]
    pub vpc_id: Option<String>,

    #[validate(required, length(min = 1, max = 32))]
    pub load_balancer_name: Option<String>,

    #[validate(required, length(min = 1, max = 32))]
    pub target_group_name: Option<String>,

    #[validate(required, length(min = 1))]
    pub auto_scaling_group_name: Option<String>,

    #[validate(required, length(min = 3))]
    pub launch_template_name: Option<String>,

    #[validate(required, length(min = 1, max = 256))]
    pub topic_name: Option<String>,

    #[validate(required, email)]
    pub subscription_email: Option<String>,

    pub on_error: ErrorPolicy,

    pub topic_match: TopicMatch,

    #[validate]
    pub scaling: ScalingSettings,

    #[validate]
    pub waits: WaitSettings,
}

/// Validated settings the orchestrators are built from.
#[derive(Debug, Clone, PartialEq)]
pub struct StackConfig {
    /// Falls back to the provider's default region chain when absent.
    pub region: Option<String>,
    pub bucket_name: String,
    pub ami_id: String,
    pub instance_type: String,
    pub key_name: String,
    pub security_group_id: String,
    pub subnet_ids: Vec<String>,
    pub vpc_id: String,
    pub load_balancer_name: String,
    pub target_group_name: String,
    pub auto_scaling_group_name: String,
    pub launch_template_name: String,
    pub topic_name: String,
    pub subscription_email: String,
    pub on_error: ErrorPolicy,
    pub topic_match: TopicMatch,
    pub scaling: ScalingSettings,
    pub waits: WaitSettings,
}

pub fn parse(path: &Path) -> Result<ConfigFile, Error> {
    let contents = match fs::read_to_string(path) {
        Ok(raw_contents) => Ok(raw_contents),
        Err(error) => match error.kind() {
            io::ErrorKind::NotFound => Err(Error::FileNotFound(path.display().to_string())),
            _ => Err(Error::Unknown(error.to_string())),
        },
    }?;

    let config: ConfigFile = match serde_yaml::from_str(&contents) {
        Ok(data) => Ok(data),
        Err(error) => Err(Error::ParsingError(error.to_string())),
    }?;

    return Ok(config);
}

/// Loads the file (if any), applies `WEBSTACK_*` overrides from `lookup`, validates.
///
/// An explicit `path` must exist. Without one, a missing default file means the
/// configuration comes from the environment alone.
pub fn load<F>(path: Option<&Path>, lookup: F) -> Result<StackConfig, Error>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config_file = match path {
        Some(path) => parse(path)?,
        None => match parse(Path::new(DEFAULT_CONFIG_PATH)) {
            Ok(config_file) => config_file,
            Err(Error::FileNotFound(_)) => ConfigFile::default(),
            Err(error) => return Err(error),
        },
    };

    config_file.apply_env(lookup)?;
    return config_file.into_stack_config();
}

/// [`load`] against the process environment, honouring `WEBSTACK_CONFIG`.
pub fn load_from_env() -> Result<StackConfig, Error> {
    let lookup = |key: &str| std::env::var(key).ok();

    return match lookup(CONFIG_PATH_VAR) {
        Some(path) => load(Some(&PathBuf::from(path)), lookup),
        None => load(None, lookup),
    };
}

impl ConfigFile {
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(&format!("{}{}", ENV_PREFIX, name)).filter(|value| !value.trim().is_empty())
        };

        let strings: [(&str, &mut Option<String>); 13] = [
            ("REGION", &mut self.region),
            ("BUCKET_NAME", &mut self.bucket_name),
            ("AMI_ID", &mut self.ami_id),
            ("INSTANCE_TYPE", &mut self.instance_type),
            ("KEY_NAME", &mut self.key_name),
            ("SECURITY_GROUP_ID", &mut self.security_group_id),
            ("VPC_ID", &mut self.vpc_id),
            ("LOAD_BALANCER_NAME", &mut self.load_balancer_name),
            ("TARGET_GROUP_NAME", &mut self.target_group_name),
            ("AUTO_SCALING_GROUP_NAME", &mut self.auto_scaling_group_name),
            ("LAUNCH_TEMPLATE_NAME", &mut self.launch_template_name),
            ("TOPIC_NAME", &mut self.topic_name),
            ("SUBSCRIPTION_EMAIL", &mut self.subscription_email),
        ];
        for (name, field) in strings {
            if let Some(value) = var(name) {
                *field = Some(value.trim().to_string());
            }
        }

        if let Some(value) = var("SUBNET_IDS") {
            self.subnet_ids = Some(
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|subnet| !subnet.is_empty())
                    .map(String::from)
                    .collect(),
            );
        }

        if let Some(value) = var("ON_ERROR") {
            self.on_error = ErrorPolicy::parse(value.trim()).ok_or_else(|| {
                Error::ValidationError(format!("WEBSTACK_ON_ERROR: unknown policy `{}`", value))
            })?;
        }

        if let Some(value) = var("TOPIC_MATCH") {
            self.topic_match = TopicMatch::parse(value.trim()).ok_or_else(|| {
                Error::ValidationError(format!("WEBSTACK_TOPIC_MATCH: unknown mode `{}`", value))
            })?;
        }

        return Ok(());
    }

    pub fn into_stack_config(self) -> Result<StackConfig, Error> {
        match self.validate() {
            Ok(_) => (),
            Err(error) => return Err(Error::ValidationError(error.to_string())),
        }

        return Ok(StackConfig {
            region: self.region,
            bucket_name: required(self.bucket_name, "bucket_name")?,
            ami_id: required(self.ami_id, "ami_id")?,
            instance_type: self
                .instance_type
                .unwrap_or_else(|| String::from("t2.micro")),
            key_name: required(self.key_name, "key_name")?,
            security_group_id: required(self.security_group_id, "security_group_id")?,
            subnet_ids: required(self.subnet_ids, "subnet_ids")?,
            vpc_id: required(self.vpc_id, "vpc_id")?,
            load_balancer_name: required(self.load_balancer_name, "load_balancer_name")?,
            target_group_name: required(self.target_group_name, "target_group_name")?,
            auto_scaling_group_name: required(
                self.auto_scaling_group_name,
                "auto_scaling_group_name",
            )?,
            launch_template_name: required(self.launch_template_name, "launch_template_name")?,
            topic_name: required(self.topic_name, "topic_name")?,
            subscription_email: required(self.subscription_email, "subscription_email")?,
            on_error: self.on_error,
            topic_match: self.topic_match,
            scaling: self.scaling,
            waits: self.waits,
        });
    }
}

fn required<T>(value: Option<T>, field: &str) -> Result<T, Error> {
    value.ok_or_else(|| Error::ValidationError(format!("{}: required", field)))
}

fn validate_prefixed(value: &str, prefix: &str, message: &'static str) -> Result<(), ValidationError> {
    if !value.starts_with(prefix) || value.len() == prefix.len() {
        return Err(ValidationError::new(message));
    }

    return Ok(());
}

fn validate_ami_id(ami_id: &str) -> Result<(), ValidationError> {
    validate_prefixed(ami_id, "ami-", "The AMI id has to start with `ami-`")
}

fn validate_security_group_id(group_id: &str) -> Result<(), ValidationError> {
    validate_prefixed(group_id, "sg-", "The security group id has to start with `sg-`")
}

fn validate_vpc_id(vpc_id: &str) -> Result<(), ValidationError> {
    validate_prefixed(vpc_id, "vpc-", "The VPC id has to start with `vpc-`")
}

fn validate_subnet_ids(subnet_ids: &[String]) -> Result<(), ValidationError> {
    for subnet_id in subnet_ids {
        validate_prefixed(subnet_id, "subnet-", "Every subnet id has to start with `subnet-`")?;
    }

    return Ok(());
}

fn validate_capacity(scaling: &ScalingSettings) -> Result<(), ValidationError> {
    if scaling.min_size > scaling.desired_capacity || scaling.desired_capacity > scaling.max_size {
        return Err(ValidationError::new(
            "Scaling capacities have to satisfy min_size <= desired_capacity <= max_size",
        ));
    }

    return Ok(());
}
