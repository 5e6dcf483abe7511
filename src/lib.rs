//! Provisioning and teardown of a small AWS web application stack.
//!
//! [`deploy::Deployer`] creates a bucket, a web server instance behind an
//! application load balancer, an auto scaling group built from a launch template,
//! and an alert topic. [`teardown::Teardown`] removes them again in dependency
//! order. Both run against any [`provider::Provider`]; the binaries use
//! [`provider::aws::AwsProvider`].

pub mod config;
pub mod deploy;
pub mod logging;
pub mod pipeline;
pub mod provider;
pub mod teardown;
pub mod waiter;
