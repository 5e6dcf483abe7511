use std::process::ExitCode;

use tracing::error;
use webstack::deploy::Deployer;
use webstack::provider::aws::AwsProvider;
use webstack::{config, logging};

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();

    let config = match config::load_from_env() {
        Ok(config) => config,
        Err(error) => {
            error!(%error, "Unable to load configuration");
            return ExitCode::FAILURE;
        }
    };

    let provider = match AwsProvider::new(config.region.as_deref()).await {
        Ok(provider) => provider,
        Err(error) => {
            error!(%error, "Unable to set up the AWS clients");
            return ExitCode::FAILURE;
        }
    };

    let deployment = Deployer::new(&provider, &config).run().await;
    if deployment.report.halted {
        return ExitCode::FAILURE;
    }

    return ExitCode::SUCCESS;
}
