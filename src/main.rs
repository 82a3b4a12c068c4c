use anyhow::Context;

use newsletter_engine::config::get_configuration;
use newsletter_engine::startup::Application;
use newsletter_engine::telemetry::{get_subscriber, init_subscriber};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = get_subscriber(
        String::from("newsletter_engine"),
        String::from("info"),
        std::io::stdout,
    );
    init_subscriber(subscriber)
        .map_err(|err| anyhow::anyhow!("Failed to install the tracing subscriber: {}", err))?;

    let config = get_configuration().context("Missing configuration file.")?;
    let application = Application::build(config)
        .await
        .context("Failed to build the application")?;

    application.run_until_stop().await?;

    Ok(())
}
