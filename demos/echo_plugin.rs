use std::error::Error;

use autman_sdk::{HostClient, PluginArgs};
use tracing_subscriber::EnvFilter;

/// Echoes the triggering message, then asks for one follow-up.
///
/// The host starts plugins as `echo_plugin <port> <sender-id>`.
fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = PluginArgs::from_env()?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let client = HostClient::connect(args.loopback_config())?;
        let session = client.session(args.sender_id.as_str());

        let message = session.get_message().await;
        session.reply(&format!("you said: {message}")).await?;

        session.reply("say something else within 30s").await?;
        let follow_up = session.listen(30_000).await;
        if follow_up.is_empty() {
            session.reply("no answer, bye").await?;
        } else {
            session.reply(&format!("and then: {follow_up}")).await?;
        }

        Ok::<(), Box<dyn Error>>(())
    })
}
