use std::sync::Arc;

use gift_client::application::services::{
    AuthService, AuthServiceImpl, RecipientService, RecipientServiceImpl,
};
use gift_client::config::Config;
use gift_client::session::SessionState;
use gift_client::storage::FileCredentialStore;
use gift_client::transport::RequestPipeline;
use gift_client::utils::logger::setup_logger;
use tracing::info;

/// End-to-end walk through the authenticated flow: restore or create a
/// session, list recipients, log out.
///
/// Expects a running API server (GIFT_API_BASE_URL) and, for the first run,
/// GIFT_EMAIL and GIFT_PASSWORD in the environment.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    setup_logger();

    let config = Config::new();
    let store = Arc::new(FileCredentialStore::new(&config.storage.credentials_path));
    let session = Arc::new(SessionState::new(store));
    let pipeline = Arc::new(RequestPipeline::new(&config, session.clone())?);

    let auth = AuthServiceImpl::new(pipeline.clone(), session.clone());
    let recipients = RecipientServiceImpl::new(pipeline);

    let user = match auth.initialize().await? {
        Some(user) => {
            info!("Restored session for {}", user.email);
            user
        }
        None => {
            let email = std::env::var("GIFT_EMAIL")?;
            let password = std::env::var("GIFT_PASSWORD")?;
            let user = auth.login(&email, &password).await?;
            info!("Logged in as {}", user.email);
            user
        }
    };

    println!("Hello {} <{}>", user.name, user.email);

    let all = recipients.list().await?;
    println!("{} recipients on file", all.len());
    for recipient in &all {
        println!(
            "  {} ({}), budget {:.0}-{:.0}, keywords: {}",
            recipient.name,
            recipient.age,
            recipient.min_budget,
            recipient.max_budget,
            recipient.keywords.join(", ")
        );
    }

    auth.logout().await;
    info!("Logged out");
    Ok(())
}
