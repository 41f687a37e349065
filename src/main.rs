use std::sync::{Arc, Mutex};

use holmes::config::Settings;
use holmes::{server, Holmes};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::load()?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut holmes = Holmes::with_settings(settings.database.db()?, settings.engine.clone())?;
    if let Some(path) = &settings.startup_script {
        info!(path = %path.display(), "running startup script");
        let script = std::fs::read_to_string(path)?;
        holmes.execute(&script)?;
    }

    let app = server::router(Arc::new(Mutex::new(holmes)));
    let listener = tokio::net::TcpListener::bind(&settings.server.bind).await?;
    info!(bind = %settings.server.bind, "holmes listening");
    axum::serve(listener, app).await?;
    Ok(())
}
