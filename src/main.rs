use std::time::{Duration, Instant};

mod analysis;
mod app;
mod auth;
mod config;
mod nutrition;
mod ratelimit;
mod state;
mod storage;
mod vision;

const HOUSEKEEPING_EVERY: Duration = Duration::from_secs(60);
const FINISHED_JOB_RETENTION: Duration = Duration::from_secs(15 * 60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "platescan=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let app_state = state::AppState::init().await?;

    // Run migrations if present
    if let Err(e) = sqlx::migrate!("./migrations").run(&app_state.db).await {
        tracing::warn!(error = %e, "migrations folder not found or migration failed; continuing");
    }

    spawn_housekeeping(app_state.clone());

    let app = app::build_app(app_state);
    app::serve(app).await
}

/// Drops idle rate windows, finished jobs that are already persisted and
/// expired nutrition cache entries.
fn spawn_housekeeping(state: state::AppState) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(HOUSEKEEPING_EVERY);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            let windows = state.governor.evict_idle(Instant::now());
            let jobs = state.pipeline.evict_terminal(FINISHED_JOB_RETENTION);
            let cached = state.resolver.purge_expired_cache().await;
            if windows > 0 || jobs > 0 || cached > 0 {
                tracing::debug!(windows, jobs, cached, "housekeeping evicted idle state");
            }
        }
    });
}
