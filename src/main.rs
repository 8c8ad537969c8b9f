//! Curator service — binary entrypoint.
//! Wires config, collaborators, the policy refresher, feed producers, the
//! single-consumer decision engine, and the admin HTTP surface.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use starship_curator::accounts::{spawn_membership_refresher, AccountPolicy, MembershipHandle};
use starship_curator::api::{self, AppState};
use starship_curator::classifier::Classifier;
use starship_curator::collab::{CuratorClient, HttpClient, OfflineClient};
use starship_curator::config::{self, CuratorConfig};
use starship_curator::engine::{DecisionEngine, EngineConfig};
use starship_curator::ingest::{self, BackendFeed};
use starship_curator::item::Provenance;
use starship_curator::links::{LinkGate, LinkWindow};
use starship_curator::metrics::Metrics;
use starship_curator::rules::TopicRules;

/// Default filter; `CURATOR_DEV_LOG=1` turns on the per-decision debug
/// stream (anonymized ids only, never raw text).
fn init_tracing() {
    let dev = std::env::var("CURATOR_DEV_LOG").ok().as_deref() == Some("1");
    let default_filter = if dev {
        "info,engine=debug,classify=debug,links=debug,policy=debug"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env in local/dev; no-op elsewhere.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = CuratorConfig::from_path_env().unwrap_or_else(|e| {
        info!(error = %e, "curator config not found on disk; using builtin");
        CuratorConfig::builtin()
    });
    let rules = Arc::new(match TopicRules::from_path_env() {
        Ok(r) => r,
        Err(e) => {
            info!(error = %e, "topic config not found on disk; using builtin");
            TopicRules::builtin()
        }
    });

    // Collaborator client: offline mode keeps everything in memory.
    let client: Arc<dyn CuratorClient> = if config::offline_mode() {
        info!("offline mode: in-memory collaborators");
        Arc::new(OfflineClient::new())
    } else {
        let base = config::backend_url()
            .ok_or_else(|| anyhow::anyhow!("CURATOR_BACKEND_URL is required outside offline mode"))?;
        Arc::new(HttpClient::new(base)?)
    };

    // Account policy with the periodically refreshed ignore membership.
    let membership = MembershipHandle::new();
    let known: Vec<String> = rules.known_handles().map(str::to_string).collect();
    let policy = Arc::new(AccountPolicy::new(
        cfg.policy.important.clone(),
        cfg.policy.trusted_media.clone(),
        known,
        cfg.policy.disqualifying_description.clone(),
        membership.clone(),
    ));
    let classifier = Classifier::new(Arc::clone(&rules), policy);

    // Link gate with the best-effort snapshot.
    let link_state = PathBuf::from(&cfg.app.link_state_path);
    let window = LinkWindow::load(&link_state).await;
    let links = LinkGate::new(
        cfg.links.always_important.clone(),
        cfg.links.live_channels.clone(),
        window,
        Some(link_state),
    );

    let engine = DecisionEngine::new(
        EngineConfig {
            self_handle: cfg.app.self_handle.clone(),
            authority_handle: cfg.app.authority_handle.clone(),
            organization_handle: cfg.app.organization_handle.clone(),
            site_announcement_phrases: cfg.feeds.site_announcement_phrases.clone(),
            reprocess_seen: false,
        },
        classifier.clone(),
        Arc::clone(&client),
        links,
    );
    let stats = engine.stats();

    // Shutdown signal shared by every loop.
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    spawn_membership_refresher(
        membership.clone(),
        Arc::clone(&client),
        cfg.membership_refresh(),
        shutdown_rx.clone(),
    );

    // Feed producers into the bounded queue.
    let (tx, rx) = ingest::item_queue();
    if let Some(base) = config::backend_url() {
        let feeds: Vec<BackendFeed> = vec![
            BackendFeed::new(
                "location",
                format!("{base}/feeds/location"),
                Provenance::LocationFeed,
                std::time::Duration::from_secs(30),
            )?,
            BackendFeed::new(
                "curated",
                format!("{base}/feeds/curated"),
                Provenance::CuratedList,
                std::time::Duration::from_secs(60),
            )?,
            BackendFeed::new(
                "timeline",
                format!("{base}/feeds/timeline"),
                Provenance::Timeline,
                std::time::Duration::from_secs(60),
            )?,
        ];
        for feed in feeds {
            ingest::spawn_feed(Box::new(feed), tx.clone(), shutdown_rx.clone());
        }
    }
    drop(tx);

    // Admin surface.
    let metrics = Metrics::init();
    let router = api::create_router(AppState {
        classifier,
        stats,
        membership,
    })
    .merge(metrics.router());
    let listener = tokio::net::TcpListener::bind(&cfg.app.admin_addr).await?;
    info!(addr = %cfg.app.admin_addr, "admin surface listening");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });

    // Single consumer drains the queue until ctrl-c.
    let engine_loop = tokio::spawn(ingest::run_engine_loop(engine, rx, shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    let _ = shutdown_tx.send(true);
    let _ = engine_loop.await;
    Ok(())
}
