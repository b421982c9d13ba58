use std::sync::Arc;

use async_trait::async_trait;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use mail_warmup::api::api_routes;
use mail_warmup::config::{LedgerConfig, ServerConfig, WarmupConfig};
use mail_warmup::dispatch::{DispatchPipeline, MailTransport, OutgoingEmail, SmtpConfig, SmtpMailer};
use mail_warmup::error::TransportError;
use mail_warmup::health::{HealthScorer, HealthWeights};
use mail_warmup::ledger::QuotaLedger;
use mail_warmup::store::{Database, LibSqlBackend};
use mail_warmup::warmup::{WarmupScheduler, WarmupTraffic, spawn_tick_task, spawn_traffic_task};

/// Used when SMTP is not configured: every send fails visibly.
struct DisabledTransport;

#[async_trait]
impl MailTransport for DisabledTransport {
    async fn send(&self, _email: &OutgoingEmail) -> Result<(), TransportError> {
        Err(TransportError::Unavailable("SMTP is not configured".into()))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| "Failed to install rustls crypto provider")?;

    let server_config = ServerConfig::from_env()?;

    // Initialize tracing, plus a daily rolling file when configured
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (file_layer, _log_guard) = match &server_config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "mail-warmup.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(writer)
                        .with_ansi(false),
                ),
                Some(guard),
            )
        }
        None => (None, None),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(file_layer)
        .init();

    let warmup_config = WarmupConfig::from_env()?;
    let ledger_config = LedgerConfig::from_env()?;

    eprintln!("📬 Mail Warmup v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   API: http://0.0.0.0:{}/api", server_config.port);
    eprintln!("   Dispatch WS: ws://0.0.0.0:{}/ws/dispatch", server_config.port);

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&server_config.db_path)
            .await
            .unwrap_or_else(|e| {
                eprintln!(
                    "Error: Failed to open database at {}: {}",
                    server_config.db_path.display(),
                    e
                );
                std::process::exit(1);
            }),
    );
    eprintln!("   Database: {}", server_config.db_path.display());

    // ── Transport ────────────────────────────────────────────────────────
    let transport: Arc<dyn MailTransport> = match SmtpConfig::from_env()? {
        Some(smtp) => {
            eprintln!("   SMTP: {}:{}", smtp.host, smtp.port);
            Arc::new(SmtpMailer::new(&smtp)?)
        }
        None => {
            eprintln!("   SMTP: disabled (set SMTP_HOST to enable)");
            Arc::new(DisabledTransport)
        }
    };

    // ── Core components ──────────────────────────────────────────────────
    let ledger = Arc::new(QuotaLedger::new(Arc::clone(&db), ledger_config));
    let scorer = HealthScorer::new(
        Arc::clone(&db),
        HealthWeights::default(),
        warmup_config.health_window_days,
    );
    let scheduler = Arc::new(WarmupScheduler::new(
        Arc::clone(&db),
        Arc::clone(&ledger),
        scorer,
        warmup_config.clone(),
    ));
    let pipeline = Arc::new(
        DispatchPipeline::new(Arc::clone(&db), ledger, transport).with_observer(scheduler.clone()),
    );

    // ── Background tasks ─────────────────────────────────────────────────
    let _tick_handle = spawn_tick_task(Arc::clone(&scheduler), warmup_config.tick_interval);
    eprintln!("   Tick: every {}s", warmup_config.tick_interval.as_secs());

    if warmup_config.peer_addresses.is_empty() {
        eprintln!("   Warmup traffic: disabled (no WARMUP_PEER_ADDRESSES)");
    } else {
        let traffic = Arc::new(WarmupTraffic::new(
            Arc::clone(&scheduler),
            Arc::clone(&pipeline),
            warmup_config.clone(),
        ));
        let _traffic_handle = spawn_traffic_task(traffic, &warmup_config.traffic_schedule)?;
        eprintln!(
            "   Warmup traffic: {} peers, schedule \"{}\"",
            warmup_config.peer_addresses.len(),
            warmup_config.traffic_schedule
        );
    }

    // ── Server ───────────────────────────────────────────────────────────
    let app = api_routes(scheduler, pipeline);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", server_config.port)).await?;
    tracing::info!(port = server_config.port, "Mail warmup server started");
    axum::serve(listener, app).await?;

    Ok(())
}
