//! Proctor daemon - enrollment workflow service
//!
//! Serves the payment-gateway webhook intake and hosts the enrollment
//! engine; admin subcommands cover operational chores.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use proctor_core::ExamId;
use proctor_daemon::config::{DaemonConfig, GatewaySettings};
use proctor_daemon::http::{router, AppState};
use proctor_daemon::ledger::EnrollmentLedger;
use proctor_daemon::services::{
    AccessCodeIssuer, EnrollmentService, StatsAggregator, WebhookRateLimiter,
};
use proctor_gateway::{HttpGateway, HttpGatewayConfig, MockGateway, PaymentGateway};

/// Proctor Daemon - test enrollment service
#[derive(Parser)]
#[command(name = "proctor-daemon", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Use the in-memory mock gateway regardless of configuration (dev mode)
    #[arg(long, hide = true)]
    mock_gateway: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (default if no command given)
    Serve,

    /// Enrollment counter management
    Stats {
        #[command(subcommand)]
        action: StatsAction,
    },
}

#[derive(Subcommand)]
enum StatsAction {
    /// Re-derive the counters for one exam from ledger state
    Recompute {
        /// Exam id
        #[arg(long)]
        exam: Uuid,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match cli.command {
        Some(Commands::Stats { action }) => cmd_stats(action).await,
        Some(Commands::Serve) | None => cmd_serve(cli.mock_gateway).await,
    }
}

async fn cmd_serve(force_mock: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = DaemonConfig::from_env()?;

    let ledger = Arc::new(EnrollmentLedger::open(&config.db_path).await?);
    tracing::info!(path = %config.db_path.display(), "ledger opened");

    let gateway: Arc<dyn PaymentGateway> = if force_mock {
        tracing::warn!("using mock payment gateway (dev mode)");
        Arc::new(MockGateway::new())
    } else {
        match &config.gateway {
            GatewaySettings::Http {
                base_url,
                secret_key,
                webhook_secret,
                timeout,
            } => {
                let mut gw_config = HttpGatewayConfig::new(base_url.clone(), secret_key.clone());
                gw_config.webhook_secret = webhook_secret.clone();
                gw_config.timeout = *timeout;
                Arc::new(HttpGateway::new(gw_config)?)
            }
            GatewaySettings::Mock => {
                tracing::warn!(
                    "PROCTOR_GATEWAY_URL/PROCTOR_GATEWAY_SECRET unset, using mock gateway"
                );
                Arc::new(MockGateway::new())
            }
        }
    };

    let service = Arc::new(
        EnrollmentService::new(ledger, gateway, config.currency.clone())
            .with_issuer(AccessCodeIssuer::new(config.access_code_attempts)),
    );

    let state = AppState {
        service,
        limiter: WebhookRateLimiter::new(config.webhook_rate_per_second, config.webhook_burst),
    };

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "webhook intake listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;

    Ok(())
}

async fn cmd_stats(action: StatsAction) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        StatsAction::Recompute { exam } => {
            let config = DaemonConfig::from_env()?;
            let ledger = Arc::new(EnrollmentLedger::open(&config.db_path).await?);

            let exam_id = ExamId::from_uuid(exam);
            let stats = StatsAggregator::new(ledger).refresh(exam_id).await;

            println!("exam {exam}");
            println!("  total enrollments: {}", stats.total_enrollments);
            println!("  active enrollments: {}", stats.active_enrollments);
            println!("  pending payments: {}", stats.pending_payments);
            println!("  total revenue (minor units): {}", stats.total_revenue);
            Ok(())
        }
    }
}
