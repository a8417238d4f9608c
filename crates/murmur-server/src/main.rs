mod config;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use murmur_api::language::WhatlangDetector;
use murmur_api::mail::{LogMailer, Mailer, SmtpMailer};
use murmur_api::search::{ElasticsearchIndex, FtsIndex, SearchIndex};
use murmur_api::translate::{MicrosoftTranslator, Translator, UnconfiguredTranslator};
use murmur_api::{AppState, AppStateInner};
use murmur_db::Database;

use crate::config::Config;

const SEARCH_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "murmur=debug,murmur_api=debug,murmur_db=info,tower_http=debug".into()
            }),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: {e}.");
            eprintln!("       Set it in your .env file and restart.");
            std::process::exit(1);
        }
    };

    let db = Arc::new(Database::open(&config.db_path)?);

    let translator: Arc<dyn Translator> = match &config.translator {
        Some(t) => {
            info!("Translation via Microsoft Translator (timeout {:?})", t.timeout);
            Arc::new(MicrosoftTranslator::new(
                t.key.clone(),
                t.region.clone(),
                t.endpoint.clone(),
                t.timeout,
            )?)
        }
        None => {
            warn!("MURMUR_TRANSLATOR_KEY not set, translation disabled");
            Arc::new(UnconfiguredTranslator)
        }
    };

    let search: Arc<dyn SearchIndex> = match &config.elasticsearch {
        Some(url) => {
            info!("Search via Elasticsearch at {}", url);
            Arc::new(ElasticsearchIndex::new(url.clone(), SEARCH_TIMEOUT)?)
        }
        None => {
            info!("Search via SQLite full-text index");
            Arc::new(FtsIndex::new(db.clone()))
        }
    };

    let mailer: Arc<dyn Mailer> = match &config.mail {
        Some(mail) => {
            info!("Sending email through {}:{}", mail.server, mail.port);
            Arc::new(SmtpMailer::new(&mail.server, mail.port, mail.credentials.clone()))
        }
        None => {
            info!("MURMUR_MAIL_SERVER not set, emails will be logged");
            Arc::new(LogMailer)
        }
    };

    let state: AppState = Arc::new(AppStateInner {
        db,
        settings: config.settings.clone(),
        detector: Arc::new(WhatlangDetector),
        translator,
        search,
        mailer,
    });

    let app = murmur_api::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Murmur listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
