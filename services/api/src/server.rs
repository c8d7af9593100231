use crate::cli::ServeArgs;
use crate::infra::{load_directory, AppState, InMemoryStore};
use crate::routes::with_participation_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use eduhub::config::AppConfig;
use eduhub::error::AppError;
use eduhub::telemetry;
use eduhub::workflows::participation::{LoggingNotifier, ParticipationService};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }
    if let Some(path) = args.student_directory.take() {
        config.participation.student_directory = Some(path);
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let directory = Arc::new(load_directory(&config.participation)?);
    let store = Arc::new(InMemoryStore::default());
    let service = Arc::new(
        ParticipationService::new(store, directory, Arc::new(LoggingNotifier))
            .with_batch_order(config.participation.batch_order),
    );

    let app = with_participation_routes(service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        batch_order = ?config.participation.batch_order,
        "event participation service ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
