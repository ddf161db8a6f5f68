use crate::cli::ServeArgs;
use crate::infra::{
    default_routing_policy, seed_vendors, AppState, InMemoryCompletionHistory,
    InMemoryOperatorAlerts, InMemoryVendorDirectory, TracingOfferNotifier,
};
use crate::routes::with_dispatch_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use notary_dispatch::config::{load_routing_policy, AppConfig};
use notary_dispatch::error::AppError;
use notary_dispatch::routing::{DispatchCollaborators, DispatchEngine, InMemoryDecisionLog};
use notary_dispatch::telemetry;
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

    telemetry::init(&config.telemetry)?;

    let policy = match &config.dispatch.routing_policy_path {
        Some(path) => {
            info!(path = %path.display(), "loading routing policy");
            load_routing_policy(path)?
        }
        None => default_routing_policy(),
    };

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let directory = InMemoryVendorDirectory::seeded(seed_vendors(&policy.tiers));
    let engine = Arc::new(DispatchEngine::new(
        policy,
        DispatchCollaborators {
            directory: Arc::new(directory),
            notifier: Arc::new(TracingOfferNotifier::default()),
            decision_log: Arc::new(InMemoryDecisionLog::new()),
            alerts: Arc::new(InMemoryOperatorAlerts::default()),
            history: Arc::new(InMemoryCompletionHistory::default()),
        },
    )?);

    engine
        .recalculator()
        .spawn_periodic(config.dispatch.tier_recalc_interval());

    let app = with_dispatch_routes(engine)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        recalc_interval_secs = config.dispatch.tier_recalc_interval_secs,
        "notary dispatch service ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
