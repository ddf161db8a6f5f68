use crate::infra::{
    default_routing_policy, InMemoryCompletionHistory, InMemoryOperatorAlerts,
    InMemoryVendorDirectory, SeedVendor, TracingOfferNotifier, PHILADELPHIA,
};
use chrono::{Duration as ChronoDuration, Utc};
use clap::Args;
use notary_dispatch::error::AppError;
use notary_dispatch::routing::{
    DecisionOutcome, DispatchCollaborators, DispatchEngine, InMemoryDecisionLog, OfferNotice,
    OfferResponse, OrderRequest, RoutingDecision, ServiceTier, SigningType, SlaConfig, SlaTerms,
    StateCode, TimeWindow, VendorDecision, VendorId, VendorTierThresholds,
};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Divide every SLA deadline by this factor so the walkthrough finishes in seconds.
    #[arg(long, default_value_t = 300)]
    pub(crate) compress: u64,
    /// Print routing decisions as JSON instead of a summary.
    #[arg(long)]
    pub(crate) json: bool,
}

fn compressed_sla(factor: u64) -> SlaConfig {
    let scale = |terms: SlaTerms| SlaTerms {
        confirmation_deadline_secs: (terms.confirmation_deadline_secs / factor).max(1),
        ..terms
    };
    let defaults = SlaConfig::default();
    SlaConfig {
        standard: scale(defaults.standard),
        priority: scale(defaults.priority),
        rescue: scale(defaults.rescue),
    }
}

/// Scale a real-world offset (in seconds) onto the compressed clock.
fn scaled(real_secs: u64, factor: u64) -> Duration {
    Duration::from_secs_f64(real_secs as f64 / factor as f64)
}

fn demo_vendors(thresholds: &VendorTierThresholds) -> Vec<notary_dispatch::routing::Vendor> {
    let vendor = |id, ron_capable, score, completed_orders, rescue_standby| SeedVendor {
        id,
        states: &["PA"],
        ron_capable,
        specializations: &[],
        score,
        completed_orders,
        location: PHILADELPHIA,
        rescue_standby,
    };
    vec![
        vendor("V1", true, 92.0, 120, true),
        vendor("V2", true, 80.0, 60, true),
        vendor("V3", false, 65.0, 30, false),
    ]
    .into_iter()
    .map(|seed| seed.into_vendor(thresholds))
    .collect()
}

fn pennsylvania() -> Result<StateCode, AppError> {
    StateCode::parse("PA").ok_or_else(|| AppError::Demo("PA is not a valid state code".into()))
}

fn order_request(
    tier: ServiceTier,
    signing_type: SigningType,
    loan_type: Option<&str>,
) -> Result<OrderRequest, AppError> {
    let start = Utc::now() + ChronoDuration::hours(4);
    Ok(OrderRequest {
        state: pennsylvania()?,
        signing_type,
        loan_type: loan_type.map(str::to_string),
        facility_type: None,
        service_tier: tier,
        window: TimeWindow {
            start,
            end: start + ChronoDuration::minutes(90),
        },
        location: Some(PHILADELPHIA),
    })
}

async fn next_offer(offers: &mut UnboundedReceiver<OfferNotice>) -> Result<OfferNotice, AppError> {
    offers
        .recv()
        .await
        .ok_or_else(|| AppError::Demo("offer channel closed before the next offer".into()))
}

fn accept(vendor: &str) -> OfferResponse {
    OfferResponse {
        vendor_id: VendorId(vendor.to_string()),
        decision: VendorDecision::Accept,
        responded_at: None,
    }
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let factor = args.compress.max(1);
    let mut policy = default_routing_policy();
    policy.sla = compressed_sla(factor);
    let vendors = demo_vendors(&policy.tiers);

    let (notifier, mut offers) = TracingOfferNotifier::with_outbox();
    let alerts = InMemoryOperatorAlerts::default();
    let log = Arc::new(InMemoryDecisionLog::new());
    let engine = DispatchEngine::new(
        policy,
        DispatchCollaborators {
            directory: Arc::new(InMemoryVendorDirectory::seeded(vendors)),
            notifier: Arc::new(notifier.clone()),
            decision_log: log.clone(),
            alerts: Arc::new(alerts.clone()),
            history: Arc::new(InMemoryCompletionHistory::default()),
        },
    )?;

    println!("Notary dispatch demo (SLA deadlines compressed {factor}x)");
    println!();
    println!("== Priority RON signing in PA ==");
    let order_id =
        engine.create_order(order_request(ServiceTier::Priority, SigningType::Ron, None)?)?;
    println!("order {order_id} accepted; V3 is filtered out (no RON capability)");

    let first = next_offer(&mut offers).await?;
    println!("offer -> {} (sequential, no answer)", first.vendor_id);

    let rescue_a = next_offer(&mut offers).await?;
    let rescue_b = next_offer(&mut offers).await?;
    println!(
        "priority deadline passed; rescue broadcast -> {}, {}",
        rescue_a.vendor_id, rescue_b.vendor_id
    );

    tokio::time::sleep(scaled(90, factor)).await;
    let outcome = engine.respond_offer(&order_id, accept("V2"))?;
    println!("V2 accepts after 90s (scaled): {}", outcome.label());

    tokio::time::sleep(scaled(5, factor)).await;
    let late = engine.respond_offer(&order_id, accept("V1"))?;
    println!("V1 accepts 5s later: {}", late.label());

    let decision = engine.wait_for_decision(&order_id).await?;
    render_decision(&decision, args.json)?;
    for anomaly in log.anomalies() {
        println!(
            "anomaly: {} on {} ({:?})",
            anomaly.vendor_id, anomaly.order_id, anomaly.kind
        );
    }

    println!();
    println!("== Reverse mortgage signing without a certified vendor ==");
    let order_id = engine.create_order(order_request(
        ServiceTier::Standard,
        SigningType::InPerson,
        Some("reverse_mortgage"),
    )?)?;
    let decision = engine.wait_for_decision(&order_id).await?;
    render_decision(&decision, args.json)?;
    for alert in alerts.events() {
        println!("operator alert: {} for {}", alert.template, alert.order_id);
    }

    println!();
    println!("offers sent in total: {}", notifier.sent().len());
    Ok(())
}

fn render_decision(decision: &RoutingDecision, json: bool) -> Result<(), AppError> {
    if json {
        let rendered = serde_json::to_string_pretty(decision).map_err(io::Error::from)?;
        println!("{rendered}");
        return Ok(());
    }

    let verdict = match &decision.outcome {
        DecisionOutcome::Confirmed { vendor_id } => format!("confirmed with {vendor_id}"),
        DecisionOutcome::Failed { reason } => format!("failed ({})", reason.label()),
        DecisionOutcome::Cancelled => "cancelled".to_string(),
    };
    println!(
        "decision for {}: {verdict}; tier {} -> {}; escalated: {}",
        decision.order_id,
        decision.requested_tier.label(),
        decision.final_tier.label(),
        decision.escalated
    );
    for attempt in &decision.attempts {
        println!(
            "  {:<4} {:<10} rescue={}",
            attempt.vendor_id.0,
            attempt.outcome.label(),
            attempt.rescue
        );
    }
    if decision.attempts.is_empty() {
        println!("  no offers sent");
    }
    Ok(())
}
