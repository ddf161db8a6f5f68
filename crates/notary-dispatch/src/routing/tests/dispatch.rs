use std::time::Duration;

use chrono::TimeZone;
use tokio::time::Instant;

use super::common::*;

use crate::routing::collaborators::DirectoryError;
use crate::routing::decision_log::{
    AnomalyKind, DecisionOutcome, EscalationReason, FailureReason,
};
use crate::routing::dispatch::DispatchError;
use crate::routing::domain::{
    OfferOutcome, OfferResponse, OrderId, OrderStatus, ResponseOutcome, ServiceTier, SigningType,
    VendorDecision, VendorTier,
};
use crate::routing::tiering::{CompletionHistory, CompletionRecord, CompletionReport};

fn accept(vendor_id: &str) -> OfferResponse {
    OfferResponse {
        vendor_id: vid(vendor_id),
        decision: VendorDecision::Accept,
        responded_at: None,
    }
}

fn decline(vendor_id: &str) -> OfferResponse {
    OfferResponse {
        vendor_id: vid(vendor_id),
        decision: VendorDecision::Decline,
        responded_at: None,
    }
}

fn assert_elapsed_close(start: Instant, expected: Duration) {
    let elapsed = start.elapsed();
    assert!(
        elapsed >= expected && elapsed < expected + Duration::from_secs(1),
        "expected ~{expected:?}, got {elapsed:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn priority_ron_order_escalates_to_rescue_and_first_acceptance_wins() {
    let mut non_ron = vendor("V3", VendorTier::Silver, 65.0);
    non_ron.ron_capable = false;
    let mut h = harness(vec![
        standby(vendor("V1", VendorTier::Elite, 92.0)),
        standby(vendor("V2", VendorTier::Gold, 80.0)),
        non_ron,
    ]);
    let start = Instant::now();

    let order_id = h
        .engine
        .create_order(request(ServiceTier::Priority, SigningType::Ron))
        .expect("order accepted");

    let first = h.next_notice().await;
    assert_eq!(first.vendor_id, vid("V1"));
    assert!(!first.rescue);
    assert_eq!(first.service_tier, ServiceTier::Priority);
    let created_at = h
        .engine
        .order_status(&order_id)
        .expect("status")
        .order
        .created_at;
    assert_eq!(first.deadline - created_at, chrono::Duration::minutes(15));

    let rescue_a = h.next_notice().await;
    let rescue_b = h.next_notice().await;
    assert_elapsed_close(start, Duration::from_secs(15 * 60));
    let mut rescued = vec![rescue_a.vendor_id.0.clone(), rescue_b.vendor_id.0.clone()];
    rescued.sort();
    assert_eq!(rescued, vec!["V1", "V2"]);
    assert!(rescue_a.rescue && rescue_b.rescue);
    assert_eq!(rescue_a.service_tier, ServiceTier::Rescue);
    assert_eq!(h.status(&order_id), OrderStatus::Escalated);

    tokio::time::sleep(Duration::from_secs(90)).await;
    let outcome = h
        .engine
        .respond_offer(&order_id, accept("V2"))
        .expect("V2 response handled");
    assert_eq!(outcome, ResponseOutcome::Confirmed);

    tokio::time::sleep(Duration::from_secs(5)).await;
    let late = h
        .engine
        .respond_offer(&order_id, accept("V1"))
        .expect("late response handled");
    assert_eq!(late, ResponseOutcome::Superseded);

    let decision = h
        .engine
        .wait_for_decision(&order_id)
        .await
        .expect("decision recorded");
    assert_eq!(
        decision.outcome,
        DecisionOutcome::Confirmed {
            vendor_id: vid("V2")
        }
    );
    assert!(decision.escalated);
    assert_eq!(decision.escalation_reason, Some(EscalationReason::SlaBreach));
    assert_eq!(decision.requested_tier, ServiceTier::Priority);
    assert_eq!(decision.final_tier, ServiceTier::Rescue);
    assert_eq!(decision.attempts.len(), 3);

    let outcome_of = |vendor: &str, rescue: bool| {
        decision
            .attempts
            .iter()
            .find(|a| a.vendor_id == vid(vendor) && a.rescue == rescue)
            .map(|a| a.outcome)
    };
    assert_eq!(outcome_of("V1", false), Some(OfferOutcome::TimedOut));
    assert_eq!(outcome_of("V1", true), Some(OfferOutcome::Superseded));
    assert_eq!(outcome_of("V2", true), Some(OfferOutcome::Accepted));
    assert!(h.notifier.sent().iter().all(|n| n.vendor_id != vid("V3")));

    let anomalies = h.log.anomalies();
    assert_eq!(anomalies.len(), 1);
    assert_eq!(anomalies[0].vendor_id, vid("V1"));
    assert_eq!(anomalies[0].kind, AnomalyKind::LateAcceptance);
    assert!(h.log.for_order(&order_id).is_some());

    assert_eq!(h.engine.ledger().load(&vid("V2")).assignments, 1);
    assert_eq!(h.engine.ledger().load(&vid("V1")).active(), 0);
    assert_eq!(h.status(&order_id), OrderStatus::Confirmed);
}

#[tokio::test(start_paused = true)]
async fn uncovered_specialty_order_fails_without_sending_offers() {
    let h = harness(vec![
        vendor("V1", VendorTier::Elite, 95.0),
        standby(vendor("V2", VendorTier::Gold, 82.0)),
    ]);
    let mut order = request(ServiceTier::Standard, SigningType::InPerson);
    order.loan_type = Some("reverse_mortgage".to_string());

    let order_id = h.engine.create_order(order).expect("order accepted");
    let decision = h
        .engine
        .wait_for_decision(&order_id)
        .await
        .expect("decision recorded");

    assert_eq!(
        decision.outcome,
        DecisionOutcome::Failed {
            reason: FailureReason::NoCoverage
        }
    );
    assert!(decision.escalated);
    assert_eq!(decision.escalation_reason, Some(EscalationReason::NoCoverage));
    assert!(decision.attempts.is_empty());
    assert_eq!(decision.elapsed_ms, 0);
    assert!(h.notifier.sent().is_empty());

    let alerts = h.alerts.events();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].template, "order_unfilled");
    assert_eq!(alerts[0].order_id, order_id);
    assert_eq!(
        alerts[0].details.get("reason").map(String::as_str),
        Some("no_coverage")
    );
    assert_eq!(h.status(&order_id), OrderStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn decline_moves_to_next_ranked_vendor() {
    let mut h = harness(vec![
        vendor("V2", VendorTier::Gold, 80.0),
        vendor("V1", VendorTier::Elite, 92.0),
    ]);
    let order_id = h
        .engine
        .create_order(request(ServiceTier::Standard, SigningType::InPerson))
        .expect("order accepted");

    assert_eq!(h.next_notice().await.vendor_id, vid("V1"));
    assert_eq!(h.status(&order_id), OrderStatus::Offered);
    assert_eq!(
        h.engine
            .respond_offer(&order_id, decline("V1"))
            .expect("decline"),
        ResponseOutcome::Declined
    );

    assert_eq!(h.next_notice().await.vendor_id, vid("V2"));
    h.engine
        .respond_offer(&order_id, accept("V2"))
        .expect("accept");

    let decision = h.engine.wait_for_decision(&order_id).await.expect("decision");
    assert_eq!(decision.accepted_vendor(), Some(&vid("V2")));
    assert!(!decision.escalated);
    assert_eq!(decision.final_tier, ServiceTier::Standard);
    let outcomes: Vec<OfferOutcome> = decision.attempts.iter().map(|a| a.outcome).collect();
    assert_eq!(outcomes, vec![OfferOutcome::Declined, OfferOutcome::Accepted]);
    assert_eq!(h.engine.ledger().load(&vid("V1")).active(), 0);
}

#[tokio::test(start_paused = true)]
async fn exhausted_candidates_hold_until_sla_deadline() {
    let mut h = harness(vec![vendor("V1", VendorTier::Elite, 92.0)]);
    let start = Instant::now();
    let order_id = h
        .engine
        .create_order(request(ServiceTier::Standard, SigningType::InPerson))
        .expect("order accepted");

    h.next_notice().await;
    h.engine
        .respond_offer(&order_id, decline("V1"))
        .expect("decline");

    tokio::time::sleep(Duration::from_secs(3599)).await;
    assert_eq!(h.status(&order_id), OrderStatus::Offered);
    assert!(h.engine.decision(&order_id).expect("known order").is_none());

    let decision = h.engine.wait_for_decision(&order_id).await.expect("decision");
    assert_elapsed_close(start, Duration::from_secs(3600));
    assert!(decision.elapsed_ms >= 3_600_000 && decision.elapsed_ms < 3_601_000);
    assert_eq!(decision.escalation_reason, Some(EscalationReason::SlaBreach));
    assert_eq!(
        decision.outcome,
        DecisionOutcome::Failed {
            reason: FailureReason::NoCoverage
        }
    );
}

#[tokio::test(start_paused = true)]
async fn exhaustion_can_escalate_immediately() {
    let mut policy = routing_policy();
    policy.dispatch.escalate_on_exhaustion = true;
    let mut h = harness_with(policy, vec![standby(vendor("V1", VendorTier::Elite, 92.0))]);
    let start = Instant::now();

    let order_id = h
        .engine
        .create_order(request(ServiceTier::Standard, SigningType::InPerson))
        .expect("order accepted");
    h.next_notice().await;
    h.engine
        .respond_offer(&order_id, decline("V1"))
        .expect("decline");

    let rebroadcast = h.next_notice().await;
    assert!(rebroadcast.rescue);
    assert_eq!(rebroadcast.service_tier, ServiceTier::Priority);
    assert_eq!(start.elapsed(), Duration::ZERO);

    h.engine
        .respond_offer(&order_id, accept("V1"))
        .expect("accept");
    let decision = h.engine.wait_for_decision(&order_id).await.expect("decision");
    assert_eq!(decision.final_tier, ServiceTier::Priority);
    assert_eq!(decision.accepted_vendor(), Some(&vid("V1")));
}

#[tokio::test(start_paused = true)]
async fn rescue_order_without_acceptance_fails_and_alerts() {
    let mut h = harness(vec![
        standby(vendor("V1", VendorTier::Elite, 92.0)),
        vendor("V2", VendorTier::Gold, 80.0),
    ]);
    let start = Instant::now();
    let order_id = h
        .engine
        .create_order(request(ServiceTier::Rescue, SigningType::Ron))
        .expect("order accepted");

    let notice = h.next_notice().await;
    assert!(notice.rescue);
    assert_eq!(notice.vendor_id, vid("V1"));

    let decision = h.engine.wait_for_decision(&order_id).await.expect("decision");
    assert_elapsed_close(start, Duration::from_secs(180));
    assert_eq!(
        decision.outcome,
        DecisionOutcome::Failed {
            reason: FailureReason::NoCoverageRescue
        }
    );
    assert!(!decision.escalated);
    assert_eq!(decision.attempts[0].outcome, OfferOutcome::TimedOut);
    assert_eq!(h.alerts.events().len(), 1);
    assert!(h.notifier.sent().iter().all(|n| n.vendor_id == vid("V1")));
}

#[tokio::test(start_paused = true)]
async fn cancellation_supersedes_broadcast_offers() {
    let mut h = harness(vec![
        standby(vendor("V1", VendorTier::Elite, 92.0)),
        standby(vendor("V2", VendorTier::Gold, 80.0)),
    ]);
    let order_id = h
        .engine
        .create_order(request(ServiceTier::Rescue, SigningType::Ron))
        .expect("order accepted");
    h.next_notice().await;
    h.next_notice().await;

    h.engine.cancel_order(&order_id).expect("cancel");
    let late = h
        .engine
        .respond_offer(&order_id, accept("V2"))
        .expect("answered");
    assert_eq!(late, ResponseOutcome::Superseded);

    let decision = h.engine.wait_for_decision(&order_id).await.expect("decision");
    assert_eq!(decision.outcome, DecisionOutcome::Cancelled);
    assert_eq!(decision.attempts.len(), 2);
    assert!(decision
        .attempts
        .iter()
        .all(|a| a.outcome == OfferOutcome::Superseded));
    assert_eq!(
        h.log.anomalies()[0].kind,
        AnomalyKind::AcceptanceAfterCancel
    );
    assert_eq!(h.engine.ledger().load(&vid("V1")).active(), 0);
    assert_eq!(h.engine.ledger().load(&vid("V2")).active(), 0);

    let err = h
        .engine
        .cancel_order(&order_id)
        .expect_err("already cancelled");
    assert!(matches!(
        err,
        DispatchError::InvalidTransition {
            status: OrderStatus::Cancelled,
            ..
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn cancellation_interrupts_a_hold() {
    let mut h = harness(vec![vendor("V1", VendorTier::Elite, 92.0)]);
    let start = Instant::now();
    let order_id = h
        .engine
        .create_order(request(ServiceTier::Standard, SigningType::InPerson))
        .expect("order accepted");
    h.next_notice().await;
    h.engine
        .respond_offer(&order_id, decline("V1"))
        .expect("decline");

    tokio::time::sleep(Duration::from_secs(60)).await;
    h.engine.cancel_order(&order_id).expect("cancel");
    let decision = h.engine.wait_for_decision(&order_id).await.expect("decision");
    assert_eq!(decision.outcome, DecisionOutcome::Cancelled);
    assert_elapsed_close(start, Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn undeliverable_offer_advances_to_next_vendor() {
    let mut h = harness(vec![
        vendor("V1", VendorTier::Elite, 92.0),
        vendor("V2", VendorTier::Gold, 80.0),
    ]);
    h.notifier.mark_unreachable("V1");

    let order_id = h
        .engine
        .create_order(request(ServiceTier::Standard, SigningType::InPerson))
        .expect("order accepted");
    assert_eq!(h.next_notice().await.vendor_id, vid("V2"));
    h.engine
        .respond_offer(&order_id, accept("V2"))
        .expect("accept");

    let decision = h.engine.wait_for_decision(&order_id).await.expect("decision");
    assert_eq!(decision.attempts[0].vendor_id, vid("V1"));
    assert_eq!(decision.attempts[0].outcome, OfferOutcome::Undeliverable);
    assert_eq!(decision.offers_sent(), 1);
    assert_eq!(h.engine.ledger().load(&vid("V1")).active(), 0);
}

#[tokio::test(start_paused = true)]
async fn per_offer_cap_shortens_sequential_offers() {
    let mut policy = routing_policy();
    policy.dispatch.offer_timeout_secs = Some(300);
    let mut h = harness_with(
        policy,
        vec![
            vendor("V1", VendorTier::Elite, 92.0),
            vendor("V2", VendorTier::Gold, 80.0),
        ],
    );
    let start = Instant::now();
    let order_id = h
        .engine
        .create_order(request(ServiceTier::Standard, SigningType::InPerson))
        .expect("order accepted");

    let first = h.next_notice().await;
    let second = h.next_notice().await;
    assert_elapsed_close(start, Duration::from_secs(300));
    assert_eq!(second.vendor_id, vid("V2"));
    assert_eq!(first.deadline, second.deadline - chrono::Duration::seconds(300));

    h.engine
        .respond_offer(&order_id, accept("V2"))
        .expect("accept");
    h.engine.wait_for_decision(&order_id).await.expect("decision");
}

#[tokio::test(start_paused = true)]
async fn busy_vendor_is_skipped_for_a_concurrent_order() {
    let mut limited = vendor("V1", VendorTier::Elite, 92.0);
    limited.capacity_limit = 1;
    let mut h = harness(vec![limited, vendor("V2", VendorTier::Gold, 80.0)]);

    let first_order = h
        .engine
        .create_order(request(ServiceTier::Standard, SigningType::InPerson))
        .expect("first order");
    assert_eq!(h.next_notice().await.vendor_id, vid("V1"));

    let mut later = request(ServiceTier::Standard, SigningType::InPerson);
    later.window = window(17, 18);
    let second_order = h.engine.create_order(later).expect("second order");
    let notice = h.next_notice().await;
    assert_eq!(notice.order_id, second_order);
    assert_eq!(notice.vendor_id, vid("V2"));

    h.engine
        .respond_offer(&first_order, accept("V1"))
        .expect("accept");
    h.engine
        .respond_offer(&second_order, accept("V2"))
        .expect("accept");
    h.engine.wait_for_decision(&first_order).await.expect("first");
    h.engine.wait_for_decision(&second_order).await.expect("second");
    assert_eq!(h.engine.ledger().load(&vid("V1")).assignments, 1);
}

#[tokio::test(start_paused = true)]
async fn completion_frees_capacity_and_reassesses_tier() {
    let mut h = harness(vec![vendor("V1", VendorTier::Elite, 92.0)]);
    for n in 0..30 {
        h.history
            .record(CompletionRecord {
                order_id: OrderId(format!("hist-{n}")),
                vendor_id: vid("V1"),
                completed_at: at(8, 0) - chrono::Duration::days(n + 1),
                on_time: true,
                qa_passed: true,
                cancelled_by_vendor: false,
            })
            .expect("seed history");
    }

    let order_id = h
        .engine
        .create_order(request(ServiceTier::Standard, SigningType::InPerson))
        .expect("order accepted");
    h.next_notice().await;

    let premature = h
        .engine
        .complete_order(
            &order_id,
            CompletionReport {
                on_time: true,
                qa_passed: true,
                cancelled_by_vendor: false,
                completed_at: None,
            },
        )
        .expect_err("not confirmed yet");
    assert!(matches!(premature, DispatchError::InvalidTransition { .. }));

    h.engine
        .respond_offer(&order_id, accept("V1"))
        .expect("accept");
    h.engine.wait_for_decision(&order_id).await.expect("decision");
    assert_eq!(h.engine.ledger().load(&vid("V1")).assignments, 1);

    let completed_at = chrono::Utc
        .with_ymd_and_hms(2025, 6, 2, 15, 30, 0)
        .single()
        .expect("valid");
    let ack = h
        .engine
        .complete_order(
            &order_id,
            CompletionReport {
                on_time: false,
                qa_passed: false,
                cancelled_by_vendor: false,
                completed_at: Some(completed_at),
            },
        )
        .expect("completion recorded");

    assert_eq!(ack.record.vendor_id, vid("V1"));
    assert_eq!(ack.record.completed_at, completed_at);
    let change = ack.tier_change.expect("first assessment");
    assert_eq!(change.previous, None);
    assert_eq!(change.current, VendorTier::Gold);
    assert!((change.performance_score - 96.0).abs() < 1e-9);
    assert_eq!(h.engine.ledger().load(&vid("V1")).active(), 0);

    let twice = h
        .engine
        .complete_order(
            &order_id,
            CompletionReport {
                on_time: true,
                qa_passed: true,
                cancelled_by_vendor: false,
                completed_at: None,
            },
        )
        .expect_err("already completed");
    assert!(matches!(twice, DispatchError::InvalidTransition { .. }));
}

#[tokio::test(start_paused = true)]
async fn responses_without_an_offer_are_rejected() {
    let mut h = harness(vec![vendor("V1", VendorTier::Elite, 92.0)]);
    let order_id = h
        .engine
        .create_order(request(ServiceTier::Standard, SigningType::InPerson))
        .expect("order accepted");
    h.next_notice().await;

    let err = h
        .engine
        .respond_offer(&order_id, accept("V9"))
        .expect_err("never offered");
    assert!(matches!(
        err,
        DispatchError::InvalidTransition {
            status: OrderStatus::Offered,
            ..
        }
    ));
    assert_eq!(h.status(&order_id), OrderStatus::Offered);

    let unknown = h
        .engine
        .respond_offer(&OrderId("ord-missing".to_string()), accept("V1"))
        .expect_err("unknown order");
    assert!(matches!(unknown, DispatchError::UnknownOrder(_)));
}

#[tokio::test]
async fn malformed_intake_is_rejected_before_dispatch() {
    let h = harness(vec![vendor("V1", VendorTier::Elite, 92.0)]);

    let mut backwards = request(ServiceTier::Standard, SigningType::InPerson);
    backwards.window = window(15, 14);
    assert!(matches!(
        h.engine.create_order(backwards),
        Err(DispatchError::InvalidOrder(_))
    ));

    h.directory.set_offline(true);
    assert!(matches!(
        h.engine
            .create_order(request(ServiceTier::Standard, SigningType::InPerson)),
        Err(DispatchError::Directory(DirectoryError::Unavailable(_)))
    ));
    assert!(h.notifier.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn settled_orders_leave_the_table_and_answer_from_the_log() {
    let mut h = harness(vec![
        standby(vendor("V1", VendorTier::Elite, 92.0)),
        standby(vendor("V2", VendorTier::Gold, 80.0)),
    ]);

    let cancelled = h
        .engine
        .create_order(request(ServiceTier::Rescue, SigningType::Ron))
        .expect("order accepted");
    h.next_notice().await;
    h.next_notice().await;
    assert_eq!(h.engine.live_orders(), 1);

    h.engine.cancel_order(&cancelled).expect("cancel");
    h.engine.wait_for_decision(&cancelled).await.expect("decision");
    assert_eq!(h.engine.live_orders(), 0);

    let view = h.engine.order_status(&cancelled).expect("archived order");
    assert_eq!(view.order.status, OrderStatus::Cancelled);
    assert_eq!(view.attempts.len(), 2);
    assert_eq!(
        h.engine
            .decision(&cancelled)
            .expect("known order")
            .map(|decision| decision.outcome),
        Some(DecisionOutcome::Cancelled)
    );

    let late = h
        .engine
        .respond_offer(&cancelled, accept("V1"))
        .expect("answered from the log");
    assert_eq!(late, ResponseOutcome::Superseded);
    assert_eq!(
        h.log.anomalies()[0].kind,
        AnomalyKind::AcceptanceAfterCancel
    );
    let stranger = h
        .engine
        .respond_offer(&cancelled, accept("V9"))
        .expect_err("never offered");
    assert!(matches!(
        stranger,
        DispatchError::InvalidTransition {
            status: OrderStatus::Cancelled,
            ..
        }
    ));

    let confirmed = h
        .engine
        .create_order(request(ServiceTier::Rescue, SigningType::Ron))
        .expect("order accepted");
    h.next_notice().await;
    h.next_notice().await;
    h.engine
        .respond_offer(&confirmed, accept("V2"))
        .expect("accept");
    h.engine.wait_for_decision(&confirmed).await.expect("decision");
    assert_eq!(h.engine.live_orders(), 1);

    h.engine
        .complete_order(
            &confirmed,
            CompletionReport {
                on_time: true,
                qa_passed: true,
                cancelled_by_vendor: false,
                completed_at: None,
            },
        )
        .expect("completion recorded");
    assert_eq!(h.engine.live_orders(), 0);

    let view = h.engine.order_status(&confirmed).expect("archived order");
    assert_eq!(view.order.status, OrderStatus::Confirmed);
    assert_eq!(view.accepted_vendor, Some(vid("V2")));

    let late = h
        .engine
        .respond_offer(&confirmed, accept("V1"))
        .expect("answered from the log");
    assert_eq!(late, ResponseOutcome::Superseded);
    assert_eq!(h.log.anomalies()[1].kind, AnomalyKind::LateAcceptance);

    let again = h
        .engine
        .complete_order(
            &confirmed,
            CompletionReport {
                on_time: true,
                qa_passed: true,
                cancelled_by_vendor: false,
                completed_at: None,
            },
        )
        .expect_err("already completed");
    assert!(matches!(
        again,
        DispatchError::InvalidTransition {
            status: OrderStatus::Confirmed,
            ..
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn failed_orders_are_archived() {
    let h = harness(Vec::new());
    let order_id = h
        .engine
        .create_order(request(ServiceTier::Rescue, SigningType::InPerson))
        .expect("order accepted");
    let decision = h.engine.wait_for_decision(&order_id).await.expect("decision");
    assert_eq!(decision.order.status, OrderStatus::Failed);
    assert_eq!(h.engine.live_orders(), 0);
    assert_eq!(
        h.engine
            .wait_for_decision(&order_id)
            .await
            .expect("archived decision"),
        decision
    );
    assert!(matches!(
        h.engine.cancel_order(&order_id),
        Err(DispatchError::InvalidTransition {
            status: OrderStatus::Failed,
            ..
        })
    ));
}
