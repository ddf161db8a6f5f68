use super::super::domain::{SigningOrder, Vendor};
use super::config::ScoreWeights;
use super::{ScoreComponent, ScoreFactor, ScoreStrategy};

/// Default strategy: a plain weighted sum of the five matching factors.
#[derive(Debug, Clone, Copy, Default)]
pub struct WeightedSum;

impl ScoreStrategy for WeightedSum {
    fn score(
        &self,
        vendor: &Vendor,
        order: &SigningOrder,
        weights: &ScoreWeights,
    ) -> Vec<ScoreComponent> {
        vec![
            tier_component(vendor, weights),
            performance_component(vendor, weights),
            specialization_component(vendor, order, weights),
            proximity_component(vendor, order, weights),
            load_component(vendor, weights),
        ]
    }
}

fn tier_component(vendor: &Vendor, weights: &ScoreWeights) -> ScoreComponent {
    ScoreComponent {
        factor: ScoreFactor::Tier,
        value: weights.tier_points.points(vendor.tier),
        notes: format!("{} tier", vendor.tier.label()),
    }
}

fn performance_component(vendor: &Vendor, weights: &ScoreWeights) -> ScoreComponent {
    let score = vendor.performance_score.clamp(0.0, 100.0);
    ScoreComponent {
        factor: ScoreFactor::Performance,
        value: weights.performance * score / 100.0,
        notes: format!("performance score {score:.1}"),
    }
}

fn specialization_component(
    vendor: &Vendor,
    order: &SigningOrder,
    weights: &ScoreWeights,
) -> ScoreComponent {
    let requested: Vec<&str> = order.tags().collect();
    if requested.is_empty() {
        return ScoreComponent {
            factor: ScoreFactor::Specialization,
            value: 0.0,
            notes: "no specialization requested".to_string(),
        };
    }

    let matched: Vec<&str> = requested
        .iter()
        .copied()
        .filter(|tag| vendor.has_tag(tag))
        .collect();

    if matched.is_empty() {
        ScoreComponent {
            factor: ScoreFactor::Specialization,
            value: 0.0,
            notes: format!("no tag match for {}", requested.join(", ")),
        }
    } else {
        ScoreComponent {
            factor: ScoreFactor::Specialization,
            value: weights.specialization_match,
            notes: format!("matched {}", matched.join(", ")),
        }
    }
}

fn proximity_component(
    vendor: &Vendor,
    order: &SigningOrder,
    weights: &ScoreWeights,
) -> ScoreComponent {
    if !order.signing_type.has_in_person_leg() {
        return ScoreComponent {
            factor: ScoreFactor::Proximity,
            value: 0.0,
            notes: "remote signing".to_string(),
        };
    }

    let Some(location) = order.location else {
        return ScoreComponent {
            factor: ScoreFactor::Proximity,
            value: 0.0,
            notes: "signing location unknown".to_string(),
        };
    };

    let distance = vendor.base_location.distance_km(&location);
    let scale = weights.proximity_scale_km.max(f64::EPSILON);
    ScoreComponent {
        factor: ScoreFactor::Proximity,
        value: weights.proximity * scale / (scale + distance),
        notes: format!("{distance:.1} km from signing"),
    }
}

fn load_component(vendor: &Vendor, weights: &ScoreWeights) -> ScoreComponent {
    ScoreComponent {
        factor: ScoreFactor::Load,
        value: -weights.load_penalty * f64::from(vendor.active_offer_count),
        notes: format!(
            "{} of {} slots held",
            vendor.active_offer_count, vendor.capacity_limit
        ),
    }
}
