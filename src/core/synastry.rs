use crate::models::{Body, Grade, NatalChart};
use serde::{Deserialize, Serialize};

/// Score reported when no aspect could be evaluated
pub const UNSCORED_FALLBACK: u8 = 50;

/// Points added per unit of average harmony, around the neutral 50
const HARMONY_SCALE: f64 = 25.0;

/// Base weight for a pair involving Sun, Moon or Ascendant
const PERSONAL_POINT_WEIGHT: f64 = 1.5;
/// Sun/Moon cross pair
const LUMINARY_PAIR_WEIGHT: f64 = 2.0;
/// Venus/Mars cross pair
const ROMANTIC_PAIR_WEIGHT: f64 = 1.7;
/// Maximum bonus for an exact aspect
const TIGHTNESS_BONUS: f64 = 0.5;

/// Aspect kinds recognised by the synastry scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AspectType {
    Conjunction,
    Sextile,
    Square,
    Trine,
    Opposition,
    Quincunx,
}

impl AspectType {
    /// Order in which a separation is tested; the first match wins
    pub const PRIORITY: [AspectType; 6] = [
        AspectType::Conjunction,
        AspectType::Sextile,
        AspectType::Square,
        AspectType::Trine,
        AspectType::Opposition,
        AspectType::Quincunx,
    ];

    pub fn exact_angle(self) -> f64 {
        match self {
            AspectType::Conjunction => 0.0,
            AspectType::Sextile => 60.0,
            AspectType::Square => 90.0,
            AspectType::Trine => 120.0,
            AspectType::Opposition => 180.0,
            AspectType::Quincunx => 150.0,
        }
    }

    pub fn orb(self) -> f64 {
        match self {
            AspectType::Conjunction
            | AspectType::Opposition
            | AspectType::Trine
            | AspectType::Square => 8.0,
            AspectType::Sextile => 6.0,
            AspectType::Quincunx => 3.0,
        }
    }

    pub fn harmony(self) -> f64 {
        match self {
            AspectType::Trine => 1.0,
            AspectType::Sextile => 0.7,
            AspectType::Conjunction => 0.3,
            AspectType::Quincunx => -0.3,
            AspectType::Opposition => -0.5,
            AspectType::Square => -0.7,
        }
    }
}

/// One aspect found between a body in chart A and a body in chart B
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AspectMatch {
    pub body_a: Body,
    pub body_b: Body,
    pub aspect: AspectType,
    /// Angular separation in [0, 180]
    pub angular_delta: f64,
    pub weight: f64,
}

/// Outcome of a synastry scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynastryReport {
    pub score: u8,
    pub grade: Grade,
    pub raw_harmony: f64,
    pub total_weight: f64,
    pub aspects: Vec<AspectMatch>,
    /// No resolvable pair formed an aspect; `score` is the 50 fallback
    pub unscored: bool,
}

/// Angular separation between two ecliptic degrees, reduced to [0, 180]
#[inline]
pub fn angular_separation(a: f64, b: f64) -> f64 {
    let delta = (a - b).abs() % 360.0;
    if delta > 180.0 {
        360.0 - delta
    } else {
        delta
    }
}

/// First aspect (in priority order) whose orb contains the separation
#[inline]
pub fn classify_aspect(separation: f64) -> Option<AspectType> {
    AspectType::PRIORITY
        .into_iter()
        .find(|aspect| (separation - aspect.exact_angle()).abs() <= aspect.orb())
}

/// Weight before the tightness bonus
///
/// The Sun/Moon and Venus/Mars overrides replace the personal-point rule
/// rather than stacking with it.
#[inline]
pub fn base_weight(a: Body, b: Body) -> f64 {
    let is_pair = |x: Body, y: Body| (a == x && b == y) || (a == y && b == x);

    if is_pair(Body::Sun, Body::Moon) {
        LUMINARY_PAIR_WEIGHT
    } else if is_pair(Body::Venus, Body::Mars) {
        ROMANTIC_PAIR_WEIGHT
    } else if a.is_personal_point() || b.is_personal_point() {
        PERSONAL_POINT_WEIGHT
    } else {
        1.0
    }
}

/// Evaluate a single body pair
pub fn evaluate_pair(body_a: Body, degree_a: f64, body_b: Body, degree_b: f64) -> Option<AspectMatch> {
    let separation = angular_separation(degree_a, degree_b);
    let aspect = classify_aspect(separation)?;

    let deviation = (separation - aspect.exact_angle()).abs();
    let tightness = (1.0 - deviation / aspect.orb()).clamp(0.0, 1.0);
    let weight = base_weight(body_a, body_b) * (1.0 + TIGHTNESS_BONUS * tightness);

    Some(AspectMatch {
        body_a,
        body_b,
        aspect,
        angular_delta: separation,
        weight,
    })
}

/// Score the synastry between two normalized charts
///
/// Every unordered pair of body names is visited once (21 pairs). Same-name
/// pairs compare A.x with B.x; cross-name pairs {x, y} are evaluated in both
/// orientations, A.x–B.y and A.y–B.x, and the two contributions are summed
/// before being accumulated. That makes `score_synastry(a, b)` bit-for-bit
/// equal to `score_synastry(b, a)`.
pub fn score_synastry(chart_a: &NatalChart, chart_b: &NatalChart) -> SynastryReport {
    let mut aspects = Vec::new();
    let mut raw_harmony = 0.0;
    let mut total_weight = 0.0;

    for (i, &x) in Body::ALL.iter().enumerate() {
        for &y in &Body::ALL[i..] {
            let forward = pair_match(chart_a, x, chart_b, y);
            let backward = if x == y {
                None
            } else {
                pair_match(chart_a, y, chart_b, x)
            };

            let (h1, w1) = contribution(forward.as_ref());
            let (h2, w2) = contribution(backward.as_ref());
            raw_harmony += h1 + h2;
            total_weight += w1 + w2;

            aspects.extend(forward);
            aspects.extend(backward);
        }
    }

    if total_weight <= 0.0 {
        return SynastryReport {
            score: UNSCORED_FALLBACK,
            grade: Grade::from_score(UNSCORED_FALLBACK as f64),
            raw_harmony,
            total_weight,
            aspects,
            unscored: true,
        };
    }

    let score = (50.0 + (raw_harmony / total_weight) * HARMONY_SCALE)
        .clamp(0.0, 100.0)
        .round();

    SynastryReport {
        score: score as u8,
        grade: Grade::from_score(score),
        raw_harmony,
        total_weight,
        aspects,
        unscored: false,
    }
}

fn pair_match(chart_a: &NatalChart, body_a: Body, chart_b: &NatalChart, body_b: Body) -> Option<AspectMatch> {
    let degree_a = chart_a.degree(body_a)?;
    let degree_b = chart_b.degree(body_b)?;
    evaluate_pair(body_a, degree_a, body_b, degree_b)
}

#[inline]
fn contribution(aspect: Option<&AspectMatch>) -> (f64, f64) {
    aspect
        .map(|m| (m.aspect.harmony() * m.weight, m.weight))
        .unwrap_or((0.0, 0.0))
}
