use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Celestial bodies tracked by the synastry scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Body {
    Sun,
    Moon,
    Ascendant,
    Mercury,
    Venus,
    Mars,
}

impl Body {
    /// All tracked bodies, in chart order
    pub const ALL: [Body; 6] = [
        Body::Sun,
        Body::Moon,
        Body::Ascendant,
        Body::Mercury,
        Body::Venus,
        Body::Mars,
    ];

    /// Position of the body in [`Body::ALL`]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Accepted spellings, lowercase and without separators
    pub fn aliases(self) -> &'static [&'static str] {
        match self {
            Body::Sun => &["sun"],
            Body::Moon => &["moon"],
            Body::Ascendant => &["ascendant", "asc", "rising"],
            Body::Mercury => &["mercury"],
            Body::Venus => &["venus"],
            Body::Mars => &["mars"],
        }
    }

    /// Parse a body name, case-insensitively
    pub fn from_name(name: &str) -> Option<Body> {
        let key = normalize_key(name);
        Body::ALL
            .into_iter()
            .find(|body| body.aliases().contains(&key.as_str()))
    }

    /// Sun, Moon and Ascendant carry extra weight in synastry
    pub fn is_personal_point(self) -> bool {
        matches!(self, Body::Sun | Body::Moon | Body::Ascendant)
    }
}

impl fmt::Display for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.aliases()[0])
    }
}

/// Zodiac signs in ecliptic order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZodiacSign {
    Aries,
    Taurus,
    Gemini,
    Cancer,
    Leo,
    Virgo,
    Libra,
    Scorpio,
    Sagittarius,
    Capricorn,
    Aquarius,
    Pisces,
}

impl ZodiacSign {
    pub const ALL: [ZodiacSign; 12] = [
        ZodiacSign::Aries,
        ZodiacSign::Taurus,
        ZodiacSign::Gemini,
        ZodiacSign::Cancer,
        ZodiacSign::Leo,
        ZodiacSign::Virgo,
        ZodiacSign::Libra,
        ZodiacSign::Scorpio,
        ZodiacSign::Sagittarius,
        ZodiacSign::Capricorn,
        ZodiacSign::Aquarius,
        ZodiacSign::Pisces,
    ];

    /// Absolute degree at which the sign begins (Aries = 0°)
    pub fn start_degree(self) -> f64 {
        (self as usize as f64) * 30.0
    }

    /// Parse a sign from its full name or three-letter abbreviation
    pub fn from_name(name: &str) -> Option<ZodiacSign> {
        let key = normalize_key(name);
        if key.len() < 3 {
            return None;
        }
        ZodiacSign::ALL.into_iter().find(|sign| {
            let full = format!("{:?}", sign).to_ascii_lowercase();
            full == key || (key.len() == 3 && full.starts_with(&key))
        })
    }
}

/// Upper bound for an intra-sign degree; 30° belongs to the next sign
pub const DEGREE_IN_SIGN_CEILING: f64 = 29.999_999;

/// A body's position, either inside a sign or on the full 360° ecliptic
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Placement {
    InSign { sign: ZodiacSign, degree: f64 },
    Absolute { degree: f64 },
}

impl Placement {
    pub fn in_sign(sign: ZodiacSign, degree: f64) -> Self {
        Placement::InSign { sign, degree }
    }

    pub fn absolute(degree: f64) -> Self {
        Placement::Absolute { degree }
    }

    /// Resolve to an absolute ecliptic degree in [0, 360)
    ///
    /// Intra-sign degrees are clamped to [0, 30) and absolute degrees are
    /// wrapped. Returns `None` for non-finite input.
    pub fn absolute_degree(&self) -> Option<f64> {
        match *self {
            Placement::InSign { sign, degree } => {
                if !degree.is_finite() {
                    return None;
                }
                Some(sign.start_degree() + degree.clamp(0.0, DEGREE_IN_SIGN_CEILING))
            }
            Placement::Absolute { degree } => {
                if !degree.is_finite() {
                    return None;
                }
                Some(degree.rem_euclid(360.0))
            }
        }
    }
}

/// Normalized natal chart: at most one placement per tracked body
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NatalChart {
    placements: [Option<Placement>; 6],
}

impl NatalChart {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, replacing any previous placement for the body
    pub fn with(mut self, body: Body, placement: Placement) -> Self {
        self.set(body, placement);
        self
    }

    pub fn set(&mut self, body: Body, placement: Placement) {
        self.placements[body.index()] = Some(placement);
    }

    pub fn get(&self, body: Body) -> Option<&Placement> {
        self.placements[body.index()].as_ref()
    }

    /// Absolute degree of a body, if it is present and resolvable
    pub fn degree(&self, body: Body) -> Option<f64> {
        self.get(body).and_then(Placement::absolute_degree)
    }

    /// Number of bodies that resolve to a usable degree
    pub fn resolved_count(&self) -> usize {
        Body::ALL
            .iter()
            .filter(|body| self.degree(**body).is_some())
            .count()
    }
}

/// A natal chart as it arrives from the profile store
///
/// Several shapes are in circulation; `core::chart::normalize_chart`
/// collapses them into a [`NatalChart`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawChart {
    /// `[{"body": "sun", "sign": "leo", "degree": 12.5}, ...]`
    List(Vec<Value>),
    /// `{"sun": {...}}`, `{"sun": 132.5}` or `{"sunSign": "leo", "sunDegree": 12.5}`
    Map(Map<String, Value>),
    /// Any of the above, JSON-encoded into a string attribute
    Encoded(String),
}

impl Default for RawChart {
    fn default() -> Self {
        RawChart::Map(Map::new())
    }
}

/// Letter grade bucket for a 0-100 score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
    F,
    #[serde(rename = "N/A")]
    NotApplicable,
}

impl Grade {
    /// ≥90 A, ≥80 B, ≥70 C, ≥60 D, otherwise F; non-finite scores get N/A
    pub fn from_score(score: f64) -> Self {
        if !score.is_finite() {
            Grade::NotApplicable
        } else if score >= 90.0 {
            Grade::A
        } else if score >= 80.0 {
            Grade::B
        } else if score >= 70.0 {
            Grade::C
        } else if score >= 60.0 {
            Grade::D
        } else {
            Grade::F
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Grade::A => "A",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
            Grade::F => "F",
            Grade::NotApplicable => "N/A",
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Profile projection needed for compatibility scoring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "natalChart", default)]
    pub natal_chart: Option<RawChart>,
    /// Opaque questionnaire answers, forwarded to the questionnaire scorer
    #[serde(default)]
    pub questionnaire: Value,
}

impl Profile {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            name: None,
            natal_chart: None,
            questionnaire: Value::Null,
        }
    }
}

/// Score returned by the external questionnaire scorer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionnaireScore {
    pub score: f64,
    pub grade: String,
}

/// Pairwise compatibility result
///
/// Keyed by the unordered pair of user IDs; a cached result computed for
/// (B, A) is served to (A, B) with the IDs re-oriented.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompatibilityResult {
    pub subject_id: String,
    pub candidate_id: String,
    pub astrological_score: u8,
    pub astrological_grade: Grade,
    /// True when no aspect could be evaluated and the score is the 50 fallback
    #[serde(default)]
    pub astrological_unscored: bool,
    pub questionnaire_score: f64,
    pub questionnaire_grade: String,
    pub combined_score: f64,
    pub combined_grade: Grade,
    pub meets_threshold: bool,
    pub priority_score: f64,
    pub is_recommended: bool,
    pub computed_at_ms: u64,
    #[serde(default)]
    pub from_cache: bool,
    /// True when this is the neutral default standing in for a failed task
    #[serde(default)]
    pub degraded: bool,
}

/// Score used by the neutral default
pub const NEUTRAL_SCORE: f64 = 50.0;

impl CompatibilityResult {
    /// Neutral default returned for a candidate whose scoring timed out or failed
    pub fn neutral(subject_id: &str, candidate_id: &str, computed_at_ms: u64) -> Self {
        Self {
            subject_id: subject_id.to_string(),
            candidate_id: candidate_id.to_string(),
            astrological_score: NEUTRAL_SCORE as u8,
            astrological_grade: Grade::C,
            astrological_unscored: true,
            questionnaire_score: NEUTRAL_SCORE,
            questionnaire_grade: Grade::C.to_string(),
            combined_score: NEUTRAL_SCORE,
            combined_grade: Grade::C,
            meets_threshold: false,
            priority_score: NEUTRAL_SCORE / 100.0,
            is_recommended: false,
            computed_at_ms,
            from_cache: false,
            degraded: true,
        }
    }

    /// Re-orient a stored result so that `subject_id` is the requesting side
    pub fn oriented_to(mut self, subject_id: &str) -> Self {
        if self.subject_id != subject_id && self.candidate_id == subject_id {
            std::mem::swap(&mut self.subject_id, &mut self.candidate_id);
        }
        self
    }
}

fn normalize_key(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|c| *c != '_' && *c != '-' && *c != ' ')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}
