use crate::models::{Body, NatalChart, Placement, RawChart, ZodiacSign};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Object form of a single placement, as found in lists and keyed maps
#[derive(Debug, Deserialize)]
struct RawPlacement {
    #[serde(default, alias = "name")]
    body: Option<String>,
    #[serde(default)]
    sign: Option<String>,
    #[serde(default, alias = "degreeInSign", alias = "degree_in_sign")]
    degree: Option<f64>,
    #[serde(default, alias = "absoluteDegree", alias = "absolute_degree", alias = "longitude")]
    absolute: Option<f64>,
}

impl RawPlacement {
    /// Absolute degree wins over (sign, degree); a bare sign sits at 0°
    fn into_placement(self) -> Option<Placement> {
        if let Some(degree) = self.absolute {
            return Some(Placement::absolute(degree));
        }
        let sign = ZodiacSign::from_name(self.sign.as_deref()?)?;
        Some(Placement::in_sign(sign, self.degree.unwrap_or(0.0)))
    }
}

/// Collapse any supported chart shape into a [`NatalChart`]
///
/// Bodies that cannot be resolved are left empty; they are skipped by the
/// scorer rather than treated as errors.
pub fn normalize_chart(raw: &RawChart) -> NatalChart {
    match raw {
        RawChart::List(entries) => from_list(entries),
        RawChart::Map(map) => from_map(map),
        RawChart::Encoded(json) => match serde_json::from_str::<RawChart>(json) {
            // A string nested inside a string is not a chart
            Ok(RawChart::Encoded(_)) => NatalChart::new(),
            Ok(inner) => normalize_chart(&inner),
            Err(e) => {
                tracing::debug!("Ignoring undecodable natal chart: {}", e);
                NatalChart::new()
            }
        },
    }
}

/// Normalize an optional chart; a missing chart has no placements
pub fn normalize_optional(raw: Option<&RawChart>) -> NatalChart {
    raw.map(normalize_chart).unwrap_or_default()
}

fn from_list(entries: &[Value]) -> NatalChart {
    let mut chart = NatalChart::new();

    for entry in entries {
        let Ok(raw) = serde_json::from_value::<RawPlacement>(entry.clone()) else {
            continue;
        };
        let Some(body) = raw.body.as_deref().and_then(Body::from_name) else {
            continue;
        };
        if let Some(placement) = raw.into_placement() {
            chart.set(body, placement);
        }
    }

    chart
}

fn from_map(map: &Map<String, Value>) -> NatalChart {
    // Case- and separator-insensitive view: "sunSign", "sun_sign" -> "sunsign"
    let keyed: HashMap<String, &Value> = map
        .iter()
        .map(|(key, value)| (flatten_key(key), value))
        .collect();

    let mut chart = NatalChart::new();

    for body in Body::ALL {
        let placement = body
            .aliases()
            .iter()
            .find_map(|alias| keyed.get(*alias).and_then(|v| placement_from_value(v)))
            .or_else(|| flat_placement(body, &keyed));

        if let Some(placement) = placement {
            chart.set(body, placement);
        }
    }

    chart
}

/// Interpret a per-body value: a number, a sign name, or a placement object
fn placement_from_value(value: &Value) -> Option<Placement> {
    match value {
        Value::Number(n) => n.as_f64().map(Placement::absolute),
        Value::String(s) => match s.trim().parse::<f64>() {
            Ok(degree) => Some(Placement::absolute(degree)),
            Err(_) => ZodiacSign::from_name(s).map(|sign| Placement::in_sign(sign, 0.0)),
        },
        Value::Object(_) => serde_json::from_value::<RawPlacement>(value.clone())
            .ok()
            .and_then(RawPlacement::into_placement),
        _ => None,
    }
}

/// Legacy flat layout: `sunSign` + `sunDegree`, or `sunLongitude`
fn flat_placement(body: Body, keyed: &HashMap<String, &Value>) -> Option<Placement> {
    body.aliases().iter().find_map(|alias| {
        let absolute = ["longitude", "absolutedegree"]
            .iter()
            .find_map(|suffix| keyed.get(&format!("{alias}{suffix}")))
            .and_then(|v| v.as_f64());
        if let Some(degree) = absolute {
            return Some(Placement::absolute(degree));
        }

        let sign = keyed
            .get(&format!("{alias}sign"))
            .and_then(|v| v.as_str())
            .and_then(ZodiacSign::from_name)?;
        let degree = ["degree", "degreeinsign"]
            .iter()
            .find_map(|suffix| keyed.get(&format!("{alias}{suffix}")))
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0);
        Some(Placement::in_sign(sign, degree))
    })
}

fn flatten_key(key: &str) -> String {
    key.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}
