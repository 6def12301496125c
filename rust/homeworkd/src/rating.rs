// Theme self-assessment ratings are stored as 1..=5 and shown as 20..=100%.

pub const MIN_RATING: i64 = 1;
pub const MAX_RATING: i64 = 5;
pub const DEFAULT_RATING: i64 = 3;

pub fn clamp_rating(x: f64) -> i64 {
    if !x.is_finite() {
        return MIN_RATING;
    }
    (x.round() as i64).clamp(MIN_RATING, MAX_RATING)
}

/// Accepts numbers and numeric strings, as sent by range inputs.
pub fn rating_from_json(v: Option<&serde_json::Value>) -> i64 {
    let raw = match v {
        Some(serde_json::Value::Number(n)) => n.as_f64().unwrap_or(f64::NAN),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().unwrap_or(f64::NAN),
        _ => f64::NAN,
    };
    clamp_rating(raw)
}

pub fn rating_to_percent(rating: i64) -> i64 {
    rating.clamp(MIN_RATING, MAX_RATING) * 20
}

pub fn percent_to_rating(percent: f64) -> i64 {
    let p = if percent.is_finite() { percent } else { 0.0 };
    clamp_rating((p / 20.0).round())
}
