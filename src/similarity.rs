use crate::models::Coordinates;
use crate::normalize::{normalize_phone, normalize_text, phone_digits};

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Returned by [`distance_m`] when either side has no coordinates.
pub const UNKNOWN_DISTANCE_M: f64 = f64::MAX;

/// Trailing digits compared when two phone numbers differ only by prefix.
const PHONE_SUFFIX_DIGITS: usize = 8;

/// Similarity of two free-text values in `[0, 1]`.
///
/// Both sides are folded with [`normalize_text`]. An empty side scores 0, equal
/// folded strings score 1, anything else gets the matching-characters ratio
/// `2 * common / (len_a + len_b)`.
pub fn string_similarity(a: &str, b: &str) -> f64 {
    let a = normalize_text(a);
    let b = normalize_text(b);

    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }

    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    // The longest-run split breaks ties by position, so count both ways round
    // to keep the score symmetric.
    let common = common_chars(&a, &b).max(common_chars(&b, &a));

    (2 * common) as f64 / (a.len() + b.len()) as f64
}

/// Counts characters shared by `a` and `b`: take the longest common run, then
/// recurse into the pieces to its left and to its right.
fn common_chars(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }

    let mut best = 0;
    let mut best_a = 0;
    let mut best_b = 0;
    for i in 0..a.len() {
        for j in 0..b.len() {
            let mut run = 0;
            while i + run < a.len() && j + run < b.len() && a[i + run] == b[j + run] {
                run += 1;
            }
            if run > best {
                best = run;
                best_a = i;
                best_b = j;
            }
        }
    }

    if best == 0 {
        return 0;
    }

    best + common_chars(&a[..best_a], &b[..best_b])
        + common_chars(&a[best_a + best..], &b[best_b + best..])
}

/// Phone similarity: 1.0 on exact normalized match, 0.95 when both carry at
/// least eight digits and the last eight agree, 0.0 otherwise.
pub fn phone_similarity(a: Option<&str>, b: Option<&str>) -> f64 {
    let (Some(a), Some(b)) = (a, b) else {
        return 0.0;
    };

    let a_norm = normalize_phone(a);
    let b_norm = normalize_phone(b);
    if a_norm.is_empty() || b_norm.is_empty() {
        return 0.0;
    }
    if a_norm == b_norm {
        return 1.0;
    }

    let a_digits = phone_digits(&a_norm);
    let b_digits = phone_digits(&b_norm);
    if a_digits.len() >= PHONE_SUFFIX_DIGITS
        && b_digits.len() >= PHONE_SUFFIX_DIGITS
        && a_digits[a_digits.len() - PHONE_SUFFIX_DIGITS..]
            == b_digits[b_digits.len() - PHONE_SUFFIX_DIGITS..]
    {
        return 0.95;
    }

    0.0
}

/// Haversine great-circle distance between two points, in meters.
pub fn haversine_m(a: &Coordinates, b: &Coordinates) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().min(1.0).asin();
    EARTH_RADIUS_M * c
}

/// Distance between two optional points; [`UNKNOWN_DISTANCE_M`] if either is missing.
pub fn distance_m(a: Option<&Coordinates>, b: Option<&Coordinates>) -> f64 {
    match (a, b) {
        (Some(a), Some(b)) => haversine_m(a, b),
        _ => UNKNOWN_DISTANCE_M,
    }
}
