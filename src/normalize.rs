/// Normalization helpers shared by the adapters, the duplicate detector and the scorer.
///
/// - Loose provider JSON → `CandidateRecord`
/// - Text folding for fuzzy comparison (case, diacritics, punctuation, whitespace)
/// - Phone normalization
/// - Email / phone / website validity checks
use crate::models::{Address, CandidateRecord, Coordinates, StructuredAddress};
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Minimum digit count for a phone number to count as valid.
pub const MIN_PHONE_DIGITS: usize = 10;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)+$",
    )
    .unwrap()
});

// French local format: 0X XX XX XX XX, separators optional.
static NATIONAL_PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^0[1-9](?:[\s.\-]?\d{2}){4}$").unwrap());

// ============ Text ============

/// Folds text for fuzzy comparison.
///
/// Lowercases, strips diacritics, drops anything that is not alphanumeric or
/// whitespace, then collapses runs of whitespace.
pub fn normalize_text(text: &str) -> String {
    let folded: String = text
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();

    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Keeps digits and a leading `+`, nothing else.
pub fn normalize_phone(phone: &str) -> String {
    let trimmed = phone.trim();
    let mut normalized = String::with_capacity(trimmed.len());
    if trimmed.starts_with('+') {
        normalized.push('+');
    }
    normalized.extend(trimmed.chars().filter(|c| c.is_ascii_digit()));
    normalized
}

pub fn phone_digits(phone: &str) -> String {
    phone.chars().filter(|c| c.is_ascii_digit()).collect()
}

// ============ Validation ============

/// Syntactic email check (local@domain.tld).
pub fn is_valid_email(email: &str) -> bool {
    let email = email.trim();
    email.len() >= 5 && EMAIL_RE.is_match(email)
}

/// A phone is valid when it carries at least `MIN_PHONE_DIGITS` digits.
pub fn is_valid_phone(phone: &str) -> bool {
    phone_digits(phone).len() >= MIN_PHONE_DIGITS
}

/// Recognizes a nationally formatted local number (e.g. `01 42 68 53 00`).
pub fn is_national_format(phone: &str) -> bool {
    NATIONAL_PHONE_RE.is_match(phone.trim())
}

/// http(s) URL with a host.
pub fn is_valid_website(website: &str) -> bool {
    match url::Url::parse(website.trim()) {
        Ok(parsed) => {
            matches!(parsed.scheme(), "http" | "https") && parsed.host_str().is_some()
        }
        Err(_) => false,
    }
}

pub fn is_https(website: &str) -> bool {
    website.trim().to_ascii_lowercase().starts_with("https://")
}

/// Number of fractional digits in the shortest decimal rendering of `value`.
pub fn decimal_places(value: f64) -> usize {
    let rendered = value.to_string();
    rendered
        .split_once('.')
        .map_or(0, |(_, fraction)| fraction.len())
}

/// Precision of a coordinate pair: the smaller of the two fractional digit counts.
pub fn coordinate_precision(coordinates: &Coordinates) -> usize {
    decimal_places(coordinates.lat).min(decimal_places(coordinates.lng))
}

// ============ Raw provider JSON ============

const KNOWN_FIELDS: &[&str] = &[
    "name",
    "company",
    "sector",
    "city",
    "postal_code",
    "address",
    "phone",
    "email",
    "website",
    "description",
    "coordinates",
    "latitude",
    "longitude",
    "lat",
    "lng",
    "source",
    "external_id",
    "_merged_from_sources",
    "_is_merged",
];

/// Reads a scalar as trimmed text; numbers are rendered, blanks become `None`.
pub fn text_value(value: Option<&Value>) -> Option<String> {
    let text = match value? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Reads a number that may arrive as a JSON number or a numeric string.
pub fn float_value(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite())
}

fn coordinates_from(object: &Map<String, Value>) -> Option<Coordinates> {
    if let Some(Value::Object(nested)) = object.get("coordinates") {
        let lat = float_value(nested.get("lat").or_else(|| nested.get("latitude")));
        let lng = float_value(
            nested
                .get("lng")
                .or_else(|| nested.get("lon"))
                .or_else(|| nested.get("longitude")),
        );
        if let (Some(lat), Some(lng)) = (lat, lng) {
            return Some(Coordinates { lat, lng });
        }
    }

    let lat = float_value(object.get("latitude").or_else(|| object.get("lat")));
    let lng = float_value(object.get("longitude").or_else(|| object.get("lng")));
    match (lat, lng) {
        (Some(lat), Some(lng)) => Some(Coordinates { lat, lng }),
        _ => None,
    }
}

fn address_from(value: Option<&Value>) -> Option<Address> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(Address::Text(s.trim().to_string())),
        Value::Object(parts) => {
            let address = StructuredAddress {
                street: text_value(parts.get("street")),
                city: text_value(parts.get("city")),
                postal_code: text_value(parts.get("postal_code")),
                country: text_value(parts.get("country")),
                full: text_value(parts.get("full")),
            };
            let address = Address::Structured(address);
            if address.is_empty() {
                None
            } else {
                Some(address)
            }
        }
        _ => None,
    }
}

impl CandidateRecord {
    /// Builds a record from a loosely-shaped JSON object.
    ///
    /// Known fields are coerced leniently (numbers as text, string coordinates,
    /// top-level `latitude`/`longitude`); unknown fields go to `extra`.
    /// Non-object values yield an empty record.
    pub fn from_value(value: Value) -> Self {
        let Value::Object(object) = value else {
            return Self::default();
        };

        let mut record = CandidateRecord {
            name: text_value(object.get("name")),
            company: text_value(object.get("company")),
            sector: text_value(object.get("sector")),
            city: text_value(object.get("city")),
            postal_code: text_value(object.get("postal_code")),
            address: address_from(object.get("address")),
            phone: text_value(object.get("phone")),
            email: text_value(object.get("email")),
            website: text_value(object.get("website")),
            description: text_value(object.get("description")),
            coordinates: coordinates_from(&object),
            source: text_value(object.get("source")),
            external_id: text_value(object.get("external_id")),
            ..Default::default()
        };

        for (key, value) in object {
            if !KNOWN_FIELDS.contains(&key.as_str()) {
                record.extra.insert(key, value);
            }
        }

        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_text_folds_case_accents_and_punctuation() {
        assert_eq!(normalize_text("  Café   de l'Église! "), "cafe de leglise");
        assert_eq!(normalize_text("ÉCOLE-Saint-Joseph"), "ecolesaintjoseph");
        assert_eq!(normalize_text("   "), "");
    }

    #[test]
    fn test_normalize_phone_keeps_leading_plus_only() {
        assert_eq!(normalize_phone("+33 (0)1 42-68-53-00"), "+330142685300");
        assert_eq!(normalize_phone("01.42.68.53.00"), "0142685300");
        assert_eq!(normalize_phone("01 + 42"), "0142");
    }

    #[test]
    fn test_national_format() {
        assert!(is_national_format("01 42 68 53 00"));
        assert!(is_national_format("0142685300"));
        assert!(is_national_format("01.42.68.53.00"));
        assert!(!is_national_format("+33 1 42 68 53 00"));
        assert!(!is_national_format("142685300"));
    }

    #[test]
    fn test_validators() {
        assert!(is_valid_email("contact@boulangerie.fr"));
        assert!(!is_valid_email("contact@boulangerie"));
        assert!(!is_valid_email("not an email"));

        assert!(is_valid_phone("01 42 68 53 00"));
        assert!(!is_valid_phone("42 68 53"));

        assert!(is_valid_website("https://boulangerie.fr"));
        assert!(is_valid_website("http://boulangerie.fr/contact"));
        assert!(!is_valid_website("boulangerie.fr"));
        assert!(!is_valid_website("ftp://boulangerie.fr"));
    }

    #[test]
    fn test_decimal_places() {
        assert_eq!(decimal_places(48.8566), 4);
        assert_eq!(decimal_places(2.0), 0);
        assert_eq!(
            coordinate_precision(&Coordinates {
                lat: 48.856614,
                lng: 2.35
            }),
            2
        );
    }

    #[test]
    fn test_from_value_coerces_and_keeps_extras() {
        let record = CandidateRecord::from_value(json!({
            "name": "  Garage Dupont ",
            "phone": 142685300,
            "latitude": "48.8566",
            "longitude": 2.3522,
            "external_id": 98765,
            "rating": 4.2,
            "email": ""
        }));

        assert_eq!(record.name.as_deref(), Some("Garage Dupont"));
        assert_eq!(record.phone.as_deref(), Some("142685300"));
        assert_eq!(record.external_id.as_deref(), Some("98765"));
        assert_eq!(record.email, None);
        assert_eq!(
            record.coordinates,
            Some(Coordinates {
                lat: 48.8566,
                lng: 2.3522
            })
        );
        assert_eq!(record.extra.get("rating"), Some(&json!(4.2)));
        assert!(!record.extra.contains_key("latitude"));
    }

    #[test]
    fn test_from_value_structured_address() {
        let record = CandidateRecord::from_value(json!({
            "address": {"street": "3 place du Marché", "city": "Lyon", "postal_code": "69001"},
            "coordinates": {"lat": 45.764, "lng": 4.8357}
        }));

        assert_eq!(record.address_text(), "3 place du Marché 69001 Lyon");
        assert!(record.coordinates.is_some());
    }

    #[test]
    fn test_from_value_non_object() {
        assert_eq!(CandidateRecord::from_value(json!([1, 2])), CandidateRecord::default());
    }
}
