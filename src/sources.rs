use crate::config::Config;
use crate::errors::{AppError, ResultExt};
use crate::models::{Address, CandidateRecord, Coordinates, Filters, StructuredAddress};
use crate::normalize::{float_value, text_value};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub const GOOGLE_MAPS: &str = "google_maps";
pub const NOMINATIM: &str = "nominatim";
pub const PAGES_JAUNES: &str = "pages_jaunes";
pub const HUNTER: &str = "hunter";

const DEFAULT_LIMIT: usize = 20;
const USER_AGENT: &str = concat!("prospect-search/", env!("CARGO_PKG_VERSION"));

/// One external data provider.
///
/// Implementations return records already mapped to the common shape, with
/// `source` set to their own id. Errors are reported per source by the
/// orchestrator and never abort a search.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self, query: &str, filters: &Filters)
        -> Result<Vec<CandidateRecord>, AppError>;
}

// ============ Filter helpers ============

pub fn filter_limit(filters: &Filters) -> usize {
    filters
        .get("limit")
        .and_then(|v| float_value(Some(v)))
        .filter(|v| *v >= 1.0)
        .map_or(DEFAULT_LIMIT, |v| v as usize)
}

pub fn filter_text(filters: &Filters, key: &str) -> Option<String> {
    text_value(filters.get(key))
}

/// Sends the request and parses a JSON body, mapping failures the same way for every provider.
async fn fetch_json(request: RequestBuilder, provider: &str) -> Result<Value, AppError> {
    let response = request.send().await.map_err(|e| {
        if e.is_timeout() {
            AppError::Timeout(format!("{} request timed out", provider))
        } else {
            AppError::ExternalApiError(format!("{} request failed: {}", provider, e))
        }
    })?;

    if !response.status().is_success() {
        let status = response.status();
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        tracing::error!("{} returned error {}: {}", provider, status, error_text);
        return Err(AppError::ExternalApiError(format!(
            "{} returned status {}: {}",
            provider, status, error_text
        )));
    }

    response.json().await.map_err(|e| {
        AppError::ExternalApiError(format!("Failed to parse {} response: {}", provider, e))
    })
}

fn missing_credential(variable: &str) -> AppError {
    AppError::ExternalApiError(format!("{} not configured", variable))
}

fn build_url(base: &str, path: &str, params: &[(&str, &str)]) -> Result<reqwest::Url, AppError> {
    reqwest::Url::parse_with_params(&format!("{}{}", base, path), params)
        .map_err(|e| AppError::ExternalApiError(format!("Failed to build URL: {}", e)))
}

fn copy_extras(from: &Value, keys: &[&str], into: &mut Map<String, Value>) {
    for key in keys {
        if let Some(value) = from.get(*key).filter(|v| !v.is_null()) {
            into.insert((*key).to_string(), value.clone());
        }
    }
}

// ============ Google Maps (Places text search) ============

pub struct GoogleMapsAdapter {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl GoogleMapsAdapter {
    pub fn new(config: &Config, client: Client) -> Self {
        Self {
            client,
            base_url: config.google_maps_base_url.clone(),
            api_key: config.google_maps_api_key.clone(),
        }
    }

    fn to_record(place: &Value) -> CandidateRecord {
        let location = place.get("geometry").and_then(|g| g.get("location"));
        let coordinates = location.and_then(|loc| {
            Some(Coordinates {
                lat: float_value(loc.get("lat"))?,
                lng: float_value(loc.get("lng"))?,
            })
        });

        let mut record = CandidateRecord {
            name: text_value(place.get("name")),
            sector: place
                .get("types")
                .and_then(|t| t.as_array())
                .and_then(|t| text_value(t.first())),
            address: text_value(place.get("formatted_address")).map(Address::Text),
            phone: text_value(place.get("formatted_phone_number"))
                .or_else(|| text_value(place.get("international_phone_number"))),
            website: text_value(place.get("website")),
            coordinates,
            source: Some(GOOGLE_MAPS.to_string()),
            external_id: text_value(place.get("place_id")),
            ..Default::default()
        };
        copy_extras(
            place,
            &["rating", "user_ratings_total", "business_status", "opening_hours"],
            &mut record.extra,
        );
        record
    }
}

#[async_trait]
impl SourceAdapter for GoogleMapsAdapter {
    fn name(&self) -> &str {
        GOOGLE_MAPS
    }

    async fn fetch(
        &self,
        query: &str,
        filters: &Filters,
    ) -> Result<Vec<CandidateRecord>, AppError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| missing_credential("GOOGLE_MAPS_API_KEY"))?;

        let text_query = match filter_text(filters, "city") {
            Some(city) => format!("{} in {}", query, city),
            None => query.to_string(),
        };
        let url = build_url(
            &self.base_url,
            "/maps/api/place/textsearch/json",
            &[("query", text_query.as_str()), ("key", api_key)],
        )?;

        tracing::info!("Google Maps: text search for '{}'", text_query);
        let body = fetch_json(self.client.get(url), "Google Maps").await?;

        let status = body.get("status").and_then(|s| s.as_str()).unwrap_or("OK");
        if status != "OK" && status != "ZERO_RESULTS" {
            let message = body
                .get("error_message")
                .and_then(|m| m.as_str())
                .unwrap_or("no error message");
            return Err(AppError::ExternalApiError(format!(
                "Google Maps status {}: {}",
                status, message
            )));
        }

        let records: Vec<CandidateRecord> = body
            .get("results")
            .and_then(|r| r.as_array())
            .map(|places| places.iter().map(Self::to_record).collect())
            .unwrap_or_default();

        let limit = filter_limit(filters);
        tracing::info!("Google Maps: {} places for '{}'", records.len(), text_query);
        Ok(records.into_iter().take(limit).collect())
    }
}

// ============ Nominatim (OpenStreetMap geocoder) ============

pub struct NominatimAdapter {
    client: Client,
    base_url: String,
}

impl NominatimAdapter {
    pub fn new(config: &Config, client: Client) -> Self {
        Self {
            client,
            base_url: config.nominatim_base_url.clone(),
        }
    }

    fn to_record(place: &Value) -> CandidateRecord {
        let address = place.get("address");
        let part = |keys: &[&str]| {
            address.and_then(|a| keys.iter().find_map(|k| text_value(a.get(*k))))
        };
        let street = match (part(&["house_number"]), part(&["road", "pedestrian"])) {
            (Some(number), Some(road)) => Some(format!("{} {}", number, road)),
            (None, road) => road,
            (number, None) => number,
        };
        let city = part(&["city", "town", "village", "municipality"]);
        let postal_code = part(&["postcode"]);

        let tags = place.get("extratags");
        let tag = |keys: &[&str]| tags.and_then(|t| keys.iter().find_map(|k| text_value(t.get(*k))));

        let display_name = text_value(place.get("display_name"));
        let name = text_value(place.get("name")).or_else(|| {
            display_name
                .as_deref()
                .and_then(|d| d.split(',').next())
                .map(|n| n.trim().to_string())
        });

        let coordinates = match (float_value(place.get("lat")), float_value(place.get("lon"))) {
            (Some(lat), Some(lng)) => Some(Coordinates { lat, lng }),
            _ => None,
        };

        let mut record = CandidateRecord {
            name,
            sector: text_value(place.get("type")),
            city: city.clone(),
            postal_code: postal_code.clone(),
            address: Some(Address::Structured(StructuredAddress {
                street,
                city,
                postal_code,
                country: part(&["country"]),
                full: display_name,
            }))
            .filter(|a| !a.is_empty()),
            phone: tag(&["phone", "contact:phone"]),
            email: tag(&["email", "contact:email"]),
            website: tag(&["website", "contact:website"]),
            coordinates,
            source: Some(NOMINATIM.to_string()),
            external_id: text_value(place.get("osm_id")).or_else(|| text_value(place.get("place_id"))),
            ..Default::default()
        };
        copy_extras(place, &["osm_type", "category", "importance"], &mut record.extra);
        if let Some(hours) = tag(&["opening_hours"]) {
            record.extra.insert("opening_hours".to_string(), Value::String(hours));
        }
        record
    }
}

#[async_trait]
impl SourceAdapter for NominatimAdapter {
    fn name(&self) -> &str {
        NOMINATIM
    }

    async fn fetch(
        &self,
        query: &str,
        filters: &Filters,
    ) -> Result<Vec<CandidateRecord>, AppError> {
        let text_query = match filter_text(filters, "city") {
            Some(city) => format!("{} {}", query, city),
            None => query.to_string(),
        };
        let limit = filter_limit(filters).to_string();
        let url = build_url(
            &self.base_url,
            "/search",
            &[
                ("q", text_query.as_str()),
                ("format", "jsonv2"),
                ("addressdetails", "1"),
                ("extratags", "1"),
                ("limit", limit.as_str()),
            ],
        )?;

        tracing::info!("Nominatim: geocoding '{}'", text_query);
        let body = fetch_json(
            self.client.get(url).header("User-Agent", USER_AGENT),
            "Nominatim",
        )
        .await?;

        let places = body.as_array().ok_or_else(|| {
            AppError::ExternalApiError("Nominatim response is not an array".to_string())
        })?;

        let records: Vec<CandidateRecord> = places.iter().map(Self::to_record).collect();
        tracing::info!("Nominatim: {} places for '{}'", records.len(), text_query);
        Ok(records)
    }
}

// ============ Pages Jaunes (business directory) ============

pub struct PagesJaunesAdapter {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl PagesJaunesAdapter {
    pub fn new(config: &Config, client: Client) -> Self {
        Self {
            client,
            base_url: config.pages_jaunes_base_url.clone(),
            token: config.pages_jaunes_token.clone(),
        }
    }

    fn to_record(listing: &Value) -> CandidateRecord {
        let inscription = listing
            .get("inscriptions")
            .and_then(|i| i.as_array())
            .and_then(|i| i.first());
        let field = |key: &str| inscription.and_then(|i| text_value(i.get(key)));

        let contact = |kind: &str| {
            inscription
                .and_then(|i| i.get("contact_info"))
                .and_then(|c| c.as_array())
                .and_then(|contacts| {
                    contacts.iter().find_map(|c| {
                        let matches = c
                            .get("contact_type")
                            .and_then(|t| t.as_str())
                            .is_some_and(|t| t.eq_ignore_ascii_case(kind));
                        if matches {
                            text_value(c.get("contact_value"))
                        } else {
                            None
                        }
                    })
                })
        };

        let coordinates = inscription.and_then(|i| {
            Some(Coordinates {
                lat: float_value(i.get("latitude"))?,
                lng: float_value(i.get("longitude"))?,
            })
        });

        let city = field("address_city");
        let postal_code = field("address_zipcode");
        let address = Address::Structured(StructuredAddress {
            street: field("address_street"),
            city: city.clone(),
            postal_code: postal_code.clone(),
            country: None,
            full: None,
        });

        let mut record = CandidateRecord {
            name: text_value(listing.get("merchant_name")),
            company: text_value(listing.get("merchant_name")),
            sector: listing
                .get("categories")
                .and_then(|c| c.as_array())
                .and_then(|c| c.first())
                .and_then(|c| text_value(c.get("category_name"))),
            city,
            postal_code,
            address: Some(address).filter(|a| !a.is_empty()),
            phone: contact("TELEPHONE").or_else(|| contact("MOBILE")),
            email: contact("MAIL"),
            website: listing
                .get("website_urls")
                .and_then(|w| w.as_array())
                .and_then(|w| w.first())
                .and_then(|w| text_value(w.get("website_url"))),
            description: text_value(listing.get("description")),
            coordinates,
            source: Some(PAGES_JAUNES.to_string()),
            external_id: text_value(listing.get("merchant_id")),
            ..Default::default()
        };
        copy_extras(listing, &["reviews", "opening_hours"], &mut record.extra);
        record
    }
}

#[async_trait]
impl SourceAdapter for PagesJaunesAdapter {
    fn name(&self) -> &str {
        PAGES_JAUNES
    }

    async fn fetch(
        &self,
        query: &str,
        filters: &Filters,
    ) -> Result<Vec<CandidateRecord>, AppError> {
        let token = self
            .token
            .as_deref()
            .ok_or_else(|| missing_credential("PAGES_JAUNES_TOKEN"))?;

        let location = filter_text(filters, "city").unwrap_or_else(|| "France".to_string());
        let limit = filter_limit(filters).to_string();
        let url = build_url(
            &self.base_url,
            "/v1/pros/search",
            &[
                ("what", query),
                ("where", location.as_str()),
                ("max", limit.as_str()),
            ],
        )?;

        tracing::info!("Pages Jaunes: searching '{}' in {}", query, location);
        let body = fetch_json(self.client.get(url).bearer_auth(token), "Pages Jaunes").await?;

        let records: Vec<CandidateRecord> = body
            .get("search_results")
            .and_then(|r| r.get("listings"))
            .and_then(|l| l.as_array())
            .map(|listings| listings.iter().map(Self::to_record).collect())
            .unwrap_or_default();

        tracing::info!("Pages Jaunes: {} listings for '{}'", records.len(), query);
        Ok(records)
    }
}

// ============ Hunter (email finder) ============

pub struct HunterAdapter {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HunterAdapter {
    pub fn new(config: &Config, client: Client) -> Self {
        Self {
            client,
            base_url: config.hunter_base_url.clone(),
            api_key: config.hunter_api_key.clone(),
        }
    }

    /// One record per email found for the organization.
    fn to_records(data: &Value, query: &str) -> Vec<CandidateRecord> {
        let organization = text_value(data.get("organization"));
        let base = CandidateRecord {
            name: organization.clone().or_else(|| Some(query.to_string())),
            company: organization,
            sector: text_value(data.get("industry")),
            city: text_value(data.get("city")),
            postal_code: text_value(data.get("postal_code")),
            phone: text_value(data.get("phone_number")),
            website: text_value(data.get("domain")).map(|d| format!("https://{}", d)),
            description: text_value(data.get("description")),
            source: Some(HUNTER.to_string()),
            external_id: text_value(data.get("domain")),
            ..Default::default()
        };

        let emails = data
            .get("emails")
            .and_then(|e| e.as_array())
            .cloned()
            .unwrap_or_default();
        if emails.is_empty() {
            return if base.website.is_some() { vec![base] } else { Vec::new() };
        }

        emails
            .iter()
            .filter_map(|entry| {
                let email = text_value(entry.get("value"))?;
                let mut record = CandidateRecord {
                    email: Some(email),
                    phone: text_value(entry.get("phone_number")).or_else(|| base.phone.clone()),
                    ..base.clone()
                };
                let contact_name = [entry.get("first_name"), entry.get("last_name")]
                    .into_iter()
                    .filter_map(text_value)
                    .collect::<Vec<_>>()
                    .join(" ");
                if !contact_name.is_empty() {
                    record
                        .extra
                        .insert("contact_name".to_string(), Value::String(contact_name));
                }
                copy_extras(entry, &["position", "confidence"], &mut record.extra);
                Some(record)
            })
            .collect()
    }
}

#[async_trait]
impl SourceAdapter for HunterAdapter {
    fn name(&self) -> &str {
        HUNTER
    }

    async fn fetch(
        &self,
        query: &str,
        filters: &Filters,
    ) -> Result<Vec<CandidateRecord>, AppError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| missing_credential("HUNTER_API_KEY"))?;

        let limit = filter_limit(filters).to_string();
        let url = build_url(
            &self.base_url,
            "/v2/domain-search",
            &[
                ("company", query),
                ("limit", limit.as_str()),
                ("api_key", api_key),
            ],
        )?;

        tracing::info!("Hunter: domain search for '{}'", query);
        // Redact key from logs
        tracing::debug!(
            "Hunter URL: {}/v2/domain-search?company={}&api_key=[REDACTED]",
            self.base_url,
            query
        );

        let body = fetch_json(self.client.get(url), "Hunter")
            .await
            .with_context(|| format!("Hunter domain search for '{}'", query))?;

        let records = body
            .get("data")
            .map(|data| Self::to_records(data, query))
            .unwrap_or_default();

        tracing::info!("Hunter: {} contacts for '{}'", records.len(), query);
        Ok(records)
    }
}

// ============ Registry ============

/// Adapters by source id.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    adapters: HashMap<String, Arc<dyn SourceAdapter>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the four HTTP adapters sharing one client bounded by the source timeout.
    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.source_timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| AppError::InternalError(format!("Failed to create HTTP client: {}", e)))
            .context("building source registry")?;

        let mut registry = Self::new();
        registry.register(Arc::new(GoogleMapsAdapter::new(config, client.clone())));
        registry.register(Arc::new(NominatimAdapter::new(config, client.clone())));
        registry.register(Arc::new(PagesJaunesAdapter::new(config, client.clone())));
        registry.register(Arc::new(HunterAdapter::new(config, client)));
        Ok(registry)
    }

    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) {
        self.adapters.insert(adapter.name().to_string(), adapter);
    }

    pub fn get(&self, source: &str) -> Option<Arc<dyn SourceAdapter>> {
        self.adapters.get(source).cloned()
    }

    /// Registered ids, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.adapters.keys().cloned().collect();
        names.sort();
        names
    }
}
