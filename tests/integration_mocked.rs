/// Integration tests with mocked provider APIs
/// Exercises the HTTP source adapters and a full search without hitting real services
use prospect_search::cache::{MokaSearchCache, SearchCache};
use prospect_search::config::Config;
use prospect_search::models::{Filters, SearchResponse};
use prospect_search::search::SearchAggregator;
use prospect_search::sources::{
    GoogleMapsAdapter, HunterAdapter, NominatimAdapter, PagesJaunesAdapter, SourceAdapter,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Helper function to create test config with every provider pointed at the mock server
fn create_test_config(base_url: String) -> Config {
    Config {
        google_maps_base_url: base_url.clone(),
        google_maps_api_key: Some("test_maps_key".to_string()),
        nominatim_base_url: base_url.clone(),
        pages_jaunes_base_url: base_url.clone(),
        pages_jaunes_token: Some("test_pj_token".to_string()),
        hunter_base_url: base_url,
        hunter_api_key: Some("test_hunter_key".to_string()),
        source_timeout_secs: 5,
        ..Config::default()
    }
}

fn lyon() -> Filters {
    let mut filters = Filters::new();
    filters.insert("city".to_string(), json!("Lyon"));
    filters
}

fn google_places_body() -> serde_json::Value {
    json!({
        "status": "OK",
        "results": [
            {
                "name": "Boulangerie Martin",
                "formatted_address": "3 Place du Marché, 69001 Lyon, France",
                "formatted_phone_number": "04 78 42 10 10",
                "website": "https://boulangerie-martin.fr",
                "geometry": {"location": {"lat": 45.764043, "lng": 4.835659}},
                "place_id": "ChIJmartin",
                "types": ["bakery", "store"],
                "rating": 4.7
            },
            {
                "name": "Fromagerie Richard",
                "formatted_address": "102 Cours Lafayette, 69003 Lyon, France",
                "geometry": {"location": {"lat": 45.7631, "lng": 4.8520}},
                "place_id": "ChIJrichard"
            }
        ]
    })
}

fn nominatim_body() -> serde_json::Value {
    json!([
        {
            "place_id": 98765,
            "osm_id": 123456,
            "osm_type": "node",
            "lat": "45.7640",
            "lon": "4.8357",
            "name": "Boulangerie Martin",
            "type": "bakery",
            "display_name": "Boulangerie Martin, 3, Place du Marché, Lyon, 69001, France",
            "address": {
                "house_number": "3",
                "road": "Place du Marché",
                "city": "Lyon",
                "postcode": "69001",
                "country": "France"
            },
            "extratags": {"phone": "+33 4 78 42 10 10", "website": "http://boulangerie-martin.fr"}
        }
    ])
}

#[tokio::test]
async fn test_google_maps_text_search() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/maps/api/place/textsearch/json"))
        .and(query_param("query", "boulangerie in Lyon"))
        .and(query_param("key", "test_maps_key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(google_places_body()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = create_test_config(mock_server.uri());
    let adapter = GoogleMapsAdapter::new(&config, reqwest::Client::new());

    let records = adapter.fetch("boulangerie", &lyon()).await.unwrap();

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].name.as_deref(), Some("Boulangerie Martin"));
    assert_eq!(records[0].phone.as_deref(), Some("04 78 42 10 10"));
    assert_eq!(records[0].source.as_deref(), Some("google_maps"));
    assert_eq!(records[0].external_id.as_deref(), Some("ChIJmartin"));
    assert_eq!(
        records[0].address_text(),
        "3 Place du Marché, 69001 Lyon, France"
    );
    assert_eq!(records[1].phone, None);
}

#[tokio::test]
async fn test_google_maps_error_status() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/maps/api/place/textsearch/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "REQUEST_DENIED",
            "error_message": "The provided API key is invalid.",
            "results": []
        })))
        .mount(&mock_server)
        .await;

    let config = create_test_config(mock_server.uri());
    let adapter = GoogleMapsAdapter::new(&config, reqwest::Client::new());

    let err = adapter.fetch("boulangerie", &Filters::new()).await.unwrap_err();
    assert!(err.to_string().contains("REQUEST_DENIED"));
}

#[tokio::test]
async fn test_missing_credential_fails_without_calling_provider() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(0)
        .mount(&mock_server)
        .await;

    let config = Config {
        hunter_api_key: None,
        ..create_test_config(mock_server.uri())
    };
    let adapter = HunterAdapter::new(&config, reqwest::Client::new());

    let err = adapter.fetch("martin", &Filters::new()).await.unwrap_err();
    assert!(err.to_string().contains("HUNTER_API_KEY not configured"));
}

#[tokio::test]
async fn test_nominatim_search_and_server_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("q", "boulangerie Lyon"))
        .and(query_param("format", "jsonv2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(nominatim_body()))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("q", "fromagerie"))
        .respond_with(ResponseTemplate::new(503).set_body_string("Service Unavailable"))
        .mount(&mock_server)
        .await;

    let config = create_test_config(mock_server.uri());
    let adapter = NominatimAdapter::new(&config, reqwest::Client::new());

    let records = adapter.fetch("boulangerie", &lyon()).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].city.as_deref(), Some("Lyon"));
    assert_eq!(records[0].postal_code.as_deref(), Some("69001"));
    assert_eq!(records[0].phone.as_deref(), Some("+33 4 78 42 10 10"));

    let err = adapter.fetch("fromagerie", &Filters::new()).await.unwrap_err();
    assert!(err.to_string().contains("503"));
}

#[tokio::test]
async fn test_pages_jaunes_sends_bearer_token() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/pros/search"))
        .and(header("Authorization", "Bearer test_pj_token"))
        .and(query_param("what", "plombier"))
        .and(query_param("where", "Lyon"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "search_results": {
                "listings": [{
                    "merchant_id": "PJ-001",
                    "merchant_name": "Plomberie Lefebvre",
                    "description": "Dépannage plomberie 7j/7",
                    "categories": [{"category_name": "Plombier"}],
                    "website_urls": [{"website_url": "https://plomberie-lefebvre.fr"}],
                    "inscriptions": [{
                        "address_street": "8 rue Mercière",
                        "address_zipcode": "69002",
                        "address_city": "Lyon",
                        "latitude": 45.7609,
                        "longitude": 4.8331,
                        "contact_info": [
                            {"contact_type": "TELEPHONE", "contact_value": "04 72 00 00 00"},
                            {"contact_type": "MAIL", "contact_value": "contact@plomberie-lefebvre.fr"}
                        ]
                    }]
                }]
            }
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = create_test_config(mock_server.uri());
    let adapter = PagesJaunesAdapter::new(&config, reqwest::Client::new());

    let records = adapter.fetch("plombier", &lyon()).await.unwrap();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.name.as_deref(), Some("Plomberie Lefebvre"));
    assert_eq!(record.sector.as_deref(), Some("Plombier"));
    assert_eq!(record.phone.as_deref(), Some("04 72 00 00 00"));
    assert_eq!(record.email.as_deref(), Some("contact@plomberie-lefebvre.fr"));
    assert_eq!(record.address_text(), "8 rue Mercière 69002 Lyon");
    assert_eq!(record.source.as_deref(), Some("pages_jaunes"));
}

#[tokio::test]
async fn test_hunter_domain_search() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v2/domain-search"))
        .and(query_param("company", "Boulangerie Martin"))
        .and(query_param("api_key", "test_hunter_key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "domain": "boulangerie-martin.fr",
                "organization": "Boulangerie Martin",
                "emails": [
                    {"value": "paul@boulangerie-martin.fr", "first_name": "Paul", "last_name": "Martin", "position": "Gérant", "confidence": 94}
                ]
            }
        })))
        .mount(&mock_server)
        .await;

    let config = create_test_config(mock_server.uri());
    let adapter = HunterAdapter::new(&config, reqwest::Client::new());

    let records = adapter.fetch("Boulangerie Martin", &Filters::new()).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].email.as_deref(), Some("paul@boulangerie-martin.fr"));
    assert_eq!(records[0].website.as_deref(), Some("https://boulangerie-martin.fr"));
    assert_eq!(records[0].extra.get("confidence"), Some(&json!(94)));
}

#[tokio::test]
async fn test_full_search_merges_across_providers() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/maps/api/place/textsearch/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(google_places_body()))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(nominatim_body()))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v2/domain-search"))
        .respond_with(ResponseTemplate::new(429).set_body_string("Too Many Requests"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = create_test_config(mock_server.uri());
    let cache: Arc<dyn SearchCache> = Arc::new(MokaSearchCache::new(Duration::from_secs(60), 100));
    let aggregator = SearchAggregator::from_config(&config, cache).unwrap();
    let sources = vec![
        "google_maps".to_string(),
        "nominatim".to_string(),
        "hunter".to_string(),
    ];

    let response: SearchResponse = aggregator
        .aggregate_search("boulangerie", &lyon(), &sources)
        .await;

    assert_eq!(response.error, None);
    assert_eq!(response.search_stats.sources_successful, 2);
    assert_eq!(response.search_stats.total_raw_results, 3);
    assert!(!response.search_stats.by_source["hunter"].success);
    assert_eq!(response.deduplication_info.duplicates_removed, 1);
    assert_eq!(response.total_found, 2);
    assert_eq!(response.duplicates_found.len(), 1);
    assert_eq!(response.duplicates_found[0].indices, vec![0, 2]);

    let top = &response.aggregated_results[0];
    assert_eq!(top.record.name.as_deref(), Some("Boulangerie Martin"));
    assert_eq!(
        top.record.merged_from_sources,
        Some(vec!["google_maps".to_string(), "nominatim".to_string()])
    );
    assert_eq!(top.record.phone.as_deref(), Some("04 78 42 10 10"));
    assert_eq!(top.record.website.as_deref(), Some("https://boulangerie-martin.fr"));
    assert_eq!(top.record.city.as_deref(), Some("Lyon"));
    assert_eq!(top.confidence_score.as_ref().map(|s| s.total), Some(86.0));

    // Same search again: whole response comes from cache, no provider calls.
    let again = aggregator
        .aggregate_search("boulangerie", &lyon(), &sources)
        .await;
    assert!(again.cache_info.from_cache);
    assert_eq!(again.aggregated_results, response.aggregated_results);
}
