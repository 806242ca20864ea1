use chrono::{TimeZone, Utc};
use pv_forecast::repo::SqliteRepo;
use pv_forecast::{ForecastManager, Outcome};
use serde_json::json;
use wiremock::matchers::{method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::fixtures::config;

/// 2024-06-21 10:00 UTC
const ISSUE_EPOCH: i64 = 1_718_964_000;

fn onecall(issue: i64) -> serde_json::Value {
    let hours: Vec<_> = (0..6)
        .map(|h| {
            json!({
                "dt": issue + h * 3600,
                "temp": 293.0 + h as f64,
                "pressure": 1015,
                "dew_point": 283.0,
                "clouds": 10 * h,
                "wind_speed": 2.5,
                "humidity": 50,
                "weather": [{"id": 800, "main": "Clear"}]
            })
        })
        .collect();
    json!({"lat": 50.11, "lon": 8.68, "current": {"dt": issue}, "hourly": hours})
}

fn owm_section(server: &MockServer, extra: &str) -> String {
    format!(
        r#"
        [openweathermap]
        api_key = "owm-key"
        base_url = "{uri}/data/2.5/onecall"
        store_db = true
        {extra}
        "#,
        uri = server.uri()
    )
}

#[tokio::test]
async fn test_openweather_stored_once_per_issue() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    Mock::given(method("GET"))
        .and(path("/data/2.5/onecall"))
        .and(query_param("appid", "owm-key"))
        .and(query_param("lat", "50.11"))
        .respond_with(ResponseTemplate::new(200).set_body_json(onecall(ISSUE_EPOCH)))
        .expect(2)
        .mount(&server)
        .await;

    let manager = ForecastManager::new(config(dir.path(), &owm_section(&server, ""))).unwrap();
    assert_eq!(manager.process_openweather().await.unwrap(), Outcome::Processed);
    // same issue time again: under 58 minutes since the stored one
    assert_eq!(manager.process_openweather().await.unwrap(), Outcome::Skipped);
    manager.close().await;

    let db = SqliteRepo::connect(&dir.path().join("pvforecast.db")).await.unwrap();
    assert_eq!(
        db.last_issue_time("owm").await.unwrap(),
        Utc.with_ymd_and_hms(2024, 6, 21, 10, 0, 0).unwrap()
    );
    let columns = db.table_columns("owm").await.unwrap();
    for c in ["dc_clearsky_scaling", "ac_clearsky_scaling", "zenith", "clouds"] {
        assert!(columns.contains(&c.to_string()), "missing {c}");
    }
    assert!(!columns.contains(&"humidity".to_string()));
}

#[tokio::test]
async fn test_openweather_issue_delta_is_rounded() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(onecall(ISSUE_EPOCH)))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    // 58 min 40 s later rounds to 59 minutes
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(onecall(ISSUE_EPOCH + 58 * 60 + 40)))
        .mount(&server)
        .await;

    let manager = ForecastManager::new(config(dir.path(), &owm_section(&server, ""))).unwrap();
    assert_eq!(manager.process_openweather().await.unwrap(), Outcome::Processed);
    assert_eq!(manager.process_openweather().await.unwrap(), Outcome::Processed);
    manager.close().await;

    let db = SqliteRepo::connect(&dir.path().join("pvforecast.db")).await.unwrap();
    assert_eq!(
        db.last_issue_time("owm").await.unwrap(),
        Utc.with_ymd_and_hms(2024, 6, 21, 10, 58, 40).unwrap()
    );
}

#[tokio::test]
async fn test_openweather_force_and_model_list() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(onecall(ISSUE_EPOCH)))
        .mount(&server)
        .await;

    let section = owm_section(
        &server,
        "force = true\nirradiance = \"campbell_norman, clearsky\"\ndrop_weather = false",
    );
    let manager = ForecastManager::new(config(dir.path(), &section)).unwrap();
    assert_eq!(manager.process_openweather().await.unwrap(), Outcome::Processed);
    assert_eq!(manager.process_openweather().await.unwrap(), Outcome::Processed);
    manager.close().await;

    let db = SqliteRepo::connect(&dir.path().join("pvforecast.db")).await.unwrap();
    let columns = db.table_columns("owm").await.unwrap();
    assert!(columns.contains(&"ac_campbell_norman".to_string()));
    assert!(columns.contains(&"ac_clearsky".to_string()));
    assert!(columns.contains(&"humidity".to_string()));
    assert!(!columns.contains(&"ac_clearsky_scaling".to_string()));
}

#[tokio::test]
async fn test_visualcrossing_forecast_hours_only() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let hour = |epoch: i64, source: &str| {
        json!({
            "datetimeEpoch": epoch, "source": source, "temp": 21.0, "dew": 9.0,
            "windspeed": 7.2, "pressure": 1012.0, "cloudcover": 30.0,
            "solarradiation": 650.0
        })
    };
    let body = json!({
        "days": [{"hours": [
            hour(ISSUE_EPOCH - 3600, "obs"),
            hour(ISSUE_EPOCH, "fcst"),
            hour(ISSUE_EPOCH + 3600, "fcst"),
        ]}]
    });
    Mock::given(method("GET"))
        .and(path_regex(r"^/timeline/.+"))
        .and(query_param("key", "vc-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&server)
        .await;

    let section = format!(
        "[visualcrossing]\napi_key = \"vc-key\"\nbase_url = \"{}/timeline\"\nstore_db = true",
        server.uri()
    );
    let manager = ForecastManager::new(config(dir.path(), &section)).unwrap();
    assert_eq!(manager.process_visualcrossing().await.unwrap(), Outcome::Processed);
    manager.close().await;

    let db = SqliteRepo::connect(&dir.path().join("pvforecast.db")).await.unwrap();
    assert_eq!(
        db.last_issue_time("visualcrossing").await.unwrap(),
        Utc.with_ymd_and_hms(2024, 6, 21, 9, 30, 0).unwrap()
    );
    let rows: Vec<(String, f64)> =
        sqlx::query_as("SELECT PeriodEnd, wind_speed FROM visualcrossing ORDER BY PeriodEnd")
            .fetch_all(db.pool())
            .await
            .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].0, "2024-06-21 10:30:00+00:00");
    assert!((rows[0].1 - 2.0).abs() < 1e-9);
}

const FAST_RETRY: &str = "\n[http]\nretries = 2\nretry_backoff_ms = 10";

#[tokio::test]
async fn test_server_error_reported_after_retries() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let manager =
        ForecastManager::new(config(dir.path(), &owm_section(&server, FAST_RETRY))).unwrap();
    let err = manager.process_openweather().await.unwrap_err();
    let err = err.downcast_ref::<pv_forecast::ForecastError>().unwrap();
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_transient_error_retried() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(onecall(ISSUE_EPOCH)))
        .expect(1)
        .mount(&server)
        .await;

    let manager =
        ForecastManager::new(config(dir.path(), &owm_section(&server, FAST_RETRY))).unwrap();
    assert_eq!(manager.process_openweather().await.unwrap(), Outcome::Processed);
}

#[tokio::test]
async fn test_client_error_not_retried() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let manager =
        ForecastManager::new(config(dir.path(), &owm_section(&server, FAST_RETRY))).unwrap();
    let err = manager.process_openweather().await.unwrap_err();
    let err = err.downcast_ref::<pv_forecast::ForecastError>().unwrap();
    assert!(!err.is_transient());
}
