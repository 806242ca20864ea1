use chrono::{Duration, TimeZone, Utc};
use pv_forecast::repo::SqliteRepo;
use pv_forecast::{ForecastManager, Outcome};
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::fixtures::config;

fn forecasts(kw: f64) -> serde_json::Value {
    let start = Utc.with_ymd_and_hms(2024, 6, 21, 12, 30, 0).unwrap();
    let periods: Vec<_> = (0..4)
        .map(|i| {
            let end = start + Duration::minutes(30 * i);
            json!({
                "period_end": end.format("%Y-%m-%dT%H:%M:%S.0000000Z").to_string(),
                "period": "PT30M",
                "pv_estimate": kw,
                "pv_estimate10": kw / 2.0,
                "pv_estimate90": kw * 1.5
            })
        })
        .collect();
    json!({ "forecasts": periods })
}

fn solcast_section(server: &MockServer, dir: &std::path::Path, extra: &str) -> String {
    format!(
        r#"
        [forecasts]
        solcast = true

        [solcast]
        api_key = "secret"
        resource_id = "site-a"
        base_url = "{uri}"
        hours = 48
        force = true
        store_db = true
        store_csv = true
        store_path = "{dir}"
        {extra}
        "#,
        uri = server.uri(),
        dir = dir.display()
    )
}

async fn mount_site(server: &MockServer, id: &str, kw: f64) {
    Mock::given(method("GET"))
        .and(path(format!("/rooftop_sites/{id}/forecasts")))
        .and(query_param("hours", "48"))
        .and(header("authorization", "Bearer secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(forecasts(kw)))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_single_site_stored_in_watts() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    mount_site(&server, "site-a", 1.5).await;

    let manager =
        ForecastManager::new(config(dir.path(), &solcast_section(&server, dir.path(), ""))).unwrap();
    let now = Utc.with_ymd_and_hms(2024, 6, 21, 12, 5, 0).unwrap();
    assert_eq!(manager.process_solcast(now).await.unwrap(), Outcome::Processed);
    manager.close().await;

    assert!(dir.path().join("solcast_2024-06-21_12-00.csv.gz").exists());
    let db = SqliteRepo::connect(&dir.path().join("pvforecast.db")).await.unwrap();
    assert_eq!(
        db.last_issue_time("solcast").await.unwrap(),
        Utc.with_ymd_and_hms(2024, 6, 21, 12, 0, 0).unwrap()
    );
    let estimates: Vec<f64> = sqlx::query_scalar("SELECT pv_estimate FROM solcast")
        .fetch_all(db.pool())
        .await
        .unwrap();
    assert_eq!(estimates, vec![1500.0; 4]);
}

#[tokio::test]
async fn test_two_sites_are_summed() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    mount_site(&server, "site-a", 1.0).await;
    mount_site(&server, "site-b", 0.5).await;

    let section = solcast_section(&server, dir.path(), "resource_id_2 = \"site-b\"");
    let manager = ForecastManager::new(config(dir.path(), &section)).unwrap();
    // 20 minutes late: issue time moves 15 minutes on
    let now = Utc.with_ymd_and_hms(2024, 6, 21, 12, 20, 0).unwrap();
    manager.process_solcast(now).await.unwrap();
    manager.close().await;

    let db = SqliteRepo::connect(&dir.path().join("pvforecast.db")).await.unwrap();
    assert_eq!(
        db.last_issue_time("solcast").await.unwrap(),
        Utc.with_ymd_and_hms(2024, 6, 21, 12, 15, 0).unwrap()
    );
    let row: (f64, f64, f64) = sqlx::query_as(
        "SELECT pv_estimate, pv_estimate_1, pv_estimate_2 FROM solcast LIMIT 1",
    )
    .fetch_one(db.pool())
    .await
    .unwrap();
    assert_eq!(row, (1500.0, 1000.0, 500.0));
}

#[tokio::test]
async fn test_without_database_sink_nothing_is_downloaded() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(forecasts(1.0)))
        .expect(0)
        .mount(&server)
        .await;

    let section = solcast_section(&server, dir.path(), "").replace("store_db = true", "store_db = false");
    let manager = ForecastManager::new(config(dir.path(), &section)).unwrap();
    assert_eq!(
        manager.process_solcast(Utc::now()).await.unwrap(),
        Outcome::Skipped
    );
}

#[tokio::test]
async fn test_rate_limited_is_an_error() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let manager =
        ForecastManager::new(config(dir.path(), &solcast_section(&server, dir.path(), ""))).unwrap();
    let summary = manager.run_forecasts().await;
    assert!(!summary.is_success());
    assert!(summary.failed[0].1.contains("429"));
}

#[tokio::test]
async fn test_database_issue_time_preferred_over_influx() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    mount_site(&server, "site-a", 1.0).await;
    Mock::given(method("GET"))
        .and(path("/query"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/write"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let extra = format!(
        "store_influx = true\n\n[influx]\nhost = \"127.0.0.1\"\nport = {}",
        server.address().port()
    );
    let section = solcast_section(&server, dir.path(), &extra);
    let manager = ForecastManager::new(config(dir.path(), &section)).unwrap();
    let now = Utc.with_ymd_and_hms(2024, 6, 21, 12, 5, 0).unwrap();
    assert_eq!(manager.process_solcast(now).await.unwrap(), Outcome::Processed);
    manager.close().await;
}
