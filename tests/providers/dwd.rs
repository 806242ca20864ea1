use chrono::{TimeZone, Utc};
use pv_forecast::forecast::DwdSource;
use pv_forecast::repo::SqliteRepo;
use pv_forecast::{ForecastManager, Outcome};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::fixtures::{config, kmz, mosmix_kml, PLACEMARK_10500, PLACEMARK_10637};

fn dwd_section(server: &MockServer, dir: &std::path::Path) -> String {
    format!(
        r#"
        [dwd]
        station = "10637"
        url_l = "{uri}/mosmix_l/"
        url_s = "{uri}/mosmix_s/"
        store_db = true
        store_kmz = true
        store_path = "{dir}"
        "#,
        uri = server.uri(),
        dir = dir.display()
    )
}

#[tokio::test]
async fn test_mosmix_l_download_is_modelled_and_stored() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    Mock::given(method("GET"))
        .and(path("/mosmix_l/10637/kml/MOSMIX_L_LATEST_10637.kmz"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(kmz(
            "MOSMIX_L_2024030109_10637.kml",
            &mosmix_kml(&[PLACEMARK_10637]),
        )))
        .expect(1)
        .mount(&server)
        .await;

    let manager = ForecastManager::new(config(dir.path(), &dwd_section(&server, dir.path()))).unwrap();
    let outcome = manager.process_dwd(&DwdSource::MosmixL).await.unwrap();
    assert_eq!(outcome, Outcome::Processed);
    manager.close().await;

    assert!(dir.path().join("MOSMIX_L_2024030109_10637.kml.gz").exists());
    let db = SqliteRepo::connect(&dir.path().join("pvforecast.db")).await.unwrap();
    assert_eq!(
        db.last_issue_time("dwd").await.unwrap(),
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    );
    let rows: i64 = sqlx::query_scalar("SELECT count(*) FROM dwd WHERE ac_disc IS NOT NULL")
        .fetch_one(db.pool())
        .await
        .unwrap();
    assert_eq!(rows, 3);
}

#[tokio::test]
async fn test_mosmix_l_archive_with_two_entries_fails() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for name in ["a.kml", "b.kml"] {
        writer
            .start_file(name, zip::write::SimpleFileOptions::default())
            .unwrap();
    }
    let body = writer.finish().unwrap().into_inner();
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .mount(&server)
        .await;

    let manager = ForecastManager::new(config(dir.path(), &dwd_section(&server, dir.path()))).unwrap();
    let err = manager.process_dwd(&DwdSource::MosmixL).await.unwrap_err();
    assert!(format!("{err:#}").contains("should be 1"));
}

#[tokio::test]
async fn test_mosmix_s_extracts_station_once() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let listing = r#"<html><body><pre>
<a href="MOSMIX_S_2024030108_240.kmz">MOSMIX_S_2024030108_240.kmz</a>
<a href="MOSMIX_S_2024030109_240.kmz">MOSMIX_S_2024030109_240.kmz</a>
<a href="MOSMIX_S_LATEST_240.kmz">MOSMIX_S_LATEST_240.kmz</a>
</pre></body></html>"#;
    Mock::given(method("GET"))
        .and(path("/mosmix_s/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/mosmix_s/MOSMIX_S_2024030109_240.kmz"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(kmz(
            "MOSMIX_S_2024030109_240.kml",
            &mosmix_kml(&[PLACEMARK_10500, PLACEMARK_10637]),
        )))
        .expect(1)
        .mount(&server)
        .await;
    std::fs::write(dir.path().join("MOSMIX_S_2024030108_240.kmz"), b"old").unwrap();

    let manager = ForecastManager::new(config(dir.path(), &dwd_section(&server, dir.path()))).unwrap();
    assert_eq!(
        manager.process_dwd(&DwdSource::MosmixS).await.unwrap(),
        Outcome::Processed
    );
    assert!(!dir.path().join("MOSMIX_S_2024030108_240.kmz").exists());
    assert!(dir.path().join("MOSMIX_S_2024030109_240_10637.kml.gz").exists());

    // the same archive is not downloaded twice
    assert_eq!(
        manager.process_dwd(&DwdSource::MosmixS).await.unwrap(),
        Outcome::Skipped
    );
    manager.close().await;

    let db = SqliteRepo::connect(&dir.path().join("pvforecast.db")).await.unwrap();
    let temps: Vec<f64> = sqlx::query_scalar("SELECT temp_air FROM dwd_s ORDER BY PeriodEnd")
        .fetch_all(db.pool())
        .await
        .unwrap();
    assert_eq!(temps, vec![280.15, 281.15, 282.15]);
}
