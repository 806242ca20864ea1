//! DWD MOSMIX point forecasts (https://opendata.dwd.de/weather/local_forecasts/mos/)
//!
//! MOSMIX_L is published per station every six hours as a small `.kmz`;
//! MOSMIX_S is published hourly for all stations in one large archive, from
//! which the header and the configured station's placemark are extracted.

use chrono::{DateTime, Utc};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use reqwest::Client;
use std::io::{BufRead, BufReader, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::get;
use crate::config::DwdConfig;
use crate::domain::forecast::{parse_timestamp, Forecast, ForecastSource};
use crate::domain::table::ForecastTable;
use crate::domain::weather::{CLOUDS, GHI, KJ_TO_WH, KT, PRESSURE, TEMP_AIR, TEMP_DEW, WIND_SPEED};
use crate::error::{ForecastError, ForecastResult};

/// MOSMIX elements kept unless `drop_weather = false`
const KEEP_ELEMENTS: [&str; 7] = ["TTT", "Td", "PPPP", "FF", "Neff", "Rad1h", "RRad1"];

/// What `process_dwd` works on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DwdSource {
    MosmixL,
    MosmixS,
    File(PathBuf),
}

/// A KML document and the name it is known by
#[derive(Debug, Clone)]
pub struct KmlDocument {
    pub name: String,
    pub content: Vec<u8>,
}

impl KmlDocument {
    /// `<name>.csv.gz` for a `<name>.kml` document
    pub fn csv_name(&self) -> String {
        match self.name.strip_suffix(".kml") {
            Some(stem) => format!("{stem}.csv.gz"),
            None => format!("{}.csv.gz", self.name),
        }
    }
}

/// Raw MOSMIX elements keyed by time step
#[derive(Debug, Clone)]
pub struct MosmixData {
    pub issue_time: DateTime<Utc>,
    pub table: ForecastTable,
}

#[derive(Clone, Copy, PartialEq)]
enum Field {
    Other,
    IssueTime,
    TimeStep,
    Value,
}

/// Parse `IssueTime`, the forecast time steps and every `Forecast` element of a MOSMIX KML
pub fn parse_kml(xml: &[u8]) -> ForecastResult<MosmixData> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut field = Field::Other;
    let mut issue_time = None;
    let mut steps = Vec::new();
    let mut element: Option<String> = None;
    let mut elements: Vec<(String, Vec<f64>)> = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"IssueTime" => field = Field::IssueTime,
                b"TimeStep" => field = Field::TimeStep,
                b"value" => field = Field::Value,
                b"Forecast" => {
                    element = None;
                    for attr in e.attributes() {
                        let attr = attr.map_err(quick_xml::Error::from)?;
                        if attr.key.local_name().as_ref() == b"elementName" {
                            element = Some(attr.unescape_value()?.into_owned());
                        }
                    }
                }
                _ => field = Field::Other,
            },
            Event::Text(t) if field != Field::Other => {
                let text = t.unescape()?;
                match field {
                    Field::IssueTime => {
                        issue_time = Some(parse_timestamp(&text).ok_or_else(|| {
                            ForecastError::parse(format!("invalid IssueTime '{text}'"))
                        })?);
                    }
                    Field::TimeStep => steps.push(parse_timestamp(&text).ok_or_else(|| {
                        ForecastError::parse(format!("invalid TimeStep '{text}'"))
                    })?),
                    Field::Value => {
                        let name = element.take().ok_or_else(|| {
                            ForecastError::parse("value without Forecast elementName")
                        })?;
                        elements.push((name, parse_values(&text)?));
                    }
                    Field::Other => {}
                }
            }
            Event::End(_) => field = Field::Other,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    let issue_time = issue_time.ok_or_else(|| ForecastError::parse("KML has no IssueTime"))?;
    if steps.is_empty() {
        return Err(ForecastError::parse("KML has no ForecastTimeSteps"));
    }
    if steps.windows(2).any(|w| w[0] >= w[1]) {
        return Err(ForecastError::parse("KML time steps are not increasing"));
    }
    let mut table = ForecastTable::new(steps);
    for (name, values) in elements {
        if values.len() != table.len() {
            return Err(ForecastError::parse(format!(
                "length mismatch for element '{name}': {} values, {} time steps",
                values.len(),
                table.len()
            )));
        }
        table.insert(&name, values)?;
    }
    Ok(MosmixData { issue_time, table })
}

/// Whitespace separated numbers; `-` marks a missing value
fn parse_values(text: &str) -> ForecastResult<Vec<f64>> {
    text.split_whitespace()
        .map(|v| {
            if v == "-" {
                Ok(f64::NAN)
            } else {
                v.parse::<f64>()
                    .map_err(|_| ForecastError::parse(format!("invalid value '{v}'")))
            }
        })
        .collect()
}

/// Strip MOSMIX elements down to the standard weather columns
pub fn convert(mut table: ForecastTable, drop_weather: bool) -> ForecastTable {
    if drop_weather {
        table.retain(|c| KEEP_ELEMENTS.contains(&c));
    }
    for (from, to) in [
        ("TTT", TEMP_AIR),
        ("Td", TEMP_DEW),
        ("PPPP", PRESSURE),
        ("FF", WIND_SPEED),
        ("Neff", CLOUDS),
    ] {
        table.rename(from, to);
    }
    if table.has("Rad1h") {
        table.rename("Rad1h", GHI);
        table.scale(GHI, KJ_TO_WH);
    }
    if table.has("RRad1") {
        table.rename("RRad1", KT);
        table.scale(KT, 0.01);
    }
    table
}

/// Parse and convert a KML document into a forecast
pub fn to_forecast(
    doc: &KmlDocument,
    source: ForecastSource,
    drop_weather: bool,
) -> ForecastResult<Forecast> {
    let data = parse_kml(&doc.content)?;
    let mut forecast = Forecast::new(source, data.issue_time, convert(data.table, drop_weather));
    forecast.csv_name = Some(doc.csv_name());
    Ok(forecast)
}

/// Read a MOSMIX file from disk.
///
/// `.zip`/`.kmz` must hold exactly one KML, `.kml.gz`/`.xml.gz` are gzipped,
/// `.kml`/`.xml` are plain.
pub fn read_kml_file(path: &Path) -> ForecastResult<KmlDocument> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ForecastError::config(format!("invalid file name '{}'", path.display())))?;
    let lower = file_name.to_lowercase();

    let content = if lower.ends_with(".zip") || lower.ends_with(".kmz") {
        single_entry(std::fs::read(path)?, &path.display().to_string())?.1
    } else if lower.ends_with(".kml.gz") || lower.ends_with(".xml.gz") {
        let mut out = Vec::new();
        GzDecoder::new(std::fs::File::open(path)?).read_to_end(&mut out)?;
        out
    } else if lower.ends_with(".kml") || lower.ends_with(".xml") {
        std::fs::read(path)?
    } else {
        return Err(ForecastError::parse(format!(
            "unknown file type for weather file '{}'",
            path.display()
        )));
    };

    let suffix = Regex::new(r"(?i)\.(zip|kmz|kml\.gz|xml\.gz|xml)$")
        .map_err(|e| ForecastError::parse(e.to_string()))?;
    Ok(KmlDocument {
        name: suffix.replace(file_name, ".kml").into_owned(),
        content,
    })
}

/// Name and content of the only entry of a zip archive
fn single_entry(bytes: Vec<u8>, origin: &str) -> ForecastResult<(String, Vec<u8>)> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    if archive.len() != 1 {
        return Err(ForecastError::Archive(format!(
            "{} files found inside '{origin}', should be 1",
            archive.len()
        )));
    }
    let mut entry = archive.by_index(0)?;
    let name = entry.name().to_string();
    let mut content = Vec::new();
    entry.read_to_end(&mut content)?;
    Ok((name, content))
}

/// Last-but-one `.kmz` link of a directory listing (the last one is `_LATEST`)
pub fn latest_kmz_link(listing: &str, base_url: &str) -> ForecastResult<String> {
    let href = Regex::new(r#"href="([^"]+\.kmz)""#).map_err(|e| ForecastError::parse(e.to_string()))?;
    let links: Vec<&str> = href
        .captures_iter(listing)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();
    if links.len() < 2 {
        return Err(ForecastError::parse(format!(
            "expected at least two .kmz links at '{base_url}', found {}",
            links.len()
        )));
    }
    let link = links[links.len() - 2];
    if link.starts_with("http://") || link.starts_with("https://") {
        Ok(link.to_string())
    } else {
        Ok(format!("{}/{}", base_url.trim_end_matches('/'), link))
    }
}

#[derive(PartialEq)]
enum Extract {
    Header,
    Seek,
    Placemark,
    Done,
}

/// Cut a single-station KML out of the all-stations MOSMIX_S document
pub fn extract_station<R: BufRead>(reader: R, station: &str) -> ForecastResult<String> {
    let marker = format!("<kml:name>{station}</kml:name>");
    let mut kml = String::new();
    let mut state = Extract::Header;

    // DWD publishes ISO-8859-1; only ASCII markers are matched
    for line in reader.split(b'\n') {
        let line = line?;
        let line = String::from_utf8_lossy(&line);
        let line = line.trim_end_matches('\r');
        match state {
            Extract::Header => {
                kml.push_str(line);
                kml.push('\n');
                if line.contains("</kml:ExtendedData>") {
                    state = Extract::Seek;
                }
            }
            Extract::Seek => {
                if line.contains(&marker) {
                    kml.push_str("        <kml:Placemark>\n");
                    kml.push_str(line);
                    kml.push('\n');
                    state = Extract::Placemark;
                }
            }
            Extract::Placemark => {
                kml.push_str(line);
                kml.push('\n');
                if line.contains("</kml:Placemark>") {
                    state = Extract::Done;
                    break;
                }
            }
            Extract::Done => break,
        }
    }

    if state != Extract::Done {
        return Err(ForecastError::parse(format!("station {station} not found")));
    }
    kml.push_str("   </kml:Document>\n</kml:kml>\n");
    Ok(kml)
}

fn gzip(content: &[u8]) -> ForecastResult<Vec<u8>> {
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(content)?;
    Ok(enc.finish()?)
}

/// Downloads MOSMIX forecasts from DWD open data
pub struct DwdClient {
    client: Client,
    cfg: DwdConfig,
}

impl DwdClient {
    pub fn new(client: Client, cfg: DwdConfig) -> Self {
        Self { client, cfg }
    }

    /// Latest MOSMIX_L forecast of the configured station
    pub async fn fetch_mosmix_l(&self) -> ForecastResult<KmlDocument> {
        let station = &self.cfg.station;
        let url = format!(
            "{}{station}/kml/MOSMIX_L_LATEST_{station}.kmz",
            self.cfg.url_l
        );
        debug!(url = %url, "Fetching MOSMIX_L");

        let bytes = get(&self.client, &url, None).await?.bytes().await.map_err(|e| {
            ForecastError::Request {
                url: url.clone(),
                source: e,
            }
        })?;
        let (name, content) = single_entry(bytes.to_vec(), &url)?;

        if self.cfg.store_kmz {
            let path = self.cfg.store_path.join(format!("{name}.gz"));
            tokio::fs::write(&path, gzip(&content)?).await?;
            debug!(path = %path.display(), "Stored MOSMIX_L KML");
        }
        Ok(KmlDocument { name, content })
    }

    /// Station extract of the newest complete MOSMIX_S forecast.
    ///
    /// Returns `None` when that forecast was already downloaded.
    pub async fn fetch_mosmix_s(&self) -> ForecastResult<Option<KmlDocument>> {
        let base = &self.cfg.url_s;
        let listing = get(&self.client, base, None)
            .await?
            .text()
            .await
            .map_err(|e| ForecastError::Request {
                url: base.clone(),
                source: e,
            })?;
        let remote = latest_kmz_link(&listing, base)?;
        let file_name = remote.rsplit('/').next().unwrap_or(&remote).to_string();
        let local = self.cfg.store_path.join(&file_name);

        if tokio::fs::try_exists(&local).await? {
            info!(file = %local.display(), "MOSMIX_S file already exists, not re-downloaded");
            return Ok(None);
        }
        if !self.cfg.keep_kmz_s {
            self.remove_old_archives().await?;
        }

        info!(url = %remote, "Downloading MOSMIX_S");
        let bytes = get(&self.client, &remote, None)
            .await?
            .bytes()
            .await
            .map_err(|e| ForecastError::Request {
                url: remote.clone(),
                source: e,
            })?;
        tokio::fs::write(&local, &bytes).await?;

        let kml_name = file_name.replace(".kmz", ".kml");
        let station = self.cfg.station.clone();
        let entry = kml_name.clone();
        let kml = tokio::task::spawn_blocking(move || -> ForecastResult<String> {
            let mut archive = zip::ZipArchive::new(std::fs::File::open(&local)?)?;
            let reader = BufReader::new(archive.by_name(&entry)?);
            extract_station(reader, &station)
        })
        .await
        .map_err(|e| ForecastError::Archive(format!("MOSMIX_S extraction aborted: {e}")))??;

        let name = kml_name.replace(".kml", &format!("_{}.kml", self.cfg.station));
        if self.cfg.store_kmz {
            let path = self.cfg.store_path.join(format!("{name}.gz"));
            if !tokio::fs::try_exists(&path).await? {
                tokio::fs::write(&path, gzip(kml.as_bytes())?).await?;
            }
        }
        Ok(Some(KmlDocument {
            name,
            content: kml.into_bytes(),
        }))
    }

    async fn remove_old_archives(&self) -> ForecastResult<()> {
        let mut dir = tokio::fs::read_dir(&self.cfg.store_path).await?;
        while let Some(entry) = dir.next_entry().await? {
            let is_mosmix_s = entry
                .file_name()
                .to_str()
                .is_some_and(|n| n.starts_with("MOSMIX_S_"));
            if is_mosmix_s && entry.file_type().await?.is_file() {
                debug!(file = %entry.path().display(), "Removing old MOSMIX_S file");
                tokio::fs::remove_file(entry.path()).await?;
            }
        }
        Ok(())
    }
}
