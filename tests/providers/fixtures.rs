use pv_forecast::config::Config;
use std::io::{Cursor, Write};
use std::path::Path;

const HEADER: &str = r#"<?xml version="1.0" encoding="ISO-8859-1" standalone="no"?>
<kml:kml xmlns:dwd="https://opendata.dwd.de/weather/lib/pointforecast_dwd_extension_V1_0.xsd" xmlns:kml="http://www.opengis.net/kml/2.2">
    <kml:Document>
        <kml:ExtendedData>
            <dwd:ProductDefinition>
                <dwd:IssueTime>2024-03-01T09:00:00.000Z</dwd:IssueTime>
                <dwd:ForecastTimeSteps>
                    <dwd:TimeStep>2024-03-01T10:00:00.000Z</dwd:TimeStep>
                    <dwd:TimeStep>2024-03-01T11:00:00.000Z</dwd:TimeStep>
                    <dwd:TimeStep>2024-03-01T12:00:00.000Z</dwd:TimeStep>
                </dwd:ForecastTimeSteps>
            </dwd:ProductDefinition>
        </kml:ExtendedData>
"#;

pub const PLACEMARK_10500: &str = r#"        <kml:Placemark>
            <kml:name>10500</kml:name>
            <kml:ExtendedData>
                <dwd:Forecast dwd:elementName="TTT">
                    <dwd:value>     270.15     271.15     272.15</dwd:value>
                </dwd:Forecast>
            </kml:ExtendedData>
        </kml:Placemark>
"#;

pub const PLACEMARK_10637: &str = r#"        <kml:Placemark>
            <kml:name>10637</kml:name>
            <kml:description>FRANKFURT/M</kml:description>
            <kml:ExtendedData>
                <dwd:Forecast dwd:elementName="TTT">
                    <dwd:value>     280.15     281.15     282.15</dwd:value>
                </dwd:Forecast>
                <dwd:Forecast dwd:elementName="FF">
                    <dwd:value>        2.0        3.0        4.0</dwd:value>
                </dwd:Forecast>
                <dwd:Forecast dwd:elementName="Rad1h">
                    <dwd:value>      360.0     1800.0     2400.0</dwd:value>
                </dwd:Forecast>
                <dwd:Forecast dwd:elementName="Neff">
                    <dwd:value>       80.0       50.0          -</dwd:value>
                </dwd:Forecast>
            </kml:ExtendedData>
        </kml:Placemark>
"#;

const FOOTER: &str = "    </kml:Document>\n</kml:kml>\n";

/// MOSMIX KML issued 2024-03-01 09:00 UTC with the given placemarks
pub fn mosmix_kml(placemarks: &[&str]) -> String {
    let mut kml = HEADER.to_string();
    for p in placemarks {
        kml.push_str(p);
    }
    kml.push_str(FOOTER);
    kml
}

/// Zip archive holding a single entry
pub fn kmz(entry: &str, content: &str) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    writer
        .start_file(entry, zip::write::SimpleFileOptions::default())
        .unwrap();
    writer.write_all(content.as_bytes()).unwrap();
    writer.finish().unwrap().into_inner()
}

/// Frankfurt installation, database in `dir`, plus `extra` sections
pub fn config(dir: &Path, extra: &str) -> Config {
    let toml = format!(
        r#"
        [pv_system]
        latitude = 50.11
        longitude = 8.68
        altitude = 100
        tilt = 30
        azimuth = 180
        system_power = 5000
        inverter_power = 4500

        [db]
        store_path = "{dir}"

        {extra}
        "#,
        dir = dir.display()
    );
    Config::from_toml_str(&toml).unwrap()
}
