//! Static GTFS catalog: downloads the schedule ZIP, indexes routes/trips/stops/shapes.
//!
//! Loaded once at startup and shared immutably (`Arc<StaticCatalog>`) — no
//! further mutation, no locking needed by readers.

pub mod error;

use std::collections::{HashMap, HashSet};
use std::io::Read as _;

use csv::ReaderBuilder;
use serde_json::{json, Value};
use tracing::{info, warn};
use zip::ZipArchive;

use error::CatalogError;

/// Compile-time depot table used by the intervention engine's DEPLOY generator.
#[derive(Debug, Clone, Copy)]
pub struct Depot {
    pub name: &'static str,
    pub latitude: f64,
    pub longitude: f64,
    pub capacity: u32,
}

pub const DEPOTS: &[Depot] = &[
    Depot { name: "Broadstone", latitude: 53.3555, longitude: -6.2729, capacity: 180 },
    Depot { name: "Summerhill", latitude: 53.3515, longitude: -6.2520, capacity: 80 },
    Depot { name: "Ringsend", latitude: 53.3385, longitude: -6.2272, capacity: 140 },
    Depot { name: "Donnybrook", latitude: 53.3217, longitude: -6.2385, capacity: 100 },
    Depot { name: "Conyngham Road", latitude: 53.3475, longitude: -6.3060, capacity: 120 },
    Depot { name: "Phibsborough", latitude: 53.3603, longitude: -6.2726, capacity: 70 },
    Depot { name: "Harristown", latitude: 53.4048, longitude: -6.2788, capacity: 200 },
];

/// Fallback "city centre" coordinate used when no representative stop exists.
pub const DEFAULT_CENTRE: (f64, f64) = (53.3498, -6.2603);

/// A GTFS static ZIP this large is not a real schedule bundle; refuse it
/// rather than buffer an unbounded download in memory.
const MAX_DOWNLOAD_SIZE: u64 = 200 * 1024 * 1024;
/// Cap on any single decompressed ZIP member, guarding against a zip-bomb
/// member that expands far past its compressed size.
const MAX_DECOMPRESSED_SIZE: u64 = 500 * 1024 * 1024;

#[derive(Debug, Default)]
pub struct StaticCatalog {
    /// route_id -> route_short_name
    pub route_map: HashMap<String, String>,
    /// trip_id -> route_id
    pub trip_route_map: HashMap<String, String>,
    /// trip_id -> shape_id
    trip_shape_map: HashMap<String, String>,
    /// stop_id -> (name, lat, lon)
    pub stop_map: HashMap<String, (String, f64, f64)>,
    /// shape_id -> ordered (lat, lon) polyline
    shape_map: HashMap<String, Vec<(f64, f64)>>,
    /// route_id -> set<shape_id>
    route_shapes: HashMap<String, HashSet<String>>,
    /// route_id -> set<stop_id>
    pub route_stops: HashMap<String, HashSet<String>>,
    /// scratch accumulator for shapes.txt rows, sorted and drained by `finalize_shapes`
    pending_shape_points: HashMap<String, Vec<(i64, f64, f64)>>,
}

impl StaticCatalog {
    /// Download one or more GTFS static ZIP feeds and merge their contents.
    pub async fn load(client: &reqwest::Client, urls: &[String]) -> Self {
        let mut catalog = StaticCatalog::default();

        for url in urls {
            info!(url, "catalog.downloading");
            match Self::fetch_and_parse(client, url).await {
                Ok(bytes) => {
                    let parse_result =
                        tokio::task::spawn_blocking(move || Self::parse_zip_bytes(&bytes)).await;
                    match parse_result {
                        Ok(Ok(loaded)) => catalog.merge(loaded),
                        Ok(Err(e)) => warn!(url, error = %e, "catalog.parse_failed"),
                        Err(e) => warn!(url, error = %e, "catalog.parse_join_failed"),
                    }
                }
                Err(e) => warn!(url, error = %e, "catalog.download_failed"),
            }
        }

        catalog.build_route_shapes();
        info!(
            routes = catalog.route_map.len(),
            trips = catalog.trip_route_map.len(),
            stops = catalog.stop_map.len(),
            shapes = catalog.shape_map.len(),
            "catalog.complete"
        );
        catalog
    }

    async fn fetch_and_parse(client: &reqwest::Client, url: &str) -> Result<Vec<u8>, CatalogError> {
        let resp = client
            .get(url)
            .timeout(std::time::Duration::from_secs(60))
            .send()
            .await?
            .error_for_status()?;

        if let Some(len) = resp.content_length() {
            if len > MAX_DOWNLOAD_SIZE {
                return Err(CatalogError::TooLarge);
            }
        }

        let bytes = resp.bytes().await?;
        if bytes.len() as u64 > MAX_DOWNLOAD_SIZE {
            return Err(CatalogError::TooLarge);
        }
        Ok(bytes.to_vec())
    }

    fn parse_zip_bytes(bytes: &[u8]) -> Result<StaticCatalog, CatalogError> {
        let mut catalog = StaticCatalog::default();
        let cursor = std::io::Cursor::new(bytes);
        let mut archive = ZipArchive::new(cursor)?;

        catalog.parse_member(&mut archive, "routes.txt", Self::parse_routes_row);
        catalog.parse_member(&mut archive, "trips.txt", Self::parse_trips_row);
        catalog.parse_member(&mut archive, "stops.txt", Self::parse_stops_row);
        catalog.parse_member(&mut archive, "stop_times.txt", Self::parse_stop_times_row);
        catalog.parse_member(&mut archive, "shapes.txt", Self::parse_shapes_row);
        catalog.finalize_shapes();

        Ok(catalog)
    }

    fn parse_member<R: std::io::Read + std::io::Seek>(
        &mut self,
        archive: &mut ZipArchive<R>,
        name: &str,
        mut handle_row: impl FnMut(&mut Self, &csv::StringRecord, &csv::StringRecord),
    ) {
        let file = match archive.by_name(name) {
            Ok(f) => f,
            Err(_) => {
                warn!(member = name, "catalog.member_missing");
                return;
            }
        };
        if file.size() > MAX_DECOMPRESSED_SIZE {
            warn!(member = name, declared_size = file.size(), "catalog.member_too_large");
            return;
        }
        let mut buf = String::new();
        let mut limited = file.take(MAX_DECOMPRESSED_SIZE + 1);
        if limited.read_to_string(&mut buf).is_err() {
            warn!(member = name, "catalog.member_unreadable");
            return;
        }
        if buf.len() as u64 > MAX_DECOMPRESSED_SIZE {
            warn!(member = name, "catalog.member_decompression_bomb_suspected");
            return;
        }
        let buf = buf.strip_prefix('\u{feff}').unwrap_or(&buf);
        let mut reader = ReaderBuilder::new().has_headers(true).from_reader(buf.as_bytes());
        let headers = match reader.headers() {
            Ok(h) => h.clone(),
            Err(_) => return,
        };
        for record in reader.records().flatten() {
            handle_row(self, &headers, &record);
        }
    }

    fn field<'a>(headers: &csv::StringRecord, record: &'a csv::StringRecord, name: &str) -> &'a str {
        headers
            .iter()
            .position(|h| h == name)
            .and_then(|i| record.get(i))
            .unwrap_or("")
            .trim()
    }

    fn parse_routes_row(&mut self, headers: &csv::StringRecord, record: &csv::StringRecord) {
        let rid = Self::field(headers, record, "route_id");
        let short = Self::field(headers, record, "route_short_name");
        if !rid.is_empty() && !short.is_empty() {
            self.route_map.insert(rid.to_string(), short.to_string());
        }
    }

    fn parse_trips_row(&mut self, headers: &csv::StringRecord, record: &csv::StringRecord) {
        let tid = Self::field(headers, record, "trip_id");
        let rid = Self::field(headers, record, "route_id");
        let shape_id = Self::field(headers, record, "shape_id");
        if !tid.is_empty() && !rid.is_empty() {
            self.trip_route_map.insert(tid.to_string(), rid.to_string());
        }
        if !tid.is_empty() && !shape_id.is_empty() {
            self.trip_shape_map.insert(tid.to_string(), shape_id.to_string());
        }
    }

    fn parse_stops_row(&mut self, headers: &csv::StringRecord, record: &csv::StringRecord) {
        let sid = Self::field(headers, record, "stop_id");
        let name = Self::field(headers, record, "stop_name");
        let lat: f64 = Self::field(headers, record, "stop_lat").parse().unwrap_or(0.0);
        let lon: f64 = Self::field(headers, record, "stop_lon").parse().unwrap_or(0.0);
        if !sid.is_empty() {
            self.stop_map.insert(sid.to_string(), (name.to_string(), lat, lon));
        }
    }

    fn parse_stop_times_row(&mut self, headers: &csv::StringRecord, record: &csv::StringRecord) {
        let tid = Self::field(headers, record, "trip_id");
        let sid = Self::field(headers, record, "stop_id");
        if tid.is_empty() || sid.is_empty() {
            return;
        }
        if let Some(rid) = self.trip_route_map.get(tid).cloned() {
            self.route_stops.entry(rid).or_default().insert(sid.to_string());
        }
    }

    fn parse_shapes_row(&mut self, headers: &csv::StringRecord, record: &csv::StringRecord) {
        let shape_id = Self::field(headers, record, "shape_id");
        if shape_id.is_empty() {
            return;
        }
        let lat: f64 = Self::field(headers, record, "shape_pt_lat").parse().unwrap_or(0.0);
        let lon: f64 = Self::field(headers, record, "shape_pt_lon").parse().unwrap_or(0.0);
        let seq: i64 = Self::field(headers, record, "shape_pt_sequence").parse().unwrap_or(0);
        self.pending_shape_points
            .entry(shape_id.to_string())
            .or_default()
            .push((seq, lat, lon));
    }

    fn finalize_shapes(&mut self) {
        for (shape_id, mut points) in std::mem::take(&mut self.pending_shape_points) {
            points.sort_by_key(|(seq, _, _)| *seq);
            self.shape_map
                .insert(shape_id, points.into_iter().map(|(_, lat, lon)| (lat, lon)).collect());
        }
    }

    fn build_route_shapes(&mut self) {
        for (trip_id, route_id) in &self.trip_route_map {
            if let Some(shape_id) = self.trip_shape_map.get(trip_id) {
                self.route_shapes
                    .entry(route_id.clone())
                    .or_default()
                    .insert(shape_id.clone());
            }
        }
    }

    fn merge(&mut self, other: StaticCatalog) {
        self.route_map.extend(other.route_map);
        self.trip_route_map.extend(other.trip_route_map);
        self.trip_shape_map.extend(other.trip_shape_map);
        self.stop_map.extend(other.stop_map);
        self.shape_map.extend(other.shape_map);
        for (rid, stops) in other.route_stops {
            self.route_stops.entry(rid).or_default().extend(stops);
        }
    }

    /// Resolve a route id to its human-readable short name, falling back to the raw id.
    pub fn get_route_name(&self, route_id: &str) -> String {
        self.route_map
            .get(route_id)
            .cloned()
            .unwrap_or_else(|| route_id.to_string())
    }

    /// Resolve a trip id to a route's short name via its route_id.
    pub fn get_route_name_by_trip(&self, trip_id: &str) -> Option<String> {
        self.trip_route_map
            .get(trip_id)
            .map(|route_id| self.get_route_name(route_id))
    }

    /// GeoJSON FeatureCollection of one representative shape per route, or all shapes for one route.
    pub fn shapes_geojson(&self, route_id: Option<&str>) -> Value {
        let mut features = Vec::new();

        if let Some(route_id) = route_id {
            if let Some(shape_ids) = self.route_shapes.get(route_id) {
                for shape_id in shape_ids {
                    if let Some(feature) = self.shape_feature(route_id, shape_id) {
                        features.push(feature);
                    }
                }
            }
        } else {
            for (rid, shape_ids) in &self.route_shapes {
                if let Some(best) = shape_ids
                    .iter()
                    .max_by_key(|s| self.shape_map.get(*s).map_or(0, |p| p.len()))
                {
                    if let Some(feature) = self.shape_feature(rid, best) {
                        features.push(feature);
                    }
                }
            }
        }

        json!({ "type": "FeatureCollection", "features": features })
    }

    fn shape_feature(&self, route_id: &str, shape_id: &str) -> Option<Value> {
        let coords = self.shape_map.get(shape_id)?;
        if coords.len() < 2 {
            return None;
        }
        let coordinates: Vec<[f64; 2]> = coords.iter().map(|(lat, lon)| [*lon, *lat]).collect();
        Some(json!({
            "type": "Feature",
            "geometry": { "type": "LineString", "coordinates": coordinates },
            "properties": {
                "route_id": route_id,
                "route_short_name": self.get_route_name(route_id),
                "shape_id": shape_id,
            }
        }))
    }

    /// GeoJSON FeatureCollection of every stop with non-zero coordinates.
    pub fn stops_geojson(&self) -> Value {
        let features: Vec<Value> = self
            .stop_map
            .iter()
            .filter(|(_, (_, lat, lon))| *lat != 0.0 || *lon != 0.0)
            .map(|(stop_id, (name, lat, lon))| {
                json!({
                    "type": "Feature",
                    "geometry": { "type": "Point", "coordinates": [lon, lat] },
                    "properties": { "stop_id": stop_id, "stop_name": name }
                })
            })
            .collect();
        json!({ "type": "FeatureCollection", "features": features })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_zip_bytes() -> Vec<u8> {
        use std::io::Write;
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            let opts: zip::write::FileOptions<()> = zip::write::FileOptions::default();
            zip.start_file("routes.txt", opts).unwrap();
            zip.write_all(b"route_id,route_short_name\nR1,39A\nR2,140\n").unwrap();
            zip.start_file("trips.txt", opts).unwrap();
            zip.write_all(b"trip_id,route_id,shape_id\nT1,R1,S1\n").unwrap();
            zip.start_file("stops.txt", opts).unwrap();
            zip.write_all(b"stop_id,stop_name,stop_lat,stop_lon\nST1,O'Connell St,53.35,-6.26\n")
                .unwrap();
            zip.start_file("stop_times.txt", opts).unwrap();
            zip.write_all(b"trip_id,stop_id\nT1,ST1\n").unwrap();
            zip.start_file("shapes.txt", opts).unwrap();
            zip.write_all(
                b"shape_id,shape_pt_lat,shape_pt_lon,shape_pt_sequence\nS1,53.35,-6.26,1\nS1,53.36,-6.27,2\n",
            )
            .unwrap();
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn parses_all_members_and_builds_indexes() {
        let bytes = sample_zip_bytes();
        let catalog = StaticCatalog::parse_zip_bytes(&bytes).unwrap();
        assert_eq!(catalog.get_route_name("R1"), "39A");
        assert_eq!(catalog.get_route_name("unknown"), "unknown");
        assert_eq!(catalog.get_route_name_by_trip("T1").as_deref(), Some("39A"));
        assert!(catalog.route_stops.get("R1").unwrap().contains("ST1"));
    }

    #[test]
    fn missing_member_leaves_empty_index_not_error() {
        use std::io::Write;
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            let opts: zip::write::FileOptions<()> = zip::write::FileOptions::default();
            zip.start_file("routes.txt", opts).unwrap();
            zip.write_all(b"route_id,route_short_name\nR1,39A\n").unwrap();
            zip.finish().unwrap();
        }
        let catalog = StaticCatalog::parse_zip_bytes(&buf).unwrap();
        assert_eq!(catalog.route_map.len(), 1);
        assert!(catalog.stop_map.is_empty());
    }

    #[test]
    fn shapes_geojson_picks_most_complete_shape_per_route() {
        let bytes = sample_zip_bytes();
        let mut catalog = StaticCatalog::parse_zip_bytes(&bytes).unwrap();
        catalog.build_route_shapes();
        let geojson = catalog.shapes_geojson(None);
        let features = geojson["features"].as_array().unwrap();
        assert_eq!(features.len(), 1);
        assert_eq!(features[0]["properties"]["route_short_name"], "39A");
    }
}
