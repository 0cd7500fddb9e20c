use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

const EARTH_RADIUS_KM: f64 = 6367.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketDescriptor {
    pub id: String,
    pub name: String,
    pub lat: f64,
    pub lon: f64,
}

impl MarketDescriptor {
    fn new(id: &str, name: &str, lat: f64, lon: f64) -> Self {
        MarketDescriptor {
            id: id.to_string(),
            name: name.to_string(),
            lat,
            lon,
        }
    }
}

#[derive(Deserialize)]
struct MarketsFile {
    markets: Vec<MarketDescriptor>,
}

pub fn default_markets() -> Vec<MarketDescriptor> {
    vec![
        MarketDescriptor::new("gazipasa_market", "Gazipaşa", 36.164, 32.314),
        MarketDescriptor::new("kumluca_market", "Kumluca", 36.276, 30.426),
        MarketDescriptor::new("izmir_market", "İzmir", 38.4237, 27.1428),
    ]
}

/// Markets from `{"markets": [...]}` at `path`, or the built-in set when the
/// file is absent or unreadable.
pub fn load_markets(path: &Path) -> Vec<MarketDescriptor> {
    if !path.exists() {
        return default_markets();
    }
    let parsed = std::fs::read_to_string(path)
        .map_err(anyhow::Error::from)
        .and_then(|text| Ok(serde_json::from_str::<MarketsFile>(&text)?));
    match parsed {
        Ok(file) => file.markets,
        Err(e) => {
            warn!("Ignoring markets file {}: {:#}", path.display(), e);
            default_markets()
        }
    }
}

/// Great-circle distance in km.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (lat1, lon1, lat2, lon2) = (
        lat1.to_radians(),
        lon1.to_radians(),
        lat2.to_radians(),
        lon2.to_radians(),
    );
    let a = ((lat2 - lat1) / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * ((lon2 - lon1) / 2.0).sin().powi(2);
    2.0 * a.sqrt().asin() * EARTH_RADIUS_KM
}

/// Markets within `radius_km` of the point, nearest first. When none is in
/// range the single nearest market is returned instead.
pub fn nearby(markets: &[MarketDescriptor], lat: f64, lon: f64, radius_km: f64) -> Vec<MarketDescriptor> {
    let mut by_distance: Vec<(f64, &MarketDescriptor)> = markets
        .iter()
        .map(|m| (haversine_km(lat, lon, m.lat, m.lon), m))
        .collect();
    by_distance.sort_by(|a, b| a.0.total_cmp(&b.0));

    let within: Vec<MarketDescriptor> = by_distance
        .iter()
        .filter(|(d, _)| *d <= radius_km)
        .map(|(_, m)| (*m).clone())
        .collect();
    if within.is_empty() {
        by_distance.first().map(|(_, m)| (*m).clone()).into_iter().collect()
    } else {
        within
    }
}
