//! Minimal GeoJSON `FeatureCollection` decoding for the WFS reference feed.
//!
//! The feed's property names vary by layer (and language), so identifier
//! and display-name extraction tries a short list of conventional keys and
//! falls back to the feature id. Features without a usable point geometry
//! or identity are dropped.

use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
pub struct FeatureCollection {
    #[serde(default)]
    pub features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
pub struct Feature {
    #[serde(default)]
    pub id: Option<Value>,
    pub geometry: Option<Geometry>,
    #[serde(default)]
    pub properties: serde_json::Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct Geometry {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub coordinates: Value,
}

/// One decoded feature, ready to become a `NavPoint`.
#[derive(Debug, Clone)]
pub struct RawNavFeature {
    pub id: String,
    pub ident: Option<String>,
    pub name: String,
    pub kind: Option<String>,
    pub lat: f64,
    pub lng: f64,
}

const IDENT_KEYS: &[&str] = &["icao_code", "icao", "cod", "codigo", "localidade_id"];
const NAME_KEYS: &[&str] = &["name", "nome", "txt_name"];
const KIND_KEYS: &[&str] = &["tipo", "type", "kind"];

pub fn collect_points(collection: FeatureCollection) -> Vec<RawNavFeature> {
    collection.features.into_iter().filter_map(to_raw).collect()
}

fn to_raw(feature: Feature) -> Option<RawNavFeature> {
    let geometry = feature.geometry?;
    let (lng, lat) = match geometry.kind.as_str() {
        "Point" => lng_lat(&geometry.coordinates)?,
        "MultiPoint" => lng_lat(geometry.coordinates.get(0)?)?,
        _ => return None,
    };

    let props = &feature.properties;
    let ident = first_string(props, IDENT_KEYS);
    let name = first_string(props, NAME_KEYS);
    let kind = first_string(props, KIND_KEYS);

    let id = feature
        .id
        .as_ref()
        .and_then(value_string)
        .or_else(|| ident.clone())
        .or_else(|| name.clone())?;
    let name = name.or_else(|| ident.clone()).unwrap_or_else(|| id.clone());

    Some(RawNavFeature {
        id,
        ident,
        name,
        kind,
        lat,
        lng,
    })
}

/// GeoJSON positions are `[lng, lat]`.
fn lng_lat(value: &Value) -> Option<(f64, f64)> {
    let coords = value.as_array()?;
    let lng = coords.first()?.as_f64()?;
    let lat = coords.get(1)?.as_f64()?;
    Some((lng, lat))
}

fn first_string(props: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| props.get(*key).and_then(value_string))
        .filter(|s| !s.is_empty())
}

fn value_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(json: &str) -> Vec<RawNavFeature> {
        let collection: FeatureCollection = serde_json::from_str(json).unwrap();
        collect_points(collection)
    }

    #[test]
    fn test_point_feature() {
        let points = decode(
            r#"{"type":"FeatureCollection","features":[
                {"type":"Feature","id":"aerodromos.17",
                 "geometry":{"type":"Point","coordinates":[-46.473056,-23.435556]},
                 "properties":{"icao_code":"SBGR","name":"Guarulhos Intl","tipo":"AD"}}
            ]}"#,
        );
        assert_eq!(points.len(), 1);
        let p = &points[0];
        assert_eq!(p.id, "aerodromos.17");
        assert_eq!(p.ident.as_deref(), Some("SBGR"));
        assert_eq!(p.name, "Guarulhos Intl");
        assert_eq!(p.kind.as_deref(), Some("AD"));
        assert!((p.lat - -23.435556).abs() < 1e-9);
        assert!((p.lng - -46.473056).abs() < 1e-9);
    }

    #[test]
    fn test_multipoint_uses_first_position() {
        let points = decode(
            r#"{"type":"FeatureCollection","features":[
                {"type":"Feature","id":"vor.3",
                 "geometry":{"type":"MultiPoint","coordinates":[[-47.0,-22.0],[-48.0,-23.0]]},
                 "properties":{"codigo":"CGO","nome":"Campinas"}}
            ]}"#,
        );
        assert_eq!(points.len(), 1);
        assert!((points[0].lng - -47.0).abs() < 1e-9);
        assert_eq!(points[0].ident.as_deref(), Some("CGO"));
        assert_eq!(points[0].name, "Campinas");
    }

    #[test]
    fn test_non_point_geometry_is_dropped() {
        let points = decode(
            r#"{"type":"FeatureCollection","features":[
                {"type":"Feature","id":"tma.1",
                 "geometry":{"type":"Polygon","coordinates":[[[0,0],[1,0],[1,1],[0,0]]]},
                 "properties":{"name":"TMA-SP"}}
            ]}"#,
        );
        assert!(points.is_empty());
    }

    #[test]
    fn test_missing_geometry_is_dropped() {
        let points = decode(
            r#"{"type":"FeatureCollection","features":[
                {"type":"Feature","id":"x.1","geometry":null,"properties":{"name":"ghost"}}
            ]}"#,
        );
        assert!(points.is_empty());
    }

    #[test]
    fn test_ident_fallback_as_id_and_name() {
        let points = decode(
            r#"{"type":"FeatureCollection","features":[
                {"type":"Feature",
                 "geometry":{"type":"Point","coordinates":[-50.0,-10.0]},
                 "properties":{"icao":"SWXV"}}
            ]}"#,
        );
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].id, "SWXV");
        assert_eq!(points[0].name, "SWXV");
    }

    #[test]
    fn test_empty_collection() {
        assert!(decode(r#"{"type":"FeatureCollection","features":[]}"#).is_empty());
    }
}
