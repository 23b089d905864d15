//! Tile providers and application settings.

use serde_json::Value as JsonValue;

use crate::TileId;
use crate::projection::GeoPos;

/// Configuration for a tile provider.
pub trait TileProviderConfig {
    /// Returns the URL for a given tile.
    fn tile_url(&self, tile: &TileId) -> String;

    /// Short name shown in the base-layer selector.
    fn name(&self) -> &str;

    /// Returns the attribution text to be displayed on the map. If returns `None`, no attribution is shown.
    fn attribution(&self) -> Option<&str>;

    /// Returns the attribution URL to be linked from the attribution text.
    fn attribution_url(&self) -> Option<&str>;

    /// The deepest zoom level the provider serves.
    fn max_zoom(&self) -> u8;

    /// The default geographical center of the map.
    fn default_center(&self) -> GeoPos;

    /// The default zoom level of the map.
    fn default_zoom(&self) -> u8;
}

/// Esri World Imagery tiles (the default base layer).
///
/// # Example
///
/// ```
/// use refuge_map::config::SatelliteConfig;
/// let config = SatelliteConfig::default();
/// ```
pub struct SatelliteConfig {
    base_url: String,
    attribution: String,
    attribution_url: String,
    default_center: GeoPos,
    default_zoom: u8,
}

impl Default for SatelliteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://server.arcgisonline.com/ArcGIS/rest/services/World_Imagery/MapServer/tile".to_string(),
            attribution: "Tiles © Esri".to_string(),
            attribution_url: "https://www.esri.com".to_string(),
            default_center: GeoPos::new(24.93545, 60.16952),
            default_zoom: 5,
        }
    }
}

impl TileProviderConfig for SatelliteConfig {
    fn tile_url(&self, tile: &TileId) -> String {
        // Esri's scheme is z/y/x with no extension.
        format!("{}/{}/{}/{}", self.base_url, tile.z, tile.y, tile.x)
    }

    fn name(&self) -> &str {
        "Satellite"
    }

    fn attribution(&self) -> Option<&str> {
        Some(&self.attribution)
    }

    fn attribution_url(&self) -> Option<&str> {
        Some(&self.attribution_url)
    }

    fn max_zoom(&self) -> u8 {
        19
    }

    fn default_center(&self) -> GeoPos {
        self.default_center
    }

    fn default_zoom(&self) -> u8 {
        self.default_zoom
    }
}

/// OpenTopoMap terrain tiles.
///
/// # Example
///
/// ```
/// use refuge_map::config::TerrainConfig;
/// let config = TerrainConfig::default();
/// ```
pub struct TerrainConfig {
    base_url: String,
    attribution: String,
    attribution_url: String,
    default_center: GeoPos,
    default_zoom: u8,
}

impl Default for TerrainConfig {
    fn default() -> Self {
        Self {
            base_url: "https://{s}.tile.opentopomap.org".to_string(),
            attribution: "Map data: © OpenTopoMap contributors".to_string(),
            attribution_url: "https://opentopomap.org".to_string(),
            default_center: GeoPos::new(24.93545, 60.16952),
            default_zoom: 5,
        }
    }
}

impl TileProviderConfig for TerrainConfig {
    fn tile_url(&self, tile: &TileId) -> String {
        // Rotate the subdomain the way slippy-map clients spread tile load.
        let subdomain = ["a", "b", "c"][((tile.x + tile.y) % 3) as usize];
        format!(
            "{}/{}/{}/{}.png",
            self.base_url.replace("{s}", subdomain),
            tile.z,
            tile.x,
            tile.y
        )
    }

    fn name(&self) -> &str {
        "Terrain"
    }

    fn attribution(&self) -> Option<&str> {
        Some(&self.attribution)
    }

    fn attribution_url(&self) -> Option<&str> {
        Some(&self.attribution_url)
    }

    fn max_zoom(&self) -> u8 {
        17
    }

    fn default_center(&self) -> GeoPos {
        self.default_center
    }

    fn default_zoom(&self) -> u8 {
        self.default_zoom
    }
}

/// A tile provider defined at runtime, for deployments that add their own
/// base layers.
///
/// # Example
///
/// ```
/// use refuge_map::config::DynTileProvider;
/// let config = DynTileProvider::new("Custom", |tile| {
///     format!("https://my-tile-server/{}/{}/{}.png", tile.z, tile.x, tile.y)
/// });
/// ```
pub struct DynTileProvider {
    name: String,
    tile_url: Box<dyn Fn(&TileId) -> String>,
    api_key: Option<(String, String)>,
}

impl DynTileProvider {
    /// Creates a provider with a custom tile URL function.
    pub fn new(name: impl Into<String>, tile_url: impl Fn(&TileId) -> String + 'static) -> Self {
        Self {
            name: name.into(),
            tile_url: Box::new(tile_url),
            api_key: None,
        }
    }

    /// Appends `param=key` to every tile URL, for providers that take their
    /// key as a query parameter.
    pub fn with_api_key(mut self, param: impl Into<String>, key: impl Into<String>) -> Self {
        self.api_key = Some((param.into(), key.into()));
        self
    }
}

impl TileProviderConfig for DynTileProvider {
    fn tile_url(&self, tile: &TileId) -> String {
        let url = (self.tile_url)(tile);
        match &self.api_key {
            Some((param, key)) => {
                let separator = if url.contains('?') { '&' } else { '?' };
                format!("{url}{separator}{param}={key}")
            }
            None => url,
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn attribution(&self) -> Option<&str> {
        None
    }

    fn attribution_url(&self) -> Option<&str> {
        None
    }

    fn max_zoom(&self) -> u8 {
        crate::MAX_ZOOM
    }

    fn default_center(&self) -> GeoPos {
        GeoPos::new(24.93545, 60.16952)
    }

    fn default_zoom(&self) -> u8 {
        2
    }
}

/// Which input strategy drawing sessions use.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InputModePreference {
    /// Reticle on touch screens, pointer otherwise.
    #[default]
    Auto,

    /// Always pointer-direct.
    Pointer,

    /// Always center-reticle.
    Reticle,
}

/// Deployment settings, read from the environment with compiled-in
/// defaults.
pub struct AppSettings {
    /// Base URL of the persistence backend.
    pub backend_base_url: String,

    /// Base URL of the Nominatim-compatible geocoder.
    pub geocoder_base_url: String,

    /// Opaque host-shell init payload forwarded to the backend at startup.
    pub init_payload: Option<JsonValue>,

    /// Input-mode preference for drawing sessions.
    pub input_mode: InputModePreference,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            backend_base_url: "https://gaavbaangi-backend.onrender.com".to_string(),
            geocoder_base_url: "https://nominatim.openstreetmap.org".to_string(),
            init_payload: None,
            input_mode: InputModePreference::Auto,
        }
    }
}

impl AppSettings {
    /// Reads settings from `REFUGE_BACKEND_URL`, `REFUGE_GEOCODER_URL`,
    /// `REFUGE_INIT_PAYLOAD` and `REFUGE_INPUT_MODE`.
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        if let Ok(url) = std::env::var("REFUGE_BACKEND_URL") {
            settings.backend_base_url = url;
        }
        if let Ok(url) = std::env::var("REFUGE_GEOCODER_URL") {
            settings.geocoder_base_url = url;
        }
        if let Ok(raw) = std::env::var("REFUGE_INIT_PAYLOAD") {
            settings.init_payload = serde_json::from_str(&raw).ok();
        }
        if let Ok(mode) = std::env::var("REFUGE_INPUT_MODE") {
            settings.input_mode = match mode.as_str() {
                "pointer" => InputModePreference::Pointer,
                "reticle" => InputModePreference::Reticle,
                _ => InputModePreference::Auto,
            };
        }
        settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TileId;

    #[test]
    fn satellite_tile_url_is_z_y_x() {
        let config = SatelliteConfig::default();
        let tile_id = TileId { z: 10, x: 559, y: 330 };
        assert_eq!(
            config.tile_url(&tile_id),
            "https://server.arcgisonline.com/ArcGIS/rest/services/World_Imagery/MapServer/tile/10/330/559"
        );
    }

    #[test]
    fn terrain_tile_url_rotates_subdomains() {
        let config = TerrainConfig::default();

        let url = config.tile_url(&TileId { z: 10, x: 1, y: 2 });
        assert_eq!(url, "https://a.tile.opentopomap.org/10/1/2.png");

        let url = config.tile_url(&TileId { z: 10, x: 2, y: 2 });
        assert_eq!(url, "https://b.tile.opentopomap.org/10/2/2.png");
    }

    #[test]
    fn dyn_provider_appends_api_key() {
        let config = DynTileProvider::new("Custom", |tile| {
            format!("https://tiles.example/{}/{}/{}.png", tile.z, tile.x, tile.y)
        })
        .with_api_key("apikey", "secret");

        assert_eq!(
            config.tile_url(&TileId { z: 1, x: 2, y: 3 }),
            "https://tiles.example/1/2/3.png?apikey=secret"
        );
    }

    #[test]
    fn settings_defaults() {
        let settings = AppSettings::default();
        assert_eq!(
            settings.backend_base_url,
            "https://gaavbaangi-backend.onrender.com"
        );
        assert_eq!(settings.input_mode, InputModePreference::Auto);
        assert!(settings.init_payload.is_none());
    }
}
