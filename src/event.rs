use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

use crate::capabilities::{CatalogResult, GeolocationResult};
use crate::model::{CloudId, FetchSeq, ProviderOption};
use crate::EARTH_RADIUS_M;

// --- Coordinate: validated, NaN-safe ---

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoordinateError {
    #[error("latitude {0} is out of valid range [-90, 90]")]
    LatitudeOutOfRange(f64),
    #[error("longitude {0} is out of valid range [-180, 180]")]
    LongitudeOutOfRange(f64),
    #[error("coordinate is not a finite number")]
    NonFinite,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(try_from = "RawCoordinate")]
pub struct Coordinate {
    lat: f64,
    lon: f64,
}

#[derive(Deserialize)]
struct RawCoordinate {
    lat: f64,
    lon: f64,
}

impl TryFrom<RawCoordinate> for Coordinate {
    type Error = CoordinateError;

    fn try_from(raw: RawCoordinate) -> Result<Self, Self::Error> {
        Self::new(raw.lat, raw.lon)
    }
}

impl Coordinate {
    pub fn new(lat: f64, lon: f64) -> Result<Self, CoordinateError> {
        if !lat.is_finite() || !lon.is_finite() {
            return Err(CoordinateError::NonFinite);
        }
        if !(-90.0..=90.0).contains(&lat) {
            return Err(CoordinateError::LatitudeOutOfRange(lat));
        }
        if !(-180.0..=180.0).contains(&lon) {
            return Err(CoordinateError::LongitudeOutOfRange(lon));
        }
        Ok(Self { lat, lon })
    }

    #[must_use]
    pub const fn lat(self) -> f64 {
        self.lat
    }

    #[must_use]
    pub const fn lon(self) -> f64 {
        self.lon
    }

    /// Great-circle distance in meters (haversine, mean Earth radius).
    #[must_use]
    pub fn distance_to(self, other: Self) -> f64 {
        let (phi1, phi2) = (self.lat.to_radians(), other.lat.to_radians());
        let half_d_phi = (phi2 - phi1) / 2.0;
        let half_d_lambda = (other.lon - self.lon).to_radians() / 2.0;

        let h = half_d_phi.sin().powi(2) + phi1.cos() * phi2.cos() * half_d_lambda.sin().powi(2);
        2.0 * EARTH_RADIUS_M * h.clamp(0.0, 1.0).sqrt().asin()
    }
}

impl PartialEq for Coordinate {
    fn eq(&self, other: &Self) -> bool {
        self.lat.to_bits() == other.lat.to_bits() && self.lon.to_bits() == other.lon.to_bits()
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.lat, self.lon)
    }
}

/// Everything the core reacts to: user actions from the shell and
/// completions of effects the core requested earlier.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    // Lifecycle
    Initialize {
        api_url: Box<Url>,
    },

    // Filter & sort
    ProvidersChanged {
        providers: Vec<ProviderOption>,
    },
    SortToggled,

    // Selection
    CloudClicked {
        id: CloudId,
    },
    SelectionCleared,
    ContinueRequested,

    // Location notice
    LocationNoticeDismissed,

    // Capability responses (boxed to keep enum size small)
    CatalogFetched {
        seq: FetchSeq,
        adopt_providers: bool,
        result: Box<CatalogResult>,
    },
    LocationResolved(Box<GeolocationResult>),
}

impl Event {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Initialize { .. } => "initialize",
            Self::ProvidersChanged { .. } => "providers_changed",
            Self::SortToggled => "sort_toggled",
            Self::CloudClicked { .. } => "cloud_clicked",
            Self::SelectionCleared => "selection_cleared",
            Self::ContinueRequested => "continue_requested",
            Self::LocationNoticeDismissed => "location_notice_dismissed",
            Self::CatalogFetched { .. } => "catalog_fetched",
            Self::LocationResolved(_) => "location_resolved",
        }
    }

    #[must_use]
    pub const fn is_user_initiated(&self) -> bool {
        matches!(
            self,
            Self::ProvidersChanged { .. }
                | Self::SortToggled
                | Self::CloudClicked { .. }
                | Self::SelectionCleared
                | Self::ContinueRequested
                | Self::LocationNoticeDismissed
        )
    }
}
