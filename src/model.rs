use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use url::Url;

use crate::capabilities::{CatalogRequest, CatalogResponse};
use crate::event::Coordinate;
use crate::AppError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CloudId(pub u64);

impl fmt::Display for CloudId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One cloud region as served by `GET /clouds/`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Cloud {
    pub cloud_id: CloudId,
    pub cloud_name: String,
    pub cloud_description: String,
    pub geo_latitude: f64,
    pub geo_longitude: f64,
    pub geo_region: String,
    pub provider: String,
    pub provider_description: String,
}

impl Cloud {
    #[must_use]
    pub fn coordinate(&self) -> Option<Coordinate> {
        Coordinate::new(self.geo_latitude, self.geo_longitude).ok()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ProviderOption {
    pub value: String,
    pub label: String,
}

impl ProviderOption {
    pub fn new(value: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            label: label.into(),
        }
    }
}

/// The user's chosen clouds, independent of what is currently listed.
///
/// Ids are never pruned by a filter change or a refetch; only an explicit
/// toggle or clear removes them.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct SelectionSet(BTreeSet<CloudId>);

impl SelectionSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Flips membership of `id`. Returns whether `id` is selected afterwards.
    pub fn toggle(&mut self, id: CloudId) -> bool {
        if self.0.remove(&id) {
            false
        } else {
            self.0.insert(id);
            true
        }
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    #[must_use]
    pub fn contains(&self, id: CloudId) -> bool {
        self.0.contains(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = CloudId> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<CloudId> for SelectionSet {
    fn from_iter<I: IntoIterator<Item = CloudId>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Ids of `clouds` that are also in `selection`, in list order.
#[must_use]
pub fn visible_selection(clouds: &[Cloud], selection: &SelectionSet) -> Vec<CloudId> {
    clouds
        .iter()
        .map(|cloud| cloud.cloud_id)
        .filter(|id| selection.contains(*id))
        .collect()
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct FilterState {
    /// Empty means "all providers".
    pub providers: Vec<ProviderOption>,
    pub sort_by_distance: bool,
}

impl FilterState {
    #[must_use]
    pub fn is_filtered(&self) -> bool {
        !self.providers.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PermissionState {
    #[default]
    Unknown,
    Requesting,
    Granted,
    Denied,
}

impl PermissionState {
    #[must_use]
    pub const fn is_granted(self) -> bool {
        matches!(self, Self::Granted)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct LocationState {
    pub permission: PermissionState,
    pub coordinate: Option<Coordinate>,
    pub show_notice: bool,
    pub error: Option<AppError>,
}

impl LocationState {
    pub fn grant(&mut self, coordinate: Coordinate) {
        self.permission = PermissionState::Granted;
        self.coordinate = Some(coordinate);
        self.error = None;
    }

    /// Records the denial and raises the notice. Only the first denial of a
    /// mount raises it; a dismissed notice stays dismissed.
    pub fn deny(&mut self, error: AppError) {
        let first = self.permission != PermissionState::Denied;
        self.permission = PermissionState::Denied;
        self.coordinate = None;
        self.error = Some(error);
        if first {
            self.show_notice = true;
        }
    }

    /// Coordinates to send with a sort request, if permission was granted.
    #[must_use]
    pub fn granted_coordinate(&self) -> Option<Coordinate> {
        if self.permission.is_granted() {
            self.coordinate
        } else {
            None
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FetchSeq(pub u64);

impl FetchSeq {
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchOutcome {
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FetchPhase {
    #[default]
    Idle,
    Fetching {
        seq: FetchSeq,
    },
    Settled(FetchOutcome),
}

/// Hands out sequence numbers so only the newest request may land.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct FetchTracker {
    latest: FetchSeq,
    phase: FetchPhase,
}

impl FetchTracker {
    pub fn begin(&mut self) -> FetchSeq {
        self.latest = self.latest.next();
        self.phase = FetchPhase::Fetching { seq: self.latest };
        self.latest
    }

    #[must_use]
    pub fn is_latest(&self, seq: FetchSeq) -> bool {
        self.latest != FetchSeq::default() && seq == self.latest
    }

    pub fn settle(&mut self, outcome: FetchOutcome) {
        self.phase = FetchPhase::Settled(outcome);
    }

    #[must_use]
    pub const fn latest(&self) -> FetchSeq {
        self.latest
    }

    #[must_use]
    pub const fn phase(&self) -> FetchPhase {
        self.phase
    }

    #[must_use]
    pub const fn is_fetching(&self) -> bool {
        matches!(self.phase, FetchPhase::Fetching { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MountPhase {
    #[default]
    Unmounted,
    Mounted,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Model {
    pub mount: MountPhase,
    /// Base of the clouds API, set by `Initialize`.
    pub api_url: Option<Url>,

    // Catalog (replaced wholesale by every applied fetch)
    pub clouds: Vec<Cloud>,
    pub is_loaded: bool,
    pub providers: Vec<ProviderOption>,

    pub filter: FilterState,
    pub selection: SelectionSet,
    pub location: LocationState,
    pub fetch: FetchTracker,

    /// Diagnostics only; fetch failures never block the view.
    pub last_fetch_error: Option<AppError>,
}

impl Model {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_mounted(&self) -> bool {
        self.mount == MountPhase::Mounted
    }

    #[must_use]
    pub fn visible_selection(&self) -> Vec<CloudId> {
        visible_selection(&self.clouds, &self.selection)
    }

    #[must_use]
    pub fn is_selected(&self, id: CloudId) -> bool {
        self.selection.contains(id)
    }

    /// The request matching the current filter and location state.
    #[must_use]
    pub fn catalog_request(&self) -> CatalogRequest {
        CatalogRequest {
            providers: self
                .filter
                .providers
                .iter()
                .map(|p| p.value.clone())
                .collect(),
            sort_by_distance: self.filter.sort_by_distance,
            coordinate: self.location.granted_coordinate(),
        }
    }

    pub fn apply_catalog(&mut self, response: CatalogResponse, adopt_providers: bool) {
        self.clouds = response.clouds;
        self.is_loaded = true;
        if adopt_providers {
            self.providers = response.providers;
        }
    }
}
