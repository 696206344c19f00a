// lib.rs - shared core for the cloud region picker

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]

pub mod capabilities;
pub mod config;
pub mod event;
pub mod model;
pub mod shell;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use app::App;
pub use capabilities::{Capabilities, Effect};
pub use crux_core::App as CruxApp;
pub use event::{Coordinate, Event};
pub use model::{Cloud, CloudId, Model, ProviderOption, SelectionSet};

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Network,
    Timeout,
    Server,
    InvalidRequest,
    Deserialization,
    LocationUnavailable,
    Configuration,
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Network => "NETWORK_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::Server => "SERVER_ERROR",
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::Deserialization => "DESERIALIZATION_ERROR",
            Self::LocationUnavailable => "LOCATION_UNAVAILABLE",
            Self::Configuration => "CONFIGURATION_ERROR",
        }
    }

    /// Whether repeating the same user action may succeed. The core never
    /// retries on its own.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Network | Self::Timeout | Self::Server)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppError {
    pub kind: ErrorKind,
    pub message: String,
    pub internal_message: Option<String>,
}

impl AppError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            internal_message: None,
        }
    }

    #[must_use]
    pub fn with_internal(mut self, internal: impl Into<String>) -> Self {
        self.internal_message = Some(internal.into());
        self
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.kind.code()
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    #[must_use]
    pub fn user_facing_message(&self) -> String {
        match self.kind {
            ErrorKind::Network | ErrorKind::Timeout | ErrorKind::Server => {
                "Unable to load clouds right now. Showing the last known list.".into()
            }
            ErrorKind::InvalidRequest | ErrorKind::Deserialization => {
                "The cloud list could not be read.".into()
            }
            ErrorKind::LocationUnavailable => {
                "Your location permission is needed for the sort by geolocation feature.".into()
            }
            ErrorKind::Configuration => self.message.clone(),
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code(), self.message)?;
        if let Some(internal) = &self.internal_message {
            write!(f, " (internal: {internal})")?;
        }
        Ok(())
    }
}

impl std::error::Error for AppError {}

impl From<&capabilities::HttpError> for AppError {
    fn from(e: &capabilities::HttpError) -> Self {
        use capabilities::HttpError;

        let kind = match e {
            HttpError::InvalidUrl { .. } => ErrorKind::InvalidRequest,
            HttpError::Network(_) => ErrorKind::Network,
            HttpError::Timeout => ErrorKind::Timeout,
            HttpError::Status { code, .. } if HttpError::is_gateway_timeout(*code) => {
                ErrorKind::Timeout
            }
            HttpError::Status { code, .. } if HttpError::is_bad_gateway(*code) => {
                ErrorKind::Network
            }
            HttpError::Status { code, .. } if (400..500).contains(code) => {
                ErrorKind::InvalidRequest
            }
            HttpError::Status { .. } => ErrorKind::Server,
            HttpError::Decode(_) => ErrorKind::Deserialization,
        };
        AppError::new(kind, "Catalog fetch failed").with_internal(e.to_string())
    }
}

impl From<&capabilities::GeolocationError> for AppError {
    fn from(e: &capabilities::GeolocationError) -> Self {
        AppError::new(ErrorKind::LocationUnavailable, e.to_string())
    }
}

impl From<event::CoordinateError> for AppError {
    fn from(e: event::CoordinateError) -> Self {
        AppError::new(ErrorKind::LocationUnavailable, "Invalid position reported")
            .with_internal(e.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(e: config::ConfigError) -> Self {
        AppError::new(ErrorKind::Configuration, e.to_string())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ShellError {
    #[error("no effects are in flight")]
    Idle,
    #[error("completion channel closed")]
    ChannelClosed,
}

#[must_use]
pub fn format_distance(meters: f64) -> String {
    match meters {
        m if !m.is_finite() || m < 0.0 => "Unknown".to_owned(),
        m if m < 1_000.0 => format!("{m:.0} m"),
        m if m < 10_000.0 => format!("{:.1} km", m / 1_000.0),
        m => format!("{:.0} km", m / 1_000.0),
    }
}

#[must_use]
pub fn selection_headline(count: usize) -> String {
    if count == 1 {
        "1 Selected cloud".to_string()
    } else {
        format!("{count} Selected clouds")
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CloudCard {
    pub id: CloudId,
    pub name: String,
    pub description: String,
    pub latitude: f64,
    pub longitude: f64,
    pub region: String,
    pub provider: String,
    pub provider_description: String,
    pub selected: bool,
    pub distance_text: Option<String>,
}

/// Everything the rendering layer needs; callbacks map onto [`Event`]s.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ViewModel {
    pub clouds: Vec<CloudCard>,
    pub is_loaded: bool,
    pub is_fetching: bool,
    /// Non-blocking hint about the last failed fetch.
    pub fetch_error: Option<String>,

    // Filter
    pub provider_options: Vec<ProviderOption>,
    pub selected_providers: Vec<ProviderOption>,
    pub show_provider_filter: bool,

    // Sort by distance
    pub sort_by_distance: bool,
    pub sort_enabled: bool,
    pub show_location_notice: bool,

    // Selection
    pub selected_count: usize,
    pub visible_selection: Vec<CloudId>,
    pub visible_selected_count: usize,
    pub selection_headline: String,
    pub can_continue: bool,
    pub can_clear: bool,
}

pub mod app {
    use super::{format_distance, selection_headline, AppError, CloudCard, ViewModel};
    use crate::capabilities::{
        catalog_result, Capabilities, CatalogFetch, CatalogResult, GeolocationResult,
    };
    use crate::event::Event;
    use crate::model::{Cloud, FetchOutcome, Model, MountPhase, PermissionState};
    use tracing::{debug, info, warn};

    #[derive(Default)]
    pub struct App;

    impl App {
        fn start_fetch(model: &mut Model, caps: &Capabilities) {
            let Some(base) = model.api_url.clone() else {
                warn!("no API URL configured; catalog fetch skipped");
                return;
            };

            let request = model.catalog_request();
            let url = request.url(&base);
            let seq = model.fetch.begin();
            debug!(
                seq = seq.0,
                filtered = model.filter.is_filtered(),
                sort_by_distance = request.sort_by_distance,
                %url,
                "dispatching catalog fetch"
            );

            let fetch = CatalogFetch { seq, request };
            caps.http
                .get(url.as_str())
                .send(move |result| fetch.into_event(catalog_result(result)));
        }

        fn handle_catalog_result(result: CatalogResult, adopt_providers: bool, model: &mut Model) {
            match result {
                Ok(response) => {
                    let count = response.clouds.len();
                    model.apply_catalog(response, adopt_providers);
                    model.fetch.settle(FetchOutcome::Success);
                    model.last_fetch_error = None;
                    info!(
                        seq = model.fetch.latest().0,
                        clouds = count,
                        providers_adopted = adopt_providers,
                        "catalog applied"
                    );
                }
                Err(e) => {
                    warn!(error = %e, "catalog fetch failed; keeping previous catalog");
                    model.fetch.settle(FetchOutcome::Failure);
                    model.last_fetch_error = Some(AppError::from(&e));
                }
            }
        }

        fn handle_location_result(result: GeolocationResult, model: &mut Model) {
            let coordinate = result
                .map_err(|e| AppError::from(&e))
                .and_then(|position| position.coordinate().map_err(AppError::from));

            match coordinate {
                Ok(coordinate) => {
                    info!(%coordinate, "location permission granted");
                    model.location.grant(coordinate);
                }
                Err(error) => {
                    warn!(%error, "location unavailable; sort by distance disabled");
                    model.location.deny(error);
                }
            }
        }

        fn build_cards(model: &Model) -> Vec<CloudCard> {
            let origin = model.location.granted_coordinate();

            model
                .clouds
                .iter()
                .map(|cloud: &Cloud| CloudCard {
                    id: cloud.cloud_id,
                    name: cloud.cloud_name.clone(),
                    description: cloud.cloud_description.clone(),
                    latitude: cloud.geo_latitude,
                    longitude: cloud.geo_longitude,
                    region: cloud.geo_region.clone(),
                    provider: cloud.provider.clone(),
                    provider_description: cloud.provider_description.clone(),
                    selected: model.is_selected(cloud.cloud_id),
                    distance_text: origin
                        .zip(cloud.coordinate())
                        .map(|(from, to)| format_distance(from.distance_to(to))),
                })
                .collect()
        }
    }

    impl crux_core::App for App {
        type Event = Event;
        type Model = Model;
        type ViewModel = ViewModel;
        type Capabilities = Capabilities;

        fn update(&self, event: Event, model: &mut Model, caps: &Capabilities) {
            let event_name = event.name();
            if event.is_user_initiated() {
                debug!(event = event_name, "user action");
            }

            match event {
                Event::Initialize { api_url } => {
                    if model.is_mounted() {
                        warn!("initialize received while already mounted; ignoring");
                        return;
                    }

                    model.mount = MountPhase::Mounted;
                    model.api_url = Some(*api_url);
                    model.location.permission = PermissionState::Requesting;
                    info!("catalog view mounted");

                    Self::start_fetch(model, caps);
                    caps.geolocation
                        .current_position(|result| Event::LocationResolved(Box::new(result)));
                    caps.render.render();
                }

                Event::ProvidersChanged { providers } => {
                    if !model.is_mounted() {
                        warn!(event = event_name, "ignored before initialize");
                        return;
                    }

                    model.filter.providers = providers;
                    Self::start_fetch(model, caps);
                    caps.render.render();
                }

                Event::SortToggled => {
                    if !model.is_mounted() {
                        warn!(event = event_name, "ignored before initialize");
                        return;
                    }

                    model.filter.sort_by_distance = !model.filter.sort_by_distance;
                    if model.filter.sort_by_distance && !model.location.permission.is_granted() {
                        warn!("sort by distance enabled without location permission");
                    }
                    Self::start_fetch(model, caps);
                    caps.render.render();
                }

                Event::CloudClicked { id } => {
                    let selected = model.selection.toggle(id);
                    debug!(%id, selected, "selection toggled");
                    caps.render.render();
                }

                Event::SelectionCleared => {
                    model.selection.clear();
                    caps.render.render();
                }

                Event::ContinueRequested => {
                    info!(
                        visible_selected = model.visible_selection().len(),
                        "continue with selection requested; no destination configured"
                    );
                }

                Event::LocationNoticeDismissed => {
                    model.location.show_notice = false;
                    caps.render.render();
                }

                Event::CatalogFetched {
                    seq,
                    adopt_providers,
                    result,
                } => {
                    if !model.fetch.is_latest(seq) {
                        debug!(
                            seq = seq.0,
                            latest = model.fetch.latest().0,
                            "discarding stale catalog response"
                        );
                        return;
                    }

                    Self::handle_catalog_result(*result, adopt_providers, model);
                    caps.render.render();
                }

                Event::LocationResolved(result) => {
                    if model.location.permission != PermissionState::Requesting {
                        warn!("location result without a pending request; ignoring");
                        return;
                    }

                    Self::handle_location_result(*result, model);
                    caps.render.render();
                }
            }
        }

        fn view(&self, model: &Model) -> ViewModel {
            let visible_selection = model.visible_selection();
            let visible_selected_count = visible_selection.len();

            ViewModel {
                clouds: Self::build_cards(model),
                is_loaded: model.is_loaded,
                is_fetching: model.fetch.is_fetching(),
                fetch_error: model
                    .last_fetch_error
                    .as_ref()
                    .map(AppError::user_facing_message),
                provider_options: model.providers.clone(),
                selected_providers: model.filter.providers.clone(),
                show_provider_filter: !model.providers.is_empty(),
                sort_by_distance: model.filter.sort_by_distance,
                sort_enabled: model.location.permission.is_granted(),
                show_location_notice: model.location.show_notice,
                selected_count: model.selection.len(),
                visible_selection,
                visible_selected_count,
                selection_headline: selection_headline(visible_selected_count),
                can_continue: visible_selected_count > 0,
                can_clear: visible_selected_count > 0,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{
        GeolocationError, GeolocationOperation, GeolocationResult, HttpError, HttpRequest,
        HttpResponse, Position,
    };
    use crate::model::{FetchOutcome, FetchPhase, PermissionState};
    use crux_core::testing::AppTester;
    use crux_core::Request;
    use proptest::prelude::*;
    use url::Url;

    struct Harness {
        app: AppTester<App, Effect>,
        model: Model,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                app: AppTester::default(),
                model: Model::default(),
            }
        }

        fn mounted() -> (Self, Request<HttpRequest>) {
            let mut h = Self::new();
            let effects = h.send(initialize());
            let fetch = only_fetch(effects);
            (h, fetch)
        }

        fn send(&mut self, event: Event) -> Vec<Effect> {
            self.app.update(event, &mut self.model).effects
        }

        /// Answers an HTTP request and feeds the resulting events back in.
        fn respond(
            &mut self,
            mut request: Request<HttpRequest>,
            response: HttpResponse,
        ) -> Vec<Effect> {
            let update = self
                .app
                .resolve(&mut request, crux_http::protocol::HttpResult::Ok(response))
                .expect("http request should resolve");
            let mut effects = update.effects;
            for event in update.events {
                effects.extend(self.send(event));
            }
            effects
        }

        fn resolve(&mut self, request: Request<HttpRequest>, clouds: &[u64]) -> Vec<Effect> {
            self.respond(request, ok(clouds))
        }

        fn locate(&mut self, result: GeolocationResult) -> Vec<Effect> {
            self.send(Event::LocationResolved(Box::new(result)))
        }

        fn view(&self) -> ViewModel {
            self.app.view(&self.model)
        }
    }

    fn initialize() -> Event {
        Event::Initialize {
            api_url: Box::new(Url::parse("http://localhost:8000").unwrap()),
        }
    }

    fn cloud(id: u64, provider: &str) -> Cloud {
        Cloud {
            cloud_id: CloudId(id),
            cloud_name: format!("{provider}-{id}"),
            cloud_description: format!("Cloud {id}"),
            geo_latitude: 50.0 + f64::from(u32::try_from(id).unwrap()) * 0.1,
            geo_longitude: 8.0,
            geo_region: "europe".into(),
            provider: provider.into(),
            provider_description: provider.to_uppercase(),
        }
    }

    fn providers() -> Vec<ProviderOption> {
        vec![
            ProviderOption::new("aws", "Aws"),
            ProviderOption::new("google", "Google"),
        ]
    }

    fn body(clouds: &[Cloud], providers: &[ProviderOption]) -> HttpResponse {
        let json = serde_json::json!({ "clouds": clouds, "providers": providers });
        HttpResponse::status(200).body(json.to_string().into_bytes()).build()
    }

    fn ok(ids: &[u64]) -> HttpResponse {
        let clouds: Vec<Cloud> = ids.iter().map(|id| cloud(*id, "aws")).collect();
        body(&clouds, &providers())
    }

    fn fetches(effects: Vec<Effect>) -> Vec<Request<HttpRequest>> {
        effects
            .into_iter()
            .filter_map(|e| match e {
                Effect::Http(request) => Some(request),
                _ => None,
            })
            .collect()
    }

    fn only_fetch(effects: Vec<Effect>) -> Request<HttpRequest> {
        let mut all = fetches(effects);
        assert_eq!(all.len(), 1, "expected exactly one catalog fetch");
        all.remove(0)
    }

    fn query(request: &Request<HttpRequest>) -> Vec<(String, String)> {
        Url::parse(&request.operation.url)
            .unwrap()
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    fn param(request: &Request<HttpRequest>, name: &str) -> Option<String> {
        query(request)
            .into_iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    fn renders(effects: &[Effect]) -> bool {
        effects.iter().any(|e| matches!(e, Effect::Render(_)))
    }

    fn aws_only() -> Event {
        Event::ProvidersChanged {
            providers: vec![ProviderOption::new("aws", "Aws")],
        }
    }

    fn google_only() -> Event {
        Event::ProvidersChanged {
            providers: vec![ProviderOption::new("google", "Google")],
        }
    }

    mod lifecycle_tests {
        use super::*;

        #[test]
        fn initialize_requests_catalog_and_location() {
            let mut h = Harness::new();
            let effects = h.send(initialize());

            assert!(renders(&effects));
            assert!(effects.iter().any(|e| matches!(
                e,
                Effect::Geolocation(request) if request.operation == GeolocationOperation::CurrentPosition
            )));

            let fetch = only_fetch(effects);
            assert_eq!(fetch.operation.method, "GET");
            assert_eq!(fetch.operation.url, "http://localhost:8000/clouds/");
            assert_eq!(h.model.location.permission, PermissionState::Requesting);
        }

        #[test]
        fn mount_does_not_reconcile_before_data() {
            let (h, _) = Harness::mounted();
            let view = h.view();
            assert!(!view.is_loaded);
            assert!(view.is_fetching);
            assert!(view.clouds.is_empty());
            assert_eq!(view.visible_selected_count, 0);
        }

        #[test]
        fn second_initialize_is_ignored() {
            let (mut h, _) = Harness::mounted();
            assert!(h.send(initialize()).is_empty());
        }

        #[test]
        fn filter_and_sort_are_ignored_before_initialize() {
            let mut h = Harness::new();
            assert!(h.send(Event::SortToggled).is_empty());
            assert!(h.send(aws_only()).is_empty());
            assert!(!h.model.filter.sort_by_distance);
            assert!(h.model.filter.providers.is_empty());
        }

        #[test]
        fn continue_is_a_no_op() {
            let (mut h, fetch) = Harness::mounted();
            h.resolve(fetch, &[1]);
            h.send(Event::CloudClicked { id: CloudId(1) });
            let before = h.model.clone();
            assert!(h.send(Event::ContinueRequested).is_empty());
            assert_eq!(h.model, before);
        }
    }

    mod selection_tests {
        use super::*;

        #[test]
        fn selection_survives_filter_change() {
            let (mut h, fetch) = Harness::mounted();
            h.resolve(fetch, &[1, 2, 3]);

            h.send(Event::CloudClicked { id: CloudId(2) });
            assert_eq!(h.model.selection.iter().collect::<Vec<_>>(), vec![CloudId(2)]);
            assert_eq!(h.view().visible_selection, vec![CloudId(2)]);

            let fetch = only_fetch(h.send(google_only()));
            assert_eq!(h.model.selection.len(), 1);
            assert_eq!(param(&fetch, "providers_req").as_deref(), Some("google"));

            h.resolve(fetch, &[1, 3]);
            assert!(h.model.is_selected(CloudId(2)));
            let view = h.view();
            assert!(view.visible_selection.is_empty());
            assert_eq!(view.selected_count, 1);
            assert!(!view.can_continue);
        }

        #[test]
        fn hidden_selection_reappears_when_item_returns() {
            let (mut h, fetch) = Harness::mounted();
            h.resolve(fetch, &[1, 2]);
            h.send(Event::CloudClicked { id: CloudId(2) });

            let fetch = only_fetch(h.send(google_only()));
            h.resolve(fetch, &[1]);
            assert_eq!(h.view().visible_selected_count, 0);

            let fetch = only_fetch(h.send(Event::ProvidersChanged { providers: vec![] }));
            assert!(query(&fetch).is_empty());
            h.resolve(fetch, &[1, 2]);
            assert_eq!(h.view().visible_selection, vec![CloudId(2)]);
        }

        #[test]
        fn clear_empties_selection_and_view() {
            let (mut h, fetch) = Harness::mounted();
            h.resolve(fetch, &[1, 2, 3]);
            h.send(Event::CloudClicked { id: CloudId(1) });
            h.send(Event::CloudClicked { id: CloudId(3) });
            assert!(h.view().can_clear);

            let effects = h.send(Event::SelectionCleared);
            assert!(renders(&effects));
            assert!(h.model.selection.is_empty());
            let view = h.view();
            assert!(view.visible_selection.is_empty());
            assert!(!view.can_clear);
            assert!(!view.can_continue);
        }

        #[test]
        fn cards_reflect_selection() {
            let (mut h, fetch) = Harness::mounted();
            h.resolve(fetch, &[4, 5]);
            h.send(Event::CloudClicked { id: CloudId(5) });

            let selected: Vec<bool> = h.view().clouds.iter().map(|c| c.selected).collect();
            assert_eq!(selected, vec![false, true]);
        }

        #[test]
        fn headline_pluralizes() {
            assert_eq!(selection_headline(0), "0 Selected clouds");
            assert_eq!(selection_headline(1), "1 Selected cloud");
            assert_eq!(selection_headline(7), "7 Selected clouds");
        }
    }

    mod fetch_tests {
        use super::*;

        #[test]
        fn stale_response_is_discarded() {
            let (mut h, initial) = Harness::mounted();
            h.resolve(initial, &[1, 2, 3]);

            let a = only_fetch(h.send(aws_only()));
            let b = only_fetch(h.send(google_only()));

            let effects = h.resolve(b, &[20, 21]);
            assert!(renders(&effects));

            let effects = h.resolve(a, &[10]);
            assert!(!renders(&effects));

            let ids: Vec<CloudId> = h.model.clouds.iter().map(|c| c.cloud_id).collect();
            assert_eq!(ids, vec![CloudId(20), CloudId(21)]);
            assert_eq!(h.model.fetch.phase(), FetchPhase::Settled(FetchOutcome::Success));
        }

        #[test]
        fn failure_keeps_previous_catalog() {
            let (mut h, initial) = Harness::mounted();
            h.resolve(initial, &[1, 2]);
            let before = h.model.clouds.clone();

            let fetch = only_fetch(h.send(aws_only()));
            let effects = h.respond(
                fetch,
                HttpError::Network("connection refused".into()).gateway_response(),
            );

            assert!(renders(&effects));
            assert!(fetches(effects).is_empty(), "no automatic retry");
            assert_eq!(h.model.clouds, before);
            assert_eq!(h.model.providers, providers());
            assert_eq!(h.model.fetch.phase(), FetchPhase::Settled(FetchOutcome::Failure));

            let error = h.model.last_fetch_error.as_ref().unwrap();
            assert_eq!(error.kind, ErrorKind::Network);
            assert!(error.is_retryable());
            assert_eq!(
                h.view().fetch_error.as_deref(),
                Some("Unable to load clouds right now. Showing the last known list.")
            );
        }

        #[test]
        fn server_detail_is_kept_for_diagnostics() {
            let (mut h, initial) = Harness::mounted();
            let detail = r#"{"detail": "user latitude and/or longtitue are missing"}"#;
            h.respond(
                initial,
                HttpResponse::status(400).body(detail.as_bytes().to_vec()).build(),
            );

            let error = h.model.last_fetch_error.clone().unwrap();
            assert_eq!(error.kind, ErrorKind::InvalidRequest);
            assert!(error
                .internal_message
                .unwrap()
                .contains("user latitude and/or longtitue are missing"));
            assert_eq!(
                h.view().fetch_error.as_deref(),
                Some("The cloud list could not be read.")
            );
        }

        #[test]
        fn success_clears_previous_error() {
            let (mut h, initial) = Harness::mounted();
            h.respond(initial, HttpError::Timeout.gateway_response());
            assert_eq!(
                h.model.last_fetch_error.as_ref().map(|e| e.kind),
                Some(ErrorKind::Timeout)
            );

            let fetch = only_fetch(h.send(aws_only()));
            h.resolve(fetch, &[1]);
            assert!(h.view().fetch_error.is_none());
        }

        #[test]
        fn stale_failure_does_not_touch_state() {
            let (mut h, initial) = Harness::mounted();
            let newer = only_fetch(h.send(Event::SortToggled));
            let effects = h.respond(initial, HttpError::Timeout.gateway_response());
            assert!(!renders(&effects));
            assert!(h.model.last_fetch_error.is_none());

            h.resolve(newer, &[1]);
            assert!(h.model.is_loaded);
        }

        #[test]
        fn filtered_response_does_not_shrink_provider_universe() {
            let (mut h, initial) = Harness::mounted();
            h.resolve(initial, &[1, 2]);
            assert!(h.view().show_provider_filter);

            let fetch = only_fetch(h.send(aws_only()));
            h.respond(
                fetch,
                body(&[cloud(1, "aws")], &[ProviderOption::new("aws", "Aws")]),
            );

            let view = h.view();
            assert_eq!(view.provider_options, providers());
            assert_eq!(view.selected_providers, vec![ProviderOption::new("aws", "Aws")]);
        }
    }

    mod location_tests {
        use super::*;

        fn granted(lat: f64, lon: f64) -> GeolocationResult {
            Ok(Position {
                latitude: lat,
                longitude: lon,
            })
        }

        #[test]
        fn geolocation_effect_resolves_into_permission() {
            let mut h = Harness::new();
            let mut request = h
                .send(initialize())
                .into_iter()
                .find_map(|e| match e {
                    Effect::Geolocation(request) => Some(request),
                    _ => None,
                })
                .unwrap();

            let update = h.app.resolve(&mut request, granted(52.52, 13.405)).unwrap();
            for event in update.events {
                h.send(event);
            }
            assert!(h.view().sort_enabled);
            assert_eq!(
                h.model.location.granted_coordinate(),
                Coordinate::new(52.52, 13.405).ok()
            );
        }

        #[test]
        fn sort_without_permission_sends_empty_coordinates() {
            let (mut h, _) = Harness::mounted();
            h.locate(Err(GeolocationError::PermissionDenied));
            assert!(!h.view().sort_enabled);

            let fetch = only_fetch(h.send(Event::SortToggled));
            assert!(h.model.filter.sort_by_distance);
            assert_eq!(param(&fetch, "sorted_by_geolocation").as_deref(), Some("true"));
            assert_eq!(param(&fetch, "user_latitude").as_deref(), Some(""));
            assert_eq!(param(&fetch, "user_longitude").as_deref(), Some(""));
        }

        #[test]
        fn sort_toggle_uses_granted_coordinates_and_current_filter() {
            let (mut h, initial) = Harness::mounted();
            h.locate(granted(52.52, 13.405));
            h.resolve(initial, &[1]);
            h.send(aws_only());

            let fetch = only_fetch(h.send(Event::SortToggled));
            assert!(h.view().sort_by_distance);
            assert_eq!(param(&fetch, "providers_req").as_deref(), Some("aws"));
            assert_eq!(param(&fetch, "user_latitude").as_deref(), Some("52.52"));
            assert_eq!(param(&fetch, "user_longitude").as_deref(), Some("13.405"));

            let fetch = only_fetch(h.send(Event::SortToggled));
            assert_eq!(param(&fetch, "sorted_by_geolocation"), None);
        }

        #[test]
        fn sort_flag_flips_before_fetch_resolves() {
            let (mut h, _) = Harness::mounted();
            h.locate(granted(10.0, 10.0));
            let fetch = only_fetch(h.send(Event::SortToggled));
            assert!(h.view().sort_by_distance);
            assert!(h.view().is_fetching);

            h.respond(fetch, HttpError::Timeout.gateway_response());
            assert!(h.view().sort_by_distance, "toggle is not rolled back on failure");
        }

        #[test]
        fn denial_raises_dismissible_notice() {
            let (mut h, _) = Harness::mounted();
            assert!(!h.view().show_location_notice);

            h.locate(Err(GeolocationError::PermissionDenied));
            let view = h.view();
            assert!(view.show_location_notice);
            assert!(!view.sort_enabled);
            assert_eq!(
                h.model.location.error.as_ref().map(|e| e.kind),
                Some(ErrorKind::LocationUnavailable)
            );

            h.send(Event::LocationNoticeDismissed);
            assert!(!h.view().show_location_notice);
        }

        #[test]
        fn invalid_position_counts_as_unavailable() {
            let (mut h, _) = Harness::mounted();
            h.locate(granted(f64::NAN, 0.0));
            assert_eq!(h.model.location.permission, PermissionState::Denied);
            assert!(h.view().show_location_notice);
        }

        #[test]
        fn late_location_result_is_ignored() {
            let (mut h, _) = Harness::mounted();
            h.locate(granted(1.0, 1.0));
            assert!(h.locate(Err(GeolocationError::PermissionDenied)).is_empty());
            assert!(h.model.location.permission.is_granted());
        }

        #[test]
        fn cards_show_distance_once_granted() {
            let (mut h, initial) = Harness::mounted();
            h.resolve(initial, &[1]);
            assert_eq!(h.view().clouds[0].distance_text, None);

            h.locate(granted(50.1, 8.0));
            assert_eq!(h.view().clouds[0].distance_text.as_deref(), Some("0 m"));
        }
    }

    mod format_tests {
        use super::*;

        #[test]
        fn format_distance_units() {
            assert_eq!(format_distance(500.0), "500 m");
            assert_eq!(format_distance(1500.0), "1.5 km");
            assert_eq!(format_distance(150_000.0), "150 km");
            assert_eq!(format_distance(f64::NAN), "Unknown");
            assert_eq!(format_distance(-1.0), "Unknown");
        }
    }

    mod error_tests {
        use super::*;

        #[test]
        fn http_errors_map_to_kinds() {
            let server = AppError::from(&HttpError::Status {
                code: 503,
                message: "unavailable".into(),
            });
            assert_eq!(server.kind, ErrorKind::Server);
            assert!(server.is_retryable());

            let bad = AppError::from(&HttpError::Status {
                code: 400,
                message: "missing".into(),
            });
            assert_eq!(bad.kind, ErrorKind::InvalidRequest);
            assert!(!bad.is_retryable());

            let gateway = AppError::from(&HttpError::Status {
                code: 504,
                message: "request timed out".into(),
            });
            assert_eq!(gateway.kind, ErrorKind::Timeout);

            let decode = AppError::from(&HttpError::Decode("eof".into()));
            assert_eq!(decode.code(), "DESERIALIZATION_ERROR");
        }

        #[test]
        fn display_includes_internal_message() {
            let error = AppError::new(ErrorKind::Timeout, "slow").with_internal("30s elapsed");
            assert_eq!(error.to_string(), "[TIMEOUT] slow (internal: 30s elapsed)");
        }

        #[test]
        fn user_facing_message_hides_internals() {
            let error = AppError::new(ErrorKind::Server, "Catalog fetch failed")
                .with_internal("HTTP 500: traceback");
            assert!(!error.user_facing_message().contains("traceback"));

            let config = AppError::from(config::ConfigError::InvalidTimeout("0".into()));
            assert_eq!(config.user_facing_message(), config.message);
        }
    }

    #[derive(Debug, Clone)]
    enum Step {
        Toggle(u64),
        Clear,
        Filter(bool),
        Resolve { newest: bool, ids: Vec<u64> },
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            (0u64..10).prop_map(Step::Toggle),
            Just(Step::Clear),
            any::<bool>().prop_map(Step::Filter),
            (any::<bool>(), proptest::collection::btree_set(0u64..10, 0..10))
                .prop_map(|(newest, ids)| Step::Resolve {
                    newest,
                    ids: ids.into_iter().collect(),
                }),
        ]
    }

    proptest! {
        #[test]
        fn visible_selection_stays_within_selection_and_list(steps in proptest::collection::vec(step(), 0..40)) {
            let (mut h, first) = Harness::mounted();
            let mut pending = vec![first];

            for step in steps {
                let selection_before = h.model.selection.clone();
                match step {
                    Step::Toggle(id) => {
                        h.send(Event::CloudClicked { id: CloudId(id) });
                    }
                    Step::Clear => {
                        h.send(Event::SelectionCleared);
                    }
                    Step::Filter(narrow) => {
                        let event = if narrow { aws_only() } else { Event::ProvidersChanged { providers: vec![] } };
                        pending.extend(fetches(h.send(event)));
                        prop_assert_eq!(&h.model.selection, &selection_before);
                    }
                    Step::Resolve { newest, ids } => {
                        if pending.is_empty() {
                            continue;
                        }
                        let request = if newest { pending.pop() } else { Some(pending.remove(0)) };
                        if let Some(request) = request {
                            h.resolve(request, &ids);
                        }
                        prop_assert_eq!(&h.model.selection, &selection_before);
                    }
                }

                let view = h.view();
                let listed: Vec<CloudId> = h.model.clouds.iter().map(|c| c.cloud_id).collect();
                for id in &view.visible_selection {
                    prop_assert!(h.model.selection.contains(*id));
                    prop_assert!(listed.contains(id));
                }
                prop_assert_eq!(view.visible_selected_count, view.visible_selection.len());
            }
        }
    }
}
