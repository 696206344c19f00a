mod geolocation;
mod http;

pub use self::geolocation::{
    FixedLocation, Geolocation, GeolocationError, GeolocationOperation, GeolocationResult,
    LocationSource, Position,
};
pub use self::http::{
    catalog_result, decode_catalog, CatalogFetch, CatalogRequest, CatalogResponse, CatalogResult,
    HttpError, HttpTransport,
};

#[cfg(feature = "http")]
pub use self::http::ReqwestTransport;

// We use Crux's built-in Render and Http capabilities; geolocation is ours.
pub use crux_core::render::Render;
pub use crux_http::protocol::{HttpRequest, HttpResponse};
pub use crux_http::Http;

use crate::app::App;
use crate::event::Event;

#[derive(crux_core::macros::Effect)]
pub struct Capabilities {
    pub http: Http<Event>,
    pub render: Render<Event>,
    pub geolocation: Geolocation<Event>,
}
