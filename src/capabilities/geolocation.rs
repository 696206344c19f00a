use async_trait::async_trait;
use crux_core::capability::{Capability, CapabilityContext, Operation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event::{Coordinate, CoordinateError};

/// Asks the shell for the device position. The shell owns the permission
/// prompt; the core only sees the outcome.
#[derive(Clone)]
pub struct Geolocation<Ev> {
    context: CapabilityContext<GeolocationOperation, Ev>,
}

impl<Ev> Capability<Ev> for Geolocation<Ev> {
    type Operation = GeolocationOperation;
    type MappedSelf<MappedEv> = Geolocation<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static,
    {
        Geolocation::new(self.context.map_event(f))
    }
}

impl<Ev> Geolocation<Ev>
where
    Ev: 'static,
{
    pub fn new(context: CapabilityContext<GeolocationOperation, Ev>) -> Self {
        Self { context }
    }

    pub fn current_position<F>(&self, make_event: F)
    where
        F: FnOnce(GeolocationResult) -> Ev + Send + 'static,
        Ev: Send,
    {
        let ctx = self.context.clone();
        self.context.spawn(async move {
            let result = ctx
                .request_from_shell(GeolocationOperation::CurrentPosition)
                .await;
            ctx.update_app(make_event(result));
        });
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum GeolocationOperation {
    CurrentPosition,
}

impl Operation for GeolocationOperation {
    type Output = GeolocationResult;
}

/// Position as reported by the platform, before validation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

impl Position {
    pub fn coordinate(self) -> Result<Coordinate, CoordinateError> {
        Coordinate::new(self.latitude, self.longitude)
    }
}

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum GeolocationError {
    #[error("geolocation is not supported by this platform")]
    Unsupported,

    #[error("location permission denied")]
    PermissionDenied,

    #[error("position unavailable: {reason}")]
    Unavailable { reason: String },
}

pub type GeolocationResult = Result<Position, GeolocationError>;

/// Where the headless shell gets positions from.
#[async_trait]
pub trait LocationSource: Send + Sync {
    async fn current_position(&self) -> GeolocationResult;
}

/// A location source with a predetermined answer, for headless shells
/// and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct FixedLocation(GeolocationResult);

impl FixedLocation {
    #[must_use]
    pub const fn granted(latitude: f64, longitude: f64) -> Self {
        Self(Ok(Position {
            latitude,
            longitude,
        }))
    }

    #[must_use]
    pub const fn denied() -> Self {
        Self(Err(GeolocationError::PermissionDenied))
    }

    #[must_use]
    pub const fn unsupported() -> Self {
        Self(Err(GeolocationError::Unsupported))
    }
}

#[async_trait]
impl LocationSource for FixedLocation {
    async fn current_position(&self) -> GeolocationResult {
        self.0.clone()
    }
}
