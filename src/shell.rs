//! Headless shell: drives the Crux core, executes its effects on the Tokio
//! runtime and resolves their requests as the sources answer.
//!
//! Effects resolve in whatever order their sources answer. The core's
//! sequence numbers decide which catalog responses are applied, so the shell
//! never reorders or cancels anything itself.

use std::future::Future;
use std::sync::Arc;

use crux_core::Request;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};
use url::Url;

use crate::capabilities::{
    GeolocationError, GeolocationOperation, GeolocationResult, HttpError, HttpRequest,
    HttpResponse, HttpTransport, LocationSource,
};
use crate::{App, Effect, Event, ShellError, ViewModel};

/// A finished effect, paired with the request it answers.
enum Completion {
    Http(Request<HttpRequest>, HttpResponse),
    Geolocation(Request<GeolocationOperation>, GeolocationResult),
}

pub struct Core {
    core: crux_core::Core<Effect, App>,
    transport: Arc<dyn HttpTransport>,
    location: Arc<dyn LocationSource>,
    api_url: Url,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
    in_flight: usize,
    view_tx: watch::Sender<ViewModel>,
}

impl Core {
    #[must_use]
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        location: Arc<dyn LocationSource>,
        api_url: Url,
    ) -> Self {
        let core = crux_core::Core::new::<crate::capabilities::Capabilities>();
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let (view_tx, _) = watch::channel(core.view());

        Self {
            core,
            transport,
            location,
            api_url,
            completions_tx,
            completions_rx,
            in_flight: 0,
            view_tx,
        }
    }

    /// A core talking to the catalog API configured from the environment.
    #[cfg(feature = "http")]
    pub fn from_env(location: Arc<dyn LocationSource>) -> Result<Self, crate::AppError> {
        let config = crate::config::CatalogConfig::from_env()?;
        let transport = crate::capabilities::ReqwestTransport::new(&config)?;
        Ok(Self::new(Arc::new(transport), location, config.api_url))
    }

    /// Mounts the view against the configured API.
    pub fn initialize(&mut self) {
        let api_url = Box::new(self.api_url.clone());
        self.dispatch(Event::Initialize { api_url });
    }

    /// Applies `event` and starts every effect it requested.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn dispatch(&mut self, event: Event) {
        trace!(event = event.name(), "dispatch");
        let effects = self.core.process_event(event);
        self.run(effects);
    }

    fn run(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Render(_) => {
                    self.view_tx.send_replace(self.core.view());
                }
                Effect::Http(request) => {
                    let transport = Arc::clone(&self.transport);
                    let operation = request.operation.clone();
                    debug!(url = %operation.url, "http request started");

                    self.spawn(
                        async move {
                            transport
                                .execute(&operation)
                                .await
                                .unwrap_or_else(|e| e.gateway_response())
                        },
                        move |outcome| {
                            let response = outcome.unwrap_or_else(|reason| {
                                HttpError::Network(reason).gateway_response()
                            });
                            Completion::Http(request, response)
                        },
                    );
                }
                Effect::Geolocation(request) => {
                    let location = Arc::clone(&self.location);
                    debug!("location request started");

                    self.spawn(
                        async move { location.current_position().await },
                        move |outcome| {
                            let result = outcome.unwrap_or_else(|reason| {
                                Err(GeolocationError::Unavailable { reason })
                            });
                            Completion::Geolocation(request, result)
                        },
                    );
                }
            }
        }
    }

    /// Runs `work` on its own task. Exactly one completion is sent per call;
    /// a task that panics or is cancelled completes with its join error.
    fn spawn<T, W, C>(&mut self, work: W, complete: C)
    where
        T: Send + 'static,
        W: Future<Output = T> + Send + 'static,
        C: FnOnce(Result<T, String>) -> Completion + Send + 'static,
    {
        let tx = self.completions_tx.clone();
        self.in_flight += 1;

        tokio::spawn(async move {
            let outcome = tokio::spawn(work).await.map_err(|e| {
                warn!(error = %e, "effect task failed");
                format!("effect task failed: {e}")
            });
            // The receiver lives as long as the core; a send error means it is gone.
            let _ = tx.send(complete(outcome));
        });
    }

    /// Waits for the next effect to complete and resolves its request.
    pub async fn next_completion(&mut self) -> Result<(), ShellError> {
        if self.in_flight == 0 {
            return Err(ShellError::Idle);
        }

        let completion = self
            .completions_rx
            .recv()
            .await
            .ok_or(ShellError::ChannelClosed)?;
        self.in_flight -= 1;

        let effects = match completion {
            Completion::Http(mut request, response) => {
                debug!(status = response.status, "http request finished");
                self.core.resolve(&mut request, crux_http::protocol::HttpResult::Ok(response))
            }
            Completion::Geolocation(mut request, result) => {
                debug!(granted = result.is_ok(), "location request finished");
                self.core.resolve(&mut request, result)
            }
        };
        self.run(effects);
        Ok(())
    }

    /// Processes completions until no effect is outstanding, including
    /// effects started by the completions themselves.
    pub async fn settle(&mut self) -> Result<(), ShellError> {
        while self.in_flight > 0 {
            self.next_completion().await?;
        }
        Ok(())
    }

    #[must_use]
    pub fn view(&self) -> ViewModel {
        self.core.view()
    }

    /// Receives a fresh view model on every render.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ViewModel> {
        self.view_tx.subscribe()
    }

    #[must_use]
    pub const fn in_flight(&self) -> usize {
        self.in_flight
    }
}
