//! Application context: session → fetch → decode → render.
//!
//! [`HeatmapApp`] owns the session, the activity source and the layer
//! settings for one run. Nothing is global; a new authorization replaces the
//! session's credential inside the same context.

use std::fmt;

use async_trait::async_trait;
use log::{info, warn};

use crate::activity::{aggregate_activities, Activity};
use crate::error::{HeatmapError, Result};
use crate::heatmap::{HeatLayer, HeatmapConfig, HeatmapRenderer, MapView, TileLayerConfig};
use crate::session::{Credential, SessionManager, TokenEndpoint};
use crate::store::CredentialStore;

/// Lists the athlete's activities.
///
/// An expired or revoked access token must be reported as
/// [`HeatmapError::Unauthorized`].
#[async_trait(?Send)]
pub trait ActivitySource {
    async fn fetch_activities(&self, credential: &Credential) -> Result<Vec<Activity>>;
}

/// User-visible outcome of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    /// No stored credential and no authorization code.
    NotAuthorized,
    /// Running on a stored credential.
    AuthorizedCached,
    /// Running on a credential from a fresh code exchange.
    AuthorizedFresh,
    Error(String),
}

impl Status {
    pub fn is_authorized(&self) -> bool {
        matches!(self, Status::AuthorizedCached | Status::AuthorizedFresh)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::NotAuthorized => write!(f, "Not authorized with Strava"),
            Status::AuthorizedCached => write!(f, "Using saved Strava token"),
            Status::AuthorizedFresh => write!(f, "Authorized with Strava"),
            Status::Error(message) => write!(f, "Error: {}", message),
        }
    }
}

impl From<&HeatmapError> for Status {
    fn from(e: &HeatmapError) -> Self {
        Status::Error(e.to_string())
    }
}

/// One heatmap client: session, activity source and layer settings.
pub struct HeatmapApp<T, S, A> {
    session: SessionManager<T, S>,
    source: A,
    heatmap: HeatmapConfig,
    tiles: TileLayerConfig,
    view: MapView,
    status: Status,
}

impl<T, S, A> HeatmapApp<T, S, A>
where
    T: TokenEndpoint,
    S: CredentialStore,
    A: ActivitySource,
{
    pub fn new(endpoint: T, store: S, source: A) -> Self {
        Self {
            session: SessionManager::new(endpoint, store),
            source,
            heatmap: HeatmapConfig::default(),
            tiles: TileLayerConfig::default(),
            view: MapView::default(),
            status: Status::NotAuthorized,
        }
    }

    /// Replace the default layer settings.
    pub fn with_layer(mut self, heatmap: HeatmapConfig, tiles: TileLayerConfig, view: MapView) -> Self {
        self.heatmap = heatmap;
        self.tiles = tiles;
        self.view = view;
        self
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    pub fn session(&self) -> &SessionManager<T, S> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut SessionManager<T, S> {
        &mut self.session
    }

    pub fn source(&self) -> &A {
        &self.source
    }

    /// Establish a credential.
    ///
    /// An authorization code wins over a stored credential. With neither,
    /// the app rests in [`Status::NotAuthorized`].
    pub async fn authenticate(&mut self, code: Option<&str>) -> &Status {
        self.status = match code.filter(|c| !c.is_empty()) {
            Some(code) => match self.session.exchange_code(code).await {
                Ok(_) => Status::AuthorizedFresh,
                Err(e) => {
                    warn!("[HeatmapApp] Authorization failed: {}", e);
                    Status::from(&e)
                }
            },
            None => match self.session.restore() {
                Ok(true) => Status::AuthorizedCached,
                Ok(false) => Status::NotAuthorized,
                Err(e) => {
                    warn!("[HeatmapApp] Could not read stored credential: {}", e);
                    Status::from(&e)
                }
            },
        };
        info!("[HeatmapApp] {}", self.status);
        &self.status
    }

    /// Fetch activities with the current credential and build the layer.
    ///
    /// A 401 triggers one refresh and one retry inside the session.
    pub async fn load_layer(&mut self) -> Result<HeatLayer> {
        let source = &self.source;
        let activities = self
            .session
            .with_credential(move |credential| async move {
                source.fetch_activities(&credential).await
            })
            .await?;

        let aggregate = aggregate_activities(&activities);
        let view = self.view.centered_on(&aggregate.points);
        Ok(HeatLayer::new(aggregate.points, &self.heatmap, self.tiles.clone(), view))
    }

    /// Authenticate, fetch, aggregate and render. Every failure ends up in
    /// the returned status; nothing propagates.
    pub async fn run<R: HeatmapRenderer>(&mut self, code: Option<&str>, renderer: &mut R) -> Status {
        if !self.authenticate(code).await.is_authorized() {
            return self.status.clone();
        }

        let outcome = match self.load_layer().await {
            Ok(layer) => {
                info!(
                    "[HeatmapApp] Rendering {} points ({} cells)",
                    layer.points.len(),
                    layer.density.cells.len()
                );
                renderer.render(&layer)
            }
            Err(e) => Err(e),
        };

        if let Err(e) = outcome {
            warn!("[HeatmapApp] Heatmap failed: {}", e);
            self.status = Status::from(&e);
        }
        self.status.clone()
    }
}
