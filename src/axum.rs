//! Axum integration utilities.
//!
//! Both the tree route and the guard layer read the caller's [`Principal`]
//! from request extensions; an upstream authentication layer is expected to
//! insert it.

use std::future::poll_fn;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::cache::Persistence;
use crate::engine::Engine;
use crate::principal::Principal;
use crate::store::{ResourceRegistry, RuleStore};
use crate::tree::Coordinate;

use ::axum::Json;
use ::axum::Router;
use ::axum::body::Body;
use ::axum::extract::State;
use ::axum::response::{IntoResponse, Response};
use ::axum::routing::get;
use ::http::{Request, StatusCode};
use ::tower::{Layer, Service};

/// Router serving the caller's permission tree as JSON at `mount_path`.
pub fn permission_tree_router<R, S, P>(engine: Arc<Engine<R, S, P>>, mount_path: &str) -> Router
where
    R: ResourceRegistry + 'static,
    S: RuleStore + 'static,
    P: Persistence + 'static,
{
    Router::new()
        .route(mount_path, get(permission_tree_handler::<R, S, P>))
        .with_state(engine)
}

async fn permission_tree_handler<R, S, P>(
    State(engine): State<Arc<Engine<R, S, P>>>,
    request: Request<Body>,
) -> Response
where
    R: ResourceRegistry + 'static,
    S: RuleStore + 'static,
    P: Persistence + 'static,
{
    let Some(principal) = request.extensions().get::<Principal>().cloned() else {
        return (StatusCode::UNAUTHORIZED, "missing principal").into_response();
    };

    match engine.get_permissions_for_user(&principal).await {
        Ok(tree) => Json(tree).into_response(),
        Err(err) => {
            tracing::warn!(user = %principal.user_id(), error = %err, "permission tree request failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "permission tree error").into_response()
        }
    }
}

/// Middleware layer that requires one tree permission.
#[derive(Debug)]
pub struct RequirePermissionLayer<R, S, P> {
    engine: Arc<Engine<R, S, P>>,
    coordinate: Coordinate,
}

impl<R, S, P> RequirePermissionLayer<R, S, P> {
    /// Creates a new guard layer.
    pub fn new(engine: Arc<Engine<R, S, P>>, coordinate: Coordinate) -> Self {
        Self { engine, coordinate }
    }
}

impl<R, S, P> Clone for RequirePermissionLayer<R, S, P> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            coordinate: self.coordinate.clone(),
        }
    }
}

impl<R, S, P, Inner> Layer<Inner> for RequirePermissionLayer<R, S, P> {
    type Service = RequirePermissionService<Inner, R, S, P>;

    fn layer(&self, inner: Inner) -> Self::Service {
        RequirePermissionService {
            inner,
            engine: Arc::clone(&self.engine),
            coordinate: self.coordinate.clone(),
        }
    }
}

/// Middleware service that enforces a tree permission.
#[derive(Debug)]
pub struct RequirePermissionService<Inner, R, S, P> {
    inner: Inner,
    engine: Arc<Engine<R, S, P>>,
    coordinate: Coordinate,
}

impl<Inner: Clone, R, S, P> Clone for RequirePermissionService<Inner, R, S, P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            engine: Arc::clone(&self.engine),
            coordinate: self.coordinate.clone(),
        }
    }
}

impl<Inner, R, S, P> Service<Request<Body>> for RequirePermissionService<Inner, R, S, P>
where
    Inner: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    Inner::Future: Send + 'static,
    R: ResourceRegistry + 'static,
    S: RuleStore + 'static,
    P: Persistence + 'static,
{
    type Response = Response;
    type Error = Inner::Error;
    type Future = Pin<Box<dyn std::future::Future<Output = Result<Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let mut inner = self.inner.clone();
        let engine = Arc::clone(&self.engine);
        let coordinate = self.coordinate.clone();

        Box::pin(async move {
            let principal = req.extensions().get::<Principal>().cloned();
            let Some(principal) = principal else {
                return Ok((StatusCode::UNAUTHORIZED, "missing principal").into_response());
            };

            match engine
                .get_permission(
                    &principal,
                    &coordinate.resource,
                    &coordinate.operation,
                    coordinate.kind,
                )
                .await
            {
                Ok(true) => {
                    poll_fn(|cx| inner.poll_ready(cx)).await?;
                    inner.call(req).await
                }
                Ok(false) => Ok((StatusCode::FORBIDDEN, "forbidden").into_response()),
                Err(err) => {
                    tracing::warn!(user = %principal.user_id(), error = %err, "permission check failed");
                    Ok((StatusCode::INTERNAL_SERVER_ERROR, "permission error").into_response())
                }
            }
        })
    }
}
