//! HTTP surface of the Parrot API.
//!
//! # Pipeline
//!
//! Every request passes these stages in order, outermost first:
//!
//! 1. request id (`x-request-id`, generated unless supplied, echoed back)
//! 2. client address resolution
//! 3. access logging
//! 4. panic recovery
//! 5. request deadline (408, reported through the error envelope)
//! 6. trailing slash trimming
//! 7. JSON content-type enforcement (415)
//!
//! Stages 1-7 wrap the router itself, so they run before route matching.
//! Below the router, `/api/users/*` and `/api/projects/*` authenticate the
//! bearer token, and project routes check a capability before the handler.

pub mod extract;
mod handlers;
pub mod middleware;

use axum::{
    body::Body,
    error_handling::HandleErrorLayer,
    extract::Request,
    response::Response,
    routing::{delete, get, patch, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::{convert::Infallible, sync::Arc, time::Duration};
use tower::{timeout::TimeoutLayer, util::BoxCloneService, ServiceBuilder};
use tower_http::{
    normalize_path::NormalizePathLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
};

use crate::db::Store;
use crate::middleware::{
    AccessLogLayer, AuthLayer, ClientAddrLayer, RecoverLayer, TokenIntrospector,
};
use crate::rbac::{policy::DEFAULT_LOOKUP_TIMEOUT, Capability, Guard};

// ═══════════════════════════════════════════════════════════════════════════════
// State
// ═══════════════════════════════════════════════════════════════════════════════

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub introspector: Arc<dyn TokenIntrospector>,
    pub lookup_timeout: Duration,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, introspector: Arc<dyn TokenIntrospector>) -> Self {
        Self {
            store,
            introspector,
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
        }
    }

    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    /// Capability guard over this state's store.
    pub fn guard(&self) -> Guard {
        Guard::new(self.store.clone(), self.lookup_timeout)
    }
}

/// Standard success envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Router
// ═══════════════════════════════════════════════════════════════════════════════

/// Build the API router.
///
/// # Endpoints
///
/// ## Public
/// - `GET /api/ping`
/// - `POST /api/auth/register`
///
/// ## Authenticated
/// - `GET /api/users/self`
/// - `GET /api/projects`, `POST /api/projects`
///
/// ## Capability guarded (`/api/projects/:project_id/...`)
/// - project: view-project, delete-project, update-project (keys)
/// - users: view-project-roles, assign-roles, update-roles, revoke-roles
/// - clients: manage-api-clients
/// - locales: view-locales, create-locales, update-locales, delete-locales
pub fn build_router(state: AppState) -> Router {
    let guard = state.guard();

    let public = Router::new()
        .route("/ping", get(handlers::ping))
        .route("/auth/register", post(handlers::register));

    let authenticated = Router::new()
        .route("/users/self", get(handlers::current_user))
        .route("/projects", get(handlers::list_projects))
        .route("/projects", post(handlers::create_project))
        .merge(project_router(&guard))
        .route_layer(AuthLayer::new(state.introspector.clone()));

    Router::new()
        .nest("/api", public.merge(authenticated))
        .method_not_allowed_fallback(handlers::method_not_allowed)
        .fallback(handlers::not_found)
        .with_state(state)
}

/// Routes scoped to one project; every handler sits behind the guard.
fn project_router(guard: &Guard) -> Router<AppState> {
    Router::new()
        .route(
            "/projects/:project_id",
            guard.must(Capability::ViewProject, get(handlers::show_project)),
        )
        .route(
            "/projects/:project_id",
            guard.must(Capability::DeleteProject, delete(handlers::delete_project)),
        )
        // Keys
        .route(
            "/projects/:project_id/keys",
            guard.must(Capability::UpdateProject, post(handlers::add_project_key)),
        )
        .route(
            "/projects/:project_id/keys",
            guard.must(Capability::UpdateProject, patch(handlers::rename_project_key)),
        )
        .route(
            "/projects/:project_id/keys",
            guard.must(Capability::UpdateProject, delete(handlers::delete_project_key)),
        )
        // Users
        .route(
            "/projects/:project_id/users",
            guard.must(Capability::ViewProjectRoles, get(handlers::list_project_users)),
        )
        .route(
            "/projects/:project_id/users",
            guard.must(Capability::AssignRoles, post(handlers::assign_project_user)),
        )
        .route(
            "/projects/:project_id/users/:user_id/role",
            guard.must(Capability::UpdateRoles, patch(handlers::update_project_user_role)),
        )
        .route(
            "/projects/:project_id/users/:user_id",
            guard.must(Capability::RevokeRoles, delete(handlers::revoke_project_user)),
        )
        // Clients
        .route(
            "/projects/:project_id/clients",
            guard.must(
                Capability::ManageApiClients,
                get(handlers::list_project_clients).post(handlers::create_project_client),
            ),
        )
        .route(
            "/projects/:project_id/clients/:client_id",
            guard.must(
                Capability::ManageApiClients,
                get(handlers::show_project_client).delete(handlers::delete_project_client),
            ),
        )
        .route(
            "/projects/:project_id/clients/:client_id/resetSecret",
            guard.must(Capability::ManageApiClients, patch(handlers::reset_project_client_secret)),
        )
        .route(
            "/projects/:project_id/clients/:client_id/name",
            guard.must(Capability::ManageApiClients, patch(handlers::rename_project_client)),
        )
        // Locales
        .route(
            "/projects/:project_id/locales",
            guard.must(Capability::ViewLocales, get(handlers::list_locales)),
        )
        .route(
            "/projects/:project_id/locales",
            guard.must(Capability::CreateLocales, post(handlers::create_locale)),
        )
        .route(
            "/projects/:project_id/locales/:ident",
            guard.must(Capability::ViewLocales, get(handlers::show_locale)),
        )
        .route(
            "/projects/:project_id/locales/:ident",
            guard.must(Capability::DeleteLocales, delete(handlers::delete_locale)),
        )
        .route(
            "/projects/:project_id/locales/:ident/pairs",
            guard.must(Capability::UpdateLocales, patch(handlers::update_locale_pairs)),
        )
}

// ═══════════════════════════════════════════════════════════════════════════════
// Pipeline
// ═══════════════════════════════════════════════════════════════════════════════

/// The fully assembled service, ready to be served.
pub type App = BoxCloneService<Request<Body>, Response, Infallible>;

/// Settings for the pre-routing stages.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub request_timeout: Duration,
    pub trust_proxy_headers: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            trust_proxy_headers: false,
        }
    }
}

/// Wrap `router` in the global pipeline.
///
/// Taking any router keeps the pipeline testable with stub handlers.
pub fn build_pipeline(router: Router, config: &PipelineConfig, access_log: AccessLogLayer) -> App {
    let service = ServiceBuilder::new()
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(ClientAddrLayer::new(config.trust_proxy_headers))
        .layer(access_log)
        .layer(RecoverLayer::new())
        .layer(HandleErrorLayer::<_, ()>::new(middleware::handle_timeout_error))
        .layer(TimeoutLayer::new(config.request_timeout))
        .layer(NormalizePathLayer::trim_trailing_slash())
        .layer(axum::middleware::from_fn(middleware::enforce_json_content_type))
        .service(router);

    BoxCloneService::new(service)
}

/// Router plus pipeline for `state`.
pub fn build_app(state: AppState, config: &PipelineConfig, access_log: AccessLogLayer) -> App {
    build_pipeline(build_router(state), config, access_log)
}
