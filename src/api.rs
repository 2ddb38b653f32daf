use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{Path, Query},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, MethodRouter},
    Extension, Json, Router,
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, instrument, warn};

use crate::{
    flow::FlowCoordinator,
    oauth::{CallbackParams, Provider},
    status::{self, StatusError, StatusStore},
    API_ROUTE_PREFIX,
};

pub fn router<P: Provider>(
    flow: Arc<FlowCoordinator<P>>,
    status: Arc<StatusStore>,
) -> Result<Router> {
    Ok(Router::new()
        .route("/login", get(login_handler::<P>))
        .route("/logout", get(logout_handler::<P>))
        .route("/callback", get(callback_handler::<P>))
        .route("/me", get(me_handler::<P>))
        .route("/status", get(status_handler))
        .route("/status/:key", UpdateStatus::route::<P>())
        .layer(Extension(flow))
        .layer(Extension(status)))
}

/// A bare `302 Found`. axum's `Redirect` only offers 303/307/308.
fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

fn message(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "message": message }))).into_response()
}

fn unexpected() -> Response {
    message(StatusCode::INTERNAL_SERVER_ERROR, "unexpected error")
}

#[instrument(skip_all, name = "login")]
async fn login_handler<P: Provider>(
    jar: CookieJar,
    Extension(flow): Extension<Arc<FlowCoordinator<P>>>,
) -> Response {
    match flow.start_login(jar).await {
        Ok((jar, url)) => (jar, found(&url)).into_response(),
        Err(e) => {
            error!("{}", e);
            unexpected()
        }
    }
}

#[instrument(skip_all, name = "logout")]
async fn logout_handler<P: Provider>(
    jar: CookieJar,
    Extension(flow): Extension<Arc<FlowCoordinator<P>>>,
) -> Response {
    (flow.logout(jar).await, found("/")).into_response()
}

#[instrument(skip_all, name = "callback")]
async fn callback_handler<P: Provider>(
    jar: CookieJar,
    Query(params): Query<CallbackParams>,
    Extension(flow): Extension<Arc<FlowCoordinator<P>>>,
) -> Response {
    match flow.handle_callback(jar, params).await {
        Ok(jar) => (jar, found("/")).into_response(),
        Err(e) if e.is_protocol_violation() => {
            error!("{}", e);
            unexpected()
        }
        Err(e) => {
            warn!("{}", e);
            message(StatusCode::UNAUTHORIZED, "login failed")
        }
    }
}

#[instrument(skip_all, name = "me")]
async fn me_handler<P: Provider>(
    jar: CookieJar,
    Extension(flow): Extension<Arc<FlowCoordinator<P>>>,
) -> Response {
    match flow.resolve_identity(jar).await {
        (jar, Ok(identity)) => (jar, Json(identity)).into_response(),
        (jar, Err(failure)) => {
            (jar, message(StatusCode::UNAUTHORIZED, failure.message())).into_response()
        }
    }
}

#[instrument(skip_all, name = "status")]
async fn status_handler(Extension(store): Extension<Arc<StatusStore>>) -> Response {
    match store.read().await {
        Ok(record) => Json(record).into_response(),
        Err(e) => {
            error!("{}", e);
            unexpected()
        }
    }
}

#[derive(Debug, Deserialize)]
struct UpdateStatus {
    key: String,
}

#[derive(Debug, Default, Deserialize)]
struct UpdateParams {
    /// RFC 3339 time to record. Defaults to now.
    timestamp: Option<String>,
}

impl UpdateStatus {
    pub fn route<P: Provider>() -> MethodRouter {
        get(Self::handler::<P>).post(Self::handler::<P>)
    }

    /// Shared by GET (link-style, answers with redirects) and POST (API-style, answers with JSON).
    /// An unauthenticated POST is answered with an empty 204 and changes nothing.
    #[instrument(skip_all, name = "update_status")]
    async fn handler<P: Provider>(
        method: Method,
        Path(params): Path<Self>,
        Query(query): Query<UpdateParams>,
        jar: CookieJar,
        Extension(flow): Extension<Arc<FlowCoordinator<P>>>,
        Extension(store): Extension<Arc<StatusStore>>,
    ) -> Response {
        let is_post = method == Method::POST;

        let (jar, identity) = flow.resolve_identity(jar).await;
        if identity.is_err() {
            return if is_post {
                (jar, StatusCode::NO_CONTENT).into_response()
            } else {
                (jar, found(&format!("{API_ROUTE_PREFIX}/login"))).into_response()
            };
        }

        // Unknown keys are reported before a bad timestamp.
        match store.has_key(&params.key).await {
            Ok(true) => {}
            Ok(false) => {
                return (jar, message(StatusCode::BAD_REQUEST, "invalid key")).into_response()
            }
            Err(e) => {
                error!("{}", e);
                return (jar, unexpected()).into_response();
            }
        }

        let timestamp = match query.timestamp {
            Some(t) if chrono::DateTime::parse_from_rfc3339(&t).is_ok() => t,
            Some(_) => {
                return (jar, message(StatusCode::BAD_REQUEST, "invalid timestamp"))
                    .into_response()
            }
            None => status::now_timestamp(),
        };

        match store.update(&params.key, &timestamp).await {
            Ok(record) if is_post => (jar, Json(record)).into_response(),
            Ok(_) => (jar, found("/")).into_response(),
            Err(StatusError::InvalidKey(_)) => {
                (jar, message(StatusCode::BAD_REQUEST, "invalid key")).into_response()
            }
            Err(e) => {
                error!("{}", e);
                (jar, unexpected()).into_response()
            }
        }
    }
}
