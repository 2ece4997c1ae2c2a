use axum::{
    extract::{Request, State},
    http::header::SET_COOKIE,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::debug;

use super::{error::GateError, GateState};

/// Let public paths through; everything else needs an authenticated session.
///
/// Store failures deny the request instead of serving the resource.
pub async fn require_session(
    State(state): State<Arc<GateState>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path();
    if state.is_public(path) {
        return next.run(request).await;
    }

    let target = request
        .uri()
        .path_and_query()
        .map_or_else(|| path.to_string(), ToString::to_string);

    let current = match state.current_session(request.headers()).await {
        Ok(current) => current,
        Err(err) => return err.into_response(),
    };

    match current {
        Some((id, session)) if session.is_authenticated() => {
            match state.sessions().refresh(&id, session).await {
                Ok(true) => next.run(request).await,
                Ok(false) => {
                    debug!("Session ended during request");
                    to_login(&state, &target, true)
                }
                Err(err) => err.into_response(),
            }
        }
        // a pre-login session stays so the login form can reuse it
        Some(_) => to_login(&state, &target, false),
        None => {
            let stale = state.cookies.read_session_id(request.headers()).is_some();
            to_login(&state, &target, stale)
        }
    }
}

fn to_login(state: &GateState, target: &str, clear_cookie: bool) -> Response {
    let redirect = GateError::SessionInvalid {
        next: target.to_string(),
    };
    if !clear_cookie {
        return redirect.into_response();
    }
    match state.cookies.clear_session_cookie() {
        Ok(cookie) => ([(SET_COOKIE, cookie)], redirect).into_response(),
        Err(err) => GateError::from(err).into_response(),
    }
}
