//! Login and sign-out endpoints.
//!
//! Login submission order matters:
//! 1) lockout check, before anything else is evaluated
//! 2) CSRF check, which never counts as a credential attempt
//! 3) an attempt slot is taken for every lockout identifier, so concurrent
//!    submissions cannot verify more passwords than the threshold allows
//! 4) credential verification
//! 5) on success the pre-login session is replaced by a fresh one

use axum::{
    extract::{ConnectInfo, Query, State},
    http::{
        header::{CACHE_CONTROL, RETRY_AFTER, SET_COOKIE},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{Html, IntoResponse, Redirect, Response},
    Form,
};
use secrecy::SecretString;
use serde::Deserialize;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tracing::{info, instrument, warn};

use super::{
    error::GateError,
    lockout::Admission,
    page,
    safe_next,
    session::{Session, SessionId},
    GateState,
};

#[derive(Debug, Default, Deserialize)]
pub struct NextQuery {
    pub next: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub username: String,
    #[serde(default = "empty_secret", deserialize_with = "deserialize_secret_string")]
    pub password: SecretString,
    #[serde(default)]
    pub csrf_token: String,
    #[serde(default)]
    pub next: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LogoutForm {
    #[serde(default)]
    pub csrf_token: String,
}

fn empty_secret() -> SecretString {
    SecretString::from(String::new())
}

fn deserialize_secret_string<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    Ok(SecretString::from(value))
}

/// Render the login form with a token bound to `current`, starting a
/// pre-login session when there is none.
async fn login_page(
    state: &GateState,
    current: Option<(SessionId, Session)>,
    next: &str,
    status: StatusCode,
    error: Option<&str>,
) -> Result<Response, GateError> {
    let mut headers = HeaderMap::new();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));

    let session = match current {
        Some((_, session)) if session.csrf_secret.is_some() => session,
        _ => {
            let (id, session) = state.sessions.create_anonymous().await?;
            headers.insert(SET_COOKIE, state.cookies.set_session_cookie(&id)?);
            session
        }
    };
    let token = state.csrf.issue(&session).ok_or_else(|| {
        GateError::Configuration("unable to derive csrf token".to_string())
    })?;

    Ok((status, headers, Html(page::login(&token, next, error))).into_response())
}

async fn locked_out_page(
    state: &GateState,
    current: Option<(SessionId, Session)>,
    next: &str,
    retry_after: Duration,
) -> Result<Response, GateError> {
    warn!("Login attempt rejected, identifier locked out");
    let mut response = login_page(
        state,
        current,
        next,
        GateError::LockedOut { retry_after: None }.status(),
        Some(page::LOCKED_OUT),
    )
    .await?;
    response.headers_mut().insert(
        RETRY_AFTER,
        HeaderValue::from(retry_after.as_secs().max(1)),
    );
    Ok(response)
}

/// GET /login
#[instrument(skip_all)]
pub async fn login_form(
    State(state): State<Arc<GateState>>,
    headers: HeaderMap,
    Query(query): Query<NextQuery>,
) -> Result<Response, GateError> {
    let next = safe_next(query.next.as_deref());
    let current = state.current_session(&headers).await?;

    if current
        .as_ref()
        .is_some_and(|(_, session)| session.is_authenticated())
    {
        return Ok(Redirect::to(&next).into_response());
    }

    login_page(&state, current, &next, StatusCode::OK, None).await
}

/// POST /login
#[instrument(skip_all)]
pub async fn login_submit(
    State(state): State<Arc<GateState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Form(form): Form<LoginForm>,
) -> Result<Response, GateError> {
    let next = safe_next(form.next.as_deref());
    let address = state.client_address(&headers, peer.map(|ConnectInfo(addr)| addr));
    let identifiers = state
        .config
        .lockout_policy()
        .identifiers(&address, &form.username);
    let current = state.current_session(&headers).await?;

    if let Some(retry_after) = state.guard.lockout_remaining_any(&identifiers).await {
        return locked_out_page(&state, current, &next, retry_after).await;
    }

    let session = current.as_ref().map(|(_, session)| session);
    if !state.csrf.validate(session, &form.csrf_token) {
        warn!("Login attempt rejected, csrf token invalid");
        return login_page(
            &state,
            current,
            &next,
            GateError::CsrfMismatch.status(),
            Some(page::FORM_EXPIRED),
        )
        .await;
    }

    let reservations = match state.guard.admit(&identifiers).await? {
        Admission::Allowed(reservations) => reservations,
        Admission::Locked(retry_after) => {
            return locked_out_page(&state, current, &next, retry_after).await;
        }
    };

    if !state.verifier.verify(&form.username, &form.password).await {
        for reservation in &reservations {
            state.guard.record_failure(reservation).await?;
        }
        info!("Login failed");
        return login_page(
            &state,
            current,
            &next,
            GateError::InvalidCredentials.status(),
            Some(page::INVALID_CREDENTIALS),
        )
        .await;
    }

    for identifier in &identifiers {
        state.guard.record_success(identifier).await?;
    }
    if let Some((previous, _)) = current {
        state.sessions.destroy(&previous).await?;
    }
    let id = state.sessions.create(state.verifier.identity()).await?;
    let cookie = state.cookies.set_session_cookie(&id)?;
    info!("Login succeeded");

    Ok(([(SET_COOKIE, cookie)], Redirect::to(&next)).into_response())
}

/// GET /logout
pub async fn logout_form(
    State(state): State<Arc<GateState>>,
    headers: HeaderMap,
) -> Result<Response, GateError> {
    let current = state.current_session(&headers).await?;
    let Some((_, session)) = current.filter(|(_, session)| session.is_authenticated()) else {
        return Err(GateError::SessionInvalid {
            next: "/".to_string(),
        });
    };
    let token = state.csrf.issue(&session).ok_or_else(|| {
        GateError::Configuration("unable to derive csrf token".to_string())
    })?;
    Ok((
        [(CACHE_CONTROL, HeaderValue::from_static("no-store"))],
        Html(page::logout(&token)),
    )
        .into_response())
}

/// POST /logout
///
/// Signed-in sessions need a valid token. Without one this only clears the
/// cookie, so repeating it always ends the same way.
#[instrument(skip_all)]
pub async fn logout(
    State(state): State<Arc<GateState>>,
    headers: HeaderMap,
    form: Option<Form<LogoutForm>>,
) -> Result<Response, GateError> {
    let clear = state.cookies.clear_session_cookie()?;

    if let Some((id, session)) = state.current_session(&headers).await? {
        if session.is_authenticated() {
            let token = form.map(|Form(form)| form.csrf_token).unwrap_or_default();
            if !state.csrf.validate(Some(&session), &token) {
                warn!("Logout rejected, csrf token invalid");
                return Err(GateError::CsrfMismatch);
            }
        }
        state.sessions.destroy(&id).await?;
    }

    Ok(([(SET_COOKIE, clear)], Redirect::to("/login")).into_response())
}
