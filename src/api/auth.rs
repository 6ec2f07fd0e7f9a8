//! Cookie sessions and role-gated extractors

use std::sync::Arc;

use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, request::Parts},
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::{Cookie, SameSite, SignedCookieJar};

use super::ApiState;
use super::error::{ApiError, PageError};
use crate::Result;
use crate::db::{Role, User};

/// Name of the session cookie
pub const SESSION_COOKIE: &str = "family_session";

/// Signed cookie jar built with the server's key
pub struct Cookies(pub SignedCookieJar);

impl FromRequestParts<Arc<ApiState>> for Cookies {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<ApiState>,
    ) -> std::result::Result<Self, Self::Rejection> {
        Ok(Self(jar_from_headers(state, &parts.headers)))
    }
}

fn jar_from_headers(state: &ApiState, headers: &HeaderMap) -> SignedCookieJar {
    SignedCookieJar::from_headers(headers, state.cookie_key.clone())
}

fn session_cookie(token: String) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}

/// Resolve the logged-in user from request headers
///
/// Expired sessions and deactivated accounts count as logged out.
///
/// # Errors
///
/// Returns error if database operation fails
pub fn user_from_headers(state: &ApiState, headers: &HeaderMap) -> Result<Option<User>> {
    let jar = jar_from_headers(state, headers);
    let Some(cookie) = jar.get(SESSION_COOKIE) else {
        return Ok(None);
    };

    let Some(session) = state.sessions.find_active(cookie.value())? else {
        return Ok(None);
    };

    match state.users.find(&session.user_id)? {
        Some(user) if user.is_active => Ok(Some(user)),
        Some(user) => {
            tracing::debug!(user_id = %user.id, "inactive user presented a session");
            Ok(None)
        }
        None => Ok(None),
    }
}

/// Start a session for a user and attach its cookie
///
/// With `remember`, the cookie outlives the browser session and the server
/// keeps the session for the longer remember-me period.
///
/// # Errors
///
/// Returns error if database operation fails
pub fn start_session(
    state: &ApiState,
    jar: SignedCookieJar,
    user: &User,
    remember: bool,
) -> Result<SignedCookieJar> {
    let ttl = if remember {
        state.session_ttl.remember
    } else {
        state.session_ttl.standard
    };
    let session = state.sessions.create(&user.id, ttl)?;

    let mut cookie = session_cookie(session.id);
    if remember {
        cookie.make_permanent();
    }

    tracing::info!(user_id = %user.id, remember, "user logged in");
    Ok(jar.add(cookie))
}

/// End the current session, if any, and clear its cookie
///
/// # Errors
///
/// Returns error if database operation fails
pub fn end_session(state: &ApiState, jar: SignedCookieJar) -> Result<SignedCookieJar> {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        state.sessions.delete(cookie.value())?;
    }
    Ok(jar.remove(session_cookie(String::new())))
}

/// The logged-in user, if any
pub struct MaybeUser(pub Option<User>);

impl FromRequestParts<Arc<ApiState>> for MaybeUser {
    type Rejection = PageError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<ApiState>,
    ) -> std::result::Result<Self, Self::Rejection> {
        Ok(Self(user_from_headers(state, &parts.headers)?))
    }
}

/// A logged-in user; pages redirect to `/login` otherwise
pub struct CurrentUser(pub User);

impl FromRequestParts<Arc<ApiState>> for CurrentUser {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<ApiState>,
    ) -> std::result::Result<Self, Self::Rejection> {
        match user_from_headers(state, &parts.headers) {
            Ok(Some(user)) => Ok(Self(user)),
            Ok(None) => Err(Redirect::to("/login").into_response()),
            Err(e) => Err(PageError(e).into_response()),
        }
    }
}

async fn page_user_with_role(
    parts: &mut Parts,
    state: &Arc<ApiState>,
    role: Role,
) -> std::result::Result<User, Response> {
    let CurrentUser(user) = CurrentUser::from_request_parts(parts, state).await?;
    if user.role == role {
        Ok(user)
    } else {
        tracing::debug!(user_id = %user.id, required = %role, "wrong role for page");
        Err(Redirect::to("/").into_response())
    }
}

/// A logged-in parent; other roles are sent home
pub struct ParentUser(pub User);

impl FromRequestParts<Arc<ApiState>> for ParentUser {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<ApiState>,
    ) -> std::result::Result<Self, Self::Rejection> {
        page_user_with_role(parts, state, Role::Parent)
            .await
            .map(Self)
    }
}

/// A logged-in child account; other roles are sent home
pub struct ChildUser(pub User);

impl FromRequestParts<Arc<ApiState>> for ChildUser {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<ApiState>,
    ) -> std::result::Result<Self, Self::Rejection> {
        page_user_with_role(parts, state, Role::Child)
            .await
            .map(Self)
    }
}

/// A logged-in user for JSON endpoints; 401 otherwise
pub struct ApiUser(pub User);

impl ApiUser {
    /// Require a role, answering 403 otherwise
    ///
    /// # Errors
    ///
    /// Returns a 403 `ApiError` when the role does not match
    pub fn require(self, role: Role) -> std::result::Result<User, ApiError> {
        if self.0.role == role {
            Ok(self.0)
        } else {
            tracing::debug!(user_id = %self.0.id, required = %role, "wrong role for endpoint");
            Err(ApiError::forbidden())
        }
    }
}

impl FromRequestParts<Arc<ApiState>> for ApiUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<ApiState>,
    ) -> std::result::Result<Self, Self::Rejection> {
        user_from_headers(state, &parts.headers)?
            .map(Self)
            .ok_or_else(ApiError::unauthorized)
    }
}
