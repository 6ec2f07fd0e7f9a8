//! Server-rendered pages and their form handlers

use std::sync::Arc;

use askama::Template;
use axum::{
    Form, Router,
    extract::{FromRequest, Path, Request, State},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use axum_extra::extract::cookie::SignedCookieJar;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::ApiState;
use super::auth::{ChildUser, Cookies, MaybeUser, ParentUser, end_session, start_session};
use super::children::fences_containing;
use super::error::PageError;
use super::flash::{self, Flash, Level};
use crate::db::user::{normalize_email, validate_email};
use crate::db::{Alert, AlertKind, Child, GeofenceRecord, NewGeofence, Role, User};
use crate::security::{PairingOutcome, hash_password, validate_new_password, verify_password};
use crate::{Error, Result};

/// Alerts shown on the dashboard
const DASHBOARD_ALERTS: usize = 10;

/// Alerts shown on a child's profile
const PROFILE_ALERTS: usize = 25;

type PageResult = std::result::Result<Response, PageError>;

/// Values every page layout needs
pub struct PageContext {
    pub user_email: Option<String>,
    pub dashboard: Option<&'static str>,
    pub flashes: Vec<Flash>,
}

/// Take pending flashes and describe the viewer
fn page_context(jar: SignedCookieJar, user: Option<&User>) -> (SignedCookieJar, PageContext) {
    let (jar, flashes) = flash::take(jar);
    let page = PageContext {
        user_email: user.map(|u| u.email.clone()),
        dashboard: user.map(|u| u.role.dashboard_path()),
        flashes,
    };
    (jar, page)
}

fn render(jar: SignedCookieJar, template: &impl Template) -> PageResult {
    let body = template.render()?;
    Ok((jar, Html(body)).into_response())
}

fn redirect_with(jar: SignedCookieJar, level: Level, message: impl Into<String>, to: &str) -> Response {
    (flash::push(jar, level, message), Redirect::to(to)).into_response()
}

/// Run CPU-heavy work (bcrypt) off the async workers
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(std::io::Error::from)?
}

/// Form body extractor; undecodable submissions are flashed and sent back to the form
pub struct PageForm<T>(pub T);

impl<T> FromRequest<Arc<ApiState>> for PageForm<T>
where
    T: DeserializeOwned,
{
    type Rejection = Response;

    async fn from_request(
        req: Request,
        state: &Arc<ApiState>,
    ) -> std::result::Result<Self, Self::Rejection> {
        let back = form_page(req.uri().path()).to_string();
        let jar = SignedCookieJar::from_headers(req.headers(), state.cookie_key.clone());

        match Form::<T>::from_request(req, state).await {
            Ok(Form(value)) => Ok(Self(value)),
            Err(rejection) => {
                tracing::debug!(error = %rejection.body_text(), path = %back, "rejected form body");
                Err(redirect_with(jar, Level::Danger, "Invalid form submission.", &back))
            }
        }
    }
}

/// Page holding the form that posts to `path`
fn form_page(path: &str) -> &str {
    match path {
        "/pair_device" | "/child_register" => "/child_dashboard",
        other => other,
    }
}

/// Display model for a child
pub struct ChildView {
    pub id: String,
    pub name: String,
    pub status: &'static str,
    pub pairing_code: Option<String>,
    pub location: String,
    pub map_url: Option<String>,
    pub battery: String,
    pub low_battery: bool,
    pub last_seen: String,
    pub inside: String,
}

impl ChildView {
    fn new(child: &Child, fences: &[GeofenceRecord], low_battery_threshold: f64) -> Self {
        let position = child.position();

        let status = match (&child.parent_id, &child.user_id) {
            (Some(_), Some(_)) => "Paired",
            (None, _) => "Waiting for parent",
            (_, None) => "Waiting for device",
        };

        Self {
            id: child.id.clone(),
            name: child.name.clone(),
            status,
            pairing_code: child.pairing_code.clone(),
            location: position
                .map_or_else(|| "Unknown".to_string(), |p| p.to_string()),
            map_url: position.map(|p| {
                format!(
                    "https://www.openstreetmap.org/?mlat={lat}&mlon={lon}#map=16/{lat}/{lon}",
                    lat = p.latitude,
                    lon = p.longitude
                )
            }),
            battery: child
                .battery_level
                .map_or_else(|| "Unknown".to_string(), |b| format!("{b:.0}%")),
            low_battery: child
                .battery_level
                .is_some_and(|b| b < low_battery_threshold),
            last_seen: child.last_seen_at.map_or_else(
                || "Never".to_string(),
                |t| t.format("%Y-%m-%d %H:%M UTC").to_string(),
            ),
            inside: fences_containing(fences, position.as_ref()).join(", "),
        }
    }
}

/// Display model for an alert
pub struct AlertView {
    pub id: String,
    pub child_name: String,
    pub kind: &'static str,
    pub message: String,
    pub created_at: String,
    pub acknowledged: bool,
}

impl From<Alert> for AlertView {
    fn from(alert: Alert) -> Self {
        Self {
            id: alert.id,
            child_name: alert.child_name,
            kind: match alert.kind {
                AlertKind::Enter => "Arrived",
                AlertKind::Exit => "Left",
                AlertKind::LowBattery => "Low battery",
            },
            message: alert.message,
            created_at: alert.created_at.format("%Y-%m-%d %H:%M UTC").to_string(),
            acknowledged: alert.acknowledged,
        }
    }
}

/// Display model for a geofence
pub struct GeofenceView {
    pub id: String,
    pub name: String,
    pub center: String,
    pub radius: String,
    pub inside: bool,
}

impl GeofenceView {
    fn new(record: &GeofenceRecord, child: &Child) -> Self {
        let inside = child
            .position()
            .zip(record.fence())
            .is_some_and(|(p, f)| f.contains(&p));
        Self {
            id: record.id.clone(),
            name: record.name.clone(),
            center: format!("{:.5}, {:.5}", record.latitude, record.longitude),
            radius: format!("{:.0} m", record.radius),
            inside,
        }
    }
}

#[derive(Template)]
#[template(path = "home.html")]
struct HomeTemplate {
    page: PageContext,
}

#[derive(Template)]
#[template(path = "signup.html")]
struct SignupTemplate {
    page: PageContext,
}

#[derive(Template)]
#[template(path = "login.html")]
struct LoginTemplate {
    page: PageContext,
}

#[derive(Template)]
#[template(path = "parent_dashboard.html")]
struct ParentDashboardTemplate {
    page: PageContext,
    children: Vec<ChildView>,
    alerts: Vec<AlertView>,
    unacknowledged: usize,
}

#[derive(Template)]
#[template(path = "child_dashboard.html")]
struct ChildDashboardTemplate {
    page: PageContext,
    child: Option<ChildView>,
}

#[derive(Template)]
#[template(path = "add_child.html")]
struct AddChildTemplate {
    page: PageContext,
}

#[derive(Template)]
#[template(path = "child_pairing.html")]
struct ChildPairingTemplate {
    page: PageContext,
}

#[derive(Template)]
#[template(path = "child_profile.html")]
struct ChildProfileTemplate {
    page: PageContext,
    child: ChildView,
    geofences: Vec<GeofenceView>,
    alerts: Vec<AlertView>,
}

#[derive(Template)]
#[template(path = "geofence.html")]
struct GeofenceTemplate {
    page: PageContext,
    child: ChildView,
    geofences: Vec<GeofenceView>,
}

#[derive(Debug, Deserialize)]
pub struct SignupForm {
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    pub role: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
    /// Checkbox: present when ticked
    pub remember: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NameForm {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct PairingForm {
    pub pairing_code: String,
}

#[derive(Debug, Deserialize)]
pub struct GeofenceForm {
    pub name: String,
    pub latitude: String,
    pub longitude: String,
    pub radius: String,
}

fn parse_number(value: &str, field: &str) -> Result<f64> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::InvalidInput(format!("{field} must be a number")))
}

impl GeofenceForm {
    fn validate(&self) -> Result<NewGeofence> {
        NewGeofence::new(
            &self.name,
            parse_number(&self.latitude, "latitude")?,
            parse_number(&self.longitude, "longitude")?,
            parse_number(&self.radius, "radius")?,
        )
    }
}

/// Load a parent's child or answer 404
fn own_child(state: &ApiState, parent: &User, id: &str) -> Result<Child> {
    state
        .children
        .find_for_parent(id, &parent.id)?
        .ok_or_else(|| Error::NotFound("child not found".to_string()))
}

async fn home(MaybeUser(user): MaybeUser, Cookies(jar): Cookies) -> PageResult {
    if let Some(user) = user {
        return Ok(Redirect::to(user.role.dashboard_path()).into_response());
    }
    let (jar, page) = page_context(jar, None);
    render(jar, &HomeTemplate { page })
}

async fn signup_page(MaybeUser(user): MaybeUser, Cookies(jar): Cookies) -> PageResult {
    if user.is_some() {
        return Ok(Redirect::to("/").into_response());
    }
    let (jar, page) = page_context(jar, None);
    render(jar, &SignupTemplate { page })
}

async fn signup(
    State(state): State<Arc<ApiState>>,
    MaybeUser(user): MaybeUser,
    Cookies(jar): Cookies,
    PageForm(form): PageForm<SignupForm>,
) -> PageResult {
    if user.is_some() {
        return Ok(Redirect::to("/").into_response());
    }

    let email = normalize_email(&form.email);
    let checked = validate_email(&email)
        .and_then(|()| validate_new_password(&form.password))
        .and_then(|()| {
            if form.password == form.confirm_password {
                Ok(())
            } else {
                Err(Error::InvalidInput("passwords must match".to_string()))
            }
        })
        .and_then(|()| {
            Role::parse(&form.role)
                .ok_or_else(|| Error::InvalidInput("choose parent or child".to_string()))
        });

    let role = match checked {
        Ok(role) => role,
        Err(Error::InvalidInput(message)) => {
            return Ok(redirect_with(jar, Level::Danger, capitalize(&message), "/signup"));
        }
        Err(e) => return Err(e.into()),
    };

    let password = form.password;
    let cost = state.bcrypt_cost;
    let hash = blocking(move || hash_password(&password, cost)).await?;

    match state.users.create(&email, &hash, role) {
        Ok(_) => Ok(redirect_with(
            jar,
            Level::Success,
            "Your account has been created! You are now able to log in",
            "/login",
        )),
        Err(Error::Conflict(_)) => Ok(redirect_with(
            jar,
            Level::Danger,
            "That email is already registered. Please log in instead.",
            "/signup",
        )),
        Err(e) => Err(e.into()),
    }
}

async fn login_page(MaybeUser(user): MaybeUser, Cookies(jar): Cookies) -> PageResult {
    if user.is_some() {
        return Ok(Redirect::to("/").into_response());
    }
    let (jar, page) = page_context(jar, None);
    render(jar, &LoginTemplate { page })
}

async fn login(
    State(state): State<Arc<ApiState>>,
    Cookies(jar): Cookies,
    PageForm(form): PageForm<LoginForm>,
) -> PageResult {
    let user = state
        .users
        .find_by_email(&form.email)?
        .filter(|u| u.is_active);

    // Unknown accounts still pay for one bcrypt check
    let hash = user.as_ref().map(|u| u.password_hash.clone());
    let password = form.password;
    let checker = Arc::clone(&state);
    let ok = blocking(move || {
        let hash = match hash {
            Some(hash) => hash,
            None => checker.decoy_hash()?,
        };
        Ok(verify_password(&password, &hash))
    })
    .await?;
    let verified = user.filter(|_| ok);

    let Some(user) = verified else {
        tracing::info!("failed login attempt");
        return Ok(redirect_with(
            jar,
            Level::Danger,
            "Login unsuccessful. Please check email and password",
            "/login",
        ));
    };

    let jar = start_session(&state, jar, &user, form.remember.is_some())?;
    Ok(redirect_with(
        jar,
        Level::Success,
        "Login successful!",
        user.role.dashboard_path(),
    ))
}

async fn logout(State(state): State<Arc<ApiState>>, Cookies(jar): Cookies) -> PageResult {
    let jar = end_session(&state, jar)?;
    Ok((jar, Redirect::to("/")).into_response())
}

async fn parent_dashboard(
    State(state): State<Arc<ApiState>>,
    ParentUser(user): ParentUser,
    Cookies(jar): Cookies,
) -> PageResult {
    let threshold = state.tracker.low_battery_threshold();

    let mut children = Vec::new();
    for child in state.children.list_for_parent(&user.id)? {
        let fences = state.geofences.list_for_child(&child.id)?;
        children.push(ChildView::new(&child, &fences, threshold));
    }

    let alerts = state
        .alerts
        .list_for_parent(&user.id, DASHBOARD_ALERTS)?
        .into_iter()
        .map(AlertView::from)
        .collect();
    let unacknowledged = state.alerts.count_unacknowledged(&user.id)?;

    let (jar, page) = page_context(jar, Some(&user));
    render(
        jar,
        &ParentDashboardTemplate {
            page,
            children,
            alerts,
            unacknowledged,
        },
    )
}

async fn child_dashboard(
    State(state): State<Arc<ApiState>>,
    ChildUser(user): ChildUser,
    Cookies(jar): Cookies,
) -> PageResult {
    let child = match state.children.find_by_user(&user.id)? {
        Some(child) => {
            let fences = state.geofences.list_for_child(&child.id)?;
            Some(ChildView::new(
                &child,
                &fences,
                state.tracker.low_battery_threshold(),
            ))
        }
        None => None,
    };

    let (jar, page) = page_context(jar, Some(&user));
    render(jar, &ChildDashboardTemplate { page, child })
}

async fn add_child_page(ParentUser(user): ParentUser, Cookies(jar): Cookies) -> PageResult {
    let (jar, page) = page_context(jar, Some(&user));
    render(jar, &AddChildTemplate { page })
}

async fn add_child(
    State(state): State<Arc<ApiState>>,
    ParentUser(user): ParentUser,
    Cookies(jar): Cookies,
    PageForm(form): PageForm<NameForm>,
) -> PageResult {
    match state.children.create_for_parent(&user.id, &form.name) {
        Ok(child) => {
            let code = child.pairing_code.unwrap_or_default();
            Ok(redirect_with(
                jar,
                Level::Success,
                format!(
                    "{} has been added. Enter pairing code {code} on their device.",
                    child.name
                ),
                &format!("/child_profile/{}", child.id),
            ))
        }
        Err(Error::InvalidInput(message)) => Ok(redirect_with(
            jar,
            Level::Danger,
            capitalize(&message),
            "/add_child",
        )),
        Err(e) => Err(e.into()),
    }
}

async fn child_pairing_page(ParentUser(user): ParentUser, Cookies(jar): Cookies) -> PageResult {
    let (jar, page) = page_context(jar, Some(&user));
    render(jar, &ChildPairingTemplate { page })
}

async fn child_pairing(
    State(state): State<Arc<ApiState>>,
    ParentUser(user): ParentUser,
    Cookies(jar): Cookies,
    PageForm(form): PageForm<PairingForm>,
) -> PageResult {
    match state.pairing.claim_as_parent(&user.id, &form.pairing_code)? {
        PairingOutcome::Paired(child) => Ok(redirect_with(
            jar,
            Level::Success,
            format!("Child {} has been paired successfully!", child.name),
            "/parent_dashboard",
        )),
        PairingOutcome::InvalidCode => Ok(redirect_with(
            jar,
            Level::Danger,
            "Invalid or used pairing code.",
            "/child_pairing",
        )),
    }
}

async fn pair_device(
    State(state): State<Arc<ApiState>>,
    ChildUser(user): ChildUser,
    Cookies(jar): Cookies,
    PageForm(form): PageForm<PairingForm>,
) -> PageResult {
    match state.pairing.link_as_child(&user.id, &form.pairing_code) {
        Ok(PairingOutcome::Paired(child)) => Ok(redirect_with(
            jar,
            Level::Success,
            format!("This device is now linked as {}.", child.name),
            "/child_dashboard",
        )),
        Ok(PairingOutcome::InvalidCode) => Ok(redirect_with(
            jar,
            Level::Danger,
            "Invalid or used pairing code.",
            "/child_dashboard",
        )),
        Err(Error::Conflict(_)) => Ok(redirect_with(
            jar,
            Level::Danger,
            "This account is already linked to a child profile.",
            "/child_dashboard",
        )),
        Err(e) => Err(e.into()),
    }
}

async fn child_register(
    State(state): State<Arc<ApiState>>,
    ChildUser(user): ChildUser,
    Cookies(jar): Cookies,
    PageForm(form): PageForm<NameForm>,
) -> PageResult {
    match state.children.create_for_user(&user.id, &form.name) {
        Ok(child) => Ok(redirect_with(
            jar,
            Level::Success,
            format!(
                "Profile created. Give pairing code {} to your parent.",
                child.pairing_code.unwrap_or_default()
            ),
            "/child_dashboard",
        )),
        Err(Error::Conflict(_)) => Ok(redirect_with(
            jar,
            Level::Danger,
            "This account is already linked to a child profile.",
            "/child_dashboard",
        )),
        Err(Error::InvalidInput(message)) => Ok(redirect_with(
            jar,
            Level::Danger,
            capitalize(&message),
            "/child_dashboard",
        )),
        Err(e) => Err(e.into()),
    }
}

async fn child_profile(
    State(state): State<Arc<ApiState>>,
    ParentUser(user): ParentUser,
    Cookies(jar): Cookies,
    Path(id): Path<String>,
) -> PageResult {
    let child = own_child(&state, &user, &id)?;
    let records = state.geofences.list_for_child(&child.id)?;

    let geofences = records
        .iter()
        .map(|g| GeofenceView::new(g, &child))
        .collect();
    let alerts = state
        .alerts
        .list_for_child(&child.id, PROFILE_ALERTS)?
        .into_iter()
        .map(AlertView::from)
        .collect();
    let child = ChildView::new(&child, &records, state.tracker.low_battery_threshold());

    let (jar, page) = page_context(jar, Some(&user));
    render(
        jar,
        &ChildProfileTemplate {
            page,
            child,
            geofences,
            alerts,
        },
    )
}

async fn geofence_page(
    State(state): State<Arc<ApiState>>,
    ParentUser(user): ParentUser,
    Cookies(jar): Cookies,
    Path(id): Path<String>,
) -> PageResult {
    let child = own_child(&state, &user, &id)?;
    let records = state.geofences.list_for_child(&child.id)?;

    let geofences = records
        .iter()
        .map(|g| GeofenceView::new(g, &child))
        .collect();
    let child = ChildView::new(&child, &records, state.tracker.low_battery_threshold());

    let (jar, page) = page_context(jar, Some(&user));
    render(
        jar,
        &GeofenceTemplate {
            page,
            child,
            geofences,
        },
    )
}

async fn save_geofence(
    State(state): State<Arc<ApiState>>,
    ParentUser(user): ParentUser,
    Cookies(jar): Cookies,
    Path(id): Path<String>,
    PageForm(form): PageForm<GeofenceForm>,
) -> PageResult {
    let child = own_child(&state, &user, &id)?;

    let geofence = match form.validate() {
        Ok(geofence) => geofence,
        Err(Error::InvalidInput(message)) => {
            return Ok(redirect_with(
                jar,
                Level::Danger,
                capitalize(&message),
                &format!("/geofence/{}", child.id),
            ));
        }
        Err(e) => return Err(e.into()),
    };

    state.geofences.create(&child.id, &geofence)?;
    Ok(redirect_with(
        jar,
        Level::Success,
        "Geofence saved.",
        &format!("/child_profile/{}", child.id),
    ))
}

async fn delete_child(
    State(state): State<Arc<ApiState>>,
    ParentUser(user): ParentUser,
    Cookies(jar): Cookies,
    Path(id): Path<String>,
) -> PageResult {
    let child = own_child(&state, &user, &id)?;
    state.children.delete_for_parent(&child.id, &user.id)?;

    Ok(redirect_with(
        jar,
        Level::Info,
        format!("{} has been removed.", child.name),
        "/parent_dashboard",
    ))
}

async fn new_pairing_code(
    State(state): State<Arc<ApiState>>,
    ParentUser(user): ParentUser,
    Cookies(jar): Cookies,
    Path(id): Path<String>,
) -> PageResult {
    let child = own_child(&state, &user, &id)?;
    let profile = format!("/child_profile/{}", child.id);

    match state.pairing.reissue_code(&child) {
        Ok(code) => Ok(redirect_with(
            jar,
            Level::Success,
            format!("New pairing code for {}: {code}", child.name),
            &profile,
        )),
        Err(Error::Pairing(_)) => Ok(redirect_with(
            jar,
            Level::Info,
            format!("{} is already paired.", child.name),
            &profile,
        )),
        Err(e) => Err(e.into()),
    }
}

async fn acknowledge_alert(
    State(state): State<Arc<ApiState>>,
    ParentUser(user): ParentUser,
    Path(id): Path<String>,
) -> PageResult {
    if !state.alerts.acknowledge(&id, &user.id)? {
        return Err(Error::NotFound("alert not found".to_string()).into());
    }
    Ok(Redirect::to("/parent_dashboard").into_response())
}

/// Uppercase the first letter of a validation message
fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        None => String::new(),
        Some(first) => first.to_uppercase().chain(chars).collect(),
    }
}

/// Build page router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/home", get(home))
        .route("/signup", get(signup_page).post(signup))
        .route("/login", get(login_page).post(login))
        .route("/logout", get(logout))
        .route("/parent_dashboard", get(parent_dashboard))
        .route("/child_dashboard", get(child_dashboard))
        .route("/add_child", get(add_child_page).post(add_child))
        .route("/child_pairing", get(child_pairing_page).post(child_pairing))
        .route("/pair_device", post(pair_device))
        .route("/child_register", post(child_register))
        .route("/child_profile/{id}", get(child_profile))
        .route("/geofence/{id}", get(geofence_page).post(save_geofence))
        .route("/child/{id}/code", post(new_pairing_code))
        .route("/child/{id}/delete", post(delete_child))
        .route("/alerts/{id}/ack", post(acknowledge_alert))
        .with_state(state)
}
