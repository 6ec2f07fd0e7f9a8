//! API endpoint integration tests

use axum::http::{StatusCode, header};
use axum::response::Response;
use chrono::{DateTime, Duration, Utc};
use family_locator::db::{AlertKind, NewGeofence, Role};
use serde_json::json;

mod common;
use common::{Browser, TestApp, body_json, body_text, location};

#[tokio::test]
async fn test_health_endpoint() {
    let app = TestApp::new();
    let response = Browser::default().get(&app, "/health").await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_ready_endpoint() {
    let app = TestApp::new();
    let response = Browser::default().get(&app, "/ready").await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["checks"]["database"]["status"], "ok");
}

#[tokio::test]
async fn test_home_page_for_visitors_and_users() {
    let app = TestApp::new();

    let response = Browser::default().get(&app, "/").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("Create an account"));

    app.create_user("parent@example.com", Role::Parent);
    let mut parent = app.login("parent@example.com").await;
    let response = parent.get(&app, "/home").await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/parent_dashboard");
}

#[tokio::test]
async fn test_signup_then_duplicate_rejected() {
    let app = TestApp::new();
    let mut browser = Browser::default();
    let form = "email=New%40Example.com&password=longenough&confirm_password=longenough&role=parent";

    let response = browser.post_form(&app, "/signup", form).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/login");

    let user = app
        .state
        .users
        .find_by_email("new@example.com")
        .unwrap()
        .expect("account created");
    assert_eq!(user.role, Role::Parent);

    let response = browser.post_form(&app, "/signup", form).await;
    assert_eq!(location(&response), "/signup");

    let page = body_text(browser.get(&app, "/signup").await).await;
    assert!(page.contains("already registered"));
    assert_eq!(app.state.users.list_all().unwrap().len(), 1);
}

#[tokio::test]
async fn test_signup_validation() {
    let app = TestApp::new();
    let mut browser = Browser::default();

    let response = browser
        .post_form(
            &app,
            "/signup",
            "email=a%40example.com&password=short&confirm_password=short&role=child",
        )
        .await;
    assert_eq!(location(&response), "/signup");

    let response = browser
        .post_form(
            &app,
            "/signup",
            "email=a%40example.com&password=longenough&confirm_password=different&role=child",
        )
        .await;
    assert_eq!(location(&response), "/signup");

    let page = body_text(browser.get(&app, "/signup").await).await;
    assert!(page.contains("Password must be at least 8 characters"));
    assert!(page.contains("Passwords must match"));
    assert!(app.state.users.list_all().unwrap().is_empty());
}

#[tokio::test]
async fn test_login_wrong_password_fails() {
    let app = TestApp::new();
    app.create_user("parent@example.com", Role::Parent);
    let mut browser = Browser::default();

    let response = browser
        .post_form(
            &app,
            "/login",
            "email=parent%40example.com&password=not-the-password",
        )
        .await;
    assert_eq!(location(&response), "/login");

    let page = body_text(browser.get(&app, "/login").await).await;
    assert!(page.contains("Login unsuccessful"));

    let response = browser.get(&app, "/parent_dashboard").await;
    assert_eq!(location(&response), "/login");
}

#[tokio::test]
async fn test_login_and_logout() {
    let app = TestApp::new();
    app.create_user("parent@example.com", Role::Parent);
    let mut browser = app.login("parent@example.com").await;

    let response = browser.get(&app, "/parent_dashboard").await;
    assert_eq!(response.status(), StatusCode::OK);
    let page = body_text(response).await;
    assert!(page.contains("Login successful!"));
    assert!(page.contains("parent@example.com"));

    let response = browser.get(&app, "/logout").await;
    assert_eq!(location(&response), "/");

    let response = browser.get(&app, "/parent_dashboard").await;
    assert_eq!(location(&response), "/login");
}

#[tokio::test]
async fn test_pages_are_role_gated() {
    let app = TestApp::new();
    app.create_user("kid@example.com", Role::Child);
    let mut kid = app.login("kid@example.com").await;

    let response = kid.get(&app, "/parent_dashboard").await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/");

    let response = kid.get(&app, "/add_child").await;
    assert_eq!(location(&response), "/");

    let response = kid.get(&app, "/child_dashboard").await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_parent_first_pairing_flow() {
    let app = TestApp::new();
    let parent = app.create_user("parent@example.com", Role::Parent);
    app.create_user("kid@example.com", Role::Child);
    app.create_user("other-kid@example.com", Role::Child);

    let mut parent_browser = app.login("parent@example.com").await;
    let response = parent_browser
        .post_form(&app, "/add_child", "name=Ada")
        .await;
    assert!(location(&response).starts_with("/child_profile/"));

    let child = &app.state.children.list_for_parent(&parent.id).unwrap()[0];
    let code = child.pairing_code.clone().expect("code until linked");

    let page = body_text(parent_browser.get(&app, location(&response)).await).await;
    assert!(page.contains(&code));

    let mut kid = app.login("kid@example.com").await;
    let response = kid
        .post_form(
            &app,
            "/pair_device",
            &format!("pairing_code={}", code.to_lowercase()),
        )
        .await;
    assert_eq!(location(&response), "/child_dashboard");
    let page = body_text(kid.get(&app, "/child_dashboard").await).await;
    assert!(page.contains("now linked as Ada"));

    let linked = app.state.children.find(&child.id).unwrap().unwrap();
    assert!(linked.is_fully_paired());
    assert!(linked.pairing_code.is_none(), "code is consumed");

    let mut other = app.login("other-kid@example.com").await;
    other
        .post_form(&app, "/pair_device", &format!("pairing_code={code}"))
        .await;
    let page = body_text(other.get(&app, "/child_dashboard").await).await;
    assert!(page.contains("Invalid or used pairing code."));
}

#[tokio::test]
async fn test_child_first_pairing_flow() {
    let app = TestApp::new();
    let kid = app.create_user("kid@example.com", Role::Child);
    app.create_user("parent@example.com", Role::Parent);
    app.create_user("stranger@example.com", Role::Parent);

    let mut kid_browser = app.login("kid@example.com").await;
    kid_browser
        .post_form(&app, "/child_register", "name=Bo")
        .await;
    let code = app
        .state
        .children
        .find_by_user(&kid.id)
        .unwrap()
        .unwrap()
        .pairing_code
        .unwrap();
    let page = body_text(kid_browser.get(&app, "/child_dashboard").await).await;
    assert!(page.contains(&code));

    // A second registration is refused
    kid_browser
        .post_form(&app, "/child_register", "name=Bo+again")
        .await;
    let page = body_text(kid_browser.get(&app, "/child_dashboard").await).await;
    assert!(page.contains("already linked"));

    let mut parent = app.login("parent@example.com").await;
    let response = parent
        .post_form(&app, "/child_pairing", &format!("pairing_code={code}"))
        .await;
    assert_eq!(location(&response), "/parent_dashboard");
    let page = body_text(parent.get(&app, "/parent_dashboard").await).await;
    assert!(page.contains("Child Bo has been paired successfully!"));

    let mut stranger = app.login("stranger@example.com").await;
    let response = stranger
        .post_form(&app, "/child_pairing", &format!("pairing_code={code}"))
        .await;
    assert_eq!(location(&response), "/child_pairing");
    let page = body_text(stranger.get(&app, "/child_pairing").await).await;
    assert!(page.contains("Invalid or used pairing code."));
}

#[tokio::test]
async fn test_location_requires_child_session() {
    let app = TestApp::new();
    let (_, kid, _) = app.paired_family();
    let body = json!({"latitude": 51.5, "longitude": -0.1});

    let response = Browser::default()
        .post_json(&app, "/api/location", &body)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let mut parent = app.login("parent@example.com").await;
    let response = parent.post_json(&app, "/api/location", &body).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(response).await["status"], "error");

    let mut kid_browser = app.login(&kid.email).await;
    let response = kid_browser
        .post_json(
            &app,
            "/api/location",
            &json!({"latitude": 51.5, "longitude": -0.1, "user_id": "someone-else"}),
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_location_rejects_bad_bodies() {
    let app = TestApp::new();
    app.paired_family();
    let mut kid = app.login("kid@example.com").await;

    let response = kid
        .post_json(&app, "/api/location", &json!({"latitude": 51.5}))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["status"], "error");
    assert_eq!(body["message"], "Invalid data format.");

    let response = kid
        .post_json(
            &app,
            "/api/location",
            &json!({"latitude": 123.0, "longitude": 0.0}),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = kid
        .post_json(
            &app,
            "/api/location",
            &json!({"latitude": 1.0, "longitude": 1.0, "battery_level": 140}),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_location_for_unlinked_child_is_not_found() {
    let app = TestApp::new();
    app.create_user("kid@example.com", Role::Child);
    let mut kid = app.login("kid@example.com").await;

    let response = kid
        .post_json(
            &app,
            "/api/location",
            &json!({"latitude": 51.5, "longitude": -0.1}),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_location_updates_and_raises_alerts() {
    let app = TestApp::new();
    let (_, kid, child) = app.paired_family();
    app.state
        .geofences
        .create(
            &child.id,
            &NewGeofence::new("School", 51.5, -0.1, 250.0).unwrap(),
        )
        .unwrap();

    let mut kid_browser = app.login(&kid.email).await;
    let response = kid_browser
        .post_json(
            &app,
            "/api/location",
            &json!({
                "latitude": 51.5005,
                "longitude": -0.1,
                "battery_level": 10,
                "user_id": kid.id,
            }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "success");

    let kinds: Vec<&str> = body["alerts"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["kind"].as_str().unwrap())
        .collect();
    assert_eq!(kinds, ["enter", "low_battery"]);

    // Same place again: no new alerts
    let response = kid_browser
        .post_json(
            &app,
            "/api/location",
            &json!({"latitude": 51.5006, "longitude": -0.1}),
        )
        .await;
    assert!(body_json(response).await["alerts"].as_array().unwrap().is_empty());

    let stored = app.state.children.find(&child.id).unwrap().unwrap();
    assert_eq!(stored.latitude, Some(51.5006));
    assert_eq!(stored.battery_level, Some(10.0));

    let mut parent = app.login("parent@example.com").await;
    let body = body_json(parent.get(&app, "/api/children").await).await;
    assert_eq!(body["children"][0]["name"], "Ada");
    assert_eq!(body["children"][0]["inside"][0], "School");

    let body = body_json(parent.get(&app, "/api/alerts").await).await;
    assert_eq!(body["unacknowledged"], 2);
    let alert_id = body["alerts"][0]["id"].as_str().unwrap().to_string();

    let response = parent
        .post_form(&app, &format!("/alerts/{alert_id}/ack"), "")
        .await;
    assert_eq!(location(&response), "/parent_dashboard");
    let body = body_json(parent.get(&app, "/api/alerts?limit=1").await).await;
    assert_eq!(body["unacknowledged"], 1);
    assert_eq!(body["alerts"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_geofence_api() {
    let app = TestApp::new();
    let (_, kid, child) = app.paired_family();
    app.create_user("stranger@example.com", Role::Parent);
    let uri = format!("/api/geofence/{}", child.id);
    let fence = json!({"name": "Home", "latitude": 51.5, "longitude": -0.1, "radius": 150});

    let mut parent = app.login("parent@example.com").await;
    let response = parent.post_json(&app, &uri, &fence).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["message"], "Geofence saved.");
    let geofence_id = body["geofence"]["id"].as_str().unwrap().to_string();

    let response = parent
        .post_json(
            &app,
            &uri,
            &json!({"name": "Bad", "latitude": 51.5, "longitude": -0.1, "radius": -5}),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = body_json(parent.get(&app, &uri).await).await;
    assert_eq!(body["geofences"].as_array().unwrap().len(), 1);

    // Another parent's child looks missing
    let mut stranger = app.login("stranger@example.com").await;
    let response = stranger.post_json(&app, &uri, &fence).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let mut kid_browser = app.login(&kid.email).await;
    let response = kid_browser.post_json(&app, &uri, &fence).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = parent
        .delete(&app, &format!("{uri}/{geofence_id}"))
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let response = parent
        .delete(&app, &format!("{uri}/{geofence_id}"))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_geofence_form_and_profile_pages() {
    let app = TestApp::new();
    let (_, _, child) = app.paired_family();
    app.create_user("stranger@example.com", Role::Parent);

    let mut parent = app.login("parent@example.com").await;
    let response = parent
        .post_form(
            &app,
            &format!("/geofence/{}", child.id),
            "name=Park&latitude=51.51&longitude=-0.12&radius=300",
        )
        .await;
    assert_eq!(location(&response), format!("/child_profile/{}", child.id));

    let page = body_text(parent.get(&app, &format!("/child_profile/{}", child.id)).await).await;
    assert!(page.contains("Geofence saved."));
    assert!(page.contains("Park"));

    let response = parent
        .post_form(
            &app,
            &format!("/geofence/{}", child.id),
            "name=Park&latitude=north&longitude=-0.12&radius=300",
        )
        .await;
    assert_eq!(location(&response), format!("/geofence/{}", child.id));

    let mut stranger = app.login("stranger@example.com").await;
    let response = stranger
        .get(&app, &format!("/child_profile/{}", child.id))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_child_removes_everything() {
    let app = TestApp::new();
    let (parent, _, child) = app.paired_family();
    app.state
        .alerts
        .record(&child.id, None, AlertKind::LowBattery, "low")
        .unwrap();

    let mut browser = app.login("parent@example.com").await;
    let response = browser
        .post_form(&app, &format!("/child/{}/delete", child.id), "")
        .await;
    assert_eq!(location(&response), "/parent_dashboard");

    assert!(app.state.children.list_for_parent(&parent.id).unwrap().is_empty());
    assert!(app.state.alerts.list_for_parent(&parent.id, 10).unwrap().is_empty());

    let response = browser
        .post_form(&app, &format!("/child/{}/delete", child.id), "")
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_new_pairing_code_replaces_old_one() {
    let app = TestApp::new();
    let parent = app.create_user("parent@example.com", Role::Parent);
    app.create_user("kid@example.com", Role::Child);
    let child = app
        .state
        .children
        .create_for_parent(&parent.id, "Ada")
        .unwrap();
    let old_code = child.pairing_code.clone().unwrap();

    let mut browser = app.login("parent@example.com").await;
    let response = browser
        .post_form(&app, &format!("/child/{}/code", child.id), "")
        .await;
    assert_eq!(location(&response), format!("/child_profile/{}", child.id));

    let new_code = app
        .state
        .children
        .find(&child.id)
        .unwrap()
        .unwrap()
        .pairing_code
        .unwrap();
    assert_ne!(new_code, old_code);

    let mut kid = app.login("kid@example.com").await;
    kid.post_form(&app, "/pair_device", &format!("pairing_code={old_code}"))
        .await;
    let page = body_text(kid.get(&app, "/child_dashboard").await).await;
    assert!(page.contains("Invalid or used pairing code."));

    kid.post_form(&app, "/pair_device", &format!("pairing_code={new_code}"))
        .await;
    let page = body_text(kid.get(&app, "/child_dashboard").await).await;
    assert!(page.contains("now linked as Ada"));

    // Fully paired children keep no code
    browser
        .post_form(&app, &format!("/child/{}/code", child.id), "")
        .await;
    let page = body_text(
        browser
            .get(&app, &format!("/child_profile/{}", child.id))
            .await,
    )
    .await;
    assert!(page.contains("Ada is already paired."));
}

/// The `family_session` Set-Cookie line of a response
fn session_set_cookie(response: &Response) -> String {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with("family_session="))
        .expect("session cookie set")
        .to_string()
}

/// Expiry of the only server-side session for a user
fn session_expiry(app: &TestApp, user_id: &str) -> DateTime<Utc> {
    let conn = app.state.db.get().unwrap();
    let expires_at: String = conn
        .query_row(
            "SELECT expires_at FROM web_sessions WHERE user_id = ?1",
            [user_id],
            |row| row.get(0),
        )
        .unwrap();
    DateTime::parse_from_rfc3339(&expires_at)
        .unwrap()
        .with_timezone(&Utc)
}

#[tokio::test]
async fn test_remember_me_extends_session() {
    let app = TestApp::new();
    let user = app.create_user("parent@example.com", Role::Parent);

    let response = Browser::default()
        .post_form(
            &app,
            "/login",
            &format!("email=parent%40example.com&password={}&remember=on", common::TEST_PASSWORD),
        )
        .await;
    assert_eq!(location(&response), "/parent_dashboard");

    let cookie = session_set_cookie(&response);
    assert!(cookie.contains("Max-Age=") || cookie.contains("Expires="), "{cookie}");

    let left = session_expiry(&app, &user.id) - Utc::now();
    assert!(left > Duration::days(29) && left <= Duration::days(30), "{left}");
}

#[tokio::test]
async fn test_plain_login_uses_browser_session() {
    let app = TestApp::new();
    let user = app.create_user("parent@example.com", Role::Parent);

    let response = Browser::default()
        .post_form(
            &app,
            "/login",
            &format!("email=parent%40example.com&password={}", common::TEST_PASSWORD),
        )
        .await;

    let cookie = session_set_cookie(&response);
    assert!(!cookie.contains("Max-Age=") && !cookie.contains("Expires="), "{cookie}");

    let left = session_expiry(&app, &user.id) - Utc::now();
    assert!(left > Duration::hours(23) && left <= Duration::hours(24), "{left}");
}

#[tokio::test]
async fn test_unknown_or_inactive_account_cannot_log_in() {
    let app = TestApp::new();
    let user = app.create_user("parent@example.com", Role::Parent);
    app.state.users.set_active(&user.id, false).unwrap();
    let mut browser = Browser::default();

    for email in ["nobody%40example.com", "parent%40example.com"] {
        let response = browser
            .post_form(
                &app,
                "/login",
                &format!("email={email}&password={}", common::TEST_PASSWORD),
            )
            .await;
        assert_eq!(location(&response), "/login");
    }

    let page = body_text(browser.get(&app, "/login").await).await;
    assert!(page.contains("Login unsuccessful"));
}

#[tokio::test]
async fn test_malformed_forms_flash_and_return() {
    let app = TestApp::new();
    let mut browser = Browser::default();

    // No role field
    let response = browser
        .post_form(
            &app,
            "/signup",
            "email=a%40example.com&password=12345678&confirm_password=12345678",
        )
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/signup");
    let page = body_text(browser.get(&app, "/signup").await).await;
    assert!(page.contains("Invalid form submission."));
    assert!(app.state.users.list_all().unwrap().is_empty());

    app.create_user("kid@example.com", Role::Child);
    let mut kid = app.login("kid@example.com").await;
    let response = kid.post_form(&app, "/pair_device", "code=ABCD1234").await;
    assert_eq!(location(&response), "/child_dashboard");
    let page = body_text(kid.get(&app, "/child_dashboard").await).await;
    assert!(page.contains("Invalid form submission."));
}

#[tokio::test]
async fn test_bad_alert_query_uses_json_errors() {
    let app = TestApp::new();
    app.paired_family();
    let mut parent = app.login("parent@example.com").await;

    let response = parent.get(&app, "/api/alerts?limit=abc").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["status"], "error");
    assert_eq!(body["message"], "Invalid query parameters.");
}

#[tokio::test]
async fn test_stylesheet_is_served() {
    let app = TestApp::new();
    let response = Browser::default().get(&app, "/static/style.css").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(!body_text(response).await.is_empty());
}
