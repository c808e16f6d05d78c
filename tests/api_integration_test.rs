//! HTTP API integration tests
//!
//! Requests go through the full router, auth middleware included, with the
//! in-memory document store and a scripted face capability.

mod common;

use axum::http::{header, Method, StatusCode};
use bytes::Bytes;
use serde_json::json;
use std::sync::Arc;
use tower::ServiceExt;

use common::*;
use volunteer_checkin::auth::Role;
use volunteer_checkin::domain::{Event, EventId};
use volunteer_checkin::infra::EventRegistry;

async fn create_event(app: &TestApp, event_id: &str, registered: &[&str]) {
    app.state
        .checkin
        .events
        .create_event(
            Event::new(EventId::from(event_id), None)
                .with_registrations(registered.iter().map(|id| (*id).into())),
        )
        .await
        .unwrap();
}

/// Enroll `identity` through `/register_face` with a face embedding.
async fn enroll(app: &TestApp, identity: &str, color: [u8; 3], embedding: Vec<f64>) {
    let photo = png(64, 32, color);
    app.faces.script(&photo, vec![embedding]);
    let response = app
        .router()
        .oneshot(multipart_request(
            "/register_face",
            &admin_token(),
            &[
                ("volunteer_id", Part::Text(identity)),
                ("name", Part::Text(identity)),
                ("email", Part::Text("someone@example.org")),
                ("image", Part::File(&photo)),
            ],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn test_health_and_metrics_are_public() {
    let app = TestApp::new();

    let response = app
        .router()
        .oneshot(
            axum::http::Request::get("/health")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "healthy");

    let response = app
        .router()
        .oneshot(
            axum::http::Request::get("/ready")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let ready = body_json(response).await;
    assert_eq!(ready["camera_configured"], false);
    assert_eq!(ready["shutting_down"], false);

    let response = app
        .router()
        .oneshot(
            axum::http::Request::get("/metrics?format=prometheus")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/plain"));
}

#[tokio::test]
async fn test_auth_errors_use_the_envelope() {
    let app = TestApp::new();

    let response = app
        .router()
        .oneshot(
            axum::http::Request::get("/api/v1/events")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers()["x-error-code"], "AUTH_REQUIRED");
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "AUTH_REQUIRED");
    assert_eq!(body["error"]["numeric_code"], 1001);

    let response = app
        .router()
        .oneshot(get_request("/api/v1/events", "not-a-jwt"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error"]["code"], "INVALID_TOKEN");

    let volunteer = token("v1", Role::Volunteer);
    let response = app
        .router()
        .oneshot(get_request("/attendance_logs?event_id=e1", &volunteer))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(
        body_json(response).await["error"]["code"],
        "INSUFFICIENT_PERMISSIONS"
    );
}

#[tokio::test]
async fn test_register_face_creates_then_replaces() {
    let app = TestApp::new();
    let photo = png(64, 32, [10, 20, 30]);
    app.faces.script(&photo, vec![vec![0.1, 0.2, 0.3]]);

    let volunteer = token("v1", Role::Volunteer);
    let form = |name: &'static str| {
        [
            ("user_id", Part::Text("v1")),
            ("name", Part::Text(name)),
            ("email", Part::Text("v1@example.org")),
            ("image", Part::File(&photo)),
        ]
    };

    let response = app
        .router()
        .oneshot(multipart_request("/register_face", &volunteer, &form("Asha")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["outcome"], "created");
    assert_eq!(body["identity"]["identity_id"], "v1");
    assert_eq!(body["identity"]["embedding_dimension"], 3);
    assert!(!body["preview_jpeg"].as_str().unwrap().is_empty());

    let response = app
        .router()
        .oneshot(multipart_request("/register_face", &volunteer, &form("Asha R")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["outcome"], "replaced");

    let response = app
        .router()
        .oneshot(get_request("/api/v1/identities/v1", &volunteer))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["display_name"], "Asha R");

    // Someone else's identity is off limits to a volunteer.
    let other = token("v2", Role::Volunteer);
    let response = app
        .router()
        .oneshot(multipart_request("/register_face", &other, &form("Mallory")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_register_face_rejects_bad_photos() {
    let app = TestApp::new();
    let no_face = png(64, 32, [200, 200, 200]);
    let two_faces = png(64, 32, [1, 1, 1]);
    app.faces
        .script(&two_faces, vec![vec![0.0, 0.0], vec![1.0, 1.0]]);

    let submit = |photo: &[u8]| {
        multipart_request(
            "/register_face",
            &admin_token(),
            &[
                ("identity_id", Part::Text("v1")),
                ("display_name", Part::Text("Asha")),
                ("contact", Part::Text("asha@example.org")),
                ("file", Part::File(photo)),
            ],
        )
    };

    let response = app.router().oneshot(submit(&no_face)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"]["code"], "NO_FACE_DETECTED");

    let response = app.router().oneshot(submit(&two_faces)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await["error"]["code"],
        "MULTIPLE_FACES_DETECTED"
    );

    let response = app.router().oneshot(submit(&b"not an image"[..])).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"]["code"], "INVALID_IMAGE");

    let response = app
        .router()
        .oneshot(multipart_request(
            "/register_face",
            &admin_token(),
            &[("identity_id", Part::Text("v1"))],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await["error"]["code"],
        "MISSING_REQUIRED_FIELD"
    );
}

#[tokio::test]
async fn test_capability_outage_is_service_unavailable() {
    let app = TestApp::new();
    let photo = png(64, 32, [5, 5, 5]);
    app.faces.set_failing(true);

    let response = app
        .router()
        .oneshot(multipart_request(
            "/register_face",
            &admin_token(),
            &[
                ("identity_id", Part::Text("v1")),
                ("display_name", Part::Text("Asha")),
                ("contact", Part::Text("asha@example.org")),
                ("image", Part::File(&photo)),
            ],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "SERVICE_UNAVAILABLE");
    assert_eq!(body["error"]["retry_after"], 5);
}

#[tokio::test]
async fn test_group_photo_with_duplicate_faces_marks_once() {
    let app = TestApp::new();
    enroll(&app, "v1", [1, 0, 0], vec![0.0, 0.0, 0.0]).await;
    enroll(&app, "v2", [2, 0, 0], vec![1.0, 1.0, 1.0]).await;
    create_event(&app, "e1", &["v1", "v2"]).await;

    // Two faces of v1 and one stranger.
    let group = png(128, 32, [3, 0, 0]);
    app.faces.script(
        &group,
        vec![vec![0.0, 0.0, 0.05], vec![0.0, 0.05, 0.0], vec![5.0, 5.0, 5.0]],
    );

    let response = app
        .router()
        .oneshot(multipart_request(
            "/bulk-process",
            &admin_token(),
            &[("event_id", Part::Text("e1")), ("photo", Part::File(&group))],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["total_faces"], 3);
    assert_eq!(body["matches_found"], 2);
    let marked = body["attendance_marked"].as_array().unwrap();
    assert_eq!(marked.len(), 1);
    assert_eq!(marked[0]["identity_id"], "v1");
    assert_eq!(marked[0]["verification_method"], "batch_photo");
    assert!(body["results"][2]["identity_id"].is_null());

    let response = app
        .router()
        .oneshot(get_request(
            "/attendance_logs?event_id=e1&include_photos=true",
            &admin_token(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let logs = body_json(response).await;
    assert_eq!(logs["count"], 1);
    assert_eq!(logs["attendance"][0]["display_name"], "v1");
    assert!(logs["attendance"][0]["photo"].is_string());

    let response = app
        .router()
        .oneshot(get_request("/attendance_logs?event_id=missing", &admin_token()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"]["code"], "EVENT_NOT_FOUND");
}

#[tokio::test]
async fn test_group_photo_without_registrations_is_empty() {
    let app = TestApp::new();
    enroll(&app, "v1", [1, 0, 0], vec![0.0, 0.0, 0.0]).await;
    create_event(&app, "e1", &[]).await;

    let group = png(128, 32, [4, 0, 0]);
    app.faces.script(&group, vec![vec![0.0, 0.0, 0.0]]);

    let response = app
        .router()
        .oneshot(multipart_request(
            "/bulk-process",
            &admin_token(),
            &[("eventId", Part::Text("e1")), ("file", Part::File(&group))],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["total_faces"], 1);
    assert_eq!(body["matches_found"], 0);
    assert!(body["attendance_marked"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_group_photo_accepts_a_distance_threshold() {
    let app = TestApp::new();
    enroll(&app, "v1", [1, 0, 0], vec![0.0, 0.0, 0.0]).await;
    create_event(&app, "e1", &["v1"]).await;

    // Distance 0.5 from v1, so confidence 50.
    let group = png(128, 32, [5, 0, 0]);
    app.faces.script(&group, vec![vec![0.0, 0.0, 0.5]]);

    let send = |fields: Vec<(&'static str, &'static str)>| {
        let mut parts: Vec<(&str, Part<'_>)> = vec![("photo", Part::File(&group))];
        parts.extend(fields.into_iter().map(|(name, value)| (name, Part::Text(value))));
        app.router()
            .oneshot(multipart_request("/bulk-process", &admin_token(), &parts))
    };

    let strict = send(vec![("event_id", "e1"), ("threshold", "0.4")])
        .await
        .unwrap();
    assert_eq!(strict.status(), StatusCode::OK);
    let body = body_json(strict).await;
    assert_eq!(body["matches_found"], 0);
    assert!(body["attendance_marked"].as_array().unwrap().is_empty());

    let both = send(vec![
        ("event_id", "e1"),
        ("threshold", "0.6"),
        ("min_confidence", "40"),
    ])
    .await
    .unwrap();
    assert_eq!(both.status(), StatusCode::BAD_REQUEST);
    let body = body_json(both).await;
    assert_eq!(body["error"]["code"], "INVALID_FIELD_VALUE");
    assert_eq!(body["error"]["details"]["field"], "threshold");

    let lenient = send(vec![("event_id", "e1"), ("threshold", "0.6")])
        .await
        .unwrap();
    assert_eq!(lenient.status(), StatusCode::OK);
    let body = body_json(lenient).await;
    assert_eq!(body["matches_found"], 1);
    assert_eq!(body["attendance_marked"][0]["identity_id"], "v1");
}

#[tokio::test]
async fn test_group_photo_with_wrong_length_embedding_is_unavailable() {
    let app = TestApp::new();
    enroll(&app, "v1", [1, 0, 0], vec![0.0, 0.0, 0.0]).await;
    create_event(&app, "e1", &["v1"]).await;

    let group = png(128, 32, [6, 0, 0]);
    app.faces.script(&group, vec![vec![0.0, 0.0]]);

    let response = app
        .router()
        .oneshot(multipart_request(
            "/bulk-process",
            &admin_token(),
            &[("event_id", Part::Text("e1")), ("photo", Part::File(&group))],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["error"]["code"], "SERVICE_UNAVAILABLE");
}

#[tokio::test]
async fn test_event_lifecycle_and_visibility() {
    let app = TestApp::new();

    let response = app
        .router()
        .oneshot(json_request(
            Method::POST,
            "/api/v1/events",
            &admin_token(),
            json!({"event_id": "cleanup", "title": "Beach cleanup", "registered_volunteers": ["v1"]}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(body_json(response).await["registered_identity_ids"], json!(["v1"]));

    let response = app
        .router()
        .oneshot(json_request(
            Method::POST,
            "/api/v1/events",
            &admin_token(),
            json!({"event_id": "cleanup"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .router()
        .oneshot(json_request(
            Method::POST,
            "/api/v1/events",
            &admin_token(),
            json!({"title": "Food drive"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let generated = body_json(response).await;
    assert!(generated["event_id"].as_str().unwrap().starts_with("evt_"));

    // A volunteer signs themselves up for the food drive.
    let v2 = token("v2", Role::Volunteer);
    let uri = format!(
        "/api/v1/events/{}/registrations",
        generated["event_id"].as_str().unwrap()
    );
    let response = app
        .router()
        .oneshot(json_request(Method::POST, &uri, &v2, json!({"identity_ids": ["v2"]})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .router()
        .oneshot(json_request(
            Method::POST,
            &uri,
            &v2,
            json!({"identity_ids": ["v2", "v3"]}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .router()
        .oneshot(get_request("/api/v1/events", &v2))
        .await
        .unwrap();
    let listed = body_json(response).await;
    assert_eq!(listed["count"], 1);
    assert_eq!(listed["events"][0]["title"], "Food drive");

    let response = app
        .router()
        .oneshot(get_request("/api/v1/events/cleanup", &v2))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .router()
        .oneshot(get_request("/api/v1/events", &admin_token()))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["count"], 2);
}

#[tokio::test]
async fn test_descriptor_match_verify_and_manual_marking() {
    let app = TestApp::new();
    create_event(&app, "e1", &["v1"]).await;

    for (id, descriptor) in [("v1", vec![0.0, 0.0, 0.0]), ("v2", vec![1.0, 1.0, 1.0])] {
        let response = app
            .router()
            .oneshot(json_request(
                Method::POST,
                "/api/v1/faces/descriptor",
                &token(id, Role::Volunteer),
                json!({"name": id, "faceDescriptor": descriptor}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let response = app
        .router()
        .oneshot(json_request(
            Method::POST,
            "/api/v1/attendance/match",
            &admin_token(),
            json!({"eventId": "e1", "faceDescriptor": [1.0, 1.0, 0.95]}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let matched = body_json(response).await;
    assert_eq!(matched["match_found"], true);
    assert_eq!(matched["best"]["identity_id"], "v2");
    assert_eq!(matched["best"]["registered"], false);

    let response = app
        .router()
        .oneshot(json_request(
            Method::POST,
            "/api/v1/attendance/match",
            &admin_token(),
            json!({"event_id": "e1", "descriptor": [0.0, 0.0]}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"]["code"], "DIMENSION_MISMATCH");

    let v1 = token("v1", Role::Volunteer);
    let verify = || {
        json_request(
            Method::POST,
            "/api/v1/attendance/verify",
            &v1,
            json!({"event_id": "e1", "descriptor": [0.0, 0.0, 0.02]}),
        )
    };
    let response = app.router().oneshot(verify()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let first = body_json(response).await;
    assert_eq!(first["verified"], true);
    assert_eq!(first["attendance"]["outcome"], "created");
    assert_eq!(first["attendance"]["record"]["verification_method"], "live_stream");

    let response = app.router().oneshot(verify()).await.unwrap();
    assert_eq!(body_json(response).await["attendance"]["outcome"], "unchanged");

    // v2 is enrolled but not registered for e1.
    let response = app
        .router()
        .oneshot(json_request(
            Method::POST,
            "/api/v1/attendance/verify",
            &token("v2", Role::Volunteer),
            json!({"event_id": "e1", "descriptor": [1.0, 1.0, 1.0]}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"]["code"], "NOT_REGISTERED");

    let response = app
        .router()
        .oneshot(json_request(
            Method::POST,
            "/api/v1/attendance/manual",
            &admin_token(),
            json!({"event_id": "e1", "volunteer_id": "v2"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let manual = body_json(response).await;
    assert_eq!(manual["outcome"], "created");
    assert_eq!(manual["record"]["confidence_score"], 100.0);
    assert_eq!(manual["record"]["verification_method"], "manual");

    let response = app
        .router()
        .oneshot(json_request(
            Method::POST,
            "/api/v1/attendance/manual",
            &admin_token(),
            json!({"event_id": "e1", "identity_id": "ghost"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .router()
        .oneshot(get_request("/api/v1/identities/v2/attendance", &token("v2", Role::Volunteer)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["count"], 1);
}

#[tokio::test]
async fn test_uploaded_frame_runs_the_live_path() {
    let app = TestApp::new();
    enroll(&app, "v1", [9, 0, 0], vec![0.0, 0.0, 0.0]).await;
    create_event(&app, "e1", &["v1"]).await;

    let frame = png(64, 32, [9, 9, 0]);
    app.faces.script(&frame, vec![vec![0.0, 0.0, 0.01]]);

    let upload = || {
        multipart_request(
            "/api/v1/attendance/frame",
            &admin_token(),
            &[("event_id", Part::Text("e1")), ("frame", Part::File(&frame))],
        )
    };

    let response = app.router().oneshot(upload()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["faces"][0]["status"], "marked");
    assert!(body["faces"][0]["label"]
        .as_str()
        .unwrap()
        .ends_with("Marked!"));
    assert!(!body["annotated_jpeg"].as_str().unwrap().is_empty());

    let response = app.router().oneshot(upload()).await.unwrap();
    let body = body_json(response).await;
    assert_eq!(body["faces"][0]["label"], "v1 - Already Marked");
}

#[tokio::test]
async fn test_live_stream_emits_annotated_parts() {
    let app = TestApp::new();
    enroll(&app, "v1", [7, 0, 0], vec![0.0, 0.0, 0.0]).await;
    create_event(&app, "e1", &["v1"]).await;

    let frame = png(64, 32, [7, 7, 7]);
    app.faces.script(&frame, vec![vec![0.0, 0.0, 0.0]]);

    let mut app = app;
    app.state = app.state.clone().with_camera(Arc::new(ScriptedCamera {
        frames: vec![Bytes::from(frame.clone()), Bytes::from(frame)],
    }));

    let response = app
        .router()
        .oneshot(get_request("/live_attendance?event_id=e1", &admin_token()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "multipart/x-mixed-replace; boundary=frame"
    );

    // The scripted camera runs dry after two frames, which ends the body.
    let body = body_bytes(response).await;
    let text = String::from_utf8_lossy(&body);
    assert_eq!(text.matches("--frame\r\n").count(), 2);
    assert!(text.contains("Marked!"));
    assert!(text.contains("Already Marked"));
}

#[tokio::test]
async fn test_live_stream_without_camera_is_unavailable() {
    let app = TestApp::new();
    create_event(&app, "e1", &[]).await;

    let response = app
        .router()
        .oneshot(get_request("/live_attendance?event_id=e1", &admin_token()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}
