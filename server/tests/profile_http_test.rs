//! HTTP-Level Profile Tests
//!
//! Display name and avatar updates guarded by `updated_at` watermarks.

mod helpers;

use std::io::Cursor;

use axum::body::Body;
use axum::http::{header, Method, StatusCode};
use chrono::TimeDelta;
use helpers::{body_json, TestApp};
use http_body_util::BodyExt;
use image::{ImageFormat, Rgba, RgbaImage};
use serde_json::{json, Value};

const BOUNDARY: &str = "leader-test-boundary";

fn png(size: u32) -> Vec<u8> {
    solid_png(size, [200, 10, 10, 128])
}

fn solid_png(size: u32, rgba: [u8; 4]) -> Vec<u8> {
    let img = RgbaImage::from_pixel(size, size, Rgba(rgba));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

fn multipart_body(image: &[u8], updated_at: Option<&str>) -> Vec<u8> {
    let mut body = Vec::new();
    if let Some(ts) = updated_at {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"updated_at\"\r\n\r\n{ts}\r\n"
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"avatar\"; filename=\"a.png\"\r\nContent-Type: image/png\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(image);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

async fn upload(app: &TestApp, token: &str, image: &[u8], updated_at: Option<&str>) -> (StatusCode, Value) {
    let request = TestApp::request(Method::POST, "/v1/users/me/avatar")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(image, updated_at)))
        .unwrap();
    let response = app.oneshot(request).await;
    let status = response.status();
    (status, body_json(response).await)
}

async fn patch(app: &TestApp, token: &str, body: Value) -> (StatusCode, Value) {
    app.send(Method::PATCH, "/v1/users/me", Some(token), Some(body))
        .await
}

#[tokio::test]
async fn test_get_me() {
    let app = TestApp::new();
    let (alice_id, alice) = app.register("alice").await;

    let (status, me) = app.get("/v1/users/me", &alice).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["id"], alice_id.to_string());
    assert_eq!(me["email"], "alice@example.com");
    assert_eq!(me["updated_at"], "2026-03-01T12:00:00.000Z");
    assert!(me.get("password_hash").is_none());
}

#[tokio::test]
async fn test_display_name_newer_write_wins() {
    let app = TestApp::new();
    let (_, alice) = app.register("alice").await;

    let (status, me) = patch(
        &app,
        &alice,
        json!({ "display_name": "Phone", "updated_at": "2026-03-01T12:00:02.000Z" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["display_name"], "Phone");

    // An older edit from another device loses and sees the current row.
    let (status, me) = patch(
        &app,
        &alice,
        json!({ "display_name": "Tablet", "updated_at": "2026-03-01T12:00:01.000Z" }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(me["display_name"], "Phone");
    assert_eq!(me["updated_at"], "2026-03-01T12:00:02.000Z");

    // Replaying the winning write is a no-op.
    let (status, me) = patch(
        &app,
        &alice,
        json!({ "display_name": "Phone", "updated_at": "2026-03-01T12:00:02.000Z" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["display_name"], "Phone");
}

#[tokio::test]
async fn test_display_name_defaults_to_server_time_and_can_clear() {
    let app = TestApp::new();
    let (_, alice) = app.register("alice").await;

    app.clock.advance(TimeDelta::seconds(1));
    let (status, me) = patch(&app, &alice, json!({ "display_name": "  Ally  " })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["display_name"], "Ally");

    app.clock.advance(TimeDelta::seconds(1));
    let (status, me) = patch(&app, &alice, json!({ "display_name": "" })).await;
    assert_eq!(status, StatusCode::OK);
    assert!(me.get("display_name").is_none());
}

#[tokio::test]
async fn test_display_name_validation() {
    let app = TestApp::new();
    let (_, alice) = app.register("alice").await;
    app.clock.advance(TimeDelta::seconds(1));

    let (status, body) = patch(&app, &alice, json!({ "display_name": "x".repeat(49) })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["fields"]["display_name"].is_string());

    let (status, _) = patch(&app, &alice, json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = patch(
        &app,
        &alice,
        json!({ "display_name": "ok", "updated_at": "yesterday" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "INVALID_UPDATED_AT");
}

#[tokio::test]
async fn test_avatar_upload() {
    let app = TestApp::new();
    let (alice_id, alice) = app.register("alice").await;
    app.clock.advance(TimeDelta::seconds(1));

    let (status, me) = upload(&app, &alice, &png(512), None).await;
    assert_eq!(status, StatusCode::OK, "{me}");
    let url = me["avatar_url"].as_str().unwrap();
    assert!(url.starts_with(&format!("/avatars/{alice_id}-")));
    assert!(url.contains(".jpg?v="));

    // Served back as a JPEG.
    let path = url.split('?').next().unwrap();
    let request = TestApp::request(Method::GET, path)
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_avatar_rejects_wrong_size_and_stale_watermark() {
    let app = TestApp::new();
    let (_, alice) = app.register("alice").await;

    let (status, body) = upload(&app, &alice, &png(256), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["fields"]["avatar"], "avatar must be 512x512");

    let (status, body) = upload(&app, &alice, b"not an image", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "VALIDATION_ERROR");

    patch(
        &app,
        &alice,
        json!({ "display_name": "Ally", "updated_at": "2026-03-01T12:00:05.000Z" }),
    )
    .await;
    let (status, me) = upload(&app, &alice, &png(512), Some("2026-03-01T12:00:04.000Z")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(me.get("avatar_url").is_none());
}

async fn fetch(app: &TestApp, url: &str) -> (StatusCode, Vec<u8>) {
    let path = url.split('?').next().unwrap();
    let request = TestApp::request(Method::GET, path)
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await;
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, bytes.to_vec())
}

fn stored_avatars(app: &TestApp) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(app.avatars.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".jpg"))
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn test_stale_avatar_upload_leaves_served_image_untouched() {
    let app = TestApp::new();
    let (_, alice) = app.register("alice").await;

    let red = solid_png(512, [255, 0, 0, 255]);
    let (status, me) = upload(&app, &alice, &red, Some("2026-03-01T12:00:05.000Z")).await;
    assert_eq!(status, StatusCode::OK);
    let url = me["avatar_url"].as_str().unwrap().to_string();
    let (_, before) = fetch(&app, &url).await;

    let blue = solid_png(512, [0, 0, 255, 255]);
    let (status, me) = upload(&app, &alice, &blue, Some("2026-03-01T12:00:04.000Z")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(me["avatar_url"], url.as_str());

    let (status, after) = fetch(&app, &url).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(before, after);
    assert_eq!(stored_avatars(&app).len(), 1);
}

#[tokio::test]
async fn test_newer_avatar_replaces_previous_file() {
    let app = TestApp::new();
    let (_, alice) = app.register("alice").await;

    let (_, first) = upload(
        &app,
        &alice,
        &solid_png(512, [255, 0, 0, 255]),
        Some("2026-03-01T12:00:05.000Z"),
    )
    .await;
    let first_url = first["avatar_url"].as_str().unwrap().to_string();

    let (status, second) = upload(
        &app,
        &alice,
        &solid_png(512, [0, 0, 255, 255]),
        Some("2026-03-01T12:00:06.000Z"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let second_url = second["avatar_url"].as_str().unwrap();
    assert_ne!(first_url.split('?').next(), second_url.split('?').next());

    let (status, _) = fetch(&app, &first_url).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = fetch(&app, second_url).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stored_avatars(&app).len(), 1);
}
