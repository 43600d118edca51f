//! Merge endpoint integration tests.
//!
//! Tests verify:
//! - Grouping, ordering and archive naming
//! - Validation failures and their status codes
//! - Payload ceiling enforcement before parsing
//! - Concatenation failures and tool availability

use axum::body::Body;
use axum::http::{Request, StatusCode};

use audio_joiner::UploadLimits;

use super::test_utils::{
    body_bytes, body_json, failing_app, merge_request, read_zip, test_app, test_config,
    MultipartBuilder, GOOD_TOKEN,
};

// =============================================================================
// Successful Merges
// =============================================================================

#[tokio::test]
async fn test_five_files_in_groups_of_two() {
    let app = test_app(test_config());
    let form = MultipartBuilder::new()
        .text("count", "2")
        .mp3("a")
        .mp3("b")
        .mp3("c")
        .mp3("d")
        .mp3("e");

    let response = app.send(merge_request(form, Some(GOOD_TOKEN))).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/zip"
    );
    assert_eq!(
        response.headers().get("content-disposition").unwrap(),
        "attachment; filename=\"merged_files.zip\""
    );
    assert!(response.headers().contains_key("x-process-time"));

    let entries = read_zip(&body_bytes(response).await);
    assert_eq!(
        entries,
        vec![
            ("merged_1.mp3".to_string(), b"ID3aID3b".to_vec()),
            ("merged_2.mp3".to_string(), b"ID3cID3d".to_vec()),
            ("merged_3.mp3".to_string(), b"ID3e".to_vec()),
        ]
    );
    assert_eq!(app.concat.calls(), 3);
}

#[tokio::test]
async fn test_count_after_files() {
    let app = test_app(test_config());
    let form = MultipartBuilder::new().mp3("x").mp3("y").text("count", "2");

    let response = app.send(merge_request(form, Some(GOOD_TOKEN))).await;

    assert_eq!(response.status(), StatusCode::OK);
    let entries = read_zip(&body_bytes(response).await);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].1, b"ID3xID3y".to_vec());
}

#[tokio::test]
async fn test_single_group_of_all_files() {
    let app = test_app(test_config());
    let form = MultipartBuilder::new()
        .text("count", "1")
        .mp3("only");

    let response = app.send(merge_request(form, Some(GOOD_TOKEN))).await;

    assert_eq!(response.status(), StatusCode::OK);
    let entries = read_zip(&body_bytes(response).await);
    assert_eq!(entries, vec![("merged_1.mp3".to_string(), b"ID3only".to_vec())]);
}

#[tokio::test]
async fn test_mixed_audio_types() {
    let app = test_app(test_config());
    let form = MultipartBuilder::new()
        .text("count", "2")
        .mp3("a")
        .file("b.wav", "audio/wav", b"RIFF\x24\x00\x00\x00WAVEfmt ");

    let response = app.send(merge_request(form, Some(GOOD_TOKEN))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.concat.calls(), 1);
}

// =============================================================================
// Validation Failures
// =============================================================================

#[tokio::test]
async fn test_too_many_files_rejected_without_concatenation() {
    let app = test_app(test_config());
    let mut form = MultipartBuilder::new().text("count", "1");
    for i in 0..51 {
        form = form.mp3(&format!("f{}", i));
    }

    let response = app.send(merge_request(form, Some(GOOD_TOKEN))).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"], "Too many files (>50). Reduce the number of files.");
    assert_eq!(app.concat.calls(), 0);
}

#[tokio::test]
async fn test_no_files() {
    let app = test_app(test_config());
    let form = MultipartBuilder::new().text("count", "1");

    let response = app.send(merge_request(form, Some(GOOD_TOKEN))).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "No files provided");
}

#[tokio::test]
async fn test_missing_count() {
    let app = test_app(test_config());
    let form = MultipartBuilder::new().mp3("a");

    let response = app.send(merge_request(form, Some(GOOD_TOKEN))).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await["error"],
        "Parameter 'count' is required and must be integer"
    );
}

#[tokio::test]
async fn test_zero_count() {
    let app = test_app(test_config());
    let form = MultipartBuilder::new().text("count", "0").mp3("a");

    let response = app.send(merge_request(form, Some(GOOD_TOKEN))).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "Parameter 'count' must be > 0");
}

#[tokio::test]
async fn test_count_larger_than_file_count() {
    let app = test_app(test_config());
    let form = MultipartBuilder::new().text("count", "3").mp3("a").mp3("b");

    let response = app.send(merge_request(form, Some(GOOD_TOKEN))).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await["error"],
        "Parameter 'count' must be <= number of files"
    );
    assert_eq!(app.concat.calls(), 0);
}

#[tokio::test]
async fn test_unsupported_file_type() {
    let app = test_app(test_config());
    let form = MultipartBuilder::new()
        .text("count", "1")
        .file("notes.txt", "text/plain", b"hello");

    let response = app.send(merge_request(form, Some(GOOD_TOKEN))).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await["error"],
        "File notes.txt is not a supported audio file"
    );
}

#[tokio::test]
async fn test_corrupt_mp3() {
    let app = test_app(test_config());
    let form = MultipartBuilder::new()
        .text("count", "1")
        .file("fake.mp3", "audio/mpeg", b"definitely not audio");

    let response = app.send(merge_request(form, Some(GOOD_TOKEN))).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "File fake.mp3 is not a valid MP3");
}

#[tokio::test]
async fn test_file_over_per_file_limit() {
    let config = test_config().with_limits(UploadLimits {
        max_files: 10,
        max_file_bytes: 16,
        max_total_bytes: 1024 * 1024,
    });
    let app = test_app(config);
    let mut big = b"ID3".to_vec();
    big.resize(32, b'x');
    let form = MultipartBuilder::new()
        .text("count", "1")
        .file("big.mp3", "audio/mpeg", &big);

    let response = app.send(merge_request(form, Some(GOOD_TOKEN))).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert!(json["error"].as_str().unwrap().starts_with("File 'big.mp3' is too large"));
}

#[tokio::test]
async fn test_non_multipart_body() {
    let app = test_app(test_config());
    let request = Request::builder()
        .method("POST")
        .uri("/merge")
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {}", GOOD_TOKEN))
        .body(Body::from("{\"count\": 2}"))
        .unwrap();

    let response = app.send(request).await;

    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(
        body_json(response).await["error"],
        "Content-Type must be multipart/form-data"
    );
}

// =============================================================================
// Payload Ceiling
// =============================================================================

#[tokio::test]
async fn test_declared_length_over_ceiling() {
    let app = test_app(test_config().with_limits(UploadLimits::from_megabytes(50, 1, 1)));
    let form = MultipartBuilder::new()
        .text("count", "1")
        .file("big.mp3", "audio/mpeg", &vec![0xFF; 1536 * 1024]);

    let response = app.send(merge_request(form, Some(GOOD_TOKEN))).await;

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(
        body_json(response).await["error"],
        "The total upload is too large (> 1 MB)."
    );
    assert_eq!(app.concat.calls(), 0);
}

#[tokio::test]
async fn test_ceiling_checked_before_authentication() {
    let app = test_app(test_config().with_limits(UploadLimits::from_megabytes(50, 1, 1)));
    let form = MultipartBuilder::new()
        .text("count", "1")
        .file("big.mp3", "audio/mpeg", &vec![0xFF; 1536 * 1024]);

    let response = app.send(merge_request(form, None)).await;

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_undeclared_length_over_ceiling() {
    let app = test_app(test_config().with_limits(UploadLimits::from_megabytes(50, 1, 1)));
    let body = MultipartBuilder::new()
        .text("count", "1")
        .file("big.mp3", "audio/mpeg", &vec![0xFF; 1536 * 1024])
        .build();
    let request = Request::builder()
        .method("POST")
        .uri("/merge")
        .header("content-type", MultipartBuilder::content_type())
        .header("authorization", format!("Bearer {}", GOOD_TOKEN))
        .body(Body::from(body))
        .unwrap();

    let response = app.send(request).await;

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(app.concat.calls(), 0);
}

// =============================================================================
// Concatenation Failures
// =============================================================================

#[tokio::test]
async fn test_group_failure_returns_500() {
    let router = failing_app(test_config());
    let form = MultipartBuilder::new().text("count", "1").mp3("a").mp3("b");

    let response = {
        use tower::ServiceExt;
        router.oneshot(merge_request(form, Some(GOOD_TOKEN))).await.unwrap()
    };

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = body_json(response).await;
    assert!(json["error"].as_str().unwrap().starts_with("Group "));
}

#[tokio::test]
async fn test_tool_unavailable() {
    let app = test_app(test_config().with_tool_available(false));
    let form = MultipartBuilder::new().text("count", "1").mp3("a");

    let response = app.send(merge_request(form, Some(GOOD_TOKEN))).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body_json(response).await["error"],
        "FFmpeg is not available in runtime"
    );
    assert_eq!(app.concat.calls(), 0);
}

#[tokio::test]
async fn test_validation_precedes_tool_check() {
    let app = test_app(test_config().with_tool_available(false));
    let form = MultipartBuilder::new().text("count", "5").mp3("a");

    let response = app.send(merge_request(form, Some(GOOD_TOKEN))).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
