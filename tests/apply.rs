//! End-to-end tests for the apply engine.
//!
//! Scripted merge backends cover the validation pipeline; wiremock
//! covers the HTTP client path (retry schedule, auth fail-fast).

mod common;

use common::{FailingMerge, ScriptedMerge, TestEnv};
use std::sync::Arc;
use stitch_mcp::apply::{ApplyEngine, HttpMergeClient, MAX_FILE_SIZE_BYTES};

fn engine(env: &TestEnv, merge: Arc<dyn stitch_mcp::apply::MergeApi>) -> ApplyEngine {
    ApplyEngine::new(Arc::clone(&env.settings), merge)
}

const HELLO_GOODBYE: &str =
    "def hello():\n    print('Hello')\n\ndef goodbye():\n    print('Goodbye')\n";

#[tokio::test]
async fn test_new_file_create_skips_remote() {
    let env = TestEnv::new();
    let merge = Arc::new(ScriptedMerge::merged_code("unused"));
    let engine = engine(&env, Arc::clone(&merge) as _);

    let report = engine.apply("/repo/hello.py", "print('hi')\n", None).await;

    assert!(report.is_ok(), "unexpected: {report:?}");
    assert!(report.message.starts_with("Created new file"));
    assert_eq!(env.read("hello.py"), "print('hi')\n");
    assert_eq!(merge.call_count(), 0);
    assert!(report.diff.is_none());
}

#[tokio::test]
async fn test_new_file_creates_parent_directories() {
    let env = TestEnv::new();
    let merge = Arc::new(ScriptedMerge::merged_code("unused"));
    let engine = engine(&env, merge as _);

    let report = engine
        .apply("/repo/deep/nested/mod.rs", "pub fn f() {}\n", None)
        .await;
    assert!(report.is_ok());
    assert_eq!(env.read("deep/nested/mod.rs"), "pub fn f() {}\n");
}

#[tokio::test]
async fn test_successful_edit_writes_merged_code() {
    let env = TestEnv::new();
    env.write_file("a.py", HELLO_GOODBYE);
    let merged =
        "def hello():\n    print('Hello, world!')\n\ndef goodbye():\n    print('Goodbye')\n";
    let merge = Arc::new(ScriptedMerge::merged_code(merged));
    let engine = engine(&env, Arc::clone(&merge) as _);

    let snippet = "def hello():\n    print('Hello, world!')\n# ... existing code ...\ndef goodbye():\n    print('Goodbye')\n";
    let report = engine.apply("/repo/a.py", snippet, None).await;

    assert!(report.is_ok(), "unexpected: {report:?}");
    assert_eq!(env.read("a.py"), merged);
    assert_eq!(merge.call_count(), 1);
    let diff = report.diff.expect("diff expected for a real change");
    assert!(diff.contains("-    print('Hello')"));
    assert!(diff.contains("+    print('Hello, world!')"));

    // The request carried the original file content and our metadata.
    let request = merge.last_request.lock().unwrap().clone().unwrap();
    assert_eq!(request.initial_code, HELLO_GOODBYE);
    assert!(!request.stream);
    assert_eq!(request.metadata.tool, "fast_apply");
}

#[tokio::test]
async fn test_missing_anchors_skip_remote() {
    let env = TestEnv::new();
    env.write_file("a.py", HELLO_GOODBYE);
    let merge = Arc::new(ScriptedMerge::merged_code("unused"));
    let engine = engine(&env, Arc::clone(&merge) as _);

    let snippet =
        "// ... existing code ...\ndef totally_different():\n    return 999\n// ... existing code ...\n";
    let report = engine.apply("/repo/a.py", snippet, None).await;

    assert_eq!(report.code, Some("NEEDS_MORE_CONTEXT"));
    assert_eq!(merge.call_count(), 0);
    assert_eq!(env.read("a.py"), HELLO_GOODBYE);
}

#[tokio::test]
async fn test_position_directive_skips_precheck() {
    let env = TestEnv::new();
    env.write_file("a.py", HELLO_GOODBYE);
    let merged = format!("{HELLO_GOODBYE}\nprint('end')\n");
    let merge = Arc::new(ScriptedMerge::merged_code(&merged));
    let engine = engine(&env, Arc::clone(&merge) as _);

    let report = engine
        .apply("/repo/a.py", "print('end')\n", Some("append to end of file"))
        .await;

    assert!(report.is_ok(), "unexpected: {report:?}");
    assert_eq!(merge.call_count(), 1);
}

#[tokio::test]
async fn test_empty_snippet_rejected() {
    let env = TestEnv::new();
    let merge = Arc::new(ScriptedMerge::merged_code("unused"));
    let engine = engine(&env, merge as _);

    let report = engine.apply("/repo/a.py", "   \n  ", None).await;
    assert_eq!(report.code, Some("INVALID_INPUT"));
}

#[tokio::test]
async fn test_path_outside_base_rejected() {
    let env = TestEnv::new();
    let merge = Arc::new(ScriptedMerge::merged_code("unused"));
    let engine = engine(&env, merge as _);

    let report = engine.apply("/etc/passwd", "x = 1\n", None).await;
    assert_eq!(report.code, Some("INVALID_PATH"));

    let report = engine.apply("../outside.py", "x = 1\n", None).await;
    assert_eq!(report.code, Some("INVALID_PATH"));
}

#[tokio::test]
async fn test_directory_target_rejected() {
    let env = TestEnv::new();
    env.write_file("pkg/mod.rs", "");
    let merge = Arc::new(ScriptedMerge::merged_code("unused"));
    let engine = engine(&env, merge as _);

    let report = engine.apply("/repo/pkg", "x = 1\n", None).await;
    assert_eq!(report.code, Some("INVALID_PATH"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_symlink_target_rejected() {
    let env = TestEnv::new();
    env.write_file("real.py", "x = 1\n");
    std::os::unix::fs::symlink(env.path("real.py"), env.path("link.py")).unwrap();
    let merge = Arc::new(ScriptedMerge::merged_code("unused"));
    let engine = engine(&env, merge as _);

    let report = engine.apply("/repo/link.py", "x = 2\nx = 1\n", None).await;
    assert_eq!(report.code, Some("INVALID_PATH"));
}

#[tokio::test]
async fn test_size_cap_boundary() {
    let env = TestEnv::new();
    let anchor = "anchor_line_that_is_long_enough_to_hit\n";
    // Exactly at the cap: allowed.
    let mut content = anchor.repeat(2);
    content.push_str(&"x".repeat(MAX_FILE_SIZE_BYTES as usize - content.len() - 1));
    content.push('\n');
    assert_eq!(content.len(), MAX_FILE_SIZE_BYTES as usize);
    env.write_file("big.txt", &content);

    let merge = Arc::new(ScriptedMerge::merged_code(&content));
    let engine_at = engine(&env, Arc::clone(&merge) as _);
    let snippet = anchor.repeat(2);
    let report = engine_at.apply("/repo/big.txt", &snippet, None).await;
    assert!(report.is_ok(), "at-cap file should pass: {report:?}");

    // One byte more: rejected before any remote call.
    let mut over = content.clone();
    over.push('y');
    env.write_file("bigger.txt", &over);
    let merge2 = Arc::new(ScriptedMerge::merged_code("unused"));
    let engine_over = engine(&env, Arc::clone(&merge2) as _);
    let report = engine_over.apply("/repo/bigger.txt", &snippet, None).await;
    assert_eq!(report.code, Some("FILE_TOO_LARGE"));
    assert_eq!(merge2.call_count(), 0);
}

#[tokio::test]
async fn test_idempotent_snippet_is_ok_noop() {
    let env = TestEnv::new();
    env.write_file("a.py", HELLO_GOODBYE);
    // Merge returns identical content; the snippet is a subset of the file.
    let merge = Arc::new(ScriptedMerge::merged_code(HELLO_GOODBYE));
    let engine = engine(&env, merge as _);

    let snippet = "def hello():\n    print('Hello')\n";
    let first = engine.apply("/repo/a.py", snippet, None).await;
    assert!(first.is_ok(), "unexpected: {first:?}");
    assert_eq!(first.message, "No changes needed (already matches)");
    assert!(first.diff.is_none());

    // Applying again is stable.
    let second = engine.apply("/repo/a.py", snippet, None).await;
    assert!(second.is_ok());
    assert!(second.diff.is_none());
    assert_eq!(env.read("a.py"), HELLO_GOODBYE);
}

#[tokio::test]
async fn test_apply_noop_when_changes_expected() {
    let env = TestEnv::new();
    env.write_file("a.py", HELLO_GOODBYE);
    let merge = Arc::new(ScriptedMerge::merged_code(HELLO_GOODBYE));
    let engine = engine(&env, merge as _);

    // New distinctive line plus a valid anchor, but the merge changed nothing.
    let snippet = "def hello():\n    print('Hello')\n    print('added line here')\n";
    let report = engine.apply("/repo/a.py", snippet, None).await;
    assert_eq!(report.code, Some("APPLY_NOOP"));
    assert_eq!(env.read("a.py"), HELLO_GOODBYE);
}

#[tokio::test]
async fn test_api_invalid_response() {
    let env = TestEnv::new();
    env.write_file("a.py", HELLO_GOODBYE);
    let merge = Arc::new(ScriptedMerge::raw(serde_json::json!({"usage": {}})));
    let engine = engine(&env, merge as _);

    let snippet = "def hello():\n    print('Hello')\n";
    let report = engine.apply("/repo/a.py", snippet, None).await;
    assert_eq!(report.code, Some("API_INVALID_RESPONSE"));
}

#[tokio::test]
async fn test_api_error_codes() {
    let env = TestEnv::new();
    env.write_file("a.py", HELLO_GOODBYE);
    let snippet = "def hello():\n    print('Hello')\n";

    for (kind, expected) in [
        ("auth", "AUTH_ERROR"),
        ("validation", "API_ERROR"),
        ("server", "API_ERROR"),
        ("timeout", "TIMEOUT_ERROR"),
        ("network", "NETWORK_ERROR"),
    ] {
        let merge = Arc::new(FailingMerge::new(kind));
        let engine = engine(&env, merge as _);
        let report = engine.apply("/repo/a.py", snippet, None).await;
        assert_eq!(report.code, Some(expected), "kind={kind}");
        assert_eq!(env.read("a.py"), HELLO_GOODBYE);
    }
}

#[tokio::test]
async fn test_post_check_failure() {
    // The merge "applied" something unrelated to the requested new line.
    let merged = format!("{HELLO_GOODBYE}# unrelated\n");
    let merge = Arc::new(ScriptedMerge::merged_code(&merged));

    let env = TestEnv::with_settings(|s| s.experimental_post_check = true);
    env.write_file("a.py", HELLO_GOODBYE);
    let engine = ApplyEngine::new(Arc::clone(&env.settings), merge as _);

    let snippet =
        "def hello():\n    print('Hello')\n    configured_result = expensive_computation()\n";
    let report = engine.apply("/repo/a.py", snippet, None).await;
    assert_eq!(report.code, Some("POST_CHECK_FAILED"));
    // Pre-edit content untouched.
    assert_eq!(env.read("a.py"), HELLO_GOODBYE);
}

#[tokio::test]
async fn test_gbk_file_roundtrip() {
    let env = TestEnv::new();
    let original = "\u{4f60}\u{597d}()\nanchor_line_number_one()\nanchor_line_number_two()\n";
    let (bytes, _, _) = encoding_rs::GBK.encode(original);
    std::fs::write(env.path("gbk.txt"), bytes.as_ref()).unwrap();

    let merged = "\u{4f60}\u{597d}\u{4e16}\u{754c}()\nanchor_line_number_one()\nanchor_line_number_two()\n";
    let merge = Arc::new(ScriptedMerge::merged_code(merged));
    let engine = engine(&env, merge as _);

    let snippet = "anchor_line_number_one()\nanchor_line_number_two()\n";
    let report = engine.apply("/repo/gbk.txt", snippet, None).await;
    assert!(report.is_ok(), "unexpected: {report:?}");

    // Written back in GBK, not UTF-8.
    let on_disk = std::fs::read(env.path("gbk.txt")).unwrap();
    let (expected, _, _) = encoding_rs::GBK.encode(merged);
    assert_eq!(on_disk, expected.as_ref());
}

#[tokio::test]
async fn test_binary_file_encoding_error() {
    let env = TestEnv::new();
    let noise: Vec<u8> = (0..512u32).map(|i| (i * 7 % 251) as u8).collect();
    std::fs::write(env.path("blob.bin"), &noise).unwrap();
    let merge = Arc::new(ScriptedMerge::merged_code("unused"));
    let engine = engine(&env, Arc::clone(&merge) as _);

    let snippet = "some_anchor_line_long_enough\nanother_anchor_line_here\n";
    let report = engine.apply("/repo/blob.bin", snippet, None).await;
    assert_eq!(report.code, Some("ENCODING_ERROR"));
    assert_eq!(merge.call_count(), 0);
}

#[tokio::test]
async fn test_backup_written_when_enabled() {
    let backup_root = tempfile::TempDir::new().unwrap();
    let backup_dir = backup_root.path().to_path_buf();
    let env = TestEnv::with_settings(|s| {
        s.backup_enabled = true;
        s.backup_dir = backup_dir.clone();
    });
    env.write_file("a.py", HELLO_GOODBYE);
    let merged = HELLO_GOODBYE.replace("Goodbye", "Farewell");
    let merge = Arc::new(ScriptedMerge::merged_code(&merged));
    let engine = engine(&env, merge as _);

    let snippet = "def goodbye():\n    print('Farewell')\n# ... existing code ...\ndef hello():\n    print('Hello')\n";
    let report = engine.apply("/repo/a.py", snippet, None).await;
    assert!(report.is_ok(), "unexpected: {report:?}");

    // One backup directory per trace, containing the pre-edit bytes.
    let trace_dir = backup_root
        .path()
        .read_dir()
        .unwrap()
        .next()
        .expect("backup dir created")
        .unwrap();
    let backed_up = std::fs::read_to_string(trace_dir.path().join("a.py")).unwrap();
    assert_eq!(backed_up, HELLO_GOODBYE);
}

#[tokio::test]
async fn test_no_tmp_files_left_behind() {
    let env = TestEnv::new();
    env.write_file("a.py", HELLO_GOODBYE);
    let merged = HELLO_GOODBYE.replace("Hello", "Hi there friend");
    let merge = Arc::new(ScriptedMerge::merged_code(&merged));
    let engine = engine(&env, merge as _);

    let snippet = "def hello():\n    print('Hi there friend')\n# ... existing code ...\ndef goodbye():\n    print('Goodbye')\n";
    let report = engine.apply("/repo/a.py", snippet, None).await;
    assert!(report.is_ok());

    let leftovers: Vec<_> = std::fs::read_dir(env.settings.base_dir.as_path())
        .unwrap()
        .flatten()
        .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty());
}

// ─── HTTP client path (wiremock) ─────────────────────────────────────────────

#[tokio::test]
async fn test_retry_then_success_over_http() {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    let env = TestEnv::new();
    env.write_file("a.py", HELLO_GOODBYE);

    let server = MockServer::start().await;
    let merged = HELLO_GOODBYE.replace("Hello", "Howdy partner");
    Mock::given(method("POST"))
        .and(path("/v1/apply"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/apply"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"mergedCode": merged})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let mut settings = (*env.settings).clone();
    settings.apply_endpoint = format!("{}/v1/apply", server.uri());
    let settings = Arc::new(settings);

    let engine = ApplyEngine::new(
        Arc::clone(&settings),
        Arc::new(HttpMergeClient::new(Arc::clone(&settings))),
    );
    let snippet = "def hello():\n    print('Howdy partner')\n# ... existing code ...\ndef goodbye():\n    print('Goodbye')\n";
    let report = engine.apply("/repo/a.py", snippet, None).await;

    assert!(report.is_ok(), "unexpected: {report:?}");
    assert_eq!(env.read("a.py"), merged);
    // Mock expectations assert exactly two requests on drop.
}

#[tokio::test]
async fn test_auth_failure_over_http_is_single_request() {
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(serde_json::json!({"code": "invalid_api_key", "message": "bad key"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let env = TestEnv::with_settings(|s| s.apply_endpoint = server.uri());
    env.write_file("a.py", HELLO_GOODBYE);
    let engine = ApplyEngine::new(
        Arc::clone(&env.settings),
        Arc::new(HttpMergeClient::new(Arc::clone(&env.settings))),
    );

    let snippet = "def hello():\n    print('Hello')\n    print('new line of code')\n";
    let report = engine.apply("/repo/a.py", snippet, None).await;
    assert_eq!(report.code, Some("AUTH_ERROR"));
    let detail = report.detail.expect("auth errors carry API detail");
    assert_eq!(detail["status_code"], 401);
    assert_eq!(detail["api_code"], "invalid_api_key");
}
