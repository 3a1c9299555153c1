//! Local HTTP API integration tests
//!
//! Every test binds a real server on an ephemeral loopback port.

mod common;

use common::TestServer;
use reqwest::StatusCode;
use serde_json::{json, Value};

#[tokio::test]
async fn test_health_reports_uptime() {
    let server = TestServer::start(None).await;
    for path in ["/health", "/api/health"] {
        let resp = server.client.get(server.url(path)).send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "ok");
        assert!(body["uptime"].is_u64());
    }
}

#[tokio::test]
async fn test_path_traversal_is_forbidden() {
    let server = TestServer::start(None).await;
    server.workspace_dir("abc");

    let resp = server
        .client
        .get(server.url("/api/file?ws=abc&path=../../etc/passwd"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = server
        .client
        .post(server.url("/api/file?ws=..&path=escape.txt"))
        .body("x")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert!(!server.workspaces_root().join("../escape.txt").exists());

    let resp = server
        .client
        .get(server.url("/api/stat?ws=abc&path=../abcd"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_file_write_read_and_listing() {
    let server = TestServer::start(None).await;
    server.workspace_dir("abc");

    let resp = server
        .client
        .post(server.url("/api/file?ws=abc&path=src/main.rs"))
        .body("fn main() {}\n")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.json::<Value>().await.unwrap(), json!({ "success": true }));

    let resp = server
        .client
        .get(server.url("/api/file?ws=abc&path=src/main.rs"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/plain"));
    assert_eq!(resp.text().await.unwrap(), "fn main() {}\n");

    let stat: Value = server
        .client
        .get(server.url("/api/stat?ws=abc&path=src/main.rs"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stat["size"], 13);
    assert_eq!(stat["type"], "file");
    assert!(stat["mtimeMs"].as_f64().unwrap() > 0.0);
    assert!(stat.get("ctimeMs").is_some());
    assert!(stat.get("mode").is_some());

    let listing: Value = server
        .client
        .get(server.url("/api/readdir?ws=abc"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listing, json!({ "files": ["src"] }));

    let tree: Value = server
        .client
        .get(server.url("/api/files?ws=abc"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let src = &tree["files"][0];
    assert_eq!(src["name"], "src");
    assert_eq!(src["type"], "directory");
    assert!(src.get("size").is_none());
    assert_eq!(src["children"][0]["path"], "src/main.rs");
    assert_eq!(src["children"][0]["size"], 13);

    let missing = server
        .client
        .get(server.url("/api/file?ws=abc&path=nope.txt"))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let unknown_ws = server
        .client
        .get(server.url("/api/files?ws=ghost"))
        .send()
        .await
        .unwrap();
    assert_eq!(unknown_ws.status(), StatusCode::NOT_FOUND);

    let no_ws = server
        .client
        .get(server.url("/api/file?path=a.txt"))
        .send()
        .await
        .unwrap();
    assert_eq!(no_ws.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_mutations_are_idempotent() {
    let server = TestServer::start(None).await;
    let root = server.workspace_dir("abc");

    for _ in 0..2 {
        let resp = server
            .client
            .post(server.url("/api/mkdir?ws=abc&path=a/b/c"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.json::<Value>().await.unwrap(), json!({}));
    }
    assert!(root.join("a/b/c").is_dir());

    std::fs::write(root.join("a/file.txt"), "x").unwrap();
    for _ in 0..2 {
        let resp = server
            .client
            .post(server.url("/api/unlink?ws=abc&path=a/file.txt"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
    assert!(!root.join("a/file.txt").exists());

    // rmdir only removes empty directories
    let resp = server
        .client
        .post(server.url("/api/rmdir?ws=abc&path=a"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(resp.json::<Value>().await.unwrap()["error"].is_string());

    for _ in 0..2 {
        let resp = server
            .client
            .post(server.url("/api/rmdir?ws=abc&path=a/b/c"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
    assert!(!root.join("a/b/c").exists());
}

#[tokio::test]
async fn test_search_caps_at_200() {
    let server = TestServer::start(None).await;
    let root = server.workspace_dir("abc");

    let line = format!("  let needle = \"{}\";", "y".repeat(120));
    let content = vec![line.as_str(); 125].join("\n");
    std::fs::write(root.join("one.rs"), &content).unwrap();
    std::fs::write(root.join("two.rs"), &content).unwrap();
    std::fs::create_dir_all(root.join("node_modules")).unwrap();
    std::fs::write(root.join("node_modules/dep.js"), "needle").unwrap();

    let results: Vec<Value> = server
        .client
        .get(server.url("/api/search?ws=abc&q=needle"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(results.len(), 200);
    assert_eq!(results[0]["file"], "one.rs");
    assert_eq!(results[0]["line"], 1);
    assert_eq!(results[124]["line"], 125);
    assert_eq!(results[125]["file"], "two.rs");
    assert_eq!(results[199]["line"], 75);
    for r in &results {
        let text = r["text"].as_str().unwrap();
        assert!(text.chars().count() <= 80);
        assert!(text.starts_with("let needle"));
    }

    let empty: Vec<Value> = server
        .client
        .get(server.url("/api/search?ws=ghost&q=needle"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(empty.is_empty());

    let no_query = server
        .client
        .get(server.url("/api/search?ws=abc"))
        .send()
        .await
        .unwrap();
    assert_eq!(no_query.status(), StatusCode::OK);
    assert_eq!(no_query.json::<Vec<Value>>().await.unwrap().len(), 0);
}

#[tokio::test]
async fn test_workspace_listing() {
    let server = TestServer::start(None).await;
    server.workspace_dir("zeta");
    server.workspace_dir("alpha");
    std::fs::write(server.workspaces_root().join("stray.txt"), "x").unwrap();

    let body: Value = server
        .client
        .get(server.url("/api/workspaces"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["workspaces"], json!(["alpha", "zeta"]));
    assert_eq!(body["records"], json!([]));
}

#[tokio::test]
async fn test_settings_roundtrip() {
    let server = TestServer::start(None).await;

    let body: Value = server
        .client
        .get(server.url("/api/settings"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, json!({}));

    let blob = r#"{"theme":"dark","fontSize":14}"#;
    let resp = server
        .client
        .post(server.url("/api/settings"))
        .body(blob)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.json::<Value>().await.unwrap(), json!({ "success": true }));

    let stored = server
        .client
        .get(server.url("/api/settings"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(stored, blob);
    assert_eq!(
        std::fs::read_to_string(server.data.path().join("settings.json")).unwrap(),
        blob
    );
}

#[tokio::test]
async fn test_plugins() {
    let server = TestServer::start(None).await;

    let body: Value = server
        .client
        .get(server.url("/api/plugins"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, json!({ "plugins": [] }));

    let plugins = server.data.path().join("plugins");
    assert!(plugins.is_dir());
    std::fs::write(plugins.join("b.js"), "console.log('b')").unwrap();
    std::fs::write(plugins.join("a.js"), "console.log('a')").unwrap();
    std::fs::write(plugins.join("readme.md"), "docs").unwrap();

    let body: Value = server
        .client
        .get(server.url("/api/plugins"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, json!({ "plugins": ["a.js", "b.js"] }));

    let resp = server
        .client
        .get(server.url("/api/plugin?name=a.js"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["content-type"], "application/javascript");
    assert_eq!(resp.text().await.unwrap(), "console.log('a')");

    for (query, status) in [
        ("name=..%2Fsettings.json", StatusCode::FORBIDDEN),
        ("name=a%5Cb.js", StatusCode::FORBIDDEN),
        ("", StatusCode::FORBIDDEN),
        ("name=ghost.js", StatusCode::NOT_FOUND),
    ] {
        let resp = server
            .client
            .get(server.url(&format!("/api/plugin?{}", query)))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), status, "query {:?}", query);
    }
}

#[tokio::test]
async fn test_auth_guard() {
    let server = TestServer::start(Some("secret")).await;

    let resp = server
        .client
        .get(server.url("/api/workspaces"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert_eq!(
        resp.json::<Value>().await.unwrap(),
        json!({ "error": "Unauthorized" })
    );

    let resp = server
        .client
        .get(server.url("/api/workspaces"))
        .bearer_auth("secret")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = server
        .client
        .get(server.url("/api/workspaces?token=secret"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    // header wins over the query parameter
    let resp = server
        .client
        .get(server.url("/api/workspaces?token=secret"))
        .bearer_auth("wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = server
        .client
        .get(server.url("/api/no-such-route"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    for path in ["/health", "/api/health"] {
        let resp = server.client.get(server.url(path)).send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK, "{}", path);
    }
}

#[tokio::test]
async fn test_cors_and_options() {
    let server = TestServer::start(Some("secret")).await;

    let resp = server
        .client
        .request(reqwest::Method::OPTIONS, server.url("/api/file?ws=abc&path=a"))
        .header("Origin", "http://localhost:3000")
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    assert_eq!(resp.headers()["access-control-allow-origin"], "*");
    assert!(resp.text().await.unwrap().is_empty());

    let resp = server
        .client
        .request(reqwest::Method::OPTIONS, server.url("/api/terminals"))
        .header("Origin", "http://localhost:3000")
        .header("Access-Control-Request-Method", "POST")
        .header("Access-Control-Request-Headers", "authorization,content-type")
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let methods = resp.headers()["access-control-allow-methods"]
        .to_str()
        .unwrap()
        .to_string();
    for method in ["GET", "POST", "OPTIONS", "PUT", "DELETE"] {
        assert!(methods.contains(method), "{}", methods);
    }

    let resp = server
        .client
        .get(server.url("/health"))
        .header("Origin", "http://localhost:3000")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.headers()["access-control-allow-origin"], "*");
}

#[tokio::test]
async fn test_unknown_api_route() {
    let server = TestServer::start(None).await;
    let resp = server
        .client
        .get(server.url("/api/definitely-not-here"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        resp.json::<Value>().await.unwrap(),
        json!({ "error": "Not found" })
    );
}

#[tokio::test]
async fn test_static_front_end() {
    let server = TestServer::start(None).await;
    let public = server.data.path().join("public");
    std::fs::create_dir_all(public.join("assets")).unwrap();
    std::fs::write(public.join("index.html"), "<h1>pocket</h1>").unwrap();
    std::fs::write(public.join("editor.html"), "<h1>editor</h1>").unwrap();
    std::fs::write(public.join("assets/app.js"), "let x = 1;").unwrap();

    let resp = server.client.get(server.url("/")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["content-type"], "text/html");
    assert_eq!(resp.text().await.unwrap(), "<h1>pocket</h1>");

    let resp = server.client.get(server.url("/editor")).send().await.unwrap();
    assert_eq!(resp.text().await.unwrap(), "<h1>editor</h1>");

    let resp = server
        .client
        .get(server.url("/assets/app.js"))
        .send()
        .await
        .unwrap();
    assert!(resp.headers()["content-type"]
        .to_str()
        .unwrap()
        .contains("javascript"));

    let resp = server.client.get(server.url("/missing")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unknown_terminal() {
    let server = TestServer::start(None).await;

    let resp = server
        .client
        .get(server.url("/api/terminals/123/output"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(resp.json::<Value>().await.unwrap(), json!({ "error": "Closed" }));

    let resp = server
        .client
        .post(server.url("/api/terminals/123/input"))
        .body("ls\n")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
