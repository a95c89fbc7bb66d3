use mockito::{Matcher, Server};
use ollama_openrouter_proxy::config::Config;
use ollama_openrouter_proxy::ProxyServer;
use serde_json::{json, Value};

const SSE_HI: &str = "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n\
                      : OPENROUTER PROCESSING\n\n\
                      data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n\
                      data: [DONE]\n\n";

fn config_for(local: &Server, remote: &Server, api_key: &str) -> Config {
    let mut config = Config::default();
    config.server.port = 0;
    config.proxy.local_base_url = local.url();
    config.proxy.remote_base_url = remote.url();
    config.proxy.api_key = api_key.to_string();
    config
}

async fn start_proxy(config: Config) -> (ProxyServer, String) {
    let server = ProxyServer::new(config);
    let addr = server.start().await.expect("Failed to start proxy");
    (server, format!("http://{}", addr))
}

async fn post_chat(base: &str, body: Value) -> reqwest::Response {
    reqwest::Client::new()
        .post(format!("{}/api/chat", base))
        .json(&body)
        .send()
        .await
        .expect("Chat request failed")
}

fn ndjson_lines(body: &str) -> Vec<Value> {
    body.lines()
        .map(|line| serde_json::from_str(line).expect("Invalid NDJSON line"))
        .collect()
}

#[tokio::test]
async fn test_local_model_reaches_local_backend_in_bypass_mode() {
    let mut local = Server::new_async().await;
    let remote = Server::new_async().await;
    let local_chat = local
        .mock("POST", "/api/chat")
        .match_body(Matcher::PartialJson(json!({"model": "llama3"})))
        .with_status(200)
        .with_header("content-type", "application/x-ndjson")
        .with_body("{\"model\":\"llama3\",\"done\":true}\n")
        .expect(1)
        .create_async()
        .await;

    let mut config = config_for(&local, &remote, "");
    config.proxy.enabled = false;
    let (server, base) = start_proxy(config).await;

    let response = post_chat(
        &base,
        json!({"model": "(local) llama3", "messages": [{"role": "user", "content": "hi"}]}),
    )
    .await;
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.text().await.unwrap(),
        "{\"model\":\"llama3\",\"done\":true}\n"
    );

    local_chat.assert_async().await;
    server.stop().await;
}

#[tokio::test]
async fn test_local_marker_bypasses_remote_in_proxy_mode() {
    let mut local = Server::new_async().await;
    let mut remote = Server::new_async().await;
    let local_chat = local
        .mock("POST", "/api/chat")
        .match_body(Matcher::PartialJson(json!({"model": "llama3:8b"})))
        .with_status(200)
        .with_body("{\"done\":true}\n")
        .expect(1)
        .create_async()
        .await;
    let remote_chat = remote
        .mock("POST", "/chat/completions")
        .expect(0)
        .create_async()
        .await;

    let (server, base) = start_proxy(config_for(&local, &remote, "sk-or-test")).await;
    let response = post_chat(
        &base,
        json!({"model": "(local) llama3:8b", "messages": []}),
    )
    .await;
    assert_eq!(response.status(), 200);

    local_chat.assert_async().await;
    remote_chat.assert_async().await;
    server.stop().await;
}

#[tokio::test]
async fn test_blank_api_key_is_unauthorized() {
    let local = Server::new_async().await;
    let remote = Server::new_async().await;
    let (server, base) = start_proxy(config_for(&local, &remote, "   ")).await;

    let response = post_chat(&base, json!({"model": "acme/foo", "messages": []})).await;
    assert_eq!(response.status(), 401);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("API Key"));

    server.stop().await;
}

#[tokio::test]
async fn test_remote_stream_is_transcoded_to_ndjson() {
    let local = Server::new_async().await;
    let mut remote = Server::new_async().await;
    let remote_chat = remote
        .mock("POST", "/chat/completions")
        .match_header("authorization", "Bearer sk-or-test")
        .match_header("x-title", "Ollama OpenRouter Proxy")
        .match_body(Matcher::PartialJson(
            json!({"model": "acme/foo", "stream": true}),
        ))
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(SSE_HI)
        .expect(1)
        .create_async()
        .await;

    let (server, base) = start_proxy(config_for(&local, &remote, "sk-or-test")).await;
    let response = post_chat(
        &base,
        json!({"model": "acme/foo:latest", "messages": [{"role": "user", "content": "hi"}]}),
    )
    .await;

    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()["content-type"],
        "application/x-ndjson"
    );
    let lines = ndjson_lines(&response.text().await.unwrap());
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["model"], "acme/foo:latest");
    assert_eq!(lines[0]["message"]["content"], "Hi");
    assert_eq!(lines[0]["done"], false);
    assert_eq!(lines[1]["done"], true);
    assert_eq!(lines[1]["total_duration"], 0);

    remote_chat.assert_async().await;
    server.stop().await;
}

#[tokio::test]
async fn test_overrides_and_system_prompt_reach_remote() {
    let local = Server::new_async().await;
    let mut remote = Server::new_async().await;
    let remote_chat = remote
        .mock("POST", "/chat/completions")
        .match_body(Matcher::PartialJson(json!({
            "temperature": 0.2,
            "stop": ["END"],
            "response_format": {"type": "json_object"},
            "tools": [{"type": "function"}],
            "messages": [
                {"role": "system", "content": "Be terse."},
                {"role": "user", "content": "hi"}
            ]
        })))
        .with_status(200)
        .with_body("data: [DONE]\n\n")
        .expect(1)
        .create_async()
        .await;

    let mut config = config_for(&local, &remote, "sk-or-test");
    config.proxy.system_prompt = "Be terse.".to_string();
    config.proxy.override_parameters = true;
    config.proxy.parameters.temperature = Some(0.2);
    config.proxy.parameters.stop = Some(vec!["END".to_string()]);
    config.proxy.parameters.response_format = Some("json_object".to_string());
    // the client's own tools survive; bad override text is skipped
    config.proxy.parameters.tool_choice = Some("{not json".to_string());
    let (server, base) = start_proxy(config).await;

    let response = post_chat(
        &base,
        json!({
            "model": "acme/foo",
            "temperature": 0.9,
            "tools": [{"type": "function"}],
            "messages": [{"role": "user", "content": "hi"}]
        }),
    )
    .await;
    assert_eq!(response.status(), 200);
    let lines = ndjson_lines(&response.text().await.unwrap());
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["done"], true);

    remote_chat.assert_async().await;
    server.stop().await;
}

#[tokio::test]
async fn test_remote_error_body_passes_through() {
    let local = Server::new_async().await;
    let mut remote = Server::new_async().await;
    let _remote_chat = remote
        .mock("POST", "/chat/completions")
        .with_status(402)
        .with_header("content-type", "application/json")
        .with_body(r#"{"error":{"message":"Insufficient credits","code":402}}"#)
        .create_async()
        .await;

    let (server, base) = start_proxy(config_for(&local, &remote, "sk-or-test")).await;
    let response = post_chat(&base, json!({"model": "acme/foo", "messages": []})).await;

    assert_eq!(response.status(), 402);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["message"], "Insufficient credits");

    server.stop().await;
}

#[tokio::test]
async fn test_whitelist_and_synthetic_rejections() {
    let local = Server::new_async().await;
    let mut remote = Server::new_async().await;
    let remote_chat = remote
        .mock("POST", "/chat/completions")
        .expect(0)
        .create_async()
        .await;

    let mut config = config_for(&local, &remote, "sk-or-test");
    config.proxy.whitelist.insert("acme/foo".to_string());
    let (server, base) = start_proxy(config).await;

    // Test 1: model outside the whitelist
    let response = post_chat(&base, json!({"model": "acme/bar", "messages": []})).await;
    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Model 'acme/bar' is not in your whitelist.");

    // Test 2: banner row picked as a model
    let response = post_chat(
        &base,
        json!({"model": "ℹ️ Local models are prefixed with (local)", "messages": []}),
    )
    .await;
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(
        body["error"],
        "This is an informational entry, not a usable model."
    );

    remote_chat.assert_async().await;
    server.stop().await;
}

#[tokio::test]
async fn test_catalog_is_merged_and_cached() {
    let mut local = Server::new_async().await;
    let mut remote = Server::new_async().await;
    let local_tags = local
        .mock("GET", "/api/tags")
        .with_status(200)
        .with_body(
            r#"{"models":[{"name":"llama3:latest","model":"llama3:latest","modified_at":"2024-05-01T10:00:00Z","size":4661224676,"digest":"365c0bd3c000","details":{"format":"gguf","family":"llama","parameter_size":"8.0B","quantization_level":"Q4_0"}}]}"#,
        )
        .expect(1)
        .create_async()
        .await;
    let remote_models = remote
        .mock("GET", "/models")
        .match_header("authorization", "Bearer sk-or-test")
        .with_status(200)
        .with_body(r#"{"data":[{"id":"acme/foo-8b"}]}"#)
        .expect(1)
        .create_async()
        .await;

    let (server, base) = start_proxy(config_for(&local, &remote, "sk-or-test")).await;
    let client = reqwest::Client::new();

    let first = client
        .get(format!("{}/api/tags", base))
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), 200);
    let first = first.bytes().await.unwrap();
    let second = client
        .get(format!("{}/api/tags", base))
        .send()
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    assert_eq!(first, second);

    let catalog: Value = serde_json::from_slice(&first).unwrap();
    let names: Vec<&str> = catalog["models"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["name"].as_str().unwrap())
        .collect();
    assert_eq!(names.len(), 4);
    assert!(names[0].starts_with("ℹ️"));
    assert_eq!(names[1], "(local) llama3:latest");
    assert!(names[2].starts_with("═══"));
    assert_eq!(names[3], "acme/foo-8b");
    assert_eq!(catalog["models"][3]["details"]["parameter_size"], "8B");

    local_tags.assert_async().await;
    remote_models.assert_async().await;
    server.stop().await;
}

#[tokio::test]
async fn test_invalidate_forces_refetch() {
    let mut local = Server::new_async().await;
    let remote = Server::new_async().await;
    let local_tags = local
        .mock("GET", "/api/tags")
        .with_status(200)
        .with_body(r#"{"models":[]}"#)
        .expect(2)
        .create_async()
        .await;

    // No API key: the remote list is never requested
    let (server, base) = start_proxy(config_for(&local, &remote, "")).await;
    let url = format!("{}/api/tags", base);

    let body = reqwest::get(&url).await.unwrap().text().await.unwrap();
    assert_eq!(body, r#"{"models":[]}"#);
    server.invalidate_catalog().await;
    reqwest::get(&url).await.unwrap();

    local_tags.assert_async().await;
    server.stop().await;
}

#[tokio::test]
async fn test_unmatched_paths_by_mode() {
    let mut local = Server::new_async().await;
    let remote = Server::new_async().await;
    let version = local
        .mock("GET", "/api/version")
        .match_query(Matcher::UrlEncoded("verbose".into(), "1".into()))
        .with_status(200)
        .with_header("x-upstream", "ollama")
        .with_body(r#"{"version":"0.3.0"}"#)
        .expect(1)
        .create_async()
        .await;

    // Test 1: proxy mode answers 404
    let (server, base) = start_proxy(config_for(&local, &remote, "sk-or-test")).await;
    let response = reqwest::get(format!("{}/api/version?verbose=1", base))
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({"error": "Not Found"}));
    server.stop().await;

    // Test 2: bypass mode forwards path and query
    let mut config = config_for(&local, &remote, "");
    config.proxy.enabled = false;
    let (server, base) = start_proxy(config).await;
    let response = reqwest::get(format!("{}/api/version?verbose=1", base))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["x-upstream"], "ollama");
    assert_eq!(response.text().await.unwrap(), r#"{"version":"0.3.0"}"#);

    version.assert_async().await;
    server.stop().await;
}

#[tokio::test]
async fn test_unreachable_local_backend_is_bad_gateway() {
    let remote = Server::new_async().await;
    let mut config = Config::default();
    config.server.port = 0;
    config.proxy.enabled = false;
    config.proxy.local_base_url = "http://127.0.0.1:1".to_string();
    config.proxy.remote_base_url = remote.url();
    let (server, base) = start_proxy(config).await;

    let response = post_chat(&base, json!({"model": "llama3", "messages": []})).await;
    assert_eq!(response.status(), 502);
    let body: Value = response.json().await.unwrap();
    assert_eq!(
        body["error"],
        "Failed to connect to local Ollama at http://127.0.0.1:1"
    );

    server.stop().await;
}

#[tokio::test]
async fn test_bypass_post_body_is_forwarded_unmodified() {
    let mut local = Server::new_async().await;
    let remote = Server::new_async().await;
    // deliberately odd spacing and key order
    let raw = r#"{"prompt": "hi",  "model":"x"}"#;
    let generate = local
        .mock("POST", "/api/generate")
        .match_body(Matcher::Exact(raw.to_string()))
        .with_status(201)
        .with_header("content-type", "application/x-ndjson")
        .with_body("{\"response\":\"hello\",\"done\":true}\n")
        .expect(1)
        .create_async()
        .await;

    let mut config = config_for(&local, &remote, "");
    config.proxy.enabled = false;
    let (server, base) = start_proxy(config).await;

    let response = reqwest::Client::new()
        .post(format!("{}/api/generate", base))
        .header("content-type", "application/json")
        .body(raw)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    assert_eq!(
        response.text().await.unwrap(),
        "{\"response\":\"hello\",\"done\":true}\n"
    );

    generate.assert_async().await;
    server.stop().await;
}

#[tokio::test]
async fn test_debug_logging_leaves_transcoded_stream_unchanged() {
    let local = Server::new_async().await;
    let mut remote = Server::new_async().await;
    let remote_chat = remote
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(SSE_HI)
        .expect(1)
        .create_async()
        .await;

    let mut config = config_for(&local, &remote, "sk-or-test");
    config.proxy.debug_logging = true;
    let (server, base) = start_proxy(config).await;
    let response = post_chat(
        &base,
        json!({"model": "acme/foo", "messages": [{"content": "hi"}]}),
    )
    .await;

    assert_eq!(response.status(), 200);
    let lines = ndjson_lines(&response.text().await.unwrap());
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["model"], "acme/foo");
    assert_eq!(lines[0]["message"]["content"], "Hi");
    assert_eq!(lines[1]["done"], true);

    remote_chat.assert_async().await;
    server.stop().await;
}
