//! HTTP API tests against a real listener.

mod common;

use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;

use common::*;
use rag_qa::server::run_server;

struct TestServer {
    base: String,
    handle: tokio::task::JoinHandle<()>,
    _tmp: TempDir,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn start(generator: Arc<ScriptedGenerator>) -> TestServer {
    let tmp = TempDir::new().unwrap();
    let doc = write_document(&tmp, CAT_DOG);
    let pipeline = Arc::new(open_pipeline(test_config(&tmp, &doc), CharEmbedder::new(), generator).await);

    let port = find_free_port();
    let bind = format!("127.0.0.1:{}", port);
    let handle = tokio::spawn(async move {
        run_server(pipeline, &bind).await.unwrap();
    });
    wait_for_server(port).await;

    TestServer {
        base: format!("http://127.0.0.1:{}", port),
        handle,
        _tmp: tmp,
    }
}

#[tokio::test]
async fn test_health_reports_ready() {
    let server = start(ScriptedGenerator::first_passage()).await;
    let body: Value = reqwest::get(format!("{}/api/health", server.base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "rag-qa-system");
    assert_eq!(body["vector_store"], "loaded");
    assert_eq!(body["chain"], "built");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_post_json_query_with_contexts() {
    let server = start(ScriptedGenerator::first_passage()).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/query", server.base))
        .json(&serde_json::json!({ "question": "狗喜欢做什么？", "include_context": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "success");
    assert_eq!(body["data"]["question"], "狗喜欢做什么？");
    assert_eq!(body["data"]["answer"], "狗喜欢跑步。");
    let contexts = body["data"]["contexts"].as_array().unwrap();
    assert_eq!(body["data"]["context_count"], contexts.len());
    assert_eq!(contexts[0]["content"], "狗喜欢跑步。");
    assert!(contexts[0]["metadata"]["source"].is_string());
}

#[tokio::test]
async fn test_post_form_and_get_query() {
    let server = start(ScriptedGenerator::first_passage()).await;
    let client = reqwest::Client::new();

    let body: Value = client
        .post(format!("{}/api/query", server.base))
        .form(&[("question", "猫喜欢做什么？")])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["data"]["answer"], "猫喜欢睡觉。");
    assert!(body["data"].get("contexts").is_none());

    let body: Value = client
        .get(format!("{}/api/query", server.base))
        .query(&[("question", "狗喜欢做什么？"), ("include_context", "true")])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["data"]["answer"], "狗喜欢跑步。");
    assert_eq!(body["data"]["context_count"], 2);
}

#[tokio::test]
async fn test_question_is_echoed_untrimmed() {
    let server = start(ScriptedGenerator::first_passage()).await;
    let client = reqwest::Client::new();

    let body: Value = client
        .post(format!("{}/api/query", server.base))
        .json(&serde_json::json!({ "question": "  狗喜欢做什么？\n" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "success");
    assert_eq!(body["data"]["question"], "  狗喜欢做什么？\n");

    let body: Value = client
        .get(format!("{}/api/history", server.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["data"]["history"][0]["content"], "  狗喜欢做什么？\n");
}

#[tokio::test]
async fn test_blank_question_is_rejected() {
    let server = start(ScriptedGenerator::first_passage()).await;
    let client = reqwest::Client::new();

    for body in [
        serde_json::json!({ "question": "   " }),
        serde_json::json!({ "include_context": true }),
    ] {
        let resp = client
            .post(format!("{}/api/query", server.base))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "error");
        assert_eq!(body["message"], "问题不能为空");
    }

    let resp = client
        .get(format!("{}/api/query", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_pipeline_error_is_500_with_message() {
    let server = start(ScriptedGenerator::failing()).await;
    let resp = reqwest::Client::new()
        .post(format!("{}/api/query", server.base))
        .json(&serde_json::json!({ "question": "狗喜欢做什么？" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "error");
    assert!(body["message"]
        .as_str()
        .unwrap()
        .starts_with("查询过程中出错: "));
}

#[tokio::test]
async fn test_history_roundtrip_and_clear() {
    let server = start(ScriptedGenerator::first_passage()).await;
    let client = reqwest::Client::new();

    client
        .post(format!("{}/api/query", server.base))
        .json(&serde_json::json!({ "question": "狗喜欢做什么？" }))
        .send()
        .await
        .unwrap();

    let body: Value = client
        .get(format!("{}/api/history", server.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "success");
    assert_eq!(body["data"]["count"], 2);
    assert_eq!(body["data"]["history"][0]["role"], "user");
    assert_eq!(body["data"]["history"][0]["content"], "狗喜欢做什么？");
    assert_eq!(body["data"]["history"][1]["role"], "assistant");

    let body: Value = client
        .delete(format!("{}/api/history", server.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["data"]["message"], "对话历史已清空");

    let body: Value = client
        .get(format!("{}/api/history", server.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["data"]["count"], 0);
}
