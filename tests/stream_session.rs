use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use mockito::{Matcher, Server, ServerGuard};
use recipe_stream::config::ProviderConfig;
use recipe_stream::server::{router, AppState};
use recipe_stream::{
    AppConfig, FragmentStream, GenerationDispatcher, GenerationError, GenerationRequest,
    HttpSubscriber, Provider, ProviderSource, RecipeProvider, RecipeStream, SessionState,
    StreamRelay,
};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

const RECIPE_CHUNKS: [&str; 4] = [
    "- 요리명: 김치볶음밥\\n",
    "- 재료:\\n  - 김치 1컵\\n  - 밥 1공기\\n",
    "- 조리법:\\n  1. 김치를 볶는다\\n  2. 밥을 넣고 섞는다\\n",
    "- 조리시간: 15분\\n- 난이도: 쉬움",
];

fn openai_body() -> String {
    let mut body = String::new();
    for chunk in RECIPE_CHUNKS {
        body.push_str(&format!(
            "data: {{\"choices\":[{{\"delta\":{{\"content\":\"{}\"}}}}]}}\n\n",
            chunk
        ));
    }
    // a broken chunk in the middle of the stream is skipped
    body.push_str("data: {\"choices\":[\n\n");
    body.push_str("data: [DONE]\n\n");
    body
}

fn config_for(upstream: &ServerGuard) -> AppConfig {
    let mut config = AppConfig::default();
    let mut openai = ProviderConfig::defaults_for(Provider::OpenAI);
    openai.api_key = Some("test-key".to_string());
    openai.base_url = Some(upstream.url());
    config.providers.insert("openai".to_string(), openai);
    config
}

fn parse_frame(frame: &str) -> Value {
    let data = frame.trim().trim_start_matches("data:").trim();
    serde_json::from_str(data).unwrap()
}

async fn start_app(config: AppConfig) -> String {
    serve_state(AppState::from_config(&config).unwrap()).await
}

async fn serve_state(state: AppState) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });
    format!("http://{}", address)
}

#[tokio::test]
async fn test_end_to_end_session_produces_valid_recipe() {
    let mut upstream = Server::new_async().await;
    let mock = upstream
        .mock("POST", "/v1/chat/completions")
        .match_header("authorization", "Bearer test-key")
        .match_body(Matcher::PartialJson(serde_json::json!({ "stream": true })))
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(openai_body())
        .create_async()
        .await;

    let base_url = start_app(config_for(&upstream)).await;
    let mut stream = RecipeStream::new(HttpSubscriber::new(&base_url));

    stream
        .generate(vec!["김치", "밥"], Some("간단하게".to_string()))
        .unwrap();
    let snapshot = stream.wait_for_terminal().await;

    assert_eq!(snapshot.state, SessionState::Done, "{:?}", snapshot.error);
    assert_eq!(
        snapshot.buffer,
        RECIPE_CHUNKS.concat().replace("\\n", "\n")
    );

    let recipe = stream.finalize().unwrap();
    assert_eq!(recipe.title, "김치볶음밥");
    assert_eq!(recipe.ingredients, vec!["김치 1컵", "밥 1공기"]);
    assert_eq!(recipe.instructions, vec!["김치를 볶는다", "밥을 넣고 섞는다"]);
    assert_eq!(recipe.cook_time, 15);
    assert_eq!(recipe.difficulty, "쉬움");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_unreachable_upstream_ends_in_error_with_empty_buffer() {
    let mut config = AppConfig::default();
    let mut openai = ProviderConfig::defaults_for(Provider::OpenAI);
    openai.api_key = Some("test-key".to_string());
    openai.base_url = Some("http://127.0.0.1:1".to_string());
    config.providers.insert("openai".to_string(), openai);

    let base_url = start_app(config).await;
    let mut stream = RecipeStream::new(HttpSubscriber::new(&base_url));

    stream.generate(vec!["두부"], None).unwrap();
    let snapshot = stream.wait_for_terminal().await;

    assert_eq!(snapshot.state, SessionState::Error);
    assert_eq!(snapshot.buffer, "");
    assert!(snapshot.error.is_some());
}

#[tokio::test]
async fn test_upstream_error_status_is_single_error_frame() {
    let mut upstream = Server::new_async().await;
    let _mock = upstream
        .mock("POST", "/v1/chat/completions")
        .with_status(429)
        .with_body(r#"{"error":{"message":"Rate limit reached"}}"#)
        .create_async()
        .await;

    let base_url = start_app(config_for(&upstream)).await;
    let body = reqwest::Client::new()
        .get(format!("{}/recipes/generate-ai-stream", base_url))
        .query(&[("ingredients", r#"["감자"]"#)])
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    let frames: Vec<&str> = body.split("\n\n").filter(|f| !f.is_empty()).collect();
    assert_eq!(frames.len(), 1);
    let frame = parse_frame(frames[0]);
    assert!(frame["error"].as_str().unwrap().contains("429"));
    assert!(frame.get("content").is_none());
}

#[tokio::test]
async fn test_invalid_query_gets_error_frame_and_stream_headers() {
    let upstream = Server::new_async().await;
    let base_url = start_app(config_for(&upstream)).await;

    let response = reqwest::Client::new()
        .get(format!("{}/recipes/generate-ai-stream", base_url))
        .query(&[("ingredients", "[]")])
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let headers = response.headers().clone();
    assert_eq!(headers["content-type"], "text/event-stream");
    assert_eq!(headers["cache-control"], "no-cache");

    let body = response.text().await.unwrap();
    assert!(body.ends_with("\n\n"));
    assert_eq!(body.matches("data:").count(), 1);
    let frame = parse_frame(&body);
    assert!(frame["error"].as_str().unwrap().contains("ingredient"));
}

#[tokio::test]
async fn test_generate_endpoint_with_remote_upstream() {
    let mut upstream = Server::new_async().await;
    let mock = upstream
        .mock("POST", "/api/recipes/generate-stream")
        .match_body(Matcher::PartialJson(serde_json::json!({
            "ingredients": ["감자", "양파"],
            "provider": "claude"
        })))
        .with_status(200)
        .with_body("요리명: 감자조림\n재료: 감자, 양파\n조리법:\n1. 감자를 졸인다\n4인분 기준")
        .create_async()
        .await;

    let mut config = AppConfig::default();
    config.relay.upstream_url = Some(format!("{}/api/recipes/generate-stream", upstream.url()));
    let base_url = start_app(config).await;

    let response = reqwest::Client::new()
        .post(format!("{}/api/recipes/generate", base_url))
        .json(&serde_json::json!({
            "ingredients": ["감자", "양파"],
            "provider": "claude"
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["is_valid"], true);
    assert_eq!(body["data"]["recipe"]["title"], "감자조림");
    assert_eq!(body["data"]["recipe"]["servings"], 4);
    assert_eq!(body["data"]["recipe"]["ingredients"][1], "양파");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_generate_endpoint_reports_failures() {
    let mut upstream = Server::new_async().await;
    let _mock = upstream
        .mock("POST", "/generate")
        .with_status(500)
        .create_async()
        .await;

    let mut config = AppConfig::default();
    config.relay.upstream_url = Some(format!("{}/generate", upstream.url()));
    let base_url = start_app(config).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/api/recipes/generate", base_url))
        .json(&serde_json::json!({ "ingredients": ["쌀"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 502);

    let response = client
        .post(format!("{}/api/recipes/generate", base_url))
        .json(&serde_json::json!({ "ingredients": [] }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_health() {
    let base_url = start_app(AppConfig::default()).await;
    let body: Value = reqwest::get(format!("{}/health", base_url))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "recipe-stream");
}

type Upstream = mpsc::Sender<Result<String, GenerationError>>;

/// Upstream fed by the test, one fragment at a time
struct ChannelProvider {
    fragments: Mutex<Option<mpsc::Receiver<Result<String, GenerationError>>>>,
}

#[async_trait]
impl RecipeProvider for ChannelProvider {
    fn provider_name(&self) -> &str {
        "channel"
    }

    async fn open_stream(&self, _: &GenerationRequest) -> Result<FragmentStream, GenerationError> {
        let rx = self
            .fragments
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| GenerationError::transport("already streaming"))?;
        Ok(ReceiverStream::new(rx).boxed())
    }
}

struct Fixed(Arc<ChannelProvider>);

impl ProviderSource for Fixed {
    fn provider_for(&self, _: Provider) -> Result<Arc<dyn RecipeProvider>, GenerationError> {
        Ok(self.0.clone())
    }
}

async fn start_channel_app() -> (String, Upstream) {
    let (tx, rx) = mpsc::channel(4);
    let provider = Arc::new(ChannelProvider {
        fragments: Mutex::new(Some(rx)),
    });
    let dispatcher = GenerationDispatcher::new(
        Arc::new(Fixed(provider)),
        StreamRelay::new(Duration::from_secs(30)),
        4,
    );
    let base_url = serve_state(AppState::new(dispatcher, Provider::OpenAI)).await;
    (base_url, tx)
}

/// Keep feeding `upstream` until the server drops it; `false` if it never does
async fn upstream_released(upstream: &Upstream) -> bool {
    let released = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            tokio::select! {
                _ = upstream.closed() => break,
                _ = tokio::time::sleep(Duration::from_millis(50)) => {
                    if upstream.send(Ok("...".to_string())).await.is_err() {
                        break;
                    }
                }
            }
        }
    })
    .await;
    released.is_ok() && upstream.is_closed()
}

#[tokio::test]
async fn test_client_disconnect_cancels_upstream() {
    let (base_url, upstream) = start_channel_app().await;

    let mut response = reqwest::Client::new()
        .get(format!("{}/recipes/generate-ai-stream", base_url))
        .query(&[("ingredients", r#"["배추"]"#)])
        .send()
        .await
        .unwrap();

    upstream.send(Ok("요리명: 배추".to_string())).await.unwrap();
    let first = response.chunk().await.unwrap().unwrap();
    let frame = parse_frame(std::str::from_utf8(&first).unwrap());
    assert_eq!(frame["content"], "요리명: 배추");

    drop(response);
    assert!(upstream_released(&upstream).await);
}

#[tokio::test]
async fn test_consumer_cancel_releases_upstream() {
    let (base_url, upstream) = start_channel_app().await;
    let mut stream = RecipeStream::new(HttpSubscriber::new(&base_url));

    stream.generate(vec!["배추"], None).unwrap();
    upstream.send(Ok("요리명: 배추전".to_string())).await.unwrap();
    let mut snapshots = stream.watch().unwrap();
    snapshots
        .wait_for(|snapshot| snapshot.buffer == "요리명: 배추전")
        .await
        .unwrap();

    stream.cancel();
    assert_eq!(stream.state(), SessionState::Error);
    assert_eq!(stream.buffer(), "요리명: 배추전");
    assert!(upstream_released(&upstream).await);
}
