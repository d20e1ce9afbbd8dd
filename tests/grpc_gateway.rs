//! End-to-end tests: a real gRPC server on an ephemeral port, mock models,
//! driven through the client.

use std::sync::Arc;
use std::time::Duration;

use embedding_gateway::models::mock::{MockEmbeddingModel, MockModelLoader, FAIL_MARKER};
use embedding_gateway::models::DEFAULT_MODEL_NAME;
use embedding_gateway::{ClientError, EmbedGatewayClient, EmbeddingServer, ServerConfig};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tonic::Code;

const DIM: usize = 8;

struct Running {
    endpoint: String,
    loader: Arc<MockModelLoader>,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

async fn start(loader: MockModelLoader) -> Running {
    let mut config = ServerConfig::default();
    config.network.grpc_bind_address = "127.0.0.1:0".to_string();

    let loader = Arc::new(loader);
    let server = EmbeddingServer::with_loader(config, loader.clone())
        .await
        .unwrap();
    let endpoint = format!("http://{}", server.local_addr().unwrap());

    let (stop, stopped) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        server
            .serve_with_shutdown(async move {
                let _ = stopped.await;
            })
            .await
            .unwrap();
    });

    Running {
        endpoint,
        loader,
        stop,
        handle,
    }
}

async fn connect(endpoint: &str) -> EmbedGatewayClient {
    for _ in 0..50 {
        if let Ok(client) = EmbedGatewayClient::connect(endpoint.to_string()).await {
            return client;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("server at {endpoint} never became reachable");
}

async fn stop(running: Running) {
    let _ = running.stop.send(());
    running.handle.await.unwrap();
}

fn status_code(err: ClientError) -> Code {
    match err {
        ClientError::Rpc(status) => status.code(),
        other => panic!("expected an RPC status, got {other:?}"),
    }
}

#[tokio::test]
async fn embed_and_embed_batch_agree() {
    let running = start(MockModelLoader::new(DIM)).await;
    let mut client = connect(&running.endpoint).await;

    let texts: Vec<String> = (0..5).map(|i| format!("sentence number {i}")).collect();
    let batch = client.embed_batch(texts.clone(), Some("m")).await.unwrap();
    assert_eq!(batch.len(), texts.len());

    for (text, vector) in texts.iter().zip(&batch) {
        let single = client.embed(text, Some("m")).await.unwrap();
        assert_eq!(&single, vector);
        assert_eq!(single, MockEmbeddingModel::vector_for(text, DIM));
    }

    // One construction serves every request for the model
    assert_eq!(running.loader.requested(), vec!["m".to_string()]);
    drop(client);
    stop(running).await;
}

#[tokio::test]
async fn empty_model_field_uses_default() {
    let running = start(MockModelLoader::new(DIM)).await;
    let mut client = connect(&running.endpoint).await;

    let vector = client.embed("hello", None).await.unwrap();
    assert_eq!(vector.len(), DIM);
    assert_eq!(running.loader.requested(), vec![DEFAULT_MODEL_NAME.to_string()]);

    drop(client);
    stop(running).await;
}

#[tokio::test]
async fn concurrent_first_requests_load_once() {
    let loader = MockModelLoader::new(DIM).with_load_delay(Duration::from_millis(100));
    let running = start(loader).await;
    let client = connect(&running.endpoint).await;

    let calls: Vec<_> = (0..8)
        .map(|i| {
            let mut client = client.clone();
            tokio::spawn(async move { client.embed(&format!("text {i}"), Some("cold")).await })
        })
        .collect();
    for call in calls {
        call.await.unwrap().unwrap();
    }

    assert_eq!(running.loader.constructions(), 1);
    drop(client);
    stop(running).await;
}

#[tokio::test]
async fn failures_surface_as_status_codes() {
    let running = start(MockModelLoader::new(DIM).failing("missing")).await;
    let mut client = connect(&running.endpoint).await;

    let err = client.embed("x", Some("missing")).await.unwrap_err();
    match &err {
        ClientError::Rpc(status) => {
            assert_eq!(status.code(), Code::FailedPrecondition);
            assert!(status.message().starts_with("model_load_error"));
        }
        other => panic!("unexpected error {other:?}"),
    }

    let err = client
        .embed_batch(vec!["fine".to_string(), FAIL_MARKER.to_string()], Some("m"))
        .await
        .unwrap_err();
    assert_eq!(status_code(err), Code::Internal);

    // The failing batch does not poison the model
    assert_eq!(client.embed("fine", Some("m")).await.unwrap().len(), DIM);

    let err = client.embed_batch(Vec::new(), None).await.unwrap_err();
    assert_eq!(status_code(err), Code::InvalidArgument);

    drop(client);
    stop(running).await;
}

#[tokio::test]
async fn failed_load_is_retried_on_next_request() {
    let running = start(MockModelLoader::new(DIM).failing("flaky")).await;
    let mut client = connect(&running.endpoint).await;

    assert!(client.embed("x", Some("flaky")).await.is_err());
    running.loader.heal("flaky");
    assert_eq!(client.embed("x", Some("flaky")).await.unwrap().len(), DIM);
    assert_eq!(running.loader.constructions(), 2);

    drop(client);
    stop(running).await;
}
