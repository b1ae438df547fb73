// tests/grpc_export.rs
//! OTLP/gRPC transport against an in-process tonic collector

use logsink::encoding::proto::logs_service_server::{LogsService, LogsServiceServer};
use logsink::encoding::proto::{
    any_value, record_count, ExportLogsPartialSuccess, ExportLogsServiceRequest,
    ExportLogsServiceResponse,
};
use logsink::encoding::{Compression, EncodedBatch, OtlpEncoder};
use logsink::exporter::{GrpcTransport, SendOutcome, Transport, TransportKind};
use logsink::model::{BatchBuilder, Scope};
use logsink::utils::config::ExporterConfig;
use logsink::{Record, Resource, Severity};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tonic::codec::CompressionEncoding;
use tonic::transport::Server;
use tonic::{Request, Response, Status};

#[derive(Debug, Clone, Copy)]
enum Reply {
    Accept,
    RejectSome(i64),
    Unavailable,
    InvalidArgument,
}

#[derive(Debug, Default)]
struct Received {
    requests: Vec<ExportLogsServiceRequest>,
    api_keys: Vec<Option<String>>,
}

struct Collector {
    reply: Reply,
    received: Arc<Mutex<Received>>,
}

#[tonic::async_trait]
impl LogsService for Collector {
    async fn export(
        &self,
        request: Request<ExportLogsServiceRequest>,
    ) -> Result<Response<ExportLogsServiceResponse>, Status> {
        let api_key = request
            .metadata()
            .get("x-api-key")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        {
            let mut received = self.received.lock().unwrap();
            received.api_keys.push(api_key);
            received.requests.push(request.into_inner());
        }

        match self.reply {
            Reply::Accept => Ok(Response::new(ExportLogsServiceResponse::default())),
            Reply::RejectSome(rejected) => Ok(Response::new(ExportLogsServiceResponse {
                partial_success: Some(ExportLogsPartialSuccess {
                    rejected_log_records: rejected,
                    error_message: "timestamp too old".to_string(),
                }),
            })),
            Reply::Unavailable => Err(Status::unavailable("collector restarting")),
            Reply::InvalidArgument => Err(Status::invalid_argument("malformed request")),
        }
    }
}

async fn spawn_collector(reply: Reply) -> (SocketAddr, Arc<Mutex<Received>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let received = Arc::new(Mutex::new(Received::default()));

    let service = LogsServiceServer::new(Collector {
        reply,
        received: Arc::clone(&received),
    })
    .accept_compressed(CompressionEncoding::Gzip);

    let incoming = Box::pin(futures::stream::unfold(listener, |listener| async move {
        let conn = listener.accept().await.map(|(stream, _)| stream);
        Some((conn, listener))
    }));

    tokio::spawn(
        Server::builder()
            .add_service(service)
            .serve_with_incoming(incoming),
    );

    (addr, received)
}

fn transport_to(addr: SocketAddr) -> GrpcTransport {
    let config = ExporterConfig {
        endpoint: format!("http://{}", addr),
        transport: TransportKind::Grpc,
        compression: Compression::Gzip,
        api_key: Some("grpc-key".to_string()),
        timeout_ms: 5_000,
        ..ExporterConfig::default()
    };
    GrpcTransport::new(&config).unwrap()
}

fn encoded(bodies: &[&str]) -> EncodedBatch {
    let mut builder = BatchBuilder::new(usize::MAX, usize::MAX, Arc::new(Resource::default()));
    for body in bodies {
        let _ = builder.push(Record::new(Severity::Warn, *body));
    }
    let batch = builder.seal().unwrap();
    OtlpEncoder::new(&Scope::default()).encode(&batch)
}

#[tokio::test]
async fn test_export_round_trips_through_collector() {
    let (addr, received) = spawn_collector(Reply::Accept).await;
    let transport = transport_to(addr);

    let batch = encoded(&["disk full", "retrying", "recovered"]);
    let outcome = transport.send(batch.payload).await;
    assert_eq!(outcome, SendOutcome::success());

    let received = received.lock().unwrap();
    assert_eq!(received.requests.len(), 1);
    assert_eq!(received.api_keys[0].as_deref(), Some("grpc-key"));

    let request = &received.requests[0];
    assert_eq!(record_count(request), 3);
    let bodies: Vec<String> = request.resource_logs[0].scope_logs[0]
        .log_records
        .iter()
        .map(|lr| match lr.body.as_ref().and_then(|b| b.value.clone()) {
            Some(any_value::Value::StringValue(s)) => s,
            other => panic!("unexpected body {:?}", other),
        })
        .collect();
    assert_eq!(bodies, vec!["disk full", "retrying", "recovered"]);
}

#[tokio::test]
async fn test_partial_success_reports_rejected_records() {
    let (addr, _received) = spawn_collector(Reply::RejectSome(2)).await;
    let transport = transport_to(addr);

    let outcome = transport.send(encoded(&["a", "b", "c"]).payload).await;
    assert_eq!(outcome, SendOutcome::Success { rejected_records: 2 });
}

#[tokio::test]
async fn test_unavailable_is_retryable() {
    let (addr, received) = spawn_collector(Reply::Unavailable).await;
    let transport = transport_to(addr);

    let outcome = transport.send(encoded(&["a"]).payload).await;
    assert!(
        matches!(outcome, SendOutcome::Retryable { ref reason, .. } if reason.contains("collector restarting")),
        "{:?}",
        outcome
    );
    assert_eq!(received.lock().unwrap().requests.len(), 1);
}

#[tokio::test]
async fn test_invalid_argument_is_fatal() {
    let (addr, received) = spawn_collector(Reply::InvalidArgument).await;
    let transport = transport_to(addr);

    let outcome = transport.send(encoded(&["a"]).payload).await;
    assert!(
        matches!(outcome, SendOutcome::Fatal { ref reason } if reason.contains("malformed request")),
        "{:?}",
        outcome
    );
    assert_eq!(received.lock().unwrap().requests.len(), 1);
}

#[tokio::test]
async fn test_unreachable_collector_is_retryable() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let outcome = transport_to(addr).send(encoded(&["a"]).payload).await;
    assert!(matches!(outcome, SendOutcome::Retryable { .. }), "{:?}", outcome);
}
