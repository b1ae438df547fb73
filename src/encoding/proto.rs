// src/encoding/proto.rs
//! OTLP logs protocol messages
//!
//! Generated types from `opentelemetry-proto`, gathered under one path so the
//! encoder and transports name them the same way. Only the log export path is
//! used.

pub use opentelemetry_proto::tonic::collector::logs::v1::{
    logs_service_server, ExportLogsPartialSuccess, ExportLogsServiceRequest,
    ExportLogsServiceResponse,
};
pub use opentelemetry_proto::tonic::common::v1::{
    any_value, AnyValue, ArrayValue, InstrumentationScope, KeyValue, KeyValueList,
};
pub use opentelemetry_proto::tonic::logs::v1::{LogRecord, ResourceLogs, ScopeLogs, SeverityNumber};
pub use opentelemetry_proto::tonic::resource::v1::Resource;

/// gRPC method path of `LogsService.Export`
pub const LOGS_SERVICE_EXPORT_PATH: &str =
    "/opentelemetry.proto.collector.logs.v1.LogsService/Export";

/// Total log records across all resources and scopes
pub fn record_count(request: &ExportLogsServiceRequest) -> usize {
    request
        .resource_logs
        .iter()
        .flat_map(|rl| rl.scope_logs.iter())
        .map(|sl| sl.log_records.len())
        .sum()
}
