use dlt_envelope::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};
use tokio::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::prelude::__tracing_subscriber_SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

// --- Struct Definitions ---
#[derive(Deserialize, Serialize, Clone, Debug)]
struct RpcRequest {
    jsonrpc: String,
    id: Value,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Serialize, Debug)]
struct RpcResponse {
    jsonrpc: String,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

#[derive(Serialize, Debug)]
struct RpcError {
    code: i32,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

/// Record or response, accepted either as JSON text or inline JSON.
#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum JsonDocument {
    Text(String),
    Inline(Value),
}

impl JsonDocument {
    fn into_text(self) -> String {
        match self {
            JsonDocument::Text(text) => text,
            JsonDocument::Inline(value) => value.to_string(),
        }
    }
}

#[derive(Deserialize, Debug)]
struct FormatForWriteParams {
    record: JsonDocument,
}

#[derive(Deserialize, Debug)]
struct FormatForReadParams {
    response: JsonDocument,
}

#[derive(Deserialize, Debug)]
struct FormatQueryParams {
    query: JsonDocument,
}

#[derive(Deserialize, Debug)]
struct HashParams {
    input: String,
}

#[derive(Deserialize, Debug)]
struct KeyStateParams {
    code: String,
}
// --- Struct Definitions End ---

// --- Helper Functions ---
fn create_error_response(id: Value, code: i32, message: String) -> RpcResponse {
    error!("Responding with error: code={}, message={}", code, message);
    RpcResponse {
        jsonrpc: "2.0".to_string(), id, result: None, error: Some(RpcError { code, message, data: None }),
    }
}

fn create_envelope_error_response(id: Value, err: &EnvelopeError) -> RpcResponse {
    let code = match err {
        EnvelopeError::InvalidInput(_) => -32602,
        _ => -32000,
    };
    let mut response = create_error_response(id, code, err.to_string());
    if let Some(error) = response.error.as_mut() {
        error.data = Some(json!({
            "kind": err.error_code(),
            "retryable": err.is_retryable(),
            "suggestion": err.suggestion(),
        }));
    }
    response
}

fn create_success_response(id: Value, result: Value) -> RpcResponse {
    RpcResponse {
        jsonrpc: "2.0".to_string(), id, result: Some(result), error: None,
    }
}

fn parse_params<T: for<'de> Deserialize<'de>>(id: &Value, params: Value) -> Result<T, RpcResponse> {
    serde_json::from_value(params)
        .map_err(|e| create_error_response(id.clone(), -32602, format!("Invalid params: {}", e)))
}

async fn write_line(stdout: &mut Stdout, line: &str) {
    if let Err(e) = stdout.write_all(format!("{}\r\n", line).as_bytes()).await {
        error!("Failed to write response: {}", e);
    } else if let Err(e) = stdout.flush().await {
        error!("Failed to flush stdout: {}", e);
    }
}

fn serialize_response(response: &RpcResponse) -> String {
    serde_json::to_string(response).unwrap_or_else(|e| {
        format!(r#"{{"jsonrpc":"2.0","id":null,"error":{{"code":-32000,"message":"Serialization error: {}"}}}}"#, e)
    })
}
// --- Helper Functions End ---

type ResponseFuture = Pin<Box<dyn Future<Output = RpcResponse> + Send>>;

// --- Main Request Processor ---
fn process_request(processor: Arc<EnvelopeProcessor>, req: RpcRequest) -> ResponseFuture {
    Box::pin(async move {
        debug!("Processing request: ID={:?}, Method='{}'", req.id, req.method);

        if req.jsonrpc != "2.0" {
            return create_error_response(req.id, -32600, "Invalid Request: jsonrpc must be \"2.0\"".to_string());
        }

        match req.method.as_str() {
            "help" => {
                info!("Received help request");
                create_success_response(req.id, json!({
                    "message": "DLT envelope gateway: pseudonymizes and seals ledger records, and opens them on read.",
                    "commands": {
                        "help": { "description": "Displays this help message." },
                        "format_for_write": { "description": "Hashes header.primaryKey and seals the payload.", "params": { "record": "record as JSON text or object" } },
                        "format_for_read": { "description": "Opens every sealed item of a ledger read response.", "params": { "response": "response as JSON text or object" } },
                        "format_query": { "description": "Hashes header.primaryKey of a ledger read query.", "params": { "query": "query as JSON text or object" } },
                        "hash": { "description": "SHA3-384 hex digest of a lookup key.", "params": { "input": "string" } },
                        "key_state": { "description": "Reports Absent, Active or Stale for a counterparty code.", "params": { "code": "string" } }
                    }
                }))
            }

            "format_for_write" => {
                let params: FormatForWriteParams = match parse_params(&req.id, req.params) {
                    Ok(p) => p,
                    Err(resp) => return resp,
                };
                match processor.format_for_write(&params.record.into_text()).await {
                    Ok(record) => match serde_json::to_value(&record) {
                        Ok(value) => create_success_response(req.id, value),
                        Err(e) => create_error_response(req.id, -32000, format!("Failed to serialize record: {}", e)),
                    },
                    Err(e) => create_envelope_error_response(req.id, &e),
                }
            }

            "format_for_read" => {
                let params: FormatForReadParams = match parse_params(&req.id, req.params) {
                    Ok(p) => p,
                    Err(resp) => return resp,
                };
                let opened = match processor.format_for_read(&params.response.into_text()).await {
                    Ok(text) => text,
                    Err(e) => return create_envelope_error_response(req.id, &e),
                };
                match serde_json::from_str::<Value>(&opened) {
                    Ok(value) => create_success_response(req.id, value),
                    Err(e) => create_error_response(req.id, -32000, format!("Failed to parse opened response: {}", e)),
                }
            }

            "format_query" => {
                let params: FormatQueryParams = match parse_params(&req.id, req.params) {
                    Ok(p) => p,
                    Err(resp) => return resp,
                };
                match processor.format_query(&params.query.into_text()) {
                    Ok(query) => create_success_response(req.id, query),
                    Err(e) => create_envelope_error_response(req.id, &e),
                }
            }

            "hash" => {
                let params: HashParams = match parse_params(&req.id, req.params) {
                    Ok(p) => p,
                    Err(resp) => return resp,
                };
                match hash_lookup_key(&params.input) {
                    Ok(digest) => create_success_response(req.id, json!({ "hash": digest })),
                    Err(e) => create_envelope_error_response(req.id, &EnvelopeError::from(e)),
                }
            }

            "key_state" => {
                let params: KeyStateParams = match parse_params(&req.id, req.params) {
                    Ok(p) => p,
                    Err(resp) => return resp,
                };
                match processor.lifecycle().state_of(&params.code).await {
                    Ok(state) => create_success_response(req.id, json!({ "code": params.code, "state": format!("{:?}", state) })),
                    Err(e) => create_envelope_error_response(req.id, &e),
                }
            }

            other => {
                warn!("Unknown method '{}'", other);
                create_error_response(req.id, -32601, format!("Method not found: {}", other))
            }
        }
    })
}

fn load_config() -> Result<GatewayConfig, ConfigError> {
    let config = match std::env::args().nth(1) {
        Some(path) => {
            info!("Loading configuration from {}", path);
            GatewayConfig::from_file(path)?.with_env_overrides()?
        }
        None => GatewayConfig::from_env()?,
    };
    config.validate()?;
    Ok(config)
}

fn build_processor(config: &GatewayConfig) -> Result<EnvelopeProcessor, Box<dyn std::error::Error>> {
    let keys = KeyLifecycleManager::new(
        Arc::new(FileMetadataStore::new(&config.storage.metadata_path)),
        Arc::new(FileSecretStore::new(&config.storage.secrets_dir)?),
        Arc::new(HttpKeyIssuer::from_config(&config.key_issuer)?),
    );
    Ok(EnvelopeProcessor::new(Arc::new(keys)))
}

// --- Main Function ---
#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            error!("Fatal: invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    let processor = match build_processor(&config) {
        Ok(processor) => Arc::new(processor),
        Err(e) => {
            error!("Fatal: cannot initialise key stores or issuer: {}", e);
            std::process::exit(1);
        }
    };
    // Leave headroom past the issuer timeout so its own error surfaces first.
    let request_timeout = config.key_issuer.timeout() + Duration::from_secs(5);

    info!("Starting DLT envelope gateway on stdio...");
    let stdin = tokio::io::stdin();
    let mut reader = BufReader::new(stdin);
    let mut stdout = tokio::io::stdout();
    let mut line_buffer = String::new();

    let ready_msg = json!({"jsonrpc": "2.0", "method": "server/ready", "params": {"status": "ready"}});
    write_line(&mut stdout, &ready_msg.to_string()).await;

    loop {
        line_buffer.clear();
        match reader.read_line(&mut line_buffer).await {
            Ok(0) => { info!("Stdin closed (EOF). Exiting gateway."); break; }
            Ok(_) => {
                let trimmed_line = line_buffer.trim();
                if trimmed_line.is_empty() || !trimmed_line.starts_with('{') {
                    if !trimmed_line.is_empty() { warn!("Received non-JSON input line, ignoring."); }
                    continue;
                }
                // Lines carry plaintext payloads; log sizes only.
                debug!("<<< Received line ({} bytes)", trimmed_line.len());

                let parsed_json: Value = match serde_json::from_str(trimmed_line) {
                    Ok(v) => v,
                    Err(e) => {
                        let error_resp = create_error_response(Value::Null, -32700, format!("Parse error: {}", e));
                        write_line(&mut stdout, &serialize_response(&error_resp)).await;
                        continue;
                    }
                };

                // Notifications (no id) get no response.
                if parsed_json.get("id").map_or(true, Value::is_null) {
                    match parsed_json.get("method").and_then(|m| m.as_str()) {
                        Some(method) => info!("Received notification: {}", method),
                        None => warn!("Received notification without method field"),
                    }
                    continue;
                }

                let id = parsed_json.get("id").cloned().unwrap_or(Value::Null);
                let req: RpcRequest = match serde_json::from_value(parsed_json) {
                    Ok(r) => r,
                    Err(e) => {
                        let error_resp = create_error_response(id, -32600, format!("Invalid Request: {}", e));
                        write_line(&mut stdout, &serialize_response(&error_resp)).await;
                        continue;
                    }
                };
                let request_id = req.id.clone();
                let request_method = req.method.clone();

                let response = match tokio::time::timeout(request_timeout, process_request(processor.clone(), req)).await {
                    Ok(response) => response,
                    Err(_) => {
                        error!("Request processing timed out after {:?} for Method '{}', ID {:?}", request_timeout, request_method, request_id);
                        create_error_response(request_id, -32000, format!("Request timed out for method '{}'", request_method))
                    }
                };
                write_line(&mut stdout, &serialize_response(&response)).await;
            }
            Err(e) => { error!("Error reading from stdin: {}. Exiting.", e); break; }
        }
    }
    info!("DLT envelope gateway shutting down.");
}
