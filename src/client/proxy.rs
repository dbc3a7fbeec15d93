use super::connection::FrameWriter;
use super::forwarder::{LocalForwarder, LocalRequest, LocalResponse};
use crate::error::ProxyError;
use crate::protocol::{IncomingRequest, OutgoingResponse};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 支持的 HTTP 方法
pub const SUPPORTED_METHODS: [&str; 9] = [
    "GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS", "TRACE", "CONNECT",
];

/// 会携带请求体的方法
const BODY_METHODS: [&str; 3] = ["POST", "PUT", "PATCH"];

/// 由本地 HTTP 客户端自行设置的请求头
const HOP_HEADERS: [&str; 3] = ["host", "connection", "transfer-encoding"];

const CORS_ALLOW_HEADERS: &str =
    "Content-Type, Authorization, X-Requested-With, Accept, Origin, User-Agent, Referer";

/// 校验方法，返回大写形式
pub fn normalize_method(method: &str) -> Result<String, ProxyError> {
    let upper = method.to_ascii_uppercase();
    if SUPPORTED_METHODS.contains(&upper.as_str()) {
        Ok(upper)
    } else {
        Err(ProxyError::UnsupportedMethod(method.to_string()))
    }
}

/// 构造发往 `http://localhost:<port><path>` 的本地请求
pub fn build_local_request(
    request: &IncomingRequest,
    method: &str,
    port: &str,
) -> LocalRequest {
    let headers = request
        .headers
        .iter()
        .filter(|(name, _)| !HOP_HEADERS.contains(&name.to_ascii_lowercase().as_str()))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();

    let body = if BODY_METHODS.contains(&method) && !request.body.is_empty() {
        Some(request.body.clone())
    } else {
        None
    };

    LocalRequest {
        method: method.to_string(),
        url: format!("http://localhost:{}{}", port, request.path),
        headers,
        body,
    }
}

/// CORS 预检响应，不访问本地服务
pub fn preflight_response(id: &str) -> OutgoingResponse {
    let headers = [
        ("Access-Control-Allow-Origin", "*".to_string()),
        ("Access-Control-Allow-Methods", SUPPORTED_METHODS.join(", ")),
        ("Access-Control-Allow-Headers", CORS_ALLOW_HEADERS.to_string()),
        ("Access-Control-Max-Age", "86400".to_string()),
        ("Access-Control-Allow-Credentials", "true".to_string()),
        ("Content-Length", "0".to_string()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();

    OutgoingResponse {
        id: id.to_string(),
        status: 200,
        headers,
        body: String::new(),
    }
}

/// 把本地响应转换为返回给中继的响应
///
/// 多值响应头以 ", " 合并；`Content-Length` 总是按实际转发的 body 重新计算，
/// HEAD 请求的 body 强制为空。
pub fn translate_response(id: &str, method: &str, local: LocalResponse) -> OutgoingResponse {
    let mut headers: HashMap<String, String> = HashMap::new();
    for (name, value) in local.headers {
        if name.eq_ignore_ascii_case("content-length") {
            continue;
        }
        headers
            .entry(name)
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }

    let body = if method == "HEAD" {
        String::new()
    } else {
        local.body
    };
    headers.insert("Content-Length".to_string(), body.len().to_string());

    OutgoingResponse {
        id: id.to_string(),
        status: local.status,
        headers,
        body,
    }
}

/// HTTP 代理适配器：一个入站请求对应恰好一个响应
pub struct ProxyHandler {
    port: String,
    forwarder: Arc<dyn LocalForwarder>,
}

impl ProxyHandler {
    pub fn new(port: impl Into<String>, forwarder: Arc<dyn LocalForwarder>) -> Self {
        Self {
            port: port.into(),
            forwarder,
        }
    }

    /// 处理请求，失败时合成带相同 id 的错误响应
    pub async fn handle(&self, request: IncomingRequest) -> OutgoingResponse {
        let response = match self.try_handle(&request).await {
            Ok(response) => response,
            Err(e) => {
                warn!("{} {} failed: {}", request.method, request.path, e);
                OutgoingResponse::error(&request.id, e.status(), e.to_string())
            }
        };

        info!(
            "{:<7} {:<20} {}",
            request.method.to_ascii_uppercase(),
            request.path,
            response.status
        );
        response
    }

    async fn try_handle(&self, request: &IncomingRequest) -> Result<OutgoingResponse, ProxyError> {
        let method = normalize_method(&request.method)?;

        if request.path.is_empty() {
            return Err(ProxyError::EmptyPath);
        }

        if method == "OPTIONS" {
            debug!("Answering CORS preflight for {}", request.path);
            return Ok(preflight_response(&request.id));
        }

        let local = build_local_request(request, &method, &self.port);
        if let Some(body) = &local.body {
            debug!("Forwarding {} bytes of request body", body.len());
        }

        let response = self.forwarder.forward(local).await?;
        Ok(translate_response(&request.id, &method, response))
    }

    /// 处理请求并通过给定写端发回响应
    ///
    /// 写端所属连接可能已经被重连取代，此时响应无法送达，只记录日志。
    pub async fn serve(&self, request: IncomingRequest, writer: &FrameWriter) {
        let id = request.id.clone();
        let response = self.handle(request).await;
        if let Err(e) = writer.send(&response).await {
            warn!(
                "Dropping response {} on connection #{}: {}",
                id,
                writer.generation(),
                e
            );
        }
    }
}
