use crate::error::ProxyError;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{redirect, Client, Method};
use std::time::Duration;
use tracing::{debug, warn};

/// 发往本地服务的请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalRequest {
    /// 已规范化为大写
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

/// 本地服务的响应
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalResponse {
    pub status: u16,
    /// 同名响应头按出现顺序保留多个值
    pub headers: Vec<(String, String)>,
    pub body: String,
}

/// 本地 HTTP 调用接口
#[async_trait]
pub trait LocalForwarder: Send + Sync {
    async fn forward(&self, request: LocalRequest) -> Result<LocalResponse, ProxyError>;
}

/// 基于 reqwest 的本地转发器
pub struct HttpForwarder {
    client: Client,
}

impl HttpForwarder {
    /// `timeout` 为单个请求的总超时，`None` 表示不限制
    pub fn new(timeout: Option<Duration>, follow_redirects: bool) -> anyhow::Result<Self> {
        let mut builder = Client::builder().no_proxy();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        if !follow_redirects {
            builder = builder.redirect(redirect::Policy::none());
        }
        Ok(Self {
            client: builder.build()?,
        })
    }
}

#[async_trait]
impl LocalForwarder for HttpForwarder {
    async fn forward(&self, request: LocalRequest) -> Result<LocalResponse, ProxyError> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|e| ProxyError::InvalidRequest(e.to_string()))?;
        let url = reqwest::Url::parse(&request.url)
            .map_err(|e| ProxyError::InvalidRequest(format!("{}: {}", request.url, e)))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &request.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => warn!("Skipping invalid request header: {}", name),
            }
        }

        let mut builder = self.client.request(method, url).headers(headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ProxyError::Unreachable(e.to_string()))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ProxyError::BodyRead(e.to_string()))?;
        debug!("Local service answered {} with {} bytes", status, bytes.len());

        Ok(LocalResponse {
            status,
            headers,
            body: String::from_utf8_lossy(&bytes).into_owned(),
        })
    }
}
