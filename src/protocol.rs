/// 客户端与中继之间的协议消息定义
///
/// 所有帧都是 JSON 文本消息：
/// - 客户端 -> 中继：`{action:"register", port, uuid?, key?}`、`{action:"ping"}`、转发响应
/// - 中继 -> 客户端：注册应答 `{tunnel, uuid, key, error?}`、转发请求
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

/// 客户端发往中继的控制消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ClientMessage {
    /// 注册（不带凭据）或安全重连（带 uuid + key）
    Register {
        port: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        uuid: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<String>,
    },
    /// 心跳
    Ping,
}

impl ClientMessage {
    /// 创建全新注册消息
    pub fn register(port: impl Into<String>) -> Self {
        Self::Register {
            port: port.into(),
            uuid: None,
            key: None,
        }
    }

    /// 创建安全重连消息
    pub fn resume(
        port: impl Into<String>,
        uuid: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self::Register {
            port: port.into(),
            uuid: Some(uuid.into()),
            key: Some(key.into()),
        }
    }
}

/// 中继可能把缺省字段写成 `null`，按空值处理
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// 中继对注册/重连的应答
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterResponse {
    /// 分配的隧道 ID
    #[serde(default, deserialize_with = "null_as_default")]
    pub tunnel: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub uuid: String,
    /// 安全密钥
    #[serde(default, deserialize_with = "null_as_default")]
    pub key: String,
    /// 非空表示注册失败
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RegisterResponse {
    /// 中继返回的错误信息（空字符串视为无错误）
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref().filter(|e| !e.is_empty())
    }
}

/// 中继转发过来的 HTTP 请求
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingRequest {
    /// 关联 ID，响应必须携带相同的值
    pub id: String,
    pub method: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub path: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub headers: HashMap<String, String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub body: String,
}

/// 返回给中继的 HTTP 响应
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingResponse {
    pub id: String,
    pub status: u16,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: String,
}

impl OutgoingResponse {
    /// 创建纯文本错误响应
    pub fn error(id: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        let mut headers = HashMap::new();
        headers.insert("Content-Type".to_string(), "text/plain".to_string());
        Self {
            id: id.into(),
            status,
            headers,
            body: message.into(),
        }
    }
}

/// 中继发来的入站帧
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// 需要转发的请求
    Request(IncomingRequest),
    /// 控制帧（例如 pong），只记录不应答
    Control(String),
}

impl InboundFrame {
    /// 解码一条入站文本帧
    pub fn decode(text: &str) -> serde_json::Result<Self> {
        match serde_json::from_str::<IncomingRequest>(text) {
            Ok(request) => Ok(Self::Request(request)),
            Err(err) => {
                let action = serde_json::from_str::<serde_json::Value>(text)
                    .ok()
                    .and_then(|v| v.get("action").and_then(|a| a.as_str()).map(String::from));
                match action {
                    Some(action) => Ok(Self::Control(action)),
                    None => Err(err),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_register_message_shape() {
        let msg = serde_json::to_value(ClientMessage::register("3000")).unwrap();
        assert_eq!(msg, json!({"action": "register", "port": "3000"}));
    }

    #[test]
    fn test_resume_message_shape() {
        let msg = serde_json::to_value(ClientMessage::resume("8080", "u-1", "k-1")).unwrap();
        assert_eq!(
            msg,
            json!({"action": "register", "port": "8080", "uuid": "u-1", "key": "k-1"})
        );
    }

    #[test]
    fn test_ping_message_shape() {
        let msg = serde_json::to_value(ClientMessage::Ping).unwrap();
        assert_eq!(msg, json!({"action": "ping"}));
    }

    #[test]
    fn test_register_response_error() {
        let ok: RegisterResponse =
            serde_json::from_str(r#"{"tunnel":"abc","uuid":"u","key":"k"}"#).unwrap();
        assert_eq!(ok.error_message(), None);

        let empty: RegisterResponse =
            serde_json::from_str(r#"{"tunnel":"abc","uuid":"u","key":"k","error":""}"#).unwrap();
        assert_eq!(empty.error_message(), None);

        let rejected: RegisterResponse =
            serde_json::from_str(r#"{"error":"invalid security key"}"#).unwrap();
        assert_eq!(rejected.error_message(), Some("invalid security key"));
        assert!(rejected.tunnel.is_empty());
    }

    #[test]
    fn test_decode_request_defaults() {
        let frame = InboundFrame::decode(r#"{"id":"1","method":"GET"}"#).unwrap();
        match frame {
            InboundFrame::Request(req) => {
                assert_eq!(req.id, "1");
                assert!(req.path.is_empty());
                assert!(req.headers.is_empty());
                assert!(req.body.is_empty());
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_decode_request_with_null_fields() {
        let frame = InboundFrame::decode(
            r#"{"id":"1","method":"GET","path":"/","headers":null,"body":null}"#,
        )
        .unwrap();
        match frame {
            InboundFrame::Request(req) => {
                assert_eq!(req.path, "/");
                assert!(req.headers.is_empty());
                assert!(req.body.is_empty());
            }
            other => panic!("unexpected frame: {:?}", other),
        }

        let response: RegisterResponse =
            serde_json::from_str(r#"{"tunnel":"abc","uuid":null,"key":null}"#).unwrap();
        assert_eq!(response.tunnel, "abc");
        assert!(response.uuid.is_empty());
        assert!(response.key.is_empty());
    }

    #[test]
    fn test_decode_control_frame() {
        let frame = InboundFrame::decode(r#"{"action":"pong"}"#).unwrap();
        assert_eq!(frame, InboundFrame::Control("pong".to_string()));
    }

    #[test]
    fn test_decode_malformed_frame() {
        assert!(InboundFrame::decode("not json").is_err());
        assert!(InboundFrame::decode(r#"{"method":"GET","path":"/"}"#).is_err());
    }

    #[test]
    fn test_error_response() {
        let resp = OutgoingResponse::error("42", 405, "Unsupported HTTP method: BREW");
        let value: Value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["id"], "42");
        assert_eq!(value["status"], 405);
        assert_eq!(value["headers"]["Content-Type"], "text/plain");
        assert_eq!(value["body"], "Unsupported HTTP method: BREW");
    }
}
