//! Stratum wire protocol
//!
//! Line-delimited JSON-RPC 2.0, CryptoNote dialect: requests carry object
//! params, errors are `{code, message}` objects, and job pushes arrive as
//! a `job` notification.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wire error code for protocol-level failures
pub const CODE_GENERIC: i32 = -1;
/// Wire error code for unknown methods
pub const CODE_UNSUPPORTED: i32 = 20;

/// Methods accepted by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StratumMethod {
    Login,
    GetJob,
    Submit,
    Keepalived,
    Unknown(String),
}

impl StratumMethod {
    /// Parse a method name
    pub fn parse_method(s: &str) -> Self {
        match s {
            "login" => Self::Login,
            "getjob" => Self::GetJob,
            "submit" => Self::Submit,
            "keepalived" => Self::Keepalived,
            _ => Self::Unknown(s.to_string()),
        }
    }
}

/// Incoming request frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StratumRequest {
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl StratumRequest {
    /// Get the method as enum
    pub fn method_enum(&self) -> StratumMethod {
        StratumMethod::parse_method(&self.method)
    }
}

/// `login` parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginParams {
    pub login: String,
    #[serde(default)]
    pub pass: String,
    #[serde(default)]
    pub agent: String,
}

/// Parameters of requests addressed to an established session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionParams {
    pub id: String,
}

/// `submit` parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitParams {
    pub id: String,
    pub job_id: String,
    pub nonce: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

/// Wire form of a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobParams {
    pub job_id: String,
    pub blob: String,
    pub target: String,
    pub height: u64,
    pub seed_hash: String,
}

/// `login` result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResult {
    pub id: String,
    pub job: JobParams,
    pub status: String,
}

/// Error body of a response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StratumErrorBody {
    pub code: i32,
    pub message: String,
}

/// Outgoing response frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StratumResponse {
    pub id: Value,
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StratumErrorBody>,
}

impl StratumResponse {
    /// Create a successful response
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            id: id.unwrap_or(Value::Null),
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            id: id.unwrap_or(Value::Null),
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(StratumErrorBody {
                code,
                message: message.into(),
            }),
        }
    }

    /// The unsupported-method error
    pub fn unsupported(id: Option<Value>, method: &str) -> Self {
        Self::error(id, CODE_UNSUPPORTED, format!("Unsupported request {}", method))
    }
}

/// Unsolicited notification frame (no id)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StratumNotification {
    pub jsonrpc: String,
    pub method: String,
    pub params: Value,
}

impl StratumNotification {
    /// The `job` push carrying new work
    pub fn job(params: &JobParams) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: "job".to_string(),
            params: serde_json::to_value(params).expect("job params serialize"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_parsing() {
        assert_eq!(StratumMethod::parse_method("login"), StratumMethod::Login);
        assert_eq!(StratumMethod::parse_method("getjob"), StratumMethod::GetJob);
        assert_eq!(StratumMethod::parse_method("submit"), StratumMethod::Submit);
        assert_eq!(
            StratumMethod::parse_method("keepalived"),
            StratumMethod::Keepalived
        );
        assert!(matches!(
            StratumMethod::parse_method("mining.subscribe"),
            StratumMethod::Unknown(_)
        ));
    }

    #[test]
    fn test_request_parsing() {
        let json = r#"{"id":1,"method":"login","params":{"login":"44Abc.rig0","pass":"d=5000","agent":"XMRig/6.21"}}"#;
        let request: StratumRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.method_enum(), StratumMethod::Login);

        let params: LoginParams = serde_json::from_value(request.params).unwrap();
        assert_eq!(params.login, "44Abc.rig0");
        assert_eq!(params.pass, "d=5000");
    }

    #[test]
    fn test_request_without_id() {
        let json = r#"{"method":"submit","params":{"id":"c1","job_id":"7","nonce":"deadbeef"}}"#;
        let request: StratumRequest = serde_json::from_str(json).unwrap();
        assert!(request.id.is_none());

        let params: SubmitParams = serde_json::from_value(request.params).unwrap();
        assert_eq!(params.job_id, "7");
        assert_eq!(params.result, None);
    }

    #[test]
    fn test_success_response_omits_error() {
        let response = StratumResponse::success(
            Some(Value::Number(1.into())),
            serde_json::json!({"status": "OK"}),
        );
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains(r#""result":{"status":"OK"}"#));
        assert!(!json.contains("error"));
    }

    #[test]
    fn test_error_response_shape() {
        let response = StratumResponse::unsupported(Some(Value::Number(3.into())), "mining.ping");
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains(r#""code":20"#));
        assert!(json.contains("Unsupported request mining.ping"));
        assert!(!json.contains("result"));
    }

    #[test]
    fn test_job_notification_shape() {
        let params = JobParams {
            job_id: "42".to_string(),
            blob: "0e0e".to_string(),
            target: "711b0d00".to_string(),
            height: 100,
            seed_hash: String::new(),
        };
        let notification = StratumNotification::job(&params);
        let json = serde_json::to_string(&notification).unwrap();
        assert!(json.contains(r#""method":"job""#));
        assert!(json.contains(r#""job_id":"42""#));
        // Notifications carry no id.
        assert!(!json.contains(r#""id""#));
    }
}
