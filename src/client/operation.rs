//! Remote operations and response classification

use reqwest::Method;
use serde_json::{json, Value};

use super::outcome::{FailureReason, ResponsePayload};
use super::transport::{RemoteRequest, RemoteResponse};

/// A logical remote operation performed on behalf of one account
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Login {
        account: String,
        password: String,
    },
    CheckIn {
        token: String,
    },
    Balance {
        token: String,
    },
    Withdraw {
        token: String,
        amount: String,
        coin_type: String,
        password: String,
    },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Login { .. } => "login",
            Operation::CheckIn { .. } => "check_in",
            Operation::Balance { .. } => "balance",
            Operation::Withdraw { .. } => "withdraw",
        }
    }

    pub fn request(&self) -> RemoteRequest {
        match self {
            Operation::Login { account, password } => RemoteRequest {
                method: Method::POST,
                path: "/api/auth/login",
                body: Some(json!({
                    "account": account,
                    "captcha": "",
                    "key": null,
                    "password": password,
                })),
                token: None,
            },
            Operation::CheckIn { token } => RemoteRequest {
                method: Method::POST,
                path: "/api/user/sign",
                body: Some(json!({})),
                token: Some(token.clone()),
            },
            Operation::Balance { token } => RemoteRequest {
                method: Method::GET,
                path: "/api/assets/myAssets",
                body: None,
                token: Some(token.clone()),
            },
            Operation::Withdraw {
                token,
                amount,
                coin_type,
                password,
            } => RemoteRequest {
                method: Method::POST,
                path: "/api/assets/withdraw",
                body: Some(json!({
                    "coin_type": coin_type,
                    "num": amount,
                    "password": password,
                })),
                token: Some(token.clone()),
            },
        }
    }

    /// Classify a received response
    ///
    /// Non-200 statuses and unreadable bodies are retryable; a well-formed
    /// envelope with a non-zero code, or a login without a token, is a
    /// rejection.
    pub fn evaluate(&self, response: &RemoteResponse) -> Result<ResponsePayload, FailureReason> {
        if response.status != 200 {
            return Err(FailureReason::HttpStatusError {
                status: response.status,
            });
        }

        let payload = parse_envelope(&response.body).ok_or_else(|| {
            let preview: String = response.body.chars().take(80).collect();
            FailureReason::NetworkError {
                message: format!("malformed response body: {}", preview),
            }
        })?;

        if payload.code != 0 {
            return Err(FailureReason::UpstreamRejected {
                code: payload.code,
                message: payload.msg,
            });
        }

        if matches!(self, Operation::Login { .. }) && payload.token().is_none() {
            return Err(FailureReason::UpstreamRejected {
                code: payload.code,
                message: "login response carried no token".to_string(),
            });
        }

        Ok(payload)
    }
}

fn parse_envelope(body: &str) -> Option<ResponsePayload> {
    let value: Value = serde_json::from_str(body).ok()?;
    let obj = value.as_object()?;

    let code = match obj.get("code")? {
        Value::Number(n) => n.as_i64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    let msg = obj
        .get("msg")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let data = obj.get("data").cloned().unwrap_or(Value::Null);

    Some(ResponsePayload { code, msg, data })
}
