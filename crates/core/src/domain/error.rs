use serde::{Deserialize, Serialize};

/// アプリケーション共通エラーコード
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorCode {
    #[serde(rename = "E_TRANSPORT")]
    Transport,
    #[serde(rename = "E_UNAUTHORIZED")]
    Unauthorized,
    #[serde(rename = "E_FORBIDDEN")]
    Forbidden,
    #[serde(rename = "E_PROTOCOL")]
    Protocol,
    #[serde(rename = "E_INVALID_STATE")]
    InvalidState,
    #[serde(rename = "E_CONFIG")]
    Config,
    #[serde(rename = "E_INTERNAL")]
    Internal,
}

/// Fetch Client が返すエラー
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// 2xx 以外のHTTPステータス
    #[error("HTTP {status}: {message}")]
    Http {
        status: u16,
        message: String,
        body: String,
    },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Request timed out")]
    Timeout,
    /// エンベロープが success でない、または data が無い
    #[error("{0}")]
    Protocol(String),
    /// レスポンスボディが JSON として解釈できない
    #[error("Failed to parse API response: {0}")]
    Parse(String),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// 401: 認証情報が無効。バックグラウンド処理を全停止して再認証が必要
    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }

    /// 403: 操作禁止。メッセージを表示するだけでリトライしない
    pub fn is_forbidden(&self) -> bool {
        self.status() == Some(403)
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout)
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// エラーボディから表示用メッセージを取り出す（JSON の message 優先、無ければ生ボディ）
pub fn extract_error_message(body: &str) -> String {
    if body.is_empty() {
        return String::new();
    }

    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody {
            message: Some(message),
        }) if !message.is_empty() => message,
        _ => body.to_string(),
    }
}

/// アプリケーションエラー（ステータス表示用ペイロード兼用）
#[derive(Debug, Clone, Serialize)]
pub struct AppError {
    pub code: ErrorCode,
    pub message: String,
    pub detail: String,
    pub recoverable: bool,
}

impl AppError {
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::InvalidState,
            message: msg.into(),
            detail: String::new(),
            recoverable: true,
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::Internal,
            message: msg.into(),
            detail: String::new(),
            recoverable: false,
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::Config,
            message: msg.into(),
            detail: String::new(),
            recoverable: false,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    /// ApiError をユーザー向けステータスに変換
    pub fn from_api(err: &ApiError) -> Self {
        match err {
            ApiError::Http { status: 401, .. } => Self {
                code: ErrorCode::Unauthorized,
                message: "Session expired. Sign in again.".to_string(),
                detail: String::new(),
                recoverable: false,
            },
            ApiError::Http {
                status: 403, body, ..
            } => Self {
                code: ErrorCode::Forbidden,
                message: "Action not permitted".to_string(),
                detail: extract_error_message(body),
                recoverable: true,
            },
            ApiError::Http { status, body, .. } => Self {
                code: ErrorCode::Protocol,
                message: format!("API error ({status})"),
                detail: body.clone(),
                recoverable: true,
            },
            ApiError::Transport(msg) => Self {
                code: ErrorCode::Transport,
                message: "Request failed".to_string(),
                detail: msg.clone(),
                recoverable: true,
            },
            ApiError::Timeout => Self {
                code: ErrorCode::Transport,
                message: "Request failed".to_string(),
                detail: "Request timed out".to_string(),
                recoverable: true,
            },
            ApiError::Protocol(msg) | ApiError::Parse(msg) => Self {
                code: ErrorCode::Protocol,
                message: "Request failed".to_string(),
                detail: msg.clone(),
                recoverable: true,
            },
        }
    }
}

impl From<ApiError> for AppError {
    fn from(err: ApiError) -> Self {
        Self::from_api(&err)
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.detail.is_empty() {
            write!(f, "[{:?}] {}", self.code, self.message)
        } else {
            write!(f, "[{:?}] {}: {}", self.code, self.message, self.detail)
        }
    }
}

impl std::error::Error for AppError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn http(status: u16, body: &str) -> ApiError {
        ApiError::Http {
            status,
            message: "Request failed".to_string(),
            body: body.to_string(),
        }
    }

    #[test]
    fn test_extract_error_message_prefers_json_message() {
        assert_eq!(
            extract_error_message(r#"{"code":"forbidden","message":"Plan limit reached"}"#),
            "Plan limit reached"
        );
    }

    #[test]
    fn test_extract_error_message_falls_back_to_raw_body() {
        assert_eq!(extract_error_message("plain text"), "plain text");
        assert_eq!(extract_error_message(r#"{"code":"x"}"#), r#"{"code":"x"}"#);
        assert_eq!(extract_error_message(""), "");
    }

    #[test]
    fn test_unauthorized_maps_to_session_expired() {
        let err = AppError::from_api(&http(401, ""));
        assert_eq!(err.code, ErrorCode::Unauthorized);
        assert_eq!(err.message, "Session expired. Sign in again.");
        assert!(!err.recoverable);
    }

    #[test]
    fn test_forbidden_surfaces_body_message() {
        let err = AppError::from_api(&http(403, r#"{"message":"Owner only"}"#));
        assert_eq!(err.code, ErrorCode::Forbidden);
        assert_eq!(err.message, "Action not permitted");
        assert_eq!(err.detail, "Owner only");
    }

    #[test]
    fn test_other_status_keeps_raw_body() {
        let err = AppError::from_api(&http(500, "boom"));
        assert_eq!(err.message, "API error (500)");
        assert_eq!(err.detail, "boom");
    }

    #[test]
    fn test_api_error_classification() {
        assert!(http(401, "").is_unauthorized());
        assert!(http(403, "").is_forbidden());
        assert!(!http(500, "").is_unauthorized());
        assert!(ApiError::Timeout.is_transport());
        assert!(!ApiError::Parse("x".into()).is_transport());
    }
}
