use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Error taxonomy for the node. Variants map directly onto the status codes
/// handlers are expected to return; nothing in here ever panics the process.
#[derive(thiserror::Error, Debug)]
pub enum NodeError {
    #[error("missing or invalid field: {0}")]
    Malformed(String),

    #[error("transaction rejected: {0}")]
    SemanticInvalid(String),

    #[error("peer unreachable: {0}")]
    PeerUnreachable(String),

    #[error("signature verification failed")]
    SignatureInvalid,

    #[error("chain rejected: {0}")]
    ChainInvalid(String),

    #[error("lease exceeded: {0}")]
    LeaseExceeded(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("crypto error: {0}")]
    Crypto(#[from] rsa::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl NodeError {
    fn status(&self) -> StatusCode {
        match self {
            NodeError::Malformed(_) => StatusCode::BAD_REQUEST,
            NodeError::SemanticInvalid(_)
            | NodeError::SignatureInvalid
            | NodeError::LeaseExceeded(_)
            | NodeError::ChainInvalid(_)
            | NodeError::Crypto(_)
            | NodeError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            NodeError::PeerUnreachable(_) => StatusCode::BAD_GATEWAY,
            NodeError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for NodeError {
    fn into_response(self) -> Response {
        let status = self.status();
        tracing::warn!(error = %self, %status, "request rejected");
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub type NodeResult<T> = Result<T, NodeError>;
