use http::{HeaderName, Method, StatusCode};
use ntex::{
    http::error::PayloadError,
    web::{error::QueryPayloadError, HttpResponse},
};
use serde::Serialize;

use crate::engine::EngineError;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    // HTTP-related errors
    #[error("Unsupported HTTP method: {0}")]
    UnsupportedHttpMethod(Method),
    #[error("Header '{0}' has invalid value")]
    InvalidHeaderValue(HeaderName),

    // Body collection errors
    #[error("Content-Length header has invalid value")]
    InvalidContentLengthHeader,
    #[error("Request body exceeds the maximum allowed size")]
    PayloadTooLarge,
    #[error("Failed to read request body: {0}")]
    PayloadReadError(PayloadError),

    // GET-specific errors
    #[error("Failed to deserialize query parameters")]
    GetInvalidQueryParams,
    #[error("Missing query parameter: {0}")]
    GetMissingQueryParam(&'static str),
    #[error("Failed to parse query parameters")]
    GetUnprocessableQueryParams(QueryPayloadError),

    // Request assembly errors
    #[error("Failed to parse GraphQL request payload")]
    FailedToParseBody(sonic_rs::Error),
    #[error("Failed to parse GraphQL variables JSON")]
    FailedToParseVariables(sonic_rs::Error),
    #[error("GraphQL variables must be a JSON object")]
    InvalidVariables,
    #[error("Missing 'query' in GraphQL request")]
    MissingQuery,
    #[error("GraphQL query must not be empty")]
    EmptyQuery,
    #[error("GraphQL batch must not be empty")]
    EmptyBatch,
    #[error("Request body is not valid UTF-8")]
    BodyNotUtf8,

    // Multipart assembly errors
    #[error("Failed to read multipart form data: {0}")]
    InvalidMultipart(multer::Error),
    #[error("No multipart field named 'operations', 'graphql' or 'query'")]
    MissingOperationsPart,
    #[error("Failed to parse multipart variables map")]
    FailedToParseFileMap(sonic_rs::Error),
    #[error("Unable to find part named '{0}' as referenced in the variables map")]
    UnknownPartName(String),
    #[error("Variables path '{0}' does not address an existing location")]
    UnmappableVariablePath(String),

    // Execution errors
    #[error("Error executing GraphQL request: {0}")]
    ExecutionFailure(EngineError),
    #[error("Streamed results are not supported inside a batch")]
    StreamInBatch,
    #[error("Failed to serialize execution result: {0}")]
    FailedToSerializeResult(sonic_rs::Error),
}

impl PipelineError {
    pub fn graphql_error_code(&self) -> &'static str {
        match self {
            Self::UnsupportedHttpMethod(_) => "METHOD_NOT_ALLOWED",
            Self::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            Self::PayloadReadError(_) => "PAYLOAD_READ_ERROR",
            Self::ExecutionFailure(_) | Self::StreamInBatch | Self::FailedToSerializeResult(_) => {
                "EXECUTION_FAILED"
            }
            _ => "BAD_REQUEST",
        }
    }

    pub fn default_status_code(&self) -> StatusCode {
        match self {
            Self::UnsupportedHttpMethod(_) => StatusCode::METHOD_NOT_ALLOWED,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::PayloadReadError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::ExecutionFailure(_) | Self::StreamInBatch | Self::FailedToSerializeResult(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct GraphQLErrorExtensions {
    pub code: &'static str,
}

#[derive(Serialize, Debug, Clone)]
pub struct GraphQLError {
    pub message: String,
    pub extensions: GraphQLErrorExtensions,
}

#[derive(Serialize, Debug, Clone, Default)]
pub struct FailedExecutionResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<GraphQLError>>,
}

impl From<PipelineError> for HttpResponse {
    fn from(val: PipelineError) -> Self {
        let status = val.default_status_code();

        let result = FailedExecutionResult {
            errors: Some(vec![GraphQLError {
                message: val.to_string(),
                extensions: GraphQLErrorExtensions {
                    code: val.graphql_error_code(),
                },
            }]),
        };

        ntex::http::ResponseBuilder::new(status).json(&result)
    }
}
