use std::collections::HashMap;

use bytes::Bytes;
use ntex::web::{types::Query, HttpRequest};
use serde_json::{Map, Value};
use tracing::trace;

use crate::pipeline::error::PipelineError;
use crate::pipeline::peek::{classify, classify_str};

/// Key of the reference token the variable mapper writes into the variables
/// tree. The engine resolves tokens against [`OperationRequest::uploads`].
pub const UPLOAD_TOKEN_KEY: &str = "__uploaded_part";

/// One uploaded multipart file. `content` is a slice of the buffered body;
/// the gateway holds it only for the duration of the request.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub content: Bytes,
}

/// Wire shape of a GraphQL operation, as found in JSON bodies, batch arrays
/// and the `operations` multipart field.
#[derive(serde::Deserialize, Debug, Default)]
pub struct GraphQLParams {
    pub query: Option<String>,
    #[serde(rename = "operationName")]
    pub operation_name: Option<String>,
    #[serde(default)]
    pub variables: Option<Value>,
}

/// A fully assembled GraphQL operation, ready for dispatch.
///
/// Immutable after assembly, with one exception: the multipart variable
/// rewrite mutates `variables` in place, once, before the engine is invoked.
#[derive(Debug)]
pub struct OperationRequest {
    pub query: String,
    /// Always a JSON object.
    pub variables: Value,
    pub operation_name: Option<String>,
    /// Multipart parts available to the engine, keyed by part name.
    pub uploads: HashMap<String, UploadedFile>,
}

impl Default for OperationRequest {
    fn default() -> Self {
        Self {
            query: String::new(),
            variables: Value::Object(Map::new()),
            operation_name: None,
            uploads: HashMap::new(),
        }
    }
}

impl OperationRequest {
    pub fn new(query: impl Into<String>) -> Result<Self, PipelineError> {
        let query = query.into();
        if query.trim().is_empty() {
            return Err(PipelineError::EmptyQuery);
        }
        Ok(Self {
            query,
            ..Default::default()
        })
    }

    pub fn from_params(params: GraphQLParams) -> Result<Self, PipelineError> {
        let mut request = Self::new(params.query.ok_or(PipelineError::MissingQuery)?)?;
        request.operation_name = params.operation_name;
        if let Some(variables) = params.variables {
            request.variables = variables_object(variables)?;
        }
        Ok(request)
    }

    /// Resolves an upload reference token produced by the variable mapper.
    pub fn upload_for(&self, value: &Value) -> Option<&UploadedFile> {
        value
            .get(UPLOAD_TOKEN_KEY)?
            .as_str()
            .and_then(|name| self.uploads.get(name))
    }

    /// Resolves the upload referenced at a dotted variables path, if any.
    pub fn upload_at(&self, path: &str) -> Option<&UploadedFile> {
        let mut segments = path.split('.');
        if segments.next() != Some("variables") {
            return None;
        }
        let mut current = &self.variables;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        self.upload_for(current)
    }
}

/// Single-vs-batch shape of one inbound request. Decided exactly once, at
/// assembly; batch responses preserve this order.
#[derive(Debug)]
pub enum GatewayRequest {
    Single(OperationRequest),
    Batch(Vec<OperationRequest>),
}

/// Normalizes a decoded `variables` value to a JSON object. `null` is treated
/// as absent; anything else non-object is rejected.
pub(crate) fn variables_object(value: Value) -> Result<Value, PipelineError> {
    match value {
        Value::Null => Ok(Value::Object(Map::new())),
        object @ Value::Object(_) => Ok(object),
        _ => Err(PipelineError::InvalidVariables),
    }
}

#[derive(serde::Deserialize, Debug)]
struct GetQueryParams {
    pub query: Option<String>,
    #[serde(rename = "operationName")]
    pub operation_name: Option<String>,
    pub variables: Option<String>,
}

/// Assembles request(s) from GET query parameters. The `query` parameter may
/// itself carry a JSON batch array.
pub fn from_get_request(req: &HttpRequest) -> Result<GatewayRequest, PipelineError> {
    let query_params_str = req
        .uri()
        .query()
        .ok_or(PipelineError::GetInvalidQueryParams)?;
    let params = Query::<GetQueryParams>::from_query(query_params_str)
        .map_err(PipelineError::GetUnprocessableQueryParams)?
        .0;

    trace!("parsed GET query params: {:?}", params);

    let query = params
        .query
        .ok_or(PipelineError::GetMissingQueryParam("query"))?;

    if classify_str(&query).is_batched() {
        return decode_batch(query.as_bytes());
    }

    let variables = match params.variables.as_deref() {
        Some(v_str) if !v_str.is_empty() => {
            Some(sonic_rs::from_str(v_str).map_err(PipelineError::FailedToParseVariables)?)
        }
        _ => None,
    };

    let request = OperationRequest::from_params(GraphQLParams {
        query: Some(query),
        operation_name: params.operation_name,
        variables,
    })?;
    Ok(GatewayRequest::Single(request))
}

/// POST with `application/graphql`: the entire body is the query text, with
/// no variables and no operation name.
pub fn from_raw_query_body(body: &[u8]) -> Result<GatewayRequest, PipelineError> {
    let query = std::str::from_utf8(body).map_err(|_| PipelineError::BodyNotUtf8)?;
    Ok(GatewayRequest::Single(OperationRequest::new(query)?))
}

/// POST with a JSON payload: classified once, then decoded as a batch array
/// or a single operation object.
pub fn from_json_body(body: &[u8]) -> Result<GatewayRequest, PipelineError> {
    if classify(body).is_batched() {
        decode_batch(body)
    } else {
        let params: GraphQLParams =
            sonic_rs::from_slice(body).map_err(PipelineError::FailedToParseBody)?;
        Ok(GatewayRequest::Single(OperationRequest::from_params(
            params,
        )?))
    }
}

pub(crate) fn decode_batch(bytes: &[u8]) -> Result<GatewayRequest, PipelineError> {
    let batch: Vec<GraphQLParams> =
        sonic_rs::from_slice(bytes).map_err(PipelineError::FailedToParseBody)?;
    if batch.is_empty() {
        return Err(PipelineError::EmptyBatch);
    }
    let requests = batch
        .into_iter()
        .map(OperationRequest::from_params)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(GatewayRequest::Batch(requests))
}

#[cfg(test)]
mod tests {
    use ntex::web::test::TestRequest;
    use serde_json::json;

    use super::*;

    #[test]
    fn get_request_with_query_and_variables() {
        let req = TestRequest::with_uri(
            "/graphql?query=%7Bping%7D&variables=%7B%22a%22%3A1%7D&operationName=Ping",
        )
        .to_http_request();

        match from_get_request(&req).unwrap() {
            GatewayRequest::Single(request) => {
                assert_eq!(request.query, "{ping}");
                assert_eq!(request.operation_name.as_deref(), Some("Ping"));
                assert_eq!(request.variables, json!({"a": 1}));
            }
            other => panic!("expected single request, got {:?}", other),
        }
    }

    #[test]
    fn get_request_without_query_fails() {
        let req = TestRequest::with_uri("/graphql?operationName=Ping").to_http_request();
        assert!(matches!(
            from_get_request(&req),
            Err(PipelineError::GetMissingQueryParam("query"))
        ));
    }

    #[test]
    fn get_request_with_batched_query_parameter() {
        // query=[{"query":"{a}"},{"query":"{b}"}]
        let req = TestRequest::with_uri(
            "/graphql?query=%5B%7B%22query%22%3A%22%7Ba%7D%22%7D%2C%7B%22query%22%3A%22%7Bb%7D%22%7D%5D",
        )
        .to_http_request();

        match from_get_request(&req).unwrap() {
            GatewayRequest::Batch(requests) => {
                assert_eq!(requests.len(), 2);
                assert_eq!(requests[0].query, "{a}");
                assert_eq!(requests[1].query, "{b}");
            }
            other => panic!("expected batch, got {:?}", other),
        }
    }

    #[test]
    fn json_body_single() {
        let body = br#"{"query":"{ping}","variables":{"file":null}}"#;
        match from_json_body(body).unwrap() {
            GatewayRequest::Single(request) => {
                assert_eq!(request.query, "{ping}");
                assert_eq!(request.variables, json!({"file": null}));
            }
            other => panic!("expected single request, got {:?}", other),
        }
    }

    #[test]
    fn json_body_batch_preserves_order() {
        let body = br#"  [{"query":"{a}"},{"query":"{b}"}]"#;
        match from_json_body(body).unwrap() {
            GatewayRequest::Batch(requests) => {
                assert_eq!(requests.len(), 2);
                assert_eq!(requests[0].query, "{a}");
                assert_eq!(requests[1].query, "{b}");
            }
            other => panic!("expected batch, got {:?}", other),
        }
    }

    #[test]
    fn empty_json_batch_is_rejected() {
        assert!(matches!(
            from_json_body(b"[]"),
            Err(PipelineError::EmptyBatch)
        ));
    }

    #[test]
    fn null_variables_become_an_empty_object() {
        let body = br#"{"query":"{ping}","variables":null}"#;
        match from_json_body(body).unwrap() {
            GatewayRequest::Single(request) => assert_eq!(request.variables, json!({})),
            other => panic!("expected single request, got {:?}", other),
        }
    }

    #[test]
    fn non_object_variables_are_rejected() {
        let body = br#"{"query":"{ping}","variables":[1,2]}"#;
        assert!(matches!(
            from_json_body(body),
            Err(PipelineError::InvalidVariables)
        ));
    }

    #[test]
    fn raw_body_becomes_the_query() {
        match from_raw_query_body(b"query { me { name } }").unwrap() {
            GatewayRequest::Single(request) => {
                assert_eq!(request.query, "query { me { name } }");
                assert_eq!(request.variables, json!({}));
                assert!(request.operation_name.is_none());
            }
            other => panic!("expected single request, got {:?}", other),
        }
    }

    #[test]
    fn empty_query_is_rejected_everywhere() {
        assert!(matches!(
            from_raw_query_body(b"   "),
            Err(PipelineError::EmptyQuery)
        ));
        assert!(matches!(
            from_json_body(br#"{"query":""}"#),
            Err(PipelineError::EmptyQuery)
        ));
        assert!(matches!(
            from_json_body(br#"{"operationName":"x"}"#),
            Err(PipelineError::MissingQuery)
        ));
    }
}
