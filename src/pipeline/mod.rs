use std::sync::Arc;

use bytes::Bytes;
use http::{header::CONTENT_TYPE, Method};
use ntex::{
    util::Bytes as NtexBytes,
    web::{types::Payload, HttpRequest, HttpResponse},
};
use tracing::{error, info, trace};

use crate::engine::ExecutionOutcome;
use crate::introspection::{introspection_request, INTROSPECTION_PATH_SUFFIX};
use crate::shared_state::GatewaySharedState;

use body_read::read_body_stream;
use error::PipelineError;
use execution_request::{GatewayRequest, OperationRequest};

pub mod body_read;
pub mod error;
pub mod execution_request;
pub mod multipart;
pub mod peek;
pub mod sse;
pub mod variable_mapper;

pub const JSON_CONTENT_TYPE: &str = "application/json;charset=UTF-8";
pub const GRAPHQL_CONTENT_TYPE: &str = "application/graphql";
const MULTIPART_CONTENT_TYPE: &str = "multipart/form-data";

/// The dispatcher: collects the body, classifies the transport shape,
/// assembles the request(s), invokes the engine and renders the outcome,
/// wrapping the whole exchange in the listener callbacks. Body collection
/// happens inside the wrap, so listeners observe oversized and unreadable
/// payloads too.
#[inline]
pub async fn graphql_request_handler(
    req: &HttpRequest,
    payload: Payload,
    state: &Arc<GatewaySharedState>,
) -> HttpResponse {
    let callbacks = state.listeners.on_request(req);

    let response = match handle_request(req, payload, state).await {
        Ok(response) => {
            callbacks.on_success(req);
            response
        }
        Err(err) => {
            if err.default_status_code().is_server_error() {
                error!("Error executing GraphQL request: {}", err);
                callbacks.on_error(req, &err);
            } else {
                // the request never reached the engine; the pipeline handled
                // it with a client-error response of its own
                info!("Bad GraphQL request: {}", err);
                callbacks.on_success(req);
            }
            err.into()
        }
    };

    callbacks.on_finally(req);
    response
}

async fn handle_request(
    req: &HttpRequest,
    payload: Payload,
    state: &Arc<GatewaySharedState>,
) -> Result<HttpResponse, PipelineError> {
    match *req.method() {
        Method::GET => handle_get(req, state).await,
        Method::POST => {
            let body =
                read_body_stream(req, payload, state.config.limits.max_body_size).await?;
            handle_post(req, body, state).await
        }
        ref method => Err(PipelineError::UnsupportedHttpMethod(method.clone())),
    }
}

async fn handle_get(
    req: &HttpRequest,
    state: &Arc<GatewaySharedState>,
) -> Result<HttpResponse, PipelineError> {
    trace!("processing GET GraphQL operation");

    // the introspection route ignores query parameters entirely
    if req.path().ends_with(INTROSPECTION_PATH_SUFFIX) {
        return dispatch_single(introspection_request(), state).await;
    }

    let gateway_request = execution_request::from_get_request(req)?;
    dispatch(gateway_request, state).await
}

async fn handle_post(
    req: &HttpRequest,
    body: NtexBytes,
    state: &Arc<GatewaySharedState>,
) -> Result<HttpResponse, PipelineError> {
    trace!("processing POST GraphQL request");

    let content_type = match req.headers().get(CONTENT_TYPE) {
        Some(value) => value
            .to_str()
            .map_err(|_| PipelineError::InvalidHeaderValue(CONTENT_TYPE))?,
        None => "",
    };

    let gateway_request = if content_type.starts_with(GRAPHQL_CONTENT_TYPE) {
        execution_request::from_raw_query_body(&body)?
    } else if content_type.starts_with(MULTIPART_CONTENT_TYPE) {
        multipart::from_multipart_body(content_type, Bytes::copy_from_slice(&body)).await?
    } else {
        execution_request::from_json_body(&body)?
    };

    dispatch(gateway_request, state).await
}

async fn dispatch(
    request: GatewayRequest,
    state: &Arc<GatewaySharedState>,
) -> Result<HttpResponse, PipelineError> {
    match request {
        GatewayRequest::Single(request) => dispatch_single(request, state).await,
        GatewayRequest::Batch(requests) => dispatch_batch(requests, state).await,
    }
}

async fn dispatch_single(
    request: OperationRequest,
    state: &Arc<GatewaySharedState>,
) -> Result<HttpResponse, PipelineError> {
    let outcome = state
        .engine
        .execute(request)
        .await
        .map_err(PipelineError::ExecutionFailure)?;

    match outcome {
        ExecutionOutcome::Single(value) => {
            let body =
                sonic_rs::to_vec(&value).map_err(PipelineError::FailedToSerializeResult)?;
            Ok(HttpResponse::Ok()
                .content_type(JSON_CONTENT_TYPE)
                .body(NtexBytes::from(body)))
        }
        ExecutionOutcome::Stream(source) => Ok(sse::subscription_response(
            source,
            state.config.subscriptions.idle_timeout,
        )),
    }
}

/// Executes the batch members in order; the response array preserves that
/// order. A stream outcome inside a batch is not deliverable over a single
/// JSON array and fails the whole batch.
async fn dispatch_batch(
    requests: Vec<OperationRequest>,
    state: &Arc<GatewaySharedState>,
) -> Result<HttpResponse, PipelineError> {
    let mut results = Vec::with_capacity(requests.len());
    for request in requests {
        let outcome = state
            .engine
            .execute(request)
            .await
            .map_err(PipelineError::ExecutionFailure)?;

        match outcome {
            ExecutionOutcome::Single(value) => results.push(value),
            ExecutionOutcome::Stream(source) => {
                source.handle.cancel();
                return Err(PipelineError::StreamInBatch);
            }
        }
    }

    let body = sonic_rs::to_vec(&results).map_err(PipelineError::FailedToSerializeResult)?;
    Ok(HttpResponse::Ok()
        .content_type(JSON_CONTENT_TYPE)
        .body(NtexBytes::from(body)))
}
