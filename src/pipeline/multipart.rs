use std::collections::HashMap;

use bytes::Bytes;
use futures_util::stream;
use multer::Multipart;
use tracing::trace;

use crate::pipeline::error::PipelineError;
use crate::pipeline::execution_request::{
    decode_batch, variables_object, GatewayRequest, GraphQLParams, OperationRequest, UploadedFile,
};
use crate::pipeline::peek::classify;
use crate::pipeline::variable_mapper::{apply_file_map, VariableFileMap};

/// Field names that may carry the operation payload, scanned in order. The
/// first name with at least one part wins; later names are not consulted,
/// even when the winning name turns out to be unusable.
const OPERATION_FIELDS: [&str; 3] = ["operations", "graphql", "query"];

/// Field names with reserved transport meaning. Everything else is an upload
/// addressable from the variables map.
const RESERVED_FIELDS: [&str; 6] = [
    "operations",
    "graphql",
    "query",
    "map",
    "variables",
    "operationName",
];

/// Assembles request(s) from a `multipart/form-data` body.
pub async fn from_multipart_body(
    content_type: &str,
    body: Bytes,
) -> Result<GatewayRequest, PipelineError> {
    let boundary = multer::parse_boundary(content_type).map_err(PipelineError::InvalidMultipart)?;
    let parts = collect_parts(body, boundary).await?;
    assemble(parts)
}

/// Reads all parts, grouped by field name in arrival order. Part contents
/// are cheap slices of the one buffered body copy.
async fn collect_parts(
    body: Bytes,
    boundary: String,
) -> Result<HashMap<String, Vec<UploadedFile>>, PipelineError> {
    let body_stream = stream::once(async move { Ok::<Bytes, std::io::Error>(body) });
    let mut multipart = Multipart::new(body_stream, boundary);

    let mut parts: HashMap<String, Vec<UploadedFile>> = HashMap::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(PipelineError::InvalidMultipart)?
    {
        let name = match field.name() {
            Some(name) => name.to_string(),
            None => continue,
        };
        let filename = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(|mime| mime.to_string());
        let content = field
            .bytes()
            .await
            .map_err(PipelineError::InvalidMultipart)?;

        trace!("collected multipart part '{}' ({} bytes)", name, content.len());

        parts.entry(name).or_default().push(UploadedFile {
            filename,
            content_type,
            content,
        });
    }

    Ok(parts)
}

fn assemble(parts: HashMap<String, Vec<UploadedFile>>) -> Result<GatewayRequest, PipelineError> {
    // First candidate with a part wins; an unusable payload under that name
    // fails the request without consulting later candidates.
    let field = OPERATION_FIELDS
        .into_iter()
        .find(|name| parts.contains_key(*name))
        .ok_or(PipelineError::MissingOperationsPart)?;

    let payload = parts
        .get(field)
        .and_then(|list| list.first())
        .map(|part| part.content.clone())
        .ok_or(PipelineError::MissingOperationsPart)?;

    let file_map: Option<VariableFileMap> = match first_part(&parts, "map") {
        Some(map_part) => Some(
            sonic_rs::from_slice(&map_part.content).map_err(PipelineError::FailedToParseFileMap)?,
        ),
        None => None,
    };

    let mut gateway_request = if classify(&payload).is_batched() {
        decode_batch(&payload)?
    } else if field == "query" {
        GatewayRequest::Single(request_from_query_parts(&payload, &parts)?)
    } else {
        let params: GraphQLParams =
            sonic_rs::from_slice(&payload).map_err(PipelineError::FailedToParseBody)?;
        GatewayRequest::Single(OperationRequest::from_params(params)?)
    };

    let uploads = upload_parts(&parts);
    match &mut gateway_request {
        GatewayRequest::Single(request) => {
            finalize_request(request, file_map.as_ref(), &parts, &uploads)?;
        }
        GatewayRequest::Batch(requests) => {
            for request in requests {
                finalize_request(request, file_map.as_ref(), &parts, &uploads)?;
            }
        }
    }

    Ok(gateway_request)
}

/// Binds the collected parts to one assembled request and applies the
/// variables map, if any.
fn finalize_request(
    request: &mut OperationRequest,
    file_map: Option<&VariableFileMap>,
    parts: &HashMap<String, Vec<UploadedFile>>,
    uploads: &HashMap<String, UploadedFile>,
) -> Result<(), PipelineError> {
    request.uploads = uploads.clone();
    if let Some(file_map) = file_map {
        apply_file_map(request, file_map, parts)?;
    }
    Ok(())
}

/// The `query` multipart form: the part is a raw query string, with optional
/// `variables` and `operationName` parts decoded independently.
fn request_from_query_parts(
    query_bytes: &Bytes,
    parts: &HashMap<String, Vec<UploadedFile>>,
) -> Result<OperationRequest, PipelineError> {
    let query = std::str::from_utf8(query_bytes).map_err(|_| PipelineError::BodyNotUtf8)?;
    let mut request = OperationRequest::new(query)?;

    if let Some(variables_part) = first_part(parts, "variables") {
        let decoded = sonic_rs::from_slice(&variables_part.content)
            .map_err(PipelineError::FailedToParseVariables)?;
        request.variables = variables_object(decoded)?;
    }

    if let Some(operation_name_part) = first_part(parts, "operationName") {
        let name = std::str::from_utf8(&operation_name_part.content)
            .map_err(|_| PipelineError::BodyNotUtf8)?
            .trim()
            .to_string();
        if !name.is_empty() {
            request.operation_name = Some(name);
        }
    }

    Ok(request)
}

fn first_part<'p>(
    parts: &'p HashMap<String, Vec<UploadedFile>>,
    name: &str,
) -> Option<&'p UploadedFile> {
    parts.get(name).and_then(|list| list.first())
}

fn upload_parts(parts: &HashMap<String, Vec<UploadedFile>>) -> HashMap<String, UploadedFile> {
    parts
        .iter()
        .filter(|(name, _)| !RESERVED_FIELDS.contains(&name.as_str()))
        .filter_map(|(name, list)| list.first().map(|part| (name.clone(), part.clone())))
        .collect()
}
