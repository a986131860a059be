use std::collections::HashMap;

use serde_json::{json, Value};

use crate::pipeline::error::PipelineError;
use crate::pipeline::execution_request::{OperationRequest, UploadedFile, UPLOAD_TOKEN_KEY};

/// Client-supplied binding of part names to dotted variable paths, per the
/// GraphQL multipart request convention: `{"0": ["variables.file"]}`.
pub type VariableFileMap = HashMap<String, Vec<String>>;

/// Rewrites upload placeholders inside `request.variables`.
///
/// Every part name referenced by the map must resolve to an uploaded part,
/// and every path must address a location the client pre-populated (usually
/// with `null`); either miss is a hard failure, not a silent skip. This is
/// the only mutation an assembled request undergoes.
pub fn apply_file_map(
    request: &mut OperationRequest,
    file_map: &VariableFileMap,
    parts: &HashMap<String, Vec<UploadedFile>>,
) -> Result<(), PipelineError> {
    for (part_name, paths) in file_map {
        if parts.get(part_name).and_then(|list| list.first()).is_none() {
            return Err(PipelineError::UnknownPartName(part_name.clone()));
        }
        for path in paths {
            map_variable(path, &mut request.variables, part_name)?;
        }
    }
    Ok(())
}

/// Replaces the value at `path` (e.g. `variables.file` or `variables.files.1`)
/// with an upload reference token.
fn map_variable(path: &str, variables: &mut Value, part_name: &str) -> Result<(), PipelineError> {
    let unmappable = || PipelineError::UnmappableVariablePath(path.to_string());

    let mut segments = path.split('.');
    if segments.next() != Some("variables") {
        return Err(unmappable());
    }

    let mut segments = segments.peekable();
    let mut segment = match segments.next() {
        Some(segment) if !segment.is_empty() => segment,
        _ => return Err(unmappable()),
    };

    let mut current = variables;
    loop {
        let is_last = segments.peek().is_none();
        let next = match current {
            Value::Object(map) => map.get_mut(segment).ok_or_else(unmappable)?,
            Value::Array(items) => {
                let index: usize = segment.parse().map_err(|_| unmappable())?;
                items.get_mut(index).ok_or_else(unmappable)?
            }
            _ => return Err(unmappable()),
        };

        if is_last {
            *next = json!({ UPLOAD_TOKEN_KEY: part_name });
            return Ok(());
        }

        current = next;
        segment = match segments.next() {
            Some(segment) => segment,
            None => return Err(unmappable()),
        };
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn part(content: &str) -> UploadedFile {
        UploadedFile {
            filename: Some("test.txt".to_string()),
            content_type: Some("text/plain".to_string()),
            content: Bytes::from(content.to_string()),
        }
    }

    fn request_with_variables(variables: Value) -> OperationRequest {
        let mut request = OperationRequest::new("{ping}").unwrap();
        request.variables = variables;
        request
    }

    #[test]
    fn maps_a_top_level_placeholder() {
        let mut request = request_with_variables(json!({"file": null}));
        let parts = HashMap::from([("0".to_string(), vec![part("XYZ")])]);
        let file_map = HashMap::from([("0".to_string(), vec!["variables.file".to_string()])]);

        apply_file_map(&mut request, &file_map, &parts).unwrap();
        assert_eq!(
            request.variables,
            json!({"file": {UPLOAD_TOKEN_KEY: "0"}})
        );
    }

    #[test]
    fn maps_a_nested_array_placeholder() {
        let mut request = request_with_variables(json!({"input": {"files": [null, null]}}));
        let parts = HashMap::from([("a".to_string(), vec![part("one")])]);
        let file_map =
            HashMap::from([("a".to_string(), vec!["variables.input.files.1".to_string()])]);

        apply_file_map(&mut request, &file_map, &parts).unwrap();
        assert_eq!(
            request.variables,
            json!({"input": {"files": [null, {UPLOAD_TOKEN_KEY: "a"}]}})
        );
    }

    #[test]
    fn one_part_can_fill_several_paths() {
        let mut request = request_with_variables(json!({"a": null, "b": null}));
        let parts = HashMap::from([("0".to_string(), vec![part("x")])]);
        let file_map = HashMap::from([(
            "0".to_string(),
            vec!["variables.a".to_string(), "variables.b".to_string()],
        )]);

        apply_file_map(&mut request, &file_map, &parts).unwrap();
        assert_eq!(request.variables["a"], json!({UPLOAD_TOKEN_KEY: "0"}));
        assert_eq!(request.variables["b"], json!({UPLOAD_TOKEN_KEY: "0"}));
    }

    #[test]
    fn missing_part_is_a_hard_error() {
        let mut request = request_with_variables(json!({"file": null}));
        let parts = HashMap::new();
        let file_map = HashMap::from([("0".to_string(), vec!["variables.file".to_string()])]);

        assert!(matches!(
            apply_file_map(&mut request, &file_map, &parts),
            Err(PipelineError::UnknownPartName(name)) if name == "0"
        ));
    }

    #[test]
    fn missing_container_is_a_hard_error() {
        let mut request = request_with_variables(json!({}));
        let parts = HashMap::from([("0".to_string(), vec![part("x")])]);
        let file_map = HashMap::from([("0".to_string(), vec!["variables.file".to_string()])]);

        assert!(matches!(
            apply_file_map(&mut request, &file_map, &parts),
            Err(PipelineError::UnmappableVariablePath(path)) if path == "variables.file"
        ));
    }

    #[test]
    fn path_must_start_with_variables() {
        let mut request = request_with_variables(json!({"file": null}));
        let parts = HashMap::from([("0".to_string(), vec![part("x")])]);
        let file_map = HashMap::from([("0".to_string(), vec!["file".to_string()])]);

        assert!(matches!(
            apply_file_map(&mut request, &file_map, &parts),
            Err(PipelineError::UnmappableVariablePath(_))
        ));
    }

    #[test]
    fn out_of_bounds_index_is_a_hard_error() {
        let mut request = request_with_variables(json!({"files": [null]}));
        let parts = HashMap::from([("0".to_string(), vec![part("x")])]);
        let file_map = HashMap::from([("0".to_string(), vec!["variables.files.3".to_string()])]);

        assert!(matches!(
            apply_file_map(&mut request, &file_map, &parts),
            Err(PipelineError::UnmappableVariablePath(_))
        ));
    }
}
