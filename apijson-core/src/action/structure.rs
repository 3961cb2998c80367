use crate::error::{ApiJsonError, ApiJsonResult};
use crate::metadata::RequestTemplate;
use crate::value::Row;
use serde_json::Value;

/// Match request keys against the template's structure.
///
/// Every declared key must be present (as `Key` or `Key[]`) and every
/// request key must be declared. Returns `(request key, structure key)` pairs.
pub(crate) fn match_structure(template: &RequestTemplate, request: &Row) -> ApiJsonResult<Vec<(String, String)>> {
    let mut matched = Vec::with_capacity(request.len());
    for key in request.keys() {
        let (structure_key, _) = template
            .rule_for(key)
            .ok_or_else(|| ApiJsonError::structure(format!("{} is not declared for tag {}", key, template.tag)))?;
        if matched.iter().any(|(_, s): &(String, String)| s == structure_key) {
            return Err(ApiJsonError::structure(format!("{} is given more than once", structure_key)));
        }
        matched.push((key.clone(), structure_key.to_string()));
    }

    for declared in template.structure.keys() {
        if !matched.iter().any(|(_, s)| s == declared) {
            return Err(ApiJsonError::structure(format!("missing {}", declared)));
        }
    }
    Ok(matched)
}

/// Request value of one key as a batch of row objects.
pub(crate) fn rows_of(key: &str, value: Value) -> ApiJsonResult<Vec<Row>> {
    match value {
        Value::Object(row) => Ok(vec![row]),
        Value::Array(items) if !items.is_empty() => items
            .into_iter()
            .map(|item| match item {
                Value::Object(row) => Ok(row),
                _ => Err(ApiJsonError::structure(format!("{} must hold objects", key))),
            })
            .collect(),
        _ => Err(ApiJsonError::structure(format!("{} must be an object or a non-empty array of objects", key))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{RequestRow, RequestTemplate};
    use serde_json::json;

    fn template() -> RequestTemplate {
        let row: RequestRow = serde_json::from_value(json!({
            "method": "POST",
            "tag": "register",
            "structure": {"User": {}, "Credential": {}}
        }))
        .unwrap();
        RequestTemplate::compile(row).unwrap()
    }

    fn req(v: serde_json::Value) -> Row {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_structure_match() {
        let pairs = match_structure(&template(), &req(json!({"User[]": [], "Credential": {}}))).unwrap();
        assert!(pairs.contains(&("User[]".to_string(), "User".to_string())));

        let err = match_structure(&template(), &req(json!({"User": {}}))).unwrap_err();
        assert!(err.to_string().contains("missing Credential"));

        let err = match_structure(&template(), &req(json!({"User": {}, "Credential": {}, "Todo": {}}))).unwrap_err();
        assert!(err.to_string().contains("Todo"));

        let err = match_structure(&template(), &req(json!({"User": {}, "User[]": [], "Credential": {}}))).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_rows_of() {
        assert_eq!(rows_of("Todo", json!({"a": 1})).unwrap().len(), 1);
        assert_eq!(rows_of("Todo[]", json!([{"a": 1}, {"a": 2}])).unwrap().len(), 2);
        assert!(rows_of("Todo[]", json!([])).is_err());
        assert!(rows_of("Todo[]", json!([1])).is_err());
        assert!(rows_of("Todo", json!("x")).is_err());
    }
}
