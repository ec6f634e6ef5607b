//! # Query Parser
//!
//! Parses the JSON `where` document and the find options into structured
//! queries.

use std::collections::HashMap;

use regex::RegexBuilder;
use serde_json::{Map, Value};

use super::filter::{Clause, Constraint, Query};
use crate::errors::{ApiError, ApiResult};
use crate::value::FieldValue;

/// Order by clause
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub ascending: bool,
}

/// Options understood by the store itself
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub skip: usize,
    pub limit: Option<usize>,
    pub order: Vec<OrderBy>,
}

impl FindOptions {
    /// At most one result, no ordering
    pub fn first() -> Self {
        Self {
            limit: Some(1),
            ..Default::default()
        }
    }
}

/// Options of a client find request
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub skip: usize,

    /// `None` uses the configured default limit
    pub limit: Option<usize>,

    pub order: Vec<OrderBy>,

    /// Also compute the total number of matches
    pub count: bool,

    /// Projection; `objectId`, `createdAt` and `updatedAt` are always kept
    pub keys: Option<Vec<String>>,

    /// Pointer paths to expand, each split on `.`
    pub include: Vec<Vec<String>>,
}

impl QueryOptions {
    /// Parse options from request parameters
    pub fn from_params(params: &HashMap<String, String>) -> ApiResult<Self> {
        let mut options = QueryOptions::default();

        for (key, value) in params {
            match key.as_str() {
                "skip" => options.skip = parse_count_param("skip", value)?,
                "limit" => options.limit = Some(parse_count_param("limit", value)?),
                "order" => options.order = parse_order(value)?,
                "count" => options.count = !value.is_empty() && value != "0" && value != "false",
                "keys" => options.keys = Some(parse_list(value)),
                "include" => options.include = parse_include(value),
                _ => {}
            }
        }

        Ok(options)
    }
}

fn parse_count_param(name: &str, value: &str) -> ApiResult<usize> {
    value
        .trim()
        .parse()
        .map_err(|_| ApiError::invalid_query(format!("{} should be int", name)))
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse order parameter (comma-separated, `-` prefix for descending)
pub fn parse_order(value: &str) -> ApiResult<Vec<OrderBy>> {
    let mut orders = Vec::new();

    for part in parse_list(value) {
        let (field, ascending) = match part.strip_prefix('-') {
            Some(field) => (field.to_string(), false),
            None => (part, true),
        };
        if field.is_empty() || field.contains('$') {
            return Err(ApiError::invalid_query(format!(
                "Invalid order field: {}",
                field
            )));
        }
        orders.push(OrderBy { field, ascending });
    }

    Ok(orders)
}

/// Parse include parameter into dotted paths
pub fn parse_include(value: &str) -> Vec<Vec<String>> {
    parse_list(value)
        .into_iter()
        .map(|path| path.split('.').map(str::to_string).collect())
        .collect()
}

/// Parse a `where` document
pub fn parse_where(value: &Value) -> ApiResult<Query> {
    let map = value
        .as_object()
        .ok_or_else(|| ApiError::invalid_query("where must be a JSON object"))?;
    parse_object(map)
}

fn parse_object(map: &Map<String, Value>) -> ApiResult<Query> {
    let mut query = Query::all();

    for (key, condition) in map {
        match key.as_str() {
            "$or" | "$and" => {
                let subs = condition
                    .as_array()
                    .filter(|a| !a.is_empty())
                    .ok_or_else(|| {
                        ApiError::invalid_query(format!("{} must be a non-empty array", key))
                    })?
                    .iter()
                    .map(parse_where)
                    .collect::<ApiResult<Vec<_>>>()?;
                query = if key == "$or" {
                    query.and(Clause::Or(subs))
                } else {
                    query.and(Clause::And(subs))
                };
            }
            "$relatedTo" => {
                let object = condition
                    .get("object")
                    .map(FieldValue::from_json)
                    .transpose()?
                    .and_then(|v| v.as_pointer().cloned());
                let relation_key = condition.get("key").and_then(Value::as_str);
                match (object, relation_key) {
                    (Some(object), Some(relation_key)) => {
                        query = query.and(Clause::RelatedTo {
                            object,
                            key: relation_key.to_string(),
                        });
                    }
                    _ => {
                        return Err(ApiError::invalid_query(
                            "$relatedTo requires a pointer object and a key",
                        ))
                    }
                }
            }
            k if k.starts_with('$') => {
                return Err(ApiError::invalid_query(format!("Invalid key name: {}", k)));
            }
            field => {
                if field.split('.').any(str::is_empty) {
                    return Err(ApiError::invalid_query(format!(
                        "Invalid key name: {}",
                        field
                    )));
                }
                for constraint in parse_condition(condition)? {
                    query = query.and_field(field, constraint);
                }
            }
        }
    }

    Ok(query)
}

fn is_operator_object(value: &Value) -> bool {
    match value.as_object() {
        Some(map) => !map.is_empty() && map.keys().all(|k| k.starts_with('$')),
        None => false,
    }
}

fn parse_condition(condition: &Value) -> ApiResult<Vec<Constraint>> {
    if !is_operator_object(condition) {
        return Ok(vec![Constraint::Eq(FieldValue::from_json(condition)?)]);
    }

    let Some(ops) = condition.as_object() else {
        return Ok(Vec::new());
    };
    let regex_options = ops.get("$options").and_then(Value::as_str).unwrap_or("");
    if ops.contains_key("$options") && !ops.contains_key("$regex") {
        return Err(ApiError::invalid_query("$options requires $regex"));
    }

    let mut constraints = Vec::with_capacity(ops.len());
    for (op, operand) in ops {
        let constraint = match op.as_str() {
            "$eq" => Constraint::Eq(FieldValue::from_json(operand)?),
            "$ne" => Constraint::Ne(FieldValue::from_json(operand)?),
            "$lt" => Constraint::Lt(FieldValue::from_json(operand)?),
            "$lte" => Constraint::Lte(FieldValue::from_json(operand)?),
            "$gt" => Constraint::Gt(FieldValue::from_json(operand)?),
            "$gte" => Constraint::Gte(FieldValue::from_json(operand)?),
            "$in" => Constraint::In(parse_list_operand(op, operand)?),
            "$nin" => Constraint::NotIn(parse_list_operand(op, operand)?),
            "$all" => Constraint::All(parse_list_operand(op, operand)?),
            "$exists" => Constraint::Exists(
                operand
                    .as_bool()
                    .ok_or_else(|| ApiError::invalid_query("$exists must be a boolean"))?,
            ),
            "$regex" => {
                let pattern = operand
                    .as_str()
                    .ok_or_else(|| ApiError::invalid_query("$regex must be a string"))?;
                let re = RegexBuilder::new(pattern)
                    .case_insensitive(regex_options.contains('i'))
                    .multi_line(regex_options.contains('m'))
                    .ignore_whitespace(regex_options.contains('x'))
                    .dot_matches_new_line(regex_options.contains('s'))
                    .build()
                    .map_err(|e| ApiError::invalid_query(format!("bad $regex: {}", e)))?;
                Constraint::Regex(re)
            }
            "$options" => continue,
            other => {
                return Err(ApiError::invalid_query(format!(
                    "bad constraint: {}",
                    other
                )))
            }
        };
        constraints.push(constraint);
    }
    Ok(constraints)
}

fn parse_list_operand(op: &str, operand: &Value) -> ApiResult<Vec<FieldValue>> {
    operand
        .as_array()
        .ok_or_else(|| ApiError::invalid_query(format!("bad {} value", op)))?
        .iter()
        .map(FieldValue::from_json)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::document_from_json;
    use serde_json::json;

    fn matches(where_: Value, object: Value) -> bool {
        let query = parse_where(&where_).unwrap();
        let doc = document_from_json(object.as_object().unwrap()).unwrap();
        query.matches(&doc)
    }

    #[test]
    fn test_plain_equality() {
        assert!(matches(json!({"name": "joe"}), json!({"name": "joe"})));
        assert!(!matches(json!({"name": "joe"}), json!({"name": "ann"})));
    }

    #[test]
    fn test_range_operators() {
        let where_ = json!({"score": {"$gte": 10, "$lt": 20}});
        assert!(matches(where_.clone(), json!({"score": 10})));
        assert!(!matches(where_.clone(), json!({"score": 20})));
        assert!(!matches(where_, json!({"score": 5})));
    }

    #[test]
    fn test_in_and_nin() {
        assert!(matches(json!({"s": {"$in": ["a", "b"]}}), json!({"s": "a"})));
        assert!(!matches(json!({"s": {"$nin": ["a", "b"]}}), json!({"s": "a"})));
    }

    #[test]
    fn test_or_clause() {
        let where_ = json!({"$or": [{"a": 1}, {"b": 2}]});
        assert!(matches(where_.clone(), json!({"b": 2})));
        assert!(!matches(where_, json!({"a": 2})));
    }

    #[test]
    fn test_regex_with_options() {
        let where_ = json!({"name": {"$regex": "^jo", "$options": "i"}});
        assert!(matches(where_.clone(), json!({"name": "Joe"})));
        assert!(!matches(where_, json!({"name": "ann"})));
    }

    #[test]
    fn test_date_comparison() {
        let where_ = json!({"when": {"$gt": {"__type": "Date", "iso": "2020-01-01T00:00:00.000Z"}}});
        assert!(matches(
            where_.clone(),
            json!({"when": {"__type": "Date", "iso": "2021-01-01T00:00:00.000Z"}})
        ));
        assert!(!matches(
            where_,
            json!({"when": {"__type": "Date", "iso": "2019-01-01T00:00:00.000Z"}})
        ));
    }

    #[test]
    fn test_unknown_operator_is_invalid_query() {
        let err = parse_where(&json!({"a": {"$near": 1}})).unwrap_err();
        assert!(matches!(err, ApiError::InvalidQuery(_)));

        let err = parse_where(&json!({"$where": "1 == 1"})).unwrap_err();
        assert!(matches!(err, ApiError::InvalidQuery(_)));

        let err = parse_where(&json!([1, 2])).unwrap_err();
        assert!(matches!(err, ApiError::InvalidQuery(_)));
    }

    #[test]
    fn test_related_to_parsed() {
        let query = parse_where(&json!({
            "$relatedTo": {
                "object": {"__type": "Pointer", "className": "_Role", "objectId": "r1"},
                "key": "users"
            }
        }))
        .unwrap();
        assert!(matches!(query.clauses[0], Clause::RelatedTo { .. }));
    }

    #[test]
    fn test_options_from_params() {
        let mut params = HashMap::new();
        params.insert("skip".to_string(), "5".to_string());
        params.insert("order".to_string(), "-score,name".to_string());
        params.insert("count".to_string(), "1".to_string());
        params.insert("include".to_string(), "owner.team".to_string());

        let options = QueryOptions::from_params(&params).unwrap();
        assert_eq!(options.skip, 5);
        assert_eq!(options.limit, None);
        assert!(options.count);
        assert_eq!(
            options.order,
            vec![
                OrderBy {
                    field: "score".into(),
                    ascending: false
                },
                OrderBy {
                    field: "name".into(),
                    ascending: true
                }
            ]
        );
        assert_eq!(options.include, vec![vec!["owner".to_string(), "team".to_string()]]);
    }

    #[test]
    fn test_non_integer_skip_rejected() {
        let mut params = HashMap::new();
        params.insert("skip".to_string(), "many".to_string());
        let err = QueryOptions::from_params(&params).unwrap_err();
        assert_eq!(err, ApiError::invalid_query("skip should be int"));
    }
}
