//! Request templates, access rules and the process-wide metadata registry.
//!
//! Metadata is loaded once, compiled into an immutable [`Metadata`] value and
//! published through a [`MetadataRegistry`]. Requests work on an `Arc`
//! snapshot, so a reload never shows a request a half-built mapping.

use crate::access::{Access, AccessPolicy, Method};
use crate::condition::KEY_ROLE;
use crate::error::{ApiJsonError, ApiJsonResult};
use crate::value::Row;
use parking_lot::RwLock;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Value of `REFUSE` meaning "only the `MUST` keys are allowed".
pub const REFUSE_ALL_BUT_MUST: &str = "!";

/// Keys a structure rule forbids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub enum Refuse {
    #[default]
    None,
    Keys(Vec<String>),
    OnlyMust,
}

/// Per-key validation and rewrite rules of a request template.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructureRule {
    #[serde(rename = "MUST", default, deserialize_with = "key_list")]
    pub must: Vec<String>,
    #[serde(rename = "REFUSE", default, deserialize_with = "refuse_rule")]
    #[serde(skip_serializing)]
    pub refuse: Refuse,
    /// Defaults applied when the request omits them.
    #[serde(rename = "INSERT", default)]
    pub insert: Row,
    /// Values forced over whatever the request sent.
    #[serde(rename = "UPDATE", default)]
    pub update: Row,
}

impl StructureRule {
    /// Whether either rewrite map carries `"@role": "OWNER"`.
    pub fn owner_marked(&self) -> bool {
        [&self.insert, &self.update]
            .iter()
            .any(|m| m.get(KEY_ROLE).and_then(Value::as_str) == Some(crate::access::OWNER))
    }

    /// Check one request object against `MUST` and `REFUSE`.
    pub fn check(&self, key: &str, object: &Row) -> ApiJsonResult<()> {
        for must in &self.must {
            if !object.contains_key(must) {
                return Err(ApiJsonError::structure(format!("missing {}.{}", key, must)));
            }
        }
        match &self.refuse {
            Refuse::None => {}
            Refuse::Keys(keys) => {
                if let Some(k) = keys.iter().find(|k| object.contains_key(k.as_str())) {
                    return Err(ApiJsonError::structure(format!("{}.{} is not allowed", key, k)));
                }
            }
            Refuse::OnlyMust => {
                if self.must.is_empty() {
                    return Err(ApiJsonError::structure(format!(
                        "REFUSE '!' on {} requires MUST",
                        key
                    )));
                }
                if let Some(k) = object.keys().find(|k| !self.must.contains(k)) {
                    return Err(ApiJsonError::structure(format!("{}.{} is not allowed", key, k)));
                }
            }
        }
        Ok(())
    }
}

fn split_keys(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(String::from)
        .collect()
}

fn key_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => split_keys(&s),
        Value::Array(items) => items.iter().filter_map(Value::as_str).map(String::from).collect(),
        _ => Vec::new(),
    })
}

fn refuse_rule<'de, D>(deserializer: D) -> Result<Refuse, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) if s.trim() == REFUSE_ALL_BUT_MUST => Refuse::OnlyMust,
        Value::String(s) => Refuse::Keys(split_keys(&s)),
        Value::Array(items) => Refuse::Keys(items.iter().filter_map(Value::as_str).map(String::from).collect()),
        _ => Refuse::None,
    })
}

/// A `_request` row as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRow {
    pub method: Method,
    pub tag: String,
    #[serde(default, deserialize_with = "version_number")]
    pub version: i64,
    #[serde(default)]
    pub structure: Row,
    #[serde(default, deserialize_with = "key_list")]
    pub exec_queue: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub detail: String,
}

fn version_number<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(parse_version(&Value::deserialize(deserializer)?).unwrap_or(0))
}

fn parse_version(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Compiled request template for one (method, tag, version).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestTemplate {
    pub method: Method,
    pub tag: String,
    pub version: i64,
    pub structure: BTreeMap<String, StructureRule>,
    /// Execution order of structure keys; covers every key exactly once.
    pub exec_queue: Vec<String>,
}

impl RequestTemplate {
    pub fn compile(row: RequestRow) -> ApiJsonResult<Self> {
        let mut structure = row.structure;

        // A table tag may describe its table's rules directly.
        let capitalised = row.tag.chars().next().is_some_and(|c| c.is_ascii_uppercase());
        if capitalised && !structure.contains_key(&row.tag) {
            let mut wrapped = Row::new();
            wrapped.insert(row.tag.clone(), Value::Object(structure));
            structure = wrapped;
        }

        let mut rules = BTreeMap::new();
        for (key, rule) in structure {
            let rule: StructureRule = serde_json::from_value(rule).map_err(|e| {
                ApiJsonError::structure(format!("bad rule for {}@{}.{}: {}", row.method, row.tag, key, e))
            })?;
            rules.insert(key, rule);
        }

        let mut exec_queue = Vec::with_capacity(rules.len());
        for key in row.exec_queue {
            if !rules.contains_key(&key) {
                return Err(ApiJsonError::structure(format!(
                    "exec_queue of {}@{} names undeclared key {}",
                    row.method, row.tag, key
                )));
            }
            if !exec_queue.contains(&key) {
                exec_queue.push(key);
            }
        }
        for key in rules.keys() {
            if !exec_queue.contains(key) {
                exec_queue.push(key.clone());
            }
        }

        Ok(Self {
            method: row.method,
            tag: row.tag,
            version: row.version,
            structure: rules,
            exec_queue,
        })
    }

    /// Rule for a request key; `User[]` falls back to `User`.
    pub fn rule_for(&self, request_key: &str) -> Option<(&str, &StructureRule)> {
        if let Some((k, rule)) = self.structure.get_key_value(request_key) {
            return Some((k.as_str(), rule));
        }
        let base = request_key.strip_suffix("[]")?;
        self.structure.get_key_value(base).map(|(k, rule)| (k.as_str(), rule))
    }
}

/// Immutable snapshot of access rules and request templates.
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    access: HashMap<String, Access>,
    /// Templates per (method, tag), newest version first.
    requests: HashMap<(Method, String), Vec<RequestTemplate>>,
}

impl Metadata {
    pub fn from_parts(access: Vec<Access>, requests: Vec<RequestRow>) -> ApiJsonResult<Self> {
        let access = access.into_iter().map(|a| (a.key().to_string(), a)).collect();

        let mut by_tag: HashMap<(Method, String), Vec<RequestTemplate>> = HashMap::new();
        for row in requests {
            let template = RequestTemplate::compile(row)?;
            by_tag
                .entry((template.method, template.tag.clone()))
                .or_default()
                .push(template);
        }
        for templates in by_tag.values_mut() {
            templates.sort_by(|a, b| b.version.cmp(&a.version));
        }

        Ok(Self {
            access,
            requests: by_tag,
        })
    }

    pub fn access_rules(&self) -> impl Iterator<Item = &Access> {
        self.access.values()
    }

    pub fn request_count(&self) -> usize {
        self.requests.values().map(Vec::len).sum()
    }

    /// Template for a tag. Without a version the newest one wins.
    pub fn get_request(&self, method: Method, tag: &str, version: Option<&Value>) -> ApiJsonResult<&RequestTemplate> {
        let not_found = || ApiJsonError::TagNotFound(format!("{}@{}", method, tag));
        let templates = self
            .requests
            .get(&(method, tag.to_string()))
            .ok_or_else(not_found)?;

        match version.filter(|v| !v.is_null()) {
            None => templates.first().ok_or_else(not_found),
            Some(v) => {
                let wanted = parse_version(v)
                    .ok_or_else(|| ApiJsonError::structure(format!("bad version {}", v)))?;
                templates
                    .iter()
                    .find(|t| t.version == wanted)
                    .ok_or_else(not_found)
            }
        }
    }
}

impl AccessPolicy for Metadata {
    fn lookup(&self, table_key: &str) -> Option<Access> {
        self.access
            .get(table_key)
            .or_else(|| self.access.values().find(|a| a.name == table_key))
            .cloned()
    }
}

/// Process-wide metadata with atomic swap-on-reload.
#[derive(Debug, Default)]
pub struct MetadataRegistry {
    current: RwLock<Arc<Metadata>>,
}

impl MetadataRegistry {
    pub fn new(metadata: Metadata) -> Self {
        Self {
            current: RwLock::new(Arc::new(metadata)),
        }
    }

    pub fn snapshot(&self) -> Arc<Metadata> {
        self.current.read().clone()
    }

    pub fn replace(&self, metadata: Metadata) {
        *self.current.write() = Arc::new(metadata);
        tracing::info!("metadata reloaded");
    }
}
