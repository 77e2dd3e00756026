//! Per-record-type import rules: one CSV row in, one API submission out.
//!
//! A row is zipped with the header row into a flat map, then reshaped for its record type:
//! defaults are injected, fields the API rejects are dropped, and name-valued columns are
//! rewritten into `{"id": ...}` references through the preloaded [`LookupTables`].
//!
//! Unresolvable names are soft: the reference is left out and a warning is recorded. A few
//! problems are hard ([`RowError`]) and keep the row from being submitted at all.

use serde_json::{Map, Value, json};
use thiserror::Error;

use crate::SecurityCenterError;
use crate::client::{ApiRequest, HttpMethod};
use crate::lookup::{LookupKind, LookupTables};
use crate::record::RecordType;
use crate::tabular::{split_multi, value_to_string, zip_row};

/// Timezone every imported user starts with.
pub const DEFAULT_USER_TIMEZONE: &str = "America/New_York";

/// Hard per-row failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowError {
    #[error("Missing required field '{0}'.")]
    MissingField(String),

    #[error(
        "Role '{0}' is not a valid role in the SecurityCenter appliance you are importing to. \
         Please create this role manually before continuing."
    )]
    UnresolvedRole(String),

    #[error("Dynamic asset \"{0}\" requires valid rule set.")]
    MissingRules(String),

    #[error("Dynamic asset \"{name}\" has an invalid rule set: {reason}")]
    InvalidRules { name: String, reason: String },
}

/// Whether a submission creates a record or updates one in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Create,
    Update,
}

impl WriteMode {
    #[must_use]
    pub fn method(&self) -> HttpMethod {
        match self {
            WriteMode::Create => HttpMethod::Post,
            WriteMode::Update => HttpMethod::Patch,
        }
    }
}

/// The request that submits one record.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub mode: WriteMode,
    pub path: String,
    pub body: Map<String, Value>,
}

impl Submission {
    #[must_use]
    pub fn request(&self) -> ApiRequest {
        match self.mode {
            WriteMode::Create => ApiRequest::post(self.path.clone(), self.body.clone()),
            WriteMode::Update => ApiRequest::patch(self.path.clone(), self.body.clone()),
        }
    }
}

/// Result of applying the import rules to one row.
#[derive(Debug, Clone, PartialEq)]
pub struct Expanded {
    pub submission: Submission,
    /// Soft problems, such as names missing from a lookup
    pub warnings: Vec<String>,
    /// Hard problems; a row with any of these must not be submitted
    pub errors: Vec<RowError>,
}

impl Expanded {
    #[must_use]
    pub fn is_submittable(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Working state while one row is reshaped.
struct RowBuilder<'a> {
    data: Map<String, Value>,
    lookups: &'a LookupTables,
    warnings: Vec<String>,
    errors: Vec<RowError>,
}

impl<'a> RowBuilder<'a> {
    fn new(data: Map<String, Value>, lookups: &'a LookupTables) -> Self {
        Self {
            data,
            lookups,
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn text(&self, field: &str) -> Option<String> {
        self.data.get(field).map(value_to_string)
    }

    fn remove_text(&mut self, field: &str) -> Option<String> {
        self.data.remove(field).map(|value| value_to_string(&value))
    }

    fn set(&mut self, field: &str, value: Value) {
        self.data.insert(field.to_string(), value);
    }

    fn set_default(&mut self, field: &str, value: Value) {
        if !self.data.contains_key(field) {
            self.set(field, value);
        }
    }

    fn drop_fields(&mut self, fields: &[&str]) {
        for field in fields {
            self.data.remove(*field);
        }
    }

    fn unresolved(&mut self, kind: LookupKind, name: &str, column: &str) {
        self.warnings
            .push(format!("{kind} '{name}' from column '{column}' was not found, leaving it out"));
    }

    /// Resolve one name into an id reference.
    fn resolve_one(&mut self, kind: LookupKind, name: &str, column: &str) -> Option<Value> {
        if name.is_empty() {
            return None;
        }
        let reference = self.lookups.id_ref(kind, name);
        if reference.is_none() {
            self.unresolved(kind, name, column);
        }
        reference
    }

    /// Resolve a pipe-delimited list of names into id references.
    fn resolve_many(&mut self, kind: LookupKind, names: &str, column: &str) -> Vec<Value> {
        split_multi(names)
            .filter_map(|name| self.resolve_one(kind, name, column))
            .collect()
    }

    fn finish(self, record_type: RecordType, id: Option<String>) -> Expanded {
        let (mode, path) = record_type.choose_verb(id.as_deref());
        Expanded {
            submission: Submission {
                mode,
                path,
                body: self.data,
            },
            warnings: self.warnings,
            errors: self.errors,
        }
    }
}

/// Apply the import rules of `record_type` to one row.
///
/// # Errors
///
/// Returns `Unsupported` for record types that cannot be imported.
pub fn expand(
    record_type: RecordType,
    headers: &[String],
    row: &[String],
    lookups: &LookupTables,
) -> Result<Expanded, SecurityCenterError> {
    record_type.import_lookups()?;

    let mut data = zip_row(headers, row);
    if data.get("id").is_some_and(|id| value_to_string(id).is_empty()) {
        data.remove("id");
    }

    let builder = RowBuilder::new(data, lookups);
    let expanded = match record_type {
        RecordType::Asset => expand_asset(builder),
        RecordType::User => expand_user(builder),
        RecordType::Group => expand_group(builder),
        RecordType::Scan => expand_scan(builder),
        RecordType::Repository | RecordType::ReportDefinition | RecordType::Report => {
            return Err(SecurityCenterError::Unsupported(format!(
                "import of {record_type}"
            )));
        }
    };

    Ok(expanded)
}

fn expand_asset(mut row: RowBuilder<'_>) -> Expanded {
    row.drop_fields(&["owner", "ownerGroup"]);

    if row.text("type").as_deref() == Some("dynamic") {
        row.drop_fields(&["definedIPs"]);
        let name = row.text("name").unwrap_or_default();
        match row.remove_text("rules") {
            Some(rules) => match serde_json::from_str::<Value>(&rules) {
                Ok(parsed @ Value::Object(_)) => row.set("rules", parsed),
                Ok(_) => row.errors.push(RowError::InvalidRules {
                    name,
                    reason: "expected a JSON object".to_string(),
                }),
                Err(e) => row.errors.push(RowError::InvalidRules {
                    name,
                    reason: e.to_string(),
                }),
            },
            None => row.errors.push(RowError::MissingRules(name)),
        }
    } else {
        row.drop_fields(&["rules"]);
        row.set_default("definedIPs", Value::from(""));
    }

    if let Some(groups) = row.text("groups") {
        let references = row.resolve_many(LookupKind::Group, &groups, "groups");
        row.set("groups", Value::Array(references));
    }

    let id = row.text("id");
    row.finish(RecordType::Asset, id)
}

fn expand_user(mut row: RowBuilder<'_>) -> Expanded {
    row.set(
        "preferences",
        json!([{ "name": "timezone", "value": DEFAULT_USER_TIMEZONE }]),
    );
    row.set("responsibleAssetID", Value::from(-1));

    if let Some(group) = row.remove_text("group")
        && let Some(id) = row.resolve_one(LookupKind::Group, &group, "group")
    {
        row.set("groupID", id["id"].clone());
    }

    let lookups = row.lookups;
    match row.remove_text("role").filter(|role| !role.is_empty()) {
        Some(role) => match lookups.resolve(LookupKind::Role, &role) {
            Some(id) => row.set("roleID", id.clone()),
            None => row.errors.push(RowError::UnresolvedRole(role)),
        },
        None => row.errors.push(RowError::MissingField("role".to_string())),
    }

    row.finish(RecordType::User, None)
}

fn expand_group(mut row: RowBuilder<'_>) -> Expanded {
    row.set("createdTime", Value::from(0));
    row.set("context", Value::from(""));
    row.set("status", Value::from(-1));
    row.set("group", json!({ "id": 0 }));

    row.drop_fields(&["users"]);

    if let Some(repositories) = row.text("repositories") {
        let references = row.resolve_many(LookupKind::Repository, &repositories, "repositories");
        row.set("repositories", Value::Array(references));
    }

    if let Some(assets) = row.text("assets") {
        let lookups = row.lookups;
        let mut shared = Vec::new();
        let mut defining = Vec::new();
        for name in split_multi(&assets) {
            match lookups.record(LookupKind::ManageableAsset, name) {
                Some(asset) => {
                    defining.push(json!({ "id": asset["id"] }));
                    shared.push(asset.clone());
                }
                None => row.unresolved(LookupKind::ManageableAsset, name, "assets"),
            }
        }
        row.set("assets", Value::Array(shared));
        row.set("definingAssets", Value::Array(defining));
    }

    row.finish(RecordType::Group, None)
}

fn expand_scan(mut row: RowBuilder<'_>) -> Expanded {
    row.data
        .retain(|key, _| !key.starts_with("credentials.") && !key.starts_with("owner"));

    if !row.data.contains_key("id") {
        row.set("createdTime", Value::from(0));
        row.set("modifiedTime", Value::from(0));
        row.set("status", Value::from(-1));
    }

    if let Some(repository) = row.remove_text("repository.name")
        && let Some(reference) = row.resolve_one(LookupKind::Repository, &repository, "repository.name")
    {
        row.set("repository", reference);
    }

    if let Some(assets) = row.text("assets") {
        let references = row.resolve_many(LookupKind::UsableAsset, &assets, "assets");
        row.set("assets", Value::Array(references));
    }

    if let Some(policy) = row.remove_text("policy.name") {
        if let Some(reference) = row.resolve_one(LookupKind::UsablePolicy, &policy, "policy.name") {
            row.set("policy", reference);
        }
        row.drop_fields(&["policy.id"]);
    }

    if row.data.keys().any(|key| key.starts_with("schedule.")) {
        let mut schedule = Map::new();
        for part in ["type", "repeatRule", "start"] {
            let value = row.data.get(&format!("schedule.{part}")).cloned().unwrap_or(Value::Null);
            schedule.insert(part.to_string(), value);
        }
        row.set("schedule", Value::Object(schedule));
        row.drop_fields(&["schedule.type", "schedule.repeatRule", "schedule.start", "schedule.nextRun"]);
    }

    row.set_default("assets", Value::Array(Vec::new()));
    row.set_default("ipList", Value::from(""));

    let id = row.remove_text("id");
    row.finish(RecordType::Scan, id)
}
