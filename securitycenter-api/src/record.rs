//! Record types moved by the bulk driver and how each one is exported.
//!
//! Every [`RecordType`] knows the query that lists it, the CSV layout its export produces, and
//! the lookups it needs. The import side lives in [`crate::rules`].

use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::SecurityCenterError;
use crate::client::ApiRequest;
use crate::lookup::{LookupKind, LookupTables};
use crate::rules::{self, Expanded, WriteMode};
use crate::tabular::{FlatRow, MULTI_VALUE_SEPARATOR, extract_path, value_to_string};

/// Record types the driver can export, import, or both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    Asset,
    User,
    Group,
    Repository,
    Scan,
    ReportDefinition,
    Report,
}

impl RecordType {
    pub const ALL: [RecordType; 7] = [
        RecordType::Asset,
        RecordType::User,
        RecordType::Group,
        RecordType::Repository,
        RecordType::Scan,
        RecordType::ReportDefinition,
        RecordType::Report,
    ];

    #[must_use]
    pub fn endpoint(&self) -> &'static str {
        match self {
            RecordType::Asset => "asset",
            RecordType::User => "user",
            RecordType::Group => "group",
            RecordType::Repository => "repository",
            RecordType::Scan => "scan",
            RecordType::ReportDefinition => "reportDefinition",
            RecordType::Report => "report",
        }
    }

    /// Sub-collection the listing is filtered to, if any.
    #[must_use]
    pub fn list_filter(&self) -> Option<&'static str> {
        match self {
            RecordType::Asset | RecordType::Scan | RecordType::ReportDefinition | RecordType::Report => {
                Some("manageable")
            }
            RecordType::User | RecordType::Group | RecordType::Repository => None,
        }
    }

    /// The listing GET behind this type's export.
    #[must_use]
    pub fn export_request(&self) -> ApiRequest {
        let fields = match self {
            RecordType::Asset => "id,type,name,description,typeFields,groups,owner,ownerGroup",
            RecordType::User => "username,email,firstname,lastname,group,role,authType",
            RecordType::Group => "id,name,description,assets,definingAssets,users,repositories",
            RecordType::Repository => "id,name,description,typeFields",
            RecordType::Scan => {
                "owner,groups,ownerGroup,status,name,createdTime,schedule,policy,plugin,type"
            }
            RecordType::ReportDefinition => {
                "id,name,type,ownerGroup,owner,schedule,status,createdTime,modifiedTime"
            }
            RecordType::Report => {
                "id,name,type,ownerGroup,owner,status,startTime,finishTime,totalSteps,running"
            }
        };

        let mut request = ApiRequest::get(self.endpoint()).with_field("fields", fields);
        if let Some(filter) = self.list_filter() {
            request = request.with_field("filter", filter);
        }
        if *self == RecordType::Report {
            request = request.with_field("startTime", "1");
        }
        request
    }

    /// Column layout of this type's CSV export.
    #[must_use]
    pub fn export_layout(&self) -> Vec<ExportColumn> {
        use self::Extract::{DynamicJson, JoinedNames, Path, ResolvedNames, Scheduled};

        match self {
            RecordType::Asset => vec![
                ExportColumn::new("id", Path("id")),
                ExportColumn::new("type", Path("type")),
                ExportColumn::new("name", Path("name")),
                ExportColumn::new("description", Path("description")),
                ExportColumn::new("definedIPs", Path("typeFields.definedIPs")),
                ExportColumn::new("owner", Path("owner.username")),
                ExportColumn::new("ownerGroup", Path("ownerGroup.name")),
                ExportColumn::new("groups", JoinedNames(&["groups"], "name")),
                ExportColumn::new("rules", DynamicJson("typeFields.rules")),
            ],
            RecordType::User => vec![
                ExportColumn::new("username", Path("username")),
                ExportColumn::new("email", Path("email")),
                ExportColumn::new("firstname", Path("firstname")),
                ExportColumn::new("lastname", Path("lastname")),
                ExportColumn::new("group", Path("group.name")),
                ExportColumn::new("role", Path("role.name")),
                ExportColumn::new("authType", Path("authType")),
            ],
            RecordType::Group => vec![
                ExportColumn::new("id", Path("id")),
                ExportColumn::new("name", Path("name")),
                ExportColumn::new("description", Path("description")),
                ExportColumn::new("assets", JoinedNames(&["definingAssets", "assets"], "name")),
                ExportColumn::new("users", JoinedNames(&["users"], "username")),
                ExportColumn::new(
                    "repositories",
                    ResolvedNames("repositories", LookupKind::Repository),
                ),
            ],
            RecordType::Repository => vec![
                ExportColumn::new("id", Path("id")),
                ExportColumn::new("name", Path("name")),
                ExportColumn::new("description", Path("description")),
                ExportColumn::new("ipRange", Path("typeFields.ipRange")),
            ],
            RecordType::Scan => [
                "id",
                "name",
                "status",
                "type",
                "owner.username",
                "ownerGroup.name",
                "createdTime",
                "plugin.id",
                "plugin.name",
                "policy.id",
                "policy.name",
                "schedule.nextRun",
                "schedule.repeatRule",
                "schedule.start",
                "schedule.type",
            ]
            .into_iter()
            .map(|path| ExportColumn::new(path, Path(path)))
            .collect(),
            RecordType::ReportDefinition => vec![
                ExportColumn::new("id", Path("id")),
                ExportColumn::new("name", Path("name")),
                ExportColumn::new("status", Path("status")),
                ExportColumn::new("type", Path("type")),
                ExportColumn::new("createdTime", Path("createdTime")),
                ExportColumn::new("modifiedTime", Path("modifiedTime")),
                ExportColumn::new("owner", Path("owner.username")),
                ExportColumn::new("ownerGroup", Path("ownerGroup.name")),
                ExportColumn::new("schedule.nextRun", Path("schedule.nextRun")),
                ExportColumn::new("schedule.repeatRule", Scheduled("repeatRule")),
                ExportColumn::new("schedule.start", Scheduled("start")),
                ExportColumn::new("schedule.type", Scheduled("type")),
            ],
            RecordType::Report => vec![
                ExportColumn::new("id", Path("id")),
                ExportColumn::new("name", Path("name")),
                ExportColumn::new("status", Path("status")),
                ExportColumn::new("type", Path("type")),
                ExportColumn::new("owner", Path("owner.username")),
                ExportColumn::new("ownerGroup", Path("ownerGroup.name")),
                ExportColumn::new("startTime", Path("startTime")),
                ExportColumn::new("finishTime", Path("finishTime")),
            ],
        }
    }

    /// Lookups needed to render an export.
    #[must_use]
    pub fn export_lookups(&self) -> &'static [LookupKind] {
        match self {
            RecordType::Group => &[LookupKind::Repository],
            _ => &[],
        }
    }

    /// Lookups needed before the first row of an import.
    ///
    /// # Errors
    ///
    /// Returns `Unsupported` for types that cannot be imported.
    pub fn import_lookups(&self) -> Result<&'static [LookupKind], SecurityCenterError> {
        match self {
            RecordType::Asset => Ok(&[LookupKind::Group]),
            RecordType::User => Ok(&[LookupKind::Role, LookupKind::Group]),
            RecordType::Group => Ok(&[LookupKind::ManageableAsset, LookupKind::Repository]),
            RecordType::Scan => Ok(&[
                LookupKind::UsableAsset,
                LookupKind::Repository,
                LookupKind::UsablePolicy,
            ]),
            RecordType::Repository | RecordType::ReportDefinition | RecordType::Report => {
                Err(SecurityCenterError::Unsupported(format!("import of {self}")))
            }
        }
    }

    #[must_use]
    pub fn supports_import(&self) -> bool {
        self.import_lookups().is_ok()
    }

    /// Flatten one listed record into this type's export layout.
    #[must_use]
    pub fn flatten(&self, record: &Value, lookups: &LookupTables) -> FlatRow {
        self.export_layout()
            .iter()
            .map(|column| (column.header, column.extract.render(record, lookups)))
            .collect()
    }

    /// Turn one CSV row into the request that submits it.
    ///
    /// # Errors
    ///
    /// Returns `Unsupported` for types that cannot be imported.
    pub fn expand(
        &self,
        headers: &[String],
        row: &[String],
        lookups: &LookupTables,
    ) -> Result<Expanded, SecurityCenterError> {
        rules::expand(*self, headers, row, lookups)
    }

    /// Verb used to submit a record: update in place when it carries an id and the type
    /// supports it, create otherwise.
    #[must_use]
    pub fn choose_verb(&self, id: Option<&str>) -> (WriteMode, String) {
        match (self, id) {
            (RecordType::Asset | RecordType::Scan, Some(id)) => {
                (WriteMode::Update, format!("{}/{id}", self.endpoint()))
            }
            _ => (WriteMode::Create, self.endpoint().to_string()),
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.endpoint())
    }
}

impl FromStr for RecordType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asset" | "assets" => Ok(RecordType::Asset),
            "user" | "users" => Ok(RecordType::User),
            "group" | "groups" => Ok(RecordType::Group),
            "repository" | "repositories" | "repo" | "repos" => Ok(RecordType::Repository),
            "scan" | "scans" => Ok(RecordType::Scan),
            "reportdefinition" | "reportdefinitions" => Ok(RecordType::ReportDefinition),
            "report" | "reports" => Ok(RecordType::Report),
            _ => Err(format!("unknown record type '{s}'")),
        }
    }
}

/// One export column: its header and how its cell is computed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportColumn {
    pub header: &'static str,
    pub extract: Extract,
}

impl ExportColumn {
    #[must_use]
    pub fn new(header: &'static str, extract: Extract) -> Self {
        Self { header, extract }
    }
}

/// How an export cell is computed from a listed record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extract {
    /// Dotted path, as in a `--fields` selector
    Path(&'static str),
    /// Union of the arrays under the given fields, taking `key` from each object,
    /// de-duplicated in first-seen order and pipe-joined
    JoinedNames(&'static [&'static str], &'static str),
    /// Array of `{id}` references rendered as names through a lookup table
    ResolvedNames(&'static str, LookupKind),
    /// Nested value written as compact JSON
    Json(&'static str),
    /// As `Json`, but only for records whose `type` is `dynamic`
    DynamicJson(&'static str),
    /// `schedule.<field>`, left empty unless the schedule has a next run
    Scheduled(&'static str),
}

impl Extract {
    /// Compute the cell for `record`. Missing data renders as the empty string.
    #[must_use]
    pub fn render(&self, record: &Value, lookups: &LookupTables) -> String {
        match self {
            Extract::Path(path) => extract_path(record, path),
            Extract::JoinedNames(fields, key) => {
                let mut names: Vec<String> = Vec::new();
                let items = fields
                    .iter()
                    .filter_map(|field| record.get(*field).and_then(Value::as_array))
                    .flatten();
                for item in items {
                    if let Some(name) = item.get(*key).filter(|name| !name.is_null()) {
                        let name = value_to_string(name);
                        if !names.contains(&name) {
                            names.push(name);
                        }
                    }
                }
                names.join(MULTI_VALUE_SEPARATOR)
            }
            Extract::ResolvedNames(field, kind) => record
                .get(*field)
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|item| item.get("id"))
                        .filter_map(|id| lookups.name_for_id(*kind, id))
                        .collect::<Vec<_>>()
                        .join(MULTI_VALUE_SEPARATOR)
                })
                .unwrap_or_default(),
            Extract::DynamicJson(path) => {
                if record.get("type").and_then(Value::as_str) == Some("dynamic") {
                    Extract::Json(path).render(record, lookups)
                } else {
                    String::new()
                }
            }
            Extract::Json(path) => {
                let mut value = Some(record);
                for segment in path.split('.') {
                    value = value.and_then(|v| v.get(segment));
                }
                match value {
                    None | Some(Value::Null) => String::new(),
                    Some(value) => value.to_string(),
                }
            }
            Extract::Scheduled(field) => {
                let Some(schedule) = record.get("schedule").filter(|s| s.is_object()) else {
                    return String::new();
                };
                let next_run = schedule.get("nextRun").map(value_to_string).unwrap_or_default();
                if next_run == "0" {
                    String::new()
                } else {
                    schedule.get(*field).map(value_to_string).unwrap_or_default()
                }
            }
        }
    }
}

/// The two kinds of report file downloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    /// Report definitions, exported in SecurityCenter's own format for later re-import
    Definitions,
    /// Generated report results
    Results,
}

impl ReportKind {
    #[must_use]
    pub fn record_type(&self) -> RecordType {
        match self {
            ReportKind::Definitions => RecordType::ReportDefinition,
            ReportKind::Results => RecordType::Report,
        }
    }

    /// Listing of the reports to download.
    #[must_use]
    pub fn list_request(&self) -> ApiRequest {
        let request = ApiRequest::get(self.record_type().endpoint())
            .with_field("filter", "manageable")
            .with_field("fields", "id,name");
        match self {
            ReportKind::Definitions => request,
            ReportKind::Results => request.with_field("startTime", "1"),
        }
    }

    /// POST that returns the file for report `id`.
    #[must_use]
    pub fn download_request(&self, id: &str) -> ApiRequest {
        let path = match self {
            ReportKind::Definitions => format!("reportDefinition/{id}/export"),
            ReportKind::Results => format!("report/{id}/download"),
        };
        let mut body = Map::new();
        body.insert("exportType".to_string(), Value::from("placeholders"));
        ApiRequest::post(path, body)
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            ReportKind::Definitions => "report tasks",
            ReportKind::Results => "reports",
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use crate::client::HttpMethod;
    use crate::lookup::LookupTable;
    use serde_json::json;

    #[test]
    fn test_record_type_parsing() {
        assert_eq!("asset".parse::<RecordType>(), Ok(RecordType::Asset));
        assert_eq!("Assets".parse::<RecordType>(), Ok(RecordType::Asset));
        assert_eq!("repositories".parse::<RecordType>(), Ok(RecordType::Repository));
        assert_eq!("reportDefinition".parse::<RecordType>(), Ok(RecordType::ReportDefinition));
        assert!("vulnerability".parse::<RecordType>().is_err());
        assert!("repositorie".parse::<RecordType>().is_err());
        assert!("scanss".parse::<RecordType>().is_err());
    }

    #[test]
    fn test_asset_export_layout() {
        let record = json!({
            "id": "12",
            "type": "dynamic",
            "name": "Web Servers",
            "description": null,
            "typeFields": {"rules": {"operator": "all", "children": []}},
            "owner": {"username": "admin"},
            "ownerGroup": {"name": "Full Access"},
            "groups": [{"id": "1", "name": "Ops"}, {"id": "2", "name": "Dev"}]
        });
        let row = RecordType::Asset.flatten(&record, &LookupTables::new());

        assert_eq!(
            row.headers().collect::<Vec<_>>(),
            vec!["id", "type", "name", "description", "definedIPs", "owner", "ownerGroup", "groups", "rules"]
        );
        assert_eq!(row.get("description"), Some(""));
        assert_eq!(row.get("definedIPs"), Some(""));
        assert_eq!(row.get("owner"), Some("admin"));
        assert_eq!(row.get("groups"), Some("Ops|Dev"));
        assert_eq!(row.get("rules"), Some(r#"{"operator":"all","children":[]}"#));
    }

    #[test]
    fn test_static_asset_export_omits_rules() {
        let record = json!({
            "id": "13",
            "type": "static",
            "name": "Desktops",
            "typeFields": {
                "definedIPs": "10.0.0.0/24",
                "rules": {"operator": "all", "children": []}
            }
        });
        let row = RecordType::Asset.flatten(&record, &LookupTables::new());

        assert_eq!(row.get("definedIPs"), Some("10.0.0.0/24"));
        assert_eq!(row.get("rules"), Some(""));
    }

    #[test]
    fn test_group_export_dedupes_assets_and_resolves_repositories() {
        let mut lookups = LookupTables::new();
        lookups.insert(LookupTable::from_records(
            LookupKind::Repository,
            &[json!({"id": "5", "name": "Main"}), json!({"id": "6", "name": "Lab"})],
        ));
        let record = json!({
            "id": "3",
            "name": "Ops",
            "definingAssets": [{"id": "1", "name": "Servers"}],
            "assets": [{"id": "1", "name": "Servers"}, {"id": "2", "name": "Desktops"}],
            "users": [{"username": "alice"}, {"username": "bob"}],
            "repositories": [{"id": "6"}, {"id": "5"}, {"id": "99"}]
        });
        let row = RecordType::Group.flatten(&record, &lookups);

        assert_eq!(row.get("assets"), Some("Servers|Desktops"));
        assert_eq!(row.get("users"), Some("alice|bob"));
        assert_eq!(row.get("repositories"), Some("Lab|Main"));
    }

    #[test]
    fn test_report_definition_schedule_only_when_scheduled() {
        let lookups = LookupTables::new();
        let unscheduled = json!({"id": "1", "schedule": {"nextRun": 0, "type": "template", "start": "x"}});
        let row = RecordType::ReportDefinition.flatten(&unscheduled, &lookups);
        assert_eq!(row.get("schedule.nextRun"), Some("0"));
        assert_eq!(row.get("schedule.type"), Some(""));

        let scheduled = json!({"id": "2", "schedule": {"nextRun": 1700000000, "type": "ical", "repeatRule": "FREQ=DAILY"}});
        let row = RecordType::ReportDefinition.flatten(&scheduled, &lookups);
        assert_eq!(row.get("schedule.type"), Some("ical"));
        assert_eq!(row.get("schedule.repeatRule"), Some("FREQ=DAILY"));
        assert_eq!(row.get("schedule.start"), Some(""));
    }

    #[test]
    fn test_export_requests() {
        let request = RecordType::Scan.export_request();
        assert_eq!(request.path, "scan");
        assert_eq!(request.fields.get("filter"), Some(&json!("manageable")));

        let request = RecordType::Report.export_request();
        assert_eq!(request.fields.get("startTime"), Some(&json!("1")));

        let request = RecordType::User.export_request();
        assert!(request.fields.get("filter").is_none());
    }

    #[test]
    fn test_import_support() {
        assert!(RecordType::Asset.supports_import());
        assert!(RecordType::Scan.supports_import());
        assert!(matches!(
            RecordType::Repository.import_lookups(),
            Err(SecurityCenterError::Unsupported(_))
        ));
    }

    #[test]
    fn test_choose_verb() {
        assert_eq!(
            RecordType::Asset.choose_verb(Some("7")),
            (WriteMode::Update, "asset/7".to_string())
        );
        assert_eq!(
            RecordType::Asset.choose_verb(None),
            (WriteMode::Create, "asset".to_string())
        );
        assert_eq!(
            RecordType::User.choose_verb(Some("7")),
            (WriteMode::Create, "user".to_string())
        );
        assert_eq!(
            RecordType::Scan.choose_verb(Some("3")),
            (WriteMode::Update, "scan/3".to_string())
        );
    }

    #[test]
    fn test_report_download_requests() {
        let request = ReportKind::Definitions.download_request("4");
        assert_eq!(request.path, "reportDefinition/4/export");
        assert_eq!(request.method, HttpMethod::Post);
        assert_eq!(request.fields.get("exportType"), Some(&json!("placeholders")));

        assert_eq!(ReportKind::Results.download_request("9").path, "report/9/download");
        assert_eq!(
            ReportKind::Results.list_request().fields.get("startTime"),
            Some(&json!("1"))
        );
    }
}
