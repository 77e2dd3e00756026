//! Reference Resolver: name→id lookup tables preloaded before a bulk run.
//!
//! CSV files refer to related records by display name; the API wants ids. Each
//! [`LookupTable`] is built once from a bulk listing and never changes during the run.

use log::{debug, warn};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::fmt;

use crate::SecurityCenterError;
use crate::client::{ApiExecutor, ApiRequest, ApiResponse};
use crate::session::Session;
use crate::tabular::value_to_string;

/// The listings a bulk run can preload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LookupKind {
    Group,
    Role,
    Repository,
    /// Assets the current user may edit
    ManageableAsset,
    /// Assets the current user may scan
    UsableAsset,
    /// Scan policies the current user may use
    UsablePolicy,
}

impl LookupKind {
    /// Endpoint the listing is read from.
    #[must_use]
    pub fn endpoint(&self) -> &'static str {
        match self {
            LookupKind::Group => "group",
            LookupKind::Role => "role",
            LookupKind::Repository => "repository",
            LookupKind::ManageableAsset | LookupKind::UsableAsset => "asset",
            LookupKind::UsablePolicy => "policy",
        }
    }

    /// Sub-collection holding the records in a filtered listing.
    #[must_use]
    pub fn filter(&self) -> Option<&'static str> {
        match self {
            LookupKind::ManageableAsset => Some("manageable"),
            LookupKind::UsableAsset | LookupKind::UsablePolicy => Some("usable"),
            LookupKind::Group | LookupKind::Role | LookupKind::Repository => None,
        }
    }

    /// The GET that loads this listing.
    #[must_use]
    pub fn request(&self) -> ApiRequest {
        let request = ApiRequest::get(self.endpoint());
        let request = match self {
            LookupKind::Group | LookupKind::UsablePolicy => request,
            LookupKind::Role | LookupKind::Repository | LookupKind::UsableAsset => {
                request.with_field("fields", "id,name")
            }
            LookupKind::ManageableAsset => request.with_field("fields", "id,name,description"),
        };

        match self.filter() {
            Some(filter) => request.with_field("filter", filter),
            None => request,
        }
    }
}

impl fmt::Display for LookupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookupKind::ManageableAsset => f.write_str("manageable asset"),
            LookupKind::UsableAsset => f.write_str("usable asset"),
            LookupKind::UsablePolicy => f.write_str("usable policy"),
            other => f.write_str(other.endpoint()),
        }
    }
}

/// Name→record mapping for one listing.
#[derive(Debug, Clone)]
pub struct LookupTable {
    kind: LookupKind,
    by_name: HashMap<String, Value>,
    names_by_id: HashMap<String, String>,
}

impl LookupTable {
    /// Build a table from listing records.
    ///
    /// Names are matched exactly. When two records share a name the later one wins.
    #[must_use]
    pub fn from_records(kind: LookupKind, records: &[Value]) -> Self {
        let mut by_name = HashMap::with_capacity(records.len());
        let mut names_by_id = HashMap::with_capacity(records.len());

        for record in records {
            let Some(name) = record.get("name").filter(|name| !name.is_null()) else {
                continue;
            };
            let name = value_to_string(name);

            if let Some(id) = record.get("id").filter(|id| !id.is_null()) {
                names_by_id.insert(value_to_string(id), name.clone());
            }

            if by_name.insert(name.clone(), record.clone()).is_some() {
                warn!("⚠️  Duplicate {kind} name '{name}' in lookup, using the last match");
            }
        }

        debug!("Loaded {} {kind} lookup entries", by_name.len());
        Self {
            kind,
            by_name,
            names_by_id,
        }
    }

    /// Build a table from a listing response.
    ///
    /// # Errors
    ///
    /// Returns `InvalidResponse` when the call failed or the listing is missing.
    pub fn from_response(kind: LookupKind, response: &ApiResponse) -> Result<Self, SecurityCenterError> {
        if !response.is_success() {
            return Err(SecurityCenterError::InvalidResponse(format!(
                "Failed to load {kind} lookup\n  URL: {}\n  HTTP {}: {}",
                response.url, response.status, response.body
            )));
        }

        let records = response.collection(kind.filter()).ok_or_else(|| {
            SecurityCenterError::InvalidResponse(format!(
                "{kind} listing from {} contained no records collection",
                response.url
            ))
        })?;

        Ok(Self::from_records(kind, records))
    }

    #[must_use]
    pub fn kind(&self) -> LookupKind {
        self.kind
    }

    /// Id of the record named `name`, exactly as the server reported it.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<&Value> {
        self.by_name
            .get(name)
            .and_then(|record| record.get("id"))
            .filter(|id| !id.is_null())
    }

    /// `{"id": ...}` reference for `name`.
    #[must_use]
    pub fn id_ref(&self, name: &str) -> Option<Value> {
        self.resolve(name).map(|id| json!({ "id": id }))
    }

    /// Full listing record for `name`.
    #[must_use]
    pub fn record(&self, name: &str) -> Option<&Value> {
        self.by_name.get(name)
    }

    /// Display name for an id, for rendering exports.
    #[must_use]
    pub fn name_for_id(&self, id: &Value) -> Option<&str> {
        self.names_by_id.get(&value_to_string(id)).map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

/// All tables preloaded for one run.
#[derive(Debug, Clone, Default)]
pub struct LookupTables {
    tables: HashMap<LookupKind, LookupTable>,
}

impl LookupTables {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch every listing in `kinds`, in order. The first failure aborts the preload.
    ///
    /// # Errors
    ///
    /// Propagates transport errors and returns `InvalidResponse` for rejected listings.
    pub async fn preload<E: ApiExecutor + ?Sized>(
        executor: &E,
        session: &Session,
        kinds: &[LookupKind],
    ) -> Result<Self, SecurityCenterError> {
        let mut tables = Self::new();
        for kind in kinds {
            if tables.get(*kind).is_some() {
                continue;
            }
            debug!("Preloading {kind} lookup");
            let response = executor.execute(&kind.request(), Some(session)).await?;
            tables.insert(LookupTable::from_response(*kind, &response)?);
        }
        Ok(tables)
    }

    pub fn insert(&mut self, table: LookupTable) {
        self.tables.insert(table.kind(), table);
    }

    #[must_use]
    pub fn get(&self, kind: LookupKind) -> Option<&LookupTable> {
        self.tables.get(&kind)
    }

    /// Id for `name` in the `kind` table; `None` when unknown or the table was not loaded.
    #[must_use]
    pub fn resolve(&self, kind: LookupKind, name: &str) -> Option<&Value> {
        self.get(kind).and_then(|table| table.resolve(name))
    }

    #[must_use]
    pub fn id_ref(&self, kind: LookupKind, name: &str) -> Option<Value> {
        self.get(kind).and_then(|table| table.id_ref(name))
    }

    #[must_use]
    pub fn record(&self, kind: LookupKind, name: &str) -> Option<&Value> {
        self.get(kind).and_then(|table| table.record(name))
    }

    #[must_use]
    pub fn name_for_id(&self, kind: LookupKind, id: &Value) -> Option<&str> {
        self.get(kind).and_then(|table| table.name_for_id(id))
    }
}
