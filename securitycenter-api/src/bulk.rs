//! Bulk Operation Driver: whole export and import runs.
//!
//! An export is one listing GET followed by a flatten of every returned record. An import
//! preloads its lookup tables, then walks the CSV rows in file order: expand, wait on the
//! throttle, submit, classify. The first row that fails stops the run.

use log::{debug, error, info, warn};
use serde_json::Value;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::SecurityCenterError;
use crate::client::{ApiExecutor, ApiRequest, ApiResponse};
use crate::lookup::LookupTables;
use crate::record::{RecordType, ReportKind};
use crate::rules;
use crate::session::Session;
use crate::tabular::{self, FlatRow, Table, selector_query_fields, value_to_string};
use crate::throttle::Throttle;

/// Listing sub-collection tried when a generic export names no filter.
const DEFAULT_COLLECTION: &str = "manageable";

/// Rows produced by an export.
#[derive(Debug, Clone)]
pub struct ExportOutcome {
    /// What was exported, e.g. `asset`
    pub label: String,
    pub headers: Vec<String>,
    pub rows: Vec<FlatRow>,
    pub elapsed: Duration,
}

impl ExportOutcome {
    /// Write the header row and all rows as CSV.
    ///
    /// # Errors
    ///
    /// Returns `Csv` or `Io` when writing fails.
    pub fn write_csv<W: Write>(&self, output: W) -> Result<(), SecurityCenterError> {
        tabular::write_table(output, &self.headers, &self.rows)
    }

    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "Exported {} {}(s) in {:?}",
            self.rows.len(),
            self.label,
            self.elapsed
        )
    }
}

/// The row that stopped an import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportFailure {
    /// Zero-based index among the data rows
    pub row: usize,
    /// Server error payload, transport error or row errors, verbatim
    pub payload: String,
}

/// Result of an import run.
#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub record_type: RecordType,
    /// Data rows in the input
    pub total: usize,
    /// Rows the server accepted, or in a dry run the rows that would have been sent
    pub succeeded: usize,
    /// Nothing was submitted
    pub dry_run: bool,
    pub failure: Option<ImportFailure>,
    /// Soft resolution misses, prefixed with their row
    pub warnings: Vec<String>,
    pub elapsed: Duration,
}

impl ImportSummary {
    fn new(record_type: RecordType, total: usize) -> Self {
        Self {
            record_type,
            total,
            succeeded: 0,
            dry_run: false,
            failure: None,
            warnings: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// The run summary: the failing row, if any, then the success count.
    #[must_use]
    pub fn message(&self) -> String {
        let mut message = String::new();
        if let Some(failure) = &self.failure {
            message.push_str(&format!(
                "Error adding {} {}: {}\n",
                self.record_type, failure.row, failure.payload
            ));
        }
        if self.dry_run {
            message.push_str(&format!(
                "Dry run: {}/{} {}(s) ready to import, nothing sent in {:?}",
                self.succeeded, self.total, self.record_type, self.elapsed
            ));
        } else {
            message.push_str(&format!(
                "Successfully imported {}/{} {}(s) in {:?}",
                self.succeeded, self.total, self.record_type, self.elapsed
            ));
        }
        message
    }
}

/// Result of a report file download run.
#[derive(Debug, Clone)]
pub struct ReportDownloadSummary {
    pub kind: ReportKind,
    pub attempted: usize,
    pub saved: Vec<PathBuf>,
    pub elapsed: Duration,
}

impl ReportDownloadSummary {
    #[must_use]
    pub fn message(&self) -> String {
        format!(
            "Exported {}/{} {} in {:?}",
            self.saved.len(),
            self.attempted,
            self.kind.label(),
            self.elapsed
        )
    }
}

/// Runs exports, imports and report downloads against one session.
pub struct BulkDriver<'a, E: ApiExecutor + ?Sized, T: Throttle> {
    executor: &'a E,
    session: Session,
    throttle: T,
    dry_run: bool,
}

impl<'a, E: ApiExecutor + ?Sized, T: Throttle> BulkDriver<'a, E, T> {
    pub fn new(executor: &'a E, session: Session, throttle: T) -> Self {
        Self {
            executor,
            session,
            throttle,
            dry_run: false,
        }
    }

    /// Build and validate import rows without submitting them.
    ///
    /// Lookup tables are still listed so names resolve as they would in a real run.
    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    async fn list(
        &self,
        request: &ApiRequest,
        filter: Option<&str>,
    ) -> Result<Vec<Value>, SecurityCenterError> {
        let response = self.executor.execute(request, Some(&self.session)).await?;
        ensure_success(&response, &format!("list {}", request.path))?;

        let records = response.collection(filter).ok_or_else(|| {
            SecurityCenterError::InvalidResponse(format!(
                "Listing from {} contained no records collection",
                response.url
            ))
        })?;
        debug!("Listed {} {} record(s)", records.len(), request.path);
        Ok(records.to_vec())
    }

    /// Export one record type.
    ///
    /// Without a selector the type's own column layout is used. With one, the listed records
    /// are flattened column by column as for [`BulkDriver::export_endpoint`]. `filter`
    /// replaces the type's default listing filter.
    ///
    /// # Errors
    ///
    /// Propagates transport errors and returns `InvalidResponse` for rejected listings.
    pub async fn export(
        &mut self,
        record_type: RecordType,
        selector: Option<&[String]>,
        filter: Option<&str>,
    ) -> Result<ExportOutcome, SecurityCenterError> {
        if selector.is_some() {
            let filter = filter.or(record_type.list_filter());
            return self
                .export_endpoint(record_type.endpoint(), selector, filter)
                .await;
        }

        let start = Instant::now();
        let lookups =
            LookupTables::preload(self.executor, &self.session, record_type.export_lookups())
                .await?;

        let mut request = record_type.export_request();
        if let Some(filter) = filter {
            request = request.with_field("filter", filter);
        }
        let records = self
            .list(&request, filter.or(record_type.list_filter()))
            .await?;

        let headers = record_type
            .export_layout()
            .iter()
            .map(|column| column.header.to_string())
            .collect();
        let rows = records
            .iter()
            .map(|record| record_type.flatten(record, &lookups))
            .collect();

        let outcome = ExportOutcome {
            label: record_type.to_string(),
            headers,
            rows,
            elapsed: start.elapsed(),
        };
        info!("✅ {}", outcome.summary());
        Ok(outcome)
    }

    /// Export any listing endpoint.
    ///
    /// With a selector only the first segment of each column is requested from the server and
    /// the columns are emitted in selector order. Without one every top-level field is emitted,
    /// and the header is the union of all fields in first-seen order.
    ///
    /// # Errors
    ///
    /// Propagates transport errors and returns `InvalidResponse` for rejected listings.
    pub async fn export_endpoint(
        &mut self,
        endpoint: &str,
        selector: Option<&[String]>,
        filter: Option<&str>,
    ) -> Result<ExportOutcome, SecurityCenterError> {
        let start = Instant::now();

        let mut request = ApiRequest::get(endpoint);
        if let Some(selector) = selector {
            request = request.with_field("fields", selector_query_fields(selector));
        }
        if let Some(filter) = filter {
            request = request.with_field("filter", filter);
        }

        let records = self
            .list(&request, Some(filter.unwrap_or(DEFAULT_COLLECTION)))
            .await?;
        let rows: Vec<FlatRow> = records
            .iter()
            .map(|record| tabular::flatten(record, selector))
            .collect();

        let headers = match selector {
            Some(selector) => selector.to_vec(),
            None => {
                let mut headers: Vec<String> = Vec::new();
                for header in rows.iter().flat_map(|row| row.headers()) {
                    if !headers.iter().any(|known| known == header) {
                        headers.push(header.to_string());
                    }
                }
                headers
            }
        };

        let outcome = ExportOutcome {
            label: endpoint.to_string(),
            headers,
            rows,
            elapsed: start.elapsed(),
        };
        info!("✅ {}", outcome.summary());
        Ok(outcome)
    }

    /// Import every row of `table` as `record_type`, stopping at the first failure.
    ///
    /// A failing row does not make this return `Err`; it is reported in the summary together
    /// with the rows that succeeded before it.
    ///
    /// # Errors
    ///
    /// Returns `Unsupported` for types that cannot be imported and propagates lookup preload
    /// failures, which abort the run before any row is submitted.
    pub async fn import(
        &mut self,
        record_type: RecordType,
        table: &Table,
    ) -> Result<ImportSummary, SecurityCenterError> {
        let kinds = record_type.import_lookups()?;
        let start = Instant::now();

        let lookups = LookupTables::preload(self.executor, &self.session, kinds).await?;
        let mut summary = ImportSummary::new(record_type, table.rows.len());
        summary.dry_run = self.dry_run;

        for (index, row) in table.rows.iter().enumerate() {
            let expanded = rules::expand(record_type, &table.headers, row, &lookups)?;

            for warning in &expanded.warnings {
                warn!("⚠️  {record_type} row {index}: {warning}");
                summary.warnings.push(format!("row {index}: {warning}"));
            }

            if !expanded.is_submittable() {
                for row_error in &expanded.errors {
                    error!("❌ {record_type} row {index}: {row_error}");
                }
                summary.failure = Some(ImportFailure {
                    row: index,
                    payload: expanded
                        .errors
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(" "),
                });
                break;
            }

            let request = expanded.submission.request();
            if self.dry_run {
                info!(
                    "🔍 Would {} {}: {}",
                    request.method,
                    request.path,
                    Value::Object(request.fields.clone())
                );
                summary.succeeded = summary.succeeded.saturating_add(1);
                continue;
            }

            self.throttle.wait().await;

            match self.executor.execute(&request, Some(&self.session)).await {
                Ok(response) if response.is_success() => {
                    summary.succeeded = summary.succeeded.saturating_add(1);
                    debug!("{} {} accepted", request.method, request.path);
                }
                Ok(response) => {
                    error!(
                        "❌ {} {} rejected with HTTP {} (error_code {})",
                        request.method,
                        request.path,
                        response.status,
                        response.error_code()
                    );
                    summary.failure = Some(ImportFailure {
                        row: index,
                        payload: response.body.to_string(),
                    });
                    break;
                }
                Err(e) => {
                    error!("❌ {} {} failed: {e}", request.method, request.path);
                    summary.failure = Some(ImportFailure {
                        row: index,
                        payload: e.to_string(),
                    });
                    break;
                }
            }
        }

        summary.elapsed = start.elapsed();
        if summary.is_success() {
            info!("✅ {}", summary.message());
        } else {
            error!("❌ {}", summary.message());
        }
        Ok(summary)
    }

    /// Read CSV from `input` and import it.
    ///
    /// # Errors
    ///
    /// Returns `Csv` for unreadable input, otherwise as [`BulkDriver::import`].
    pub async fn import_csv<R: Read>(
        &mut self,
        record_type: RecordType,
        input: R,
    ) -> Result<ImportSummary, SecurityCenterError> {
        let table = tabular::read_table(input)?;
        self.import(record_type, &table).await
    }

    /// Download every manageable report of `kind` into `directory`.
    ///
    /// Individual download failures are logged and counted, not fatal.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` when `directory` is not a directory and propagates listing failures.
    pub async fn download_reports(
        &mut self,
        kind: ReportKind,
        directory: &Path,
    ) -> Result<ReportDownloadSummary, SecurityCenterError> {
        if !directory.is_dir() {
            return Err(SecurityCenterError::InvalidConfig(format!(
                "The directory \"{}\" does not exist",
                directory.display()
            )));
        }

        let start = Instant::now();
        let reports = self
            .list(&kind.list_request(), kind.record_type().list_filter())
            .await?;

        let mut saved = Vec::new();
        for report in &reports {
            let id = value_to_string(&report["id"]);
            let name = value_to_string(&report["name"]);
            match self.download_one(kind, &id, directory).await {
                Ok(path) => {
                    info!("📄 Saved {name} ({id}) to {}", path.display());
                    saved.push(path);
                }
                Err(e) => warn!("⚠️  Could not save {name} ({id}): {e}"),
            }
        }

        let summary = ReportDownloadSummary {
            kind,
            attempted: reports.len(),
            saved,
            elapsed: start.elapsed(),
        };
        info!("✅ {}", summary.message());
        Ok(summary)
    }

    async fn download_one(
        &self,
        kind: ReportKind,
        id: &str,
        directory: &Path,
    ) -> Result<PathBuf, SecurityCenterError> {
        let request = kind.download_request(id);
        let response = self.executor.execute_raw(&request, Some(&self.session)).await?;

        if response.status != 200 {
            return Err(SecurityCenterError::InvalidResponse(format!(
                "{} returned HTTP {}",
                response.url, response.status
            )));
        }

        let filename = response.attachment_filename().ok_or_else(|| {
            SecurityCenterError::InvalidResponse(format!(
                "{} did not name an attachment",
                response.url
            ))
        })?;

        let path = directory.join(filename);
        fs::write(&path, &response.bytes)?;
        Ok(path)
    }
}

fn ensure_success(response: &ApiResponse, context: &str) -> Result<(), SecurityCenterError> {
    if response.is_success() {
        return Ok(());
    }
    Err(SecurityCenterError::InvalidResponse(format!(
        "Failed to {context}\n  URL: {}\n  HTTP {}: {}",
        response.url, response.status, response.body
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_import_summary_message() {
        let mut summary = ImportSummary::new(RecordType::Asset, 3);
        summary.succeeded = 3;
        assert!(summary.is_success());
        assert!(
            summary
                .message()
                .starts_with("Successfully imported 3/3 asset(s) in ")
        );

        summary.succeeded = 1;
        summary.failure = Some(ImportFailure {
            row: 1,
            payload: r#"{"error_code":1}"#.to_string(),
        });
        let message = summary.message();
        assert!(!summary.is_success());
        assert!(message.starts_with("Error adding asset 1: {\"error_code\":1}\n"));
        assert!(message.contains("Successfully imported 1/3 asset(s)"));
    }

    #[test]
    fn test_report_summary_message() {
        let summary = ReportDownloadSummary {
            kind: ReportKind::Definitions,
            attempted: 4,
            saved: vec![PathBuf::from("a.xml")],
            elapsed: Duration::from_millis(5),
        };
        assert!(summary.message().starts_with("Exported 1/4 report tasks in "));
    }
}
