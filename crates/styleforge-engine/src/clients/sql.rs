use anyhow::{bail, Context, Result};
use reqwest::blocking::Client as HttpClient;
use serde::Serialize;
use serde_json::{json, Value};
use styleforge_contracts::config::ForgeConfig;
use styleforge_contracts::images::{Caption, ImageRecord, PENDING_CAPTION};
use styleforge_contracts::project::{Project, ProjectSummary, TrainingClaim, TrainingStatus};
use tracing::debug;

use super::MetadataStore;
use crate::http::{response_json_or_error, truncate_text};

/// Named, typed bind value of a statement (`:name` in the SQL text).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SqlParam {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(rename = "type")]
    pub kind: &'static str,
}

/// SQL text plus its bind values. Untrusted text only ever travels as a
/// parameter; the SQL text itself is built from constants and validated
/// table names.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn bind_str(mut self, name: &str, value: impl Into<String>) -> Self {
        self.params.push(SqlParam {
            name: name.to_string(),
            value: Some(value.into()),
            kind: "STRING",
        });
        self
    }

    pub fn bind_opt_str(mut self, name: &str, value: Option<&str>) -> Self {
        self.params.push(SqlParam {
            name: name.to_string(),
            value: value.map(str::to_string),
            kind: "STRING",
        });
        self
    }

    pub fn bind_i64(mut self, name: &str, value: i64) -> Self {
        self.params.push(SqlParam {
            name: name.to_string(),
            value: Some(value.to_string()),
            kind: "BIGINT",
        });
        self
    }

    fn payload(&self, warehouse_id: &str) -> Value {
        json!({
            "statement": self.sql,
            "warehouse_id": warehouse_id,
            "wait_timeout": "30s",
            "on_wait_timeout": "CANCEL",
            "format": "JSON_ARRAY",
            "disposition": "INLINE",
            "parameters": self.params,
        })
    }
}

/// Metadata store backed by the workspace SQL statement API.
pub struct SqlMetadataStore {
    endpoint: String,
    token: String,
    warehouse_id: String,
    projects_table: String,
    images_table: String,
    http: HttpClient,
}

impl SqlMetadataStore {
    pub fn new(config: &ForgeConfig, http: HttpClient) -> Self {
        Self {
            endpoint: format!("{}/api/2.0/sql/statements", config.endpoints.metadata),
            token: config.credentials.workspace_token.clone(),
            warehouse_id: config.warehouse_id.clone(),
            projects_table: config.projects_table(),
            images_table: config.images_table(),
            http,
        }
    }

    pub fn execute(&self, statement: &Statement) -> Result<Vec<Vec<Value>>> {
        debug!(sql = %truncate_text(&statement.sql, 160), "executing statement");
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(&statement.payload(&self.warehouse_id))
            .send()
            .with_context(|| format!("SQL statement request failed ({})", self.endpoint))?;
        let payload = response_json_or_error("SQL statement", response)?;
        statement_rows(&payload)
    }

    fn execute_update(&self, statement: &Statement) -> Result<u64> {
        let rows = self.execute(statement)?;
        Ok(affected_rows(&rows))
    }

    fn image_rows(&self, statement: &Statement) -> Result<Vec<ImageRecord>> {
        self.execute(statement)?
            .iter()
            .map(|row| image_from_row(row))
            .collect()
    }
}

/// Matches rows that `Caption::from_stored` reads as pending: the sentinel,
/// blank text or NULL. Binds `:pending`.
const PENDING_PREDICATE: &str = "trim(coalesce(caption, '')) IN ('', :pending)";

fn image_query(images_table: &str, filter: &str) -> String {
    format!(
        "SELECT id, project_id, filename, path, caption FROM {images_table} \
         WHERE project_id = :project_id{filter} ORDER BY id"
    )
}

fn pending_images_statement(images_table: &str, project_id: &str) -> Statement {
    Statement::new(image_query(
        images_table,
        &format!(" AND {PENDING_PREDICATE}"),
    ))
    .bind_str("project_id", project_id)
    .bind_str("pending", PENDING_CAPTION)
}

fn captioned_images_statement(images_table: &str, project_id: &str) -> Statement {
    Statement::new(image_query(
        images_table,
        &format!(" AND NOT ({PENDING_PREDICATE})"),
    ))
    .bind_str("project_id", project_id)
    .bind_str("pending", PENDING_CAPTION)
}

fn set_caption_statement(
    images_table: &str,
    project_id: &str,
    image_id: i64,
    caption: &Caption,
) -> Statement {
    Statement::new(format!(
        "UPDATE {images_table} SET caption = :caption WHERE project_id = :project_id \
         AND id = :image_id AND {PENDING_PREDICATE}"
    ))
    .bind_str("caption", caption.stored_text())
    .bind_str("project_id", project_id)
    .bind_i64("image_id", image_id)
    .bind_str("pending", PENDING_CAPTION)
}

impl MetadataStore for SqlMetadataStore {
    fn project(&self, project_id: &str) -> Result<Option<Project>> {
        let statement = Statement::new(format!(
            "SELECT project_id, name, description, training_status, trained_model_reference, \
             trained_job_handle, trained_model_destination FROM {} WHERE project_id = :project_id",
            self.projects_table
        ))
        .bind_str("project_id", project_id);
        let rows = self.execute(&statement)?;
        rows.first().map(|row| project_from_row(row)).transpose()
    }

    fn list_projects(&self) -> Result<Vec<ProjectSummary>> {
        let statement = Statement::new(format!(
            "SELECT p.project_id, p.name, p.description, COUNT(m.id) AS image_count, \
             p.training_status FROM {} p LEFT JOIN {} m ON p.project_id = m.project_id \
             GROUP BY p.project_id, p.name, p.description, p.training_status ORDER BY p.name",
            self.projects_table, self.images_table
        ));
        self.execute(&statement)?
            .iter()
            .map(|row| {
                Ok(ProjectSummary {
                    project_id: required_cell(row, 0, "project_id")?,
                    name: cell_str(row, 1).unwrap_or_default(),
                    description: cell_str(row, 2).unwrap_or_default(),
                    image_count: cell_i64(row, 3).unwrap_or(0).max(0) as u64,
                    training_status: parse_status(row, 4)?,
                })
            })
            .collect()
    }

    fn insert_project(&self, project: &Project) -> Result<()> {
        let statement = Statement::new(format!(
            "INSERT INTO {} (project_id, name, description, training_status, created_at) \
             VALUES (:project_id, :name, :description, :training_status, current_timestamp())",
            self.projects_table
        ))
        .bind_str("project_id", &project.project_id)
        .bind_str("name", &project.name)
        .bind_str("description", &project.description)
        .bind_str("training_status", project.training_status.as_str());
        self.execute(&statement)?;
        Ok(())
    }

    fn images(&self, project_id: &str) -> Result<Vec<ImageRecord>> {
        let statement = Statement::new(image_query(&self.images_table, ""))
            .bind_str("project_id", project_id);
        self.image_rows(&statement)
    }

    fn pending_images(&self, project_id: &str) -> Result<Vec<ImageRecord>> {
        self.image_rows(&pending_images_statement(&self.images_table, project_id))
    }

    fn captioned_images(&self, project_id: &str) -> Result<Vec<ImageRecord>> {
        self.image_rows(&captioned_images_statement(&self.images_table, project_id))
    }

    fn insert_image(&self, record: &ImageRecord) -> Result<()> {
        let statement = Statement::new(format!(
            "INSERT INTO {} (id, project_id, filename, path, caption, uploaded_at) \
             VALUES (:id, :project_id, :filename, :path, :caption, current_timestamp())",
            self.images_table
        ))
        .bind_i64("id", record.id)
        .bind_str("project_id", &record.project_id)
        .bind_str("filename", &record.filename)
        .bind_str("path", &record.path)
        .bind_str("caption", record.caption.stored_text());
        self.execute(&statement)?;
        Ok(())
    }

    fn set_caption(&self, project_id: &str, image_id: i64, caption: &Caption) -> Result<bool> {
        let statement = set_caption_statement(&self.images_table, project_id, image_id, caption);
        Ok(self.execute_update(&statement)? > 0)
    }

    fn begin_training(
        &self,
        project_id: &str,
        expected: TrainingStatus,
        claim: &TrainingClaim,
    ) -> Result<bool> {
        let statement = Statement::new(format!(
            "UPDATE {} SET training_status = :next_status, trained_job_handle = :job_handle, \
             trained_model_destination = :destination WHERE project_id = :project_id \
             AND coalesce(nullif(training_status, ''), 'none') = :expected",
            self.projects_table
        ))
        .bind_str("next_status", TrainingStatus::Training.as_str())
        .bind_str("job_handle", &claim.job_handle)
        .bind_str("destination", &claim.destination)
        .bind_str("project_id", project_id)
        .bind_str("expected", expected.as_str());
        Ok(self.execute_update(&statement)? > 0)
    }

    fn complete_training(
        &self,
        project_id: &str,
        job_handle: &str,
        version: &str,
    ) -> Result<bool> {
        let statement = Statement::new(format!(
            "UPDATE {} SET training_status = :next_status, trained_model_reference = :version \
             WHERE project_id = :project_id AND trained_job_handle = :job_handle \
             AND training_status = :current_status",
            self.projects_table
        ))
        .bind_str("next_status", TrainingStatus::Completed.as_str())
        .bind_str("version", version)
        .bind_str("project_id", project_id)
        .bind_str("job_handle", job_handle)
        .bind_str("current_status", TrainingStatus::Training.as_str());
        Ok(self.execute_update(&statement)? > 0)
    }

    fn fail_training(&self, project_id: &str, job_handle: &str) -> Result<bool> {
        let statement = Statement::new(format!(
            "UPDATE {} SET training_status = :next_status WHERE project_id = :project_id \
             AND trained_job_handle = :job_handle AND training_status = :current_status",
            self.projects_table
        ))
        .bind_str("next_status", TrainingStatus::Failed.as_str())
        .bind_str("project_id", project_id)
        .bind_str("job_handle", job_handle)
        .bind_str("current_status", TrainingStatus::Training.as_str());
        Ok(self.execute_update(&statement)? > 0)
    }
}

fn statement_rows(payload: &Value) -> Result<Vec<Vec<Value>>> {
    let state = payload
        .pointer("/status/state")
        .and_then(Value::as_str)
        .unwrap_or("SUCCEEDED");
    if state != "SUCCEEDED" {
        let message = payload
            .pointer("/status/error/message")
            .and_then(Value::as_str)
            .unwrap_or("no error message");
        bail!(
            "SQL statement ended in state {state}: {}",
            truncate_text(message, 512)
        );
    }
    let rows = payload
        .pointer("/result/data_array")
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .filter_map(Value::as_array)
                .cloned()
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    Ok(rows)
}

/// DML statements answer with one row whose first cell is `num_affected_rows`.
fn affected_rows(rows: &[Vec<Value>]) -> u64 {
    rows.first()
        .and_then(|row| cell_i64(row, 0))
        .map(|count| count.max(0) as u64)
        .unwrap_or(0)
}

fn cell_str(row: &[Value], idx: usize) -> Option<String> {
    match row.get(idx)? {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

fn cell_i64(row: &[Value], idx: usize) -> Option<i64> {
    match row.get(idx)? {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn required_cell(row: &[Value], idx: usize, column: &str) -> Result<String> {
    cell_str(row, idx)
        .filter(|value| !value.trim().is_empty())
        .with_context(|| format!("statement row is missing {column}"))
}

fn non_blank(row: &[Value], idx: usize) -> Option<String> {
    cell_str(row, idx).filter(|value| !value.trim().is_empty())
}

fn parse_status(row: &[Value], idx: usize) -> Result<TrainingStatus> {
    TrainingStatus::parse(cell_str(row, idx).as_deref()).map_err(anyhow::Error::msg)
}

fn project_from_row(row: &[Value]) -> Result<Project> {
    Ok(Project {
        project_id: required_cell(row, 0, "project_id")?,
        name: cell_str(row, 1).unwrap_or_default(),
        description: cell_str(row, 2).unwrap_or_default(),
        training_status: parse_status(row, 3)?,
        trained_model_reference: non_blank(row, 4),
        trained_job_handle: non_blank(row, 5),
        trained_model_destination: non_blank(row, 6),
    })
}

fn image_from_row(row: &[Value]) -> Result<ImageRecord> {
    Ok(ImageRecord {
        id: cell_i64(row, 0).context("statement row is missing image id")?,
        project_id: required_cell(row, 1, "project_id")?,
        filename: required_cell(row, 2, "filename")?,
        path: cell_str(row, 3).unwrap_or_default(),
        caption: Caption::from_stored(cell_str(row, 4).as_deref()),
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn payload_carries_typed_parameters() {
        let statement = Statement::new("UPDATE t SET caption = :caption WHERE id = :image_id")
            .bind_str("caption", "It's a cat")
            .bind_i64("image_id", 42)
            .bind_opt_str("unused", None);
        let payload = statement.payload("wh-1");
        assert_eq!(payload["warehouse_id"], "wh-1");
        assert_eq!(
            payload["parameters"],
            json!([
                {"name": "caption", "value": "It's a cat", "type": "STRING"},
                {"name": "image_id", "value": "42", "type": "BIGINT"},
                {"name": "unused", "type": "STRING"},
            ])
        );
        assert!(!payload["statement"]
            .as_str()
            .unwrap_or_default()
            .contains("It's"));
    }

    #[test]
    fn failed_statement_state_is_an_error() {
        let payload = json!({
            "status": {"state": "FAILED", "error": {"message": "TABLE_OR_VIEW_NOT_FOUND"}}
        });
        let err = statement_rows(&payload).err().map(|err| err.to_string());
        assert_eq!(
            err.as_deref(),
            Some("SQL statement ended in state FAILED: TABLE_OR_VIEW_NOT_FOUND")
        );
    }

    #[test]
    fn rows_map_to_projects_and_images() -> anyhow::Result<()> {
        let payload = json!({
            "status": {"state": "SUCCEEDED"},
            "result": {"data_array": [
                ["p1", "Ink", "brush work", "completed", "v123", "t-9", "acme/styleforge-custom"]
            ]}
        });
        let rows = statement_rows(&payload)?;
        let project = project_from_row(&rows[0])?;
        assert_eq!(project.training_status, TrainingStatus::Completed);
        assert_eq!(project.trained_model_reference.as_deref(), Some("v123"));
        assert_eq!(project.trained_job_handle.as_deref(), Some("t-9"));

        let image = image_from_row(&[
            json!("1712"),
            json!("p1"),
            json!("cat.png"),
            json!("/Volumes/x/p1/cat.png"),
            json!(PENDING_CAPTION),
        ])?;
        assert_eq!(image.id, 1712);
        assert!(image.caption.is_pending());
        Ok(())
    }

    #[test]
    fn null_status_and_references_read_as_absent() -> anyhow::Result<()> {
        let project = project_from_row(&[
            json!("p2"),
            json!("Fresh"),
            Value::Null,
            Value::Null,
            Value::Null,
            json!(""),
            Value::Null,
        ])?;
        assert_eq!(project.training_status, TrainingStatus::None);
        assert_eq!(project.trained_model_reference, None);
        assert_eq!(project.trained_job_handle, None);
        assert_eq!(project.description, "");
        Ok(())
    }

    #[test]
    fn caption_filters_treat_blank_captions_as_pending() {
        let pending = pending_images_statement("s.image_records", "p1");
        let captioned = captioned_images_statement("s.image_records", "p1");
        assert!(pending
            .sql
            .ends_with("AND trim(coalesce(caption, '')) IN ('', :pending) ORDER BY id"));
        assert!(captioned
            .sql
            .ends_with("AND NOT (trim(coalesce(caption, '')) IN ('', :pending)) ORDER BY id"));
        for statement in [&pending, &captioned] {
            assert!(statement
                .params
                .iter()
                .any(|param| param.name == "pending"
                    && param.value.as_deref() == Some(PENDING_CAPTION)));
        }
        assert!(Caption::from_stored(Some("  ")).is_pending());
    }

    #[test]
    fn caption_update_is_scoped_to_the_project() {
        let statement = set_caption_statement(
            "s.image_records",
            "p1",
            7,
            &Caption::Captioned("A cat".to_string()),
        );
        assert!(statement
            .sql
            .contains("WHERE project_id = :project_id AND id = :image_id AND trim("));
        let names: Vec<_> = statement.params.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["caption", "project_id", "image_id", "pending"]);
        assert_eq!(statement.params[1].value.as_deref(), Some("p1"));
    }

    #[test]
    fn affected_rows_reads_first_cell() {
        assert_eq!(affected_rows(&[vec![json!("1"), json!("0")]]), 1);
        assert_eq!(affected_rows(&[vec![json!(0)]]), 0);
        assert_eq!(affected_rows(&[]), 0);
    }
}
