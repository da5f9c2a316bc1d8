use anyhow::{Context, Result};
use serde_json::{Map, Value};
use styleforge_contracts::images::StyleExemplar;
use tracing::debug;

use crate::clients::{IndexQuery, VectorIndex};

/// Exemplars returned per query.
pub const STYLE_REFERENCE_LIMIT: usize = 3;

const COLUMNS: [&str; 4] = ["id", "filename", "caption", "project_id"];

/// Most relevant captioned references for `query`, best first.
///
/// An empty index answer is an empty list; transport errors propagate.
pub fn retrieve_exemplars(
    index: &dyn VectorIndex,
    query: &str,
    project_id: Option<&str>,
) -> Result<Vec<StyleExemplar>> {
    let scope = project_id.map(str::trim).filter(|id| !id.is_empty());
    let filters = scope.map(|id| {
        let mut filters = Map::new();
        filters.insert("project_id".to_string(), Value::String(id.to_string()));
        filters
    });
    let rows = index
        .query(&IndexQuery {
            query_text: query.to_string(),
            columns: COLUMNS.iter().map(|column| column.to_string()).collect(),
            num_results: STYLE_REFERENCE_LIMIT,
            filters,
        })
        .context("style reference search failed")?;

    let mut exemplars = Vec::new();
    for row in rows {
        if exemplars.len() == STYLE_REFERENCE_LIMIT {
            break;
        }
        if let Some(scope) = scope {
            let row_project = row.get(3).and_then(Value::as_str);
            if row_project.is_some_and(|owner| owner != scope) {
                debug!(project_id = scope, "dropping out-of-scope style reference");
                continue;
            }
        }
        let Some(filename) = row
            .get(1)
            .and_then(Value::as_str)
            .filter(|name| !name.trim().is_empty())
        else {
            continue;
        };
        let caption = row
            .get(2)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        exemplars.push(StyleExemplar {
            filename: filename.to_string(),
            caption,
        });
    }
    Ok(exemplars)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::fakes::FakeIndex;

    #[test]
    fn scoped_query_filters_by_project_and_limits_results() -> anyhow::Result<()> {
        let index = FakeIndex::with_rows(vec![
            vec![json!(1), json!("a.png"), json!("A cat in watercolor"), json!("p1")],
            vec![json!(2), json!("b.png"), json!("A harbor"), json!("p2")],
            vec![json!(3), json!("c.png"), json!("A cat in ink"), json!("p1")],
            vec![json!(4), json!("d.png"), json!("A fox"), json!("p1")],
            vec![json!(5), json!("e.png"), json!("An owl"), json!("p1")],
        ]);
        let exemplars = retrieve_exemplars(&index, "a dog running", Some("p1"))?;

        assert_eq!(
            exemplars.iter().map(|e| e.filename.as_str()).collect::<Vec<_>>(),
            vec!["a.png", "c.png", "d.png"]
        );
        let queries = index.queries();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].num_results, STYLE_REFERENCE_LIMIT);
        assert_eq!(
            queries[0].filters.as_ref().and_then(|f| f.get("project_id")),
            Some(&json!("p1"))
        );
        Ok(())
    }

    #[test]
    fn no_matches_is_an_empty_list() -> anyhow::Result<()> {
        let index = FakeIndex::with_rows(Vec::new());
        assert!(retrieve_exemplars(&index, "anything", None)?.is_empty());
        assert_eq!(index.queries()[0].filters, None);
        Ok(())
    }

    #[test]
    fn transport_failure_propagates() {
        let index = FakeIndex::failing();
        assert!(retrieve_exemplars(&index, "anything", Some("p1")).is_err());
    }
}
