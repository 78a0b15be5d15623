//! [`DocumentStore`] over the `documents` table.
//!
//! Field paths are bound as JSON path parameters wherever SQLite allows it.
//! Index DDL cannot take parameters, so collection names, index names and
//! paths are checked with [`is_valid_path`] before they are spliced in.

use reop_core::document::{
  Document, DocumentFilter, DocumentStore, IndexSpec, is_valid_path,
};
use rusqlite::{params, params_from_iter, types::Value as SqlValue};
use serde_json::{Map, Value};

use crate::{
  Error, Result, SqliteStore,
  schema::{json_path, physical_index_name},
};

fn check_name(name: &str) -> Result<()> {
  if is_valid_path(name) && !name.contains('.') {
    Ok(())
  } else {
    Err(Error::InvalidPath(name.to_owned()))
  }
}

fn check_path(path: &str) -> Result<()> {
  if is_valid_path(path) {
    Ok(())
  } else {
    Err(Error::InvalidPath(path.to_owned()))
  }
}

impl DocumentStore for SqliteStore {
  type Error = Error;

  async fn copy_collection(&self, from: &str, to: &str) -> Result<u64> {
    check_name(from)?;
    check_name(to)?;
    let (from, to) = (from.to_owned(), to.to_owned());

    self
      .run(move |conn| {
        let n = conn.execute(
          "INSERT INTO documents (collection, doc_id, body)
           SELECT ?2, doc_id, body FROM documents WHERE collection = ?1",
          params![from, to],
        )?;
        Ok(n as u64)
      })
      .await
  }

  async fn load_all(&self, collection: &str) -> Result<Vec<Document>> {
    check_name(collection)?;
    let collection = collection.to_owned();

    let rows: Vec<(String, String)> = self
      .run(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT doc_id, body FROM documents WHERE collection = ?1 ORDER BY rowid",
        )?;
        let rows = stmt
          .query_map(params![collection], |r| Ok((r.get(0)?, r.get(1)?)))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    rows
      .into_iter()
      .map(|(id, body)| Ok(Document { id, body: serde_json::from_str(&body)? }))
      .collect()
  }

  async fn insert_document(&self, collection: &str, doc: Document) -> Result<()> {
    check_name(collection)?;
    let collection = collection.to_owned();
    let body = doc.body.to_string();

    self
      .run(move |conn| {
        conn.execute(
          "INSERT INTO documents (collection, doc_id, body) VALUES (?1, ?2, ?3)",
          params![collection, doc.id, body],
        )?;
        Ok(())
      })
      .await
  }

  async fn set_fields(
    &self,
    collection: &str,
    id: &str,
    fields: Map<String, Value>,
  ) -> Result<()> {
    check_name(collection)?;
    for key in fields.keys() {
      check_name(key)?;
    }
    if fields.is_empty() {
      return Ok(());
    }

    // json_set(body, ?3, json(?4), ?5, json(?6), ...)
    let mut args = Vec::with_capacity(fields.len() * 2);
    let mut binds: Vec<SqlValue> =
      vec![collection.to_owned().into(), id.to_owned().into()];
    for (key, value) in fields {
      let n = binds.len();
      args.push(format!("?{}, json(?{})", n + 1, n + 2));
      binds.push(json_path(&key).into());
      binds.push(value.to_string().into());
    }
    let sql = format!(
      "UPDATE documents SET body = json_set(body, {})
       WHERE collection = ?1 AND doc_id = ?2",
      args.join(", ")
    );
    let (collection, id) = (collection.to_owned(), id.to_owned());

    self
      .run(move |conn| {
        let n = conn.execute(&sql, params_from_iter(binds))?;
        if n == 0 {
          return Err(Error::DocumentNotFound { collection, id });
        }
        Ok(())
      })
      .await
  }

  async fn unset_fields(&self, collection: &str, fields: &[&str]) -> Result<u64> {
    check_name(collection)?;
    for f in fields {
      check_path(f)?;
    }
    if fields.is_empty() {
      return Ok(0);
    }

    let mut binds: Vec<SqlValue> = vec![collection.to_owned().into()];
    binds.extend(fields.iter().map(|f| SqlValue::from(json_path(f))));
    let placeholders: Vec<String> =
      (2..=fields.len() + 1).map(|i| format!("?{i}")).collect();
    let carried: Vec<String> = placeholders
      .iter()
      .map(|p| format!("json_type(body, {p}) IS NOT NULL"))
      .collect();
    let sql = format!(
      "UPDATE documents SET body = json_remove(body, {})
       WHERE collection = ?1 AND ({})",
      placeholders.join(", "),
      carried.join(" OR ")
    );

    self
      .run(move |conn| Ok(conn.execute(&sql, params_from_iter(binds))? as u64))
      .await
  }

  async fn count_matching(
    &self,
    collection: &str,
    filter: &DocumentFilter,
  ) -> Result<u64> {
    check_name(collection)?;
    let mut binds: Vec<SqlValue> = vec![collection.to_owned().into()];

    let predicate = match filter {
      DocumentFilter::MissingAny(paths) => {
        if paths.is_empty() {
          return Ok(0);
        }
        let mut clauses = Vec::with_capacity(paths.len());
        for path in paths {
          check_path(path)?;
          binds.push(json_path(path).into());
          let p = binds.len();
          clauses.push(format!("COALESCE(json_type(body, ?{p}), 'null') = 'null'"));
        }
        clauses.join(" OR ")
      }
      DocumentFilter::Below { path, threshold }
      | DocumentFilter::Above { path, threshold } => {
        check_path(path)?;
        binds.push(json_path(path).into());
        binds.push((*threshold).into());
        let op = if matches!(filter, DocumentFilter::Below { .. }) { "<" } else { ">" };
        format!(
          "json_type(body, ?2) IN ('integer', 'real') AND json_extract(body, ?2) {op} ?3"
        )
      }
    };
    let sql = format!(
      "SELECT COUNT(*) FROM documents WHERE collection = ?1 AND ({predicate})"
    );

    self
      .run(move |conn| {
        let n: i64 = conn.query_row(&sql, params_from_iter(binds), |r| r.get(0))?;
        Ok(n as u64)
      })
      .await
  }

  async fn create_index(&self, collection: &str, spec: &IndexSpec) -> Result<()> {
    check_name(collection)?;
    check_name(spec.name)?;
    check_path(spec.path)?;
    let sql = format!(
      "CREATE INDEX IF NOT EXISTS \"{}\" ON documents (json_extract(body, '{}'))
       WHERE collection = '{}'",
      physical_index_name(collection, spec.name),
      json_path(spec.path),
      collection,
    );

    self
      .run(move |conn| {
        conn.execute_batch(&sql)?;
        Ok(())
      })
      .await
  }

  async fn drop_index(&self, collection: &str, name: &str) -> Result<()> {
    check_name(collection)?;
    check_name(name)?;
    let sql = format!("DROP INDEX \"{}\"", physical_index_name(collection, name));

    self
      .run(move |conn| {
        conn.execute_batch(&sql)?;
        Ok(())
      })
      .await
  }
}
