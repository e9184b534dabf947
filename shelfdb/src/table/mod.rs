use crate::error::{Result, ShelfError};
use crate::query::{CompiledFilter, JsonPath, Literal, SortSpec};
use crate::watch::EventKind;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

/// Which rows a read or delete touches, in storage order unless sorted.
#[derive(Debug, Clone, Default)]
pub(crate) struct Selection {
    pub filter: Option<CompiledFilter>,
    pub sort: Option<SortSpec>,
    pub limit: Option<usize>,
    pub offset: usize,
}

/// A mutating operation against one collection, executed by the writer.
#[derive(Debug, Clone)]
pub(crate) enum WriteOp {
    CreateCollection { id_field: String },
    Put { key: String, json: String, if_absent: bool },
    Save { key: String, json: String },
    SaveMany { docs: Vec<(String, String)> },
    Delete(Selection),
    UpdateField { filter: Option<CompiledFilter>, path: JsonPath, json: String },
    RemoveField { path: JsonPath },
    RenameField { new_path: JsonPath, old_path: JsonPath },
}

/// What a write did. `documents` holds stored JSON text: post-images for
/// inserts and updates, pre-images for deletes.
#[derive(Debug, Clone, Default)]
pub(crate) struct WriteOutcome {
    /// `None` when nothing changed (and no one is notified).
    pub event: Option<EventKind>,
    pub documents: Vec<String>,
    pub affected: usize,
}

impl WriteOp {
    pub fn kind(&self) -> &'static str {
        match self {
            WriteOp::CreateCollection { .. } => "create",
            WriteOp::Put { .. } => "put",
            WriteOp::Save { .. } => "save",
            WriteOp::SaveMany { .. } => "save_many",
            WriteOp::Delete(_) => "delete",
            WriteOp::UpdateField { .. } => "update_field",
            WriteOp::RemoveField { .. } => "remove_field",
            WriteOp::RenameField { .. } => "rename_field",
        }
    }
}

impl WriteOutcome {
    fn changed(event: EventKind, documents: Vec<String>) -> Self {
        let affected = documents.len();
        WriteOutcome {
            event: if affected > 0 { Some(event) } else { None },
            documents,
            affected,
        }
    }
}

impl Selection {
    pub fn filtered(filter: Option<CompiledFilter>) -> Self {
        Selection {
            filter,
            ..Default::default()
        }
    }

    fn is_bounded(&self) -> bool {
        self.sort.is_some() || self.limit.is_some() || self.offset > 0
    }

    /// `WHERE … ORDER BY … LIMIT … OFFSET …`, appending bound parameters.
    fn tail(&self, params: &mut Vec<Literal>) -> String {
        let mut sql = String::new();
        if let Some(filter) = &self.filter {
            sql.push_str(" WHERE ");
            sql.push_str(&filter.clause);
            params.extend(filter.params.iter().cloned());
        }
        if let Some(sort) = &self.sort {
            let (clause, param) = sort.to_sql();
            sql.push(' ');
            sql.push_str(&clause);
            params.push(param);
        }
        match (self.limit, self.offset) {
            (Some(limit), offset) => sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}")),
            (None, offset) if offset > 0 => sql.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
            _ => {}
        }
        sql
    }
}

/// Quote a table name for SQL text.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

// ── Collections ──────────────────────────────────────────────────

/// Create the backing table and identity index if they do not exist.
pub(crate) fn create_collection(conn: &Connection, name: &str, id_field: &str) -> Result<()> {
    let table = quote_ident(name);
    let index = quote_ident(&format!("{name}#identity"));
    conn.execute_batch(&format!(
        "
        CREATE TABLE IF NOT EXISTS {table} (
            key TEXT PRIMARY KEY NOT NULL,
            value JSON NOT NULL
        );
        CREATE INDEX IF NOT EXISTS {index} ON {table}(json_extract(value, '$.{id_field}'));
        "
    ))?;
    Ok(())
}

/// Names of user tables that hold at least one document.
pub(crate) fn collection_names(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

    let mut names = Vec::new();
    for row in rows {
        let name = row?;
        let populated: bool = conn.query_row(
            &format!("SELECT EXISTS(SELECT 1 FROM {})", quote_ident(&name)),
            [],
            |row| row.get(0),
        )?;
        if populated {
            names.push(name);
        }
    }
    Ok(names)
}

// ── Reads ────────────────────────────────────────────────────────

/// Point lookup by key.
pub(crate) fn get(conn: &Connection, name: &str, key: &str) -> Result<Option<String>> {
    let result = conn
        .query_row(
            &format!("SELECT value FROM {} WHERE key = ?1", quote_ident(name)),
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(result)
}

pub(crate) fn select_values(conn: &Connection, name: &str, selection: &Selection) -> Result<Vec<String>> {
    let mut params = Vec::new();
    let tail = selection.tail(&mut params);
    let sql = format!("SELECT value FROM {}{tail}", quote_ident(name));
    query_values(conn, &sql, &params)
}

pub(crate) fn count(conn: &Connection, name: &str, filter: Option<&CompiledFilter>) -> Result<usize> {
    let selection = Selection::filtered(filter.cloned());
    let mut params = Vec::new();
    let tail = selection.tail(&mut params);
    let sql = format!("SELECT count(*) FROM {}{tail}", quote_ident(name));
    let n: i64 = conn.query_row(&sql, params_from_iter(params.iter()), |row| row.get(0))?;
    Ok(n as usize)
}

fn query_values(conn: &Connection, sql: &str, params: &[Literal]) -> Result<Vec<String>> {
    log::debug!("{sql}");
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params_from_iter(params.iter()), |row| row.get::<_, String>(0))?;

    let mut values = Vec::new();
    for row in rows {
        values.push(row?);
    }
    Ok(values)
}

// ── Writes ───────────────────────────────────────────────────────

/// Execute one write operation. Multi-row operations run in a transaction.
pub(crate) fn apply(conn: &mut Connection, name: &str, op: &WriteOp) -> Result<WriteOutcome> {
    match op {
        WriteOp::CreateCollection { id_field } => {
            create_collection(conn, name, id_field)?;
            Ok(WriteOutcome::default())
        }
        WriteOp::Put { key, json, if_absent } => put(conn, name, key, json, *if_absent),
        WriteOp::Save { key, json } => save(conn, name, key, json),
        WriteOp::SaveMany { docs } => save_many(conn, name, docs),
        WriteOp::Delete(selection) => delete(conn, name, selection),
        WriteOp::UpdateField { filter, path, json } => update_field(conn, name, filter.as_ref(), path, json),
        WriteOp::RemoveField { path } => remove_field(conn, name, path),
        WriteOp::RenameField { new_path, old_path } => rename_field(conn, name, new_path, old_path),
    }
}

fn upsert(conn: &Connection, name: &str, key: &str, json: &str) -> Result<String> {
    let stored = conn.query_row(
        &format!(
            "INSERT INTO {} (key, value) VALUES (?1, json(?2)) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value RETURNING value",
            quote_ident(name)
        ),
        params![key, json],
        |row| row.get(0),
    )?;
    Ok(stored)
}

fn put(conn: &Connection, name: &str, key: &str, json: &str, if_absent: bool) -> Result<WriteOutcome> {
    if if_absent {
        let stored: Option<String> = conn
            .query_row(
                &format!(
                    "INSERT INTO {} (key, value) VALUES (?1, json(?2)) \
                     ON CONFLICT(key) DO NOTHING RETURNING value",
                    quote_ident(name)
                ),
                params![key, json],
                |row| row.get(0),
            )
            .optional()?;
        return Ok(match stored {
            Some(stored) => WriteOutcome::changed(EventKind::Insert, vec![stored]),
            None => WriteOutcome::default(),
        });
    }

    let existed = get(conn, name, key)?.is_some();
    let stored = upsert(conn, name, key, json)?;
    let event = if existed { EventKind::Update } else { EventKind::Insert };
    Ok(WriteOutcome::changed(event, vec![stored]))
}

/// Upsert unless the stored document is already equal.
fn save(conn: &Connection, name: &str, key: &str, json: &str) -> Result<WriteOutcome> {
    let existing = get(conn, name, key)?;
    if let Some(stored) = existing.as_deref() {
        if same_json(stored, json)? {
            return Ok(WriteOutcome {
                event: None,
                documents: vec![stored.to_string()],
                affected: 0,
            });
        }
    }

    let stored = upsert(conn, name, key, json)?;
    let event = if existing.is_some() { EventKind::Update } else { EventKind::Insert };
    Ok(WriteOutcome::changed(event, vec![stored]))
}

fn same_json(a: &str, b: &str) -> Result<bool> {
    let a: serde_json::Value = serde_json::from_str(a)?;
    let b: serde_json::Value = serde_json::from_str(b)?;
    Ok(a == b)
}

fn save_many(conn: &mut Connection, name: &str, docs: &[(String, String)]) -> Result<WriteOutcome> {
    let tx = conn.transaction()?;
    let mut stored = Vec::with_capacity(docs.len());
    for (key, json) in docs {
        stored.push(upsert(&tx, name, key, json)?);
    }
    tx.commit()?;
    Ok(WriteOutcome::changed(EventKind::Insert, stored))
}

fn delete(conn: &Connection, name: &str, selection: &Selection) -> Result<WriteOutcome> {
    let table = quote_ident(name);
    let mut params = Vec::new();
    let sql = if selection.is_bounded() {
        let tail = selection.tail(&mut params);
        format!("DELETE FROM {table} WHERE key IN (SELECT key FROM {table}{tail}) RETURNING value")
    } else {
        let tail = selection.tail(&mut params);
        format!("DELETE FROM {table}{tail} RETURNING value")
    };
    let removed = query_values(conn, &sql, &params)?;
    Ok(WriteOutcome::changed(EventKind::Delete, removed))
}

/// Replace the value at `path` in matching documents that have that path
/// and hold a different value there.
fn update_field(
    conn: &Connection,
    name: &str,
    filter: Option<&CompiledFilter>,
    path: &JsonPath,
    json: &str,
) -> Result<WriteOutcome> {
    let mut sql = format!(
        "UPDATE {} SET value = json_replace(value, ?1, json(?2)) \
         WHERE json_type(value, ?1) IS NOT NULL AND (value -> ?1) IS NOT json(?2)",
        quote_ident(name)
    );
    let mut params = vec![Literal::Text(path.to_sql_path()), Literal::Text(json.to_string())];
    // plain `?` placeholders in the filter continue numbering from ?3
    if let Some(filter) = filter {
        sql.push_str(&format!(" AND ({})", filter.clause));
        params.extend(filter.params.iter().cloned());
    }
    sql.push_str(" RETURNING value");

    let updated = query_values(conn, &sql, &params)?;
    Ok(WriteOutcome::changed(EventKind::Update, updated))
}

fn remove_field(conn: &Connection, name: &str, path: &JsonPath) -> Result<WriteOutcome> {
    let sql = format!(
        "UPDATE {} SET value = json_remove(value, ?1) WHERE json_type(value, ?1) IS NOT NULL RETURNING value",
        quote_ident(name)
    );
    let updated = query_values(conn, &sql, &[Literal::Text(path.to_sql_path())])?;
    Ok(WriteOutcome::changed(EventKind::Update, updated))
}

/// Move `old_path` to `new_path` in every document that has it. Fails when
/// any document in the collection already uses `new_path`.
fn rename_field(
    conn: &mut Connection,
    name: &str,
    new_path: &JsonPath,
    old_path: &JsonPath,
) -> Result<WriteOutcome> {
    let table = quote_ident(name);
    let tx = conn.transaction()?;

    let taken: bool = tx.query_row(
        &format!("SELECT EXISTS(SELECT 1 FROM {table} WHERE json_type(value, ?1) IS NOT NULL)"),
        params![new_path.to_sql_path()],
        |row| row.get(0),
    )?;
    if taken {
        log::warn!("Field '{new_path}' is already in use in collection '{name}'");
        return Err(ShelfError::FieldConflict {
            collection: name.to_string(),
            field: new_path.to_string(),
        });
    }

    let sql = format!(
        "UPDATE {table} SET value = json_remove(json_insert(value, ?1, json(value -> ?2)), ?2) \
         WHERE json_type(value, ?2) IS NOT NULL RETURNING value"
    );
    let updated = query_values(
        &tx,
        &sql,
        &[Literal::Text(new_path.to_sql_path()), Literal::Text(old_path.to_sql_path())],
    )?;
    tx.commit()?;
    Ok(WriteOutcome::changed(EventKind::Update, updated))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::compile::compile;
    use crate::query::parser::parse_filter;
    use serde_json::{json, Value};

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        create_collection(&conn, "cats", "id").unwrap();
        conn
    }

    fn doc(conn: &Connection, key: &str) -> Value {
        serde_json::from_str(&get(conn, "cats", key).unwrap().unwrap()).unwrap()
    }

    fn filter(text: &str) -> Option<CompiledFilter> {
        Some(compile(&parse_filter(text).unwrap()).unwrap())
    }

    fn seed(conn: &mut Connection, n: usize) {
        let docs: Vec<(String, String)> = (0..n)
            .map(|i| {
                let key = format!("cat-{i}");
                let json = json!({ "id": key, "name": format!("Cat-{i}"), "age": i }).to_string();
                (key, json)
            })
            .collect();
        apply(conn, "cats", &WriteOp::SaveMany { docs }).unwrap();
    }

    #[test]
    fn test_create_collection_is_idempotent() {
        let conn = setup();
        create_collection(&conn, "cats", "id").unwrap();
        let indexes: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type = 'index' AND name = 'cats#identity'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(indexes, 1);
    }

    #[test]
    fn test_index_names_never_shadow_collections() {
        let mut conn = setup();
        create_collection(&conn, "cats_identity", "id").unwrap();
        let put = WriteOp::Put { key: "a".into(), json: "{\"id\":\"a\"}".into(), if_absent: false };
        apply(&mut conn, "cats_identity", &put).unwrap();
        assert_eq!(count(&conn, "cats_identity", None).unwrap(), 1);
        assert_eq!(count(&conn, "cats", None).unwrap(), 0);
    }

    #[test]
    fn test_save_skips_unchanged() {
        let mut conn = setup();
        let json = r#"{"id":"a","name":"Tyson"}"#.to_string();

        let first = apply(&mut conn, "cats", &WriteOp::Save { key: "a".into(), json: json.clone() }).unwrap();
        assert_eq!(first.event, Some(EventKind::Insert));

        let second = apply(&mut conn, "cats", &WriteOp::Save { key: "a".into(), json }).unwrap();
        assert_eq!(second.event, None);
        assert_eq!(second.affected, 0);

        let third = apply(
            &mut conn,
            "cats",
            &WriteOp::Save { key: "a".into(), json: r#"{"id":"a","name":"Loke"}"#.into() },
        )
        .unwrap();
        assert_eq!(third.event, Some(EventKind::Update));
        assert_eq!(doc(&conn, "a")["name"], json!("Loke"));
    }

    #[test]
    fn test_put_if_absent() {
        let mut conn = setup();
        let op = |json: &str| WriteOp::Put { key: "k".into(), json: json.into(), if_absent: true };

        let stored = apply(&mut conn, "cats", &op("\"value\"")).unwrap();
        assert_eq!(stored.documents, vec!["\"value\"".to_string()]);
        let conflict = apply(&mut conn, "cats", &op("\"other\"")).unwrap();
        assert_eq!(conflict.event, None);
        assert_eq!(get(&conn, "cats", "k").unwrap().as_deref(), Some("\"value\""));
    }

    #[test]
    fn test_select_sort_limit_offset() {
        let mut conn = setup();
        seed(&mut conn, 10);

        let selection = Selection {
            filter: filter("age>=5"),
            sort: Some(SortSpec::desc("age").unwrap()),
            limit: Some(2),
            offset: 1,
        };
        let values = select_values(&conn, "cats", &selection).unwrap();
        let ages: Vec<i64> = values
            .iter()
            .map(|v| serde_json::from_str::<Value>(v).unwrap()["age"].as_i64().unwrap())
            .collect();
        assert_eq!(ages, vec![8, 7]);

        let offset_only = Selection { offset: 8, ..Default::default() };
        assert_eq!(select_values(&conn, "cats", &offset_only).unwrap().len(), 2);

        assert_eq!(count(&conn, "cats", None).unwrap(), 10);
        assert_eq!(count(&conn, "cats", filter("age<3").as_ref()).unwrap(), 3);
    }

    #[test]
    fn test_delete_returns_pre_images() {
        let mut conn = setup();
        seed(&mut conn, 5);

        let out = apply(&mut conn, "cats", &WriteOp::Delete(Selection::filtered(filter("age>=3")))).unwrap();
        assert_eq!(out.event, Some(EventKind::Delete));
        assert_eq!(out.affected, 2);
        assert!(out.documents.iter().all(|d| d.contains("\"age\":3") || d.contains("\"age\":4")));

        let one = Selection { filter: filter("age<3"), limit: Some(1), ..Default::default() };
        let out = apply(&mut conn, "cats", &WriteOp::Delete(one)).unwrap();
        assert_eq!(out.affected, 1);
        assert_eq!(count(&conn, "cats", None).unwrap(), 2);

        let none = apply(&mut conn, "cats", &WriteOp::Delete(Selection::filtered(filter("age>100")))).unwrap();
        assert_eq!(none.event, None);
    }

    #[test]
    fn test_update_field_skips_equal_values() {
        let mut conn = setup();
        seed(&mut conn, 3);

        let op = WriteOp::UpdateField {
            filter: Some(CompiledFilter::by_key("cat-1")),
            path: JsonPath::parse("name").unwrap(),
            json: "\"Tyson\"".into(),
        };
        let out = apply(&mut conn, "cats", &op).unwrap();
        assert_eq!(out.affected, 1);
        assert_eq!(doc(&conn, "cat-1")["name"], json!("Tyson"));

        let again = apply(&mut conn, "cats", &op).unwrap();
        assert_eq!(again.affected, 0);
        assert_eq!(again.event, None);

        // json_replace leaves missing paths alone
        let missing = WriteOp::UpdateField {
            filter: None,
            path: JsonPath::parse("color").unwrap(),
            json: "\"gray\"".into(),
        };
        assert_eq!(apply(&mut conn, "cats", &missing).unwrap().affected, 0);

        let nested = WriteOp::UpdateField {
            filter: filter("age>=1"),
            path: JsonPath::parse("age").unwrap(),
            json: "{\"years\":1}".into(),
        };
        assert_eq!(apply(&mut conn, "cats", &nested).unwrap().affected, 2);
        assert_eq!(doc(&conn, "cat-2")["age"], json!({ "years": 1 }));
        assert_eq!(doc(&conn, "cat-0")["age"], json!(0));
    }

    #[test]
    fn test_remove_and_rename_field() {
        let mut conn = setup();
        seed(&mut conn, 3);

        let renamed = apply(
            &mut conn,
            "cats",
            &WriteOp::RenameField {
                new_path: JsonPath::parse("title").unwrap(),
                old_path: JsonPath::parse("name").unwrap(),
            },
        )
        .unwrap();
        assert_eq!(renamed.affected, 3);
        let cat = doc(&conn, "cat-2");
        assert_eq!(cat["title"], json!("Cat-2"));
        assert!(cat.get("name").is_none());

        let conflict = apply(
            &mut conn,
            "cats",
            &WriteOp::RenameField {
                new_path: JsonPath::parse("age").unwrap(),
                old_path: JsonPath::parse("title").unwrap(),
            },
        );
        assert!(matches!(conflict, Err(ShelfError::FieldConflict { .. })));
        assert_eq!(doc(&conn, "cat-2")["title"], json!("Cat-2"));

        let removed = apply(&mut conn, "cats", &WriteOp::RemoveField { path: JsonPath::parse("title").unwrap() }).unwrap();
        assert_eq!(removed.affected, 3);
        assert!(doc(&conn, "cat-0").get("title").is_none());
    }

    #[test]
    fn test_save_many_rolls_back_on_failure() {
        let mut conn = setup();
        let docs = vec![
            ("a".to_string(), r#"{"id":"a"}"#.to_string()),
            ("b".to_string(), "not json".to_string()),
        ];
        assert!(apply(&mut conn, "cats", &WriteOp::SaveMany { docs }).is_err());
        assert_eq!(count(&conn, "cats", None).unwrap(), 0);
    }

    #[test]
    fn test_collection_names_only_populated() {
        let mut conn = setup();
        create_collection(&conn, "empty", "_id").unwrap();
        seed(&mut conn, 1);
        assert_eq!(collection_names(&conn).unwrap(), vec!["cats".to_string()]);
    }
}
