//! Content-hashed processing parameter sets.

use crate::MscopeError;
use crate::cli::AddParamsetArgs;
use crate::csv_ingest::integrity_or_db;
use crate::db::open_db;
use log::info;
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::{Map, Value};
use std::path::Path;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct ParamSet {
    pub paramset_id: i64,
    pub processing_method: String,
    pub paramset_desc: String,
    pub param_set_hash: String,
    pub params: Value,
}

/// Same bag, same JSON text: object keys sorted at every level.
fn canonical(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::with_capacity(map.len());
            for k in keys {
                sorted.insert(k.clone(), canonical(&map[k]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        other => other.clone(),
    }
}

/// MD5 of the canonical JSON text, rendered as a UUID.
pub fn params_hash(params: &Value) -> String {
    let text = canonical(params).to_string();
    let digest = md5::compute(text.as_bytes());
    Uuid::from_bytes(digest.0).to_string()
}

/// Register a parameter bag. Returns `false` when the identical set is
/// already registered under the same id.
pub fn insert_new_params(
    conn: &Connection,
    processing_method: &str,
    paramset_id: i64,
    paramset_desc: &str,
    params: &Value,
) -> Result<bool, MscopeError> {
    let hash = params_hash(params);

    let by_hash: Option<i64> = conn
        .query_row(
            "SELECT paramset_id FROM processing_paramset WHERE param_set_hash = ?1",
            params![hash],
            |r| r.get(0),
        )
        .optional()?;
    match by_hash {
        Some(existing) if existing == paramset_id => return Ok(false),
        Some(existing) => {
            return Err(MscopeError::Integrity(format!(
                "the specified param-set already exists - paramset_id: {existing}"
            )));
        }
        None => {}
    }

    let id_taken: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM processing_paramset WHERE paramset_id = ?1)",
        params![paramset_id],
        |r| r.get(0),
    )?;
    if id_taken {
        return Err(MscopeError::Integrity(format!(
            "the specified paramset_id {paramset_id} already exists with different parameters, please pick a different one"
        )));
    }

    conn.execute(
        "INSERT INTO processing_paramset
         (paramset_id, processing_method, paramset_desc, param_set_hash, params)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![paramset_id, processing_method, paramset_desc, hash, params.to_string()],
    )
    .map_err(|e| integrity_or_db("processing_paramset", e))?;
    info!("paramset {paramset_id} ({processing_method}) registered: {hash}");
    Ok(true)
}

pub fn get_paramset(conn: &Connection, paramset_id: i64) -> Result<ParamSet, MscopeError> {
    let row = conn
        .query_row(
            "SELECT paramset_id, processing_method, paramset_desc, param_set_hash, params
             FROM processing_paramset WHERE paramset_id = ?1",
            params![paramset_id],
            |r| {
                Ok((
                    r.get::<_, i64>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, String>(4)?,
                ))
            },
        )
        .optional()?
        .ok_or_else(|| MscopeError::NotFound(format!("paramset_id {paramset_id}")))?;
    Ok(ParamSet {
        paramset_id: row.0,
        processing_method: row.1,
        paramset_desc: row.2,
        param_set_hash: row.3,
        params: serde_json::from_str(&row.4)?,
    })
}

pub fn paramset_exists(conn: &Connection, paramset_id: i64) -> Result<bool, MscopeError> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM processing_paramset WHERE paramset_id = ?1)",
        params![paramset_id],
        |r| r.get(0),
    )?)
}

pub fn handle_add_paramset(db_path: &Path, args: &AddParamsetArgs) -> Result<(), MscopeError> {
    let content = std::fs::read_to_string(&args.params)?;
    let params: Value = serde_json::from_str(&content)?;
    if !params.is_object() {
        return Err(MscopeError::Parse(format!(
            "{}: parameters must be a JSON object",
            args.params.display()
        )));
    }

    let conn = open_db(db_path)?;
    if insert_new_params(&conn, &args.method, args.id, &args.desc, &params)? {
        eprintln!("mscope: paramset {} added ({})", args.id, params_hash(&params));
    } else {
        eprintln!("mscope: paramset {} already registered", args.id);
    }
    Ok(())
}
