//! Transactional [`AssetWriter`] over one `SQLite` transaction.

use crate::identity::{IdentityKey, KeyPart};
use crate::models::{AssetContent, AssetId, ExecutionId, RelationType};
use crate::services::{AssetWriter, Insertion, Lookup};
use crate::{Error, OperationContext, Result};
use chrono::Utc;
use lru::LruCache;
use rusqlite::types::Value;
use rusqlite::{OptionalExtension, Transaction, params, params_from_iter};
use std::sync::Mutex;

use super::connection::acquire_lock;

/// Shared identity cache: identity key to committed asset id.
pub type IdentityCache = Mutex<LruCache<IdentityKey, AssetId>>;

/// Writes through an open `BEGIN IMMEDIATE` transaction.
///
/// Identities resolved or created here are collected and only published to
/// the cache by the store after a successful commit.
pub struct SqliteWriter<'a> {
    tx: &'a Transaction<'a>,
    context: &'a OperationContext,
    source: &'a str,
    cache: Option<&'a IdentityCache>,
    resolved: Vec<(IdentityKey, AssetId)>,
}

impl<'a> SqliteWriter<'a> {
    /// Creates a writer over `tx` logging discoveries under `source`.
    pub const fn new(
        tx: &'a Transaction<'a>,
        context: &'a OperationContext,
        source: &'a str,
        cache: Option<&'a IdentityCache>,
    ) -> Self {
        Self {
            tx,
            context,
            source,
            cache,
            resolved: Vec::new(),
        }
    }

    /// Identities this writer saw, for publication after commit.
    pub fn into_resolved(self) -> Vec<(IdentityKey, AssetId)> {
        self.resolved
    }

    fn cached(&self, key: &IdentityKey) -> Option<AssetId> {
        self.cache
            .and_then(|cache| acquire_lock(cache, "identity_cache").get(key).copied())
    }

    fn evict(&self, key: &IdentityKey) {
        if let Some(cache) = self.cache {
            acquire_lock(cache, "identity_cache").pop(key);
        }
    }

    /// Whether `id` is still a committed row. Ids are never reused, so a
    /// present row still carries the identity it was cached under.
    fn asset_exists(&self, id: AssetId) -> Result<bool> {
        self.tx
            .prepare_cached("SELECT 1 FROM assets WHERE id = ?1")
            .and_then(|mut stmt| stmt.exists([id.get()]))
            .map_err(|e| Error::backend(format!("check_asset {id}"), e))
    }
}

/// `SELECT id` by identity key, with the type literal inlined so `SQLite`
/// can match the partial identity index of that type.
pub fn identity_query(key: &IdentityKey) -> (String, Vec<Value>) {
    let mut sql = format!(
        "SELECT id FROM assets WHERE type = '{}'",
        key.asset_type().as_str()
    );
    let mut values = Vec::with_capacity(key.parts().len());
    for (i, (field, part)) in key.parts().iter().enumerate() {
        sql.push_str(&format!(
            " AND json_extract(content, '$.{field}') = ?{}",
            i + 1
        ));
        values.push(match part {
            KeyPart::Text(s) => Value::Text(s.clone()),
            KeyPart::Int(n) => Value::Integer(*n),
        });
    }
    (sql, values)
}

impl AssetWriter for SqliteWriter<'_> {
    fn context(&self) -> &OperationContext {
        self.context
    }

    fn lookup(&mut self, key: &IdentityKey) -> Result<Lookup> {
        if let Some(id) = self.cached(key) {
            if self.asset_exists(id)? {
                return Ok(Lookup::Found(id));
            }
            // Deleted by another store on the same file.
            tracing::debug!(key = %key, asset_id = %id, "Evicting stale identity");
            self.evict(key);
        }

        let (sql, values) = identity_query(key);
        let found = self
            .tx
            .prepare_cached(&sql)
            .and_then(|mut stmt| {
                stmt.query_row(params_from_iter(values), |row| row.get::<_, i64>(0))
                    .optional()
            })
            .map_err(|e| Error::backend(format!("lookup_asset {key}"), e))?;

        Ok(match found {
            Some(id) => {
                let id = AssetId::new(id);
                self.resolved.push((key.clone(), id));
                Lookup::Found(id)
            },
            None => Lookup::Absent,
        })
    }

    fn insert_if_absent(&mut self, content: &AssetContent) -> Result<Insertion> {
        let inserted = self
            .tx
            .prepare_cached(
                "INSERT INTO assets (created_at, type, content) VALUES (?1, ?2, ?3)
                 ON CONFLICT DO NOTHING RETURNING id",
            )
            .and_then(|mut stmt| {
                stmt.query_row(
                    params![
                        Utc::now(),
                        content.asset_type().as_str(),
                        content.to_json().to_string()
                    ],
                    |row| row.get::<_, i64>(0),
                )
                .optional()
            })
            .map_err(|e| Error::backend(format!("insert_asset {content}"), e))?;

        let key = IdentityKey::of(content);
        if let Some(id) = inserted {
            let id = AssetId::new(id);
            self.resolved.push((key, id));
            return Ok(Insertion::Inserted(id));
        }

        match self.lookup(&key)? {
            Lookup::Found(id) => Ok(Insertion::Existing(id)),
            Lookup::Absent => Err(Error::backend(
                format!("insert_asset {content}"),
                "insert conflicted but no asset matches the identity",
            )),
        }
    }

    fn relate(&mut self, relation: RelationType, from: AssetId, to: AssetId) -> Result<()> {
        self.tx
            .prepare_cached(
                "INSERT INTO relations (created_at, type, from_asset_id, to_asset_id)
                 VALUES (?1, ?2, ?3, ?4) ON CONFLICT DO NOTHING",
            )
            .and_then(|mut stmt| {
                stmt.execute(params![Utc::now(), relation.as_str(), from.get(), to.get()])
            })
            .map_err(|e| Error::backend(format!("insert_relation {relation} {from}->{to}"), e))?;
        Ok(())
    }

    fn log_discovery(&mut self, execution: ExecutionId, asset: AssetId) -> Result<()> {
        self.tx
            .prepare_cached(
                "INSERT INTO execution_logs (execution_id, asset_id, source, created_at)
                 VALUES (?1, ?2, ?3, ?4) ON CONFLICT DO NOTHING",
            )
            .and_then(|mut stmt| {
                stmt.execute(params![execution.get(), asset.get(), self.source, Utc::now()])
            })
            .map_err(|e| Error::backend(format!("insert_execution_log {execution}"), e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::normalize;
    use crate::models::AssetType;

    #[test]
    fn test_identity_query_shape() {
        let content = normalize(AssetType::Ip, "192.0.2.7").unwrap();
        let (sql, values) = identity_query(&IdentityKey::of(&content));
        assert_eq!(
            sql,
            "SELECT id FROM assets WHERE type = 'ip' \
             AND json_extract(content, '$.address') = ?1 \
             AND json_extract(content, '$.version') = ?2"
        );
        assert_eq!(
            values,
            vec![
                Value::Text("192.0.2.7".to_string()),
                Value::Text("v4".to_string())
            ]
        );

        let content = normalize(AssetType::AutonomousSystem, "AS64500").unwrap();
        let (_, values) = identity_query(&IdentityKey::of(&content));
        assert_eq!(values, vec![Value::Integer(64500)]);
    }
}
