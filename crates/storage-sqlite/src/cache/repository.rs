use async_trait::async_trait;
use diesel::prelude::*;
use log::debug;
use std::sync::Arc;

use remindly_core::cache::{CachedEntityRow, EntityCacheStore};
use remindly_core::errors::Result;
use remindly_core::sync::SyncEntity;

use super::model::CachedEntityDB;
use crate::db::{get_connection, DbPool, WriteHandle};
use crate::errors::StorageError;
use crate::schema::cached_entities;

pub struct SqliteEntityCacheStore {
    pool: Arc<DbPool>,
    writer: WriteHandle,
}

impl SqliteEntityCacheStore {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle) -> Self {
        Self { pool, writer }
    }
}

#[async_trait]
impl EntityCacheStore for SqliteEntityCacheStore {
    fn load_all(&self) -> Result<Vec<CachedEntityRow>> {
        let mut conn = get_connection(&self.pool)?;
        let rows = cached_entities::table
            .order((cached_entities::entity_type.asc(), cached_entities::entity_id.asc()))
            .select(CachedEntityDB::as_select())
            .load::<CachedEntityDB>(&mut conn)
            .map_err(StorageError::from)?;
        Ok(rows.into_iter().map(CachedEntityRow::from).collect())
    }

    async fn save(&self, row: CachedEntityRow) -> Result<()> {
        let row = CachedEntityDB::from(row);
        self.writer
            .exec(move |conn| {
                diesel::insert_into(cached_entities::table)
                    .values(&row)
                    .on_conflict((cached_entities::entity_type, cached_entities::entity_id))
                    .do_update()
                    .set((
                        cached_entities::payload.eq(&row.payload),
                        cached_entities::updated_at.eq(row.updated_at),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }

    async fn delete(&self, entity: SyncEntity, entity_id: &str) -> Result<()> {
        let entity_id = entity_id.to_string();
        self.writer
            .exec(move |conn| {
                diesel::delete(
                    cached_entities::table
                        .filter(cached_entities::entity_type.eq(entity.as_str()))
                        .filter(cached_entities::entity_id.eq(entity_id)),
                )
                .execute(conn)
                .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }

    async fn replace_entity_rows(
        &self,
        entity: SyncEntity,
        rows: Vec<CachedEntityRow>,
    ) -> Result<()> {
        let rows: Vec<CachedEntityDB> = rows.into_iter().map(CachedEntityDB::from).collect();
        let count = rows.len();
        self.writer
            .exec(move |conn| {
                diesel::delete(
                    cached_entities::table.filter(cached_entities::entity_type.eq(entity.as_str())),
                )
                .execute(conn)
                .map_err(StorageError::from)?;
                for row in &rows {
                    diesel::insert_into(cached_entities::table)
                        .values(row)
                        .execute(conn)
                        .map_err(StorageError::from)?;
                }
                Ok(())
            })
            .await?;
        debug!("[CacheStore] Replaced {} row(s) of {}", count, entity);
        Ok(())
    }
}
