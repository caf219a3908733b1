use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use log::{debug, warn};
use std::sync::Arc;

use remindly_core::errors::{Error, Result};
use remindly_core::sync::{
    DeadLetter, NewPendingMutation, OutboxStore, PendingMutation, SyncEntity,
};

use super::model::{DeadLetterDB, NewPendingMutationDB, OutboxFailureDB, PendingMutationDB};
use crate::db::{get_connection, DbPool, WriteHandle};
use crate::errors::StorageError;
use crate::schema::{dead_letters, outbox_failures, pending_mutations};

/// SQLite-backed outbox. Reads go through the pool, writes through the
/// single writer.
pub struct SqliteOutboxStore {
    pool: Arc<DbPool>,
    writer: WriteHandle,
}

impl SqliteOutboxStore {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle) -> Self {
        Self { pool, writer }
    }

    pub fn failure_count(&self, mutation_id: i64) -> Result<u32> {
        let mut conn = get_connection(&self.pool)?;
        let count = outbox_failures::table
            .find(mutation_id)
            .select(outbox_failures::failure_count)
            .first::<i32>(&mut conn)
            .optional()
            .map_err(StorageError::from)?;
        Ok(count.and_then(|c| u32::try_from(c).ok()).unwrap_or(0))
    }
}

fn insert_pending(conn: &mut SqliteConnection, row: &NewPendingMutationDB) -> Result<i64> {
    let id = diesel::insert_into(pending_mutations::table)
        .values(row)
        .returning(pending_mutations::id)
        .get_result::<i64>(conn)
        .map_err(StorageError::from)?;
    Ok(id)
}

#[async_trait]
impl OutboxStore for SqliteOutboxStore {
    async fn append(&self, mutation: NewPendingMutation) -> Result<i64> {
        let row = NewPendingMutationDB {
            entity_type: mutation.entity.as_str().to_string(),
            operation: mutation.op.as_str().to_string(),
            entity_id: mutation.entity_id,
            payload: mutation.payload,
            created_at: Utc::now().timestamp_millis(),
        };
        let id = self
            .writer
            .exec(move |conn| insert_pending(conn, &row))
            .await?;
        debug!("[Outbox] Appended mutation {}", id);
        Ok(id)
    }

    fn list_pending(&self) -> Result<Vec<PendingMutation>> {
        let mut conn = get_connection(&self.pool)?;
        let rows = pending_mutations::table
            .order(pending_mutations::id.asc())
            .select(PendingMutationDB::as_select())
            .load::<PendingMutationDB>(&mut conn)
            .map_err(StorageError::from)?;
        Ok(rows.into_iter().map(PendingMutation::from).collect())
    }

    async fn remove(&self, id: i64) -> Result<()> {
        self.writer
            .exec(move |conn| {
                diesel::delete(outbox_failures::table.find(id))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                diesel::delete(pending_mutations::table.find(id))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }

    async fn clear(&self) -> Result<()> {
        let removed = self
            .writer
            .exec(|conn| {
                diesel::delete(outbox_failures::table)
                    .execute(conn)
                    .map_err(StorageError::from)?;
                let removed = diesel::delete(pending_mutations::table)
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(removed)
            })
            .await?;
        warn!("[Outbox] Cleared {} pending mutation(s)", removed);
        Ok(())
    }

    fn pending_count(&self) -> Result<usize> {
        let mut conn = get_connection(&self.pool)?;
        let count = pending_mutations::table
            .count()
            .get_result::<i64>(&mut conn)
            .map_err(StorageError::from)?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn has_pending_for(&self, entity: SyncEntity, entity_id: &str) -> Result<bool> {
        let mut conn = get_connection(&self.pool)?;
        let found = diesel::select(diesel::dsl::exists(
            pending_mutations::table
                .filter(pending_mutations::entity_type.eq(entity.as_str()))
                .filter(pending_mutations::entity_id.eq(entity_id)),
        ))
        .get_result::<bool>(&mut conn)
        .map_err(StorageError::from)?;
        Ok(found)
    }

    async fn record_failure(&self, id: i64, error: String) -> Result<u32> {
        self.writer
            .exec(move |conn| {
                let now = Utc::now().timestamp_millis();
                diesel::insert_into(outbox_failures::table)
                    .values(OutboxFailureDB {
                        mutation_id: id,
                        failure_count: 1,
                        last_error: error.clone(),
                        updated_at: now,
                    })
                    .on_conflict(outbox_failures::mutation_id)
                    .do_update()
                    .set((
                        outbox_failures::failure_count.eq(outbox_failures::failure_count + 1),
                        outbox_failures::last_error.eq(error),
                        outbox_failures::updated_at.eq(now),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;

                let count = outbox_failures::table
                    .find(id)
                    .select(outbox_failures::failure_count)
                    .first::<i32>(conn)
                    .map_err(StorageError::from)?;
                Ok(u32::try_from(count).unwrap_or(0))
            })
            .await
    }

    async fn reset_failures(&self, id: i64) -> Result<()> {
        self.writer
            .exec(move |conn| {
                diesel::delete(outbox_failures::table.find(id))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }

    async fn move_to_dead_letter(&self, id: i64, error: String) -> Result<()> {
        self.writer
            .exec(move |conn| {
                let Some(record) = pending_mutations::table
                    .find(id)
                    .select(PendingMutationDB::as_select())
                    .first::<PendingMutationDB>(conn)
                    .optional()
                    .map_err(StorageError::from)?
                else {
                    return Ok(());
                };
                let failure_count = outbox_failures::table
                    .find(id)
                    .select(outbox_failures::failure_count)
                    .first::<i32>(conn)
                    .optional()
                    .map_err(StorageError::from)?
                    .unwrap_or(0);

                diesel::insert_into(dead_letters::table)
                    .values(DeadLetterDB {
                        id: record.id,
                        entity_type: record.entity_type,
                        operation: record.operation,
                        entity_id: record.entity_id,
                        payload: record.payload,
                        created_at: record.created_at,
                        failure_count,
                        last_error: error,
                        dead_at: Utc::now().timestamp_millis(),
                    })
                    .execute(conn)
                    .map_err(StorageError::from)?;
                diesel::delete(outbox_failures::table.find(id))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                diesel::delete(pending_mutations::table.find(id))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await?;
        warn!("[Outbox] Mutation {} moved to dead letters", id);
        Ok(())
    }

    fn list_dead_letters(&self) -> Result<Vec<DeadLetter>> {
        let mut conn = get_connection(&self.pool)?;
        let rows = dead_letters::table
            .order(dead_letters::id.asc())
            .select(DeadLetterDB::as_select())
            .load::<DeadLetterDB>(&mut conn)
            .map_err(StorageError::from)?;
        Ok(rows.into_iter().map(DeadLetter::from).collect())
    }

    async fn requeue_dead_letter(&self, id: i64) -> Result<i64> {
        self.writer
            .exec(move |conn| {
                let letter = dead_letters::table
                    .find(id)
                    .select(DeadLetterDB::as_select())
                    .first::<DeadLetterDB>(conn)
                    .optional()
                    .map_err(StorageError::from)?
                    .ok_or_else(|| Error::state(format!("dead letter {} not found", id)))?;

                let new_id = insert_pending(
                    conn,
                    &NewPendingMutationDB {
                        entity_type: letter.entity_type,
                        operation: letter.operation,
                        entity_id: letter.entity_id,
                        payload: letter.payload,
                        created_at: Utc::now().timestamp_millis(),
                    },
                )?;
                diesel::delete(dead_letters::table.find(id))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(new_id)
            })
            .await
    }
}
