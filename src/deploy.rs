use crate::auth::{accounts, permissions};
use crate::db;
use crate::social;
use crate::state::DbPool;

/// Bring a database up to date: schema, roles and the deleted-user
/// placeholder. `backfill` also repairs missing self-follows.
pub fn prepare(pool: &DbPool, backfill: bool) -> anyhow::Result<()> {
    db::run_migrations(pool)?;
    db::transaction(pool, |tx| {
        permissions::insert_roles(tx)?;
        accounts::create_deleted_user(tx)?;
        if backfill {
            social::add_self_follows(tx)?;
        }
        Ok(())
    })?;
    tracing::info!(backfill, "Database prepared");
    Ok(())
}
