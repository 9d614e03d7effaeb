use anyhow::Result;
use once_cell::sync::OnceCell;
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};

pub static POOL: OnceCell<PgPool> = OnceCell::new();

pub async fn init_pool(url: &str) -> Result<()> {
    let pool = PgPool::connect(url).await?;
    POOL.set(pool).unwrap();

    Ok(())
}

pub async fn conn() -> Result<PoolConnection<Postgres>> {
    Ok(POOL.get().expect("pool is initialized").acquire().await?)
}
