// Repository layer: each domain lives in its own file with `impl MarketRepository`.

use sqlx::sqlite::SqlitePool;

mod conversations;
mod messages;
mod products;
mod sessions;
mod users;

#[cfg(test)]
pub(crate) mod test_helpers;

#[derive(Clone)]
pub struct MarketRepository {
    pub(crate) pool: SqlitePool,
}

impl MarketRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}
