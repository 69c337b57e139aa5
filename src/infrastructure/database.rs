//! Pooled SQLite connection

use crate::config::ClientConfig;
use di::{Ref, inject, injectable};
use log::{info, warn};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::ops::Deref;
use std::str::FromStr;

pub struct DatabaseConnection {
    connection: SqlitePool,
}

#[injectable]
impl DatabaseConnection {
    #[inject]
    pub fn create(config: Ref<ClientConfig>) -> DatabaseConnection {
        DatabaseConnection {
            connection: Self::lazy_pool(&config.database_url),
        }
    }
}

impl DatabaseConnection {
    pub fn from_pool(connection: SqlitePool) -> DatabaseConnection {
        DatabaseConnection { connection }
    }

    /// Builds a pool that connects on first use. File databases are created when missing.
    ///
    /// An in-memory database lives only as long as its connection, so it gets a single
    /// connection that is never recycled.
    pub fn lazy_pool(connection_string: &str) -> SqlitePool {
        let parsed = SqliteConnectOptions::from_str(connection_string);
        let in_memory = parsed.is_err()
            || connection_string.contains(":memory:")
            || connection_string.contains("mode=memory");

        let options = match parsed {
            Ok(options) => options.create_if_missing(true),
            Err(e) => {
                warn!("invalid DATABASE_URL {connection_string:?} ({e}), falling back to memory");
                SqliteConnectOptions::new().in_memory(true)
            }
        };

        if in_memory {
            warn!("using in-memory chat storage, chats will not survive a restart");
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_lazy_with(options)
        } else {
            info!("using chat storage at {connection_string}");
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_lazy_with(options)
        }
    }
}

impl Deref for DatabaseConnection {
    type Target = SqlitePool;

    fn deref(&self) -> &Self::Target {
        &self.connection
    }
}
