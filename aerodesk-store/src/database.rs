use aerodesk_core::{ConnectionManager, PoolError, ResourcePool, StoreError};
use async_trait::async_trait;
use sqlx::{Connection, PgConnection};
use std::time::Duration;
use tracing::{info, warn};

use crate::app_config::DatabaseConfig;

/// Opens and health-checks raw Postgres connections for the pool
pub struct PgConnector {
    url: String,
    validation_timeout: Duration,
}

impl PgConnector {
    pub fn new(url: &str, validation_timeout: Duration) -> Self {
        Self {
            url: url.to_string(),
            validation_timeout,
        }
    }
}

#[async_trait]
impl ConnectionManager for PgConnector {
    type Connection = PgConnection;

    async fn connect(&self) -> Result<PgConnection, PoolError> {
        PgConnection::connect(&self.url)
            .await
            .map_err(|e| PoolError::Connect(e.to_string()))
    }

    async fn is_valid(&self, conn: &mut PgConnection) -> bool {
        matches!(
            tokio::time::timeout(self.validation_timeout, conn.ping()).await,
            Ok(Ok(()))
        )
    }

    async fn close(&self, conn: PgConnection) {
        if let Err(e) = conn.close().await {
            warn!("Failed to close database connection: {}", e);
        }
    }
}

#[derive(Clone)]
pub struct Database {
    pub pool: ResourcePool<PgConnector>,
}

impl Database {
    pub async fn new(config: &DatabaseConfig) -> Result<Self, PoolError> {
        let connector = PgConnector::new(&config.url, config.validation_timeout());
        let pool = ResourcePool::new(connector, config.pool_config()).await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        info!("Running database migrations...");
        let mut conn = self.pool.get().await?;
        sqlx::migrate!("../migrations")
            .run(&mut *conn)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        info!("Migrations completed successfully.");
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}
