use redis::aio::ConnectionManager;
use redis::{Client, RedisResult};

#[derive(Clone)]
pub struct RedisClient {
    manager: ConnectionManager,
}

impl RedisClient {
    pub fn new(manager: ConnectionManager) -> Self {
        Self { manager }
    }

    pub async fn from_url(url: &str) -> RedisResult<Self> {
        let client = Client::open(url)?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self { manager })
    }

    /// Handle onto the shared multiplexed connection.
    pub fn connection(&self) -> ConnectionManager {
        self.manager.clone()
    }
}
