//! Farm, agent, and miner queries for the fleet server.

use fleet_core::db::unix_timestamp;

use super::db::FleetDatabase;
use super::models::{Agent, Farm, Miner, MinerConfigUpdate};
use fleet_core::db::DatabaseError;

impl FleetDatabase {
    // =========================================================================
    // Farm queries
    // =========================================================================

    /// Create a new farm.
    pub async fn create_farm(&self, id: &str, name: &str) -> Result<Farm, DatabaseError> {
        let now = unix_timestamp();

        sqlx::query("INSERT INTO farms (id, name, created_at) VALUES (?, ?, ?)")
            .bind(id)
            .bind(name)
            .bind(now)
            .execute(self.pool())
            .await?;

        self.get_farm(id).await
    }

    /// Get a farm by ID.
    pub async fn get_farm(&self, id: &str) -> Result<Farm, DatabaseError> {
        sqlx::query_as::<_, Farm>("SELECT * FROM farms WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Farm {id}")))
    }

    /// List all farms ordered by name.
    pub async fn list_farms(&self) -> Result<Vec<Farm>, DatabaseError> {
        let farms = sqlx::query_as::<_, Farm>("SELECT * FROM farms ORDER BY name")
            .fetch_all(self.pool())
            .await?;

        Ok(farms)
    }

    /// Rename a farm.
    pub async fn rename_farm(&self, id: &str, name: &str) -> Result<Farm, DatabaseError> {
        let result = sqlx::query("UPDATE farms SET name = ? WHERE id = ?")
            .bind(name)
            .bind(id)
            .execute(self.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("Farm {id}")));
        }

        self.get_farm(id).await
    }

    /// Delete a farm. Foreign keys cascade the deletion to its agent,
    /// miners, pending commands, and enrollment tokens in one statement,
    /// so no partial state is ever observable.
    pub async fn delete_farm(&self, id: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM farms WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Agent queries
    // =========================================================================

    /// Create an agent bound to a farm.
    pub async fn create_agent(
        &self,
        id: &str,
        farm_id: &str,
        credential_hash: &str,
    ) -> Result<Agent, DatabaseError> {
        let now = unix_timestamp();

        sqlx::query(
            "INSERT INTO agents (id, farm_id, credential_hash, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(id)
        .bind(farm_id)
        .bind(credential_hash)
        .bind(now)
        .execute(self.pool())
        .await?;

        self.get_agent(id).await
    }

    /// Get an agent by ID.
    pub async fn get_agent(&self, id: &str) -> Result<Agent, DatabaseError> {
        sqlx::query_as::<_, Agent>("SELECT * FROM agents WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Agent {id}")))
    }

    /// Look up an agent by its credential hash.
    pub async fn get_agent_by_credential_hash(
        &self,
        credential_hash: &str,
    ) -> Result<Option<Agent>, DatabaseError> {
        let agent = sqlx::query_as::<_, Agent>("SELECT * FROM agents WHERE credential_hash = ?")
            .bind(credential_hash)
            .fetch_optional(self.pool())
            .await?;

        Ok(agent)
    }

    /// Get the agent for a farm, if one is enrolled.
    pub async fn agent_for_farm(&self, farm_id: &str) -> Result<Option<Agent>, DatabaseError> {
        let agent = sqlx::query_as::<_, Agent>("SELECT * FROM agents WHERE farm_id = ?")
            .bind(farm_id)
            .fetch_optional(self.pool())
            .await?;

        Ok(agent)
    }

    /// List all agents.
    pub async fn list_agents(&self) -> Result<Vec<Agent>, DatabaseError> {
        let agents = sqlx::query_as::<_, Agent>("SELECT * FROM agents ORDER BY created_at")
            .fetch_all(self.pool())
            .await?;

        Ok(agents)
    }

    /// Record a contact from an agent. `last_seen` only moves forward in
    /// time. Returns false when the agent no longer exists (deleted while
    /// its session was still open).
    pub async fn record_agent_contact(
        &self,
        id: &str,
        timestamp: i64,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE agents SET last_seen = CASE WHEN last_seen IS NULL OR last_seen < ?1 THEN ?1 ELSE last_seen END WHERE id = ?2",
        )
        .bind(timestamp)
        .bind(id)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Miner queries
    // =========================================================================

    /// Upsert a miner by MAC within an agent. Re-discovering a known MAC
    /// updates ip/model in place instead of duplicating the row.
    pub async fn upsert_miner(
        &self,
        agent_id: &str,
        mac: &str,
        ip: Option<&str>,
        model: Option<&str>,
    ) -> Result<Miner, DatabaseError> {
        if let Some(existing) = self.get_miner_by_mac(agent_id, mac).await? {
            sqlx::query(
                "UPDATE miners SET ip = COALESCE(?, ip), model = COALESCE(?, model) WHERE id = ?",
            )
            .bind(ip)
            .bind(model)
            .bind(&existing.id)
            .execute(self.pool())
            .await?;

            return self.get_miner(&existing.id).await;
        }

        let id = uuid::Uuid::new_v4().to_string();
        let now = unix_timestamp();

        sqlx::query(
            "INSERT INTO miners (id, agent_id, mac, ip, model, discovered_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(agent_id)
        .bind(mac)
        .bind(ip)
        .bind(model)
        .bind(now)
        .execute(self.pool())
        .await?;

        self.get_miner(&id).await
    }

    /// Get a miner by ID.
    pub async fn get_miner(&self, id: &str) -> Result<Miner, DatabaseError> {
        sqlx::query_as::<_, Miner>("SELECT * FROM miners WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Miner {id}")))
    }

    /// Get a miner by MAC within an agent.
    pub async fn get_miner_by_mac(
        &self,
        agent_id: &str,
        mac: &str,
    ) -> Result<Option<Miner>, DatabaseError> {
        let miner = sqlx::query_as::<_, Miner>(
            "SELECT * FROM miners WHERE agent_id = ? AND mac = ?",
        )
        .bind(agent_id)
        .bind(mac)
        .fetch_optional(self.pool())
        .await?;

        Ok(miner)
    }

    /// List miners, optionally filtered by agent.
    pub async fn list_miners(&self, agent_id: Option<&str>) -> Result<Vec<Miner>, DatabaseError> {
        let miners = if let Some(agent_id) = agent_id {
            sqlx::query_as::<_, Miner>("SELECT * FROM miners WHERE agent_id = ? ORDER BY mac")
                .bind(agent_id)
                .fetch_all(self.pool())
                .await?
        } else {
            sqlx::query_as::<_, Miner>("SELECT * FROM miners ORDER BY mac")
                .fetch_all(self.pool())
                .await?
        };

        Ok(miners)
    }

    /// Count miners under an agent.
    pub async fn count_miners(&self, agent_id: &str) -> Result<i64, DatabaseError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM miners WHERE agent_id = ?")
            .bind(agent_id)
            .fetch_one(self.pool())
            .await?;

        Ok(row.0)
    }

    /// Apply a partial pool-configuration update. A present-but-empty field
    /// clears the stored value.
    pub async fn update_miner_config(
        &self,
        id: &str,
        update: &MinerConfigUpdate,
    ) -> Result<Miner, DatabaseError> {
        // Make sure the miner exists before building the update.
        let miner = self.get_miner(id).await?;

        let normalize = |v: &Option<String>, current: &Option<String>| match v {
            Some(s) if s.is_empty() => None,
            Some(s) => Some(s.clone()),
            None => current.clone(),
        };

        let worker1 = normalize(&update.worker1, &miner.worker1);
        let worker2 = normalize(&update.worker2, &miner.worker2);
        let worker3 = normalize(&update.worker3, &miner.worker3);
        let password = normalize(&update.password, &miner.password);

        sqlx::query(
            "UPDATE miners SET worker1 = ?, worker2 = ?, worker3 = ?, password = ? WHERE id = ?",
        )
        .bind(worker1)
        .bind(worker2)
        .bind(worker3)
        .bind(password)
        .bind(id)
        .execute(self.pool())
        .await?;

        self.get_miner(id).await
    }
}
