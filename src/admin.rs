//! Admin mutations
//!
//! Secret-gated demo controls that reshape the live dataset: closing or
//! losing a batch of open deals, injecting fresh opportunities, hiring and
//! firing agents, and resetting the table from the source CSV. Each action
//! reports how many rows it touched so the caller can show a receipt.

use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::ingest;
use crate::store::{Stage, Store, TABLE};
use rand::seq::SliceRandom;
use rand::Rng;
use rusqlite::params;
use tracing::info;

/// Value stamped onto a deal force-closed as won.
pub const FORCED_CLOSE_VALUE: i64 = 50_000;
/// Value carried by an injected demo opportunity.
pub const INJECTED_DEAL_VALUE: i64 = 75_000;
/// Product line for injected opportunities.
pub const INJECTED_PRODUCT: &str = "GTXPro";
/// Account label for injected opportunities.
pub const INJECTED_ACCOUNT: &str = "New Demo Account";
/// Open deals seeded for a newly hired agent.
pub const STARTER_DEALS: usize = 3;

const ID_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const ID_LEN: usize = 8;

pub struct Admin<'a> {
    store: &'a Store,
    config: &'a Config,
}

impl<'a> Admin<'a> {
    pub fn new(store: &'a Store, config: &'a Config) -> Self {
        Self { store, config }
    }

    /// Every mutation goes through this gate first.
    fn authorize(&self, secret: &str) -> Result<()> {
        match self.config.admin_secret.as_deref() {
            Some(expected) if secret == expected => Ok(()),
            Some(_) => Err(EngineError::Admin("invalid admin secret".to_string())),
            None => Err(EngineError::Admin(
                "no admin secret configured, set ADMIN_SECRET".to_string(),
            )),
        }
    }

    /// Force-close up to `n` open deals as won at the standard demo value,
    /// stamped with today's date. Returns how many actually closed.
    pub fn close_deals(&self, secret: &str, n: usize) -> Result<usize> {
        self.authorize(secret)?;
        self.transition_open(n, Stage::Won, Some(FORCED_CLOSE_VALUE))
    }

    /// Mark up to `n` open deals as lost. Whatever value the row carried
    /// stays on it, only the stage and close date change.
    pub fn mark_lost(&self, secret: &str, n: usize) -> Result<usize> {
        self.authorize(secret)?;
        self.transition_open(n, Stage::Lost, None)
    }

    fn transition_open(&self, n: usize, to: Stage, close_value: Option<i64>) -> Result<usize> {
        let ids = self.open_deal_ids(n);
        let today = self.store.dialect().current_date();
        let mut moved = 0usize;
        for id in &ids {
            // One statement per row keeps each transition independent, so
            // a failure partway leaves the earlier rows committed.
            moved += match close_value {
                Some(value) => self.store.execute(
                    &format!(
                        "UPDATE {TABLE}
                         SET deal_stage = ?1, close_value = ?2, close_date = {today}
                         WHERE opportunity_id = ?3"
                    ),
                    params![to.as_str(), value, id],
                )?,
                None => self.store.execute(
                    &format!(
                        "UPDATE {TABLE}
                         SET deal_stage = ?1, close_date = {today}
                         WHERE opportunity_id = ?2"
                    ),
                    params![to.as_str(), id],
                )?,
            };
        }
        info!("🔧 moved {} open deals to {}", moved, to.as_str());
        Ok(moved)
    }

    fn open_deal_ids(&self, n: usize) -> Vec<String> {
        let sql = format!(
            "SELECT opportunity_id FROM {TABLE}
             WHERE deal_stage = '{}'
             ORDER BY engage_date ASC
             LIMIT {n}",
            Stage::Engaging.as_str()
        );
        self.store
            .query(&sql)
            .unwrap_or_default()
            .iter()
            .map(|row| row[0].as_str().to_string())
            .collect()
    }

    /// Inject `n` fresh open opportunities on the demo product, each
    /// assigned to a randomly picked existing agent.
    pub fn add_opportunities(&self, secret: &str, n: usize) -> Result<usize> {
        self.authorize(secret)?;
        let agents = self.agent_roster();
        if agents.is_empty() {
            return Err(EngineError::Admin(
                "no agents on the roster to assign new deals to".to_string(),
            ));
        }
        let mut rng = rand::thread_rng();
        let mut added = 0usize;
        for _ in 0..n {
            let agent = agents
                .choose(&mut rng)
                .cloned()
                .unwrap_or_default();
            added += self.insert_open_deal(&agent, INJECTED_DEAL_VALUE, &mut rng)?;
        }
        info!("🔧 injected {} opportunities for {}", added, INJECTED_PRODUCT);
        Ok(added)
    }

    /// Put a new agent on the roster by seeding a handful of starter open
    /// deals in their name. The roster is derived from deal rows, so an
    /// agent exists exactly when at least one row carries their name.
    pub fn hire_agent(&self, secret: &str, name: &str) -> Result<usize> {
        self.authorize(secret)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(EngineError::Admin("agent name cannot be blank".to_string()));
        }
        let mut rng = rand::thread_rng();
        let mut seeded = 0usize;
        for _ in 0..STARTER_DEALS {
            seeded += self.insert_open_deal(name, 0, &mut rng)?;
        }
        info!("🔧 hired {} with {} starter deals", name, seeded);
        Ok(seeded)
    }

    /// Remove an agent and every deal attributed to them.
    pub fn fire_agent(&self, secret: &str, name: &str) -> Result<usize> {
        self.authorize(secret)?;
        let removed = self.store.execute(
            &format!("DELETE FROM {TABLE} WHERE sales_agent = ?1"),
            params![name.trim()],
        )?;
        info!("🔧 fired {}, removed {} deals", name.trim(), removed);
        Ok(removed)
    }

    /// Throw away all mutations and reload the table from the source CSV.
    pub fn reset(&self, secret: &str) -> Result<usize> {
        self.authorize(secret)?;
        ingest::reset_from_source(self.store, &self.config.source_csv)
    }

    fn insert_open_deal<R: Rng>(&self, agent: &str, value: i64, rng: &mut R) -> Result<usize> {
        let id = random_opportunity_id(rng);
        let today = self.store.dialect().current_date();
        self.store.execute(
            &format!(
                "INSERT INTO {TABLE}
                 (opportunity_id, sales_agent, product, account, deal_stage, engage_date, close_date, close_value)
                 VALUES (?1, ?2, ?3, ?4, ?5, {today}, NULL, ?6)"
            ),
            params![
                id,
                agent,
                INJECTED_PRODUCT,
                INJECTED_ACCOUNT,
                Stage::Engaging.as_str(),
                value,
            ],
        )
    }

    fn agent_roster(&self) -> Vec<String> {
        let sql = format!("SELECT DISTINCT sales_agent FROM {TABLE} WHERE sales_agent IS NOT NULL");
        self.store
            .query(&sql)
            .unwrap_or_default()
            .iter()
            .map(|row| row[0].as_str().to_string())
            .collect()
    }
}

fn random_opportunity_id<R: Rng>(rng: &mut R) -> String {
    (0..ID_LEN)
        .map(|_| ID_CHARSET[rng.gen_range(0..ID_CHARSET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::thread_rng;

    #[test]
    fn generated_ids_are_eight_uppercase_alphanumerics() {
        let mut rng = thread_rng();
        for _ in 0..100 {
            let id = random_opportunity_id(&mut rng);
            assert_eq!(id.len(), 8);
            assert!(id.bytes().all(|b| ID_CHARSET.contains(&b)));
        }
    }
}
