use std::path::Path;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use crate::error::{Error, Result};

const SETTINGS: TableDefinition<&str, &str> = TableDefinition::new("settings");

pub const MODEL_NAME_KEY: &str = "model_name";
pub const THRESHOLD_KEY: &str = "threshold";
pub const CHUNK_SIZE_KEY: &str = "chunk_size";
pub const STRATEGY_KEY: &str = "answer_strategy";

/// Keys accepted by `faqbert config set`.
pub const KNOWN_KEYS: &[&str] =
    &[MODEL_NAME_KEY, THRESHOLD_KEY, CHUNK_SIZE_KEY, STRATEGY_KEY];

/// Persistent user settings stored in `config.redb`.
pub struct ConfigDb {
    db: Database,
}

impl ConfigDb {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        // Ensure the table exists by opening it in a write transaction.
        let txn = db.begin_write()?;
        txn.open_table(SETTINGS)?;
        txn.commit()?;

        Ok(Self { db })
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SETTINGS)?;
            table.insert(key, value)?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SETTINGS)?;
        Ok(table.get(key)?.map(|v| v.value().to_string()))
    }

    /// Get a setting and parse it, returning the default if not set.
    pub fn get_parsed_or<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: std::str::FromStr,
    {
        match self.get_setting(key)? {
            Some(raw) => raw.parse().map_err(|_| {
                Error::Config(format!(
                    "stored setting '{key}' has an invalid value: {raw}"
                ))
            }),
            None => Ok(default),
        }
    }

    pub fn remove_setting(&self, key: &str) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut table = txn.open_table(SETTINGS)?;
            table.remove(key)?.is_some()
        };
        txn.commit()?;
        Ok(removed)
    }

    pub fn list_settings(&self) -> Result<Vec<(String, String)>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SETTINGS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            result.push((k.value().to_string(), v.value().to_string()));
        }
        Ok(result)
    }
}

impl std::fmt::Debug for ConfigDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigDb").finish_non_exhaustive()
    }
}
