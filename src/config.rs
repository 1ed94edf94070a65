use crate::engine::DEFAULT_MAX_FANOUT;
use std::time::Duration;

pub const DEFAULT_LIST_LIMIT: usize = 10;
pub const MAX_LIST_LIMIT: usize = 100;

// Range bcrypt accepts for its work factor.
const MIN_BCRYPT_COST: u32 = 4;
const MAX_BCRYPT_COST: u32 = 31;

/// Store configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Row tasks allowed in flight per aggregate update
    pub max_fanout: usize,

    /// Deadline applied to every aggregate update
    pub update_timeout: Option<Duration>,

    /// Page size used when a list call does not ask for one
    pub list_limit: usize,

    /// bcrypt work factor for stored passwords
    pub bcrypt_cost: u32,
}

impl StoreConfig {
    pub fn new() -> Self {
        Self {
            max_fanout: DEFAULT_MAX_FANOUT,
            update_timeout: None,
            list_limit: DEFAULT_LIST_LIMIT,
            bcrypt_cost: bcrypt::DEFAULT_COST,
        }
    }

    pub fn max_fanout(mut self, max: usize) -> Self {
        self.max_fanout = max;
        self
    }

    pub fn update_timeout(mut self, timeout: Duration) -> Self {
        self.update_timeout = Some(timeout);
        self
    }

    pub fn list_limit(mut self, limit: usize) -> Self {
        self.list_limit = limit;
        self
    }

    pub fn bcrypt_cost(mut self, cost: u32) -> Self {
        self.bcrypt_cost = cost;
        self
    }

    /// Reads overrides from `DOCFIELD_*` environment variables.
    ///
    /// Unset variables keep their defaults; malformed ones are an error.
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        fn parse<T: std::str::FromStr>(key: &str, raw: String) -> Result<T, String> {
            raw.trim()
                .parse()
                .map_err(|_| format!("{} has an invalid value '{}'", key, raw))
        }

        let mut config = Self::new();
        if let Some(raw) = lookup("DOCFIELD_MAX_FANOUT") {
            config.max_fanout = parse("DOCFIELD_MAX_FANOUT", raw)?;
        }
        if let Some(raw) = lookup("DOCFIELD_UPDATE_TIMEOUT_MS") {
            let millis: u64 = parse("DOCFIELD_UPDATE_TIMEOUT_MS", raw)?;
            config.update_timeout = Some(Duration::from_millis(millis));
        }
        if let Some(raw) = lookup("DOCFIELD_LIST_LIMIT") {
            config.list_limit = parse("DOCFIELD_LIST_LIMIT", raw)?;
        }
        if let Some(raw) = lookup("DOCFIELD_BCRYPT_COST") {
            config.bcrypt_cost = parse("DOCFIELD_BCRYPT_COST", raw)?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_fanout == 0 {
            return Err("max_fanout must be > 0".to_string());
        }

        if self.update_timeout.is_some_and(|t| t.is_zero()) {
            return Err("update_timeout must be > 0".to_string());
        }

        if self.list_limit == 0 || self.list_limit > MAX_LIST_LIMIT {
            return Err(format!("list_limit must be within 1..={}", MAX_LIST_LIMIT));
        }

        if !(MIN_BCRYPT_COST..=MAX_BCRYPT_COST).contains(&self.bcrypt_cost) {
            return Err(format!(
                "bcrypt_cost must be within {}..={}",
                MIN_BCRYPT_COST,
                MAX_BCRYPT_COST
            ));
        }

        Ok(())
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::new()
    }
}
