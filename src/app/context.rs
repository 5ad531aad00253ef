use std::path::PathBuf;
use std::sync::Arc;

use crate::app::error::{GatorError, Result};
use crate::config::Config;
use crate::fetcher::http_fetcher::HttpFetcher;
use crate::fetcher::Fetcher;
use crate::normalizer::Normalizer;
use crate::store::sqlite::SqliteStore;

/// Everything a command needs: storage, network, parsing and the loaded
/// configuration. Passed explicitly instead of living in globals.
pub struct AppContext {
    pub store: Arc<SqliteStore>,
    pub fetcher: Arc<dyn Fetcher + Send + Sync>,
    pub normalizer: Normalizer,
    pub config: Config,
    /// Where `config` is saved back to. `None` keeps changes in memory.
    pub config_path: Option<PathBuf>,
}

impl AppContext {
    /// Opens the store at `db_path`, or the configured path, or the default one.
    pub fn new(
        config: Config,
        config_path: Option<PathBuf>,
        db_path: Option<PathBuf>,
    ) -> Result<Self> {
        let db_path = match db_path.or_else(|| config.database.path.clone()) {
            Some(p) => p,
            None => Self::default_db_path()?,
        };

        let store = Arc::new(SqliteStore::new(&db_path)?);
        let fetcher: Arc<dyn Fetcher + Send + Sync> = Arc::new(HttpFetcher::with_options(
            config.aggregator.request_timeout(),
            &config.aggregator.user_agent,
        )?);

        Ok(Self::with_parts(store, fetcher, config, config_path))
    }

    pub fn in_memory() -> Result<Self> {
        let store = Arc::new(SqliteStore::in_memory()?);
        let fetcher: Arc<dyn Fetcher + Send + Sync> = Arc::new(HttpFetcher::new()?);
        Ok(Self::with_parts(store, fetcher, Config::default(), None))
    }

    pub fn with_parts(
        store: Arc<SqliteStore>,
        fetcher: Arc<dyn Fetcher + Send + Sync>,
        config: Config,
        config_path: Option<PathBuf>,
    ) -> Self {
        Self {
            store,
            fetcher,
            normalizer: Normalizer::new(),
            config,
            config_path,
        }
    }

    pub fn current_user_name(&self) -> Option<&str> {
        self.config.current_user_name.as_deref()
    }

    /// Records `name` as the current user and persists the config.
    pub fn set_current_user(&mut self, name: &str) -> Result<()> {
        self.config.current_user_name = Some(name.to_string());
        if let Some(path) = &self.config_path {
            self.config.save_to(path)?;
        }
        Ok(())
    }

    fn default_db_path() -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| GatorError::Other("Could not find data directory".into()))?;
        let gator_dir = data_dir.join("gator");
        std::fs::create_dir_all(&gator_dir)?;
        Ok(gator_dir.join("gator.db"))
    }
}
