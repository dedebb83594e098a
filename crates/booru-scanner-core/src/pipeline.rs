use crate::cache::StalenessCache;
use crate::config::AppConfig;
use crate::ignore::IgnoreList;
use crate::provider::ProviderConnector;
use crate::records::{ContentRecords, CreatedRecord, IngestObserver};
use crate::storage::Database;
use std::sync::Arc;

/// Everything a scan needs besides the database connection. Cheap to clone;
/// built once at startup and handed to scanners and watch daemons.
#[derive(Clone)]
pub struct Pipeline {
    config: Arc<AppConfig>,
    records: Arc<dyn ContentRecords>,
    connector: Arc<dyn ProviderConnector>,
    observers: Vec<Arc<dyn IngestObserver>>,
}

impl Pipeline {
    pub fn new(
        config: AppConfig,
        records: Arc<dyn ContentRecords>,
        connector: Arc<dyn ProviderConnector>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            records,
            connector,
            observers: Vec::new(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn IngestObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn records(&self) -> &dyn ContentRecords {
        self.records.as_ref()
    }

    pub fn connector(&self) -> &dyn ProviderConnector {
        self.connector.as_ref()
    }

    pub fn cache<'a>(&'a self, db: &'a Database) -> StalenessCache<'a> {
        StalenessCache::new(db, self.records.as_ref(), self.config.staleness_threshold())
    }

    pub fn ignore_list<'a>(&self, db: &'a Database) -> IgnoreList<'a> {
        IgnoreList::new(db)
    }

    pub(crate) fn notify_created(&self, record: &CreatedRecord) {
        for observer in &self.observers {
            observer.on_record_created(record);
        }
    }
}
