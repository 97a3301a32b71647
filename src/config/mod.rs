mod settings;

pub use settings::{BackendKind, DocumentConfig, FlatFileConfig, LoggingConfig, Settings, StorageConfig};
