//! Test data builders for creating test objects

use s7_logger::config::LoggerConfig;
use s7_logger::export::ExportLayout;
use s7_logger::types::{DataType, VariableDescriptor};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Builder for creating test variable descriptors
pub struct VariableBuilder {
    block: u16,
    offset: u32,
    data_type: DataType,
}

impl VariableBuilder {
    pub fn new(block: u16) -> Self {
        Self {
            block,
            offset: 0,
            data_type: DataType::Int,
        }
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    pub fn data_type(mut self, data_type: DataType) -> Self {
        self.data_type = data_type;
        self
    }

    pub fn build(self) -> VariableDescriptor {
        VariableDescriptor::new(self.block, self.offset, self.data_type)
    }
}

/// Builder for a logger configuration whose journal lives in a temp directory
pub struct ConfigBuilder {
    config: LoggerConfig,
}

impl ConfigBuilder {
    pub fn in_dir(dir: &TempDir) -> Self {
        let mut config = LoggerConfig::default();
        config.journal.path = Some(dir.path().join("journal.jsonl"));
        Self { config }
    }

    pub fn journal(mut self, path: impl AsRef<Path>) -> Self {
        self.config.journal.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn replay_on_start(mut self, replay: bool) -> Self {
        self.config.journal.replay_on_start = replay;
        self
    }

    pub fn read_timeout_ms(mut self, ms: u64) -> Self {
        self.config.collection.read_timeout_ms = ms;
        self
    }

    pub fn unreachable_threshold(mut self, threshold: u32) -> Self {
        self.config.collection.unreachable_threshold = threshold;
        self
    }

    pub fn layout(mut self, layout: ExportLayout) -> Self {
        self.config.export.layout = layout;
        self
    }

    pub fn build(self) -> LoggerConfig {
        self.config
    }
}

/// Path of the journal configured by [`ConfigBuilder::in_dir`]
pub fn journal_path(dir: &TempDir) -> PathBuf {
    dir.path().join("journal.jsonl")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variable_builder() {
        let var = VariableBuilder::new(3)
            .offset(4)
            .data_type(DataType::Real)
            .build();

        assert_eq!(var.block, 3);
        assert_eq!(var.offset, 4);
        assert_eq!(var.data_type, DataType::Real);
    }

    #[test]
    fn test_config_builder() {
        let dir = TempDir::new().unwrap();
        let config = ConfigBuilder::in_dir(&dir).replay_on_start(false).build();

        assert_eq!(config.journal.resolved_path(), journal_path(&dir));
        assert!(!config.journal.replay_on_start);
    }
}
