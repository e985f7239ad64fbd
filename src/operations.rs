use anyhow::Result;
use std::collections::HashMap;

use crate::tool_call::{Arguments, OperationResult, ToolDefinition};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreationKind {
    /// Free-form note whose body is echoed in the arguments.
    SimpleNote,
    /// A new template file.
    Template,
    /// Note rendered from a template or fixed structure.
    Structured,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    Replace,
    Section,
    Generic,
}

/// Verification category of an operation, fixed when it is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    FileCreation(CreationKind),
    ContentAppend,
    ContentUpdate(UpdateKind),
    Metadata,
    TaskOp,
    Research,
    NonWrite,
}

impl OperationKind {
    pub fn is_write(&self) -> bool {
        !matches!(self, OperationKind::NonWrite)
    }

    pub fn label(&self) -> &'static str {
        match self {
            OperationKind::FileCreation(_) => "file_creation",
            OperationKind::ContentAppend => "content_append",
            OperationKind::ContentUpdate(_) => "content_update",
            OperationKind::Metadata => "metadata",
            OperationKind::TaskOp => "task",
            OperationKind::Research => "research",
            OperationKind::NonWrite => "non_write",
        }
    }
}

/// Name → category table consulted by the pipeline.
#[derive(Debug, Clone, Default)]
pub struct OperationCatalog {
    kinds: HashMap<String, OperationKind>,
}

impl OperationCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog of the vault write operations the verifier knows about.
    pub fn builtin() -> Self {
        use CreationKind::*;
        use OperationKind::*;
        use UpdateKind::*;

        let mut catalog = Self::new();
        catalog
            .register("create_simple_note", FileCreation(SimpleNote))
            .register("create_job_note", FileCreation(Structured))
            .register("create_from_template", FileCreation(Structured))
            .register("create_custom_template", FileCreation(Template))
            .register("append_to_daily_note", ContentAppend)
            .register("replace_note_content", ContentUpdate(Replace))
            .register("update_note_section", ContentUpdate(Section))
            .register("update_note", ContentUpdate(Generic))
            .register("apply_tags_to_note", Metadata)
            .register("create_scheduled_task", TaskOp)
            .register("research_and_save", Research);
        catalog
    }

    pub fn register(&mut self, name: &str, kind: OperationKind) -> &mut Self {
        self.kinds.insert(name.to_string(), kind);
        self
    }

    /// Unregistered names are treated as reads.
    pub fn kind_of(&self, name: &str) -> OperationKind {
        self.kinds.get(name).copied().unwrap_or(OperationKind::NonWrite)
    }

    pub fn write_operations(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .kinds
            .iter()
            .filter(|(_, kind)| kind.is_write())
            .map(|(name, _)| name.as_str())
            .collect();
        names.sort_unstable();
        names
    }
}

/// The opaque capability that actually performs operations.
///
/// An `Err` means the implementation raised; the pipeline reports it as an
/// execution error and never retries it. A result with `success: false` is
/// an ordinary, reported failure.
#[async_trait::async_trait]
pub trait OperationRegistry: Send + Sync {
    async fn execute(&self, name: &str, args: &Arguments) -> Result<OperationResult>;

    /// Tool definitions to offer the model.
    fn definitions(&self) -> Vec<ToolDefinition> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog_classifies_writes() {
        let catalog = OperationCatalog::builtin();
        assert_eq!(
            catalog.kind_of("create_simple_note"),
            OperationKind::FileCreation(CreationKind::SimpleNote)
        );
        assert_eq!(
            catalog.kind_of("update_note_section"),
            OperationKind::ContentUpdate(UpdateKind::Section)
        );
        assert_eq!(catalog.kind_of("create_scheduled_task"), OperationKind::TaskOp);
        assert_eq!(catalog.write_operations().len(), 11);
    }

    #[test]
    fn test_unknown_names_are_reads() {
        let catalog = OperationCatalog::builtin();
        assert_eq!(catalog.kind_of("read_note"), OperationKind::NonWrite);
        assert_eq!(catalog.kind_of(""), OperationKind::NonWrite);
        assert!(!catalog.kind_of("search_vault").is_write());
    }

    #[test]
    fn test_register_overrides() {
        let mut catalog = OperationCatalog::new();
        catalog.register("read_note", OperationKind::Metadata);
        assert_eq!(catalog.kind_of("read_note"), OperationKind::Metadata);
    }
}
