//! Class registry: persisted class names to node factories
//!
//! Loading a node reads its `CLASS` field, looks the name up here and lets
//! the factory rebuild the node body from the block's named fields.

use crate::array::GdsArray;
use crate::error::{GdsError, Result};
use crate::node::{Folder, LoadContext, NodeKind};
use crate::serial::StructReader;
use crate::types::ElementKind;
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

/// Class name of folder nodes
pub const FOLDER_CLASS: &str = "dFolder";

/// Class name of attribute-only nodes
pub const LABEL_CLASS: &str = "dLabel";

/// Rebuilds a node body from its serialized block
pub type ClassFactory =
    Box<dyn Fn(&LoadContext<'_>, &StructReader) -> Result<NodeKind> + Send + Sync>;

/// Map from class name to factory
#[derive(Default)]
pub struct ClassRegistry {
    factories: HashMap<String, ClassFactory>,
}

impl fmt::Debug for ClassRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassRegistry")
            .field("classes", &self.class_names())
            .finish()
    }
}

impl ClassRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the folder, label and every element-kind class
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        let builtin: Vec<(String, ClassFactory)> = std::iter::once((
            FOLDER_CLASS.to_string(),
            Box::new(|ctx: &LoadContext<'_>, block: &StructReader| {
                Folder::load(ctx, block).map(NodeKind::Folder)
            }) as ClassFactory,
        ))
        .chain(std::iter::once((
            LABEL_CLASS.to_string(),
            Box::new(|_: &LoadContext<'_>, _: &StructReader| Ok(NodeKind::Label)) as ClassFactory,
        )))
        .chain(ElementKind::all_class_names().into_iter().filter_map(|name| {
            let kind = ElementKind::from_class_name(&name)?;
            let factory: ClassFactory = Box::new(move |ctx, block| {
                GdsArray::load(kind, block, ctx.store, ctx.options).map(NodeKind::Array)
            });
            Some((name, factory))
        }))
        .collect();
        for (name, factory) in builtin {
            registry.factories.insert(name, factory);
        }
        registry
    }

    /// Add a factory; names are unique
    pub fn register(&mut self, name: &str, factory: ClassFactory) -> Result<()> {
        if self.factories.contains_key(name) {
            return Err(GdsError::ClassAlreadyRegistered(name.to_string()));
        }
        self.factories.insert(name.to_string(), factory);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Registered names, sorted
    pub fn class_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Rebuild the body of a node of class `name`
    pub fn construct(
        &self,
        name: &str,
        ctx: &LoadContext<'_>,
        block: &StructReader,
    ) -> Result<NodeKind> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| GdsError::ClassNotRegistered(name.to_string()))?;
        factory(ctx, block)
    }
}

/// Process-wide registry of the built-in classes, built on first use
pub fn global() -> &'static ClassRegistry {
    static REGISTRY: OnceLock<ClassRegistry> = OnceLock::new();
    REGISTRY.get_or_init(ClassRegistry::with_builtin)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_classes() {
        let registry = global();
        for name in ["dFolder", "dLabel", "dBit2", "dSBit7", "dFloat64", "dFStr16", "dInt24"] {
            assert!(registry.contains(name), "{} missing", name);
        }
        assert!(!registry.contains("dBit8"));
        assert_eq!(registry.len(), ElementKind::all_class_names().len() + 2);
    }

    #[test]
    fn test_duplicate_registration() {
        let mut registry = ClassRegistry::with_builtin();
        let err = registry
            .register("dFolder", Box::new(|_, _| Ok(NodeKind::Label)))
            .unwrap_err();
        assert!(matches!(err, GdsError::ClassAlreadyRegistered(name) if name == "dFolder"));
        registry
            .register("dCustomLabel", Box::new(|_, _| Ok(NodeKind::Label)))
            .unwrap();
        assert!(registry.contains("dCustomLabel"));
    }
}
