//! Code-defined step modules.

use crate::migration::{MigrationError, UpgradeRegistry};

/// A group of upgrade steps defined in Rust.
///
/// ```
/// use migraph_core::loader::{load_modules, StepModule};
/// use migraph_core::migration::{MigrationError, UpgradeRegistry};
///
/// struct Quick;
///
/// impl StepModule for Quick {
///     fn name(&self) -> &str {
///         "quick"
///     }
///
///     fn register(&self, registry: &mut UpgradeRegistry) -> Result<(), MigrationError> {
///         registry.register_fn("quick", None, "bgh_1", vec![], |db| {
///             db.execute("CREATE TABLE quick (id INTEGER)", &[])?;
///             Ok(())
///         })
///     }
/// }
///
/// let mut registry = UpgradeRegistry::new();
/// load_modules(&mut registry, &[&Quick]).unwrap();
/// assert_eq!(registry.len(), 1);
/// ```
pub trait StepModule {
    fn name(&self) -> &str;

    fn register(&self, registry: &mut UpgradeRegistry) -> Result<(), MigrationError>;
}

/// Register every module, in order. Stops at the first failure.
pub fn load_modules(
    registry: &mut UpgradeRegistry,
    modules: &[&dyn StepModule],
) -> Result<usize, MigrationError> {
    let before = registry.len();

    for module in modules {
        let start = registry.len();
        module.register(registry)?;
        tracing::debug!(
            module = module.name(),
            steps = registry.len() - start,
            "loaded step module"
        );
    }

    Ok(registry.len() - before)
}
