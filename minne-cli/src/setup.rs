//! Builds a [`MemoryContext`] from configuration.

use std::sync::Arc;

use minne_config::{AllocatorKind, MinneConfig};
use minne_core::alloc::system::SystemAllocator;
use minne_core::zone::{ZoneBudget, DEFAULT_ZONE};
use minne_core::MemoryContext;
use tracing::info;

/// Sizes the registry, installs the system allocator with the configured
/// minimum alignment, registers every configured zone and, for the zoned
/// allocator, wraps the system allocator in zone accounting.
///
/// The default zone is registered as unlimited when the table omits it, since
/// every thread starts out charged to it.
pub fn build_context(config: &MinneConfig) -> MemoryContext {
    let context = MemoryContext::new(config.memory.registry_capacity);
    context.set_underlying_allocator(Arc::new(SystemAllocator::with_min_align(
        config.memory.min_align,
    )));

    for zone in &config.zones {
        context.register_zone(&zone.name, zone.id, zone.budget());
    }
    if context.registry().get(DEFAULT_ZONE).is_none() {
        context.register_zone("default", DEFAULT_ZONE, ZoneBudget::UNLIMITED);
    }

    if config.memory.allocator == AllocatorKind::Zoned {
        context.install_zoned_allocator();
    }

    info!(
        zones = context.registry().len(),
        capacity = context.registry().capacity(),
        allocator = ?config.memory.allocator,
        min_align = config.memory.min_align,
        "Memory context ready"
    );
    context
}
