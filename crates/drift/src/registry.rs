//! Capability registry.
//!
//! Optional functionality (container adapters, the change-record codec, an
//! alternative drafting strategy) is looked up by name at the point of use
//! instead of being linked into the core control flow. Capabilities are
//! registered once near process start; steady-state access is read-only.

use crate::{DriftError, DriftResult};
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

/// Capability name for the keyed-map / unique-set container adapters.
pub const MAP_SET: &str = "map-set";

/// Capability name for the change-record codec.
pub const PATCHES: &str = "patches";

/// Capability name reserved for an alternative drafting strategy. This crate
/// never installs one; the name exists so external collaborators can.
pub const FALLBACK_DRAFTING: &str = "fallback-drafting";

type Table = HashMap<String, Arc<dyn Any + Send + Sync>>;

fn table() -> &'static Mutex<Table> {
    static REGISTRY: OnceLock<Mutex<Table>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Register a capability under a name. Re-registering replaces the previous
/// implementation.
pub fn register(name: impl Into<String>, implementation: Arc<dyn Any + Send + Sync>) {
    let name = name.into();
    tracing::debug!(capability = %name, "capability registered");
    table()
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .insert(name, implementation);
}

/// Look up a capability by name, downcasting to its concrete type.
///
/// Fails with [`DriftError::CapabilityMissing`] when the name was never
/// registered or the registered implementation has a different type.
pub fn lookup<T: Send + Sync + 'static>(name: &str) -> DriftResult<Arc<T>> {
    let entry = table()
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .get(name)
        .cloned()
        .ok_or_else(|| DriftError::capability_missing(name))?;
    entry
        .downcast::<T>()
        .map_err(|_| DriftError::capability_missing(name))
}

/// True when a capability is registered under the name.
pub fn is_registered(name: &str) -> bool {
    table()
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .contains_key(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Probe(u32);

    #[test]
    fn test_register_and_lookup() {
        register("test-probe", Arc::new(Probe(7)));
        let probe = lookup::<Probe>("test-probe").unwrap();
        assert_eq!(probe.0, 7);
        assert!(is_registered("test-probe"));
    }

    #[test]
    fn test_lookup_missing_is_configuration_error() {
        let err = lookup::<Probe>("never-registered").unwrap_err();
        assert!(matches!(err, DriftError::CapabilityMissing { .. }));
    }

    #[test]
    fn test_lookup_wrong_type_is_configuration_error() {
        register("test-probe-typed", Arc::new(Probe(1)));
        let err = lookup::<String>("test-probe-typed").unwrap_err();
        assert!(matches!(err, DriftError::CapabilityMissing { .. }));
    }
}
