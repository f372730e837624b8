//! Adapter wiring: backend instances or descriptors.
//!
//! Callers either hand the facade ready-made [`Cache`]/[`Leases`] instances
//! or name a built-in backend with a descriptor. Descriptor-built adapters
//! are interned by descriptor identity so repeated construction with the
//! same descriptor reuses the same backend instances (construct-once,
//! reuse-many). Interning is keyed by the descriptor `Arc`'s address, not by
//! value, to avoid semantic surprises between look-alike configs.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::OnceLock;

use corral_core::Cache;
use corral_core::Leases;
use corral_core::MemoryCache;
use corral_core::MemoryLeases;
use corral_time::Clock;

/// Storage backends for a [`SingleFlight`](crate::SingleFlight) instance.
pub enum AdapterSpec {
    /// Ready-made backend instances.
    Instances {
        /// The cache backend.
        cache: Arc<dyn Cache>,
        /// The lease backend, when the caller wires one here rather than
        /// through [`Options::leases`](crate::Options::leases).
        leases: Option<Arc<dyn Leases>>,
    },
    /// A built-in backend named by descriptor.
    Descriptor(Arc<AdapterDescriptor>),
}

impl AdapterSpec {
    /// Wiring for ready-made instances providing both backends.
    pub fn instances(cache: Arc<dyn Cache>, leases: Arc<dyn Leases>) -> Self {
        AdapterSpec::Instances {
            cache,
            leases: Some(leases),
        }
    }

    /// Wiring for a fresh in-memory descriptor.
    pub fn memory() -> Self {
        AdapterSpec::Descriptor(Arc::new(AdapterDescriptor {
            kind: AdapterKind::Memory,
        }))
    }
}

/// Names a built-in backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterDescriptor {
    /// Which backend to construct.
    pub kind: AdapterKind,
}

/// Built-in backend kinds.
///
/// External stores (redis, postgres, object storage, ...) live out of tree:
/// they implement the [`Cache`]/[`Leases`] traits and are passed as
/// instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterKind {
    /// Process-local deterministic backends.
    Memory,
}

/// Backends resolved from an [`AdapterSpec`].
#[derive(Clone)]
pub(crate) struct ResolvedAdapter {
    pub cache: Arc<dyn Cache>,
    pub leases: Option<Arc<dyn Leases>>,
}

/// Interned descriptor-built adapters.
///
/// The stored descriptor `Arc` pins its address for the lifetime of the
/// entry, so address reuse cannot alias two live descriptors.
struct InternedAdapter {
    _descriptor: Arc<AdapterDescriptor>,
    resolved: ResolvedAdapter,
}

fn interned() -> &'static Mutex<HashMap<usize, InternedAdapter>> {
    static INTERNED: OnceLock<Mutex<HashMap<usize, InternedAdapter>>> = OnceLock::new();
    INTERNED.get_or_init(|| Mutex::new(HashMap::new()))
}

fn build(descriptor: &AdapterDescriptor, clock: &Arc<dyn Clock>) -> ResolvedAdapter {
    match descriptor.kind {
        AdapterKind::Memory => ResolvedAdapter {
            cache: MemoryCache::new(clock.clone()),
            leases: Some(MemoryLeases::new(clock.clone())),
        },
    }
}

/// Resolve an adapter spec into concrete backends.
///
/// Descriptors go through the interning table; instances pass straight
/// through.
pub(crate) fn resolve_adapter(spec: &AdapterSpec, clock: &Arc<dyn Clock>) -> ResolvedAdapter {
    match spec {
        AdapterSpec::Instances { cache, leases } => ResolvedAdapter {
            cache: cache.clone(),
            leases: leases.clone(),
        },
        AdapterSpec::Descriptor(descriptor) => {
            let identity = Arc::as_ptr(descriptor) as usize;
            let mut table = interned().lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            table
                .entry(identity)
                .or_insert_with(|| InternedAdapter {
                    _descriptor: descriptor.clone(),
                    resolved: build(descriptor, clock),
                })
                .resolved
                .clone()
        }
    }
}
