// ============================================================================
// Entity Proxies
// ============================================================================
//
// `EntityProxy` is the interceptor: every property read or write of a managed
// entity goes through it. Reads of lazy properties fetch the column on first
// access; writes are recorded in the per-instance `ProxyState` so that an
// update only sends what changed.
//
// Counters are the exception to both rules. They are never buffered and
// never dirty; `CounterHandle` talks to the store directly.
//
// ============================================================================

pub mod counter;
pub mod interceptor;
pub mod state;

pub use counter::CounterHandle;
pub use interceptor::EntityProxy;
pub use state::ProxyState;
