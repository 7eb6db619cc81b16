//! Type-safe identifiers for client entities.
//!
//! Newtype wrappers prevent mixing incompatible IDs at compile time.
//! All identifiers are allocated from process-wide monotonic counters, so two
//! IDs of the same type are never equal unless they name the same entity.
//!
//! | Type | Identifies |
//! |------|------------|
//! | [`ListenerId`] | One event callback in a listener registry |
//! | [`ObserverId`] | One status-change observer |
//! | [`TransportId`] | One transport instance opened by a client |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

// ============================================================================
// Macro
// ============================================================================

macro_rules! counter_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            /// Allocates the next identifier.
            #[must_use]
            pub fn next() -> Self {
                static COUNTER: AtomicU64 = AtomicU64::new(1);
                Self(COUNTER.fetch_add(1, Ordering::Relaxed))
            }

            /// Returns the raw value.
            #[inline]
            #[must_use]
            pub const fn as_u64(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "-{}"), self.0)
            }
        }
    };
}

// ============================================================================
// Identifiers
// ============================================================================

counter_id!(
    /// Identifies one callback registered for an event name.
    ListenerId,
    "listener"
);

counter_id!(
    /// Identifies one status-change observer.
    ObserverId,
    "observer"
);

counter_id!(
    /// Identifies one transport instance.
    ///
    /// Signals tagged with a retired transport ID are ignored by the client.
    TransportId,
    "transport"
);

// ============================================================================
// Tests
// ============================================================================
