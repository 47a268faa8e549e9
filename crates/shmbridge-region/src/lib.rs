//! Named shared-memory regions and wake events.
//!
//! Provides the lowest layer of shmbridge: a fixed-size byte region that two
//! processes attach to by name, plus an auto-reset event a writer can use to
//! wake a waiting reader.
//! - POSIX shared memory objects and named semaphores (Linux/macOS)
//! - File mappings and event objects (Windows)
//!
//! Everything above this crate talks to memory through the [`SharedMemory`]
//! trait, so channel logic can be exercised against [`HeapRegion`] without
//! touching the OS namespace.

pub mod error;
pub mod event;
pub mod heap;
pub mod region;
pub mod security;
pub mod traits;

pub use error::{RegionError, Result};
pub use event::NamedEvent;
pub use heap::{HeapRegion, LocalNotifier};
pub use region::{platform_name, RegionConfig, SharedRegion};
pub use security::{probe_relaxed, AccessPolicy, RELAXED_MODE};
pub use traits::{check_bounds, Notifier, SharedMemory};
