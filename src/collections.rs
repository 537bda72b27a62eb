//! Map and set aliases used by the in-memory tree and the dedup engine.
//!
//! The `gxhash` feature swaps in gxhash's hasher (requires AES and SSE2).
//! Construct maps with `Default::default()` so both variants work.

#[cfg(feature = "gxhash")]
pub type HashMap<K, V> = std::collections::HashMap<K, V, gxhash::GxBuildHasher>;

#[cfg(feature = "gxhash")]
pub type HashSet<T> = std::collections::HashSet<T, gxhash::GxBuildHasher>;

#[cfg(not(feature = "gxhash"))]
pub type HashMap<K, V> = std::collections::HashMap<K, V>;

#[cfg(not(feature = "gxhash"))]
pub type HashSet<T> = std::collections::HashSet<T>;
