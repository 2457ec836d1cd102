// this_file: src/lib.rs
//! glyphcache - a bounded-memory object cache for font rendering engines
//!
//! This library keeps expensive derived objects (rendered glyph bitmaps,
//! activated sizes, opened faces) alive across requests under a byte
//! budget:
//! - a plug-in framework where heterogeneous typed caches share one
//!   eviction policy,
//! - a global most-recently-used list whose tail feeds weight-based
//!   eviction,
//! - per-cache chained hash tables with prime-sized bucket counts,
//! - "families" that amortize per-context setup across many nodes,
//! - pin counts that protect in-use nodes from eviction.
//!
//! The embedding system supplies faces and sizes through the
//! [`FaceSource`] trait and plugs payload types in through [`CacheOps`];
//! [`bitmaps`] ships the standard small-bitmap specialization.

pub mod bitmaps;
pub mod cache;
pub mod error;
pub mod family;
pub mod lru;
pub mod manager;
pub mod node;
pub mod sources;

// Re-export commonly used types
pub use bitmaps::{BitmapCache, CachedGlyph, GlyphBitmap, GlyphSource, ImageDesc, RenderFlags};
pub use cache::{CacheId, CacheOps};
pub use error::{Error, Result};
pub use manager::{Manager, ManagerOptions, MAX_CACHES};
pub use node::NodeRef;
pub use sources::{FaceId, FaceSource, FontDesc, SourceCaches};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
