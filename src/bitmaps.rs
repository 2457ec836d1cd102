// this_file: src/bitmaps.rs

//! The small-bitmap cache: a typed specialization caching rendered glyph
//! bitmaps in bundles of [`BITMAPS_PER_NODE`] consecutive glyph indices.
//!
//! A family is one face + pixel size + render-flags combination; the
//! expensive part (opening the face to learn its glyph count) happens once
//! per family. A node covers a fixed-width range of glyph indices and
//! fills its slots lazily: only the requested glyph is rendered up front,
//! neighbors are materialized on first access. A glyph the provider cannot
//! render is recorded as [`CachedGlyph::Missing`] rather than failing the
//! lookup, so callers get well-defined degraded output.

use crate::cache::{CacheId, CacheOps};
use crate::error::{Error, Result};
use crate::manager::Manager;
use crate::node::NodeRef;
use crate::sources::{FaceSource, FontDesc, SourceCaches};
use smallvec::{smallvec, SmallVec};
use std::any::Any;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Glyph indices covered by one cache node.
pub const BITMAPS_PER_NODE: u32 = 16;

/// Render options that distinguish otherwise identical face/size pairs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct RenderFlags {
    /// Render 1-bit instead of anti-aliased.
    pub monochrome: bool,
    /// Disable hinting.
    pub unhinted: bool,
    /// Force the auto-hinter.
    pub autohinted: bool,
}

/// Full description of the images one family caches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ImageDesc {
    pub font: FontDesc,
    pub flags: RenderFlags,
}

/// One rendered glyph image, small enough to store thousands of.
#[derive(Clone, Debug)]
pub struct GlyphBitmap {
    pub width: u16,
    pub height: u16,
    /// Bytes per row; negative for bottom-up layouts.
    pub pitch: i16,
    pub left: i16,
    pub top: i16,
    pub x_advance: i16,
    pub y_advance: i16,
    pub buffer: Box<[u8]>,
}

/// State of one glyph slot inside a node.
#[derive(Clone, Debug, Default)]
pub enum CachedGlyph {
    /// Not materialized yet; rendered on first access.
    #[default]
    Pending,
    /// The provider could not render this glyph. Callers reading this slot
    /// get `None` instead of an error.
    Missing,
    Rendered(GlyphBitmap),
}

/// Provider extension the small-bitmap cache needs on top of face/size
/// construction.
pub trait GlyphSource: FaceSource {
    /// Number of glyphs in the face; bounds the index ranges nodes cover.
    fn glyph_count(&mut self, face: &Self::Face) -> u32;

    /// Render one glyph at the activated size. `Ok(None)` marks a glyph
    /// the face simply does not have an image for.
    fn render_glyph(
        &mut self,
        face: &Self::Face,
        size: &Self::Size,
        gindex: u32,
        flags: RenderFlags,
    ) -> Result<Option<GlyphBitmap>>;
}

struct BitmapFamily {
    desc: ImageDesc,
    hash: u32,
    item_total: u32,
}

struct BitmapNode {
    item_start: u32,
    glyphs: SmallVec<[CachedGlyph; BITMAPS_PER_NODE as usize]>,
}

impl BitmapNode {
    fn slot_of(&self, gindex: u32) -> Option<usize> {
        if gindex >= self.item_start && gindex < self.item_start + self.glyphs.len() as u32 {
            Some((gindex - self.item_start) as usize)
        } else {
            None
        }
    }
}

struct BitmapQuery {
    desc: ImageDesc,
    gindex: u32,
}

fn desc_hash(desc: &ImageDesc) -> u32 {
    let mut hasher = DefaultHasher::new();
    desc.hash(&mut hasher);
    hasher.finish() as u32
}

/// Render one glyph through the face/size sub-caches. Only face/size
/// resolution failures propagate; a glyph the provider cannot render
/// becomes `Missing`.
fn load_glyph<S: GlyphSource>(
    family: &BitmapFamily,
    gindex: u32,
    sources: &mut SourceCaches<S>,
) -> Result<CachedGlyph> {
    let (face, size) = sources.lookup_size(&family.desc.font)?;
    match sources
        .provider_mut()
        .render_glyph(&face, &size, gindex, family.desc.flags)
    {
        Ok(Some(bitmap)) => Ok(CachedGlyph::Rendered(bitmap)),
        Ok(None) => Ok(CachedGlyph::Missing),
        Err(e) => {
            log::debug!("glyph {} render failed, marking missing: {}", gindex, e);
            Ok(CachedGlyph::Missing)
        }
    }
}

fn glyph_weight(glyph: &CachedGlyph) -> u64 {
    match glyph {
        CachedGlyph::Rendered(bitmap) => bitmap.buffer.len() as u64,
        _ => 0,
    }
}

/// Behavior table of the small-bitmap cache.
struct BitmapOps;

impl<S: GlyphSource> CacheOps<S> for BitmapOps {
    fn family_init(
        &self,
        query: &dyn Any,
        sources: &mut SourceCaches<S>,
    ) -> Result<Box<dyn Any>> {
        let query = downcast_query(query)?;

        // the one expensive per-context step: open the face to learn how
        // many glyphs the index ranges must be clipped to
        let face = sources.lookup_face(query.desc.font.face_id)?;
        let item_total = sources.provider_mut().glyph_count(&face);

        Ok(Box::new(BitmapFamily {
            desc: query.desc,
            hash: desc_hash(&query.desc),
            item_total,
        }))
    }

    fn family_compare(&self, family: &dyn Any, query: &dyn Any) -> bool {
        match (
            family.downcast_ref::<BitmapFamily>(),
            query.downcast_ref::<BitmapQuery>(),
        ) {
            (Some(family), Some(query)) => family.desc == query.desc,
            _ => false,
        }
    }

    fn node_hash(&self, family: &dyn Any, query: &dyn Any) -> Result<u32> {
        let family = downcast_family(family)?;
        let query = downcast_query(query)?;
        Ok(family.hash.wrapping_add(query.gindex / BITMAPS_PER_NODE))
    }

    fn node_init(
        &self,
        family: &dyn Any,
        query: &dyn Any,
        sources: &mut SourceCaches<S>,
    ) -> Result<Box<dyn Any>> {
        let family = downcast_family(family)?;
        let query = downcast_query(query)?;

        if query.gindex >= family.item_total {
            return Err(Error::InvalidArgument(format!(
                "glyph index {} out of range (face has {} glyphs)",
                query.gindex, family.item_total
            )));
        }

        let item_start = query.gindex - query.gindex % BITMAPS_PER_NODE;
        let count = BITMAPS_PER_NODE.min(family.item_total - item_start);

        let mut node = BitmapNode {
            item_start,
            glyphs: smallvec![CachedGlyph::Pending; count as usize],
        };

        // render only the requested glyph; neighbors stay pending
        let slot = (query.gindex - item_start) as usize;
        node.glyphs[slot] = load_glyph(family, query.gindex, sources)?;

        Ok(Box::new(node))
    }

    fn node_weight(&self, node: &dyn Any) -> Result<u64> {
        let node = downcast_node(node)?;
        let mut weight = std::mem::size_of::<BitmapNode>() as u64
            + node.glyphs.len() as u64 * std::mem::size_of::<CachedGlyph>() as u64;
        for glyph in &node.glyphs {
            weight += glyph_weight(glyph);
        }
        Ok(weight)
    }

    fn node_compare(
        &self,
        node: &mut dyn Any,
        family: &dyn Any,
        query: &dyn Any,
        sources: &mut SourceCaches<S>,
    ) -> Result<Option<u64>> {
        let node = node
            .downcast_mut::<BitmapNode>()
            .ok_or(Error::CorruptedCache("bitmap node payload type mismatch"))?;
        let family = downcast_family(family)?;
        let query = downcast_query(query)?;

        let slot = match node.slot_of(query.gindex) {
            Some(slot) => slot,
            None => return Ok(None),
        };

        // lazy fill-in: materialize the requested glyph now and report the
        // added bytes so the manager can account them
        let mut added = 0;
        if matches!(node.glyphs[slot], CachedGlyph::Pending) {
            match load_glyph(family, query.gindex, sources) {
                Ok(glyph) => {
                    added = glyph_weight(&glyph);
                    node.glyphs[slot] = glyph;
                }
                Err(e) => {
                    // face/size resolution hiccup; keep the slot pending so
                    // a later access can retry
                    log::debug!("lazy fill of glyph {} failed: {}", query.gindex, e);
                }
            }
        }
        Ok(Some(added))
    }
}

fn downcast_query(query: &dyn Any) -> Result<&BitmapQuery> {
    query
        .downcast_ref::<BitmapQuery>()
        .ok_or(Error::CorruptedCache("bitmap query type mismatch"))
}

fn downcast_family(family: &dyn Any) -> Result<&BitmapFamily> {
    family
        .downcast_ref::<BitmapFamily>()
        .ok_or(Error::CorruptedCache("bitmap family payload type mismatch"))
}

fn downcast_node(node: &dyn Any) -> Result<&BitmapNode> {
    node.downcast_ref::<BitmapNode>()
        .ok_or(Error::CorruptedCache("bitmap node payload type mismatch"))
}

/// Typed front end to one registered small-bitmap cache.
#[derive(Clone, Copy, Debug)]
pub struct BitmapCache {
    id: CacheId,
}

impl BitmapCache {
    /// Register a small-bitmap cache with the manager.
    pub fn register<S: GlyphSource>(manager: &mut Manager<S>) -> Result<Self> {
        let id = manager.register_cache(Box::new(BitmapOps))?;
        Ok(Self { id })
    }

    /// The cache's registry id.
    pub fn id(&self) -> CacheId {
        self.id
    }

    /// Find or render the node covering `gindex`. The handle is unpinned:
    /// read the bitmap before the next lookup, or use
    /// [`BitmapCache::lookup_pinned`].
    pub fn lookup<S: GlyphSource>(
        &self,
        manager: &mut Manager<S>,
        desc: &ImageDesc,
        gindex: u32,
    ) -> Result<NodeRef> {
        let query = BitmapQuery {
            desc: *desc,
            gindex,
        };
        manager.lookup(self.id, &query)
    }

    /// Like [`BitmapCache::lookup`], but the node comes back pinned and
    /// must be released with [`Manager::unref`].
    pub fn lookup_pinned<S: GlyphSource>(
        &self,
        manager: &mut Manager<S>,
        desc: &ImageDesc,
        gindex: u32,
    ) -> Result<NodeRef> {
        let query = BitmapQuery {
            desc: *desc,
            gindex,
        };
        manager.lookup_pinned(self.id, &query)
    }

    /// Read one glyph out of a node returned by `lookup`. `Ok(None)` is
    /// the degraded output for a glyph the provider could not render.
    pub fn glyph<'m, S: FaceSource>(
        &self,
        manager: &'m Manager<S>,
        node: NodeRef,
        gindex: u32,
    ) -> Result<Option<&'m GlyphBitmap>> {
        let payload: &BitmapNode = manager.payload(node)?;
        let slot = payload.slot_of(gindex).ok_or_else(|| {
            Error::InvalidArgument(format!("glyph index {} not covered by this node", gindex))
        })?;
        match &payload.glyphs[slot] {
            CachedGlyph::Rendered(bitmap) => Ok(Some(bitmap)),
            _ => Ok(None),
        }
    }
}
