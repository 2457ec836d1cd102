// this_file: src/sources.rs

//! Face and size sub-caches.
//!
//! Opening a face (a font file) and activating a pixel size on it are
//! assumed to be expensive, so the manager keeps two small bounded LRU
//! lists of them in front of the external provider. These lists are not
//! the main cache; they only amortize provider calls made by the typed
//! caches while building families and nodes.

use crate::error::{Error, Result};
use crate::lru::LruList;
use std::rc::Rc;

/// Opaque identifier for a face, chosen by the embedding system.
pub type FaceId = u64;

/// A face scaled to one pixel size; the key of the size sub-cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FontDesc {
    pub face_id: FaceId,
    pub pix_width: u32,
    pub pix_height: u32,
}

/// External provider of face and size objects.
///
/// The cache never inspects the objects it stores here; it only hands
/// them back to the typed caches. Destruction is RAII: when an entry is
/// evicted, dropping the last `Rc` runs the object's own `Drop`.
///
/// Providers are owned by the manager, hence the `'static` bound.
pub trait FaceSource: 'static {
    /// An opened face object (expensive to construct).
    type Face;
    /// An activated scaled-instance object (expensive to construct).
    type Size;

    /// Open the face behind `face_id`.
    fn request_face(&mut self, face_id: FaceId) -> Result<Self::Face>;

    /// Activate `face` at the given pixel size.
    fn activate_size(&mut self, face: &Self::Face, pix_width: u32, pix_height: u32)
        -> Result<Self::Size>;
}

struct FaceEntry<S: FaceSource> {
    id: FaceId,
    face: Rc<S::Face>,
}

struct SizeEntry<S: FaceSource> {
    desc: FontDesc,
    size: Rc<S::Size>,
}

/// The provider plus its two bounded LRU lists.
pub struct SourceCaches<S: FaceSource> {
    provider: S,
    faces: LruList<FaceEntry<S>>,
    sizes: LruList<SizeEntry<S>>,
}

impl<S: FaceSource> SourceCaches<S> {
    pub(crate) fn new(provider: S, max_faces: usize, max_sizes: usize) -> Self {
        Self {
            provider,
            faces: LruList::new(max_faces.max(1)),
            sizes: LruList::new(max_sizes.max(1)),
        }
    }

    /// Return the cached face for `face_id`, opening it on a miss.
    ///
    /// When the face list is full the least-recently-used face is evicted,
    /// together with every size entry that was activated on it.
    pub fn lookup_face(&mut self, face_id: FaceId) -> Result<Rc<S::Face>> {
        if let Some(entry) = self.faces.touch(|e| e.id == face_id) {
            return Ok(Rc::clone(&entry.face));
        }

        let face = Rc::new(self.provider.request_face(face_id)?);
        if let Some(evicted) = self.faces.insert(FaceEntry {
            id: face_id,
            face: Rc::clone(&face),
        }) {
            log::debug!("evicting face {:#x} and its sizes", evicted.id);
            self.sizes.remove_selection(|s| s.desc.face_id == evicted.id);
        }
        Ok(face)
    }

    /// Return the cached (face, size) pair for `desc`, constructing both
    /// on demand.
    pub fn lookup_size(&mut self, desc: &FontDesc) -> Result<(Rc<S::Face>, Rc<S::Size>)> {
        let face = self.lookup_face(desc.face_id)?;

        if let Some(entry) = self.sizes.touch(|e| e.desc == *desc) {
            return Ok((face, Rc::clone(&entry.size)));
        }

        let size = Rc::new(
            self.provider
                .activate_size(&face, desc.pix_width, desc.pix_height)?,
        );
        self.sizes.insert(SizeEntry {
            desc: *desc,
            size: Rc::clone(&size),
        });
        Ok((face, size))
    }

    /// Drop every cached face and size. Used when the set of valid face
    /// identifiers changes externally.
    pub fn reset(&mut self) {
        self.sizes.clear();
        self.faces.clear();
    }

    /// Direct access to the provider, for typed cache callbacks that need
    /// provider operations beyond face/size construction.
    pub fn provider_mut(&mut self) -> &mut S {
        &mut self.provider
    }

    /// Shared access to the provider.
    pub fn provider(&self) -> &S {
        &self.provider
    }

    #[cfg(test)]
    fn counts(&self) -> (usize, usize) {
        (self.faces.len(), self.sizes.len())
    }
}

impl<S: FaceSource> std::fmt::Debug for SourceCaches<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceCaches")
            .field("faces", &self.faces.len())
            .field("sizes", &self.sizes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc as StdRc;

    /// Provider that counts how many faces/sizes it has constructed.
    struct CountingSource {
        faces_built: StdRc<Cell<u32>>,
        sizes_built: StdRc<Cell<u32>>,
    }

    impl CountingSource {
        fn new() -> Self {
            Self {
                faces_built: StdRc::new(Cell::new(0)),
                sizes_built: StdRc::new(Cell::new(0)),
            }
        }
    }

    impl FaceSource for CountingSource {
        type Face = FaceId;
        type Size = (FaceId, u32, u32);

        fn request_face(&mut self, face_id: FaceId) -> Result<FaceId> {
            if face_id == 0 {
                return Err(Error::Source("unknown face".into()));
            }
            self.faces_built.set(self.faces_built.get() + 1);
            Ok(face_id)
        }

        fn activate_size(&mut self, face: &FaceId, w: u32, h: u32) -> Result<(FaceId, u32, u32)> {
            self.sizes_built.set(self.sizes_built.get() + 1);
            Ok((*face, w, h))
        }
    }

    fn desc(face_id: FaceId, px: u32) -> FontDesc {
        FontDesc {
            face_id,
            pix_width: px,
            pix_height: px,
        }
    }

    #[test]
    fn face_lookup_hits_cache() {
        let provider = CountingSource::new();
        let built = StdRc::clone(&provider.faces_built);
        let mut sources = SourceCaches::new(provider, 2, 4);

        sources.lookup_face(1).unwrap();
        sources.lookup_face(1).unwrap();
        assert_eq!(built.get(), 1);
    }

    #[test]
    fn face_eviction_purges_dependent_sizes() {
        let provider = CountingSource::new();
        let mut sources = SourceCaches::new(provider, 2, 8);

        sources.lookup_size(&desc(1, 12)).unwrap();
        sources.lookup_size(&desc(1, 16)).unwrap();
        sources.lookup_size(&desc(2, 12)).unwrap();
        assert_eq!(sources.counts(), (2, 3));

        // third face evicts face 1 (LRU) and both of its sizes
        sources.lookup_face(3).unwrap();
        assert_eq!(sources.counts(), (2, 1));
    }

    #[test]
    fn provider_failure_propagates_without_caching() {
        let provider = CountingSource::new();
        let mut sources = SourceCaches::new(provider, 2, 4);

        assert!(sources.lookup_face(0).is_err());
        assert_eq!(sources.counts(), (0, 0));
    }

    #[test]
    fn reset_clears_both_lists() {
        let provider = CountingSource::new();
        let built = StdRc::clone(&provider.faces_built);
        let mut sources = SourceCaches::new(provider, 2, 4);

        sources.lookup_size(&desc(1, 12)).unwrap();
        sources.reset();
        assert_eq!(sources.counts(), (0, 0));

        sources.lookup_face(1).unwrap();
        assert_eq!(built.get(), 2, "face must be re-opened after reset");
    }
}
