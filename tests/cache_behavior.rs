// this_file: tests/cache_behavior.rs
//! End-to-end behavior of the cache manager driven through the public
//! surface with a deterministic mock renderer.

use glyphcache::{
    BitmapCache, Error, FaceId, FaceSource, FontDesc, GlyphBitmap, GlyphSource, ImageDesc,
    Manager, ManagerOptions, RenderFlags, Result,
};
use std::cell::Cell;
use std::rc::Rc;

const GLYPHS_PER_FACE: u32 = 64;

/// Mock provider that counts expensive operations so tests can assert the
/// cache actually amortizes them.
struct MockRenderer {
    faces_opened: Rc<Cell<u32>>,
    sizes_activated: Rc<Cell<u32>>,
    glyphs_rendered: Rc<Cell<u32>>,
}

struct MockFace {
    id: FaceId,
}

struct MockSize {
    px: u32,
}

impl MockRenderer {
    fn new() -> Self {
        Self {
            faces_opened: Rc::new(Cell::new(0)),
            sizes_activated: Rc::new(Cell::new(0)),
            glyphs_rendered: Rc::new(Cell::new(0)),
        }
    }
}

impl FaceSource for MockRenderer {
    type Face = MockFace;
    type Size = MockSize;

    fn request_face(&mut self, face_id: FaceId) -> Result<MockFace> {
        if face_id == 0 {
            return Err(Error::Source("no such face".into()));
        }
        self.faces_opened.set(self.faces_opened.get() + 1);
        Ok(MockFace { id: face_id })
    }

    fn activate_size(&mut self, _face: &MockFace, w: u32, _h: u32) -> Result<MockSize> {
        self.sizes_activated.set(self.sizes_activated.get() + 1);
        Ok(MockSize { px: w })
    }
}

impl GlyphSource for MockRenderer {
    fn glyph_count(&mut self, _face: &MockFace) -> u32 {
        GLYPHS_PER_FACE
    }

    fn render_glyph(
        &mut self,
        face: &MockFace,
        size: &MockSize,
        gindex: u32,
        _flags: RenderFlags,
    ) -> Result<Option<GlyphBitmap>> {
        // glyph 7 of every face has no image
        if gindex == 7 {
            return Ok(None);
        }
        self.glyphs_rendered.set(self.glyphs_rendered.get() + 1);
        let side = size.px as usize;
        Ok(Some(GlyphBitmap {
            width: side as u16,
            height: side as u16,
            pitch: side as i16,
            left: 0,
            top: side as i16,
            x_advance: (side + 1) as i16,
            y_advance: 0,
            buffer: vec![(face.id as u8) ^ (gindex as u8); side * side].into_boxed_slice(),
        }))
    }
}

fn desc(face_id: FaceId, px: u32) -> ImageDesc {
    ImageDesc {
        font: FontDesc {
            face_id,
            pix_width: px,
            pix_height: px,
        },
        flags: RenderFlags::default(),
    }
}

fn setup(max_weight: u64) -> (Manager<MockRenderer>, BitmapCache) {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut manager = Manager::new(
        MockRenderer::new(),
        ManagerOptions {
            max_weight,
            ..Default::default()
        },
    );
    let cache = BitmapCache::register(&mut manager).unwrap();
    (manager, cache)
}

#[test]
fn repeated_lookups_reuse_one_node_and_one_render() {
    let (mut mgr, cache) = setup(1 << 20);
    let rendered = Rc::clone(&mgr.sources_mut().provider().glyphs_rendered);

    let d = desc(1, 16);
    let first = cache.lookup(&mut mgr, &d, 3).unwrap();
    for _ in 0..10 {
        let again = cache.lookup(&mut mgr, &d, 3).unwrap();
        assert_eq!(again, first, "same query must return the same node");
    }
    assert_eq!(rendered.get(), 1);
    assert_eq!(mgr.node_count(), 1);
    mgr.check().unwrap();
}

#[test]
fn family_setup_is_amortized_across_nodes() {
    let (mut mgr, cache) = setup(1 << 20);
    let opened = Rc::clone(&mgr.sources_mut().provider().faces_opened);
    let activated = Rc::clone(&mgr.sources_mut().provider().sizes_activated);

    let d = desc(1, 16);
    // glyphs in four different 16-wide ranges: four nodes, one family
    for gindex in [0u32, 16, 32, 48] {
        cache.lookup(&mut mgr, &d, gindex).unwrap();
    }
    assert_eq!(mgr.node_count(), 4);
    assert_eq!(opened.get(), 1, "face opened once for the whole family");
    assert_eq!(activated.get(), 1, "size activated once and cached");
    mgr.check().unwrap();
}

#[test]
fn weight_accounting_matches_under_churn() {
    let (mut mgr, cache) = setup(40_000);

    for face in 1..=3u64 {
        for px in [8u32, 12, 16] {
            for gindex in [0u32, 5, 17, 33] {
                cache.lookup(&mut mgr, &desc(face, px), gindex).unwrap();
                mgr.check().unwrap();
            }
        }
    }
    mgr.compress().unwrap();
    mgr.check().unwrap();
}

#[test]
fn eviction_under_pressure_respects_budget() {
    // budget roughly two 16px nodes, then insert five distinct ranges
    let (mut mgr, cache) = setup(2 * 1_600);

    let d = desc(1, 16);
    for gindex in [0u32, 16, 32, 48, 1] {
        cache.lookup(&mut mgr, &d, gindex).unwrap();
    }
    assert!(
        mgr.node_count() <= 2,
        "expected at most 2 survivors, got {}",
        mgr.node_count()
    );
    assert!(mgr.cur_weight() <= mgr.max_weight());
    mgr.check().unwrap();
}

#[test]
fn pinned_node_survives_eviction_pressure() {
    let (mut mgr, cache) = setup(2 * 1_600);
    let d = desc(1, 16);

    let pinned = cache.lookup_pinned(&mut mgr, &d, 0).unwrap();

    // hammer the cache with other ranges to force many compress passes
    for face in 2..=6u64 {
        for gindex in [0u32, 16, 32, 48] {
            cache.lookup(&mut mgr, &desc(face, 16), gindex).unwrap();
        }
    }

    let bitmap = cache.glyph(&mgr, pinned, 0).unwrap().expect("still cached");
    assert_eq!(bitmap.width, 16);
    mgr.check().unwrap();

    mgr.unref(pinned).unwrap();
    // one more insert can now reclaim it
    cache.lookup(&mut mgr, &desc(7, 16), 0).unwrap();
    assert!(mgr.cur_weight() <= mgr.max_weight());
    mgr.check().unwrap();
}

#[test]
fn missing_glyphs_degrade_gracefully() {
    let (mut mgr, cache) = setup(1 << 20);
    let d = desc(1, 16);

    let node = cache.lookup(&mut mgr, &d, 7).unwrap();
    assert!(cache.glyph(&mgr, node, 7).unwrap().is_none());

    // the miss is cached: a second lookup succeeds and renders nothing
    let rendered = Rc::clone(&mgr.sources_mut().provider().glyphs_rendered);
    let before = rendered.get();
    let node2 = cache.lookup(&mut mgr, &d, 7).unwrap();
    assert_eq!(node, node2);
    assert_eq!(rendered.get(), before);
    mgr.check().unwrap();
}

#[test]
fn lazy_fill_in_keeps_weight_consistent() {
    let (mut mgr, cache) = setup(1 << 20);
    let d = desc(1, 8);

    let node = cache.lookup(&mut mgr, &d, 0).unwrap();
    let before = mgr.cur_weight();

    // neighbors materialize one at a time on access
    for gindex in 1..8u32 {
        let again = cache.lookup(&mut mgr, &d, gindex).unwrap();
        assert_eq!(again, node);
        mgr.check().unwrap();
    }
    // glyph 7 is missing (weightless), the other six added 64 bytes each
    assert_eq!(mgr.cur_weight(), before + 6 * 64);
}

#[test]
fn provider_failure_leaves_no_trace() {
    let (mut mgr, cache) = setup(1 << 20);

    // face id 0 cannot be opened: family_init fails inside the lookup
    let result = cache.lookup(&mut mgr, &desc(0, 16), 0);
    assert!(matches!(result, Err(Error::Source(_))));
    assert_eq!(mgr.node_count(), 0);
    assert_eq!(mgr.cur_weight(), 0);
    mgr.check().unwrap();

    // the manager is fully usable afterwards
    cache.lookup(&mut mgr, &desc(1, 16), 0).unwrap();
    mgr.check().unwrap();
}

#[test]
fn clear_empties_one_cache_and_invalidates_handles() {
    let (mut mgr, cache) = setup(1 << 20);
    let d = desc(1, 16);

    let pinned = cache.lookup_pinned(&mut mgr, &d, 0).unwrap();
    cache.lookup(&mut mgr, &d, 16).unwrap();

    mgr.clear(cache.id()).unwrap();
    assert_eq!(mgr.node_count(), 0);
    assert_eq!(mgr.cur_weight(), 0);
    assert!(cache.glyph(&mgr, pinned, 0).is_err());
    mgr.check().unwrap();

    // and the cache accepts new lookups
    cache.lookup(&mut mgr, &d, 0).unwrap();
    mgr.check().unwrap();
}

#[test]
fn reset_reopens_faces_but_keeps_nodes() {
    let (mut mgr, cache) = setup(1 << 20);
    let opened = Rc::clone(&mgr.sources_mut().provider().faces_opened);
    let d = desc(1, 16);

    let node = cache.lookup(&mut mgr, &d, 0).unwrap();
    assert_eq!(opened.get(), 1);

    mgr.reset();

    // cached nodes are untouched by reset
    assert_eq!(mgr.node_count(), 1);
    assert!(cache.glyph(&mgr, node, 0).unwrap().is_some());

    // but the next face access goes back to the provider
    mgr.lookup_face(1).unwrap();
    assert_eq!(opened.get(), 2);
    mgr.check().unwrap();
}

#[test]
fn face_and_size_sub_caches_amortize_provider_calls() {
    let (mut mgr, _cache) = setup(1 << 20);
    let opened = Rc::clone(&mgr.sources_mut().provider().faces_opened);
    let activated = Rc::clone(&mgr.sources_mut().provider().sizes_activated);

    let font = FontDesc {
        face_id: 1,
        pix_width: 12,
        pix_height: 12,
    };
    for _ in 0..5 {
        mgr.lookup_size(&font).unwrap();
    }
    assert_eq!(opened.get(), 1);
    assert_eq!(activated.get(), 1);

    // default face capacity is 2: a third face evicts the oldest
    mgr.lookup_face(2).unwrap();
    mgr.lookup_face(3).unwrap();
    mgr.lookup_face(1).unwrap();
    assert_eq!(opened.get(), 4, "face 1 was evicted and reopened");
}

#[test]
fn many_nodes_stay_locatable_through_resizes() {
    let (mut mgr, cache) = setup(1 << 30);

    let mut handles = Vec::new();
    for face in 1..=10u64 {
        for gindex in (0..GLYPHS_PER_FACE).step_by(16) {
            let node = cache.lookup(&mut mgr, &desc(face, 4), gindex).unwrap();
            handles.push((face, gindex, node));
        }
    }
    // 40 nodes forced growth past the initial 7 buckets
    assert_eq!(mgr.node_count(), 40);

    for (face, gindex, node) in handles {
        let again = cache.lookup(&mut mgr, &desc(face, 4), gindex).unwrap();
        assert_eq!(again, node, "face {} glyph {} moved", face, gindex);
    }
    mgr.check().unwrap();
}

#[test]
fn two_registered_caches_share_the_budget() {
    let (mut mgr, text_cache) = setup(2 * 1_600);
    let icon_cache = BitmapCache::register(&mut mgr).unwrap();

    text_cache.lookup(&mut mgr, &desc(1, 16), 0).unwrap();
    icon_cache.lookup(&mut mgr, &desc(2, 16), 0).unwrap();
    icon_cache.lookup(&mut mgr, &desc(2, 16), 16).unwrap();
    text_cache.lookup(&mut mgr, &desc(1, 16), 16).unwrap();

    assert!(mgr.cur_weight() <= mgr.max_weight());
    mgr.check().unwrap();
}
