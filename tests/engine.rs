//! End-to-end scenarios: rule compilation, pass execution and the
//! structural actions working together on small datasets.

use osmchart::*;

fn tagged_node(id: Id, lat: f64, lon: f64, tags: &[(&str, &str)]) -> Node {
    let mut n = Node::new(id, lat, lon);
    for (k, v) in tags {
        n.attr.add_tag(*k, *v);
    }
    n
}

fn tagged_way(id: Id, refs: Vec<Id>, tags: &[(&str, &str)]) -> Way {
    let mut w = Way::new(id, refs);
    for (k, v) in tags {
        w.attr.add_tag(*k, *v);
    }
    w
}

fn way_rule(id: Id, action: &str, tags: &[(&str, &str)]) -> Object {
    tagged_way(id, vec![], &{
        let mut t = vec![("_action_", action)];
        t.extend_from_slice(tags);
        t
    })
    .into()
}

fn node_rule(id: Id, action: &str, tags: &[(&str, &str)]) -> Object {
    tagged_node(id, 0.0, 0.0, &{
        let mut t = vec![("_action_", action)];
        t.extend_from_slice(tags);
        t
    })
    .into()
}

/// The shoelace area of a closed way, positive for counterclockwise node
/// order.
fn shoelace(ctx: &Context, w: &Way) -> f64 {
    let mut ar = 0.0;
    for i in 0..w.refs.len() - 1 {
        let a = ctx.store.node(w.refs[i]).unwrap();
        let b = ctx.store.node(w.refs[i + 1]).unwrap();
        ar += a.lon * b.lat - b.lon * a.lat;
    }
    ar
}

/// Two coastline fragments sharing an end node are stitched into a single
/// closed polygon, with border corner points inserted and counterclockwise
/// orientation.
#[test]
fn coastline_fragments_stitch_into_triangle() {
    let mut ctx = Context::new(Config {
        window: Some("-5:-5:15:15".to_string()),
        threads: 0,
        ..Config::default()
    })
    .unwrap();

    ctx.store.put(Node::new(1, 0.0, 0.0));
    ctx.store.put(Node::new(2, 10.0, 0.0));
    ctx.store.put(Node::new(3, 10.0, 10.0));
    ctx.store
        .put(tagged_way(10, vec![1, 2], &[("natural", "coastline")]));
    ctx.store
        .put(tagged_way(11, vec![2, 3], &[("natural", "coastline")]));

    compile_rules(
        &mut ctx,
        vec![way_rule(1, "cat_poly", &[("natural", "coastline")])],
    )
    .unwrap();
    execute_rules(&mut ctx).unwrap();

    // exactly one new closed coastline way
    let closed: Vec<&Way> = ctx
        .store
        .iter(ObjKind::Way)
        .filter_map(|(_, o)| o.as_way())
        .filter(|w| w.is_closed() && w.attr.get_tag("natural") == Some("coastline"))
        .collect();
    assert_eq!(closed.len(), 1, "expected a single closed coastline way");
    let w = closed[0];

    // the three original points survive as a contiguous run
    let run = w
        .refs
        .windows(3)
        .any(|win| win == [1, 2, 3]);
    assert!(run, "refs {:?} do not contain [1, 2, 3]", w.refs);

    // at least one page corner/edge point was inserted by the stitcher
    assert!(w.refs.len() > 4, "no corner points inserted: {:?}", w.refs);

    // counterclockwise orientation
    assert!(shoelace(&ctx, w) > 0.0, "polygon is not CCW");
}

/// `cat_poly` with `ign_incomplete` leaves unclosable ways open instead of
/// stitching them along the border.
#[test]
fn cat_poly_ign_incomplete_leaves_open() {
    let mut ctx = Context::new(Config {
        window: Some("-5:-5:15:15".to_string()),
        threads: 0,
        ..Config::default()
    })
    .unwrap();

    ctx.store.put(Node::new(1, 0.0, 0.0));
    ctx.store.put(Node::new(2, 10.0, 0.0));
    ctx.store
        .put(tagged_way(10, vec![1, 2], &[("natural", "coastline")]));

    compile_rules(
        &mut ctx,
        vec![way_rule(
            1,
            "cat_poly:ign_incomplete=1",
            &[("natural", "coastline")],
        )],
    )
    .unwrap();
    execute_rules(&mut ctx).unwrap();

    // the joined way exists but stays open
    let open: Vec<&Way> = ctx
        .store
        .iter(ObjKind::Way)
        .filter_map(|(_, o)| o.as_way())
        .filter(|w| w.attr.id != 10 && w.attr.get_tag("natural") == Some("coastline"))
        .collect();
    assert_eq!(open.len(), 1);
    assert!(!open[0].is_closed());
}

/// A `cat_poly` rule on a relation closes the member ways and copies the
/// relation tags onto the result.
#[test]
fn cat_poly_on_relation() {
    let mut ctx = Context::new(Config {
        window: Some("-5:-5:15:15".to_string()),
        threads: 0,
        ..Config::default()
    })
    .unwrap();

    ctx.store.put(Node::new(1, 0.0, 0.0));
    ctx.store.put(Node::new(2, 8.0, 0.0));
    ctx.store.put(Node::new(3, 8.0, 8.0));
    ctx.store.put(tagged_way(10, vec![1, 2], &[]));
    ctx.store.put(tagged_way(11, vec![2, 3], &[]));
    ctx.store.put(tagged_way(12, vec![3, 1], &[]));

    let role = ctx.store.roles.intern("outer");
    let members = [10, 11, 12]
        .iter()
        .map(|&id| Member {
            kind: ObjKind::Way,
            id,
            role,
        })
        .collect();
    let mut rel = Relation::new(20, members);
    rel.attr.add_tag("type", "multipolygon");
    rel.attr.add_tag("place", "island");
    ctx.store.put(rel);

    let mut rt = Relation::new(1, vec![]);
    rt.attr.add_tag("_action_", "cat_poly");
    rt.attr.add_tag("type", "multipolygon");

    compile_rules(&mut ctx, vec![rt.into()]).unwrap();
    execute_rules(&mut ctx).unwrap();

    let closed: Vec<&Way> = ctx
        .store
        .iter(ObjKind::Way)
        .filter_map(|(_, o)| o.as_way())
        .filter(|w| w.is_closed() && w.attr.get_tag("place") == Some("island"))
        .collect();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].attr.get_tag("type"), Some("multipolygon"));
}

/// `ins_eqdist` at 2 nm on a 10 nm meridian segment inserts 4 nodes with
/// distance and bearing tags (spec scenario 2).
#[test]
fn ins_eqdist_on_meridian() {
    let mut ctx = Context::new(Config {
        threads: 0,
        ..Config::default()
    })
    .unwrap();

    ctx.store.put(Node::new(1, 0.0, 0.0));
    ctx.store.put(Node::new(2, 10.0 / 60.0, 0.0));
    ctx.store
        .put(tagged_way(10, vec![1, 2], &[("route", "leg")]));

    compile_rules(
        &mut ctx,
        vec![way_rule(
            1,
            "ins_eqdist:distance=2",
            &[("route", "leg")],
        )],
    )
    .unwrap();
    execute_rules(&mut ctx).unwrap();

    let w = ctx.store.way(10).unwrap();
    assert_eq!(w.refs.len(), 6);
    assert_eq!(w.refs[0], 1);
    assert_eq!(*w.refs.last().unwrap(), 2);

    for (i, &r) in w.refs[1..5].iter().enumerate() {
        let n = ctx.store.node(r).unwrap();
        let expect_lat = 2.0 / 60.0 * (i + 1) as f64;
        assert!(
            (n.lat - expect_lat).abs() < 1e-9,
            "node {i} at lat {}",
            n.lat
        );
        assert_eq!(
            n.attr.get_tag("distance"),
            Some(format!("{:.1}", 2.0 * (i + 1) as f64).as_str())
        );
        assert_eq!(n.attr.get_tag("bearing"), Some("0.0"));
    }

    // the original refs survive as a subsequence
    let ids: Vec<Id> = w.refs.clone();
    let mut iter = ids.iter();
    assert!(iter.any(|&r| r == 1));
    assert!(iter.any(|&r| r == 2));
}

/// `shape` with nodes=4 and radius=1mm produces a closed square centered
/// on the source node (spec scenario 3).
#[test]
fn shape_square_on_node() {
    let mut ctx = Context::new(Config {
        window: Some("0:0:100000".to_string()),
        threads: 0,
        ..Config::default()
    })
    .unwrap();

    ctx.store
        .put(tagged_node(1, 0.0, 0.0, &[("seamark:type", "buoy")]));

    compile_rules(
        &mut ctx,
        vec![node_rule(
            1,
            "shape:nodes=4;radius=1",
            &[("seamark:type", "buoy")],
        )],
    )
    .unwrap();
    execute_rules(&mut ctx).unwrap();

    let shapes: Vec<&Way> = ctx
        .store
        .iter(ObjKind::Way)
        .filter_map(|(_, o)| o.as_way())
        .collect();
    assert_eq!(shapes.len(), 1);
    let w = shapes[0];
    assert_eq!(w.refs.len(), 5);
    assert!(w.is_closed());
    // the source node's tags are carried over
    assert_eq!(w.attr.get_tag("seamark:type"), Some("buoy"));

    // centroid within a pixel of the source node
    let px = ctx.page.px_to_unit(1.0, Unit::Deg);
    let (mut clat, mut clon) = (0.0, 0.0);
    for &r in &w.refs[..4] {
        let n = ctx.store.node(r).unwrap();
        clat += n.lat;
        clon += n.lon;
    }
    assert!((clat / 4.0).abs() < px);
    assert!((clon / 4.0).abs() < px);

    // square of diagonal 2 mm: each node 1 mm from the center
    let r_deg = ctx.page.mm2lat(1.0);
    for &r in &w.refs[..4] {
        let n = ctx.store.node(r).unwrap();
        let d = coord_diff(&Coord::new(0.0, 0.0), &Coord::new(n.lat, n.lon)).dist;
        assert!((d - r_deg).abs() / r_deg < 1e-6);
    }
}

/// `zeroway` and `split` keep the reverse index consistent end to end.
#[test]
fn zeroway_and_split_via_rules() {
    let mut ctx = Context::new(Config {
        threads: 0,
        ..Config::default()
    })
    .unwrap();

    for (id, lat) in [(1, 0.0), (2, 1.0), (3, 2.0), (4, 3.0)] {
        ctx.store
            .put(tagged_node(id, lat, 0.0, &[("junction", "yes")]));
    }
    ctx.store.put(tagged_way(10, vec![1, 2, 3, 4], &[]));

    compile_rules(
        &mut ctx,
        vec![node_rule(1, "split", &[("junction", "yes")])],
    )
    .unwrap();
    execute_rules(&mut ctx).unwrap();

    // splitting at nodes 2 and 3 yields three ways; every way's refs are
    // mirrored in the reverse index
    assert_eq!(ctx.store.len(ObjKind::Way), 3);
    let way_ids: Vec<Id> = ctx.store.ids(ObjKind::Way);
    for wid in way_ids {
        let refs = ctx.store.way(wid).unwrap().refs.clone();
        assert!(refs.len() >= 2);
        for r in refs {
            assert!(
                ctx.store
                    .rev_list(ObjKind::Node, r)
                    .contains(&RevRef::way(wid)),
                "rev index misses way {wid} for node {r}"
            );
        }
    }
}

/// Cancellation mid-run: the current rule's `fini` still runs, later
/// passes are skipped, and the store can still be written out (spec
/// scenario 6).
#[test]
fn cancel_finalises_and_output_still_works() {
    let mut ctx = Context::new(Config {
        threads: 0,
        ..Config::default()
    })
    .unwrap();

    ctx.store
        .put(tagged_node(1, 0.0, 0.0, &[("light", "yes")]));
    ctx.store
        .put(tagged_node(2, 0.00001, 0.0, &[("light", "yes")]));

    // rule 1: mask does its work in fini; rule 2: exit cancels the run;
    // rule 3 (pass 2) must never run
    let mask = node_rule(1, "mask:distance=1", &[("light", "yes")]);
    let exit = node_rule(2, "exit", &[("light", "yes")]);
    let mut late = tagged_node(3, 0.0, 0.0, &[("light", "yes")]);
    late.attr.add_tag("_action_", "disable");
    late.attr.version = 2;

    compile_rules(&mut ctx, vec![mask, exit, late.into()]).unwrap();
    execute_rules(&mut ctx).unwrap();

    assert!(ctx.cancel.is_cancelled());
    // mask's fini ran before the cancellation
    assert_eq!(
        ctx.store.node(2).unwrap().attr.get_tag("osmchart:mask"),
        Some("yes")
    );
    // pass 2 was skipped
    assert!(ctx.store.node(1).unwrap().attr.visible);

    // the in-memory store is still written out
    let mut sink = VecSink::default();
    let n = save_all(&ctx.store, &mut sink).unwrap();
    assert!(n >= 2);
}

/// `inherit_tags` up and the reverse index build are driven by rule init.
#[test]
fn inherit_tags_builds_index_on_demand() {
    let mut ctx = Context::new(Config {
        threads: 0,
        ..Config::default()
    })
    .unwrap();

    ctx.store
        .put(tagged_node(1, 0.0, 0.0, &[("depth", "7.5")]));
    ctx.store.put(Node::new(2, 1.0, 0.0));
    ctx.store.put(tagged_way(10, vec![1, 2], &[]));

    compile_rules(
        &mut ctx,
        vec![node_rule(
            1,
            "inherit_tags:key=depth",
            &[("depth", "")],
        )],
    )
    .unwrap();
    assert!(ctx.need_index > 0, "inherit_tags must request the index");
    execute_rules(&mut ctx).unwrap();

    assert_eq!(ctx.store.way(10).unwrap().attr.get_tag("depth"), Some("7.5"));
}

/// The `sub` action runs subroutine-version rules over a way's nodes;
/// the top-level engine never runs them directly.
#[test]
fn sub_invokes_subroutine_rules() {
    let mut ctx = Context::new(Config {
        threads: 0,
        ..Config::default()
    })
    .unwrap();

    ctx.store.put(tagged_node(1, 0.0, 0.0, &[("k", "v")]));
    ctx.store.put(tagged_node(2, 1.0, 0.0, &[("k", "v")]));
    ctx.store.put(tagged_node(3, 2.0, 0.0, &[("other", "x")]));
    ctx.store
        .put(tagged_way(10, vec![1, 2], &[("route", "ferry")]));

    // the subroutine rule tags nodes; its version is above the cutoff
    let mut sr = tagged_node(100, 0.0, 0.0, &[("k", "v")]);
    sr.attr.add_tag("_action_", "strfmt:format=y;addtag=hit");
    sr.attr.version = SUBROUTINE_VERSION + 1;

    let caller = way_rule(
        101,
        &format!("sub:version={}", SUBROUTINE_VERSION + 1),
        &[("route", "ferry")],
    );

    compile_rules(&mut ctx, vec![sr.into(), caller]).unwrap();
    execute_rules(&mut ctx).unwrap();

    // way nodes were hit, the unrelated node was not
    assert_eq!(ctx.store.node(1).unwrap().attr.get_tag("hit"), Some("y"));
    assert_eq!(ctx.store.node(2).unwrap().attr.get_tag("hit"), Some("y"));
    assert_eq!(ctx.store.node(3).unwrap().attr.get_tag("hit"), None);
}
