//! The execution engine: rule compilation, pass scheduling and per-object
//! dispatch.
//!
//! Rules carry a version (the OSM version field of the rule object,
//! co-opted as pass number). The engine collects the distinct versions in
//! ascending order and runs one pass per version; versions at or above
//! [`SUBROUTINE_VERSION`] are reserved for rules invoked by the `sub`
//! action. Within a pass the rule tree is traversed relations first, then
//! ways, then nodes; for each rule the object tree of the matching kind is
//! traversed in trie order.

use std::time::Instant;

use log::{debug, error, info, warn};

use crate::action::{apply_edit, Action};
use crate::context::Context;
use crate::elements::{Id, Object, ObjKind};
use crate::error::{new_error, ErrorKind, Result};
use crate::geo::Coord;
use crate::rules::Rule;

/// Rule versions at or above this value are subroutine rules, not executed
/// by the top-level engine.
pub const SUBROUTINE_VERSION: u32 = 0x10000;

/// Exit code when no rule matched any object.
pub const EXIT_NORULES: i32 = 128;
/// Exit code when the input contained no data.
pub const EXIT_NODATA: i32 = 129;

/// Reasons the engine skipped an object for a rule.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SkipReason {
    /// The node is outside of the area to render.
    OutOfBbox,
    /// The rule applies only to closed ways.
    WayOpen,
    /// The rule applies only to open ways.
    WayClosed,
    /// The tags of the rule do not match the object.
    NoMatch,
    /// The object is invisible.
    Invisible,
    /// The run-once rule was already executed.
    Executed,
}

/// Compiles rule objects into the context's rule set, resolves their
/// actions and runs each action's `ini`. A negative `ini` result is fatal;
/// a positive one disables the rule.
pub fn compile_rules(ctx: &mut Context, rule_objs: Vec<Object>) -> Result<()> {
    for obj in rule_objs {
        let mut rule = Rule::compile(obj);
        if let Some(spec) = &rule.spec {
            rule.action = Action::resolve(spec);
        }
        call_ini(ctx, &mut rule)?;
        ctx.rules.put(rule);
    }
    Ok(())
}

pub(crate) fn call_ini(ctx: &mut Context, rule: &mut Rule) -> Result<()> {
    let Some(mut act) = rule.action.take() else {
        return Ok(());
    };
    debug!("calling {}_ini()", act.name());
    let e = act.ini(ctx, rule);
    if e < 0 {
        error!("{}_ini() failed: {e}, exiting", act.name());
        return Err(new_error(ErrorKind::Rule {
            rule_id: rule.id(),
            action: act.name().to_string(),
            code: e,
        }));
    }
    if e > 0 {
        warn!("{}_ini() failed: {e}, rule will be ignored", act.name());
        // dropping the action clears main and fini
        return Ok(());
    }
    rule.action = Some(act);
    rule.flags.finished = false;
    Ok(())
}

pub(crate) fn call_fini(ctx: &mut Context, rule: &mut Rule) -> i32 {
    if rule.flags.finished {
        return 0;
    }
    let Some(mut act) = rule.action.take() else {
        return 0;
    };
    info!("calling rule {:#018x}, {}_fini()", rule.id(), act.name());
    let e = act.fini(ctx, rule);
    if e != 0 {
        debug!("{}_fini() returned {e}", act.name());
    }
    rule.action = Some(act);
    rule.flags.finished = true;
    e
}

/// Builds the reverse index if any rule requested it during `ini` (or the
/// configuration forces it), then runs all passes in ascending version
/// order. A cancelled pass ends cleanly; subsequent passes are skipped.
pub fn execute_rules(ctx: &mut Context) -> Result<()> {
    if (ctx.cfg.need_index || ctx.need_index > 0) && !ctx.index_built {
        ctx.store.build_rev_index();
        ctx.index_built = true;
    }

    for ver in ctx.rules.versions(SUBROUTINE_VERSION) {
        info!("*** pass {ver} ***");
        execute_pass(ctx, ver)?;
        if ctx.cancel.is_cancelled() {
            info!("cancelled, skipping remaining passes");
            break;
        }
    }
    Ok(())
}

/// Runs one pass: all rules of the given version, relations first, then
/// ways, then nodes.
pub fn execute_pass(ctx: &mut Context, ver: u32) -> Result<()> {
    for kind in [ObjKind::Relation, ObjKind::Way, ObjKind::Node] {
        info!("{}s...", kind.name());
        for rid in ctx.rules.ids(kind) {
            if ctx.cancel.is_cancelled() {
                return Ok(());
            }
            let Some(mut rule) = ctx.rules.remove(kind, rid) else {
                continue;
            };
            let res = apply_smrule(ctx, &mut rule, ver);
            ctx.rules.put(rule);
            res?;
        }
    }
    Ok(())
}

fn apply_smrule(ctx: &mut Context, rule: &mut Rule, ver: u32) -> Result<()> {
    if rule.version() != ver {
        return Ok(());
    }
    if !rule.template.attr().visible {
        info!("ignoring invisible rule {:#018x}", rule.id());
        return Ok(());
    }
    if rule.action.is_none() {
        return Ok(());
    }

    if rule.flags.finished && !rule.flags.exec_once {
        debug!("action is reentered");
        call_ini(ctx, rule)?;
        if rule.action.is_none() {
            return Ok(());
        }
    }

    info!(
        "applying rule id {:#x} '{}'",
        rule.id(),
        rule.action_name()
    );

    let threaded = rule
        .action
        .as_ref()
        .map(Action::threaded)
        .unwrap_or(false)
        && ctx.pool.is_some();
    if threaded {
        apply_threaded(ctx, rule);
    } else {
        apply_sequential(ctx, rule);
    }

    call_fini(ctx, rule);
    Ok(())
}

fn apply_sequential(ctx: &mut Context, rule: &mut Rule) {
    let ids = ctx.store.ids(rule.kind());
    let total = ids.len();
    let mut tick = Instant::now();
    let mut cancel_logged = false;

    for (n, &id) in ids.iter().enumerate() {
        if ctx.cancel.is_cancelled() {
            if !cancel_logged {
                cancel_logged = true;
                info!("cancel caught, breaking rule dispatch");
            }
            break;
        }
        if tick.elapsed() >= ctx.cfg.progress_interval {
            info!(
                "traverse({}), {n} of {total} objects, {:.1}%",
                rule.kind(),
                100.0 * n as f64 / total.max(1) as f64
            );
            tick = Instant::now();
        }
        apply_rule_obj(ctx, rule, id);
    }
}

/// Threaded dispatch: matched object ids are batched and fanned onto the
/// worker pool; workers have read-only access and send edits back over a
/// channel which the engine applies after the drain. This preserves the
/// happens-before from one rule's drain to the next rule's `ini` and
/// serializes all store writes.
fn apply_threaded(ctx: &mut Context, rule: &mut Rule) {
    let ids: Vec<Id> = ctx
        .store
        .ids(rule.kind())
        .into_iter()
        .filter(|&id| check_rule(ctx, rule, id).is_ok())
        .collect();
    if ids.is_empty() {
        return;
    }
    rule.flags.executed = true;

    let Some(act) = rule.action.take() else { return };
    let (tx, rx) = crossbeam_channel::unbounded();
    let obj_max = ctx.cfg.obj_max.max(1);

    {
        let store = &ctx.store;
        let page = &ctx.page;
        let cancel = &ctx.cancel;
        let act = &act;
        if let Some(pool) = ctx.pool.as_ref() {
            pool.scope(|s| {
                for batch in ids.chunks(obj_max) {
                    let tx = tx.clone();
                    s.spawn(move |_| {
                        for &id in batch {
                            if cancel.is_cancelled() {
                                return;
                            }
                            act.par_main(store, page, id, &tx);
                        }
                    });
                }
            });
        }
    }
    drop(tx);

    debug!("threads ready, applying edits");
    while let Ok(edit) = rx.try_recv() {
        apply_edit(&mut ctx.store, edit);
    }

    rule.action = Some(act);
}

/// The skip ladder of [`apply_rule_obj`], in the original check order.
fn check_rule(ctx: &Context, rule: &Rule, id: Id) -> std::result::Result<(), SkipReason> {
    let Some(obj) = ctx.store.get(rule.kind(), id) else {
        // the object vanished while the pass was running
        return Err(SkipReason::NoMatch);
    };

    // render only nodes which are on the page
    if !ctx.cfg.render_all_nodes {
        if let Object::Node(n) = obj {
            if !ctx.page.is_on_page(&Coord::new(n.lat, n.lon)) {
                return Err(SkipReason::OutOfBbox);
            }
        }
    }

    // check if a way rule applies to areas (closed ways) or lines (open
    // ways) only
    if rule.kind() == ObjKind::Way {
        if let Object::Way(w) = obj {
            if rule.flags.closed_way {
                if !w.refs.is_empty() && w.refs.first() != w.refs.last() {
                    return Err(SkipReason::WayOpen);
                }
            } else if rule.flags.open_way
                && !w.refs.is_empty()
                && w.refs.first() == w.refs.last()
            {
                return Err(SkipReason::WayClosed);
            }
        }
    }

    // check if the tags of the rule match the tags of the object
    if !rule.tags_match(obj) {
        return Err(SkipReason::NoMatch);
    }

    if !obj.attr().visible {
        return Err(SkipReason::Invisible);
    }

    if rule.flags.exec_once && rule.flags.executed {
        return Err(SkipReason::Executed);
    }

    Ok(())
}

/// Matches one object against a rule and invokes the action's main
/// function if all checks pass. Returns the main result, or None with the
/// object skipped.
pub(crate) fn apply_rule_obj(ctx: &mut Context, rule: &mut Rule, id: Id) -> Option<i32> {
    check_rule(ctx, rule, id).ok()?;

    let mut act = rule.action.take()?;
    let e = act.main(ctx, rule, id);
    rule.action = Some(act);
    rule.flags.executed = true;

    if e != 0 {
        debug!("{}_main() returned {e}", rule.action_name());
    }
    Some(e)
}
