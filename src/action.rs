//! Action resolution and dispatch.
//!
//! Actions are modeled as tagged variants, one per built-in name, each
//! holding its own state struct. The string from the `_action_` tag is
//! resolved to a variant at rule initialization. `ini`, `main` and `fini`
//! follow the engine's integer-code protocol.

use crossbeam_channel::Sender;
use log::warn;

use crate::coast::CatPoly;
use crate::context::Context;
use crate::elements::{Id, Object, ObjKind, Tag};
use crate::func;
use crate::grid::{GridAct, RulerAct};
use crate::page::PageGeom;
use crate::rules::{ActionSpec, Rule};
use crate::store::Store;

/// A store mutation computed by a worker thread. The engine applies edits
/// at drain time, which serializes all store writes of threaded rules.
#[derive(Debug)]
pub enum Edit {
    /// Append tags to an existing object.
    Tags {
        kind: ObjKind,
        id: Id,
        tags: Vec<Tag>,
    },
    /// Insert a new object.
    Put(Object),
}

pub(crate) fn apply_edit(store: &mut Store, edit: Edit) {
    match edit {
        Edit::Tags { kind, id, tags } => {
            if let Some(obj) = store.get_mut(kind, id) {
                obj.attr_mut().tags.extend(tags);
            }
        }
        Edit::Put(obj) => {
            store.put(obj);
        }
    }
}

/// The built-in actions.
pub enum Action {
    CatPoly(CatPoly),
    Grid(GridAct),
    Ruler(RulerAct),
    Enable(func::Visibility),
    Disable(func::Visibility),
    EnableRule(func::RuleSwitch),
    DisableRule(func::RuleSwitch),
    PolyArea(func::PolyArea),
    PolyCentroid(func::PolyCentroid),
    PolyLen(func::PolyLen),
    ReverseWay(func::ReverseWay),
    SetCw(func::SetDirection),
    SetCcw(func::SetDirection),
    Shape(func::Shape),
    InsEqdist(func::InsEqdist),
    DistMedian(func::DistMedian),
    Strfmt(func::Strfmt),
    Translate(func::Translate),
    Mask(func::Mask),
    Random(func::Random),
    Bearings(func::Bearings),
    InheritTags(func::InheritTags),
    Zeroway(func::Zeroway),
    Split(func::Split),
    Sub(func::Sub),
    SyncThreads,
    Exit,
    DelMatchTags(func::DelMatchTags),
}

impl Action {
    /// Maps an action name to its variant. Dynamically loaded action
    /// libraries are not supported; a rule referring to one is disabled
    /// with a warning.
    pub fn resolve(spec: &ActionSpec) -> Option<Action> {
        if let Some(lib) = &spec.lib {
            warn!(
                "dynamic action libraries are not supported ('{}@{lib}'), rule is disabled",
                spec.name
            );
            return None;
        }

        let action = match spec.name.as_str() {
            "cat_poly" => Action::CatPoly(CatPoly::default()),
            "grid" => Action::Grid(GridAct),
            "ruler" => Action::Ruler(RulerAct::default()),
            "enable" => Action::Enable(func::Visibility { visible: true }),
            "disable" => Action::Disable(func::Visibility { visible: false }),
            "enable_rule" => Action::EnableRule(func::RuleSwitch::new(true)),
            "disable_rule" => Action::DisableRule(func::RuleSwitch::new(false)),
            "poly_area" => Action::PolyArea(func::PolyArea),
            "poly_centroid" => Action::PolyCentroid(func::PolyCentroid),
            "poly_len" => Action::PolyLen(func::PolyLen),
            "reverse_way" => Action::ReverseWay(func::ReverseWay),
            "set_cw" => Action::SetCw(func::SetDirection { ccw: false }),
            "set_ccw" => Action::SetCcw(func::SetDirection { ccw: true }),
            "shape" => Action::Shape(func::Shape::default()),
            "ins_eqdist" => Action::InsEqdist(func::InsEqdist::default()),
            "dist_median" => Action::DistMedian(func::DistMedian),
            "strfmt" => Action::Strfmt(func::Strfmt::default()),
            "translate" => Action::Translate(func::Translate::default()),
            "mask" => Action::Mask(func::Mask::default()),
            "random" => Action::Random(func::Random::default()),
            "bearings" => Action::Bearings(func::Bearings),
            "inherit_tags" => Action::InheritTags(func::InheritTags::default()),
            "zeroway" => Action::Zeroway(func::Zeroway),
            "split" => Action::Split(func::Split),
            "sub" => Action::Sub(func::Sub::default()),
            "sync_threads" => Action::SyncThreads,
            "exit" => Action::Exit,
            "del_match_tags" => Action::DelMatchTags(func::DelMatchTags::default()),
            _ => {
                warn!("unknown action '{}', rule is disabled", spec.name);
                return None;
            }
        };
        Some(action)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Action::CatPoly(_) => "cat_poly",
            Action::Grid(_) => "grid",
            Action::Ruler(_) => "ruler",
            Action::Enable(_) => "enable",
            Action::Disable(_) => "disable",
            Action::EnableRule(_) => "enable_rule",
            Action::DisableRule(_) => "disable_rule",
            Action::PolyArea(_) => "poly_area",
            Action::PolyCentroid(_) => "poly_centroid",
            Action::PolyLen(_) => "poly_len",
            Action::ReverseWay(_) => "reverse_way",
            Action::SetCw(_) => "set_cw",
            Action::SetCcw(_) => "set_ccw",
            Action::Shape(_) => "shape",
            Action::InsEqdist(_) => "ins_eqdist",
            Action::DistMedian(_) => "dist_median",
            Action::Strfmt(_) => "strfmt",
            Action::Translate(_) => "translate",
            Action::Mask(_) => "mask",
            Action::Random(_) => "random",
            Action::Bearings(_) => "bearings",
            Action::InheritTags(_) => "inherit_tags",
            Action::Zeroway(_) => "zeroway",
            Action::Split(_) => "split",
            Action::Sub(_) => "sub",
            Action::SyncThreads => "sync_threads",
            Action::Exit => "exit",
            Action::DelMatchTags(_) => "del_match_tags",
        }
    }

    /// True if the action opts into worker-thread offload. Actions that
    /// insert objects or mutate shared state must stay unthreaded; their
    /// writes go through the engine instead.
    pub fn threaded(&self) -> bool {
        matches!(
            self,
            Action::PolyArea(_) | Action::PolyCentroid(_) | Action::PolyLen(_)
        )
    }

    pub fn ini(&mut self, ctx: &mut Context, rule: &Rule) -> i32 {
        match self {
            Action::CatPoly(a) => a.ini(ctx, rule),
            Action::Grid(a) => a.ini(ctx, rule),
            Action::Ruler(a) => a.ini(ctx, rule),
            Action::EnableRule(a) | Action::DisableRule(a) => a.ini(ctx, rule),
            Action::ReverseWay(a) => a.ini(ctx, rule),
            Action::Shape(a) => a.ini(ctx, rule),
            Action::InsEqdist(a) => a.ini(ctx, rule),
            Action::Strfmt(a) => a.ini(ctx, rule),
            Action::Translate(a) => a.ini(ctx, rule),
            Action::Mask(a) => a.ini(ctx, rule),
            Action::Random(a) => a.ini(ctx, rule),
            Action::InheritTags(a) => a.ini(ctx, rule),
            Action::Zeroway(a) => a.ini(ctx, rule),
            Action::Split(a) => a.ini(ctx, rule),
            Action::Sub(a) => a.ini(ctx, rule),
            _ => 0,
        }
    }

    pub fn main(&mut self, ctx: &mut Context, rule: &Rule, id: Id) -> i32 {
        match self {
            Action::CatPoly(a) => a.main(ctx, rule, id),
            Action::Grid(_) | Action::Ruler(_) => 0,
            Action::Enable(a) | Action::Disable(a) => a.main(ctx, rule, id),
            Action::EnableRule(a) | Action::DisableRule(a) => a.main(ctx, rule, id),
            Action::PolyArea(a) => a.main(ctx, rule, id),
            Action::PolyCentroid(a) => a.main(ctx, rule, id),
            Action::PolyLen(a) => a.main(ctx, rule, id),
            Action::ReverseWay(a) => a.main(ctx, rule, id),
            Action::SetCw(a) | Action::SetCcw(a) => a.main(ctx, rule, id),
            Action::Shape(a) => a.main(ctx, rule, id),
            Action::InsEqdist(a) => a.main(ctx, rule, id),
            Action::DistMedian(a) => a.main(ctx, rule, id),
            Action::Strfmt(a) => a.main(ctx, rule, id),
            Action::Translate(a) => a.main(ctx, rule, id),
            Action::Mask(a) => a.main(ctx, rule, id),
            Action::Random(a) => a.main(ctx, rule, id),
            Action::Bearings(a) => a.main(ctx, rule, id),
            Action::InheritTags(a) => a.main(ctx, rule, id),
            Action::Zeroway(a) => a.main(ctx, rule, id),
            Action::Split(a) => a.main(ctx, rule, id),
            Action::Sub(a) => a.main(ctx, rule, id),
            Action::SyncThreads => 0,
            Action::Exit => {
                ctx.cancel.cancel();
                0
            }
            Action::DelMatchTags(a) => a.main(ctx, rule, id),
        }
    }

    /// Worker-side entry point of threaded actions: read-only access plus
    /// an edit channel back to the engine.
    pub fn par_main(&self, store: &Store, page: &PageGeom, id: Id, out: &Sender<Edit>) {
        match self {
            Action::PolyArea(a) => a.par_main(store, page, id, out),
            Action::PolyCentroid(a) => a.par_main(store, page, id, out),
            Action::PolyLen(a) => a.par_main(store, page, id, out),
            _ => {}
        }
    }

    pub fn fini(&mut self, ctx: &mut Context, rule: &Rule) -> i32 {
        match self {
            Action::CatPoly(a) => a.fini(ctx, rule),
            Action::Mask(a) => a.fini(ctx, rule),
            Action::Sub(a) => a.fini(ctx, rule),
            Action::DelMatchTags(a) => a.fini(ctx, rule),
            _ => 0,
        }
    }
}
