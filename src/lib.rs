/*!
A rule-driven transformation and chart rendering engine for OpenStreetMap
data.

The engine ingests a bounded OSM dataset plus a rule set (itself expressed
as OSM objects), matches each rule against each data object and applies an
action — which may tag, fabricate, split, merge, close, geometrically
transform or graphically render objects onto a 2-D chart surface.

A rule is an ordinary OSM object carrying an `_action_` tag such as
`cat_poly:vcdist=0.5` or `shape:nodes=4;radius=1`; its remaining tags form
the match template. Template values may be regular expressions (`/…/`),
numeric comparisons (`]…[`, `[…]`), inverted (`!…!`) or negated (`~…~`).

## Example: disable all residential roads

```
use osmchart::*;

fn main() -> Result<()> {
    let mut ctx = Context::new(Config::default())?;

    // the dataset: two nodes and two ways
    ctx.store.put(Node::new(1, 45.0, 15.0));
    ctx.store.put(Node::new(2, 45.1, 15.1));
    let mut residential = Way::new(10, vec![1, 2]);
    residential.attr.add_tag("highway", "residential");
    ctx.store.put(residential);
    let mut primary = Way::new(11, vec![1, 2]);
    primary.attr.add_tag("highway", "primary");
    ctx.store.put(primary);

    // the rule set: one way rule matching via regex
    let mut rule = Way::new(1, vec![]);
    rule.attr.add_tag("_action_", "disable");
    rule.attr.add_tag("highway", "/residential|living_street/");

    compile_rules(&mut ctx, vec![rule.into()])?;
    execute_rules(&mut ctx)?;

    assert!(!ctx.store.way(10).unwrap().attr.visible);
    assert!(ctx.store.way(11).unwrap().attr.visible);
    Ok(())
}
```
*/

pub use crate::action::{Action, Edit};
pub use crate::context::{CancelFlag, Config, Context, RuleSet};
pub use crate::core::{
    compile_rules, execute_pass, execute_rules, EXIT_NODATA, EXIT_NORULES, SUBROUTINE_VERSION,
};
pub use crate::elements::{
    Attr, Id, Member, Node, Object, ObjKind, Relation, RoleId, RoleTable, Tag, Way,
};
pub use crate::error::{Error, ErrorKind, IndexError, Result};
pub use crate::geo::{coord_diff, dest_coord, Bbox, Coord, PolarCoord};
pub use crate::index::{read_index, write_index};
pub use crate::io::{load, save_all, Canvas, NullCanvas, ObjectSink, ObjectSource, VecSink,
    VecSource};
pub use crate::page::{PageGeom, Projection, Unit, Value};
pub use crate::rules::{ActionSpec, Params, Pattern, Rule, TagMatch, TagTemplate};
pub use crate::store::{RevRef, Store};
pub use crate::tree::IdTree;

pub mod action;
pub mod adams;
pub mod coast;
pub mod color;
pub mod context;
pub mod core;
pub mod elements;
mod error;
pub mod func;
pub mod geo;
pub mod grid;
pub mod index;
pub mod io;
pub mod page;
pub mod rules;
pub mod store;
pub mod tree;
