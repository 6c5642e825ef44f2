//! The rendering context: object store, rule set, page geometry and
//! runtime configuration, passed explicitly through every call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::color::parse_color;
use crate::elements::{Id, ObjKind};
use crate::error::{new_config_error, Result};
use crate::page::{PageGeom, Projection};
use crate::rules::Rule;
use crate::tree::IdTree;
use crate::store::Store;

/// Sticky cancellation flag. The embedding program installs a SIGINT
/// handler tripping this flag; the engine polls it at every leaf visit and
/// ends the current pass cooperatively.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> CancelFlag {
        CancelFlag::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Runtime options of the engine (see the command line options of the
/// embedding program).
#[derive(Clone, Debug)]
pub struct Config {
    /// Geographic window: `lat:lon:size`, `lat:lon:lat:lon` or a 4-corner
    /// polygon. `size` is a scale, nautical miles (suffix `m`) or degrees
    /// (suffix `d`). Without a window all nodes are rendered.
    pub window: Option<String>,
    /// Page dimension: A0..A4, ANSI A-E, letter/legal/ledger or `WxH` in
    /// mm, optionally followed by `:angle` in degrees.
    pub page: String,
    pub dpi: u32,
    pub projection: Projection,
    /// Background colour: an X11 name or `#AARRGGBB`.
    pub bgcolor: String,
    /// Worker thread count for threaded rules. 0 disables threading.
    pub threads: usize,
    /// If false, nodes outside the page bbox skip rule dispatch.
    pub render_all_nodes: bool,
    /// Force building the reverse index even if no action requests it.
    pub need_index: bool,
    pub landscape: bool,
    /// Grid parameters `G[:T[:S]]` in arc-minutes.
    pub grid: Option<String>,
    /// Additional page border in mm.
    pub page_border: Option<f64>,
    pub title: String,
    /// Maximum number of matched objects batched to one worker.
    pub obj_max: usize,
    /// Interval of traversal progress log messages.
    pub progress_interval: Duration,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            window: None,
            page: "A3".to_string(),
            dpi: 300,
            projection: Projection::Mercator,
            bgcolor: "white".to_string(),
            threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            render_all_nodes: false,
            need_index: false,
            landscape: false,
            grid: None,
            page_border: None,
            title: String::new(),
            obj_max: 1024,
            progress_interval: Duration::from_secs(60),
        }
    }
}

/// The compiled rules, stored in tries of the same shape as the object
/// store, one per template kind.
#[derive(Default)]
pub struct RuleSet {
    trees: [IdTree<Rule>; 3],
}

impl RuleSet {
    pub fn new() -> RuleSet {
        RuleSet::default()
    }

    pub fn put(&mut self, rule: Rule) -> Option<Rule> {
        self.trees[rule.kind().index()].insert(rule.id(), rule)
    }

    pub fn get(&self, kind: ObjKind, id: Id) -> Option<&Rule> {
        self.trees[kind.index()].get(id)
    }

    pub fn get_mut(&mut self, kind: ObjKind, id: Id) -> Option<&mut Rule> {
        self.trees[kind.index()].get_mut(id)
    }

    /// Takes a rule out of the set for the duration of its execution, so
    /// that actions may access other rules through the context meanwhile.
    pub fn remove(&mut self, kind: ObjKind, id: Id) -> Option<Rule> {
        self.trees[kind.index()].remove(id)
    }

    pub fn ids(&self, kind: ObjKind) -> Vec<Id> {
        self.trees[kind.index()].ids()
    }

    pub fn len(&self) -> usize {
        self.trees.iter().map(IdTree::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The distinct rule versions in ascending order, limited to those
    /// below `cutoff` (versions above the cutoff are subroutine rules).
    pub fn versions(&self, cutoff: u32) -> Vec<u32> {
        let mut vs: Vec<u32> = self
            .trees
            .iter()
            .flat_map(|t| t.iter())
            .map(|(_, r)| r.version())
            .filter(|&v| v < cutoff)
            .collect();
        vs.sort_unstable();
        vs.dedup();
        vs
    }
}

/// Everything the engine and the actions operate on.
pub struct Context {
    pub store: Store,
    pub rules: RuleSet,
    pub page: PageGeom,
    pub cfg: Config,
    pub cancel: CancelFlag,
    /// Incremented by actions that need the reverse index during `ini`.
    pub need_index: u32,
    pub index_built: bool,
    /// Parsed background colour (ARGB, 7 bit alpha).
    pub bgcolor: u32,
    /// Page corner machinery of the polygon closer, created on first use.
    pub corners: Option<crate::coast::CornerPoints>,
    pub(crate) pool: Option<rayon::ThreadPool>,
}

impl Context {
    /// Sets up a context: page geometry is derived from the configured
    /// window and page, the worker pool is created.
    pub fn new(cfg: Config) -> Result<Context> {
        let (mut page, render_all_forced) = PageGeom::new(
            cfg.window.as_deref(),
            &cfg.page,
            cfg.projection,
            cfg.dpi,
            cfg.landscape,
        )?;
        let mut cfg = cfg;
        if render_all_forced {
            cfg.render_all_nodes = true;
        }
        if let Some(border) = cfg.page_border {
            page.add_page_border(border);
        }
        let bgcolor = parse_color(&cfg.bgcolor);

        let pool = if cfg.threads > 0 {
            Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(cfg.threads)
                    .build()
                    .map_err(|e| new_config_error(format!("cannot create thread pool: {e}")))?,
            )
        } else {
            None
        };

        Ok(Context {
            store: Store::new(),
            rules: RuleSet::new(),
            page,
            cfg,
            cancel: CancelFlag::new(),
            need_index: 0,
            index_built: false,
            bgcolor,
            corners: None,
            pool,
        })
    }
}
