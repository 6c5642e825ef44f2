//! Rule parsing and tag matching.
//!
//! A rule is an ordinary OSM object carrying an `_action_` tag. The value
//! is parsed as `funcname[@lib][:key=val;key=val;...]`; the remaining tags
//! become the match template, one predicate pair (key, value) per tag.
//!
//! A predicate string may be wrapped to select a special comparison:
//! `/…/` for a regular expression, `]…[` for numeric greater-than, `[…]`
//! for numeric less-than, `!…!` for inversion of the result, and `~…~` for
//! NOT ("this tag must not exist").

use log::{debug, warn};

use crate::action::Action;
use crate::elements::{Object, ObjKind, Tag};

/// Comparison applied by one predicate.
#[derive(Debug)]
pub enum MatchKind {
    Literal,
    Regex(Box<regex::Regex>),
    Gt(f64),
    Lt(f64),
}

/// A parsed match predicate for one side (key or value) of a template tag.
#[derive(Debug)]
pub struct Pattern {
    pub text: String,
    pub kind: MatchKind,
    /// Negates the final comparison result.
    pub invert: bool,
    /// NOT semantics: a directly matching tag rejects the whole object;
    /// an object without any matching tag matches vacuously.
    pub not: bool,
}

/// Parses the leading part of a string as a double, like `strtod`.
/// Returns 0 if no number can be parsed.
pub fn tod(s: &str) -> f64 {
    let s = s.trim_start();
    let mut end = 0;
    let mut seen_digit = false;
    for (i, c) in s.char_indices() {
        match c {
            '0'..='9' => {
                seen_digit = true;
                end = i + 1;
            }
            '.' | '-' | '+' => end = i + 1,
            'e' | 'E' if seen_digit => end = i + 1,
            _ => break,
        }
    }
    s[..end].parse().unwrap_or(0.0)
}

impl Pattern {
    /// Parses a predicate string. If a special condition cannot be parsed
    /// properly (the regex fails to compile, the number is unreadable), the
    /// predicate is downgraded to a literal compare and the rule keeps
    /// running.
    pub fn parse(s: &str) -> Pattern {
        let mut text = s;
        let mut invert = false;
        let mut not = false;

        if text.len() > 2 {
            if text.starts_with('!') && text.ends_with('!') {
                text = &text[1..text.len() - 1];
                invert = true;
            } else if text.starts_with('~') && text.ends_with('~') {
                text = &text[1..text.len() - 1];
                not = true;
            }
        }

        let mut kind = MatchKind::Literal;
        if text.len() > 2 {
            if text.starts_with('/') && text.ends_with('/') {
                text = &text[1..text.len() - 1];
                debug!("seems to be regex: '{text}'");
                match regex::Regex::new(text) {
                    Ok(re) => kind = MatchKind::Regex(Box::new(re)),
                    Err(e) => {
                        warn!("failed to compile regex '{text}': {e}");
                    }
                }
            } else if text.starts_with(']') && text.ends_with('[') {
                text = &text[1..text.len() - 1];
                match text.trim().parse::<f64>() {
                    Ok(v) => kind = MatchKind::Gt(v),
                    Err(_) => {
                        warn!("failed to convert value of GT rule '{text}'");
                    }
                }
            } else if text.starts_with('[') && text.ends_with(']') {
                text = &text[1..text.len() - 1];
                match text.trim().parse::<f64>() {
                    Ok(v) => kind = MatchKind::Lt(v),
                    Err(_) => {
                        warn!("failed to convert value of LT rule '{text}'");
                    }
                }
            }
        }

        Pattern {
            text: text.to_string(),
            kind,
            invert,
            not,
        }
    }

    /// An empty predicate matches anything; the inversion flags do not
    /// apply to it.
    pub fn is_any(&self) -> bool {
        self.text.is_empty() && matches!(self.kind, MatchKind::Literal)
    }

    /// Matches a single string against this predicate. NOT handling lives
    /// in [`match_tags`]; this only applies the comparison and INVERT.
    pub fn matches(&self, s: &str) -> bool {
        let raw = match &self.kind {
            MatchKind::Literal => s == self.text,
            MatchKind::Regex(re) => re.is_match(s),
            MatchKind::Gt(v) => tod(s) > *v,
            MatchKind::Lt(v) => tod(s) < *v,
        };
        raw != self.invert
    }
}

/// The compiled predicate pair of one template tag.
#[derive(Debug)]
pub struct TagTemplate {
    pub k: Pattern,
    pub v: Pattern,
}

impl TagTemplate {
    pub fn literal(key: &str, val: &str) -> TagTemplate {
        TagTemplate {
            k: Pattern::parse(key),
            v: Pattern::parse(val),
        }
    }
}

/// Result of matching one template tag against an object's tag list.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TagMatch {
    /// Index of the matching tag.
    At(usize),
    /// A NOT predicate matched because no tag matched directly.
    Vacuous,
    /// No tag matches.
    None,
}

impl TagMatch {
    pub fn is_match(self) -> bool {
        !matches!(self, TagMatch::None)
    }
}

/// Finds some tag of the object matching the template's key and value
/// predicates. A template tag carrying NOT (on either side) rejects the
/// object as soon as a tag matches it directly, and matches vacuously if
/// none does — this is how "this tag must not exist" is expressed.
pub fn match_tags(tags: &[Tag], tmpl: &TagTemplate) -> TagMatch {
    let not = tmpl.k.not || tmpl.v.not;

    for (i, t) in tags.iter().enumerate() {
        let kmatch = tmpl.k.is_any() || tmpl.k.matches(&t.k);
        let vmatch = tmpl.v.is_any() || tmpl.v.matches(&t.v);

        if kmatch && vmatch {
            return if not { TagMatch::None } else { TagMatch::At(i) };
        }
    }

    if not {
        return TagMatch::Vacuous;
    }

    TagMatch::None
}

/// Convenience literal tag lookup: the index of the first tag whose key
/// equals `k` and, if given, whose value equals `v`.
pub fn match_attr(tags: &[Tag], k: Option<&str>, v: Option<&str>) -> Option<usize> {
    tags.iter().position(|t| {
        k.map(|k| t.k == k).unwrap_or(true) && v.map(|v| t.v == v).unwrap_or(true)
    })
}

/// One action parameter. Key-only parameters keep `val == None`; for
/// `key=val` pairs the numeric interpretation is pre-computed with its
/// conversion state.
#[derive(Clone, Debug)]
pub struct Param {
    pub key: String,
    pub val: Option<String>,
    pub dval: f64,
    pub conv_error: bool,
}

/// The named parameter list of an action, in declaration order. Duplicate
/// keys are legal (e.g. several `key=` parameters of `inherit_tags`).
#[derive(Clone, Debug, Default)]
pub struct Params(pub Vec<Param>);

impl Params {
    /// The string value of the first parameter with the given key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|p| p.key == key)
            .and_then(|p| p.val.as_deref())
    }

    /// The numeric value of the first parameter with the given key.
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.0
            .iter()
            .find(|p| p.key == key && p.val.is_some())
            .map(|p| p.dval)
    }

    /// Numeric value plus the conversion-error state.
    pub fn get_f64_err(&self, key: &str) -> Option<(f64, bool)> {
        self.0
            .iter()
            .find(|p| p.key == key && p.val.is_some())
            .map(|p| (p.dval, p.conv_error))
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|s| {
            let s = s.trim();
            if let Some(hex) = s.strip_prefix("0x") {
                i64::from_str_radix(hex, 16).ok()
            } else {
                s.parse().ok()
            }
        })
    }

    /// True if such a parameter exists and holds '1', 'yes' or 'true'.
    pub fn get_bool(&self, key: &str) -> bool {
        match self.0.iter().find(|p| p.key == key && p.val.is_some()) {
            None => false,
            Some(p) => {
                let s = p.val.as_deref().unwrap_or("");
                p.dval != 0.0 || s.eq_ignore_ascii_case("yes") || s.eq_ignore_ascii_case("true")
            }
        }
    }

    /// All string values of parameters with the given key.
    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.0
            .iter()
            .filter(move |p| p.key == key)
            .filter_map(|p| p.val.as_deref())
    }
}

/// Tokenizes one string out of `chars` starting at `*pos`. The string may
/// be delimited by `'` or `"` or by any character in `delim`. Characters
/// escaped by a backslash are unescaped where necessary (the delimiters,
/// the active quote, `\n` and the backslash itself). Unquoted strings are
/// trimmed. Returns the token and the character that delimited it.
fn parse_string(chars: &[char], pos: &mut usize, delim: &[char]) -> Option<(String, char)> {
    while *pos < chars.len() && chars[*pos].is_whitespace() {
        *pos += 1;
    }
    if *pos >= chars.len() {
        return None;
    }

    let sep = match chars[*pos] {
        c @ ('\'' | '"') => {
            *pos += 1;
            Some(c)
        }
        _ => None,
    };

    let mut out = String::new();
    while *pos < chars.len() {
        let c = chars[*pos];
        if sep.is_none() && delim.contains(&c) {
            break;
        }
        if Some(c) == sep {
            break;
        }
        if c == '\\' && *pos + 1 < chars.len() {
            let n = chars[*pos + 1];
            if delim.contains(&n) || n == 'n' || n == '\\' || Some(n) == sep {
                *pos += 2;
                out.push(if n == 'n' { '\n' } else { n });
                continue;
            }
        }
        out.push(c);
        *pos += 1;
    }

    let nextchar = if *pos >= chars.len() {
        '\0'
    } else {
        let c = chars[*pos];
        *pos += 1;
        c
    };

    if sep.is_none() {
        let trimmed = out.trim_end().len();
        out.truncate(trimmed);
    }

    Some((out, nextchar))
}

/// Parses a parameter string of the format `key1=val1;key2=val2;...` into a
/// [`Params`] list. Keys and values may be quoted with `'` or `"`; special
/// characters can be escaped with a backslash.
pub fn parse_params(parm: &str) -> Params {
    let chars: Vec<char> = parm.chars().collect();
    let mut pos = 0;
    let mut params = Vec::new();

    while let Some((key, c)) = parse_string(&chars, &mut pos, &['=', ';']) {
        let mut param = Param {
            key,
            val: None,
            dval: 0.0,
            conv_error: false,
        };
        if c == '=' {
            if let Some((val, _)) = parse_string(&chars, &mut pos, &[';']) {
                param.dval = tod(&val);
                param.conv_error = !val
                    .trim_start()
                    .starts_with(|c: char| c.is_ascii_digit() || c == '-' || c == '+' || c == '.');
                param.val = Some(val);
            }
        }
        params.push(param);
    }

    Params(params)
}

/// The parsed `_action_` descriptor: function name, optional shared-object
/// reference and the parameter list.
#[derive(Clone, Debug)]
pub struct ActionSpec {
    pub name: String,
    pub lib: Option<String>,
    pub params: Params,
}

impl ActionSpec {
    /// Parses `funcname[@lib][:key=val;key=val;...]`.
    pub fn parse(s: &str) -> Option<ActionSpec> {
        let s = s.trim();
        if s.is_empty() {
            warn!("empty _action_ value");
            return None;
        }

        let split = s.find(['@', ':']);
        let (name, lib, parm) = match split {
            None => (s, None, None),
            Some(i) if s.as_bytes()[i] == b'@' => {
                let name = &s[..i];
                let rest = &s[i + 1..];
                match rest.find(':') {
                    Some(j) => (name, Some(&rest[..j]), Some(&rest[j + 1..])),
                    None => (name, Some(rest), None),
                }
            }
            Some(i) => (&s[..i], None, Some(&s[i + 1..])),
        };

        Some(ActionSpec {
            name: name.to_string(),
            lib: lib.map(str::to_string),
            params: parm.map(parse_params).unwrap_or_default(),
        })
    }
}

/// Execution state flags of a rule.
#[derive(Clone, Copy, Debug, Default)]
pub struct RuleFlags {
    /// The rule applies to closed ways only.
    pub closed_way: bool,
    /// The rule applies to open ways only.
    pub open_way: bool,
    /// Execute the rule's main function at most once.
    pub exec_once: bool,
    /// The main function has been executed at least once.
    pub executed: bool,
    /// `fini` has run; `ini` is re-run if the rule is entered again.
    pub finished: bool,
}

/// A compiled rule: the template object (with the `_action_` tag removed),
/// the per-tag match predicates, the parsed action descriptor and the
/// resolved action state.
pub struct Rule {
    pub template: Object,
    pub predicates: Vec<TagTemplate>,
    pub spec: Option<ActionSpec>,
    pub action: Option<Action>,
    pub flags: RuleFlags,
}

impl Rule {
    /// Compiles a rule object. The action is resolved later, at rule
    /// initialization; objects without an `_action_` tag become
    /// template-only rules.
    pub fn compile(mut template: Object) -> Rule {
        debug!(
            "initializing rule {} ({:#018x})",
            template.id(),
            template.id()
        );

        let attr = template.attr_mut();
        let spec = match attr.find_tag("_action_") {
            Some(i) => {
                let tag = attr.tags.swap_remove(i);
                ActionSpec::parse(&tag.v)
            }
            None => {
                debug!(
                    "rule {} has no action, it may be used as template",
                    attr.id
                );
                None
            }
        };

        let predicates = template
            .tags()
            .iter()
            .map(|t| TagTemplate::literal(&t.k, &t.v))
            .collect();

        let mut flags = RuleFlags::default();
        if let Object::Way(w) = &template {
            if !w.refs.is_empty() {
                if w.refs.first() == w.refs.last() {
                    flags.closed_way = true;
                } else {
                    flags.open_way = true;
                }
                debug!(
                    "way_type = {}",
                    if flags.closed_way { "closed" } else { "open" }
                );
            }
        }
        if let Some(spec) = &spec {
            flags.exec_once = spec.params.get_bool("once");
        }

        Rule {
            template,
            predicates,
            spec,
            action: None,
            flags,
        }
    }

    pub fn id(&self) -> i64 {
        self.template.id()
    }

    pub fn kind(&self) -> ObjKind {
        self.template.kind()
    }

    /// The rule pass this rule belongs to.
    pub fn version(&self) -> u32 {
        self.template.attr().version
    }

    pub fn action_name(&self) -> &str {
        self.spec.as_ref().map(|s| s.name.as_str()).unwrap_or("")
    }

    pub fn params(&self) -> &Params {
        static EMPTY: Params = Params(Vec::new());
        self.spec.as_ref().map(|s| &s.params).unwrap_or(&EMPTY)
    }

    /// Tests the object's tags against all template predicates.
    pub fn tags_match(&self, obj: &Object) -> bool {
        self.predicates
            .iter()
            .all(|t| match_tags(obj.tags(), t).is_match())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elements::Way;

    fn tags(pairs: &[(&str, &str)]) -> Vec<Tag> {
        pairs.iter().map(|&(k, v)| Tag::new(k, v)).collect()
    }

    #[test]
    fn test_literal_predicate() {
        let t = TagTemplate::literal("natural", "coastline");
        assert_eq!(
            match_tags(&tags(&[("natural", "coastline")]), &t),
            TagMatch::At(0)
        );
        assert_eq!(match_tags(&tags(&[("natural", "water")]), &t), TagMatch::None);
    }

    #[test]
    fn test_empty_matches_anything() {
        let t = TagTemplate::literal("natural", "");
        assert_eq!(
            match_tags(&tags(&[("highway", "x"), ("natural", "water")]), &t),
            TagMatch::At(1)
        );
    }

    #[test]
    fn test_regex_predicate() {
        let t = TagTemplate::literal("highway", "/residential|living_street/");
        assert!(match_tags(&tags(&[("highway", "residential")]), &t).is_match());
        assert!(match_tags(&tags(&[("highway", "living_street")]), &t).is_match());
        assert!(!match_tags(&tags(&[("highway", "primary")]), &t).is_match());
    }

    #[test]
    fn test_numeric_predicates() {
        let gt = TagTemplate::literal("ele", "]100[");
        assert!(match_tags(&tags(&[("ele", "150")]), &gt).is_match());
        assert!(!match_tags(&tags(&[("ele", "50")]), &gt).is_match());
        // unparseable values compare as 0
        assert!(!match_tags(&tags(&[("ele", "high")]), &gt).is_match());

        let lt = TagTemplate::literal("ele", "[100]");
        assert!(match_tags(&tags(&[("ele", "50")]), &lt).is_match());
        assert!(!match_tags(&tags(&[("ele", "150")]), &lt).is_match());
    }

    #[test]
    fn test_invert_complement() {
        let plain = TagTemplate::literal("highway", "/res.*/");
        let inv = TagTemplate::literal("highway", "!/res.*/!");
        for val in ["residential", "primary", "resting"] {
            let tl = tags(&[("highway", val)]);
            assert_ne!(
                match_tags(&tl, &plain).is_match(),
                match_tags(&tl, &inv).is_match(),
                "value {val}"
            );
        }
    }

    #[test]
    fn test_not_predicate() {
        // building=~*~ style: value must not match anything, i.e. the tag
        // must not exist with any value
        let t = TagTemplate::literal("name", "~~~");
        assert_eq!(
            match_tags(&tags(&[("building", "yes")]), &t),
            TagMatch::Vacuous
        );
        assert_eq!(
            match_tags(&tags(&[("building", "yes"), ("name", "foo")]), &t),
            TagMatch::None
        );
    }

    #[test]
    fn test_bad_regex_downgrades() {
        let p = Pattern::parse("/([/");
        assert!(matches!(p.kind, MatchKind::Literal));
        assert_eq!(p.text, "([");
    }

    #[test]
    fn test_parse_params() {
        let p = parse_params("file=out.osm;vcdist=2.5;flag");
        assert_eq!(p.get("file"), Some("out.osm"));
        assert_eq!(p.get_f64("vcdist"), Some(2.5));
        assert_eq!(p.get("flag"), None);
        assert!(!p.get_bool("flag"));
    }

    #[test]
    fn test_parse_params_quoting() {
        let p = parse_params("format='a;b=c';key=\"x \\\"y\\\"\";n=a\\nb");
        assert_eq!(p.get("format"), Some("a;b=c"));
        assert_eq!(p.get("key"), Some("x \"y\""));
        assert_eq!(p.get("n"), Some("a\nb"));
    }

    #[test]
    fn test_action_spec() {
        let a = ActionSpec::parse("cat_poly:vcdist=1;no_corner=1").unwrap();
        assert_eq!(a.name, "cat_poly");
        assert!(a.lib.is_none());
        assert!(a.params.get_bool("no_corner"));

        let a = ActionSpec::parse("myfunc@libfoo.so:x=1").unwrap();
        assert_eq!(a.name, "myfunc");
        assert_eq!(a.lib.as_deref(), Some("libfoo.so"));

        let a = ActionSpec::parse("enable").unwrap();
        assert_eq!(a.name, "enable");
        assert!(a.params.0.is_empty());
    }

    #[test]
    fn test_rule_compile_way_flags() {
        let mut w = Way::new(1, vec![1, 2, 3, 1]);
        w.attr.add_tag("_action_", "enable");
        w.attr.add_tag("natural", "coastline");
        let r = Rule::compile(w.into());
        assert!(r.flags.closed_way);
        assert!(!r.flags.open_way);
        assert_eq!(r.action_name(), "enable");
        assert_eq!(r.predicates.len(), 1);
        // the _action_ tag is gone from the template
        assert!(r.template.attr().find_tag("_action_").is_none());
    }

    #[test]
    fn test_tod_prefix() {
        assert_eq!(tod("5 kn"), 5.0);
        assert_eq!(tod("  -2.5x"), -2.5);
        assert_eq!(tod("abc"), 0.0);
    }
}
