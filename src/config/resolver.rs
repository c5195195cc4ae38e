//! Precedence merge and reference resolution.
//!
//! [`resolve`] folds the four layers into one document (scalars and
//! sequences overwrite, nested tables merge key-by-key) and then evaluates
//! reference expressions embedded in string values:
//!
//! - `${path.to.key}` — the referenced value; an error if the path is absent
//! - `${path.to.key:-fallback}` — the referenced value when defined,
//!   otherwise the literal fallback
//!
//! A string that consists of exactly one expression takes the referenced
//! value with its original type; expressions embedded in larger strings
//! interpolate the scalar's string form. Reference chains resolve
//! transitively and cycles are detected, not retried.

use std::collections::BTreeMap;
use std::fmt;

use toml::{Table, Value};

use crate::config::layers::{ConfigLayer, LayerName};
use crate::error::ConfigError;

/// The single merged, read-only configuration document for a run.
///
/// Key order is deterministic (sorted), so serializing the same layer set
/// twice yields byte-identical output.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    doc: Table,
}

impl ResolvedConfig {
    /// Wrap an already-merged document.
    pub(crate) const fn from_table(doc: Table) -> Self {
        Self { doc }
    }

    /// Consume the wrapper, yielding the underlying document.
    pub(crate) fn into_table(self) -> Table {
        self.doc
    }

    /// The merged document.
    #[must_use]
    pub const fn doc(&self) -> &Table {
        &self.doc
    }

    /// Look up a value by dotted path (`storage.swap.zram_size`).
    ///
    /// Path segments split on `.`, so quoted TOML keys that themselves
    /// contain dots are not addressable here.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Value> {
        lookup_path(&self.doc, path)
    }

    /// Look up a string value by dotted path.
    #[must_use]
    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }

    /// Expand `${...}` expressions in arbitrary text against this document.
    ///
    /// This is the template renderer: every expression interpolates the
    /// referenced scalar's string form, and fallbacks apply as in
    /// configuration values. `context` names the caller in error messages.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnresolvedReference`] for undefined targets
    /// without a fallback and for non-scalar targets.
    pub fn expand(&self, text: &str, context: &str) -> Result<String, ConfigError> {
        let mut out = String::new();
        for segment in parse_segments(text, context)? {
            match segment {
                Segment::Literal(literal) => out.push_str(&literal),
                Segment::Expr { path, fallback } => {
                    let value = resolve_expr(
                        &self.doc,
                        &path,
                        fallback.as_deref(),
                        context,
                        &mut Vec::new(),
                    )?;
                    out.push_str(&scalar_string(&value, &path, context)?);
                }
            }
        }
        Ok(out)
    }
}

impl fmt::Display for ResolvedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.doc, f)
    }
}

/// Merge `layers` (lowest precedence first) and resolve all expressions.
///
/// # Errors
///
/// Returns [`ConfigError::TypeConflict`] if a layer redefines a key with an
/// incompatible value kind, and [`ConfigError::UnresolvedReference`] for
/// expressions whose target is undefined (without a fallback) or cyclic.
pub fn resolve(layers: &[ConfigLayer]) -> Result<ResolvedConfig, ConfigError> {
    let mut merged = Table::new();
    let mut provenance = BTreeMap::new();

    for layer in layers {
        merge_table(&mut merged, layer.doc(), "", layer.name(), &mut provenance)?;
    }

    let doc = resolve_table(&merged, &merged, "")?;
    Ok(ResolvedConfig { doc })
}

// ---------------------------------------------------------------------------
// Merge pass
// ---------------------------------------------------------------------------

/// Coarse value kind used for conflict detection. Scalar-to-scalar
/// overwrites across primitive types are ordinary overwrites.
const fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Table(_) => "table",
        Value::Array(_) => "sequence",
        _ => "scalar",
    }
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

/// Record `layer` as the writer of `path` and every nested key below it.
fn record_provenance(
    path: &str,
    value: &Value,
    layer: &LayerName,
    provenance: &mut BTreeMap<String, String>,
) {
    provenance.insert(path.to_string(), layer.to_string());
    if let Value::Table(table) = value {
        for (key, nested) in table {
            record_provenance(&join_path(path, key), nested, layer, provenance);
        }
    }
}

fn merge_table(
    dest: &mut Table,
    src: &Table,
    prefix: &str,
    layer: &LayerName,
    provenance: &mut BTreeMap<String, String>,
) -> Result<(), ConfigError> {
    for (key, value) in src {
        let path = join_path(prefix, key);

        match dest.get_mut(key) {
            None => {
                record_provenance(&path, value, layer, provenance);
                dest.insert(key.clone(), value.clone());
            }
            Some(Value::Table(existing)) if value.is_table() => {
                if let Value::Table(incoming) = value {
                    merge_table(existing, incoming, &path, layer, provenance)?;
                }
            }
            Some(existing) => {
                let old_kind = value_kind(existing);
                let new_kind = value_kind(value);
                if old_kind == new_kind {
                    record_provenance(&path, value, layer, provenance);
                    *existing = value.clone();
                } else {
                    return Err(ConfigError::TypeConflict {
                        key: path.clone(),
                        old_kind: old_kind.to_string(),
                        old_layer: provenance
                            .get(&path)
                            .cloned()
                            .unwrap_or_else(|| "global".to_string()),
                        new_kind: new_kind.to_string(),
                        new_layer: layer.to_string(),
                    });
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Expression pass
// ---------------------------------------------------------------------------

/// One piece of a string value: literal text or a `${...}` expression.
#[derive(Debug, PartialEq)]
enum Segment {
    Literal(String),
    Expr {
        path: String,
        fallback: Option<String>,
    },
}

/// Split a string into literal and expression segments.
fn parse_segments(s: &str, key: &str) -> Result<Vec<Segment>, ConfigError> {
    let mut segments = Vec::new();
    let mut rest = s;

    while let Some(start) = rest.find("${") {
        let (before, expr_on) = rest.split_at(start);
        if !before.is_empty() {
            segments.push(Segment::Literal(before.to_string()));
        }
        let body_on = expr_on.get(2..).unwrap_or_default();
        let Some(end) = body_on.find('}') else {
            return Err(ConfigError::UnresolvedReference {
                key: key.to_string(),
                detail: "unterminated '${' expression".to_string(),
            });
        };
        let body = body_on.get(..end).unwrap_or_default();
        let (path, fallback) = body.split_once(":-").map_or_else(
            || (body.to_string(), None),
            |(p, f)| (p.to_string(), Some(f.to_string())),
        );
        if path.is_empty() {
            return Err(ConfigError::UnresolvedReference {
                key: key.to_string(),
                detail: "empty reference".to_string(),
            });
        }
        segments.push(Segment::Expr { path, fallback });
        rest = body_on.get(end + 1..).unwrap_or_default();
    }

    if !rest.is_empty() {
        segments.push(Segment::Literal(rest.to_string()));
    }
    Ok(segments)
}

/// Walk a dotted path through nested tables.
fn lookup_path<'a>(doc: &'a Table, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = doc.get(segments.next()?)?;
    for segment in segments {
        current = current.as_table()?.get(segment)?;
    }
    Some(current)
}

/// Resolve every string expression inside `table`, rebuilding it.
fn resolve_table(root: &Table, table: &Table, prefix: &str) -> Result<Table, ConfigError> {
    let mut out = Table::new();
    for (key, value) in table {
        let path = join_path(prefix, key);
        out.insert(key.clone(), resolve_value(root, value, &path, &mut Vec::new())?);
    }
    Ok(out)
}

fn resolve_value(
    root: &Table,
    value: &Value,
    key: &str,
    visiting: &mut Vec<String>,
) -> Result<Value, ConfigError> {
    match value {
        Value::String(s) if s.contains("${") => resolve_string(root, s, key, visiting),
        Value::Table(table) => {
            let mut out = Table::new();
            for (k, v) in table {
                let path = join_path(key, k);
                out.insert(k.clone(), resolve_value(root, v, &path, visiting)?);
            }
            Ok(Value::Table(out))
        }
        Value::Array(items) => {
            let resolved = items
                .iter()
                .enumerate()
                .map(|(i, item)| resolve_value(root, item, &format!("{key}[{i}]"), visiting))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Array(resolved))
        }
        other => Ok(other.clone()),
    }
}

fn resolve_string(
    root: &Table,
    s: &str,
    key: &str,
    visiting: &mut Vec<String>,
) -> Result<Value, ConfigError> {
    let segments = parse_segments(s, key)?;

    // A lone expression takes the referenced value with its original type.
    if let [Segment::Expr { path, fallback }] = segments.as_slice() {
        return resolve_expr(root, path, fallback.as_deref(), key, visiting);
    }

    let mut out = String::new();
    for segment in &segments {
        match segment {
            Segment::Literal(text) => out.push_str(text),
            Segment::Expr { path, fallback } => {
                let value = resolve_expr(root, path, fallback.as_deref(), key, visiting)?;
                out.push_str(&scalar_string(&value, path, key)?);
            }
        }
    }
    Ok(Value::String(out))
}

/// Resolve one `${path}` / `${path:-fallback}` expression.
fn resolve_expr(
    root: &Table,
    path: &str,
    fallback: Option<&str>,
    key: &str,
    visiting: &mut Vec<String>,
) -> Result<Value, ConfigError> {
    if visiting.iter().any(|p| p == path) {
        let chain = visiting.join(" -> ");
        return Err(ConfigError::UnresolvedReference {
            key: key.to_string(),
            detail: format!("reference cycle: {chain} -> {path}"),
        });
    }

    match lookup_path(root, path) {
        Some(raw) => {
            visiting.push(path.to_string());
            let resolved = resolve_value(root, raw, path, visiting);
            visiting.pop();
            resolved
        }
        None => fallback.map_or_else(
            || {
                Err(ConfigError::UnresolvedReference {
                    key: key.to_string(),
                    detail: format!("'{path}' is not defined"),
                })
            },
            |fb| Ok(Value::String(fb.to_string())),
        ),
    }
}

/// String form of a scalar for embedded interpolation.
fn scalar_string(value: &Value, path: &str, key: &str) -> Result<String, ConfigError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Integer(i) => Ok(i.to_string()),
        Value::Float(f) => Ok(f.to_string()),
        Value::Boolean(b) => Ok(b.to_string()),
        Value::Datetime(d) => Ok(d.to_string()),
        Value::Array(_) | Value::Table(_) => Err(ConfigError::UnresolvedReference {
            key: key.to_string(),
            detail: format!(
                "'{path}' is a {}; only scalar values can be interpolated",
                value_kind(value)
            ),
        }),
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn layer(name: LayerName, content: &str) -> ConfigLayer {
        let doc: Table = content.parse().expect("test layer must be valid TOML");
        ConfigLayer::new(name, doc).expect("test layer must not use reserved keys")
    }

    fn global(content: &str) -> ConfigLayer {
        layer(LayerName::Global, content)
    }

    fn profile(name: &str, content: &str) -> ConfigLayer {
        layer(LayerName::Profile(name.to_string()), content)
    }

    fn host(name: &str, content: &str) -> ConfigLayer {
        layer(LayerName::Host(name.to_string()), content)
    }

    // -----------------------------------------------------------------------
    // Merge semantics
    // -----------------------------------------------------------------------

    #[test]
    fn profile_value_wins_over_global() {
        let layers = [
            global("hostname = \"default\"\n"),
            profile("work", "hostname = \"desk\"\n"),
        ];
        let resolved = resolve(&layers).unwrap();
        assert_eq!(resolved.get_str("hostname"), Some("desk"));
    }

    #[test]
    fn nested_tables_merge_key_by_key() {
        let layers = [
            global("[a]\nx = 1\ny = 2\n"),
            profile("work", "[a]\ny = 3\n"),
        ];
        let resolved = resolve(&layers).unwrap();
        assert_eq!(resolved.get("a.x").unwrap().as_integer(), Some(1));
        assert_eq!(resolved.get("a.y").unwrap().as_integer(), Some(3));
    }

    #[test]
    fn sequences_overwrite_entirely() {
        let layers = [
            global("[packages]\nbase = [\"git\", \"vim\"]\n"),
            profile("work", "[packages]\nbase = [\"firefox\"]\n"),
        ];
        let resolved = resolve(&layers).unwrap();
        let base = resolved.get("packages.base").unwrap().as_array().unwrap();
        assert_eq!(base.len(), 1);
        assert_eq!(base[0].as_str(), Some("firefox"));
    }

    #[test]
    fn precedence_follows_layer_order() {
        let layers = [
            global("x = \"global\"\n"),
            layer(LayerName::Group("all".into()), "x = \"group\"\n"),
            host("phoenix", "x = \"host\"\n"),
            profile("work", "y = 1\n"),
        ];
        let resolved = resolve(&layers).unwrap();
        assert_eq!(resolved.get_str("x"), Some("host"));
    }

    #[test]
    fn empty_layers_are_valid() {
        let layers = [
            global("x = 1\n"),
            ConfigLayer::empty(LayerName::Group("all".into())),
            ConfigLayer::empty(LayerName::Host("phoenix".into())),
            profile("work", ""),
        ];
        let resolved = resolve(&layers).unwrap();
        assert_eq!(resolved.get("x").unwrap().as_integer(), Some(1));
    }

    #[test]
    fn table_over_scalar_is_a_type_conflict() {
        let layers = [
            global("a = \"scalar\"\n"),
            profile("work", "[a]\nx = 1\n"),
        ];
        let err = resolve(&layers).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Type conflict at 'a': layer 'profile:work' redefines scalar (from layer 'global') as table"
        );
    }

    #[test]
    fn sequence_over_scalar_is_a_type_conflict() {
        let layers = [
            global("a = \"one\"\n"),
            host("phoenix", "a = [\"one\", \"two\"]\n"),
        ];
        let err = resolve(&layers).unwrap_err();
        assert!(matches!(err, ConfigError::TypeConflict { .. }), "got: {err}");
        assert!(err.to_string().contains("host:phoenix"));
    }

    #[test]
    fn scalar_over_table_is_a_type_conflict() {
        let layers = [global("[a]\nx = 1\n"), profile("work", "a = 5\n")];
        let err = resolve(&layers).unwrap_err();
        assert!(err.to_string().contains("redefines table"));
    }

    #[test]
    fn scalar_to_scalar_kind_change_is_an_overwrite() {
        let layers = [global("timeout = 30\n"), profile("work", "timeout = \"1m\"\n")];
        let resolved = resolve(&layers).unwrap();
        assert_eq!(resolved.get_str("timeout"), Some("1m"));
    }

    #[test]
    fn conflict_names_the_nested_key() {
        let layers = [
            global("[security.ssh]\nport = 22\n"),
            profile("work", "[security]\nssh = \"no\"\n"),
        ];
        let err = resolve(&layers).unwrap_err();
        assert!(err.to_string().contains("'security.ssh'"), "got: {err}");
    }

    // -----------------------------------------------------------------------
    // Reference expressions
    // -----------------------------------------------------------------------

    #[test]
    fn fallback_used_when_target_undefined() {
        let layers = [global("[swap]\nsize = \"${storage.swap.zram_size:-4G}\"\n")];
        let resolved = resolve(&layers).unwrap();
        assert_eq!(resolved.get_str("swap.size"), Some("4G"));
    }

    #[test]
    fn fallback_ignored_when_target_defined() {
        let layers = [
            global("[swap]\nsize = \"${storage.swap.zram_size:-4G}\"\n"),
            host("laptop", "[storage.swap]\nzram_size = \"6G\"\n"),
        ];
        let resolved = resolve(&layers).unwrap();
        assert_eq!(resolved.get_str("swap.size"), Some("6G"));
    }

    #[test]
    fn plain_reference_resolves() {
        let layers = [global("user = \"sam\"\nhome = \"${user}\"\n")];
        let resolved = resolve(&layers).unwrap();
        assert_eq!(resolved.get_str("home"), Some("sam"));
    }

    #[test]
    fn whole_string_reference_keeps_value_type() {
        let layers = [global("[limits]\nretries = 5\nmax = \"${limits.retries}\"\n")];
        let resolved = resolve(&layers).unwrap();
        assert_eq!(resolved.get("limits.max").unwrap().as_integer(), Some(5));
    }

    #[test]
    fn embedded_reference_interpolates_string_form() {
        let layers = [global("hostname = \"phoenix\"\nbanner = \"host ${hostname} ready\"\n")];
        let resolved = resolve(&layers).unwrap();
        assert_eq!(resolved.get_str("banner"), Some("host phoenix ready"));
    }

    #[test]
    fn embedded_integer_interpolates() {
        let layers = [global("port = 22\nlisten = \"0.0.0.0:${port}\"\n")];
        let resolved = resolve(&layers).unwrap();
        assert_eq!(resolved.get_str("listen"), Some("0.0.0.0:22"));
    }

    #[test]
    fn reference_chain_resolves_transitively() {
        let layers = [global("a = \"${b}\"\nb = \"${c}\"\nc = \"end\"\n")];
        let resolved = resolve(&layers).unwrap();
        assert_eq!(resolved.get_str("a"), Some("end"));
    }

    #[test]
    fn reference_across_layers_resolves() {
        let layers = [
            global("[users]\nlogin = \"sam\"\n"),
            profile("work", "[files]\nowner = \"${users.login}\"\n"),
        ];
        let resolved = resolve(&layers).unwrap();
        assert_eq!(resolved.get_str("files.owner"), Some("sam"));
    }

    #[test]
    fn undefined_reference_without_fallback_fails() {
        let layers = [global("x = \"${no.such.key}\"\n")];
        let err = resolve(&layers).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unresolved reference in 'x': 'no.such.key' is not defined"
        );
    }

    #[test]
    fn direct_self_reference_is_a_cycle() {
        let layers = [global("[a]\nb = \"${a.b}\"\n")];
        let err = resolve(&layers).unwrap_err();
        assert!(err.to_string().contains("reference cycle"), "got: {err}");
    }

    #[test]
    fn indirect_cycle_is_detected() {
        let layers = [global("a = \"${b}\"\nb = \"${a}\"\n")];
        let err = resolve(&layers).unwrap_err();
        assert!(err.to_string().contains("reference cycle"), "got: {err}");
    }

    #[test]
    fn interpolating_a_table_fails() {
        let layers = [global("[a]\nx = 1\nmsg = \"value: ${a}\"\n")];
        let err = resolve(&layers).unwrap_err();
        assert!(err.to_string().contains("only scalar values"), "got: {err}");
    }

    #[test]
    fn unterminated_expression_fails() {
        let layers = [global("x = \"${broken\"\n")];
        let err = resolve(&layers).unwrap_err();
        assert!(err.to_string().contains("unterminated"), "got: {err}");
    }

    #[test]
    fn expressions_inside_arrays_resolve() {
        let layers = [global("user = \"sam\"\npaths = [\"/home/${user}\", \"/tmp\"]\n")];
        let resolved = resolve(&layers).unwrap();
        let paths = resolved.get("paths").unwrap().as_array().unwrap();
        assert_eq!(paths[0].as_str(), Some("/home/sam"));
    }

    // -----------------------------------------------------------------------
    // Determinism
    // -----------------------------------------------------------------------

    #[test]
    fn resolution_is_deterministic() {
        let make_layers = || {
            [
                global("b = 1\na = 2\n[t]\nz = \"${a}\"\nm = \"x\"\n"),
                profile("work", "a = 3\n[t]\nq = true\n"),
            ]
        };
        let first = resolve(&make_layers()).unwrap().to_string();
        let second = resolve(&make_layers()).unwrap().to_string();
        assert_eq!(first, second, "same layer set must serialize identically");
    }

    #[test]
    fn expand_renders_template_text() {
        let layers = [global("hostname = \"phoenix\"\n[net]\nport = 22\n")];
        let resolved = resolve(&layers).unwrap();
        let rendered = resolved
            .expand("Host ${hostname}\nPort ${net.port}\nProxy ${net.proxy:-none}\n", "t")
            .unwrap();
        assert_eq!(rendered, "Host phoenix\nPort 22\nProxy none\n");
    }

    #[test]
    fn expand_reports_undefined_references() {
        let layers = [global("x = 1\n")];
        let resolved = resolve(&layers).unwrap();
        let err = resolved.expand("value ${missing.key}", "t").unwrap_err();
        assert!(err.to_string().contains("'missing.key' is not defined"));
    }

    #[test]
    fn resolved_config_dotted_lookup() {
        let layers = [global("[a.b]\nc = \"deep\"\n")];
        let resolved = resolve(&layers).unwrap();
        assert_eq!(resolved.get_str("a.b.c"), Some("deep"));
        assert!(resolved.get("a.b.missing").is_none());
        assert!(resolved.get("a.b.c.too_far").is_none());
    }

    // -----------------------------------------------------------------------
    // Segment parsing
    // -----------------------------------------------------------------------

    #[test]
    fn parse_segments_splits_literals_and_expressions() {
        let segments = parse_segments("pre-${a.b}-post", "k").unwrap();
        assert_eq!(segments.len(), 3);
        assert_eq!(
            segments[1],
            Segment::Expr {
                path: "a.b".to_string(),
                fallback: None,
            }
        );
    }

    #[test]
    fn parse_segments_fallback_keeps_extra_separators() {
        let segments = parse_segments("${a:-x:-y}", "k").unwrap();
        assert_eq!(
            segments[0],
            Segment::Expr {
                path: "a".to_string(),
                fallback: Some("x:-y".to_string()),
            }
        );
    }

    #[test]
    fn parse_segments_empty_reference_fails() {
        let err = parse_segments("${}", "k").unwrap_err();
        assert!(err.to_string().contains("empty reference"));
    }
}
