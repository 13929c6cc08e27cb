/// Separator between path segments (`items.2.slotType`).
pub const SEPARATOR: char = '.';

/// Join a container path, an optional item index and a field name.
pub fn resolve_path(container: &str, field_name: &str, item_index: Option<usize>) -> String {
    let mut out = String::with_capacity(container.len() + field_name.len() + 4);
    if !container.is_empty() {
        out.push_str(container);
        out.push(SEPARATOR);
    }
    if let Some(i) = item_index {
        out.push_str(&i.to_string());
        if !field_name.is_empty() {
            out.push(SEPARATOR);
        }
    }
    out.push_str(field_name);
    out
}

/// Path of item `index` of the array at `array_path`.
pub fn item_path(array_path: &str, index: usize) -> String {
    resolve_path(array_path, "", Some(index))
}

/// One enclosing array item while walking a descriptor tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArrayScope {
    pub array_path: String,
    pub index: usize,
}

impl ArrayScope {
    pub fn new(array_path: impl Into<String>, index: usize) -> Self {
        Self {
            array_path: array_path.into(),
            index,
        }
    }

    /// `<array>.<index>`, the container for the item's own fields.
    pub fn item_path(&self) -> String {
        item_path(&self.array_path, self.index)
    }
}

/// Resolve a field reference (`depends_on`, condition operand) against the
/// innermost enclosing array item.
///
/// A reference that already starts with the array's path prefix is taken as
/// absolute. Anything else is a sibling within the same item.
pub fn resolve_reference(reference: &str, scopes: &[ArrayScope]) -> String {
    let Some(scope) = scopes.last() else {
        return reference.to_string();
    };
    if has_prefix(reference, &scope.array_path) {
        return reference.to_string();
    }
    resolve_path(&scope.item_path(), reference, None)
}

/// True when `path` equals `prefix` or continues it at a segment boundary.
pub fn has_prefix(path: &str, prefix: &str) -> bool {
    if prefix.is_empty() {
        return true;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with(SEPARATOR),
        None => false,
    }
}

/// Remainder of `path` after `prefix` and its separator.
pub fn strip_prefix<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    if prefix.is_empty() {
        return Some(path);
    }
    path.strip_prefix(prefix)?.strip_prefix(SEPARATOR)
}

/// Item index and remainder for a path under `array_path`
/// (`items.3.name` under `items` → `(3, "name")`).
pub fn split_item<'a>(path: &'a str, array_path: &str) -> Option<(usize, &'a str)> {
    let rest = strip_prefix(path, array_path)?;
    let (idx, tail) = match rest.split_once(SEPARATOR) {
        Some((i, t)) => (i, t),
        None => (rest, ""),
    };
    idx.parse::<usize>().ok().map(|i| (i, tail))
}

pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split(SEPARATOR).filter(|s| !s.is_empty())
}

/// Last segment, used as a fallback label.
pub fn leaf_name(path: &str) -> &str {
    path.rsplit(SEPARATOR).next().unwrap_or(path)
}
