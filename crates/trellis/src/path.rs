use serde_json::Value;

/// An ordered sequence of child keys addressing a module in the tree.
///
/// The empty path addresses the root module. A single bare key converts
/// directly (`"cart".into()`), so do slices and vectors of keys.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Default, derive_more::Deref, derive_more::From,
)]
pub struct ModulePath(Vec<String>);

impl ModulePath {
    /// The path of the root module.
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// The final segment, i.e. this module's key under its parent.
    pub fn key(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// The path minus its final segment.
    pub fn parent(&self) -> ModulePath {
        let mut segs = self.0.clone();
        segs.pop();
        Self(segs)
    }

    /// Extend the path by one child key.
    pub fn join(&self, key: &str) -> ModulePath {
        let mut segs = self.0.clone();
        segs.push(key.to_string());
        Self(segs)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl std::fmt::Display for ModulePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() {
            f.write_str("<root>")
        } else {
            f.write_str(&self.0.join("."))
        }
    }
}

impl From<&str> for ModulePath {
    fn from(key: &str) -> Self {
        Self(vec![key.to_string()])
    }
}

impl From<&[&str]> for ModulePath {
    fn from(keys: &[&str]) -> Self {
        Self(keys.iter().map(|k| k.to_string()).collect())
    }
}

impl From<Vec<&str>> for ModulePath {
    fn from(keys: Vec<&str>) -> Self {
        Self(keys.into_iter().map(str::to_string).collect())
    }
}

/// Resolve a sub-state value by walking `path` down from the root state.
pub(crate) fn state_at<'a>(root: &'a Value, path: &ModulePath) -> Option<&'a Value> {
    let mut cur = root;
    for seg in path.segments() {
        cur = cur.get(seg)?;
    }
    Some(cur)
}

/// Mutable variant of [`state_at`].
pub(crate) fn state_at_mut<'a>(root: &'a mut Value, path: &[String]) -> Option<&'a mut Value> {
    let mut cur = root;
    for seg in path {
        cur = cur.get_mut(seg)?;
    }
    Some(cur)
}
