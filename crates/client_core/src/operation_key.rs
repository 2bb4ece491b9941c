use std::fmt;

use crate::transport::{ApiRequest, Method};

/// Deduplication identity of a logical request, rendered as
/// `{method}_{path}` (for example `get_/api/conversations/`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationKey(String);

impl OperationKey {
    /// Key for `method` against an already resolved `path`.
    pub fn compute(method: Method, path: &str) -> Self {
        debug_assert!(
            !path.contains('{') && !path.contains('}'),
            "operation key computed for unresolved path template {path}"
        );
        Self(format!("{}_{path}", method.as_str()))
    }

    /// Key for a full request. Query parameters select the resource (a search
    /// for `a` is not a duplicate of a search for `b`), so they are folded in,
    /// sorted by name so parameter order never matters.
    pub fn for_request(request: &ApiRequest) -> Self {
        let base = Self::compute(request.method, &request.path);
        if request.query.is_empty() {
            return base;
        }
        let mut pairs: Vec<&(String, String)> = request.query.iter().collect();
        pairs.sort();
        let query = pairs
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("&");
        Self(format!("{}?{query}", base.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Resource path portion of the key, without method or query.
    pub fn path(&self) -> &str {
        let without_method = self
            .0
            .split_once('_')
            .map(|(_, rest)| rest)
            .unwrap_or(&self.0);
        without_method
            .split_once('?')
            .map(|(path, _)| path)
            .unwrap_or(without_method)
    }
}

impl fmt::Display for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OperationKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}
