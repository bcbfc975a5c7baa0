//! `stub://name?k=v&k2=v2` locators for synthetic videos, cameras and models.

use anyhow::{anyhow, Result};

pub(crate) const SCHEME: &str = "stub://";

pub(crate) fn is_stub(uri: &str) -> bool {
    uri.starts_with(SCHEME)
}

/// Split a stub locator into its name and `key=value` options, in order.
pub(crate) fn parse(uri: &str) -> Result<(String, Vec<(String, String)>)> {
    let rest = uri
        .strip_prefix(SCHEME)
        .ok_or_else(|| anyhow!("not a stub:// uri: {}", uri))?;
    let (name, query) = rest.split_once('?').unwrap_or((rest, ""));
    let mut options = Vec::new();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("stub option '{}' must be key=value", pair))?;
        options.push((key.to_string(), value.to_string()));
    }
    Ok((name.to_string(), options))
}
