use std::collections::{BTreeMap, HashMap};

use phoenix_types::{PhoenixError, PhoenixResult};
use sha2::{Digest, Sha256};

/// The parameter-render boundary from spec §9: the opaque `parameters` blob
/// survives at the transport edge, but is validated against a per-template
/// allowlist of parameter names here before substitution, so everything
/// downstream of this call operates on a plain rendered string.
///
/// `body` is the template's opaque YAML text containing `${name}`
/// placeholders; `allowed_params` names the parameters the template accepts.
pub fn render_template(
    body: &str,
    allowed_params: &[&str],
    parameters: &HashMap<String, String>,
) -> PhoenixResult<String> {
    for key in parameters.keys() {
        if !allowed_params.contains(&key.as_str()) {
            return Err(PhoenixError::Validation(format!(
                "unknown template parameter: {key}"
            )));
        }
    }

    let mut rendered = body.to_string();
    for (key, value) in parameters {
        rendered = rendered.replace(&format!("${{{key}}}"), value);
    }
    Ok(rendered)
}

/// Stable hash of a rendered config, used as `ActivePipeline.config_hash` and
/// to confirm an agent's `update` task matches a given `DeploymentVersion`.
pub fn config_hash(rendered: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(rendered.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Deterministic ordering is needed so the same parameter map always renders
/// and hashes identically regardless of `HashMap` iteration order.
pub fn sorted_params(parameters: &HashMap<String, String>) -> BTreeMap<&str, &str> {
    parameters
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_known_parameters() {
        let mut params = HashMap::new();
        params.insert("sample_rate".to_string(), "10".to_string());
        let rendered =
            render_template("rate: ${sample_rate}", &["sample_rate"], &params).unwrap();
        assert_eq!(rendered, "rate: 10");
    }

    #[test]
    fn rejects_unknown_parameter() {
        let mut params = HashMap::new();
        params.insert("evil".to_string(), "1".to_string());
        let err = render_template("rate: ${sample_rate}", &["sample_rate"], &params).unwrap_err();
        assert!(matches!(err, PhoenixError::Validation(_)));
    }

    #[test]
    fn hash_is_stable() {
        assert_eq!(config_hash("abc"), config_hash("abc"));
        assert_ne!(config_hash("abc"), config_hash("abd"));
    }
}
