use crate::{language::typecheck::ResolveOptions, runtime::EvalOptions};
use std::env;

pub const ENTRY_VAR: &str = "CV_ENTRY";
pub const STRICT_WHEN_VAR: &str = "CV_STRICT_WHEN";
pub const MAX_CALL_DEPTH_VAR: &str = "CV_MAX_CALL_DEPTH";

/// Settings for a whole check-and-run of one compilation unit.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Options {
    pub resolve: ResolveOptions,
    pub eval: EvalOptions,
}

impl Options {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Blank or unparsable values fall back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut options = Self::default();
        let value = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(entry) = value(ENTRY_VAR) {
            options.resolve.entry = Some(entry.trim().to_string());
        }
        if let Some(flag) = value(STRICT_WHEN_VAR) {
            options.resolve.exhaustive_statement_when = parse_flag(&flag);
        }
        if let Some(depth) = value(MAX_CALL_DEPTH_VAR).and_then(|v| v.trim().parse().ok()) {
            options.eval.max_call_depth = depth;
        }
        tracing::debug!(?options, "options loaded");
        options
    }

    /// Name of the function the evaluator starts from.
    pub fn entry(&self) -> &str {
        self.resolve.entry.as_deref().unwrap_or("main")
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::interpreter::DEFAULT_MAX_CALL_DEPTH;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn options(pairs: &[(&str, &str)]) -> Options {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Options::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_without_variables() {
        let options = options(&[]);
        assert_eq!(options, Options::default());
        assert_eq!(options.entry(), "main");
        assert_eq!(options.eval.max_call_depth, DEFAULT_MAX_CALL_DEPTH);
    }

    #[test]
    fn reads_every_variable() {
        let options = options(&[
            (ENTRY_VAR, "start"),
            (STRICT_WHEN_VAR, "TRUE"),
            (MAX_CALL_DEPTH_VAR, "32"),
        ]);
        assert_eq!(options.entry(), "start");
        assert!(options.resolve.exhaustive_statement_when);
        assert_eq!(options.eval.max_call_depth, 32);
    }

    #[test]
    fn ignores_blank_and_malformed_values() {
        let options = options(&[(ENTRY_VAR, "  "), (MAX_CALL_DEPTH_VAR, "deep")]);
        assert_eq!(options, Options::default());
    }
}
