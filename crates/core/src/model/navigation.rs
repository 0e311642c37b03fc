use serde::{Deserialize, Serialize};

/// Rules a module view applies when the learner moves between steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NavigationConfig {
    pub allow_back_navigation: bool,
    pub allow_forward_navigation: bool,
    /// Quiz steps need a correct answer (and other steps some consumed content) before "Next".
    pub require_quiz_completion: bool,
    /// Advance right after a correct quiz answer.
    pub auto_advance_on_complete: bool,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            allow_back_navigation: true,
            allow_forward_navigation: true,
            require_quiz_completion: true,
            auto_advance_on_complete: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: NavigationConfig =
            serde_json::from_str(r#"{"autoAdvanceOnComplete": true}"#).unwrap();
        assert!(config.allow_back_navigation);
        assert!(config.require_quiz_completion);
        assert!(config.auto_advance_on_complete);
    }
}
