//! Variable space used to resolve step settings.
//!
//! Settings may contain `${NAME}` or `%%NAME%%` placeholders. They are
//! resolved once, when a step copy initializes, first against variables set
//! on the space and then against the process environment. Unknown
//! placeholders are left untouched.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Named string variables with optional environment fallback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableSpace {
    variables: IndexMap<String, String>,
    use_environment: bool,
}

impl VariableSpace {
    /// Create a space that falls back to the process environment
    #[must_use]
    pub fn new() -> Self {
        Self {
            variables: IndexMap::new(),
            use_environment: true,
        }
    }

    /// Create a space that never reads the process environment
    #[must_use]
    pub fn isolated() -> Self {
        Self {
            variables: IndexMap::new(),
            use_environment: false,
        }
    }

    /// Set a variable, replacing any previous value
    pub fn set_variable(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.variables.insert(name.into(), value.into());
    }

    /// Copy every variable of `parent` that is not set here
    pub fn inherit_from(&mut self, parent: &Self) {
        for (name, value) in &parent.variables {
            self.variables
                .entry(name.clone())
                .or_insert_with(|| value.clone());
        }
    }

    /// Look up a variable
    #[must_use]
    pub fn get_variable(&self, name: &str) -> Option<String> {
        if let Some(value) = self.variables.get(name) {
            return Some(value.clone());
        }
        if self.use_environment {
            return std::env::var(name).ok();
        }
        None
    }

    /// Look up a variable as a flag (`Y`, `yes`, `true`, `1`)
    #[must_use]
    pub fn get_boolean(&self, name: &str, default: bool) -> bool {
        match self.get_variable(name) {
            Some(value) => matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "y" | "yes" | "true" | "1"
            ),
            None => default,
        }
    }

    /// Names of the variables set on this space
    #[must_use]
    pub fn list_variables(&self) -> Vec<&str> {
        self.variables.keys().map(String::as_str).collect()
    }

    /// Resolve every `${NAME}` and `%%NAME%%` placeholder in `text`
    #[must_use]
    pub fn substitute(&self, text: &str) -> String {
        let resolved = self.replace_delimited(text, "${", "}");
        self.replace_delimited(&resolved, "%%", "%%")
    }

    fn replace_delimited(&self, text: &str, open: &str, close: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(start) = rest.find(open) {
            out.push_str(&rest[..start]);
            let after = &rest[start + open.len()..];
            let Some(end) = after.find(close) else {
                out.push_str(&rest[start..]);
                return out;
            };
            let name = &after[..end];
            match self.get_variable(name).filter(|_| !name.is_empty()) {
                Some(value) => out.push_str(&value),
                None => {
                    out.push_str(open);
                    out.push_str(name);
                    out.push_str(close);
                }
            }
            rest = &after[end + close.len()..];
        }
        out.push_str(rest);
        out
    }
}

impl Default for VariableSpace {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space() -> VariableSpace {
        let mut vars = VariableSpace::isolated();
        vars.set_variable("START", "10");
        vars.set_variable("TABLE", "customers");
        vars
    }

    #[test]
    fn test_substitute_both_syntaxes() {
        let vars = space();
        assert_eq!(vars.substitute("${START}"), "10");
        assert_eq!(vars.substitute("%%TABLE%%"), "customers");
        assert_eq!(vars.substitute("from ${TABLE} at %%START%%"), "from customers at 10");
    }

    #[test]
    fn test_unknown_placeholder_left_untouched() {
        let vars = space();
        assert_eq!(vars.substitute("${NOPE}-${START}"), "${NOPE}-10");
        assert_eq!(vars.substitute("${}"), "${}");
    }

    #[test]
    fn test_unterminated_placeholder() {
        let vars = space();
        assert_eq!(vars.substitute("abc ${START"), "abc ${START");
    }

    #[test]
    fn test_environment_fallback() {
        let vars = VariableSpace::new();
        // PATH is set in every test environment we run in
        assert!(vars.get_variable("PATH").is_some());
        assert!(VariableSpace::isolated().get_variable("PATH").is_none());
    }

    #[test]
    fn test_inherit_keeps_local_values() {
        let mut child = VariableSpace::isolated();
        child.set_variable("START", "99");
        child.inherit_from(&space());
        assert_eq!(child.get_variable("START").as_deref(), Some("99"));
        assert_eq!(child.get_variable("TABLE").as_deref(), Some("customers"));
    }

    #[test]
    fn test_get_boolean() {
        let mut vars = VariableSpace::isolated();
        vars.set_variable("FLAG", "Y");
        vars.set_variable("OFF", "N");
        assert!(vars.get_boolean("FLAG", false));
        assert!(!vars.get_boolean("OFF", true));
        assert!(vars.get_boolean("MISSING", true));
    }
}
