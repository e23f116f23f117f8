//! Data-driven naming rules.
//!
//! A rule is a conjunction of optional regex filters over the executable
//! path, joined argv, working directory, and port, plus an extraction source
//! for the candidate name. The built-in set is embedded at build time; a user
//! overlay at `<config>/naming-rules.json` merges by id (user wins). Rules
//! are evaluated in ascending priority order, ties broken by id, and the
//! first rule that matches and yields a non-empty name decides.

use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Embedded built-in rule set.
const BUILTIN_RULES_JSON: &str = include_str!("builtin_rules.json");

/// Where a matching rule takes the candidate name from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NameSource {
    /// Basename of the executable path.
    Exe,
    /// Basename of the working directory.
    Cwd,
    /// First capture of `name_regex` applied to each argument after argv[0].
    Arg,
    /// Basename of the executable's parent directory, falling back to the
    /// executable name when the parent is a generic directory.
    ParentDir,
    /// First capture of `name_regex` on the exe path, or the path component
    /// preceding `.app`.
    AppBundle,
    /// The literal `static_name`.
    Static,
}

/// One naming heuristic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamingRule {
    pub id: String,
    pub description: String,
    /// Lower runs earlier.
    pub priority: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exe_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arg_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_pattern: Option<String>,
    pub name_source: NameSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_regex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_name: Option<String>,
    /// Fields written by other (newer) versions; preserved verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A rule with its filters compiled.
///
/// A filter that fails to compile makes the rule unmatchable rather than an
/// error, so one bad user rule never breaks the engine.
struct CompiledRule {
    rule: NamingRule,
    exe: Option<Regex>,
    arg: Option<Regex>,
    cwd: Option<Regex>,
    port: Option<Regex>,
    name: Option<Regex>,
    broken: bool,
}

impl CompiledRule {
    fn new(rule: NamingRule) -> Self {
        let mut broken = false;
        let mut compile = |pattern: &Option<String>| -> Option<Regex> {
            let p = pattern.as_deref()?;
            match Regex::new(p) {
                Ok(re) => Some(re),
                Err(_) => {
                    broken = true;
                    None
                }
            }
        };

        let exe = compile(&rule.exe_pattern);
        let arg = compile(&rule.arg_pattern);
        let cwd = compile(&rule.cwd_pattern);
        let port = compile(&rule.port_pattern);
        let name = compile(&rule.name_regex);

        Self {
            rule,
            exe,
            arg,
            cwd,
            port,
            name,
            broken,
        }
    }

    fn matches(&self, exe_path: &str, joined_args: &str, cwd: &str, port: &str) -> bool {
        if self.broken {
            return false;
        }
        let check = |re: &Option<Regex>, input: &str| re.as_ref().map_or(true, |r| r.is_match(input));
        check(&self.exe, exe_path)
            && check(&self.arg, joined_args)
            && check(&self.cwd, cwd)
            && check(&self.port, port)
    }

    fn extract(&self, exe_path: &str, cwd: &str, args: &[String]) -> Option<String> {
        let name = match self.rule.name_source {
            NameSource::Exe => basename(exe_path).to_string(),
            NameSource::Cwd => {
                if cwd.is_empty() {
                    return None;
                }
                basename(cwd).to_string()
            }
            NameSource::Arg => {
                let re = self.name.as_ref()?;
                args.iter()
                    .skip(1)
                    .find_map(|arg| re.captures(arg).and_then(|c| c.get(1)))
                    .map(|m| m.as_str().to_string())?
            }
            NameSource::ParentDir => {
                let parent = basename(parent_dir(exe_path));
                if is_generic_dir(parent) {
                    basename(exe_path).to_string()
                } else {
                    parent.to_string()
                }
            }
            NameSource::AppBundle => {
                if let Some(re) = &self.name {
                    if let Some(m) = re.captures(exe_path).and_then(|c| c.get(1)) {
                        return Some(m.as_str().to_string());
                    }
                }
                exe_path
                    .split('/')
                    .find_map(|part| part.strip_suffix(".app"))
                    .map(str::to_string)?
            }
            NameSource::Static => self.rule.static_name.clone()?,
        };

        if name.is_empty() {
            None
        } else {
            Some(name)
        }
    }
}

/// Applies naming rules in priority order.
pub struct RuleEngine {
    rules: Vec<CompiledRule>,
}

impl RuleEngine {
    /// Engine with the built-in rules plus the user overlay at `user_path`
    /// (ignored when absent or unreadable; a present-but-invalid overlay is
    /// an error).
    pub fn load(user_path: &Path) -> Result<Self> {
        let builtin = builtin_rules();
        let user = if user_path.exists() {
            load_rules_file(user_path)?
        } else {
            Vec::new()
        };
        Ok(Self::from_rules(merge_rules(builtin, user)))
    }

    /// Engine with only the built-in rules.
    pub fn builtin() -> Self {
        Self::from_rules(builtin_rules())
    }

    /// Engine over an explicit rule list.
    pub fn from_rules(mut rules: Vec<NamingRule>) -> Self {
        rules.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
        Self {
            rules: rules.into_iter().map(CompiledRule::new).collect(),
        }
    }

    /// The current rules, sorted by `(priority, id)`.
    pub fn rules(&self) -> Vec<NamingRule> {
        self.rules.iter().map(|c| c.rule.clone()).collect()
    }

    /// Returns the first matching rule's extracted name.
    pub fn match_name(
        &self,
        exe_path: &str,
        cwd: &str,
        args: &[String],
        port: u16,
    ) -> Option<String> {
        let joined = args.join(" ");
        let port = port.to_string();

        self.rules
            .iter()
            .filter(|c| c.matches(exe_path, &joined, cwd, &port))
            .find_map(|c| c.extract(exe_path, cwd, args))
    }

    /// The merged rule set as formatted JSON.
    pub fn export_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.rules())?)
    }
}

/// Parses the embedded built-in rules.
fn builtin_rules() -> Vec<NamingRule> {
    serde_json::from_str(BUILTIN_RULES_JSON).expect("embedded rules are valid JSON")
}

/// Loads a rules document from disk.
pub fn load_rules_file(path: &Path) -> Result<Vec<NamingRule>> {
    let data = std::fs::read_to_string(path).map_err(CoreError::Io)?;
    Ok(serde_json::from_str(&data)?)
}

/// Overlays `user` on `builtin` by id; user rules win, new ids are added.
pub fn merge_rules(builtin: Vec<NamingRule>, user: Vec<NamingRule>) -> Vec<NamingRule> {
    let mut by_id: std::collections::HashMap<String, NamingRule> = builtin
        .into_iter()
        .map(|r| (r.id.clone(), r))
        .collect();
    for r in user {
        by_id.insert(r.id.clone(), r);
    }
    by_id.into_values().collect()
}

pub(crate) fn basename(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or(path)
}

pub(crate) fn parent_dir(path: &str) -> &str {
    match path.trim_end_matches('/').rsplit_once('/') {
        Some((parent, _)) if !parent.is_empty() => parent,
        _ => "",
    }
}

/// Directory names too generic to identify an application.
pub(crate) fn is_generic_dir(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "bin" | "sbin" | "lib" | "libexec" | "usr" | "local" | "opt" | "var" | "etc"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn rule(id: &str, priority: i32) -> NamingRule {
        NamingRule {
            id: id.to_string(),
            description: String::new(),
            priority,
            exe_pattern: None,
            arg_pattern: None,
            cwd_pattern: None,
            port_pattern: None,
            name_source: NameSource::Exe,
            name_regex: None,
            static_name: None,
            extra: serde_json::Map::new(),
        }
    }

    #[test]
    fn builtin_rules_parse_and_sort() {
        let engine = RuleEngine::builtin();
        let rules = engine.rules();
        assert!(!rules.is_empty());
        for pair in rules.windows(2) {
            assert!(
                pair[0].priority < pair[1].priority
                    || (pair[0].priority == pair[1].priority && pair[0].id <= pair[1].id)
            );
        }
    }

    #[test]
    fn first_matching_rule_wins_by_priority() {
        let mut low = rule("later", 50);
        low.static_name = Some("later".to_string());
        low.name_source = NameSource::Static;

        let mut high = rule("earlier", 10);
        high.static_name = Some("earlier".to_string());
        high.name_source = NameSource::Static;

        let engine = RuleEngine::from_rules(vec![low, high]);
        assert_eq!(
            engine.match_name("/usr/bin/thing", "", &[], 0),
            Some("earlier".to_string())
        );
    }

    #[test]
    fn all_present_filters_must_match() {
        let mut r = rule("strict", 1);
        r.exe_pattern = Some("node$".to_string());
        r.port_pattern = Some("^3000$".to_string());
        r.name_source = NameSource::Cwd;

        let engine = RuleEngine::from_rules(vec![r]);
        assert_eq!(
            engine.match_name("/usr/bin/node", "/home/dev/shop", &[], 3000),
            Some("shop".to_string())
        );
        assert_eq!(engine.match_name("/usr/bin/node", "/home/dev/shop", &[], 3001), None);
        assert_eq!(engine.match_name("/usr/bin/deno", "/home/dev/shop", &[], 3000), None);
    }

    #[test]
    fn arg_source_scans_argv_after_index_zero() {
        let mut r = rule("jar", 1);
        r.name_source = NameSource::Arg;
        r.name_regex = Some(r"([a-z0-9-]+)\.jar$".to_string());

        let engine = RuleEngine::from_rules(vec![r]);
        assert_eq!(
            engine.match_name(
                "/usr/bin/java",
                "",
                &argv(&["java", "-jar", "build/shop-api.jar"]),
                0
            ),
            Some("shop-api".to_string())
        );
        // argv[0] is never scanned.
        assert_eq!(
            engine.match_name("/usr/bin/java", "", &argv(&["fake.jar"]), 0),
            None
        );
    }

    #[test]
    fn parent_dir_falls_back_past_generic_dirs() {
        let mut r = rule("parent", 1);
        r.name_source = NameSource::ParentDir;
        let engine = RuleEngine::from_rules(vec![r]);

        assert_eq!(
            engine.match_name("/opt/ollama/ollama", "", &[], 0),
            Some("ollama".to_string())
        );
        // Parent "bin" is generic, so the exe name is used.
        assert_eq!(
            engine.match_name("/usr/local/bin/caddy", "", &[], 0),
            Some("caddy".to_string())
        );
    }

    #[test]
    fn app_bundle_strips_the_suffix() {
        let mut r = rule("bundle", 1);
        r.name_source = NameSource::AppBundle;
        let engine = RuleEngine::from_rules(vec![r]);

        assert_eq!(
            engine.match_name("/Applications/Ollama.app/Contents/MacOS/Ollama", "", &[], 0),
            Some("Ollama".to_string())
        );
    }

    #[test]
    fn cwd_source_with_empty_cwd_does_not_match() {
        let mut r = rule("cwd", 1);
        r.name_source = NameSource::Cwd;
        let mut fallback = rule("fallback", 2);
        fallback.name_source = NameSource::Exe;

        let engine = RuleEngine::from_rules(vec![r, fallback]);
        assert_eq!(
            engine.match_name("/usr/local/bin/serve", "", &[], 0),
            Some("serve".to_string())
        );
    }

    #[test]
    fn user_rules_override_builtin_by_id() {
        let mut builtin = rule("shared", 10);
        builtin.name_source = NameSource::Static;
        builtin.static_name = Some("builtin".to_string());

        let mut user = rule("shared", 10);
        user.name_source = NameSource::Static;
        user.static_name = Some("user".to_string());

        let merged = merge_rules(vec![builtin], vec![user]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].static_name.as_deref(), Some("user"));
    }

    #[test]
    fn broken_pattern_never_matches_and_never_errors() {
        let mut r = rule("broken", 1);
        r.exe_pattern = Some("(unclosed".to_string());
        r.name_source = NameSource::Exe;

        let engine = RuleEngine::from_rules(vec![r]);
        assert_eq!(engine.match_name("/usr/bin/thing", "", &[], 0), None);
    }

    #[test]
    fn rules_round_trip_through_json() {
        let engine = RuleEngine::builtin();
        let json = engine.export_json().unwrap();
        let parsed: Vec<NamingRule> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, engine.rules());
    }

    #[test]
    fn unknown_fields_are_kept_and_re_exported() {
        let overlay = r#"[{
            "id": "custom",
            "description": "",
            "priority": 5,
            "name_source": "static",
            "static_name": "thing",
            "author": "ops",
            "since": "2026-01"
        }]"#;
        let rules: Vec<NamingRule> = serde_json::from_str(overlay).unwrap();
        assert_eq!(rules[0].extra["author"], "ops");

        let engine = RuleEngine::from_rules(rules);
        let exported = engine.export_json().unwrap();
        assert!(exported.contains("\"author\""));
        assert!(exported.contains("2026-01"));
    }
}
