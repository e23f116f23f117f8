//! Name generation.
//!
//! Turns process information into a stable, human-readable `.localhost`
//! name. The rule engine runs first; a set of heuristics covers processes no
//! rule matches. Candidate names are sanitized into DNS-safe labels, and
//! collisions resolve by numeric suffix with a hash fallback once the
//! numbers run out.

pub mod rules;

use std::collections::HashSet;

pub use rules::{load_rules_file, merge_rules, NameSource, NamingRule, RuleEngine};

use rules::{basename, is_generic_dir, parent_dir};

use crate::identity::identity_hash;

/// Maximum length of a generated label before the `.localhost` suffix.
const MAX_NAME_LEN: usize = 50;

/// Highest numeric suffix tried before falling back to a hash.
const MAX_NUMERIC_SUFFIX: u32 = 999;

/// Tools that serve whatever directory they are started from.
const CWD_TOOLS: &[&str] = &[
    "serve",
    "http-server",
    "hs",
    "npx",
    "live-server",
    "browser-sync",
];

/// Sanitizes a raw candidate into a DNS-safe label.
///
/// Lower-cases, collapses every run of non-`[a-z0-9]` into a single `-`,
/// trims edge hyphens, substitutes `app` for an empty result, and truncates
/// to 50 characters. Idempotent.
pub fn sanitize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_hyphen = false;

    for c in name.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending_hyphen && !out.is_empty() {
                out.push('-');
            }
            pending_hyphen = false;
            out.push(c);
        } else {
            pending_hyphen = true;
        }
    }

    if out.is_empty() {
        out.push_str("app");
    }
    out.truncate(MAX_NAME_LEN);
    while out.ends_with('-') {
        out.pop();
    }
    out
}

/// Heuristic base name for processes no rule matched.
pub fn extract_base_name(exe_path: &str, cwd: &str, args: &[String]) -> String {
    if let Some(bundle) = app_bundle_name(exe_path) {
        return bundle;
    }
    if let Some(project) = project_name_from_args(args) {
        return project;
    }

    let exe_name = basename(exe_path);
    if should_use_cwd(exe_name, args) && !cwd.is_empty() {
        return basename(cwd).to_string();
    }
    if is_system_binary(exe_path) {
        return exe_name.to_string();
    }

    let parent = basename(parent_dir(exe_path));
    if parent.is_empty() || is_generic_dir(parent) {
        exe_name.to_string()
    } else {
        parent.to_string()
    }
}

/// Display group for a name: the label minus any numeric collision suffix.
pub fn extract_group(name: &str) -> String {
    let base = name.strip_suffix(".localhost").unwrap_or(name);
    if let Some((prefix, suffix)) = base.rsplit_once('-') {
        if !prefix.is_empty() && !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()) {
            return prefix.to_string();
        }
    }
    base.to_string()
}

/// Display group preferring the executable's app bundle over the name prefix.
pub fn extract_group_from_exe(exe_path: &str, name: &str) -> String {
    match app_bundle_name(exe_path) {
        Some(bundle) => sanitize(&bundle),
        None => extract_group(name),
    }
}

fn app_bundle_name(exe_path: &str) -> Option<String> {
    exe_path
        .split('/')
        .find_map(|part| part.strip_suffix(".app"))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Project name from an interpreted script path, e.g. `node app/server.js`
/// names the service `app`.
fn project_name_from_args(args: &[String]) -> Option<String> {
    let script = args.get(1)?;
    if !script.contains('/') && !script.starts_with('.') {
        return None;
    }
    let dir = parent_dir(script);
    if dir.is_empty() || dir == "." {
        return None;
    }
    Some(basename(dir).to_string())
}

fn should_use_cwd(exe_name: &str, args: &[String]) -> bool {
    if CWD_TOOLS.contains(&exe_name) {
        return true;
    }
    if exe_name == "python" || exe_name == "python3" {
        return args
            .iter()
            .any(|a| a == "http.server" || a == "-mhttp.server");
    }
    if exe_name == "node" || exe_name == "nodejs" {
        return match args.get(1) {
            None => true,
            Some(first) => first.starts_with('-') || (!first.contains('/') && !first.starts_with('.')),
        };
    }
    false
}

fn is_system_binary(exe_path: &str) -> bool {
    ["/usr/bin/", "/usr/sbin/", "/bin/", "/sbin/"]
        .iter()
        .any(|p| exe_path.starts_with(p))
}

/// Allocates `.localhost` names, tracking which labels are in use.
///
/// Allocation and record insertion must happen in the same critical section;
/// the daemon keeps this behind the same lock scope as the service table.
pub struct NameGenerator {
    used: HashSet<String>,
    engine: RuleEngine,
}

impl NameGenerator {
    /// Generator over a specific rule engine.
    pub fn new(engine: RuleEngine) -> Self {
        Self {
            used: HashSet::new(),
            engine,
        }
    }

    /// Generator over the built-in rules only.
    pub fn with_builtin_rules() -> Self {
        Self::new(RuleEngine::builtin())
    }

    /// Returns the rule engine.
    pub fn engine(&self) -> &RuleEngine {
        &self.engine
    }

    /// Generates a unique `.localhost` name for a process and registers it.
    pub fn generate(&mut self, exe_path: &str, cwd: &str, args: &[String], port: u16) -> String {
        let base = self
            .engine
            .match_name(exe_path, cwd, args, port)
            .unwrap_or_else(|| extract_base_name(exe_path, cwd, args));
        let cleaned = sanitize(&base);

        if self.used.insert(cleaned.clone()) {
            return format!("{cleaned}.localhost");
        }

        for i in 1..=MAX_NUMERIC_SUFFIX {
            let candidate = format!("{cleaned}-{i}");
            if self.used.insert(candidate.clone()) {
                return format!("{candidate}.localhost");
            }
        }

        // Numbers exhausted; disambiguate with the identity hash.
        let hash = identity_hash(exe_path, args);
        let candidate = format!("{cleaned}-{}", &hash[..8]);
        self.used.insert(candidate.clone());
        format!("{candidate}.localhost")
    }

    /// Registers an existing name (e.g. from the store at startup) as used.
    pub fn mark_used(&mut self, name: &str) {
        self.used.insert(strip_suffix(name).to_string());
    }

    /// Releases a name so it can be allocated again.
    pub fn release(&mut self, name: &str) {
        self.used.remove(strip_suffix(name));
    }

    /// True when the label of `name` is currently allocated.
    pub fn is_used(&self, name: &str) -> bool {
        self.used.contains(strip_suffix(name))
    }
}

fn strip_suffix(name: &str) -> &str {
    name.strip_suffix(".localhost").unwrap_or(name)
}
