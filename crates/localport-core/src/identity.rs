//! Stable per-process identity.
//!
//! A service keeps its assigned name across restarts, port changes, and pid
//! changes, so the identity must come from what the process *is*, not where
//! it currently listens: the canonical executable path plus the full argv,
//! NUL-separated to keep `["a b"]` and `["a", "b"]` distinct.

use sha2::{Digest, Sha256};

/// Computes the identity hash for a process as lowercase hex.
pub fn identity_hash(exe_path: &str, args: &[String]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(exe_path.as_bytes());
    hasher.update([0u8]);
    for arg in args {
        hasher.update(arg.as_bytes());
        hasher.update([0u8]);
    }
    hex(&hasher.finalize())
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn stable_for_same_inputs() {
        let a = identity_hash("/usr/bin/node", &argv(&["node", "server.js"]));
        let b = identity_hash("/usr/bin/node", &argv(&["node", "server.js"]));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn sensitive_to_exe_and_args() {
        let base = identity_hash("/usr/bin/node", &argv(&["node", "server.js"]));
        assert_ne!(base, identity_hash("/usr/bin/deno", &argv(&["node", "server.js"])));
        assert_ne!(base, identity_hash("/usr/bin/node", &argv(&["node", "other.js"])));
        assert_ne!(base, identity_hash("/usr/bin/node", &argv(&["node"])));
    }

    #[test]
    fn arg_boundaries_matter() {
        // "a b" as one argument is a different process shape than "a" "b".
        let joined = identity_hash("/bin/x", &argv(&["a b"]));
        let split = identity_hash("/bin/x", &argv(&["a", "b"]));
        assert_ne!(joined, split);
    }
}
