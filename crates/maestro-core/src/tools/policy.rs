//! Shell-command policy
//!
//! Commands are split on whitespace with no shell interpretation. The first
//! token must be in the safe set, no token may be in the denied set, and
//! shell metacharacters reject the whole command unless it is explicitly
//! whitelisted as needing them.

use crate::config::ToolPolicy;

/// Rejection message for allow/deny violations, matched verbatim.
pub const NOT_PERMITTED: &str = "command not permitted";

const METACHARACTERS: &[char] = &[';', '|', '&', '>', '<', '`', '$', '(', ')'];

/// Validate a command line against the policy. Returns the whitespace
/// tokens on success so the executor spawns exactly what was checked.
pub fn validate_command(command: &str, policy: &ToolPolicy) -> Result<Vec<String>, String> {
    let tokens: Vec<String> = command.split_whitespace().map(str::to_string).collect();
    let Some(first) = tokens.first() else {
        return Err("empty command".to_string());
    };

    // A leading path never bypasses the check: /usr/bin/rm is still rm.
    let base = first.rsplit('/').next().unwrap_or(first);

    if policy.denied_commands.contains(base) || !policy.safe_commands.contains(base) {
        return Err(NOT_PERMITTED.to_string());
    }

    for token in &tokens[1..] {
        let token_base = token.rsplit('/').next().unwrap_or(token);
        if policy.denied_commands.contains(token_base) {
            return Err(NOT_PERMITTED.to_string());
        }
    }

    if !policy.allow_metacharacters_for.contains(base)
        && command.contains(METACHARACTERS)
    {
        return Err("shell metacharacters not permitted".to_string());
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ToolPolicy {
        ToolPolicy::default()
    }

    #[test]
    fn safe_command_passes_and_tokenises() {
        let tokens = validate_command("echo hi there", &policy()).unwrap();
        assert_eq!(tokens, vec!["echo", "hi", "there"]);
    }

    #[test]
    fn unlisted_command_is_rejected() {
        let err = validate_command("curl http://example.com", &policy()).unwrap_err();
        assert_eq!(err, NOT_PERMITTED);
    }

    #[test]
    fn denied_command_is_rejected() {
        let err = validate_command("rm -rf /", &policy()).unwrap_err();
        assert_eq!(err, NOT_PERMITTED);
    }

    #[test]
    fn denied_command_as_later_token_is_rejected() {
        // `find` is safe, but it must not smuggle a denied binary.
        let err = validate_command("find . -exec rm {}", &policy()).unwrap_err();
        assert_eq!(err, NOT_PERMITTED);
    }

    #[test]
    fn path_prefix_does_not_bypass_deny() {
        let err = validate_command("/bin/rm file", &policy()).unwrap_err();
        assert_eq!(err, NOT_PERMITTED);
    }

    #[test]
    fn metacharacters_are_rejected_by_default() {
        for cmd in ["echo hi; ls", "cat a | sort", "echo $(pwd)", "echo hi > out"] {
            let err = validate_command(cmd, &policy()).unwrap_err();
            assert!(err.contains("metacharacters"), "{cmd} -> {err}");
        }
    }

    #[test]
    fn metacharacters_allowed_when_opted_in() {
        let mut policy = policy();
        policy.allow_metacharacters_for.insert("grep".to_string());
        assert!(validate_command("grep -c foo|bar file", &policy).is_ok());
    }

    #[test]
    fn empty_command_is_rejected() {
        assert_eq!(validate_command("   ", &policy()).unwrap_err(), "empty command");
    }
}
