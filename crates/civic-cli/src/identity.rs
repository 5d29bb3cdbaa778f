//! Acting-user resolution for CLI commands.
//!
//! User chain: `--user` flag > `CIVIC_USER` env > `USER` env (TTY only).
//! Role: `--employee` flag, or `CIVIC_ROLE` in {employee, admin, city employee}.

use crate::output::CliError;
use civic_core::error::ErrorCode;
use civic_core::model::Actor;
use std::env;

/// Environment reader, injectable for tests.
trait EnvReader {
    fn get(&self, key: &str) -> Option<String>;
    fn is_tty(&self) -> bool;
}

struct RealEnv;

impl EnvReader for RealEnv {
    fn get(&self, key: &str) -> Option<String> {
        env::var(key).ok().filter(|v| !v.trim().is_empty())
    }

    fn is_tty(&self) -> bool {
        use std::io::IsTerminal;
        std::io::stdin().is_terminal()
    }
}

fn resolve_user_with(cli_flag: Option<&str>, env: &dyn EnvReader) -> Option<String> {
    if let Some(user) = cli_flag.map(str::trim).filter(|u| !u.is_empty()) {
        return Some(user.to_string());
    }
    if let Some(user) = env.get("CIVIC_USER") {
        return Some(user.trim().to_string());
    }
    if env.is_tty() {
        return env.get("USER").map(|u| u.trim().to_string());
    }
    None
}

fn is_employee_role(role: &str) -> bool {
    matches!(
        role.trim().to_ascii_lowercase().replace(['_', '-'], " ").as_str(),
        "employee" | "admin" | "city employee"
    )
}

fn resolve_actor_with(
    user_flag: Option<&str>,
    employee_flag: bool,
    env: &dyn EnvReader,
) -> Result<Actor, CliError> {
    let user = resolve_user_with(user_flag, env).ok_or_else(|| {
        let code = ErrorCode::MissingActor;
        CliError::with_details(
            code.message(),
            code.hint().unwrap_or_default(),
            code.code(),
        )
    })?;
    let employee = employee_flag || env.get("CIVIC_ROLE").is_some_and(|r| is_employee_role(&r));
    Ok(if employee {
        Actor::employee(user)
    } else {
        Actor::citizen(user)
    })
}

/// Resolve the acting user for a mutating command.
pub fn require_actor(user_flag: Option<&str>, employee_flag: bool) -> Result<Actor, CliError> {
    resolve_actor_with(user_flag, employee_flag, &RealEnv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MockEnv {
        vars: HashMap<&'static str, &'static str>,
        tty: bool,
    }

    impl MockEnv {
        fn new(vars: &[(&'static str, &'static str)], tty: bool) -> Self {
            Self {
                vars: vars.iter().copied().collect(),
                tty,
            }
        }
    }

    impl EnvReader for MockEnv {
        fn get(&self, key: &str) -> Option<String> {
            self.vars
                .get(key)
                .map(|v| (*v).to_string())
                .filter(|v| !v.is_empty())
        }

        fn is_tty(&self) -> bool {
            self.tty
        }
    }

    #[test]
    fn flag_beats_environment() {
        let env = MockEnv::new(&[("CIVIC_USER", "env-user"), ("USER", "shell")], true);
        let actor = resolve_actor_with(Some("flag-user"), false, &env).unwrap();
        assert_eq!(actor.user_id.as_str(), "flag-user");
        assert!(!actor.is_employee);
    }

    #[test]
    fn civic_user_beats_user() {
        let env = MockEnv::new(&[("CIVIC_USER", "env-user"), ("USER", "shell")], true);
        let actor = resolve_actor_with(None, false, &env).unwrap();
        assert_eq!(actor.user_id.as_str(), "env-user");
    }

    #[test]
    fn user_only_counts_on_a_tty() {
        let env = MockEnv::new(&[("USER", "shell")], false);
        let err = resolve_actor_with(None, false, &env).unwrap_err();
        assert_eq!(err.error_code.as_deref(), Some(ErrorCode::MissingActor.code()));

        let env = MockEnv::new(&[("USER", "shell")], true);
        assert_eq!(
            resolve_actor_with(None, false, &env).unwrap().user_id.as_str(),
            "shell"
        );
    }

    #[test]
    fn blank_flag_falls_through() {
        let env = MockEnv::new(&[("CIVIC_USER", "env-user")], false);
        let actor = resolve_actor_with(Some("  "), false, &env).unwrap();
        assert_eq!(actor.user_id.as_str(), "env-user");
    }

    #[test]
    fn role_from_flag_or_env() {
        let env = MockEnv::new(&[("CIVIC_USER", "clerk")], false);
        assert!(resolve_actor_with(None, true, &env).unwrap().is_employee);

        for role in ["employee", "Admin", "city employee", "city_employee"] {
            let vars = [("CIVIC_USER", "clerk"), ("CIVIC_ROLE", role)];
            let env = MockEnv {
                vars: vars.iter().copied().collect(),
                tty: false,
            };
            assert!(resolve_actor_with(None, false, &env).unwrap().is_employee, "{role}");
        }

        let env = MockEnv::new(&[("CIVIC_USER", "ana"), ("CIVIC_ROLE", "citizen")], false);
        assert!(!resolve_actor_with(None, false, &env).unwrap().is_employee);
    }
}
