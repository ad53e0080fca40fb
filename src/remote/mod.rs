//! riak-admin command vocabulary and the seam that runs it.
//!
//! Commands are structured values; `render` produces the shell line, `Display`
//! produces the same line with passwords masked for logs and errors.

mod ssh;

pub use ssh::SshExecutor;

use std::fmt::{Display, Formatter};

use async_trait::async_trait;

use crate::error::ProvisionResult;

/// Permissions granted to a bound app on its bucket.
pub const BUCKET_PERMISSIONS: [&str; 6] = [
    "riak_kv.get",
    "riak_kv.put",
    "riak_kv.delete",
    "riak_kv.index",
    "riak_kv.list_keys",
    "riak_kv.list_buckets",
];

/// Network range for password auth sources.
pub const OPEN_SOURCE_CIDR: &str = "0.0.0.0/0";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    ListBucketTypes,
    CreateBucketType { name: String, datatype: String },
    ActivateBucketType { name: String },
    AddUser { username: String, password: String },
    Grant { bucket_type: String, bucket: String, username: String },
    Revoke { bucket_type: String, bucket: String, username: String },
    AddSource { username: String },
    DelSource { username: String },
}

impl AdminCommand {
    /// Short label used for logging and for failure injection in the test double.
    pub fn kind(&self) -> &'static str {
        match self {
            AdminCommand::ListBucketTypes => "bucket-type list",
            AdminCommand::CreateBucketType { .. } => "bucket-type create",
            AdminCommand::ActivateBucketType { .. } => "bucket-type activate",
            AdminCommand::AddUser { .. } => "security add-user",
            AdminCommand::Grant { .. } => "security grant",
            AdminCommand::Revoke { .. } => "security revoke",
            AdminCommand::AddSource { .. } => "security add-source",
            AdminCommand::DelSource { .. } => "security del-source",
        }
    }

    fn args(&self, password_shown: &str) -> String {
        let perms = BUCKET_PERMISSIONS.join(",");
        match self {
            AdminCommand::ListBucketTypes => "bucket-type list".to_string(),
            AdminCommand::CreateBucketType { name, datatype } => format!(
                "bucket-type create {} '{{\"props\":{{\"datatype\":\"{}\",\"allow_mult\":true}}}}'",
                shell_word(name),
                datatype
            ),
            AdminCommand::ActivateBucketType { name } => format!("bucket-type activate {}", shell_word(name)),
            AdminCommand::AddUser { username, .. } => {
                format!("security add-user {} password={}", shell_word(username), password_shown)
            }
            AdminCommand::Grant { bucket_type, bucket, username } => format!(
                "security grant {} on {} {} to {}",
                perms,
                shell_word(bucket_type),
                shell_word(bucket),
                shell_word(username)
            ),
            AdminCommand::Revoke { bucket_type, bucket, username } => format!(
                "security revoke {} on {} {} from {}",
                perms,
                shell_word(bucket_type),
                shell_word(bucket),
                shell_word(username)
            ),
            AdminCommand::AddSource { username } => {
                format!("security add-source {} {} password", shell_word(username), OPEN_SOURCE_CIDR)
            }
            AdminCommand::DelSource { username } => {
                format!("security del-source {} {}", shell_word(username), OPEN_SOURCE_CIDR)
            }
        }
    }

    /// Full command line as run on the remote host.
    pub fn render(&self, sudo: bool) -> String {
        let password = match self {
            AdminCommand::AddUser { password, .. } => shell_word(password),
            _ => String::new(),
        };
        let prefix = if sudo { "sudo riak-admin" } else { "riak-admin" };
        format!("{} {}", prefix, self.args(&password))
    }
}

impl Display for AdminCommand {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "riak-admin {}", self.args("********"))
    }
}

/// Single-quote a value for the remote shell unless it is plainly safe.
fn shell_word(s: &str) -> String {
    let safe = !s.is_empty()
        && s.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@' | '/' | ':'));
    if safe {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\\''"))
    }
}

/// True when `bucket-type list` output names `bucket_type` on one of its lines.
///
/// riak-admin prints one `<name> (active|not active)` entry per line.
pub fn bucket_type_listed(output: &str, bucket_type: &str) -> bool {
    output
        .lines()
        .filter_map(|l| l.split_whitespace().next())
        .any(|name| name == bucket_type)
}

/// Runs one administrative command to completion.
///
/// Implementations return stdout on exit status zero and `ProvisionError::RemoteCommand`
/// otherwise. No retries.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(&self, command: &AdminCommand) -> ProvisionResult<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_bucket_type_renders_props_json() {
        let cmd = AdminCommand::CreateBucketType { name: "tsuru-counter".into(), datatype: "counter".into() };
        assert_eq!(
            cmd.render(true),
            r#"sudo riak-admin bucket-type create tsuru-counter '{"props":{"datatype":"counter","allow_mult":true}}'"#
        );
    }

    #[test]
    fn grant_lists_all_six_permissions() {
        let cmd = AdminCommand::Grant { bucket_type: "tsuru-set".into(), bucket: "orders".into(), username: "tsuru_app".into() };
        let line = cmd.render(false);
        assert!(line.starts_with("riak-admin security grant riak_kv.get,riak_kv.put,riak_kv.delete,riak_kv.index,riak_kv.list_keys,riak_kv.list_buckets"));
        assert!(line.ends_with("on tsuru-set orders to tsuru_app"));
    }

    #[test]
    fn display_masks_password() {
        let cmd = AdminCommand::AddUser { username: "tsuru_app".into(), password: "abc123".into() };
        assert!(cmd.render(true).contains("password=abc123"));
        assert!(!cmd.to_string().contains("abc123"));
    }

    #[test]
    fn odd_values_are_quoted() {
        let cmd = AdminCommand::ActivateBucketType { name: "bad name;rm".into() };
        assert_eq!(cmd.render(false), "riak-admin bucket-type activate 'bad name;rm'");
        assert_eq!(shell_word("it's"), "'it'\\''s'");
    }

    #[test]
    fn listing_matches_whole_names_only() {
        let out = "default (active)\ntsuru-counter (not active)\ntsuru-counter-old (active)\n";
        assert!(bucket_type_listed(out, "tsuru-counter"));
        assert!(bucket_type_listed(out, "default"));
        assert!(!bucket_type_listed(out, "tsuru-set"));
        assert!(!bucket_type_listed(out, "tsuru"));
    }
}
