//! The two whitelisted smart-protocol services.

/// Operation a service implies on the target repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
}

/// A git smart-protocol service.
///
/// Only the literal commands `git-upload-pack` and `git-receive-pack` are
/// ever accepted; everything else is rejected before a subprocess is
/// considered. This whitelist is the primary defense against command
/// injection through an untrusted path argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitService {
    UploadPack,
    ReceivePack,
}

impl GitService {
    /// Parse a service name as it appears in `?service=` or an SSH command.
    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "git-upload-pack" => Some(GitService::UploadPack),
            "git-receive-pack" => Some(GitService::ReceivePack),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GitService::UploadPack => "git-upload-pack",
            GitService::ReceivePack => "git-receive-pack",
        }
    }

    /// Subcommand passed to the `git` binary.
    pub fn subcommand(&self) -> &'static str {
        match self {
            GitService::UploadPack => "upload-pack",
            GitService::ReceivePack => "receive-pack",
        }
    }

    /// `git-receive-pack` writes; everything else reads.
    pub fn access(&self) -> AccessMode {
        match self {
            GitService::UploadPack => AccessMode::Read,
            GitService::ReceivePack => AccessMode::Write,
        }
    }

    pub fn advertisement_content_type(&self) -> &'static str {
        match self {
            GitService::UploadPack => "application/x-git-upload-pack-advertisement",
            GitService::ReceivePack => "application/x-git-receive-pack-advertisement",
        }
    }

    pub fn result_content_type(&self) -> &'static str {
        match self {
            GitService::UploadPack => "application/x-git-upload-pack-result",
            GitService::ReceivePack => "application/x-git-receive-pack-result",
        }
    }
}

/// Parse an SSH exec command like `git-upload-pack '/org/repo'` into the
/// service and its raw, still-untrusted path argument.
pub fn parse_ssh_command(command: &str) -> Option<(GitService, String)> {
    let command = command.trim();
    let (name, rest) = command.split_once(' ')?;
    let service = GitService::from_name(name)?;
    let raw_path = rest.trim().trim_matches('\'').trim_matches('"');
    if raw_path.is_empty() {
        return None;
    }
    Some((service, raw_path.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitelist_accepts_only_the_two_services() {
        assert_eq!(GitService::from_name("git-upload-pack"), Some(GitService::UploadPack));
        assert_eq!(GitService::from_name("git-receive-pack"), Some(GitService::ReceivePack));
        assert_eq!(GitService::from_name("git-upload-archive"), None);
        assert_eq!(GitService::from_name("rm"), None);
        assert_eq!(GitService::from_name(""), None);
    }

    #[test]
    fn receive_pack_implies_write() {
        assert_eq!(GitService::UploadPack.access(), AccessMode::Read);
        assert_eq!(GitService::ReceivePack.access(), AccessMode::Write);
    }

    #[test]
    fn parses_quoted_ssh_commands() {
        let (service, path) = parse_ssh_command("git-upload-pack 'acme/telemetry'").unwrap();
        assert_eq!(service, GitService::UploadPack);
        assert_eq!(path, "acme/telemetry");

        let (service, path) = parse_ssh_command("git-receive-pack \"acme/billing\"").unwrap();
        assert_eq!(service, GitService::ReceivePack);
        assert_eq!(path, "acme/billing");
    }

    #[test]
    fn rejects_non_git_commands_before_path_handling() {
        assert!(parse_ssh_command("scp -f /etc/passwd").is_none());
        assert!(parse_ssh_command("git-upload-archive 'repo'").is_none());
        assert!(parse_ssh_command("git-upload-pack").is_none());
        assert!(parse_ssh_command("git-upload-pack ''").is_none());
    }
}
