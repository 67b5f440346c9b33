//! Git smart protocol plumbing for idlhub.
//!
//! The registry never reimplements git's object database: it validates and
//! confines untrusted paths, whitelists the two smart-protocol services,
//! frames service announcements as pkt-lines and proxies the actual pack
//! exchange to native `git` subprocesses. After a successful push, the
//! inspector decides whether schema sources changed.

pub mod error;
pub mod paths;
pub mod pkt;
pub mod repo;
pub mod runner;
pub mod service;
pub mod trigger;

pub use error::{Error, Result};
pub use paths::RepoRoot;
pub use repo::RepositoryRef;
pub use runner::{GitRunner, GitSession, SystemGitRunner};
pub use service::{parse_ssh_command, AccessMode, GitService};
pub use trigger::{PushInspector, PushedSchemas};
