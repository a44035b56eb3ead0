//! GitHub repository connector, driven through the sync bridge.
//!
//! The protocol-aware client code here is synchronous:
//! [`GithubRest`] builds requests, validates statuses, follows `Link`
//! pagination, and decodes payloads without ever awaiting. [`Repos`] makes
//! it usable from async callers by driving every call through a
//! [`Bridge`](crate::bridge::Bridge), which traps each outbound request,
//! performs it on the async transport, and replays the call.

mod repos;
mod rest;

pub use repos::Repos;
pub use rest::{GITHUB_HOST, GithubRest, RepoPage, RestError, SearchPage};
