//! Skimmer - lazy paginated access to heterogeneous data sources.
//!
//! Every source is a [`Repository`]: identified JSON documents served page by
//! page, with each fetch deferred until the walk actually reaches it.
//! Connectors exist for Greenhouse job boards, Jira issues, Confluence pages,
//! GitHub repositories, and CSV files. Sources without a native search
//! endpoint fall back to a client-side substring filter over the listing.
//!
//! # Features
//!
//! - `greenhouse`, `jira`, `confluence`, `github`, `csv` - one flag per
//!   connector, all on by default. The repository protocol itself is always
//!   compiled.
//!
//! # Example
//!
//! ```ignore
//! use skimmer::{Repository, greenhouse::Jobs};
//!
//! let jobs = Jobs::new("acme")?;
//!
//! // Walk every posting, fetching pages as the walk reaches them.
//! let mut items = jobs.list();
//! while let Some(item) = items.try_next().await? {
//!     println!("{}: {}", item.id(), item.document()["title"]);
//! }
//!
//! // No search endpoint on this board, so this filters client-side.
//! let hits = jobs.search("rust").try_collect().await?;
//! ```

pub mod bridge;
pub mod http;
pub mod lazy;
pub mod repo;
pub mod retry;
pub mod text;

#[cfg(feature = "greenhouse")]
pub mod greenhouse;

#[cfg(feature = "jira")]
pub mod jira;

#[cfg(feature = "confluence")]
pub mod confluence;

#[cfg(feature = "github")]
pub mod github;

#[cfg(feature = "csv")]
pub mod csv;

pub use bridge::{
    Bridge, BridgeError, BridgeSession, BlockingTransport, DispatchError, TrapError,
};
pub use lazy::LazySlot;
pub use repo::{Item, Items, NextPage, Page, Pages, RepoError, Repository, filter_page};
pub use retry::RetryPolicy;
