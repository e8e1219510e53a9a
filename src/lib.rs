//! DragonStash: a user-space caching filesystem that mirrors a remote
//! read-only source tree into a local cache and serves it through a
//! kernel filesystem interface.
//!
//! ```text
//!   fuser::mount2
//!        |
//!   fuse_glue::DragonStashFs   (kernel-interface collaborator)
//!        |
//!   adapter::Adapter            reconciles cache + backend
//!      /         \
//!  engine::Engine   backend::Backend   (transactional cache / remote mirror)
//!      |
//!  blocklist::Blocklist         (per-regular-file block residency)
//! ```
//!
//! The two hard parts are the transactional [`engine`] (a `redb`-backed
//! inode/directory store with nested transactions and two-phase commit
//! hooks) and the mmap-backed [`blocklist`]. Everything else is thin
//! orchestration glue over those two.

pub mod adapter;
pub mod backend;
pub mod blocklist;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod fd;
pub mod fuse_glue;
