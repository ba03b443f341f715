//! The Key Pool: one [`pool::KeyPool`] facade fronting a [`keyproxy_core::provider::CredentialProvider`]
//! and [`keyproxy_queue::DispatchQueue`] per upstream service, plus the
//! global recheck cron (spec.md §4.3).

pub mod cron;
pub mod pool;

pub use cron::spawn_recheck_cron;
pub use pool::KeyPool;
