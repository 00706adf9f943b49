//! # ftngate - FidoNet Technology Network gateway for a local BBS
//!
//! ftngate moves mail between a BBS's local message queues and FTN neighbours by way of
//! the file-based store-and-forward conventions FTN mailers understand: type 2+ packets,
//! compressed bundles named by day and sequence, and flow files or file-attach netmail.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ftngate::archiver::ArchiverTable;
//! use ftngate::config::Config;
//! use ftngate::pipeline::Pipeline;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let archiver = Box::new(ArchiverTable::new(config.archivers.clone()));
//!     let mut pipeline = Pipeline::new(&config, None, archiver)?;
//!     let stats = pipeline.run_import()?;
//!     println!("imported {} messages", stats.imported);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`ftn`] - FTN addresses, routing masks, dates, file naming and the packet codec
//! - [`localpkt`] - the BBS side: local message queues and subscriber lists
//! - [`dupe`] - persistent duplicate detection and MSGID allocation
//! - [`transcode`] - message body translation between both sides
//! - [`archiver`] - bundle compression, built-in TGZ plus external commands
//! - [`pipeline`] - the import and export runs
//! - [`config`] - TOML configuration
//! - [`lock`] - the cross-process run lock
//!
//! ## Data flow
//!
//! ```text
//!  inbound bundles ──► import ──► LOCAL.NET ──► BBS
//!                        │
//!                    dupe store
//!                        │
//!  BBS ──► s32765.net ──► export ──► packets ──► bundles ──► flow file / netmail
//!                                                    └──► DEAD.NET (unroutable)
//! ```

pub mod archiver;
pub mod config;
pub mod dupe;
pub mod ftn;
pub mod localpkt;
pub mod lock;
pub mod logutil;
pub mod pipeline;
pub mod transcode;
