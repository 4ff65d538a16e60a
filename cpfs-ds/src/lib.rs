//! DS group state machine for CPFS data servers.
//!
//! A data server belongs to a DS group (DSG) of peers that jointly stripe
//! file data. This crate tracks the group's state, the set of inodes that
//! must be resynced to a rejoining peer, and drives the transitions between.
//!
//! # Architecture
//!
//! ```text
//!   request handlers          control paths
//!   ┌─────────────┐          ┌──────────────┐
//!   │ RequestGate │          │ GroupControl │
//!   └──────┬──────┘          └──────┬───────┘
//!          │ read guard             │ write guard
//!   ┌──────▼────────────────────────▼───────┐
//!   │              DataServer               │
//!   │  ┌────────────┐   ┌────────────────┐  │
//!   │  │ GroupState │──▶│ResyncSetTracker│  │
//!   │  │(state lock)│   │  (data lock)   │  │
//!   │  └────────────┘   └────────────────┘  │
//!   │            Collaborators              │
//!   └───────────────────────────────────────┘
//! ```
//!
//! The arrow is the only permitted lock order.
//!
//! # Usage
//!
//! ```ignore
//! use cpfs_ds::{DataServer, DataServerConfig, GroupControl};
//!
//! let config = DataServerConfig::load_file("/etc/cpfs/ds.yaml")?;
//! let server = Arc::new(DataServer::start(config, collaborators)?);
//! let control = GroupControl::new(server.clone());
//!
//! control.transition(DsgState::Ready, None)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod collaborators;
pub mod config;
pub mod control;
pub mod dsg;
pub mod error;
pub mod observability;
pub mod request;
pub mod server;
pub mod testing;

// Re-export main types
pub use collaborators::{Collaborators, CollaboratorsBuilder, Component};
pub use config::{DataServerConfig, ResyncConfig};
pub use control::GroupControl;
pub use cpfs_core::{DsgState, GroupId, GroupRole, InodeNum};
pub use dsg::{GroupState, ResyncSetTracker, StateSnapshot};
pub use error::{DsError, DsResult};
pub use request::{Decision, RequestDisposition, RequestGate};
pub use server::DataServer;
