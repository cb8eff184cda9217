//! Reconstructs the tree of SSH tunnels, master sockets, and sessions
//! running on the local host from a process listing and a socket listing.
//!
//! The pipeline is three pure stages over one snapshot: per-line parsing
//! ([`parse`]), association into an annotated forest ([`assoc`]), and text
//! rendering ([`render`]). Acquisition ([`acquire`]) is the only stage that
//! touches the system.

pub mod acquire;
pub mod assoc;
pub mod cli;
pub mod error;
pub mod model;
pub mod parse;
pub mod render;

pub use assoc::associate;
pub use model::Forest;
pub use render::{render_forest, RenderOptions};
