//! Binding to a remote Cytomine instance.
//!
//! - [`CytomineClient`]: REST client for image metadata and tile downloads
//! - [`RemoteTileProvider`]: [`FetchProvider`](crate::tile::FetchProvider)
//!   plugging the client into a [`TileCache`](crate::tile::TileCache)
//! - [`TileProtocol`]: IIP, Zoomify or window downloads
//! - [`infer_protocol`]: picks a protocol from what the server supports

mod client;
mod detect;
mod protocol;
mod provider;

pub use client::{CytomineClient, DEFAULT_TIMEOUT_SECS};
pub use detect::{infer_protocol, infer_protocol_for};
pub use protocol::TileProtocol;
pub use provider::RemoteTileProvider;
