#![forbid(unsafe_code)]

mod client;
mod connector;
mod error;
mod http;
mod resolver;
mod stdio;

pub(crate) use client::{CallOptions, ProxyClient};
pub(crate) use connector::{ConnectorFactory, DefaultConnectorFactory, PeerConnector};
pub(crate) use error::ProxyError;
pub(crate) use resolver::{PeerRegistry, PeerResolver};
