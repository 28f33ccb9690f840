//! Applies a Cloud Armor security policy to the Compute Engine instances
//! backing Kubernetes nodes that match a label selector.

pub mod cli;
pub mod client;
pub mod cluster;
pub mod config;
pub mod selector;
pub mod server;
