//! HTTP implementation of the sync engine's [`RemoteApi`](courier_sync::RemoteApi).

mod client;
mod upload;

pub use client::HttpApi;
