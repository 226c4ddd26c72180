//! ShipFlow Docker / Registry integration
//!
//! This crate provides the Docker-backed pipeline stages for ShipFlow:
//! registry authentication, build context creation, image building,
//! image pushing with digest resolution, and the registry v2 client.

pub mod auth;
pub mod builder;
pub mod context;
pub mod error;
pub mod publisher;
pub mod pusher;
pub mod registry;

pub use auth::{DockerAuthenticator, RegistryAuth, write_docker_config};
pub use builder::{BuildLog, ImageBuilder};
pub use context::ContextBuilder;
pub use error::{RegistryError, RegistryResult};
pub use publisher::DockerPublisher;
pub use pusher::{ImagePusher, parse_push_digest};
pub use registry::{RegistryClient, api_base_url, parse_challenge};
