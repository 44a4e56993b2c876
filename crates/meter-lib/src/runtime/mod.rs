//! Container lifecycle controller
//!
//! Thin wrapper over a container runtime client: every operation is a
//! direct one-shot call. Multi-step operations (inspect, then create) are
//! not rolled back when a later step fails.

mod docker;
mod port_mapping;

pub use docker::BollardRuntime;
pub use port_mapping::{PortMapping, PortMappingError, Protocol};

use async_trait::async_trait;
use bollard::container::Config;
use bollard::errors::Error as DockerError;
use bollard::models::{ContainerCreateResponse, ContainerInspectResponse, HostConfig, PortBinding};
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Error returned by the runtime client, unchanged
    #[error(transparent)]
    Client(#[from] DockerError),

    #[error("invalid port mapping: {0}")]
    PortMapping(#[from] PortMappingError),

    #[error("container {id} has no image to duplicate")]
    MissingImage { id: String },
}

/// The runtime calls the controller needs
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn inspect_container(&self, id: &str) -> Result<ContainerInspectResponse, DockerError>;

    async fn create_container(
        &self,
        config: Config<String>,
    ) -> Result<ContainerCreateResponse, DockerError>;

    async fn start_container(&self, id: &str) -> Result<(), DockerError>;

    async fn stop_container(&self, id: &str) -> Result<(), DockerError>;
}

/// Summary of an inspected container
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContainerDetails {
    pub id: String,
    pub name: Option<String>,
    pub image: Option<String>,
    pub status: Option<String>,
    pub running: bool,
}

impl ContainerDetails {
    fn from_inspect(requested_id: &str, inspect: &ContainerInspectResponse) -> Self {
        let state = inspect.state.as_ref();
        Self {
            id: inspect
                .id
                .clone()
                .unwrap_or_else(|| requested_id.to_string()),
            name: inspect
                .name
                .as_deref()
                .map(|n| n.trim_start_matches('/').to_string()),
            image: image_of(inspect),
            status: state
                .and_then(|s| s.status.as_ref())
                .map(|status| status.to_string()),
            running: state.and_then(|s| s.running).unwrap_or(false),
        }
    }
}

/// Image a duplicate should be created from: the configured image name,
/// falling back to the resolved image id
fn image_of(inspect: &ContainerInspectResponse) -> Option<String> {
    inspect
        .config
        .as_ref()
        .and_then(|c| c.image.clone())
        .or_else(|| inspect.image.clone())
        .filter(|image| !image.is_empty())
}

/// Lifecycle operations against one container
pub struct RuntimeController<R> {
    runtime: R,
    container_id: String,
}

impl<R: ContainerRuntime> RuntimeController<R> {
    pub fn new(runtime: R, container_id: impl Into<String>) -> Self {
        Self {
            runtime,
            container_id: container_id.into(),
        }
    }

    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    /// Start the container; returns its id
    pub async fn start(&self) -> Result<String, RuntimeError> {
        self.runtime.start_container(&self.container_id).await?;
        info!(container_id = %self.container_id, "Container started");
        Ok(self.container_id.clone())
    }

    /// Stop the container; returns its id
    pub async fn stop(&self) -> Result<String, RuntimeError> {
        self.runtime.stop_container(&self.container_id).await?;
        info!(container_id = %self.container_id, "Container stopped");
        Ok(self.container_id.clone())
    }

    pub async fn inspect(&self) -> Result<ContainerDetails, RuntimeError> {
        let inspect = self.runtime.inspect_container(&self.container_id).await?;
        Ok(ContainerDetails::from_inspect(&self.container_id, &inspect))
    }

    /// Create a new container from this container's image; returns the new id
    pub async fn duplicate(&self) -> Result<String, RuntimeError> {
        let image = self.source_image().await?;

        let config = Config {
            image: Some(image),
            ..Default::default()
        };

        self.create(config).await
    }

    /// Like `duplicate`, with one port binding on the new container
    pub async fn duplicate_with_port(&self, port_mapping: &str) -> Result<String, RuntimeError> {
        let mapping: PortMapping = port_mapping.parse()?;
        let image = self.source_image().await?;

        self.create(duplicate_config(image, &mapping)).await
    }

    async fn source_image(&self) -> Result<String, RuntimeError> {
        let inspect = self.runtime.inspect_container(&self.container_id).await?;
        image_of(&inspect).ok_or_else(|| RuntimeError::MissingImage {
            id: self.container_id.clone(),
        })
    }

    async fn create(&self, config: Config<String>) -> Result<String, RuntimeError> {
        let response = self.runtime.create_container(config).await?;
        for warning in &response.warnings {
            warn!(container_id = %response.id, warning = %warning, "Runtime warning on create");
        }
        info!(
            source_id = %self.container_id,
            container_id = %response.id,
            "Container duplicated"
        );
        Ok(response.id)
    }
}

fn duplicate_config(image: String, mapping: &PortMapping) -> Config<String> {
    let key = mapping.container_key();

    let mut port_bindings = HashMap::new();
    port_bindings.insert(
        key.clone(),
        Some(vec![PortBinding {
            host_ip: mapping.host_ip.clone(),
            host_port: mapping.host_port.map(|p| p.to_string()),
        }]),
    );

    let mut exposed_ports = HashMap::new();
    exposed_ports.insert(key, HashMap::new());

    Config {
        image: Some(image),
        exposed_ports: Some(exposed_ports),
        host_config: Some(HostConfig {
            port_bindings: Some(port_bindings),
            ..Default::default()
        }),
        ..Default::default()
    }
}
