//! Docker Engine backend for the runtime controller

use super::ContainerRuntime;
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::models::{ContainerCreateResponse, ContainerInspectResponse};
use bollard::Docker;

/// `ContainerRuntime` backed by a bollard Docker client
#[derive(Clone)]
pub struct BollardRuntime {
    docker: Docker,
}

impl BollardRuntime {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// Connect using `DOCKER_HOST` or the platform's default socket
    pub fn connect_with_local_defaults() -> Result<Self, DockerError> {
        Ok(Self::new(Docker::connect_with_local_defaults()?))
    }
}

#[async_trait]
impl ContainerRuntime for BollardRuntime {
    async fn inspect_container(&self, id: &str) -> Result<ContainerInspectResponse, DockerError> {
        self.docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
    }

    async fn create_container(
        &self,
        config: Config<String>,
    ) -> Result<ContainerCreateResponse, DockerError> {
        self.docker
            .create_container(None::<CreateContainerOptions<String>>, config)
            .await
    }

    async fn start_container(&self, id: &str) -> Result<(), DockerError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
    }

    async fn stop_container(&self, id: &str) -> Result<(), DockerError> {
        self.docker
            .stop_container(id, None::<StopContainerOptions>)
            .await
    }
}
