use async_trait::async_trait;
use ulid::Ulid;

use crate::model::Resource;

use super::{Engine, EngineError};

/// Read-only view of resource definitions.
///
/// The scheduling core only ever asks the catalog for a resource by id; the
/// engine's own registry implements it, but any other source of resource
/// definitions can stand in.
#[async_trait]
pub trait ResourceCatalog: Send + Sync {
    /// The resource, or `ResourceNotFound` when it is unknown or inactive.
    async fn get_resource(&self, id: Ulid) -> Result<Resource, EngineError>;

    async fn list_resources(&self) -> Vec<Resource>;
}

#[async_trait]
impl ResourceCatalog for Engine {
    async fn get_resource(&self, id: Ulid) -> Result<Resource, EngineError> {
        let rs = self
            .resource_state(&id)
            .ok_or(EngineError::ResourceNotFound(id))?;
        let guard = rs.read().await;
        if !guard.resource.active {
            return Err(EngineError::ResourceNotFound(id));
        }
        Ok(guard.resource.clone())
    }

    async fn list_resources(&self) -> Vec<Resource> {
        let handles: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut resources = Vec::with_capacity(handles.len());
        for rs in handles {
            resources.push(rs.read().await.resource.clone());
        }
        resources.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        resources
    }
}
