//! Resource-level operations on top of the binary store and quad assembler.

use crate::binary::BinaryStore;
use crate::codec::encode_dataset;
use crate::config::Config;
use crate::consistency::{ConsistencyLevel, ConsistencyPolicy, OperationClass};
use crate::consts::PREFER_ACCESS_CONTROL;
use crate::errors::{Error, Result};
use crate::quads::{QuadAssembler, QuadStream};
use crate::resource::{BinaryMetadata, InteractionModel, ResourceRecord};
use crate::session::{Query, Rows, Session, Statement};
use crate::version::{MonotonicTokens, VersionToken, VersionTokenGenerator};
use chrono::{DateTime, Utc};
use log::{debug, info};
use oxigraph::model::{Dataset, GraphNameRef, NamedNode};
use std::sync::Arc;

/// What a caller supplies when creating or replacing a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceMetadata {
    pub identifier: NamedNode,
    pub interaction_model: InteractionModel,
    pub container: Option<NamedNode>,
    pub binary: Option<BinaryMetadata>,
}

impl ResourceMetadata {
    pub fn new(identifier: NamedNode, interaction_model: InteractionModel) -> Self {
        ResourceMetadata {
            identifier,
            interaction_model,
            container: None,
            binary: None,
        }
    }

    pub fn with_container(mut self, container: NamedNode) -> Self {
        self.container = Some(container);
        self
    }

    pub fn with_binary(mut self, binary: BinaryMetadata) -> Self {
        self.binary = Some(binary);
        self
    }
}

/// A fetched resource: its header plus the means to stream its quads.
pub struct Resource<S> {
    record: ResourceRecord,
    assembler: QuadAssembler<S>,
}

impl<S: Session> Resource<S> {
    pub fn record(&self) -> &ResourceRecord {
        &self.record
    }

    pub fn into_record(self) -> ResourceRecord {
        self.record
    }

    /// Every quad of the resource, containment included for containers.
    pub fn stream(&self) -> Result<QuadStream> {
        self.assembler.quads(&self.record)
    }
}

fn drain(rows: Rows) -> Result<()> {
    for row in rows {
        row?;
    }
    Ok(())
}

fn has_acl(dataset: &Dataset) -> bool {
    let graph = GraphNameRef::NamedNode(PREFER_ACCESS_CONTROL);
    dataset.iter().any(|quad| quad.graph_name == graph)
}

pub struct ResourceService<S> {
    session: Arc<S>,
    policy: ConsistencyPolicy,
    binaries: BinaryStore<S>,
    assembler: QuadAssembler<S>,
    tokens: Arc<dyn VersionTokenGenerator>,
}

impl<S: Session> ResourceService<S> {
    pub fn new(session: Arc<S>, config: &Config) -> Self {
        ResourceService {
            binaries: BinaryStore::new(Arc::clone(&session), config),
            assembler: QuadAssembler::new(Arc::clone(&session), config),
            policy: config.consistency,
            tokens: Arc::new(MonotonicTokens::new()),
            session,
        }
    }

    pub fn with_token_generator(mut self, tokens: Arc<dyn VersionTokenGenerator>) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn binaries(&self) -> &BinaryStore<S> {
        &self.binaries
    }

    pub fn assembler(&self) -> &QuadAssembler<S> {
        &self.assembler
    }

    fn read_level(&self) -> ConsistencyLevel {
        self.policy.level(OperationClass::MutableRead)
    }

    fn write_level(&self) -> ConsistencyLevel {
        self.policy.level(OperationClass::MutableWrite)
    }

    /// Fetches the newest header of a resource, `None` if it does not exist.
    pub fn get(&self, identifier: &NamedNode) -> Result<Option<Resource<S>>> {
        let statement = Statement::new(Query::GetResource, self.read_level()).bind(identifier);
        let Some(row) = self.session.execute(&statement)?.next().transpose()? else {
            debug!("No resource at {}", identifier);
            return Ok(None);
        };
        let record = ResourceRecord::from_row(&row)?;
        Ok(Some(Resource {
            record,
            assembler: self.assembler.clone(),
        }))
    }

    /// Creates a resource with a freshly minted creation token. The dataset
    /// goes to the mutable partition.
    pub fn create(
        &self,
        metadata: &ResourceMetadata,
        dataset: &Dataset,
    ) -> Result<ResourceRecord> {
        let created = self.tokens.next_token();
        let record = self.write_mutable(metadata, dataset, created)?;
        info!(
            "Created {} as {} ({})",
            record.identifier(),
            record.interaction_model(),
            created
        );
        Ok(record)
    }

    /// Overwrites the header and mutable quads of a resource, keeping its
    /// creation token. Creates the resource if it does not exist.
    pub fn replace(
        &self,
        metadata: &ResourceMetadata,
        dataset: &Dataset,
    ) -> Result<ResourceRecord> {
        let Some(existing) = self.get(&metadata.identifier)? else {
            return self.create(metadata, dataset);
        };
        let record = self.write_mutable(metadata, dataset, existing.record().created())?;
        info!("Replaced {}", record.identifier());
        Ok(record)
    }

    fn write_mutable(
        &self,
        metadata: &ResourceMetadata,
        dataset: &Dataset,
        created: VersionToken,
    ) -> Result<ResourceRecord> {
        let binary = metadata.binary.as_ref();
        let record = ResourceRecord::build(
            metadata.identifier.clone(),
            metadata.interaction_model,
            has_acl(dataset),
            binary.map(|b| b.identifier.clone()),
            binary.and_then(|b| b.mime_type.clone()),
            binary.and_then(|b| b.size),
            metadata.container.clone(),
            self.modified_now(created),
            created,
        )?;
        let binary = record.binary();
        let size = binary
            .and_then(|b| b.size)
            .map(|size| {
                i64::try_from(size).map_err(|_| {
                    Error::bounds(format!("binary size {} exceeds the bigint column", size))
                })
            })
            .transpose()?;
        let statement = Statement::new(Query::InsertMutable, self.write_level())
            .bind(record.identifier())
            .bind(created.instant())
            .bind(created.to_string())
            .bind(record.interaction_model().iri().as_str())
            .bind(record.has_acl())
            .bind(binary.map(|b| &b.identifier))
            .bind(binary.and_then(|b| b.mime_type.clone()))
            .bind(size)
            .bind(record.container())
            .bind(record.modified())
            .bind(encode_dataset(dataset)?);
        drain(self.session.execute(&statement)?)?;
        Ok(record)
    }

    // A modification time never earlier than the creation instant, at the
    // millisecond precision the store keeps.
    fn modified_now(&self, created: VersionToken) -> DateTime<Utc> {
        self.tokens.next_token().instant().max(created.instant())
    }

    /// Appends quads to the immutable partition of a resource.
    pub fn add(&self, identifier: &NamedNode, dataset: &Dataset) -> Result<()> {
        let statement = Statement::new(Query::InsertImmutable, self.write_level())
            .bind(identifier)
            .bind(self.tokens.next_token().instant())
            .bind(encode_dataset(dataset)?);
        drain(self.session.execute(&statement)?)?;
        debug!("Added {} immutable quad(s) to {}", dataset.len(), identifier);
        Ok(())
    }

    /// Bumps the modification time of a resource. Returns false if there is
    /// no such resource.
    pub fn touch(&self, identifier: &NamedNode) -> Result<bool> {
        let Some(existing) = self.get(identifier)? else {
            return Ok(false);
        };
        let created = existing.record().created();
        let statement = Statement::new(Query::Touch, self.write_level())
            .bind(self.modified_now(created))
            .bind(identifier)
            .bind(created.instant());
        drain(self.session.execute(&statement)?)?;
        debug!("Touched {}", identifier);
        Ok(true)
    }

    /// Removes the header and mutable quads of a resource, and the content of
    /// its binary if it has one. Immutable quads are kept. Returns false if
    /// there was nothing to delete.
    pub fn delete(&self, identifier: &NamedNode) -> Result<bool> {
        let Some(existing) = self.get(identifier)? else {
            return Ok(false);
        };
        // The header goes before the content, so no header outlives its binary.
        let statement = Statement::new(Query::DeleteResource, self.write_level()).bind(identifier);
        drain(self.session.execute(&statement)?)?;
        if let Some(binary) = existing.record().binary() {
            self.binaries.delete(&binary.identifier)?;
        }
        info!("Deleted {}", identifier);
        Ok(true)
    }
}
