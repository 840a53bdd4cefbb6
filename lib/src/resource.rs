//! Resource header metadata, as stored in the header row of the mutable
//! partition.

use crate::codec::{
    decode_boolean, decode_iri, decode_optional_bigint, decode_optional_iri,
    decode_optional_text, decode_text, decode_timestamp, decode_version_token,
};
use crate::consts::{
    BASIC_CONTAINER, CONTAINER, DIRECT_CONTAINER, INDIRECT_CONTAINER, NON_RDF_SOURCE, RDF_SOURCE,
    RESOURCE,
};
use crate::errors::{Error, Result};
use crate::session::Row;
use crate::version::VersionToken;
use chrono::{DateTime, Utc};
use oxigraph::model::{NamedNode, NamedNodeRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// LDP interaction models a resource may be created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InteractionModel {
    Resource,
    RdfSource,
    NonRdfSource,
    Container,
    BasicContainer,
    DirectContainer,
    IndirectContainer,
}

impl InteractionModel {
    pub const ALL: [InteractionModel; 7] = [
        InteractionModel::Resource,
        InteractionModel::RdfSource,
        InteractionModel::NonRdfSource,
        InteractionModel::Container,
        InteractionModel::BasicContainer,
        InteractionModel::DirectContainer,
        InteractionModel::IndirectContainer,
    ];

    pub fn iri(self) -> NamedNodeRef<'static> {
        match self {
            InteractionModel::Resource => RESOURCE,
            InteractionModel::RdfSource => RDF_SOURCE,
            InteractionModel::NonRdfSource => NON_RDF_SOURCE,
            InteractionModel::Container => CONTAINER,
            InteractionModel::BasicContainer => BASIC_CONTAINER,
            InteractionModel::DirectContainer => DIRECT_CONTAINER,
            InteractionModel::IndirectContainer => INDIRECT_CONTAINER,
        }
    }

    pub fn from_iri(iri: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.iri().as_str() == iri)
    }

    /// The next model up the LDP hierarchy, `None` for `ldp:Resource`.
    pub fn superclass(self) -> Option<Self> {
        match self {
            InteractionModel::Resource => None,
            InteractionModel::RdfSource | InteractionModel::NonRdfSource => {
                Some(InteractionModel::Resource)
            }
            InteractionModel::Container => Some(InteractionModel::RdfSource),
            InteractionModel::BasicContainer
            | InteractionModel::DirectContainer
            | InteractionModel::IndirectContainer => Some(InteractionModel::Container),
        }
    }

    pub fn is_container(self) -> bool {
        let mut model = Some(self);
        while let Some(m) = model {
            if m == InteractionModel::Container {
                return true;
            }
            model = m.superclass();
        }
        false
    }

    pub fn is_binary(self) -> bool {
        self == InteractionModel::NonRdfSource
    }
}

impl fmt::Display for InteractionModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.iri().as_str())
    }
}

impl FromStr for InteractionModel {
    type Err = Error;

    /// Accepts the full IRI or the local name (`BasicContainer`, `NonRDFSource`).
    fn from_str(s: &str) -> Result<Self> {
        Self::from_iri(s)
            .or_else(|| {
                Self::ALL.into_iter().find(|m| {
                    m.iri()
                        .as_str()
                        .rsplit_once('#')
                        .is_some_and(|(_, local)| local.eq_ignore_ascii_case(s))
                })
            })
            .ok_or_else(|| {
                Error::encoding("interactionModel", format!("unknown interaction model '{}'", s))
            })
    }
}

/// Where a binary's bytes live and what is known about them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryMetadata {
    pub identifier: NamedNode,
    pub mime_type: Option<String>,
    pub size: Option<u64>,
}

/// Header metadata for one resource. Built once and never changed; fetch the
/// resource again to observe a newer `modified`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRecord {
    identifier: NamedNode,
    interaction_model: InteractionModel,
    container: Option<NamedNode>,
    has_acl: bool,
    modified: DateTime<Utc>,
    created: VersionToken,
    binary: Option<BinaryMetadata>,
}

impl ResourceRecord {
    /// Binary fields are ignored unless the model is `ldp:NonRDFSource`, in
    /// which case a binary identifier is required.
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        identifier: NamedNode,
        interaction_model: InteractionModel,
        has_acl: bool,
        binary_identifier: Option<NamedNode>,
        mime_type: Option<String>,
        size: Option<u64>,
        container: Option<NamedNode>,
        modified: DateTime<Utc>,
        created: VersionToken,
    ) -> Result<Self> {
        let binary = if interaction_model.is_binary() {
            let identifier = binary_identifier.ok_or_else(|| {
                Error::encoding(
                    "binaryIdentifier",
                    format!("binary resource {} has no binary identifier", identifier),
                )
            })?;
            Some(BinaryMetadata {
                identifier,
                mime_type,
                size,
            })
        } else {
            None
        };
        Ok(ResourceRecord {
            identifier,
            interaction_model,
            container,
            has_acl,
            modified,
            created,
            binary,
        })
    }

    /// Decodes a header row as returned by [`crate::session::Query::GetResource`].
    pub fn from_row(row: &Row) -> Result<Self> {
        let model = decode_text(row, "interactionModel")?;
        let interaction_model = InteractionModel::from_iri(&model).ok_or_else(|| {
            Error::encoding("interactionModel", format!("unknown interaction model <{}>", model))
        })?;
        let size = decode_optional_bigint(row, "size")?
            .map(|size| {
                u64::try_from(size)
                    .map_err(|_| Error::encoding("size", format!("negative size {}", size)))
            })
            .transpose()?;
        Self::build(
            decode_iri(row, "identifier")?,
            interaction_model,
            decode_boolean(row, "hasAcl")?,
            decode_optional_iri(row, "binaryIdentifier")?,
            decode_optional_text(row, "mimeType")?,
            size,
            decode_optional_iri(row, "container")?,
            decode_timestamp(row, "modified")?,
            decode_version_token(row, "createdToken")?,
        )
    }

    pub fn identifier(&self) -> &NamedNode {
        &self.identifier
    }

    pub fn interaction_model(&self) -> InteractionModel {
        self.interaction_model
    }

    pub fn container(&self) -> Option<&NamedNode> {
        self.container.as_ref()
    }

    pub fn has_acl(&self) -> bool {
        self.has_acl
    }

    pub fn modified(&self) -> DateTime<Utc> {
        self.modified
    }

    pub fn created(&self) -> VersionToken {
        self.created
    }

    pub fn binary(&self) -> Option<&BinaryMetadata> {
        self.binary.as_ref()
    }

    pub fn is_container(&self) -> bool {
        self.interaction_model.is_container()
    }
}
