//! Assembles the statements of a resource.
//!
//! A resource's quads come from its mutable partition (keyed by identifier
//! and creation instant) and its immutable partition (keyed by identifier).
//! Containers additionally get one `ldp:contains` triple per child, taken from
//! the containment index and emitted twice: once in `ldp:PreferContainment`
//! and once in `ldp:PreferMembership`.

use crate::codec::{decode_iri, decode_quads};
use crate::config::Config;
use crate::consistency::{ConsistencyPolicy, OperationClass};
use crate::consts::{CONTAINS, PREFER_CONTAINMENT, PREFER_MEMBERSHIP};
use crate::errors::Result;
use crate::resource::ResourceRecord;
use crate::session::{Query, Rows, Session, Statement};
use log::debug;
use oxigraph::model::{Dataset, GraphName, NamedNode, NamedNodeRef, Quad};
use std::sync::Arc;

pub struct QuadAssembler<S> {
    session: Arc<S>,
    policy: ConsistencyPolicy,
}

impl<S> Clone for QuadAssembler<S> {
    fn clone(&self) -> Self {
        QuadAssembler {
            session: Arc::clone(&self.session),
            policy: self.policy,
        }
    }
}

impl<S: Session> QuadAssembler<S> {
    pub fn new(session: Arc<S>, config: &Config) -> Self {
        QuadAssembler {
            session,
            policy: config.consistency,
        }
    }

    /// Issues every query the resource needs and returns the combined quads.
    /// Nothing is decoded until the stream is pulled. Call again to restart.
    pub fn quads(&self, record: &ResourceRecord) -> Result<QuadStream> {
        let consistency = self.policy.level(OperationClass::MutableRead);
        let identifier = record.identifier();

        let mutable = self.session.execute(
            &Statement::new(Query::MutableQuads, consistency)
                .bind(identifier)
                .bind(record.created().instant()),
        )?;
        let immutable = self
            .session
            .execute(&Statement::new(Query::ImmutableQuads, consistency).bind(identifier))?;
        let containment = if record.is_container() {
            let rows = self
                .session
                .execute(&Statement::new(Query::BasicContainment, consistency).bind(identifier))?;
            Some(ContainmentQuads::new(identifier.clone(), rows))
        } else {
            None
        };
        debug!(
            "Assembling quads of {} ({})",
            identifier,
            record.interaction_model()
        );

        Ok(QuadStream {
            partitions: vec![mutable, immutable].into_iter(),
            rows: None,
            pending: Vec::new().into_iter(),
            containment,
        })
    }
}

fn contains_quad(subject: &NamedNode, contained: NamedNode, graph: NamedNodeRef<'_>) -> Quad {
    Quad::new(
        subject.clone(),
        CONTAINS.into_owned(),
        contained,
        GraphName::NamedNode(graph.into_owned()),
    )
}

/// Emits the containment triples in `ldp:PreferContainment` while reading
/// the index, then replays the children it saw into `ldp:PreferMembership`.
struct ContainmentQuads {
    subject: NamedNode,
    rows: Option<Rows>,
    // Grows with the number of children. Issuing the containment query a
    // second time for the membership pass would keep memory flat, at the cost
    // of a second round trip and a view that may have changed in between.
    seen: Vec<NamedNode>,
    replay: Option<std::vec::IntoIter<NamedNode>>,
}

impl ContainmentQuads {
    fn new(subject: NamedNode, rows: Rows) -> Self {
        ContainmentQuads {
            subject,
            rows: Some(rows),
            seen: Vec::new(),
            replay: None,
        }
    }
}

impl Iterator for ContainmentQuads {
    type Item = Result<Quad>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(rows) = self.rows.as_mut() {
            match rows.next() {
                Some(Ok(row)) => {
                    return Some(decode_iri(&row, "contained").map(|child| {
                        self.seen.push(child.clone());
                        contains_quad(&self.subject, child, PREFER_CONTAINMENT)
                    }));
                }
                Some(Err(e)) => return Some(Err(e)),
                None => {
                    self.rows = None;
                    self.replay = Some(std::mem::take(&mut self.seen).into_iter());
                }
            }
        }
        let child = self.replay.as_mut()?.next()?;
        Some(Ok(contains_quad(&self.subject, child, PREFER_MEMBERSHIP)))
    }
}

/// The quads of one resource, decoded as they are pulled.
///
/// A row that fails to decode is reported as an `Err` item; use
/// [`QuadStream::into_dataset`] to fail the whole read instead.
pub struct QuadStream {
    partitions: std::vec::IntoIter<Rows>,
    rows: Option<Rows>,
    pending: std::vec::IntoIter<Quad>,
    containment: Option<ContainmentQuads>,
}

impl QuadStream {
    pub fn into_dataset(self) -> Result<Dataset> {
        let mut dataset = Dataset::new();
        for quad in self {
            dataset.insert(&quad?);
        }
        Ok(dataset)
    }
}

impl Iterator for QuadStream {
    type Item = Result<Quad>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(quad) = self.pending.next() {
                return Some(Ok(quad));
            }
            if let Some(rows) = self.rows.as_mut() {
                match rows.next() {
                    Some(Ok(row)) => match decode_quads(&row, "quads") {
                        Ok(quads) => self.pending = quads.into_iter(),
                        Err(e) => return Some(Err(e)),
                    },
                    Some(Err(e)) => return Some(Err(e)),
                    None => self.rows = None,
                }
                continue;
            }
            if let Some(rows) = self.partitions.next() {
                self.rows = Some(rows);
                continue;
            }
            return self.containment.as_mut()?.next();
        }
    }
}
