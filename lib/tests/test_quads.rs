use anyhow::Result;
use oxigraph::model::{Dataset, GraphName, Literal, NamedNode, Quad};
use std::sync::Arc;
use widequad::config::Config;
use widequad::consistency::{ConsistencyLevel, ConsistencyPolicy};
use widequad::consts::{CONTAINS, PREFER_CONTAINMENT, PREFER_MEMBERSHIP};
use widequad::memory::MemorySession;
use widequad::session::{Query, Statement};
use widequad::{
    Error, InteractionModel, QuadAssembler, ResourceMetadata, ResourceRecord, ResourceService,
    Session,
};

const TITLE: &str = "http://purl.org/dc/terms/title";
const USER_MANAGED: &str = "http://www.trellisldp.org/ns/trellis#PreferUserManaged";
const AUDIT: &str = "http://www.trellisldp.org/ns/trellis#PreferAudit";

fn iri(s: &str) -> NamedNode {
    NamedNode::new(s).unwrap()
}

fn titled(subject: &NamedNode, title: &str, graph: &str) -> Dataset {
    let mut dataset = Dataset::new();
    dataset.insert(&Quad::new(
        subject.clone(),
        iri(TITLE),
        Literal::from(title),
        GraphName::NamedNode(iri(graph)),
    ));
    dataset
}

fn contains(parent: &NamedNode, child: &NamedNode, graph: &str) -> Quad {
    Quad::new(
        parent.clone(),
        CONTAINS.into_owned(),
        child.clone(),
        GraphName::NamedNode(iri(graph)),
    )
}

struct Fixture {
    session: Arc<MemorySession>,
    service: ResourceService<MemorySession>,
    assembler: QuadAssembler<MemorySession>,
}

fn fixture(config: &Config) -> Fixture {
    let session = Arc::new(MemorySession::new());
    Fixture {
        service: ResourceService::new(Arc::clone(&session), config),
        assembler: QuadAssembler::new(Arc::clone(&session), config),
        session,
    }
}

/// Creates `parent` with the given model plus two children pointing at it.
fn family(
    f: &Fixture,
    model: InteractionModel,
) -> Result<(ResourceRecord, NamedNode, NamedNode)> {
    let parent = iri("http://example.com/parent");
    let record = f.service.create(
        &ResourceMetadata::new(parent.clone(), model),
        &titled(&parent, "parent", USER_MANAGED),
    )?;
    f.service.add(&parent, &titled(&parent, "first version", AUDIT))?;
    let a = iri("http://example.com/parent/a");
    let b = iri("http://example.com/parent/b");
    for child in [&a, &b] {
        f.service.create(
            &ResourceMetadata::new(child.clone(), InteractionModel::RdfSource)
                .with_container(parent.clone()),
            &Dataset::new(),
        )?;
    }
    Ok((record, a, b))
}

#[test]
fn non_container_gets_partitions_only() -> Result<()> {
    let f = fixture(&Config::default());
    let (record, _, _) = family(&f, InteractionModel::RdfSource)?;
    let dataset = f.assembler.quads(&record)?.into_dataset()?;

    let mut expected = titled(record.identifier(), "parent", USER_MANAGED);
    for quad in titled(record.identifier(), "first version", AUDIT).iter() {
        expected.insert(quad);
    }
    assert_eq!(dataset, expected);
    assert!(!f
        .session
        .executed()
        .iter()
        .any(|(q, _)| *q == Query::BasicContainment));
    Ok(())
}

#[test]
fn container_gets_containment_and_membership() -> Result<()> {
    let f = fixture(&Config::default());
    let (record, a, b) = family(&f, InteractionModel::BasicContainer)?;
    let quads: Vec<Quad> = f.assembler.quads(&record)?.collect::<Result<_, _>>()?;
    let parent = record.identifier();

    let synthesized: Vec<&Quad> = quads
        .iter()
        .filter(|q| q.predicate == CONTAINS.into_owned())
        .collect();
    assert_eq!(synthesized.len(), 4);
    for child in [&a, &b] {
        assert!(quads.contains(&contains(parent, child, PREFER_CONTAINMENT.as_str())));
        assert!(quads.contains(&contains(parent, child, PREFER_MEMBERSHIP.as_str())));
    }
    // two partition quads plus the synthesized ones
    assert_eq!(quads.len(), 6);
    Ok(())
}

#[test]
fn every_container_subtype_is_a_container() -> Result<()> {
    for model in [
        InteractionModel::Container,
        InteractionModel::DirectContainer,
        InteractionModel::IndirectContainer,
    ] {
        let f = fixture(&Config::default());
        let (record, _, _) = family(&f, model)?;
        let count = f
            .assembler
            .quads(&record)?
            .filter(|q| matches!(q, Ok(q) if q.predicate == CONTAINS.into_owned()))
            .count();
        assert_eq!(count, 4, "{}", model);
    }
    Ok(())
}

#[test]
fn empty_container_has_no_synthesized_quads() -> Result<()> {
    let f = fixture(&Config::default());
    let id = iri("http://example.com/empty");
    let record = f.service.create(
        &ResourceMetadata::new(id.clone(), InteractionModel::BasicContainer),
        &Dataset::new(),
    )?;
    assert_eq!(f.assembler.quads(&record)?.count(), 0);
    Ok(())
}

#[test]
fn reads_run_at_mutable_read_consistency() -> Result<()> {
    let config = Config::builder()
        .consistency(ConsistencyPolicy {
            mutable_read: ConsistencyLevel::LocalQuorum,
            ..Default::default()
        })
        .build()?;
    let f = fixture(&config);
    let (record, _, _) = family(&f, InteractionModel::BasicContainer)?;
    let before = f.session.executed().len();
    f.assembler.quads(&record)?.into_dataset()?;
    assert_eq!(
        f.session.executed()[before..],
        [
            (Query::MutableQuads, ConsistencyLevel::LocalQuorum),
            (Query::ImmutableQuads, ConsistencyLevel::LocalQuorum),
            (Query::BasicContainment, ConsistencyLevel::LocalQuorum),
        ]
    );
    Ok(())
}

#[test]
fn failed_query_fails_the_whole_read() -> Result<()> {
    let f = fixture(&Config::default());
    let (record, _, _) = family(&f, InteractionModel::BasicContainer)?;
    f.session.fail_after(Query::BasicContainment, 0, "read timeout");
    assert!(matches!(f.assembler.quads(&record), Err(Error::Query(_))));
    Ok(())
}

#[test]
fn undecodable_partition_fails_the_dataset() -> Result<()> {
    let f = fixture(&Config::default());
    let (record, _, _) = family(&f, InteractionModel::RdfSource)?;
    f.session.execute(
        &Statement::new(Query::InsertImmutable, ConsistencyLevel::One)
            .bind(record.identifier())
            .bind(record.modified())
            .bind(b"<http://example.com/s> broken".to_vec()),
    )?;

    let items: Vec<_> = f.assembler.quads(&record)?.collect();
    assert_eq!(items.iter().filter(|i| i.is_err()).count(), 1);
    assert!(matches!(
        f.assembler.quads(&record)?.into_dataset(),
        Err(Error::Encoding { what: "quads", .. })
    ));
    Ok(())
}

#[test]
fn calling_again_restarts_the_stream() -> Result<()> {
    let f = fixture(&Config::default());
    let (record, _, _) = family(&f, InteractionModel::BasicContainer)?;
    let first = f.assembler.quads(&record)?.into_dataset()?;
    let second = f.assembler.quads(&record)?.into_dataset()?;
    assert_eq!(first, second);
    assert_eq!(first.len(), 6);
    Ok(())
}
