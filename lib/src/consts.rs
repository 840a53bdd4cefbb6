//! Defines constant NamedNodeRefs for the LDP interaction models and the
//! preference graphs that synthesized containment triples are projected into.

use oxigraph::model::NamedNodeRef;

pub const RESOURCE: NamedNodeRef<'_> =
    NamedNodeRef::new_unchecked("http://www.w3.org/ns/ldp#Resource");
pub const RDF_SOURCE: NamedNodeRef<'_> =
    NamedNodeRef::new_unchecked("http://www.w3.org/ns/ldp#RDFSource");
pub const NON_RDF_SOURCE: NamedNodeRef<'_> =
    NamedNodeRef::new_unchecked("http://www.w3.org/ns/ldp#NonRDFSource");
pub const CONTAINER: NamedNodeRef<'_> =
    NamedNodeRef::new_unchecked("http://www.w3.org/ns/ldp#Container");
pub const BASIC_CONTAINER: NamedNodeRef<'_> =
    NamedNodeRef::new_unchecked("http://www.w3.org/ns/ldp#BasicContainer");
pub const DIRECT_CONTAINER: NamedNodeRef<'_> =
    NamedNodeRef::new_unchecked("http://www.w3.org/ns/ldp#DirectContainer");
pub const INDIRECT_CONTAINER: NamedNodeRef<'_> =
    NamedNodeRef::new_unchecked("http://www.w3.org/ns/ldp#IndirectContainer");

pub const CONTAINS: NamedNodeRef<'_> =
    NamedNodeRef::new_unchecked("http://www.w3.org/ns/ldp#contains");

// graphs
pub const PREFER_CONTAINMENT: NamedNodeRef<'_> =
    NamedNodeRef::new_unchecked("http://www.w3.org/ns/ldp#PreferContainment");
pub const PREFER_MEMBERSHIP: NamedNodeRef<'_> =
    NamedNodeRef::new_unchecked("http://www.w3.org/ns/ldp#PreferMembership");
// a quad in this graph marks the resource as carrying its own ACL
pub const PREFER_ACCESS_CONTROL: NamedNodeRef<'_> =
    NamedNodeRef::new_unchecked("http://www.trellisldp.org/ns/trellis#PreferAccessControl");
