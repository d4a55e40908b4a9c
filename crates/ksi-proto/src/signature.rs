//! Signature data model: aggregation and calendar hash chains, the
//! attestation that anchors a signature to a published root, and the
//! aggregate/extend algorithms that operate on them.

use crate::error::{Error, Result};
use crate::pki::PkiSignature;
use ksi_core::tags::{chain_link, metadata as meta_tags};
use ksi_core::tlv::parse_all;
use ksi_core::{tags, HashAlgorithm, Imprint, Tlv};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkDirection {
    Left,
    Right,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkMetadata {
    pub client_id: String,
    pub machine_id: Option<String>,
    pub sequence_nr: Option<u64>,
    pub request_time: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AggregationLink {
    pub direction: LinkDirection,
    pub sibling: Imprint,
    pub level_correction: u8,
    pub metadata: Option<LinkMetadata>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AggregationChain {
    pub input_hash: Imprint,
    pub input_level: u8,
    pub aggr_time: u64,
    pub chain_index: Vec<u64>,
    pub links: Vec<AggregationLink>,
}

impl AggregationChain {
    /// Apply every link in order, returning the resulting root imprint and
    /// the output level (input level plus each link's level correction,
    /// incremented by one per link).
    pub fn apply(&self) -> Result<(Imprint, u8)> {
        if self.links.is_empty() {
            return Err(Error::EmptyAggregationChain);
        }
        let mut current = self.input_hash.clone();
        let mut level = self.input_level;
        for link in &self.links {
            level = level
                .saturating_add(link.level_correction)
                .saturating_add(1);
            let algorithm = link.sibling.algorithm();
            let level_byte = [level];
            current = match link.direction {
                // The sibling is appended on the right of the running hash.
                LinkDirection::Left => Imprint::of(
                    algorithm,
                    &concat(&[current.to_bytes().as_slice(), link.sibling.to_bytes().as_slice(), &level_byte]),
                ),
                // The sibling is prepended to the left of the running hash.
                LinkDirection::Right => Imprint::of(
                    algorithm,
                    &concat(&[link.sibling.to_bytes().as_slice(), current.to_bytes().as_slice(), &level_byte]),
                ),
            };
        }
        Ok((current, level))
    }
}

fn concat(parts: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::new();
    for p in parts {
        out.extend_from_slice(p);
    }
    out
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CalendarLink {
    pub direction: LinkDirection,
    pub sibling: Imprint,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CalendarChain {
    pub publication_time: u64,
    pub aggregation_time: u64,
    pub input_hash: Imprint,
    pub links: Vec<CalendarLink>,
}

impl CalendarChain {
    /// Walk the calendar tree from the aggregation-time leaf up to the
    /// published root. Each link's own `direction` field drives the
    /// concatenation order; the publication/aggregation time delta is
    /// checked here only as a sanity bound (publication can't precede
    /// aggregation) and plays no role in the hash computation itself.
    pub fn root(&self) -> Result<Imprint> {
        self.publication_time
            .checked_sub(self.aggregation_time)
            .ok_or(Error::CalendarTimeOverflow)?;
        let mut current = self.input_hash.clone();
        for link in &self.links {
            let algorithm = link.sibling.algorithm();
            current = match link.direction {
                LinkDirection::Left => {
                    Imprint::of(algorithm, &concat(&[current.to_bytes().as_slice(), link.sibling.to_bytes().as_slice()]))
                }
                LinkDirection::Right => {
                    Imprint::of(algorithm, &concat(&[link.sibling.to_bytes().as_slice(), current.to_bytes().as_slice()]))
                }
            };
        }
        Ok(current)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CalendarAuthRecord {
    pub publication_time: u64,
    pub published_hash: Imprint,
    pub signature: PkiSignature,
    /// Present only for signatures predating KSI's own calendar database;
    /// carried through unmodified, never produced by this client.
    pub rfc3161_record: Option<Rfc3161Record>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rfc3161Record {
    pub aggregation_time: u64,
    pub chain_index: Vec<u64>,
    pub input_hash: Imprint,
    pub tstinfo_prefix: Vec<u8>,
    pub tstinfo_suffix: Vec<u8>,
    pub tstinfo_algorithm: HashAlgorithm,
    pub sig_attr_prefix: Vec<u8>,
    pub sig_attr_suffix: Vec<u8>,
    pub sig_attr_algorithm: HashAlgorithm,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicationRecord {
    pub publication_time: u64,
    pub publication_hash: Imprint,
    pub publication_refs: Vec<String>,
    pub repository_uris: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Attestation {
    CalendarAuth(CalendarAuthRecord),
    Publication(PublicationRecord),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature {
    pub aggregation_chains: Vec<AggregationChain>,
    pub calendar_chain: Option<CalendarChain>,
    pub attestation: Attestation,
}

impl Signature {
    /// The imprint and level a verifier should compare against the document
    /// hash: the root of the first (lowest) aggregation chain.
    pub fn document_root(&self) -> Result<(Imprint, u8)> {
        self.aggregation_chains
            .first()
            .ok_or(Error::EmptyAggregationChain)?
            .apply()
    }

    /// Fold every aggregation chain, checking that each chain's output feeds
    /// the next chain's declared input, and return the final root.
    pub fn aggregate(&self) -> Result<Imprint> {
        let mut iter = self.aggregation_chains.iter();
        let first = iter.next().ok_or(Error::EmptyAggregationChain)?;
        let (mut current, _level) = first.apply()?;
        for chain in iter {
            if current != chain.input_hash {
                return Err(Error::DiscontinuousChain {
                    computed: current,
                    next_input: chain.input_hash.clone(),
                });
            }
            let (next, _level) = chain.apply()?;
            current = next;
        }
        Ok(current)
    }

    /// Root of the calendar chain, if this signature carries one.
    pub fn calendar_root(&self) -> Result<Option<Imprint>> {
        self.calendar_chain.as_ref().map(|c| c.root()).transpose()
    }

    /// Replace the calendar chain (and, implicitly, the attestation it leads
    /// to) while preserving the aggregation chains and the aggregation time
    /// they were built against.
    pub fn extend(&self, new_calendar: CalendarChain, attestation: Attestation) -> Result<Signature> {
        let expected_time = self
            .calendar_chain
            .as_ref()
            .map(|c| c.aggregation_time)
            .unwrap_or(new_calendar.aggregation_time);
        if new_calendar.aggregation_time != expected_time {
            return Err(Error::CalendarTimeOverflow);
        }
        Ok(Signature {
            aggregation_chains: self.aggregation_chains.clone(),
            calendar_chain: Some(new_calendar),
            attestation,
        })
    }

    /// Encode as a standalone `0x0800`-tagged signature container — the
    /// on-disk format `ksi-cli` reads and writes, independent of whatever
    /// PDU it arrived in over the wire.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut children = Vec::with_capacity(self.aggregation_chains.len() + 2);
        for chain in &self.aggregation_chains {
            children.push(encode_aggregation_chain(chain)?);
        }
        if let Some(calendar) = &self.calendar_chain {
            children.push(encode_calendar_chain(calendar)?);
        }
        children.push(encode_attestation(&self.attestation)?);
        let tlv = Tlv::encode_children(tags::SIGNATURE, &children)?;
        Ok(tlv.to_bytes()?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Signature> {
        let tlvs = parse_all(bytes)?;
        let root = tlvs
            .into_iter()
            .find(|t| t.tag() == tags::SIGNATURE)
            .ok_or(Error::Tlv(ksi_core::Error::MissingElement {
                tag: tags::SIGNATURE,
                context: "signature container",
            }))?;

        let mut aggregation_chains = Vec::new();
        let mut calendar_chain = None;
        let mut attestation = None;
        for child in root.as_children()? {
            match child.tag() {
                tags::AGGREGATION_CHAIN => aggregation_chains.push(decode_aggregation_chain(&child)?),
                tags::CALENDAR_CHAIN => calendar_chain = Some(decode_calendar_chain(&child)?),
                tags::CALENDAR_AUTH_RECORD => {
                    attestation = Some(Attestation::CalendarAuth(decode_calendar_auth(&child)?))
                }
                tags::PUBLICATION_RECORD => {
                    attestation = Some(Attestation::Publication(decode_publication_record(&child)?))
                }
                _ if child.header.non_critical => {}
                _ => {}
            }
        }

        if aggregation_chains.is_empty() {
            return Err(Error::EmptyAggregationChain);
        }
        aggregation_chains.sort_by(|a, b| b.input_level.cmp(&a.input_level));

        Ok(Signature {
            aggregation_chains,
            calendar_chain,
            attestation: attestation.ok_or(Error::MissingAttestation)?,
        })
    }
}

/// Local (parent-scoped) tags shared by every composite this module encodes
/// and decodes — the same numbering `ksi-net::pdu` uses for the aggregation
/// response's nested records, since both read/write the same on-wire shapes.
mod local_tags {
    pub const TIME: u16 = 0x02;
    pub const CHAIN_INDEX: u16 = 0x03;
    pub const INPUT_HASH: u16 = 0x05;
    pub const PUBLICATION_TIME: u16 = 0x01;
    pub const PUBLICATION_HASH: u16 = 0x04;
    pub const PUBLICATION_REF: u16 = 0x09;
    pub const REPOSITORY_URI: u16 = 0x0a;
    pub const PUBLISHED_DATA: u16 = 0x02;
    pub const SIGNATURE_DATA: u16 = 0x03;
    pub const SIGNER_CERT: u16 = 0x01;
    pub const SIGNATURE_BYTES: u16 = 0x02;
}

fn encode_aggregation_chain(chain: &AggregationChain) -> Result<Tlv> {
    let mut children = vec![
        Tlv::encode_uint(local_tags::TIME, chain.aggr_time)?,
        Tlv::raw(local_tags::INPUT_HASH, chain.input_hash.to_bytes())?,
    ];
    for index in &chain.chain_index {
        children.push(Tlv::encode_uint(local_tags::CHAIN_INDEX, *index)?);
    }
    for link in &chain.links {
        children.push(encode_aggregation_link(link)?);
    }
    Tlv::encode_children(tags::AGGREGATION_CHAIN, &children)
}

fn encode_aggregation_link(link: &AggregationLink) -> Result<Tlv> {
    let tag = match link.direction {
        LinkDirection::Left => chain_link::SIBLING_LEFT,
        LinkDirection::Right => chain_link::SIBLING_RIGHT,
    };
    if link.level_correction == 0 && link.metadata.is_none() {
        return Tlv::raw(tag, link.sibling.to_bytes());
    }
    let mut inner = vec![Tlv::raw(local_tags::TIME, link.sibling.to_bytes())?];
    if link.level_correction != 0 {
        inner.push(Tlv::encode_uint(chain_link::LEVEL_CORRECTION, link.level_correction as u64)?);
    }
    if let Some(meta) = &link.metadata {
        inner.push(encode_metadata(meta)?);
    }
    Tlv::encode_children(tag, &inner)
}

fn encode_metadata(meta: &LinkMetadata) -> Result<Tlv> {
    let mut children = vec![Tlv::encode_utf8_string(meta_tags::CLIENT_ID, &meta.client_id)?];
    if let Some(machine_id) = &meta.machine_id {
        children.push(Tlv::encode_utf8_string(meta_tags::MACHINE_ID, machine_id)?);
    }
    if let Some(seq) = meta.sequence_nr {
        children.push(Tlv::encode_uint(meta_tags::SEQUENCE_NR, seq)?);
    }
    if let Some(time) = meta.request_time {
        children.push(Tlv::encode_uint(meta_tags::REQUEST_TIME, time)?);
    }
    Tlv::encode_children(chain_link::METADATA, &children)
}

fn encode_calendar_chain(chain: &CalendarChain) -> Result<Tlv> {
    let mut children = vec![
        Tlv::encode_uint(local_tags::PUBLICATION_TIME, chain.publication_time)?,
        Tlv::encode_uint(local_tags::TIME, chain.aggregation_time)?,
        Tlv::raw(local_tags::INPUT_HASH, chain.input_hash.to_bytes())?,
    ];
    for link in &chain.links {
        let tag = match link.direction {
            LinkDirection::Left => chain_link::SIBLING_LEFT,
            LinkDirection::Right => chain_link::SIBLING_RIGHT,
        };
        children.push(Tlv::raw(tag, link.sibling.to_bytes())?);
    }
    Tlv::encode_children(tags::CALENDAR_CHAIN, &children)
}

fn encode_attestation(attestation: &Attestation) -> Result<Tlv> {
    match attestation {
        Attestation::Publication(record) => encode_publication_record(record),
        Attestation::CalendarAuth(auth) => encode_calendar_auth(auth),
    }
}

fn encode_publication_record(record: &PublicationRecord) -> Result<Tlv> {
    let mut children = vec![
        Tlv::encode_uint(local_tags::PUBLICATION_TIME, record.publication_time)?,
        Tlv::raw(local_tags::PUBLICATION_HASH, record.publication_hash.to_bytes())?,
    ];
    for r in &record.publication_refs {
        children.push(Tlv::encode_utf8_string(local_tags::PUBLICATION_REF, r)?);
    }
    for uri in &record.repository_uris {
        children.push(Tlv::encode_utf8_string(local_tags::REPOSITORY_URI, uri)?);
    }
    Tlv::encode_children(tags::PUBLICATION_RECORD, &children)
}

fn encode_calendar_auth(auth: &CalendarAuthRecord) -> Result<Tlv> {
    let published_data = Tlv::encode_children(
        local_tags::PUBLISHED_DATA,
        &[
            Tlv::encode_uint(local_tags::TIME, auth.publication_time)?,
            Tlv::raw(local_tags::PUBLICATION_HASH, auth.published_hash.to_bytes())?,
        ],
    )?;
    let signature_data = Tlv::encode_children(
        local_tags::SIGNATURE_DATA,
        &[
            Tlv::raw(local_tags::SIGNER_CERT, auth.signature.signer_cert.clone())?,
            Tlv::raw(local_tags::SIGNATURE_BYTES, auth.signature.signature_bytes.clone())?,
        ],
    )?;
    Tlv::encode_children(tags::CALENDAR_AUTH_RECORD, &[published_data, signature_data])
}

fn decode_aggregation_chain(tlv: &Tlv) -> Result<AggregationChain> {
    let mut input_hash = None;
    let mut aggr_time = None;
    let mut chain_index = Vec::new();
    let mut links = Vec::new();
    for child in tlv.as_children()? {
        match child.tag() {
            local_tags::TIME => aggr_time = Some(child.as_uint()?),
            local_tags::CHAIN_INDEX => chain_index.push(child.as_uint()?),
            local_tags::INPUT_HASH => input_hash = Some(Imprint::from_bytes(child.payload())?),
            chain_link::SIBLING_LEFT => links.push(decode_aggregation_link(LinkDirection::Left, &child)?),
            chain_link::SIBLING_RIGHT => links.push(decode_aggregation_link(LinkDirection::Right, &child)?),
            _ if child.header.non_critical => {}
            _ => {}
        }
    }
    Ok(AggregationChain {
        input_hash: input_hash.ok_or(Error::Tlv(ksi_core::Error::MissingElement {
            tag: local_tags::INPUT_HASH,
            context: "aggregation chain",
        }))?,
        input_level: 0,
        aggr_time: aggr_time.unwrap_or(0),
        chain_index,
        links,
    })
}

fn decode_aggregation_link(direction: LinkDirection, tlv: &Tlv) -> Result<AggregationLink> {
    let payload = tlv.payload();
    if let Ok(sibling) = Imprint::from_bytes(payload) {
        return Ok(AggregationLink {
            direction,
            sibling,
            level_correction: 0,
            metadata: None,
        });
    }

    let children = parse_all(payload)?;
    let mut sibling = None;
    let mut level_correction = 0u8;
    let mut metadata = None;
    for child in children {
        match child.tag() {
            local_tags::TIME => sibling = Some(Imprint::from_bytes(child.payload())?),
            chain_link::LEVEL_CORRECTION => level_correction = child.as_uint()? as u8,
            chain_link::METADATA => metadata = Some(decode_metadata(&child)?),
            _ => {}
        }
    }
    let sibling = match sibling {
        Some(s) => s,
        None => {
            let meta = metadata.clone().unwrap_or(LinkMetadata {
                client_id: String::new(),
                machine_id: None,
                sequence_nr: None,
                request_time: None,
            });
            Imprint::of(HashAlgorithm::Sha256, meta.client_id.as_bytes())
        }
    };
    Ok(AggregationLink {
        direction,
        sibling,
        level_correction,
        metadata,
    })
}

fn decode_metadata(tlv: &Tlv) -> Result<LinkMetadata> {
    let mut client_id = None;
    let mut machine_id = None;
    let mut sequence_nr = None;
    let mut request_time = None;
    for child in tlv.as_children()? {
        match child.tag() {
            meta_tags::CLIENT_ID => client_id = Some(child.as_utf8_string()?),
            meta_tags::MACHINE_ID => machine_id = Some(child.as_utf8_string()?),
            meta_tags::SEQUENCE_NR => sequence_nr = Some(child.as_uint()?),
            meta_tags::REQUEST_TIME => request_time = Some(child.as_uint()?),
            _ => {}
        }
    }
    Ok(LinkMetadata {
        client_id: client_id.unwrap_or_default(),
        machine_id,
        sequence_nr,
        request_time,
    })
}

fn decode_calendar_chain(tlv: &Tlv) -> Result<CalendarChain> {
    let mut publication_time = None;
    let mut aggregation_time = None;
    let mut input_hash = None;
    let mut links = Vec::new();
    for child in tlv.as_children()? {
        match child.tag() {
            local_tags::PUBLICATION_TIME => publication_time = Some(child.as_uint()?),
            local_tags::TIME => aggregation_time = Some(child.as_uint()?),
            local_tags::INPUT_HASH => input_hash = Some(Imprint::from_bytes(child.payload())?),
            chain_link::SIBLING_LEFT => links.push(CalendarLink {
                direction: LinkDirection::Left,
                sibling: Imprint::from_bytes(child.payload())?,
            }),
            chain_link::SIBLING_RIGHT => links.push(CalendarLink {
                direction: LinkDirection::Right,
                sibling: Imprint::from_bytes(child.payload())?,
            }),
            _ if child.header.non_critical => {}
            _ => {}
        }
    }
    Ok(CalendarChain {
        publication_time: publication_time.ok_or(Error::Tlv(ksi_core::Error::MissingElement {
            tag: local_tags::PUBLICATION_TIME,
            context: "calendar chain",
        }))?,
        aggregation_time: aggregation_time.unwrap_or(0),
        input_hash: input_hash.ok_or(Error::Tlv(ksi_core::Error::MissingElement {
            tag: local_tags::INPUT_HASH,
            context: "calendar chain",
        }))?,
        links,
    })
}

fn decode_calendar_auth(tlv: &Tlv) -> Result<CalendarAuthRecord> {
    let mut publication_time = None;
    let mut published_hash = None;
    let mut signer_cert = None;
    let mut signature_bytes = None;
    for child in tlv.as_children()? {
        match child.tag() {
            local_tags::PUBLISHED_DATA => {
                for inner in child.as_children()? {
                    match inner.tag() {
                        local_tags::TIME => publication_time = Some(inner.as_uint()?),
                        local_tags::PUBLICATION_HASH => published_hash = Some(Imprint::from_bytes(inner.payload())?),
                        _ => {}
                    }
                }
            }
            local_tags::SIGNATURE_DATA => {
                for inner in child.as_children()? {
                    match inner.tag() {
                        local_tags::SIGNER_CERT => signer_cert = Some(inner.payload().to_vec()),
                        local_tags::SIGNATURE_BYTES => signature_bytes = Some(inner.payload().to_vec()),
                        _ => {}
                    }
                }
            }
            _ if child.header.non_critical => {}
            _ => {}
        }
    }
    Ok(CalendarAuthRecord {
        publication_time: publication_time.ok_or(Error::Tlv(ksi_core::Error::MissingElement {
            tag: local_tags::PUBLISHED_DATA,
            context: "calendar auth record",
        }))?,
        published_hash: published_hash.ok_or(Error::Tlv(ksi_core::Error::MissingElement {
            tag: local_tags::PUBLICATION_HASH,
            context: "calendar auth record",
        }))?,
        signature: PkiSignature {
            signer_cert: signer_cert.unwrap_or_default(),
            signature_bytes: signature_bytes.unwrap_or_default(),
            signed_data_alg: HashAlgorithm::Sha256,
        },
        rfc3161_record: None,
    })
}

fn decode_publication_record(tlv: &Tlv) -> Result<PublicationRecord> {
    let mut publication_time = None;
    let mut publication_hash = None;
    let mut publication_refs = Vec::new();
    let mut repository_uris = Vec::new();
    for child in tlv.as_children()? {
        match child.tag() {
            local_tags::PUBLICATION_TIME => publication_time = Some(child.as_uint()?),
            local_tags::PUBLICATION_HASH => publication_hash = Some(Imprint::from_bytes(child.payload())?),
            local_tags::PUBLICATION_REF => publication_refs.push(child.as_utf8_string()?),
            local_tags::REPOSITORY_URI => repository_uris.push(child.as_utf8_string()?),
            _ if child.header.non_critical => {}
            _ => {}
        }
    }
    Ok(PublicationRecord {
        publication_time: publication_time.ok_or(Error::Tlv(ksi_core::Error::MissingElement {
            tag: local_tags::PUBLICATION_TIME,
            context: "publication record",
        }))?,
        publication_hash: publication_hash.ok_or(Error::Tlv(ksi_core::Error::MissingElement {
            tag: local_tags::PUBLICATION_HASH,
            context: "publication record",
        }))?,
        publication_refs,
        repository_uris,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn imprint(byte: u8) -> Imprint {
        Imprint::of(HashAlgorithm::Sha256, &[byte])
    }

    #[test]
    fn single_link_chain_applies() {
        let chain = AggregationChain {
            input_hash: imprint(1),
            input_level: 0,
            aggr_time: 1_398_866_256,
            chain_index: vec![1],
            links: vec![AggregationLink {
                direction: LinkDirection::Left,
                sibling: imprint(2),
                level_correction: 0,
                metadata: None,
            }],
        };
        let (root, level) = chain.apply().unwrap();
        assert_eq!(level, 1);
        assert_ne!(root, chain.input_hash);
    }

    #[test]
    fn empty_chain_is_rejected() {
        let chain = AggregationChain {
            input_hash: imprint(1),
            input_level: 0,
            aggr_time: 0,
            chain_index: vec![],
            links: vec![],
        };
        assert!(matches!(chain.apply(), Err(Error::EmptyAggregationChain)));
    }

    #[test]
    fn discontinuous_chains_are_rejected() {
        let chain_a = AggregationChain {
            input_hash: imprint(1),
            input_level: 0,
            aggr_time: 1,
            chain_index: vec![1],
            links: vec![AggregationLink {
                direction: LinkDirection::Left,
                sibling: imprint(2),
                level_correction: 0,
                metadata: None,
            }],
        };
        let chain_b = AggregationChain {
            // Wrong input hash on purpose — doesn't match chain_a's output.
            input_hash: imprint(99),
            input_level: 0,
            aggr_time: 1,
            chain_index: vec![1],
            links: vec![AggregationLink {
                direction: LinkDirection::Left,
                sibling: imprint(3),
                level_correction: 0,
                metadata: None,
            }],
        };
        let sig = Signature {
            aggregation_chains: vec![chain_a, chain_b],
            calendar_chain: None,
            attestation: Attestation::Publication(PublicationRecord {
                publication_time: 0,
                publication_hash: imprint(0),
                publication_refs: vec![],
                repository_uris: vec![],
            }),
        };
        assert!(matches!(sig.aggregate(), Err(Error::DiscontinuousChain { .. })));
    }

    #[test]
    fn signature_container_round_trips_through_bytes() {
        let chain = AggregationChain {
            input_hash: imprint(1),
            input_level: 0,
            aggr_time: 1_398_866_256,
            chain_index: vec![1],
            links: vec![AggregationLink {
                direction: LinkDirection::Left,
                sibling: imprint(2),
                level_correction: 1,
                metadata: Some(LinkMetadata {
                    client_id: "test-client".into(),
                    machine_id: Some("m1".into()),
                    sequence_nr: Some(7),
                    request_time: Some(1_398_866_256),
                }),
            }],
        };
        let calendar = CalendarChain {
            publication_time: 1_398_866_275,
            aggregation_time: 1_398_866_256,
            input_hash: chain.apply().unwrap().0,
            links: vec![CalendarLink {
                direction: LinkDirection::Left,
                sibling: imprint(9),
            }],
        };
        let sig = Signature {
            aggregation_chains: vec![chain],
            calendar_chain: Some(calendar),
            attestation: Attestation::Publication(PublicationRecord {
                publication_time: 1_398_866_275,
                publication_hash: imprint(42),
                publication_refs: vec!["https://example.com/ref".into()],
                repository_uris: vec!["https://example.com/repo".into()],
            }),
        };

        let bytes = sig.to_bytes().unwrap();
        let decoded = Signature::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, sig);
    }

    #[test]
    fn from_bytes_rejects_a_container_with_no_aggregation_chain() {
        let publication = encode_publication_record(&PublicationRecord {
            publication_time: 1,
            publication_hash: imprint(1),
            publication_refs: vec![],
            repository_uris: vec![],
        })
        .unwrap();
        let bytes = Tlv::encode_children(tags::SIGNATURE, &[publication]).unwrap().to_bytes().unwrap();
        assert!(matches!(Signature::from_bytes(&bytes), Err(Error::EmptyAggregationChain)));
    }
}
