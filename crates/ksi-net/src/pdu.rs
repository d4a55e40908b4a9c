//! Aggregation/extend PDU encode and decode, and the TLV mapping for the
//! signature records nested inside a response — the wire-facing half of
//! `ksi-proto::signature`, kept in `ksi-net` because it is PDU framing
//! rather than pure data model (spec.md §6 names the PDU tags as part of
//! the "external interfaces" this crate owns).

use crate::error::{Result, TransportError};
use ksi_core::tags::{self, aggregation, chain_link, extend, header, metadata as meta_tags};
use ksi_core::tlv::parse_all;
use ksi_core::{HashAlgorithm, Imprint, Tlv};
use ksi_proto::pki::PkiSignature;
use ksi_proto::signature::{
    AggregationChain, AggregationLink, Attestation, CalendarAuthRecord, CalendarChain,
    CalendarLink, LinkDirection, LinkMetadata, PublicationRecord, Signature,
};

/// `AGGR_PDU_VER`/`EXT_PDU_VER` per spec.md §6.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PduVersion {
    V1,
    V2,
}

pub struct SignRequest {
    pub request_id: u64,
    pub request_hash: Option<Imprint>,
    pub request_level: Option<u8>,
    /// Ask the aggregator to include its current configuration in the
    /// response (spec.md §4.6 "Receiving"). Legal on its own, with no
    /// `request_hash`, since a config-only request still needs a
    /// request-id to travel through the ordinary response path.
    pub request_config: bool,
}

/// Build the aggregation-PDU (`0x0200`) wrapping a single aggregation
/// request (`0x0201`) with the given request-id, optional document hash,
/// local aggregation level, and configuration request flag.
pub fn build_sign_request(req: &SignRequest, version: PduVersion) -> Result<Vec<u8>> {
    let mut children = vec![Tlv::encode_uint(aggregation::REQUEST_ID, req.request_id)?];
    if let Some(hash) = &req.request_hash {
        children.push(Tlv::raw(aggregation::REQUEST_HASH, hash.to_bytes())?);
    }
    if let Some(level) = req.request_level {
        if level > 0 {
            children.push(Tlv::encode_uint(aggregation::REQUEST_LEVEL, level as u64)?);
        }
    }
    if req.request_config {
        children.push(Tlv::raw(aggregation::CONFIG, Vec::new())?);
    }
    let request = Tlv::encode_children(aggregation::REQUEST, &children)?;
    let pdu_children = match version {
        PduVersion::V1 => vec![request],
        PduVersion::V2 => vec![
            Tlv::encode_uint(header::LOGIN_ID, 0)?,
            request,
        ],
    };
    let pdu = Tlv::encode_children(aggregation::PDU, &pdu_children)?;
    pdu.to_bytes().map_err(TransportError::from)
}

pub struct SignResponse {
    pub request_id: u64,
    pub error: Option<(u64, Option<String>)>,
    pub signature: Option<Signature>,
}

/// Parse an aggregation-PDU response: either an error (`request_error`) or a
/// complete signature (aggregation chain(s) plus calendar chain and
/// attestation, per spec.md §3's Signature invariants).
pub fn parse_sign_response(bytes: &[u8]) -> Result<SignResponse> {
    let tlvs = parse_all(bytes)?;
    let pdu = tlvs
        .into_iter()
        .find(|t| t.tag() == aggregation::PDU || t.tag() == aggregation::RESPONSE)
        .ok_or(TransportError::BadUri("missing aggregation PDU".into()))?;
    let children = if pdu.tag() == aggregation::PDU {
        pdu.as_children()?
    } else {
        vec![pdu]
    };
    let response = children
        .into_iter()
        .find(|t| t.tag() == aggregation::RESPONSE)
        .ok_or(TransportError::BadUri("missing aggregation response".into()))?;

    let mut request_id = None;
    let mut error = None;
    let mut aggregation_chains = Vec::new();
    let mut calendar_chain = None;
    let mut attestation = None;

    for child in response.as_children()? {
        match child.tag() {
            aggregation::REQUEST_ID => request_id = Some(child.as_uint()?),
            aggregation::REQUEST_ERROR => {
                error = Some((child.as_uint()?, None));
            }
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

    let request_id = request_id.ok_or(TransportError::BadUri("missing request id".into()))?;

    if let Some((code, _)) = &error {
        return Ok(SignResponse {
            request_id,
            error: Some((*code, None)),
            signature: None,
        });
    }

    aggregation_chains.sort_by(|a, b| b.input_level.cmp(&a.input_level));
    let signature = match attestation {
        Some(attestation) if !aggregation_chains.is_empty() => Some(Signature {
            aggregation_chains,
            calendar_chain,
            attestation,
        }),
        _ => None,
    };

    Ok(SignResponse {
        request_id,
        error: None,
        signature,
    })
}

/// A server-pushed configuration update, carried in an aggregation
/// response with no `REQUEST_ID` — server-initiated and uncorrelated with
/// any particular request (spec.md §4.6 "Receiving").
#[derive(Clone, Debug, Default)]
pub struct PushConfig {
    pub max_level: Option<u64>,
    pub aggr_algorithm: Option<u8>,
    pub aggr_period: Option<u64>,
    pub parent_uri: Option<String>,
}

/// Parse an aggregation-PDU response as a bare, request-id-less push
/// config. Returns `Ok(None)` when the response carries a `REQUEST_ID` (the
/// ordinary per-request path in [`parse_sign_response`] owns that case) or
/// when the bytes don't decode as an aggregation response at all.
pub fn parse_push_config(bytes: &[u8]) -> Result<Option<PushConfig>> {
    let tlvs = parse_all(bytes)?;
    let Some(pdu) = tlvs.into_iter().find(|t| t.tag() == aggregation::PDU || t.tag() == aggregation::RESPONSE) else {
        return Ok(None);
    };
    let children = if pdu.tag() == aggregation::PDU {
        pdu.as_children()?
    } else {
        vec![pdu]
    };
    let Some(response) = children.into_iter().find(|t| t.tag() == aggregation::RESPONSE) else {
        return Ok(None);
    };

    let mut request_id = None;
    let mut config = None;
    for child in response.as_children()? {
        match child.tag() {
            aggregation::REQUEST_ID => request_id = Some(child.as_uint()?),
            aggregation::CONFIG => config = Some(decode_push_config(&child)?),
            _ => {}
        }
    }
    if request_id.is_some() {
        return Ok(None);
    }
    Ok(config)
}

fn decode_push_config(tlv: &Tlv) -> Result<PushConfig> {
    let mut config = PushConfig::default();
    for child in tlv.as_children()? {
        match child.tag() {
            aggregation::CONFIG_MAX_LEVEL => config.max_level = Some(child.as_uint()?),
            aggregation::CONFIG_AGGR_ALGO => config.aggr_algorithm = Some(child.as_uint()? as u8),
            aggregation::CONFIG_AGGR_PERIOD => config.aggr_period = Some(child.as_uint()?),
            aggregation::CONFIG_PARENT_URI => config.parent_uri = Some(child.as_utf8_string()?),
            _ => {}
        }
    }
    Ok(config)
}

pub struct ExtendRequest {
    pub request_id: u64,
    pub aggregation_time: u64,
    pub publication_time: Option<u64>,
}

pub fn build_extend_request(req: &ExtendRequest, version: PduVersion) -> Result<Vec<u8>> {
    let mut children = vec![
        Tlv::encode_uint(extend::REQUEST_ID, req.request_id)?,
        Tlv::encode_uint(extend::AGGREGATION_TIME, req.aggregation_time)?,
    ];
    if let Some(t) = req.publication_time {
        children.push(Tlv::encode_uint(extend::PUBLICATION_TIME, t)?);
    }
    let request = Tlv::encode_children(extend::REQUEST, &children)?;
    let pdu_children = match version {
        PduVersion::V1 => vec![request],
        PduVersion::V2 => vec![Tlv::encode_uint(header::LOGIN_ID, 0)?, request],
    };
    let pdu = Tlv::encode_children(extend::PDU, &pdu_children)?;
    pdu.to_bytes().map_err(TransportError::from)
}

pub struct ExtendResponse {
    pub request_id: u64,
    pub error: Option<u64>,
    pub calendar_chain: Option<CalendarChain>,
}

pub fn parse_extend_response(bytes: &[u8]) -> Result<ExtendResponse> {
    let tlvs = parse_all(bytes)?;
    let pdu = tlvs
        .into_iter()
        .find(|t| t.tag() == extend::PDU || t.tag() == extend::RESPONSE)
        .ok_or(TransportError::BadUri("missing extend PDU".into()))?;
    let children = if pdu.tag() == extend::PDU {
        pdu.as_children()?
    } else {
        vec![pdu]
    };
    let response = children
        .into_iter()
        .find(|t| t.tag() == extend::RESPONSE)
        .ok_or(TransportError::BadUri("missing extend response".into()))?;

    let mut request_id = None;
    let mut error = None;
    let mut calendar_chain = None;
    for child in response.as_children()? {
        match child.tag() {
            extend::REQUEST_ID => request_id = Some(child.as_uint()?),
            extend::REQUEST_ERROR => error = Some(child.as_uint()?),
            tags::CALENDAR_CHAIN => calendar_chain = Some(decode_calendar_chain(&child)?),
            _ if child.header.non_critical => {}
            _ => {}
        }
    }
    Ok(ExtendResponse {
        request_id: request_id.ok_or(TransportError::BadUri("missing request id".into()))?,
        error,
        calendar_chain,
    })
}

fn decode_aggregation_chain(tlv: &Tlv) -> Result<AggregationChain> {
    let mut input_hash = None;
    let input_level = 0u8;
    let mut aggr_time = None;
    let mut chain_index = Vec::new();
    let mut links = Vec::new();
    for child in tlv.as_children()? {
        match child.tag() {
            0x02 => aggr_time = Some(child.as_uint()?),
            0x03 => chain_index.push(child.as_uint()?),
            0x05 => input_hash = Some(Imprint::from_bytes(child.payload())?),
            chain_link::SIBLING_LEFT => links.push(decode_link(LinkDirection::Left, &child)?),
            chain_link::SIBLING_RIGHT => links.push(decode_link(LinkDirection::Right, &child)?),
            _ if child.header.non_critical => {}
            _ => {}
        }
    }
    Ok(AggregationChain {
        input_hash: input_hash.ok_or(TransportError::BadUri("aggregation chain missing input hash".into()))?,
        input_level,
        aggr_time: aggr_time.unwrap_or(0),
        chain_index,
        links,
    })
}

fn decode_link(direction: LinkDirection, tlv: &Tlv) -> Result<AggregationLink> {
    // A link's payload is either a raw sibling imprint, or a small
    // composite carrying that imprint alongside an optional level
    // correction and/or client metadata (a metadata-only link's "sibling"
    // is the hash of the metadata record itself, the same way the server
    // derives it).
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
            0x02 => sibling = Some(Imprint::from_bytes(child.payload())?),
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
            0x01 => publication_time = Some(child.as_uint()?),
            0x02 => aggregation_time = Some(child.as_uint()?),
            0x05 => input_hash = Some(Imprint::from_bytes(child.payload())?),
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
        publication_time: publication_time.ok_or(TransportError::BadUri("calendar chain missing publication time".into()))?,
        aggregation_time: aggregation_time.unwrap_or(0),
        input_hash: input_hash.ok_or(TransportError::BadUri("calendar chain missing input hash".into()))?,
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
            0x02 => {
                // published-data composite: (time, hash)
                for inner in child.as_children()? {
                    match inner.tag() {
                        0x02 => publication_time = Some(inner.as_uint()?),
                        0x04 => published_hash = Some(Imprint::from_bytes(inner.payload())?),
                        _ => {}
                    }
                }
            }
            0x03 => {
                for inner in child.as_children()? {
                    match inner.tag() {
                        0x01 => signer_cert = Some(inner.payload().to_vec()),
                        0x02 => signature_bytes = Some(inner.payload().to_vec()),
                        _ => {}
                    }
                }
            }
            _ if child.header.non_critical => {}
            _ => {}
        }
    }
    Ok(CalendarAuthRecord {
        publication_time: publication_time.ok_or(TransportError::BadUri("calendar auth record missing time".into()))?,
        published_hash: published_hash.ok_or(TransportError::BadUri("calendar auth record missing hash".into()))?,
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
            0x02 => publication_time = Some(child.as_uint()?),
            0x04 => publication_hash = Some(Imprint::from_bytes(child.payload())?),
            0x09 => publication_refs.push(child.as_utf8_string()?),
            0x0a => repository_uris.push(child.as_utf8_string()?),
            _ if child.header.non_critical => {}
            _ => {}
        }
    }
    Ok(PublicationRecord {
        publication_time: publication_time.ok_or(TransportError::BadUri("publication record missing time".into()))?,
        publication_hash: publication_hash.ok_or(TransportError::BadUri("publication record missing hash".into()))?,
        publication_refs,
        repository_uris,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_request_round_trips_through_parse_all() {
        let req = SignRequest {
            request_id: 7,
            request_hash: Some(Imprint::of(HashAlgorithm::Sha256, b"abc")),
            request_level: None,
            request_config: false,
        };
        let bytes = build_sign_request(&req, PduVersion::V1).unwrap();
        let tlvs = parse_all(&bytes).unwrap();
        assert_eq!(tlvs[0].tag(), aggregation::PDU);
        let request = &tlvs[0].as_children().unwrap()[0];
        assert_eq!(request.tag(), aggregation::REQUEST);
        let id = request
            .as_children()
            .unwrap()
            .into_iter()
            .find(|c| c.tag() == aggregation::REQUEST_ID)
            .unwrap();
        assert_eq!(id.as_uint().unwrap(), 7);
    }

    #[test]
    fn extend_request_round_trips() {
        let req = ExtendRequest {
            request_id: 3,
            aggregation_time: 1_398_866_256,
            publication_time: None,
        };
        let bytes = build_extend_request(&req, PduVersion::V1).unwrap();
        let tlvs = parse_all(&bytes).unwrap();
        assert_eq!(tlvs[0].tag(), extend::PDU);
    }

    #[test]
    fn parse_push_config_ignores_response_carrying_a_request_id() {
        let response = Tlv::encode_children(
            aggregation::RESPONSE,
            &[
                Tlv::encode_uint(aggregation::REQUEST_ID, 9).unwrap(),
                Tlv::encode_children(
                    aggregation::CONFIG,
                    &[Tlv::encode_uint(aggregation::CONFIG_MAX_LEVEL, 3).unwrap()],
                )
                .unwrap(),
            ],
        )
        .unwrap();
        let pdu = Tlv::encode_children(aggregation::PDU, &[response]).unwrap();
        let bytes = pdu.to_bytes().unwrap();

        assert!(parse_push_config(&bytes).unwrap().is_none());
    }

    #[test]
    fn parse_push_config_decodes_a_bare_config_response() {
        let response = Tlv::encode_children(
            aggregation::RESPONSE,
            &[Tlv::encode_children(
                aggregation::CONFIG,
                &[
                    Tlv::encode_uint(aggregation::CONFIG_MAX_LEVEL, 4).unwrap(),
                    Tlv::encode_uint(aggregation::CONFIG_AGGR_ALGO, 1).unwrap(),
                ],
            )
            .unwrap()],
        )
        .unwrap();
        let pdu = Tlv::encode_children(aggregation::PDU, &[response]).unwrap();
        let bytes = pdu.to_bytes().unwrap();

        let config = parse_push_config(&bytes).unwrap().expect("bare config response");
        assert_eq!(config.max_level, Some(4));
        assert_eq!(config.aggr_algorithm, Some(1));
    }
}
