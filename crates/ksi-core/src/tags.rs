//! TLV tag constants.
//!
//! Tag values for the header, aggregation and extension PDUs are transcribed
//! from the upstream `libksi` tag table. The publications-file and extend-PDU
//! tags are not present in that table (it only covers the aggregation path)
//! and are reconstructed from the wire layout described for this client.

/// Legacy RFC-3161-compatible record, nested under a signature.
pub const RFC3161_RECORD: u16 = 0x0806;

pub const AGGREGATION_CHAIN: u16 = 0x0801;
pub const CALENDAR_CHAIN: u16 = 0x0802;
pub const PUBLICATION_RECORD: u16 = 0x0803;
pub const AGGREGATION_AUTH_RECORD: u16 = 0x0804;
pub const CALENDAR_AUTH_RECORD: u16 = 0x0805;
pub const SIGNATURE: u16 = 0x0800;

/// Generic header element tags, shared by every PDU.
pub mod header {
    pub const LOGIN_ID: u16 = 0x01;
    pub const INSTANCE_ID: u16 = 0x05;
    pub const MESSAGE_ID: u16 = 0x06;
}

/// MAC / HMAC trailer, appended to every PDU as the last element.
pub const PDU_MAC: u16 = 0x1f;

pub mod aggregation {
    pub const PDU: u16 = 0x0200;
    pub const REQUEST: u16 = 0x0201;
    pub const RESPONSE: u16 = 0x0202;

    pub const REQUEST_ID: u16 = 0x02;
    pub const REQUEST_HASH: u16 = 0x03;
    pub const REQUEST_LEVEL: u16 = 0x04;
    pub const REQUEST_ERROR: u16 = 0x05;

    pub const CONFIG: u16 = 0x10;
    pub const CONFIG_MAX_LEVEL: u16 = 0x11;
    pub const CONFIG_AGGR_ALGO: u16 = 0x12;
    pub const CONFIG_AGGR_PERIOD: u16 = 0x13;
    pub const CONFIG_PARENT_URI: u16 = 0x14;

    pub const REQUEST_ACK: u16 = 0x12;
}

pub mod extend {
    pub const PDU: u16 = 0x0300;
    pub const REQUEST: u16 = 0x0301;
    pub const RESPONSE: u16 = 0x0302;

    pub const REQUEST_ID: u16 = 0x02;
    pub const AGGREGATION_TIME: u16 = 0x03;
    pub const PUBLICATION_TIME: u16 = 0x04;
    pub const REQUEST_ERROR: u16 = 0x05;
    pub const CALENDAR_LAST_TIME: u16 = 0x06;
}

pub mod chain_link {
    pub const SIBLING_LEFT: u16 = 0x07;
    pub const SIBLING_RIGHT: u16 = 0x08;
    pub const LEVEL_CORRECTION: u16 = 0x01;
    pub const METADATA: u16 = 0x04;
}

pub mod metadata {
    pub const CLIENT_ID: u16 = 0x01;
    pub const MACHINE_ID: u16 = 0x02;
    pub const SEQUENCE_NR: u16 = 0x03;
    pub const REQUEST_TIME: u16 = 0x04;
}

pub mod pubfile {
    /// ASCII "KSIPUBLF" magic that prefixes the binary publications file.
    pub const MAGIC: &[u8; 8] = b"KSIPUBLF";

    pub const HEADER: u16 = 0x0701;
    pub const HEADER_VERSION: u16 = 0x01;
    pub const HEADER_CREATION_TIME: u16 = 0x02;
    pub const HEADER_REPOSITORY_URI: u16 = 0x03;

    pub const CERT_RECORD: u16 = 0x0702;
    pub const CERT_RECORD_ID: u16 = 0x01;
    pub const CERT_RECORD_X509: u16 = 0x02;

    pub const SIGNATURE: u16 = 0x0704;
}
