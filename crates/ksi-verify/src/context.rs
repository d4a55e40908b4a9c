//! Everything a rule may consult while evaluating a signature (spec.md
//! §4.7's "Context"), assembled by the caller — typically `ksi::Context` —
//! before the policy engine runs.

use ksi_core::Imprint;
use ksi_proto::pki::TrustStore;
use ksi_proto::pubfile::PublicationsFile;
use ksi_proto::signature::{CalendarChain, PublicationRecord};
use std::sync::Arc;

/// Everything the rule catalogue in `rules.rs` can read. Building this is
/// the only place in the engine that may have touched the network or the
/// filesystem — individual rules stay pure functions over the finished
/// context.
pub struct VerificationContext {
    /// The document hash the caller is verifying the signature against, if
    /// any (a bare consistency check, with no document in hand, supplies
    /// `None`).
    pub document_hash: Option<Imprint>,
    /// Local aggregation level the caller committed to when signing
    /// (spec.md §4.3 "Document-hash level"); 0 for ordinary signing.
    pub local_level: u8,
    /// A previously fetched/cached publications file, for
    /// `PUBLICATIONS_FILE_BASED`.
    pub publications_file: Option<Arc<PublicationsFile>>,
    /// A publication the caller supplied out-of-band (typically decoded
    /// from a publication string), for `USER_PUBLICATION_BASED`.
    pub user_publication: Option<PublicationRecord>,
    /// Trust anchor for PKI signature checks (`KEY_BASED`, and the
    /// publications file's own signature).
    pub trust_store: Arc<dyn TrustStore>,
    /// A calendar chain already fetched from the extender for this
    /// signature's aggregation time, for `CALENDAR_BASED`. Populating this
    /// is the caller's responsibility — rule evaluation itself never
    /// performs network I/O (spec.md §4.7 "Rules are deterministic pure
    /// functions").
    pub extended_calendar_chain: Option<CalendarChain>,
}

impl VerificationContext {
    pub fn new(trust_store: Arc<dyn TrustStore>) -> Self {
        Self {
            document_hash: None,
            local_level: 0,
            publications_file: None,
            user_publication: None,
            trust_store,
            extended_calendar_chain: None,
        }
    }

    pub fn with_document_hash(mut self, hash: Imprint) -> Self {
        self.document_hash = Some(hash);
        self
    }

    pub fn with_local_level(mut self, level: u8) -> Self {
        self.local_level = level;
        self
    }

    pub fn with_publications_file(mut self, file: Arc<PublicationsFile>) -> Self {
        self.publications_file = Some(file);
        self
    }

    pub fn with_user_publication(mut self, publication: PublicationRecord) -> Self {
        self.user_publication = Some(publication);
        self
    }

    pub fn with_extended_calendar_chain(mut self, chain: CalendarChain) -> Self {
        self.extended_calendar_chain = Some(chain);
        self
    }
}
