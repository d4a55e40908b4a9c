//! Declarative TLV templates.
//!
//! A `TlvTemplate<T>` is a static table mapping tags to per-field
//! encode/decode functions over a concrete struct `T`. This plays the role
//! the void*-based `KSI_TLV_TEMPLATE` macros play upstream, but without
//! runtime polymorphism over the target's memory layout: each element
//! carries a plain `fn` pointer closing over the field it reads or writes,
//! so extraction and construction stay monomorphic per `T`.

use crate::error::{Error, Result};
use crate::tlv::Tlv;
use std::collections::HashSet;

/// One field's wire binding within a template.
pub struct TemplateElement<T> {
    pub tag: u16,
    pub mandatory: bool,
    /// Whether the tag may legally repeat (backs a `Vec<_>` field).
    pub multiple: bool,
    /// Produce zero, one, or many TLVs for this field. Returning an empty
    /// vector omits an absent optional field.
    pub encode: fn(&T) -> Vec<Tlv>,
    /// Fold one matching TLV into the target under construction.
    pub decode: fn(&mut T, &Tlv) -> Result<()>,
}

pub struct TlvTemplate<T> {
    /// Used only in error messages.
    pub context: &'static str,
    pub elements: &'static [TemplateElement<T>],
}

impl<T: Default> TlvTemplate<T> {
    /// Build `T` out of a flat list of child TLVs (as produced by
    /// [`crate::tlv::Tlv::as_children`]), enforcing mandatory-element and
    /// non-repeatable-element invariants and rejecting unknown critical
    /// elements.
    pub fn extract(&self, children: &[Tlv]) -> Result<T> {
        let mut target = T::default();
        let mut seen: HashSet<u16> = HashSet::new();

        for child in children {
            match self.elements.iter().find(|e| e.tag == child.tag()) {
                Some(elem) => {
                    if !elem.multiple && !seen.insert(elem.tag) {
                        return Err(Error::UnexpectedRepetition { tag: elem.tag });
                    }
                    seen.insert(elem.tag);
                    (elem.decode)(&mut target, child)?;
                }
                None if child.header.non_critical => {
                    // Unknown but explicitly non-critical: skip.
                }
                None => {
                    return Err(Error::UnknownCriticalElement {
                        tag: child.tag(),
                        context: self.context,
                    });
                }
            }
        }

        for elem in self.elements.iter().filter(|e| e.mandatory) {
            if !seen.contains(&elem.tag) {
                return Err(Error::MissingElement {
                    tag: elem.tag,
                    context: self.context,
                });
            }
        }

        Ok(target)
    }

    /// Flatten `target` back into the wire element order given by the
    /// template's element table.
    pub fn construct(&self, target: &T) -> Vec<Tlv> {
        self.elements
            .iter()
            .flat_map(|elem| (elem.encode)(target))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tlv::Tlv;

    #[derive(Default, Debug, PartialEq)]
    struct Ping {
        id: u64,
        note: Option<String>,
    }

    const PING_ELEMENTS: &[TemplateElement<Ping>] = &[
        TemplateElement {
            tag: 0x01,
            mandatory: true,
            multiple: false,
            encode: |p| vec![Tlv::encode_uint(0x01, p.id).unwrap()],
            decode: |p, tlv| {
                p.id = tlv.as_uint()?;
                Ok(())
            },
        },
        TemplateElement {
            tag: 0x02,
            mandatory: false,
            multiple: false,
            encode: |p| {
                p.note
                    .as_ref()
                    .map(|n| vec![Tlv::encode_utf8_string(0x02, n).unwrap()])
                    .unwrap_or_default()
            },
            decode: |p, tlv| {
                p.note = Some(tlv.as_utf8_string()?);
                Ok(())
            },
        },
    ];

    const PING_TEMPLATE: TlvTemplate<Ping> = TlvTemplate {
        context: "ping",
        elements: PING_ELEMENTS,
    };

    #[test]
    fn round_trips_through_construct_and_extract() {
        let ping = Ping {
            id: 9,
            note: Some("hi".into()),
        };
        let children = PING_TEMPLATE.construct(&ping);
        let parsed = PING_TEMPLATE.extract(&children).unwrap();
        assert_eq!(ping, parsed);
    }

    #[test]
    fn missing_mandatory_element_is_rejected() {
        let note_only = Tlv::encode_utf8_string(0x02, "hi").unwrap();
        let err = PING_TEMPLATE.extract(&[note_only]).unwrap_err();
        assert!(matches!(err, Error::MissingElement { tag: 0x01, .. }));
    }

    #[test]
    fn unknown_critical_element_is_rejected() {
        let unknown = Tlv::raw(0x1234, vec![1]).unwrap();
        let id = Tlv::encode_uint(0x01, 1).unwrap();
        let err = PING_TEMPLATE.extract(&[id, unknown]).unwrap_err();
        assert!(matches!(err, Error::UnknownCriticalElement { .. }));
    }

    #[test]
    fn unknown_non_critical_element_is_skipped() {
        let unknown = Tlv::raw(0x1234, vec![1]).unwrap().header;
        let unknown = Tlv::new(unknown.non_critical(true), vec![1]).unwrap();
        let id = Tlv::encode_uint(0x01, 1).unwrap();
        let parsed = PING_TEMPLATE.extract(&[id, unknown]).unwrap();
        assert_eq!(parsed.id, 1);
    }
}
