//! Translation of DoH JSON records into DNS resource records.
//!
//! The JSON API carries RDATA in presentation format. Only address records are
//! decoded into typed RDATA; other known types keep their header only, and
//! unknown types carry the raw `data` bytes as an opaque record so nothing is
//! dropped on the way through.

use std::net::{IpAddr, Ipv4Addr};

use hickory_proto::rr::rdata::{A, AAAA, NULL};
use hickory_proto::rr::{DNSClass, Name, RData, Record, RecordType};
use tracing::warn;

use super::json::DohRecord;

/// RDATA decoding strategy for a record type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordDecoder {
    /// IPv4 address literal.
    Ipv4,
    /// IPv6 address literal. IPv4 literals are stored v4-mapped.
    Ipv6,
    /// Known type whose RDATA is not decoded.
    HeaderOnly,
    /// Unknown type, RDATA kept verbatim.
    Opaque,
}

impl RecordDecoder {
    /// Select the decoder for a record type.
    pub const fn for_type(record_type: RecordType) -> Self {
        match record_type {
            RecordType::A => Self::Ipv4,
            RecordType::AAAA => Self::Ipv6,
            RecordType::Unknown(_) => Self::Opaque,
            _ => Self::HeaderOnly,
        }
    }

    /// Decode presentation-format `data` into RDATA.
    ///
    /// Address literals that fail to parse degrade to a header-only record.
    pub fn decode(self, record_type: RecordType, data: &str) -> RData {
        match self {
            Self::Ipv4 => match data.trim().parse::<Ipv4Addr>() {
                Ok(addr) => RData::A(A(addr)),
                Err(err) => {
                    warn!(data = %data, error = %err, "invalid A record address");
                    RData::Update0(record_type)
                }
            },
            Self::Ipv6 => match data.trim().parse::<IpAddr>() {
                Ok(IpAddr::V6(addr)) => RData::AAAA(AAAA(addr)),
                Ok(IpAddr::V4(addr)) => RData::AAAA(AAAA(addr.to_ipv6_mapped())),
                Err(err) => {
                    warn!(data = %data, error = %err, "invalid AAAA record address");
                    RData::Update0(record_type)
                }
            },
            Self::HeaderOnly => RData::Update0(record_type),
            Self::Opaque => RData::Unknown {
                code: record_type,
                rdata: if data.is_empty() {
                    NULL::new()
                } else {
                    NULL::with(data.as_bytes().to_vec())
                },
            },
        }
    }
}

/// Translate one JSON record into a resource record of class IN.
///
/// Never fails: a best-effort record is always returned.
pub fn translate_record(record: &DohRecord) -> Record {
    let record_type = RecordType::from(record.record_type);
    let rdata = RecordDecoder::for_type(record_type).decode(record_type, &record.data);

    let mut translated = Record::from_rdata(parse_name(&record.name), record.ttl, rdata);
    translated.set_dns_class(DNSClass::IN);
    translated
}

/// Parse an owner name from the JSON envelope, falling back to the root name.
pub(crate) fn parse_name(value: &str) -> Name {
    Name::from_utf8(value).unwrap_or_else(|err| {
        warn!(name = %value, error = %err, "invalid owner name in DoH response");
        Name::root()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::op::{Message, MessageType};
    use hickory_proto::serialize::binary::{BinDecodable, BinEncodable};
    use std::net::Ipv6Addr;
    use std::str::FromStr;

    fn json_record(name: &str, record_type: u16, ttl: u32, data: &str) -> DohRecord {
        DohRecord {
            name: name.to_string(),
            record_type,
            ttl,
            data: data.to_string(),
        }
    }

    #[test]
    fn should_decode_a_record_address() {
        let record = translate_record(&json_record("example.com.", 1, 300, "93.184.216.34"));

        assert_eq!(record.name(), &Name::from_str("example.com.").unwrap());
        assert_eq!(record.record_type(), RecordType::A);
        assert_eq!(record.dns_class(), DNSClass::IN);
        assert_eq!(record.ttl(), 300);
        assert_eq!(
            record.data(),
            &RData::A(A(Ipv4Addr::new(93, 184, 216, 34)))
        );
    }

    #[test]
    fn should_decode_aaaa_record_address() {
        let record = translate_record(&json_record("example.com.", 28, 60, "2606:2800:220:1::1"));

        assert_eq!(record.record_type(), RecordType::AAAA);
        assert_eq!(
            record.data(),
            &RData::AAAA(AAAA(Ipv6Addr::new(0x2606, 0x2800, 0x220, 1, 0, 0, 0, 1)))
        );
    }

    #[test]
    fn should_store_ipv4_literal_in_aaaa_as_mapped_address() {
        let record = translate_record(&json_record("example.com.", 28, 60, "10.0.0.1"));

        assert_eq!(
            record.data(),
            &RData::AAAA(AAAA(Ipv4Addr::new(10, 0, 0, 1).to_ipv6_mapped()))
        );
    }

    #[test]
    fn should_keep_unknown_type_data_verbatim() {
        let record = translate_record(&json_record("example.com.", 65280, 10, "\\# 3 abcdef"));

        assert_eq!(record.record_type(), RecordType::Unknown(65280));
        assert_eq!(record.dns_class(), DNSClass::IN);
        assert_eq!(
            record.data(),
            &RData::Unknown {
                code: RecordType::Unknown(65280),
                rdata: NULL::with(b"\\# 3 abcdef".to_vec()),
            }
        );
    }

    #[test]
    fn should_keep_empty_unknown_type_data() {
        let record = translate_record(&json_record("example.com.", 65280, 5, ""));

        assert_eq!(record.record_type(), RecordType::Unknown(65280));
        assert_eq!(record.ttl(), 5);
        assert_eq!(
            record.data(),
            &RData::Unknown {
                code: RecordType::Unknown(65280),
                rdata: NULL::new(),
            }
        );
    }

    #[test]
    fn should_encode_empty_unknown_type_record_on_the_wire() {
        let mut message = Message::new();
        message.set_id(9).set_message_type(MessageType::Response);
        message.add_answer(translate_record(&json_record("example.com.", 65280, 5, "")));

        let bytes = message.to_bytes().unwrap();
        let decoded = Message::from_bytes(&bytes).unwrap();

        assert_eq!(decoded.answers().len(), 1);
        assert_eq!(decoded.answers()[0].record_type(), RecordType::Unknown(65280));
        assert_eq!(decoded.answers()[0].ttl(), 5);
    }

    #[test]
    fn should_keep_header_only_for_known_types() {
        let record = translate_record(&json_record("example.com.", 15, 3600, "10 mail.example.com."));

        assert_eq!(record.record_type(), RecordType::MX);
        assert_eq!(record.ttl(), 3600);
        assert_eq!(record.data(), &RData::Update0(RecordType::MX));
    }

    #[test]
    fn should_degrade_invalid_address_to_header_only() {
        let record = translate_record(&json_record("example.com.", 1, 300, "not-an-ip"));

        assert_eq!(record.record_type(), RecordType::A);
        assert_eq!(record.data(), &RData::Update0(RecordType::A));
    }

    #[test]
    fn should_select_decoder_by_type() {
        assert_eq!(RecordDecoder::for_type(RecordType::A), RecordDecoder::Ipv4);
        assert_eq!(RecordDecoder::for_type(RecordType::AAAA), RecordDecoder::Ipv6);
        assert_eq!(
            RecordDecoder::for_type(RecordType::CNAME),
            RecordDecoder::HeaderOnly
        );
        assert_eq!(
            RecordDecoder::for_type(RecordType::Unknown(65280)),
            RecordDecoder::Opaque
        );
    }

    #[test]
    fn should_fall_back_to_root_for_invalid_name() {
        let long_label = "a".repeat(64);
        let record = translate_record(&json_record(&long_label, 1, 1, "127.0.0.1"));

        assert_eq!(record.name(), &Name::root());
    }
}
