//! Assembly of a DNS response from a decoded DoH answer.

use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::{DNSClass, RecordType};

use super::json::DohResponse;
use super::record::{parse_name, translate_record};

/// Build the DNS response for `query` out of a DoH answer.
///
/// The transaction id comes from the query and the flags from the DoH answer.
/// The message is only marked as a response when the upstream status is 0,
/// and the upstream status becomes the response code.
///
/// Question classes are taken from the query question at the same index.
/// Records keep the upstream order and count.
///
/// Additional records are placed in the authority section.
pub fn assemble_response(query: &Message, upstream: &DohResponse) -> Message {
    let mut response = Message::new();
    response
        .set_id(query.id())
        .set_message_type(if upstream.status == 0 {
            MessageType::Response
        } else {
            MessageType::Query
        })
        .set_op_code(OpCode::Query)
        .set_authoritative(false)
        .set_truncated(upstream.truncated)
        .set_recursion_desired(upstream.recursion_desired)
        .set_recursion_available(upstream.recursion_available)
        .set_authentic_data(upstream.authentic_data)
        .set_checking_disabled(upstream.checking_disabled)
        .set_response_code(<ResponseCode as From<u16>>::from(upstream.status));

    for (idx, question) in upstream.question.iter().enumerate() {
        let class = query
            .queries()
            .get(idx)
            .map_or(DNSClass::IN, Query::query_class);

        let mut echoed = Query::query(
            parse_name(&question.name),
            RecordType::from(question.record_type),
        );
        echoed.set_query_class(class);
        response.add_query(echoed);
    }

    for record in &upstream.answer {
        response.add_answer(translate_record(record));
    }

    for record in &upstream.authority {
        response.add_name_server(translate_record(record));
    }

    for record in &upstream.additional {
        response.add_name_server(translate_record(record));
    }

    response
}
