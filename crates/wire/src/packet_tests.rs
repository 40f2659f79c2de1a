use super::*;

/// A wire-encoded question for "a.example." / A / IN.
fn question_a_example() -> Vec<u8> {
    let mut q = Vec::new();
    q.push(1);
    q.extend_from_slice(b"a");
    q.push(7);
    q.extend_from_slice(b"example");
    q.push(0);
    q.extend_from_slice(&1u16.to_be_bytes()); // A
    q.extend_from_slice(&1u16.to_be_bytes()); // IN
    q
}

#[test]
fn build_then_parse_yields_submitted_id_and_flags() {
    let question = question_a_example();
    let packet = build_query_packet(0xABCD, &question, None).unwrap();

    let parsed = parse_reply_header(&packet).unwrap();
    assert_eq!(parsed.id, 0xABCD);
    assert!(parsed.flags.rd);
    assert!(!parsed.flags.qr);
    assert_eq!(parsed.rcode, 0);
    assert!(parsed.edns.is_none());
}

#[test]
fn build_with_edns_sets_arcount_and_round_trips_do_bit() {
    let question = question_a_example();
    let edns = Edns::for_query(1232, true);
    let packet = build_query_packet(42, &question, Some(edns)).unwrap();

    let parsed = parse_reply_header(&packet).unwrap();
    let opt = parsed.edns.expect("opt record should be present");
    assert!(opt.do_bit);
    assert_eq!(opt.udp_payload_size, 1232);
}

#[test]
fn reply_with_answer_record_before_opt_still_parses() {
    // header(12) + question + one A answer + OPT in additional.
    let question = question_a_example();
    let mut writer = WireWriter::with_capacity(128);
    DnsHeader {
        id: 7,
        flags: DnsFlags { qr: true, ..DnsFlags::query() },
        qdcount: 1,
        ancount: 1,
        nscount: 0,
        arcount: 1,
    }
    .encode(&mut writer);
    writer.write_bytes(&question).unwrap();

    // answer: root name pointer avoided, use a direct 1-label name for simplicity.
    writer.write_u8(0); // name
    writer.write_u16(1); // type A
    writer.write_u16(1); // class IN
    writer.write_u32(300); // ttl
    writer.write_u16(4); // rdlen
    writer.write_bytes(&[127, 0, 0, 1]).unwrap();

    Edns::for_query(4096, false).encode(&mut writer);

    let packet = writer.into_bytes();
    let parsed = parse_reply_header(&packet).unwrap();
    assert_eq!(parsed.id, 7);
    assert!(parsed.edns.is_some());
}
