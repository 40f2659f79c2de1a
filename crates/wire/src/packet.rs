use bytes::Bytes;

use crate::edns::{Edns, OPT_RECORD_TYPE};
use crate::header::{DnsFlags, DnsHeader};
use crate::reader::WireReader;
use crate::writer::WireWriter;

/// Assemble an outbound query: a 12-byte header (QDCOUNT=1, all other
/// counts 0 except ARCOUNT=1 when `edns` is `Some`) followed by the
/// caller's pre-encoded question and an optional EDNS(0) OPT record.
///
/// `question` is accepted already wire-encoded (qname labels + qtype +
/// qclass) — this core never needs to build or compress a domain name
/// itself, per the caller-supplied `qname`/`qlen` contract at the public
/// interface.
pub fn build_query_packet(id: u16, question: &[u8], edns: Option<Edns>) -> anyhow::Result<Bytes> {
    let header = DnsHeader {
        id,
        flags: DnsFlags::query(),
        qdcount: 1,
        ancount: 0,
        nscount: 0,
        arcount: if edns.is_some() { 1 } else { 0 },
    };

    let mut writer = WireWriter::with_capacity(DnsHeader::WIRE_LEN + question.len() + 32);
    header.encode(&mut writer);
    writer.write_bytes(question)?;
    if let Some(edns) = edns {
        edns.encode(&mut writer);
    }
    Ok(writer.into_bytes())
}

/// Everything the engine needs to correlate and classify a reply, without
/// decoding the question/answer sections.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ReplyHeader {
    pub id: u16,
    pub flags: DnsFlags,
    pub rcode: u16,
    pub edns: Option<Edns>,
}

/// Parse just the header plus, if present, the EDNS OPT record from the
/// additional section of a reply. The question/answer/authority sections
/// are skipped over opaquely (length-driven, not decoded) purely so the
/// additional section can be reached; their contents are never inspected
/// here.
pub fn parse_reply_header(data: &[u8]) -> anyhow::Result<ReplyHeader> {
    let mut reader = WireReader::new(data);
    let header = DnsHeader::decode(&mut reader)?;

    let mut edns = None;
    if header.arcount > 0 {
        skip_questions(&mut reader, header.qdcount)?;
        skip_records(&mut reader, header.ancount)?;
        skip_records(&mut reader, header.nscount)?;
        edns = find_opt_in_additional(&mut reader, header.arcount)?;
    }

    let rcode = match edns {
        Some(e) => e.full_rcode(header.flags.rcode_low),
        None => header.flags.rcode_low as u16,
    };

    Ok(ReplyHeader {
        id: header.id,
        flags: header.flags,
        rcode,
        edns,
    })
}

fn skip_questions(reader: &mut WireReader<'_>, count: u16) -> anyhow::Result<()> {
    for _ in 0..count {
        reader.skip_name()?;
        reader.read_u16()?; // qtype
        reader.read_u16()?; // qclass
    }
    Ok(())
}

/// Skip `count` resource records of the generic `name/type/class/ttl/rdlen/rdata` shape.
fn skip_records(reader: &mut WireReader<'_>, count: u16) -> anyhow::Result<()> {
    for _ in 0..count {
        reader.skip_name()?;
        reader.read_u16()?; // type
        reader.read_u16()?; // class
        reader.read_u32()?; // ttl
        let rdlen = reader.read_u16()? as usize;
        reader.read_bytes(rdlen)?;
    }
    Ok(())
}

fn find_opt_in_additional(reader: &mut WireReader<'_>, count: u16) -> anyhow::Result<Option<Edns>> {
    for _ in 0..count {
        reader.skip_name()?;
        let rtype = reader.read_u16()?;
        if rtype == OPT_RECORD_TYPE {
            return Ok(Some(Edns::decode_after_type(reader)?));
        }
        // Not OPT: it's a normal RR with class/ttl/rdlen/rdata.
        reader.read_u16()?; // class
        reader.read_u32()?; // ttl
        let rdlen = reader.read_u16()? as usize;
        reader.read_bytes(rdlen)?;
    }
    Ok(None)
}

#[cfg(test)]
#[path = "packet_tests.rs"]
mod packet_tests;
