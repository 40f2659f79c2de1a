use crate::reader::WireReader;
use crate::writer::WireWriter;

/// The RFC 1035 opcode. Outbound queries from this core are always
/// `Query`; the variant exists so a decoded reply's opcode round-trips
/// instead of being silently discarded.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub enum DnsOpcode {
    #[default]
    Query,
    IQuery,
    Status,
    Other(u8),
}

impl From<u8> for DnsOpcode {
    fn from(value: u8) -> Self {
        match value {
            0 => DnsOpcode::Query,
            1 => DnsOpcode::IQuery,
            2 => DnsOpcode::Status,
            other => DnsOpcode::Other(other),
        }
    }
}

impl From<DnsOpcode> for u8 {
    fn from(value: DnsOpcode) -> Self {
        match value {
            DnsOpcode::Query => 0,
            DnsOpcode::IQuery => 1,
            DnsOpcode::Status => 2,
            DnsOpcode::Other(v) => v,
        }
    }
}

/// The 16-bit flags word, split into its named bits. Only the bits this
/// core reads or sets are broken out individually; `rcode_low` carries
/// the low 4 bits of the response code, extended by the OPT record's
/// extended-rcode byte when present (see [`crate::edns::Edns`]).
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct DnsFlags {
    pub qr: bool,
    pub opcode: DnsOpcode,
    pub aa: bool,
    pub tc: bool,
    pub rd: bool,
    pub ra: bool,
    pub ad: bool,
    pub cd: bool,
    pub rcode_low: u8,
}

impl DnsFlags {
    /// The flags of a fresh recursive outbound query: RD set, everything
    /// else clear.
    pub fn query() -> Self {
        Self {
            rd: true,
            ..Default::default()
        }
    }

    pub fn decode(bits: u16) -> Self {
        Self {
            qr: (bits >> 15) & 0x1 != 0,
            opcode: DnsOpcode::from(((bits >> 11) & 0xF) as u8),
            aa: (bits >> 10) & 0x1 != 0,
            tc: (bits >> 9) & 0x1 != 0,
            rd: (bits >> 8) & 0x1 != 0,
            ra: (bits >> 7) & 0x1 != 0,
            ad: (bits >> 5) & 0x1 != 0,
            cd: (bits >> 4) & 0x1 != 0,
            rcode_low: (bits & 0xF) as u8,
        }
    }

    pub fn encode(&self) -> u16 {
        let opcode: u8 = self.opcode.into();
        ((self.qr as u16) << 15)
            | ((opcode as u16) << 11)
            | ((self.aa as u16) << 10)
            | ((self.tc as u16) << 9)
            | ((self.rd as u16) << 8)
            | ((self.ra as u16) << 7)
            | ((self.ad as u16) << 5)
            | ((self.cd as u16) << 4)
            | (self.rcode_low as u16 & 0xF)
    }
}

/// The fixed 12-byte DNS header.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DnsHeader {
    pub id: u16,
    pub flags: DnsFlags,
    pub qdcount: u16,
    pub ancount: u16,
    pub nscount: u16,
    pub arcount: u16,
}

impl DnsHeader {
    pub const WIRE_LEN: usize = 12;

    pub fn decode(reader: &mut WireReader<'_>) -> anyhow::Result<Self> {
        let id = reader.read_u16()?;
        let flags = DnsFlags::decode(reader.read_u16()?);
        let qdcount = reader.read_u16()?;
        let ancount = reader.read_u16()?;
        let nscount = reader.read_u16()?;
        let arcount = reader.read_u16()?;
        Ok(Self {
            id,
            flags,
            qdcount,
            ancount,
            nscount,
            arcount,
        })
    }

    pub fn encode(&self, writer: &mut WireWriter) {
        writer.write_u16(self.id);
        writer.write_u16(self.flags.encode());
        writer.write_u16(self.qdcount);
        writer.write_u16(self.ancount);
        writer.write_u16(self.nscount);
        writer.write_u16(self.arcount);
    }
}

#[cfg(test)]
#[path = "header_tests.rs"]
mod header_tests;
