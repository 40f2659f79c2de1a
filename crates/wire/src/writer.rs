use anyhow::ensure;
use bytes::{BufMut, Bytes, BytesMut};

/// A small append-only writer used to assemble the outbound packet: a
/// 12-byte header, the caller's pre-encoded question, and an optional
/// EDNS(0) OPT record.
pub struct WireWriter {
    buf: BytesMut,
}

impl WireWriter {
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(cap),
        }
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buf.put_u16(value);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.put_u32(value);
    }

    pub fn write_bytes(&mut self, data: &[u8]) -> anyhow::Result<()> {
        ensure!(
            self.buf.len() + data.len() <= u16::MAX as usize,
            "dns message would exceed 65535 bytes"
        );
        self.buf.extend_from_slice(data);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}
