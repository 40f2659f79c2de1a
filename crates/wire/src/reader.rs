use anyhow::ensure;

/// A small cursor over a borrowed byte slice, used for reading the fixed
/// header and EDNS OPT record of a reply. There is no qname reader here —
/// replies are only ever inspected for their header and OPT pseudo-RR.
pub struct WireReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self { buffer, position: 0 }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.position)
    }

    fn need(&self, need: usize, what: &str) -> anyhow::Result<()> {
        ensure!(
            need <= self.remaining(),
            "buffer underflow at pos {} while reading {}: need {} bytes, have {}",
            self.position,
            what,
            need,
            self.remaining()
        );
        Ok(())
    }

    pub fn read_u8(&mut self) -> anyhow::Result<u8> {
        self.need(1, "u8")?;
        let byte = self.buffer[self.position];
        self.position += 1;
        Ok(byte)
    }

    pub fn read_u16(&mut self) -> anyhow::Result<u16> {
        self.need(2, "u16")?;
        let bytes = &self.buffer[self.position..self.position + 2];
        let word = u16::from_be_bytes([bytes[0], bytes[1]]);
        self.position += 2;
        Ok(word)
    }

    pub fn read_u32(&mut self) -> anyhow::Result<u32> {
        self.need(4, "u32")?;
        let bytes = &self.buffer[self.position..self.position + 4];
        let word = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        self.position += 4;
        Ok(word)
    }

    pub fn read_bytes(&mut self, len: usize) -> anyhow::Result<&'a [u8]> {
        self.need(len, "raw bytes")?;
        let out = &self.buffer[self.position..self.position + len];
        self.position += len;
        Ok(out)
    }

    /// Skip a possibly-compressed owner name without decoding it, landing
    /// on the byte right after the terminating root label or the first
    /// compression pointer. Used only to step over the OPT record's empty
    /// owner name in the additional section.
    pub fn skip_name(&mut self) -> anyhow::Result<()> {
        loop {
            let len = self.read_u8()?;
            if len == 0 {
                return Ok(());
            }
            if len & 0xC0 == 0xC0 {
                // compression pointer: one more byte, then done.
                self.read_u8()?;
                return Ok(());
            }
            self.read_bytes(len as usize)?;
        }
    }
}
