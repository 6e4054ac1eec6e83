//! Framed request construction: header, fixed payload, TLV attributes.
//!
//! [`MessageBuilder`] owns a fixed-size stack buffer and a write cursor.
//! Attributes are appended as 4-byte-aligned TLVs; `begin_nested`/
//! `end_nested` implement the placeholder/backpatch pattern for nested
//! attribute blocks (link-info, info-data, multipath hops, ...).

use byteorder::{ByteOrder, NativeEndian};

use crate::abi::{NLM_F_ACK, NLM_F_REQUEST};

/// Buffer sized for a deletion or a plain state-change request.
pub const BUF_DEL: usize = 256;
/// Buffer sized for a creation carrying one nested attribute block.
pub const BUF_CREATE: usize = 512;
/// Buffer sized for multipath routes or VLAN filter lists.
pub const BUF_MULTIPATH: usize = 1024;
/// Receive buffer for typical dump enumerations.
pub const BUF_RECV: usize = 32 * 1024;

fn align4(n: usize) -> usize {
    (n + 3) & !3
}

/// Generic netlink header, written at offset 0 of every message.
#[derive(Clone, Copy, Debug)]
pub struct NlHeader {
    pub msg_type: u16,
    pub flags: u16,
    pub seq: u32,
    pub pid: u32,
}

impl NlHeader {
    pub fn request(msg_type: u16, extra_flags: u16, seq: u32, pid: u32) -> Self {
        Self {
            msg_type,
            flags: NLM_F_REQUEST | extra_flags,
            seq,
            pid,
        }
    }

    pub fn dump(msg_type: u16, seq: u32, pid: u32) -> Self {
        Self::request(msg_type, crate::abi::NLM_F_DUMP, seq, pid)
    }

    pub fn acked(mut self) -> Self {
        self.flags |= NLM_F_ACK;
        self
    }
}

const NLMSG_HDR_LEN: usize = 16;

/// A growable-within-capacity message buffer supporting nested TLVs.
pub struct MessageBuilder {
    buf: Vec<u8>,
    cap: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("message would overflow its {cap}-byte buffer (need {need})")]
    Overflow { cap: usize, need: usize },
}

impl MessageBuilder {
    /// Start a new message of the given capacity, reserving space for the
    /// netlink header; `payload` is the fixed struct following it
    /// (ifinfomsg / ifaddrmsg / rtmsg / ...).
    pub fn new(cap: usize, header: NlHeader, payload: &[u8]) -> Result<Self, BuildError> {
        let mut b = Self {
            buf: vec![0u8; NLMSG_HDR_LEN],
            cap,
        };
        b.write_header_placeholder(header)?;
        b.append_raw(payload)?;
        Ok(b)
    }

    fn write_header_placeholder(&mut self, header: NlHeader) -> Result<(), BuildError> {
        // Length is backpatched in `finish`.
        NativeEndian::write_u16(&mut self.buf[4..6], header.msg_type);
        NativeEndian::write_u16(&mut self.buf[6..8], header.flags);
        NativeEndian::write_u32(&mut self.buf[8..12], header.seq);
        NativeEndian::write_u32(&mut self.buf[12..16], header.pid);
        Ok(())
    }

    fn ensure_capacity(&self, additional: usize) -> Result<(), BuildError> {
        if self.buf.len() + additional > self.cap {
            return Err(BuildError::Overflow {
                cap: self.cap,
                need: self.buf.len() + additional,
            });
        }
        Ok(())
    }

    fn append_raw(&mut self, bytes: &[u8]) -> Result<(), BuildError> {
        self.ensure_capacity(bytes.len())?;
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    fn pad_to_align(&mut self) -> Result<(), BuildError> {
        let padded = align4(self.buf.len());
        self.ensure_capacity(padded - self.buf.len())?;
        self.buf.resize(padded, 0);
        Ok(())
    }

    /// Append a plain (non-nested) attribute: `{len: u16, tag: u16, value}`,
    /// padded to 4 bytes.
    pub fn attr(&mut self, tag: u16, value: &[u8]) -> Result<&mut Self, BuildError> {
        let len = 4 + value.len();
        self.ensure_capacity(align4(len))?;
        let mut hdr = [0u8; 4];
        NativeEndian::write_u16(&mut hdr[0..2], len as u16);
        NativeEndian::write_u16(&mut hdr[2..4], tag);
        self.buf.extend_from_slice(&hdr);
        self.buf.extend_from_slice(value);
        self.pad_to_align()?;
        Ok(self)
    }

    pub fn attr_u8(&mut self, tag: u16, value: u8) -> Result<&mut Self, BuildError> {
        self.attr(tag, &[value])
    }

    pub fn attr_u32(&mut self, tag: u16, value: u32) -> Result<&mut Self, BuildError> {
        let mut v = [0u8; 4];
        NativeEndian::write_u32(&mut v, value);
        self.attr(tag, &v)
    }

    pub fn attr_str(&mut self, tag: u16, value: &str) -> Result<&mut Self, BuildError> {
        let mut v = value.as_bytes().to_vec();
        v.push(0);
        self.attr(tag, &v)
    }

    /// Append raw bytes with no TLV framing or padding, for embedding a
    /// fixed struct (e.g. an `ifinfomsg`) inside a nested attribute block
    /// ahead of that struct's own attributes, as `VETH_INFO_PEER` requires.
    pub fn raw(&mut self, bytes: &[u8]) -> Result<&mut Self, BuildError> {
        self.append_raw(bytes)?;
        Ok(self)
    }

    /// Begin a nested attribute block: write a placeholder TLV header and
    /// return its offset for [`Self::end_nested`].
    pub fn begin_nested(&mut self, tag: u16) -> Result<usize, BuildError> {
        self.ensure_capacity(4)?;
        let offset = self.buf.len();
        let mut hdr = [0u8; 4];
        NativeEndian::write_u16(&mut hdr[2..4], tag);
        self.buf.extend_from_slice(&hdr);
        Ok(offset)
    }

    /// Backpatch the length field of a nested block started at `offset`.
    pub fn end_nested(&mut self, offset: usize) -> Result<(), BuildError> {
        self.pad_to_align()?;
        let len = (self.buf.len() - offset) as u16;
        NativeEndian::write_u16(&mut self.buf[offset..offset + 2], len);
        Ok(())
    }

    /// Backpatch an arbitrary 2-byte length field at `offset`, e.g. an
    /// `rtnexthop.rtnh_len` written as a placeholder by the caller before
    /// appending the hop's own attributes.
    pub fn patch_u16(&mut self, offset: usize, value: u16) {
        NativeEndian::write_u16(&mut self.buf[offset..offset + 2], value);
    }

    /// Finalize: backpatch the overall message length and return the bytes.
    pub fn finish(mut self) -> Vec<u8> {
        self.pad_to_align().expect("padding never exceeds capacity after prior checks");
        let total_len = self.buf.len() as u32;
        NativeEndian::write_u32(&mut self.buf[0..4], total_len);
        self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::RTM_NEWLINK;

    #[test]
    fn nested_block_length_is_backpatched_and_aligned() {
        let header = NlHeader::request(RTM_NEWLINK, 0, 1, 100);
        let mut b = MessageBuilder::new(BUF_CREATE, header, &[0u8; 16]).unwrap();
        let nested = b.begin_nested(18).unwrap();
        b.attr_str(1, "bond").unwrap();
        b.end_nested(nested).unwrap();
        let after = b.len();

        let bytes = b.finish();
        let inner_len = NativeEndian::read_u16(&bytes[nested..nested + 2]) as usize;
        // inner_len spans from the nested TLV's own header to the end of
        // its (4-byte-aligned) contents.
        assert_eq!(nested + inner_len, after);
        assert_eq!(inner_len % 4, 0);
    }

    #[test]
    fn overflow_is_rejected_before_corrupting_buffer() {
        let header = NlHeader::request(RTM_NEWLINK, 0, 1, 1);
        let mut b = MessageBuilder::new(BUF_DEL, header, &[0u8; 16]).unwrap();
        let big = vec![0u8; BUF_DEL];
        assert!(b.attr(1, &big).is_err());
    }

    #[test]
    fn finished_message_length_matches_header() {
        let header = NlHeader::request(RTM_NEWLINK, 0, 7, 42).acked();
        let mut b = MessageBuilder::new(BUF_CREATE, header, &[0u8; 16]).unwrap();
        b.attr_str(3, "eth0").unwrap();
        let bytes = b.finish();
        let len = NativeEndian::read_u32(&bytes[0..4]) as usize;
        assert_eq!(len, bytes.len());
        assert_eq!(len % 4, 0);
    }
}
