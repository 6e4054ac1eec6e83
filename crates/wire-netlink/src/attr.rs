//! TLV attribute walker for reply parsing.
//!
//! Mirrors [`crate::message::MessageBuilder`] on the decode side: iterates
//! a flat attribute block, skipping tags it does not recognise, and
//! descends into nested blocks explicitly on request.

use byteorder::{ByteOrder, NativeEndian};

/// A single decoded attribute: its tag and raw (unpadded) value bytes.
#[derive(Clone, Copy, Debug)]
pub struct Attr<'a> {
    pub tag: u16,
    pub value: &'a [u8],
}

fn align4(n: usize) -> usize {
    (n + 3) & !3
}

/// Iterates the TLV attributes in `buf`, which must start exactly at the
/// first attribute (the caller has already consumed any fixed payload
/// struct that precedes attributes in the message).
pub struct AttrWalker<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> AttrWalker<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Collect every attribute in this block into a `Vec`, in order.
    pub fn collect_all(mut self) -> Vec<Attr<'a>> {
        let mut out = Vec::new();
        while let Some(a) = self.next_attr() {
            out.push(a);
        }
        out
    }

    fn next_attr(&mut self) -> Option<Attr<'a>> {
        if self.pos + 4 > self.buf.len() {
            return None;
        }
        let len = NativeEndian::read_u16(&self.buf[self.pos..self.pos + 2]) as usize;
        let tag = NativeEndian::read_u16(&self.buf[self.pos + 2..self.pos + 4]);
        if len < 4 || self.pos + len > self.buf.len() {
            return None;
        }
        let value = &self.buf[self.pos + 4..self.pos + len];
        self.pos += align4(len);
        Some(Attr { tag, value })
    }
}

impl<'a> Iterator for AttrWalker<'a> {
    type Item = Attr<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_attr()
    }
}

/// Return the first attribute matching `tag` in `attrs`, unknown tags
/// skipped implicitly by the linear scan.
pub fn find<'a>(attrs: &[Attr<'a>], tag: u16) -> Option<&'a [u8]> {
    attrs.iter().find(|a| a.tag == tag).map(|a| a.value)
}

/// Decode into a nested attribute block: the caller has already located
/// the parent attribute's value bytes via [`find`].
pub fn nested(value: &[u8]) -> Vec<Attr<'_>> {
    AttrWalker::new(value).collect_all()
}

pub fn as_u32(value: &[u8]) -> Option<u32> {
    if value.len() < 4 {
        return None;
    }
    Some(NativeEndian::read_u32(&value[0..4]))
}

pub fn as_u8(value: &[u8]) -> Option<u8> {
    value.first().copied()
}

pub fn as_cstr(value: &[u8]) -> Option<&str> {
    let end = value.iter().position(|&b| b == 0).unwrap_or(value.len());
    std::str::from_utf8(&value[..end]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageBuilder, NlHeader, BUF_CREATE};

    #[test]
    fn walker_recovers_attrs_built_by_the_message_builder() {
        let header = NlHeader::request(crate::abi::RTM_NEWLINK, 0, 1, 1);
        let mut b = MessageBuilder::new(BUF_CREATE, header, &[0u8; 16]).unwrap();
        b.attr_str(3, "eth0").unwrap();
        b.attr_u32(4, 1500).unwrap();
        let bytes = b.finish();

        // Skip the 16-byte nlmsg header and the 16-byte ifinfomsg payload.
        let attrs: Vec<Attr> = AttrWalker::new(&bytes[32..]).collect_all();
        assert_eq!(attrs.len(), 2);
        assert_eq!(find(&attrs, 3).and_then(as_cstr), Some("eth0"));
        assert_eq!(find(&attrs, 4).and_then(as_u32), Some(1500));
        assert_eq!(find(&attrs, 99), None);
    }

    #[test]
    fn nested_descent_round_trips() {
        let header = NlHeader::request(crate::abi::RTM_NEWLINK, 0, 1, 1);
        let mut b = MessageBuilder::new(BUF_CREATE, header, &[0u8; 16]).unwrap();
        let off = b.begin_nested(18).unwrap();
        b.attr_str(1, "bond").unwrap();
        b.end_nested(off).unwrap();
        let bytes = b.finish();

        let attrs: Vec<Attr> = AttrWalker::new(&bytes[32..]).collect_all();
        let link_info = find(&attrs, 18).expect("link info present");
        let inner = nested(link_info);
        assert_eq!(find(&inner, 1).and_then(as_cstr), Some("bond"));
    }
}
