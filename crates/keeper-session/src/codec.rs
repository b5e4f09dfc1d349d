//! Binary encoding of the value tree.
//!
//! Each node is framed as
//! `[key_len:u32][key][key_hash:u32][tag:u32][payload]`, where the key and
//! its hash are omitted when `key_len` is 0 (array elements). Containers wrap
//! their children between [`BEGIN`] and [`END`]. All integers use native
//! byte order.
//!
//! The decoder is a single linear scan with an explicit stack of open
//! containers; every read is bounds-checked so truncated or hostile input
//! fails cleanly instead of reading past the buffer.

use crate::error::{Error, Result};
use crate::tree::{Node, Tag, Value};

/// Marks the start of a container's children.
pub const BEGIN: u32 = 0xDEAD_1111;

/// Marks the end of a container's children.
pub const END: u32 = 0xDEAD_0000;

/// Separates the sections of a session file.
pub const BOUNDARY: u32 = 0xDEDD_ED90;

/// Longest key a conforming writer emits. Keeps key lengths clear of the sentinels.
pub const MAX_KEY_LEN: usize = 0xFFFF;

/// Maximum container nesting, counting the root.
pub const MAX_DEPTH: usize = 64;

/// Size of one `u32` frame word.
pub(crate) const WORD: usize = std::mem::size_of::<u32>();

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_ne_bytes());
}

fn put_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    put_u32(out, bytes.len() as u32);
    out.extend_from_slice(bytes);
}

/// Append the encoding of `root` (an object) to `out`.
///
/// Object children without a key are skipped, matching how they would be
/// unreachable by path anyway.
pub fn encode(root: &Node, out: &mut Vec<u8>) -> Result<()> {
    let Value::Object(children) = &root.value else {
        return Err(Error::Corrupt(format!(
            "root node must be an object, found {}",
            root.tag()
        )));
    };
    write_container(out, children, true, 1)
}

/// Encode `root` into a fresh buffer.
pub fn encode_to_vec(root: &Node) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(256);
    encode(root, &mut out)?;
    Ok(out)
}

fn write_container(out: &mut Vec<u8>, children: &[Node], keyed: bool, depth: usize) -> Result<()> {
    if depth > MAX_DEPTH {
        return Err(Error::DepthExceeded(MAX_DEPTH));
    }
    put_u32(out, BEGIN);
    for child in children {
        if keyed {
            let key = match child.key() {
                Some(k) if !k.is_empty() => k,
                _ => continue,
            };
            if key.len() > MAX_KEY_LEN {
                return Err(Error::KeyTooLong(key.len()));
            }
            put_bytes(out, key.as_bytes());
            put_u32(out, child.key_hash());
        } else {
            put_u32(out, 0);
        }
        put_u32(out, child.tag() as u32);
        write_payload(out, &child.value, depth)?;
    }
    put_u32(out, END);
    Ok(())
}

fn write_payload(out: &mut Vec<u8>, value: &Value, depth: usize) -> Result<()> {
    match value {
        Value::Null => {}
        Value::Bool(v) => out.push(u8::from(*v)),
        Value::Int(v) => out.extend_from_slice(&v.to_ne_bytes()),
        Value::Double(v) => out.extend_from_slice(&v.to_ne_bytes()),
        Value::String(s) => put_bytes(out, s.as_bytes()),
        Value::Blob(b) => put_bytes(out, b),
        Value::Timestamp { secs, format } => {
            out.extend_from_slice(&secs.to_ne_bytes());
            match format {
                Some(f) if *secs > 0 => put_bytes(out, f.as_bytes()),
                _ => put_u32(out, 0),
            }
        }
        Value::Array(children) => write_container(out, children, false, depth + 1)?,
        Value::Object(children) => write_container(out, children, true, depth + 1)?,
    }
    Ok(())
}

/// Bounds-checked cursor over an input buffer.
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .ok_or(Error::Truncated {
                offset: self.pos,
                needed: n,
            })?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub(crate) fn u32(&mut self) -> Result<u32> {
        self.array().map(u32::from_ne_bytes)
    }

    fn i64(&mut self) -> Result<i64> {
        self.array().map(i64::from_ne_bytes)
    }

    fn f64(&mut self) -> Result<f64> {
        self.array().map(f64::from_ne_bytes)
    }

    fn u8(&mut self) -> Result<u8> {
        self.array::<1>().map(|b| b[0])
    }

    fn string(&mut self, len: usize) -> Result<String> {
        let at = self.pos;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| Error::Corrupt(format!("invalid UTF-8 text at offset {at}")))
    }
}

/// Decode a value tree from the start of `buf`.
///
/// Returns the root object and the number of bytes consumed; decoding stops
/// as soon as the root container closes.
pub fn decode(buf: &[u8]) -> Result<(Node, usize)> {
    let mut r = Reader::new(buf);
    if r.u32()? != BEGIN {
        return Err(Error::Corrupt("value tree does not open with BEGIN".into()));
    }

    let mut stack: Vec<Node> = Vec::with_capacity(8);
    stack.push(Node::root());
    // A container node whose BEGIN has not been read yet.
    let mut pending: Option<Node> = None;

    loop {
        let at = r.position();
        let word = r.u32()?;

        if let Some(container) = pending.take() {
            if word != BEGIN {
                return Err(Error::Corrupt(format!(
                    "{} at offset {at} is not followed by BEGIN",
                    container.tag()
                )));
            }
            if stack.len() >= MAX_DEPTH {
                return Err(Error::DepthExceeded(MAX_DEPTH));
            }
            stack.push(container);
            continue;
        }

        match word {
            BEGIN => {
                return Err(Error::Corrupt(format!("unexpected BEGIN at offset {at}")));
            }
            END => {
                let Some(done) = stack.pop() else {
                    return Err(Error::Corrupt(format!("unbalanced END at offset {at}")));
                };
                match stack.last_mut() {
                    Some(parent) => {
                        parent.push(done);
                    }
                    None => return Ok((done, r.position())),
                }
            }
            key_len => {
                let key_len = key_len as usize;
                if key_len > MAX_KEY_LEN {
                    return Err(Error::Corrupt(format!(
                        "key length {key_len} at offset {at} is out of range"
                    )));
                }
                let (key, hash) = if key_len > 0 {
                    let key = r.string(key_len)?;
                    (Some(key), r.u32()?)
                } else {
                    (None, 0)
                };

                let tag_at = r.position();
                let raw = r.u32()?;
                let tag = Tag::from_u32(raw).ok_or_else(|| {
                    Error::Corrupt(format!("unknown type tag {raw} at offset {tag_at}"))
                })?;

                if tag.is_container() {
                    pending = Some(Node::with_hash(key, hash, Value::empty(tag)));
                    continue;
                }

                let value = read_scalar(&mut r, tag)?;
                if let Some(parent) = stack.last_mut() {
                    parent.push(Node::with_hash(key, hash, value));
                }
            }
        }
    }
}

fn read_scalar(r: &mut Reader<'_>, tag: Tag) -> Result<Value> {
    Ok(match tag {
        Tag::Null => Value::Null,
        Tag::Bool => Value::Bool(r.u8()? != 0),
        Tag::Int => Value::Int(r.i64()?),
        Tag::Double => Value::Double(r.f64()?),
        Tag::String => {
            let len = r.u32()? as usize;
            Value::String(r.string(len)?)
        }
        Tag::Blob => {
            let len = r.u32()? as usize;
            Value::Blob(r.take(len)?.to_vec())
        }
        Tag::Timestamp => {
            let secs = r.i64()?;
            let len = r.u32()? as usize;
            let format = if len > 0 { Some(r.string(len)?) } else { None };
            Value::Timestamp { secs, format }
        }
        Tag::Array | Tag::Object => Value::empty(tag),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample() -> Node {
        let mut root = Node::root();
        root.set("user/name", Value::String("ada".into()));
        root.set("user/id", Value::Int(-42));
        root.set("ratio", Value::Double(0.25));
        root.set("ok", Value::Bool(true));
        root.set("nothing", Value::Null);
        root.set("raw", Value::Blob(vec![0, 255, 7]));
        root.set(
            "seen",
            Value::Timestamp {
                secs: 1_700_000_000,
                format: Some("%Y-%m-%d".into()),
            },
        );
        root.set(
            "list",
            Value::Array(vec![
                Node::unkeyed(Value::Int(1)),
                Node::unkeyed(Value::String(String::new())),
                Node::unkeyed(Value::Array(vec![])),
            ]),
        );
        root
    }

    #[test]
    fn test_round_trip_preserves_order() {
        let root = sample();
        let bytes = encode_to_vec(&root).unwrap();
        let (decoded, used) = decode(&bytes).unwrap();
        assert_eq!(used, bytes.len());
        assert_eq!(decoded, root);

        let keys: Vec<_> = decoded.children().unwrap().iter().map(|n| n.key()).collect();
        assert_eq!(
            keys,
            vec![
                Some("user"),
                Some("ratio"),
                Some("ok"),
                Some("nothing"),
                Some("raw"),
                Some("seen"),
                Some("list")
            ]
        );
    }

    #[test]
    fn test_empty_tree() {
        let bytes = encode_to_vec(&Node::root()).unwrap();
        assert_eq!(bytes.len(), 2 * WORD);
        assert_eq!(u32::from_ne_bytes(bytes[..4].try_into().unwrap()), BEGIN);
        assert_eq!(u32::from_ne_bytes(bytes[4..].try_into().unwrap()), END);
        let (decoded, _) = decode(&bytes).unwrap();
        assert_eq!(decoded, Node::root());
    }

    #[test]
    fn test_unkeyed_object_children_are_skipped() {
        let root = Node::keyed(
            "ignored",
            Value::Object(vec![
                Node::unkeyed(Value::Int(1)),
                Node::keyed("", Value::Int(2)),
                Node::keyed("kept", Value::Int(3)),
            ]),
        );
        let (decoded, _) = decode(&encode_to_vec(&root).unwrap()).unwrap();
        assert_eq!(decoded.children().unwrap().len(), 1);
        assert_eq!(decoded.get_int("kept"), Some(3));
    }

    #[test]
    fn test_timestamp_format_needs_positive_epoch() {
        let mut root = Node::root();
        root.set(
            "t",
            Value::Timestamp {
                secs: 0,
                format: Some("%H".into()),
            },
        );
        let (decoded, _) = decode(&encode_to_vec(&root).unwrap()).unwrap();
        assert_eq!(decoded.get_timestamp("t"), Some((0, None)));
    }

    #[test]
    fn test_key_too_long() {
        let mut root = Node::root();
        root.push(Node::keyed(&"k".repeat(MAX_KEY_LEN + 1), Value::Null));
        assert!(matches!(encode_to_vec(&root), Err(Error::KeyTooLong(_))));
    }

    fn nested(levels: usize) -> Node {
        let mut node = Node::unkeyed(Value::Array(vec![]));
        for _ in 1..levels {
            node = Node::unkeyed(Value::Array(vec![node]));
        }
        let mut root = Node::root();
        root.push(Node::keyed("deep", node.value));
        root
    }

    #[test]
    fn test_depth_limit() {
        // root + 63 nested arrays
        let ok = nested(MAX_DEPTH - 1);
        let (decoded, _) = decode(&encode_to_vec(&ok).unwrap()).unwrap();
        assert_eq!(decoded, ok);

        let too_deep = nested(MAX_DEPTH);
        assert!(matches!(
            encode_to_vec(&too_deep),
            Err(Error::DepthExceeded(_))
        ));
    }

    #[test]
    fn test_decoder_rejects_hand_built_deep_input() {
        let mut bytes = Vec::new();
        put_u32(&mut bytes, BEGIN);
        for _ in 0..MAX_DEPTH {
            put_u32(&mut bytes, 0);
            put_u32(&mut bytes, Tag::Array as u32);
            put_u32(&mut bytes, BEGIN);
        }
        assert!(matches!(decode(&bytes), Err(Error::DepthExceeded(_))));
    }

    #[test]
    fn test_rejects_malformed_frames() {
        // does not start with BEGIN
        assert!(matches!(decode(&END.to_ne_bytes()), Err(Error::Corrupt(_))));

        // unknown tag
        let mut bytes = Vec::new();
        put_u32(&mut bytes, BEGIN);
        put_u32(&mut bytes, 0);
        put_u32(&mut bytes, 99);
        put_u32(&mut bytes, END);
        assert!(matches!(decode(&bytes), Err(Error::Corrupt(_))));

        // container without BEGIN
        let mut bytes = Vec::new();
        put_u32(&mut bytes, BEGIN);
        put_u32(&mut bytes, 0);
        put_u32(&mut bytes, Tag::Object as u32);
        put_u32(&mut bytes, END);
        put_u32(&mut bytes, END);
        assert!(matches!(decode(&bytes), Err(Error::Corrupt(_))));

        // key length in the sentinel range
        let mut bytes = Vec::new();
        put_u32(&mut bytes, BEGIN);
        put_u32(&mut bytes, BOUNDARY);
        assert!(matches!(decode(&bytes), Err(Error::Corrupt(_))));
    }

    #[test]
    fn test_huge_string_length_is_truncation() {
        let mut bytes = Vec::new();
        put_u32(&mut bytes, BEGIN);
        put_u32(&mut bytes, 0);
        put_u32(&mut bytes, Tag::String as u32);
        put_u32(&mut bytes, u32::MAX);
        assert!(matches!(decode(&bytes), Err(Error::Truncated { .. })));
    }

    fn arb_scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Int),
            (-1.0e12f64..1.0e12).prop_map(Value::Double),
            ".{0,16}".prop_map(Value::String),
            prop::collection::vec(any::<u8>(), 0..16).prop_map(Value::Blob),
            (1i64..i64::MAX, prop::option::of("[a-zA-Z%: -]{1,12}"))
                .prop_map(|(secs, format)| Value::Timestamp { secs, format }),
        ]
    }

    fn arb_value() -> impl Strategy<Value = Value> {
        arb_scalar().prop_recursive(8, 64, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..6)
                    .prop_map(|vals| Value::Array(vals.into_iter().map(Node::unkeyed).collect())),
                prop::collection::vec(("[a-zA-Z_][a-zA-Z0-9_]{0,7}", inner), 0..6).prop_map(
                    |pairs| Value::Object(
                        pairs
                            .into_iter()
                            .map(|(k, v)| Node::keyed(&k, v))
                            .collect()
                    )
                ),
            ]
        })
    }

    fn arb_tree() -> impl Strategy<Value = Node> {
        prop::collection::vec(("[a-zA-Z_][a-zA-Z0-9_]{0,7}", arb_value()), 0..8).prop_map(|pairs| {
            let mut root = Node::root();
            for (k, v) in pairs {
                root.push(Node::keyed(&k, v));
            }
            root
        })
    }

    proptest! {
        /// Property: decode(encode(t)) reproduces t, including child order.
        #[test]
        fn round_trip(tree in arb_tree()) {
            let bytes = encode_to_vec(&tree).unwrap();
            let (decoded, used) = decode(&bytes).unwrap();
            prop_assert_eq!(used, bytes.len());
            prop_assert_eq!(decoded, tree);
        }

        /// Property: every strict prefix of a valid encoding fails as truncated.
        #[test]
        fn truncation_is_detected(tree in arb_tree(), cut in any::<prop::sample::Index>()) {
            let bytes = encode_to_vec(&tree).unwrap();
            let at = cut.index(bytes.len());
            let result = decode(&bytes[..at]);
            prop_assert!(
                matches!(result, Err(Error::Truncated { .. })),
                "prefix of {} bytes decoded as {:?}",
                at,
                result
            );
        }

        /// Property: arbitrary bytes never panic the decoder.
        #[test]
        fn garbage_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
            let _ = decode(&bytes);
        }
    }
}
