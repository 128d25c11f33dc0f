//! Wire format for streamed trees.
//!
//! One record per line. Each record is a compact JSON chunk:
//! `{"target":"base"|<id>,"data":<node>}` or `{"target":<id>,"error":<reason>}`.
//! Non-leaf, non-sequence nodes carry a `kind` discriminator.

use bytes::{BufMut, Bytes, BytesMut};
use serde_json::{Map, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{DecodeError, EncodeError, Result};
use crate::tree::{Node, PlaceholderId, Props, Scalar};

/// Reserved discriminator field.
pub const KIND_FIELD: &str = "kind";

pub const KIND_ELEMENT: &str = "element";
pub const KIND_PLACEHOLDER: &str = "placeholder";
pub const KIND_LAZY: &str = "lazy";

/// Target of the first chunk of every stream.
pub const BASE_TARGET: &str = "base";

/// Maximum record size (64MB) - prevents OOM from malicious/corrupted records
pub const MAX_RECORD_SIZE: usize = 64 * 1024 * 1024;

/// Deepest JSON container nesting an encoded tree may have. Leaves room under
/// serde_json's decode recursion limit (128) for the chunk and request
/// envelopes.
pub const MAX_NESTING: usize = 120;

// =============================================================================
// Node codec
// =============================================================================

/// Encode a tree into its wire value.
///
/// Fails with [`EncodeError::TooDeep`] past [`MAX_NESTING`] nested JSON
/// containers, so every encoded record can be decoded again.
pub fn encode_node(node: &Node) -> std::result::Result<Value, EncodeError> {
    encode_at(node, 0)
}

pub fn encode_props(props: &Props) -> std::result::Result<Value, EncodeError> {
    encode_props_at(props, 0)
}

/// `depth` is the number of containers enclosing `node`.
fn encode_at(node: &Node, depth: usize) -> std::result::Result<Value, EncodeError> {
    if !node.is_leaf() && depth >= MAX_NESTING {
        return Err(EncodeError::TooDeep { max: MAX_NESTING });
    }
    Ok(match node {
        Node::Leaf(scalar) => match scalar {
            Scalar::Null => Value::Null,
            Scalar::Bool(b) => Value::Bool(*b),
            Scalar::Number(n) => Value::Number(n.clone()),
            Scalar::String(s) => Value::String(s.clone()),
        },
        Node::Sequence(items) => Value::Array(
            items
                .iter()
                .map(|item| encode_at(item, depth + 1))
                .collect::<std::result::Result<_, _>>()?,
        ),
        Node::Element {
            tag,
            props,
            children,
        } => {
            let mut obj = Map::new();
            obj.insert(KIND_FIELD.into(), KIND_ELEMENT.into());
            obj.insert("tag".into(), Value::String(tag.clone()));
            obj.insert("props".into(), encode_props_at(props, depth + 1)?);
            obj.insert("children".into(), encode_at(children, depth + 1)?);
            Value::Object(obj)
        }
        Node::Placeholder { id } => {
            let mut obj = Map::new();
            obj.insert(KIND_FIELD.into(), KIND_PLACEHOLDER.into());
            obj.insert("id".into(), Value::String(id.to_string()));
            Value::Object(obj)
        }
        Node::LazyRef { name, props } => {
            let mut obj = Map::new();
            obj.insert(KIND_FIELD.into(), KIND_LAZY.into());
            obj.insert("name".into(), Value::String(name.clone()));
            obj.insert("props".into(), encode_props_at(props, depth + 1)?);
            Value::Object(obj)
        }
        Node::ComponentRef { name, .. } => {
            return Err(EncodeError::UnrenderedComponent(name.clone()));
        }
    })
}

fn encode_props_at(props: &Props, depth: usize) -> std::result::Result<Value, EncodeError> {
    if depth >= MAX_NESTING {
        return Err(EncodeError::TooDeep { max: MAX_NESTING });
    }
    let mut obj = Map::new();
    for (key, value) in props {
        obj.insert(key.clone(), encode_at(value, depth + 1)?);
    }
    Ok(Value::Object(obj))
}

/// Decode a wire value back into a tree.
///
/// Fails on the first malformed node; no partial tree is returned.
pub fn decode_node(value: Value) -> std::result::Result<Node, DecodeError> {
    match value {
        Value::Null => Ok(Node::Leaf(Scalar::Null)),
        Value::Bool(b) => Ok(Node::Leaf(Scalar::Bool(b))),
        Value::Number(n) => Ok(Node::Leaf(Scalar::Number(n))),
        Value::String(s) => Ok(Node::Leaf(Scalar::String(s))),
        Value::Array(items) => Ok(Node::Sequence(
            items
                .into_iter()
                .map(decode_node)
                .collect::<std::result::Result<_, _>>()?,
        )),
        Value::Object(mut obj) => {
            let kind = match obj.remove(KIND_FIELD) {
                Some(Value::String(kind)) => kind,
                Some(_) => {
                    return Err(DecodeError::InvalidField {
                        kind: "unknown",
                        field: KIND_FIELD,
                        expected: "string",
                    })
                }
                None => return Err(DecodeError::NotANode),
            };

            match kind.as_str() {
                KIND_ELEMENT => {
                    let tag = take_string(&mut obj, KIND_ELEMENT, "tag")?;
                    let props = take_props(&mut obj, KIND_ELEMENT)?;
                    let children = match obj.remove("children") {
                        Some(v) => decode_node(v)?,
                        None => {
                            return Err(DecodeError::MissingField {
                                kind: KIND_ELEMENT,
                                field: "children",
                            })
                        }
                    };
                    Ok(Node::Element {
                        tag,
                        props,
                        children: Box::new(children),
                    })
                }
                KIND_PLACEHOLDER => {
                    let id = take_string(&mut obj, KIND_PLACEHOLDER, "id")?;
                    Ok(Node::Placeholder { id: id.parse()? })
                }
                KIND_LAZY => {
                    let name = take_string(&mut obj, KIND_LAZY, "name")?;
                    let props = take_props(&mut obj, KIND_LAZY)?;
                    Ok(Node::LazyRef { name, props })
                }
                _ => Err(DecodeError::UnknownKind(kind)),
            }
        }
    }
}

fn take_string(
    obj: &mut Map<String, Value>,
    kind: &'static str,
    field: &'static str,
) -> std::result::Result<String, DecodeError> {
    match obj.remove(field) {
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(DecodeError::InvalidField {
            kind,
            field,
            expected: "string",
        }),
        None => Err(DecodeError::MissingField { kind, field }),
    }
}

fn take_props(
    obj: &mut Map<String, Value>,
    kind: &'static str,
) -> std::result::Result<Props, DecodeError> {
    match obj.remove("props") {
        Some(Value::Object(map)) => decode_props(map),
        Some(_) => Err(DecodeError::InvalidField {
            kind,
            field: "props",
            expected: "object",
        }),
        None => Err(DecodeError::MissingField {
            kind,
            field: "props",
        }),
    }
}

pub fn decode_props(map: Map<String, Value>) -> std::result::Result<Props, DecodeError> {
    map.into_iter()
        .map(|(k, v)| decode_node(v).map(|node| (k, node)))
        .collect()
}

/// Encode a tree to its canonical text form.
pub fn encode(node: &Node) -> std::result::Result<String, EncodeError> {
    Ok(serde_json::to_string(&encode_node(node)?)?)
}

/// Decode a tree from its text form.
pub fn decode(text: &str) -> std::result::Result<Node, DecodeError> {
    decode_node(serde_json::from_str(text)?)
}

// =============================================================================
// Chunks
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    Base,
    Placeholder(PlaceholderId),
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::Base => f.write_str(BASE_TARGET),
            Target::Placeholder(id) => write!(f, "{}", id),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChunkPayload {
    Data(Node),
    Error(String),
}

/// One streamed record.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub target: Target,
    pub payload: ChunkPayload,
}

impl Chunk {
    pub fn base(data: Node) -> Self {
        Self {
            target: Target::Base,
            payload: ChunkPayload::Data(data),
        }
    }

    pub fn resolved(id: PlaceholderId, data: Node) -> Self {
        Self {
            target: Target::Placeholder(id),
            payload: ChunkPayload::Data(data),
        }
    }

    pub fn failed(id: PlaceholderId, reason: impl Into<String>) -> Self {
        Self {
            target: Target::Placeholder(id),
            payload: ChunkPayload::Error(reason.into()),
        }
    }

    pub fn is_base(&self) -> bool {
        self.target == Target::Base
    }

    /// Encode as a complete record, newline included.
    pub fn encode(&self) -> std::result::Result<Bytes, EncodeError> {
        let mut obj = Map::new();
        obj.insert("target".into(), Value::String(self.target.to_string()));
        match &self.payload {
            ChunkPayload::Data(node) => {
                obj.insert("data".into(), encode_node(node)?);
            }
            ChunkPayload::Error(reason) => {
                obj.insert("error".into(), Value::String(reason.clone()));
            }
        }

        let mut buf = BytesMut::with_capacity(64).writer();
        serde_json::to_writer(&mut buf, &Value::Object(obj))?;
        let mut buf = buf.into_inner();
        buf.put_u8(b'\n');
        Ok(buf.freeze())
    }

    /// Decode a single record (without its trailing newline).
    pub fn decode(record: &[u8]) -> std::result::Result<Self, DecodeError> {
        let mut obj = match serde_json::from_slice::<Value>(record)? {
            Value::Object(obj) => obj,
            _ => return Err(DecodeError::InvalidChunk("record is not an object".into())),
        };

        let target = match obj.remove("target") {
            Some(Value::String(t)) if t == BASE_TARGET => Target::Base,
            Some(Value::String(t)) => Target::Placeholder(t.parse()?),
            Some(_) => return Err(DecodeError::InvalidChunk("target is not a string".into())),
            None => return Err(DecodeError::InvalidChunk("missing target".into())),
        };

        let payload = match (obj.remove("data"), obj.remove("error")) {
            (Some(data), None) => ChunkPayload::Data(decode_node(data)?),
            (None, Some(Value::String(reason))) => ChunkPayload::Error(reason),
            (None, Some(_)) => {
                return Err(DecodeError::InvalidChunk("error is not a string".into()))
            }
            (Some(_), Some(_)) => {
                return Err(DecodeError::InvalidChunk(
                    "record carries both data and error".into(),
                ))
            }
            (None, None) => {
                return Err(DecodeError::InvalidChunk(
                    "record carries neither data nor error".into(),
                ))
            }
        };

        if target == Target::Base && matches!(payload, ChunkPayload::Error(_)) {
            return Err(DecodeError::InvalidChunk("base chunk cannot carry an error".into()));
        }

        Ok(Self { target, payload })
    }
}

// =============================================================================
// Render request
// =============================================================================

/// The record a client sends to ask for one component tree.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
    pub component: String,
    pub props: Props,
}

impl RenderRequest {
    pub fn new(component: impl Into<String>, props: Props) -> Self {
        Self {
            component: component.into(),
            props,
        }
    }

    /// Canonical text of the request. Equal requests give equal keys.
    pub fn cache_key(&self) -> std::result::Result<String, EncodeError> {
        let mut obj = Map::new();
        obj.insert("component".into(), Value::String(self.component.clone()));
        obj.insert("props".into(), encode_props(&self.props)?);
        Ok(serde_json::to_string(&Value::Object(obj))?)
    }

    pub fn encode(&self) -> std::result::Result<Bytes, EncodeError> {
        let mut line = self.cache_key()?.into_bytes();
        line.push(b'\n');
        Ok(Bytes::from(line))
    }

    pub fn decode(record: &[u8]) -> std::result::Result<Self, DecodeError> {
        let mut obj = match serde_json::from_slice::<Value>(record)? {
            Value::Object(obj) => obj,
            _ => return Err(DecodeError::InvalidChunk("request is not an object".into())),
        };
        let component = take_string(&mut obj, "request", "component")?;
        let props = match obj.remove("props") {
            Some(Value::Object(map)) => decode_props(map)?,
            Some(_) => {
                return Err(DecodeError::InvalidField {
                    kind: "request",
                    field: "props",
                    expected: "object",
                })
            }
            None => Props::new(),
        };
        Ok(Self { component, props })
    }
}

// =============================================================================
// Record reading/writing
// =============================================================================

/// Read one raw record (newline stripped). `None` on clean end of stream.
pub async fn read_record<R: AsyncBufRead + Unpin>(r: &mut R) -> Result<Option<Vec<u8>>> {
    let mut line = Vec::new();
    loop {
        let buf = r.fill_buf().await?;
        if buf.is_empty() {
            if line.is_empty() {
                return Ok(None);
            }
            return Err(DecodeError::Truncated.into());
        }

        match buf.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                line.extend_from_slice(&buf[..pos]);
                r.consume(pos + 1);
                break;
            }
            None => {
                let n = buf.len();
                line.extend_from_slice(buf);
                r.consume(n);
            }
        }

        // Validate record size before growing further
        if line.len() > MAX_RECORD_SIZE {
            return Err(DecodeError::RecordTooLarge {
                size: line.len(),
                max: MAX_RECORD_SIZE,
            }
            .into());
        }
    }

    if line.len() > MAX_RECORD_SIZE {
        return Err(DecodeError::RecordTooLarge {
            size: line.len(),
            max: MAX_RECORD_SIZE,
        }
        .into());
    }
    Ok(Some(line))
}

/// Read and decode the next chunk. `None` on clean end of stream.
pub async fn read_chunk<R: AsyncBufRead + Unpin>(r: &mut R) -> Result<Option<Chunk>> {
    match read_record(r).await? {
        Some(record) => Ok(Some(Chunk::decode(&record)?)),
        None => Ok(None),
    }
}

/// Write a pre-encoded record to the stream.
pub async fn write_record<W: AsyncWrite + Unpin>(w: &mut W, record: &Bytes) -> Result<()> {
    w.write_all(record).await?;
    Ok(())
}

pub async fn write_chunk<W: AsyncWrite + Unpin>(w: &mut W, chunk: &Chunk) -> Result<()> {
    write_record(w, &chunk.encode()?).await
}

// =============================================================================
// Tests
// =============================================================================
