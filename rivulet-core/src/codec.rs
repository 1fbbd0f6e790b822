//! # Codecs
//!
//! Keys and values are stored in topics as raw bytes. A [`Serde`] converts a
//! Rust type to and from that wire form.
//!
//! - [`IntegerSerde`], [`LongSerde`] — fixed-width big-endian integers
//! - [`StringSerde`] — UTF-8 text
//! - [`BytesSerde`] — pass-through
//! - [`JsonSerde`], [`BincodeSerde`] — any serde-derived type
//! - [`WindowedSerde`] — a windowed key: inner key bytes followed by the window start
//!
//! Inside a running topology values are type-erased; [`ErasedSerde`] bridges
//! the two worlds and [`SerdeSlot`] records which Rust type a source or sink
//! expects so the configured defaults can be checked before any thread starts.

use std::any::{TypeId, type_name};
use std::marker::PhantomData;
use std::str::FromStr;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{SerdeError, StreamsError};
use crate::types::{BoxedValue, EventTime, StreamData};
use crate::window::{TimeWindow, Windowed};

/// Converts values of type `T` to and from bytes.
///
/// `topic` is passed for diagnostics only; implementations must not depend on it.
pub trait Serde<T>: Send + Sync {
    fn serialize(&self, topic: &str, value: &T) -> Result<Bytes, SerdeError>;
    fn deserialize(&self, topic: &str, data: &[u8]) -> Result<T, SerdeError>;
}

impl<T, S> Serde<T> for Arc<S>
where
    S: Serde<T> + ?Sized,
{
    fn serialize(&self, topic: &str, value: &T) -> Result<Bytes, SerdeError> {
        (**self).serialize(topic, value)
    }

    fn deserialize(&self, topic: &str, data: &[u8]) -> Result<T, SerdeError> {
        (**self).deserialize(topic, data)
    }
}

fn serialize_error(topic: &str, reason: impl ToString) -> SerdeError {
    SerdeError::Serialize {
        topic: topic.to_string(),
        reason: reason.to_string(),
    }
}

fn deserialize_error(topic: &str, reason: impl ToString) -> SerdeError {
    SerdeError::Deserialize {
        topic: topic.to_string(),
        reason: reason.to_string(),
    }
}

fn fixed<const N: usize>(topic: &str, data: &[u8]) -> Result<[u8; N], SerdeError> {
    data.try_into().map_err(|_| {
        deserialize_error(
            topic,
            format!("expected {} bytes, got {}", N, data.len()),
        )
    })
}

// ── Primitive serdes ──────────────────────────────────────────────────────────

/// 32-bit signed integer, 4 bytes big-endian.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntegerSerde;

impl Serde<i32> for IntegerSerde {
    fn serialize(&self, _topic: &str, value: &i32) -> Result<Bytes, SerdeError> {
        Ok(Bytes::copy_from_slice(&value.to_be_bytes()))
    }

    fn deserialize(&self, topic: &str, data: &[u8]) -> Result<i32, SerdeError> {
        Ok(i32::from_be_bytes(fixed::<4>(topic, data)?))
    }
}

/// 64-bit signed integer, 8 bytes big-endian.
#[derive(Debug, Clone, Copy, Default)]
pub struct LongSerde;

impl Serde<i64> for LongSerde {
    fn serialize(&self, _topic: &str, value: &i64) -> Result<Bytes, SerdeError> {
        Ok(Bytes::copy_from_slice(&value.to_be_bytes()))
    }

    fn deserialize(&self, topic: &str, data: &[u8]) -> Result<i64, SerdeError> {
        Ok(i64::from_be_bytes(fixed::<8>(topic, data)?))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StringSerde;

impl Serde<String> for StringSerde {
    fn serialize(&self, _topic: &str, value: &String) -> Result<Bytes, SerdeError> {
        Ok(Bytes::copy_from_slice(value.as_bytes()))
    }

    fn deserialize(&self, topic: &str, data: &[u8]) -> Result<String, SerdeError> {
        String::from_utf8(data.to_vec()).map_err(|e| deserialize_error(topic, e))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BytesSerde;

impl Serde<Bytes> for BytesSerde {
    fn serialize(&self, _topic: &str, value: &Bytes) -> Result<Bytes, SerdeError> {
        Ok(value.clone())
    }

    fn deserialize(&self, _topic: &str, data: &[u8]) -> Result<Bytes, SerdeError> {
        Ok(Bytes::copy_from_slice(data))
    }
}

// ── Structured serdes ─────────────────────────────────────────────────────────

/// JSON encoding for any serde-derived type.
pub struct JsonSerde<T> {
    _phantom: PhantomData<fn() -> T>,
}

impl<T> JsonSerde<T> {
    pub fn new() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<T> Default for JsonSerde<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonSerde<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> Serde<T> for JsonSerde<T>
where
    T: Serialize + DeserializeOwned,
{
    fn serialize(&self, topic: &str, value: &T) -> Result<Bytes, SerdeError> {
        serde_json::to_vec(value)
            .map(Bytes::from)
            .map_err(|e| serialize_error(topic, e))
    }

    fn deserialize(&self, topic: &str, data: &[u8]) -> Result<T, SerdeError> {
        serde_json::from_slice(data).map_err(|e| deserialize_error(topic, e))
    }
}

/// Compact binary encoding for any serde-derived type.
pub struct BincodeSerde<T> {
    _phantom: PhantomData<fn() -> T>,
}

impl<T> BincodeSerde<T> {
    pub fn new() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<T> Default for BincodeSerde<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for BincodeSerde<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> Serde<T> for BincodeSerde<T>
where
    T: Serialize + DeserializeOwned,
{
    fn serialize(&self, topic: &str, value: &T) -> Result<Bytes, SerdeError> {
        bincode::serialize(value)
            .map(Bytes::from)
            .map_err(|e| serialize_error(topic, e))
    }

    fn deserialize(&self, topic: &str, data: &[u8]) -> Result<T, SerdeError> {
        bincode::deserialize(data).map_err(|e| deserialize_error(topic, e))
    }
}

/// Windowed key encoding: `inner key bytes ++ window start (8 bytes BE)`.
///
/// The window size is not on the wire, so the serde carries it to rebuild the end.
#[derive(Debug, Clone)]
pub struct WindowedSerde<S> {
    inner: S,
    window_size_ms: EventTime,
}

impl<S> WindowedSerde<S> {
    pub fn new(inner: S, window_size: std::time::Duration) -> Self {
        Self {
            inner,
            window_size_ms: window_size.as_millis() as EventTime,
        }
    }
}

impl<K, S> Serde<Windowed<K>> for WindowedSerde<S>
where
    S: Serde<K>,
{
    fn serialize(&self, topic: &str, value: &Windowed<K>) -> Result<Bytes, SerdeError> {
        let key = self.inner.serialize(topic, &value.key)?;
        let mut buf = BytesMut::with_capacity(key.len() + 8);
        buf.put_slice(&key);
        buf.put_i64(value.window.start);
        Ok(buf.freeze())
    }

    fn deserialize(&self, topic: &str, data: &[u8]) -> Result<Windowed<K>, SerdeError> {
        if data.len() < 8 {
            return Err(deserialize_error(
                topic,
                format!("windowed key needs at least 8 bytes, got {}", data.len()),
            ));
        }
        let (key_bytes, start_bytes) = data.split_at(data.len() - 8);
        let key = self.inner.deserialize(topic, key_bytes)?;
        let start = EventTime::from_be_bytes(fixed::<8>(topic, start_bytes)?);
        Ok(Windowed::new(
            key,
            TimeWindow::new(start, start.saturating_add(self.window_size_ms)),
        ))
    }
}

// ── Default serde selection ───────────────────────────────────────────────────

/// Serdes selectable by name through `default.key.serde` / `default.value.serde`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerdeKind {
    /// `i32` via [`IntegerSerde`].
    Integer,
    /// `i64` via [`LongSerde`].
    Long,
    /// `String` via [`StringSerde`].
    String,
    /// `Bytes` via [`BytesSerde`].
    Bytes,
}

impl SerdeKind {
    /// The Rust type this serde produces.
    pub fn native_type_id(&self) -> TypeId {
        match self {
            SerdeKind::Integer => TypeId::of::<i32>(),
            SerdeKind::Long => TypeId::of::<i64>(),
            SerdeKind::String => TypeId::of::<String>(),
            SerdeKind::Bytes => TypeId::of::<Bytes>(),
        }
    }

    pub fn native_type_name(&self) -> &'static str {
        match self {
            SerdeKind::Integer => type_name::<i32>(),
            SerdeKind::Long => type_name::<i64>(),
            SerdeKind::String => type_name::<String>(),
            SerdeKind::Bytes => type_name::<Bytes>(),
        }
    }

    pub fn erased(&self) -> ErasedSerde {
        match self {
            SerdeKind::Integer => ErasedSerde::new::<i32, _>(IntegerSerde),
            SerdeKind::Long => ErasedSerde::new::<i64, _>(LongSerde),
            SerdeKind::String => ErasedSerde::new::<String, _>(StringSerde),
            SerdeKind::Bytes => ErasedSerde::new::<Bytes, _>(BytesSerde),
        }
    }
}

impl FromStr for SerdeKind {
    type Err = StreamsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "integer" | "int" | "i32" => Ok(SerdeKind::Integer),
            "long" | "i64" => Ok(SerdeKind::Long),
            "string" => Ok(SerdeKind::String),
            "bytes" | "bytearray" => Ok(SerdeKind::Bytes),
            other => Err(StreamsError::Config(format!("unknown serde '{other}'"))),
        }
    }
}

impl std::fmt::Display for SerdeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SerdeKind::Integer => "integer",
            SerdeKind::Long => "long",
            SerdeKind::String => "string",
            SerdeKind::Bytes => "bytes",
        };
        f.write_str(name)
    }
}

// ── Type erasure ──────────────────────────────────────────────────────────────

trait DynSerde: Send + Sync {
    fn serialize(&self, topic: &str, value: &BoxedValue) -> Result<Bytes, StreamsError>;
    fn deserialize(&self, topic: &str, data: &[u8]) -> Result<BoxedValue, SerdeError>;
}

struct TypedSerde<T, S> {
    serde: S,
    _phantom: PhantomData<fn() -> T>,
}

impl<T, S> DynSerde for TypedSerde<T, S>
where
    T: StreamData,
    S: Serde<T>,
{
    fn serialize(&self, topic: &str, value: &BoxedValue) -> Result<Bytes, StreamsError> {
        Ok(self.serde.serialize(topic, value.get::<T>()?)?)
    }

    fn deserialize(&self, topic: &str, data: &[u8]) -> Result<BoxedValue, SerdeError> {
        self.serde.deserialize(topic, data).map(BoxedValue::new)
    }
}

/// A [`Serde`] whose Rust type has been erased to [`BoxedValue`].
#[derive(Clone)]
pub struct ErasedSerde {
    inner: Arc<dyn DynSerde>,
    type_id: TypeId,
    type_name: &'static str,
}

impl ErasedSerde {
    pub fn new<T, S>(serde: S) -> Self
    where
        T: StreamData,
        S: Serde<T> + 'static,
    {
        Self {
            inner: Arc::new(TypedSerde {
                serde,
                _phantom: PhantomData::<fn() -> T>,
            }),
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
        }
    }

    pub fn serialize(&self, topic: &str, value: &BoxedValue) -> Result<Bytes, StreamsError> {
        self.inner.serialize(topic, value)
    }

    pub fn deserialize(&self, topic: &str, data: &[u8]) -> Result<BoxedValue, SerdeError> {
        self.inner.deserialize(topic, data)
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl std::fmt::Debug for ErasedSerde {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ErasedSerde(<{}>)", self.type_name)
    }
}

/// The serde requirement of a source, sink or store: the Rust type it handles
/// plus an optional explicit serde. Without one the configured default is used,
/// provided it produces the expected type.
#[derive(Debug, Clone)]
pub struct SerdeSlot {
    type_id: TypeId,
    type_name: &'static str,
    explicit: Option<ErasedSerde>,
}

impl SerdeSlot {
    /// Use the configured default serde for `T`.
    pub fn default_for<T: 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            explicit: None,
        }
    }

    pub fn explicit<T, S>(serde: S) -> Self
    where
        T: StreamData,
        S: Serde<T> + 'static,
    {
        Self::from_erased(ErasedSerde::new::<T, S>(serde))
    }

    pub fn from_erased(serde: ErasedSerde) -> Self {
        Self {
            type_id: serde.type_id(),
            type_name: serde.type_name(),
            explicit: Some(serde),
        }
    }

    pub fn is_explicit(&self) -> bool {
        self.explicit.is_some()
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Pick the serde to use at runtime.
    pub fn resolve(&self, default: SerdeKind) -> Result<ErasedSerde, StreamsError> {
        if let Some(serde) = &self.explicit {
            return Ok(serde.clone());
        }
        if default.native_type_id() == self.type_id {
            Ok(default.erased())
        } else {
            Err(StreamsError::Config(format!(
                "default serde '{}' produces {} but {} is required; supply an explicit serde",
                default,
                default.native_type_name(),
                self.type_name
            )))
        }
    }
}

#[cfg(test)]
#[path = "tests/codec_tests.rs"]
mod tests;
