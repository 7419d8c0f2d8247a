pub mod decode;
pub mod encode;
pub mod record;
pub mod stats;

pub use self::decode::{decode_buffer, DecodeError, DecodedBuffer};
pub use self::record::{
    BlockSample, ContextSample, CounterSet, EngineKind, MixGroupKey, MixType, PmuRecord,
    WireFormat, UNRESOLVED_STREAM_ID,
};
