use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("protobuf decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("unknown datatype byte: {0}")]
    UnknownDataType(u32),
}
