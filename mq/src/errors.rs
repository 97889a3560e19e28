use thiserror::Error;

pub type MqResult<T> = Result<T, MqError>;

#[derive(Error, Debug)]
pub enum MqError {
    #[error("queue connect error: {0}")]
    Connect(#[from] async_nats::ConnectError),

    #[error("stream setup error: {0}")]
    StreamSetup(#[from] async_nats::jetstream::context::CreateStreamError),

    #[error("pipeline channel closed")]
    ChannelClosed,
}
