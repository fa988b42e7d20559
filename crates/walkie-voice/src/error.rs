use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("STT error: {0}")]
    Stt(String),

    #[error("classifier error: {0}")]
    Classifier(String),

    #[error("transcripción vacía")]
    EmptyTranscript,

    #[error("respuesta vacía del clasificador")]
    EmptyResponse,
}
