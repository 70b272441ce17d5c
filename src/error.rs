use thiserror::Error;

/// Errors produced while decoding a single IPFIX message, flowset, template
/// or data record. All of these are local to the offending unit of work —
/// none of them are process-fatal, see the dispositions in the dispatcher.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("malformed IPFIX header: {0}")]
    MalformedHeader(String),

    #[error("malformed flowset: {0}")]
    MalformedFlowset(String),

    #[error("truncated template record: {0}")]
    TruncatedTemplate(String),

    #[error("truncated option template record: {0}")]
    TruncatedOptionTemplate(String),

    #[error("unsupported template shape: {0}")]
    UnsupportedTemplateShape(String),

    #[error("truncated data record at offset {offset}, needed {needed} bytes, {left} left")]
    TruncatedRecord { offset: usize, needed: usize, left: usize },

    #[error("output buffer full")]
    OutputBufferFull,
}

pub type Result<T> = std::result::Result<T, CoreError>;
