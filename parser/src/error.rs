use thiserror::Error;

#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("Nom error: {0:?}")]
    Nom(nom::error::ErrorKind),
    #[error("Invalid replay format: {0}")]
    Format(String),
    #[error("Input ended in the middle of a record")]
    Truncated,
    #[error("Failed to decompress chunk payload: {0}")]
    Decompression(String),
    #[error("Decompressed payload exceeds the {limit} byte ceiling")]
    DecompressionLimit { limit: usize },
    #[error("Malformed movement packet: {0}")]
    PacketDecode(&'static str),
    #[error("I/O error")]
    Io(#[from] std::io::Error),
    #[error("Error parsing json")]
    Json(#[from] serde_json::Error),
}

impl ErrorKind {
    pub(crate) fn format(msg: impl Into<String>) -> Self {
        ErrorKind::Format(msg.into())
    }
}

#[derive(Debug)]
pub struct Error<I> {
    pub input: I,
    pub kind: ErrorKind,
}

impl<I> Error<I> {
    pub fn new(input: I, kind: ErrorKind) -> Self {
        Error { input, kind }
    }
}

pub fn failure_from_kind<I>(input: I, kind: ErrorKind) -> nom::Err<Error<I>> {
    nom::Err::Failure(Error::new(input, kind))
}

impl<I> nom::error::ParseError<I> for Error<I> {
    fn from_error_kind(input: I, kind: nom::error::ErrorKind) -> Self {
        let kind = match kind {
            nom::error::ErrorKind::Eof => ErrorKind::Truncated,
            kind => ErrorKind::Nom(kind),
        };
        Error { input, kind }
    }

    fn append(_input: I, _kind: nom::error::ErrorKind, other: Self) -> Self {
        other
    }
}

impl<I> From<nom::Err<Error<I>>> for ErrorKind {
    fn from(err: nom::Err<Error<I>>) -> Self {
        match err {
            nom::Err::Incomplete(_) => ErrorKind::Truncated,
            nom::Err::Error(e) | nom::Err::Failure(e) => e.kind,
        }
    }
}

pub type IResult<I, O> = nom::IResult<I, O, Error<I>>;
