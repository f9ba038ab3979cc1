use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("configuration error")]
    Config,
    #[display("could not open storage")]
    Storage,
    #[display("could not open metadata database")]
    Database,
    #[display("index operation failed")]
    Index,
    #[display("{_0}")]
    NotFound(#[error(not(source))] String),
    #[display("i/o error on {_0}")]
    Io(#[error(not(source))] String),
    #[display("interrupted")]
    Interrupted,
}
