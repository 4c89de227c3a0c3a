use std::fmt::Display;
use std::str::Utf8Error;
use std::string::FromUtf8Error;
use std::{fmt, io};

#[derive(Debug)]
pub enum ProxyError {
    /// The peer sent bytes that cannot be a MySQL packet, or a packet whose
    /// contents contradict its own framing.
    Protocol(String),

    /// Byte stream is valid so far but too short to decode.
    Incomplete(Needed),

    /// Handshake or credential verification failed.
    Auth(String),

    /// Could not establish or keep the backend connection.
    Connection(String),

    ConfigFileParseErr(String),

    IoError(io::Error),
    Utf8Error(Utf8Error),
    FromUtf8Error(FromUtf8Error),
    String(String),
}

impl Display for ProxyError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> fmt::Result {
        match self {
            ProxyError::Protocol(s)
            | ProxyError::Auth(s)
            | ProxyError::Connection(s)
            | ProxyError::ConfigFileParseErr(s)
            | ProxyError::String(s) => {
                write!(f, "{}", s)
            }
            ProxyError::Incomplete(n) => {
                write!(f, "{}", n)
            }
            ProxyError::IoError(err) => {
                write!(f, "{}", err)
            }
            ProxyError::Utf8Error(err) => {
                write!(f, "{}", err)
            }
            ProxyError::FromUtf8Error(err) => {
                write!(f, "{}", err)
            }
        }
    }
}

impl From<io::Error> for ProxyError {
    fn from(error: io::Error) -> Self {
        ProxyError::IoError(error)
    }
}

impl From<Utf8Error> for ProxyError {
    fn from(error: Utf8Error) -> Self {
        ProxyError::Utf8Error(error)
    }
}

impl From<FromUtf8Error> for ProxyError {
    fn from(error: FromUtf8Error) -> Self {
        ProxyError::FromUtf8Error(error)
    }
}

/// Contains information on needed data if a decoder returned `Incomplete`.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Needed {
    /// Needs more data, but we do not know how much.
    Unknown,

    NoEnoughData,

    InvalidData(String),
}

impl Display for Needed {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> fmt::Result {
        match self {
            Needed::Unknown => {
                write!(f, "Unknown")
            }
            Needed::NoEnoughData => {
                write!(f, "NoEnoughData")
            }
            Needed::InvalidData(s) => {
                write!(f, "{}", s)
            }
        }
    }
}
