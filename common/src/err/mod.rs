use crate::err::proxy_error::ProxyError;

pub mod proxy_error;

pub type PResult<T> = Result<T, ProxyError>;
