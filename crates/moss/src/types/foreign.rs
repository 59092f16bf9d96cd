//! Opaque foreign payloads exposed through the standard-library contract.

use std::fs::File;

/// Payload of a Foreign value. The VM treats these as opaque; native library
/// functions downcast through this enum.
#[derive(Debug)]
pub(crate) enum ForeignData {
    CVoid,
    CLong(i64),
    CDouble(f64),
    CCharPtr(String),
    /// An owned file stream; `None` once closed.
    FStream(Option<File>),
    Regex(regex::Regex),
}

impl ForeignData {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::CVoid => "CVoid",
            Self::CLong(_) => "CLong",
            Self::CDouble(_) => "CDouble",
            Self::CCharPtr(_) => "CCharPtr",
            Self::FStream(_) => "FStream",
            Self::Regex(_) => "Regex",
        }
    }
}
