//! Typed access to event parameters.

use omidx_sdk::objects::{Event, HexBytes, ParamValue};
use thiserror::Error;

/// A required event parameter is absent or has the wrong ABI type.
///
/// Well-formed chain logs never produce one; when it happens the event is
/// treated as a schema violation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("{signature} is missing parameter {param}")]
    MissingParam { signature: String, param: String },

    #[error("{signature} parameter {param} should be {expected} but is {found}")]
    WrongType {
        signature: String,
        param: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("{signature} parameter {param} value {value} does not fit in a signed 64-bit integer")]
    Overflow {
        signature: String,
        param: String,
        value: u64,
    },
}

pub struct Params<'a> {
    event: &'a Event,
}

impl<'a> Params<'a> {
    pub fn new(event: &'a Event) -> Self {
        Self { event }
    }

    fn require(&self, param: &str) -> Result<&'a ParamValue, DecodeError> {
        self.event
            .param(param)
            .ok_or_else(|| DecodeError::MissingParam {
                signature: self.event.signature.clone(),
                param: param.to_string(),
            })
    }

    fn wrong_type(&self, param: &str, expected: &'static str, found: &ParamValue) -> DecodeError {
        DecodeError::WrongType {
            signature: self.event.signature.clone(),
            param: param.to_string(),
            expected,
            found: found.kind_name(),
        }
    }

    pub fn address(&self, param: &str) -> Result<HexBytes, DecodeError> {
        match self.require(param)? {
            ParamValue::Address(address) => Ok(address.clone()),
            other => Err(self.wrong_type(param, "address", other)),
        }
    }

    /// `Ok(None)` when the event does not carry `param` at all.
    pub fn optional_address(&self, param: &str) -> Result<Option<HexBytes>, DecodeError> {
        if self.event.param(param).is_none() {
            return Ok(None);
        }
        self.address(param).map(Some)
    }

    pub fn bytes(&self, param: &str) -> Result<HexBytes, DecodeError> {
        match self.require(param)? {
            ParamValue::Bytes(bytes) => Ok(bytes.clone()),
            other => Err(self.wrong_type(param, "bytes", other)),
        }
    }

    pub fn bytes_array(&self, param: &str) -> Result<Vec<HexBytes>, DecodeError> {
        match self.require(param)? {
            ParamValue::BytesArray(list) => Ok(list.clone()),
            other => Err(self.wrong_type(param, "bytes[]", other)),
        }
    }

    /// Any integer parameter, signed or not, as an `i64`.
    pub fn int(&self, param: &str) -> Result<i64, DecodeError> {
        match self.require(param)? {
            ParamValue::Int(value) => Ok(*value),
            ParamValue::Uint(value) => {
                i64::try_from(*value).map_err(|_| DecodeError::Overflow {
                    signature: self.event.signature.clone(),
                    param: param.to_string(),
                    value: *value,
                })
            }
            other => Err(self.wrong_type(param, "int", other)),
        }
    }
}
