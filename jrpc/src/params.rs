//! Conversion between the wire `params` field and method arguments.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};

use crate::error::{Error, ErrorKind, Result};

/// How method arguments are packed into `params`.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ParamsPacking {
    /// The only argument is `params` itself.
    Single,
    /// Arguments form a positional array.
    #[default]
    Positional,
    /// Arguments form an object keyed by parameter name.
    Named,
}

impl ParamsPacking {
    /// Splits incoming `params` into one value per declared parameter.
    ///
    /// The result always has `names.len()` entries; positions the wire value
    /// does not cover are `null`, surplus array entries are dropped. Absent
    /// `params` count as no arguments at all.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParams` if `params` is present but not an array
    /// (positional) or not an object (named), an explicit `null` included.
    pub fn unpack(self, params: Option<Value>, names: &[&str]) -> Result<Vec<Value>> {
        let count = names.len();
        match (self, params) {
            (ParamsPacking::Single, params) => Ok(vec![params.unwrap_or_default()]),
            (ParamsPacking::Positional | ParamsPacking::Named, None) => {
                Ok(vec![Value::Null; count])
            }
            (ParamsPacking::Positional, Some(Value::Array(mut values))) => {
                values.resize(count, Value::Null);
                Ok(values)
            }
            (ParamsPacking::Named, Some(Value::Object(mut map))) => Ok(names
                .iter()
                .map(|name| map.remove(*name).unwrap_or_default())
                .collect()),
            (ParamsPacking::Positional, Some(other)) => Err(Error::new(
                ErrorKind::InvalidParams,
                format!("expected positional params, got: {other}"),
            )),
            (ParamsPacking::Named, Some(other)) => Err(Error::new(
                ErrorKind::InvalidParams,
                format!("expected named params, got: {other}"),
            )),
        }
    }

    /// Packs encoded arguments into outgoing `params`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParams` if single packing is given anything other
    /// than exactly one argument, or named packing gets a different number
    /// of arguments than names.
    pub fn pack(self, args: Vec<Value>, names: &[&str]) -> Result<Option<Value>> {
        match self {
            ParamsPacking::Single => {
                let [arg] = <[Value; 1]>::try_from(args).map_err(|args| {
                    Error::new(
                        ErrorKind::InvalidParams,
                        format!("single params expect one argument, got {}", args.len()),
                    )
                })?;
                Ok((!arg.is_null()).then_some(arg))
            }
            ParamsPacking::Positional => Ok(Some(Value::Array(args))),
            ParamsPacking::Named => {
                if args.len() != names.len() {
                    return Err(Error::new(
                        ErrorKind::InvalidParams,
                        format!("expected {} named arguments, got {}", names.len(), args.len()),
                    ));
                }
                if args.is_empty() {
                    return Ok(None);
                }
                let map: Map<String, Value> = names
                    .iter()
                    .map(|name| (*name).to_string())
                    .zip(args)
                    .collect();
                Ok(Some(Value::Object(map)))
            }
        }
    }
}

/// Encodes one outgoing argument.
///
/// # Errors
///
/// Returns `InvalidParams` if the argument cannot be represented as JSON.
pub fn encode<T: Serialize + ?Sized>(arg: &T) -> Result<Value> {
    serde_json::to_value(arg).map_err(|e| Error::new(ErrorKind::InvalidParams, e.to_string()))
}

/// Decodes one incoming argument.
///
/// # Errors
///
/// Returns `InvalidParams` naming the parameter if the value does not fit
/// its declared type.
pub fn decode<T: DeserializeOwned>(value: Value, name: &str) -> Result<T> {
    serde_json::from_value(value).map_err(|e| {
        Error::new(
            ErrorKind::InvalidParams,
            format!("invalid param `{name}`: {e}"),
        )
    })
}

/// Encodes a handler's return value as a response `result`.
pub(crate) fn encode_result<T: Serialize + ?Sized>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| {
        Error::new(
            ErrorKind::InternalError,
            format!("failed to encode result: {e}"),
        )
    })
}

/// Decodes a response `result` into the caller's expected type.
pub(crate) fn decode_result<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| {
        Error::new(
            ErrorKind::InternalError,
            format!("failed to decode result: {e}"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_single() {
        let packing = ParamsPacking::Single;
        assert_eq!(
            packing.unpack(Some(json!({"a": 1})), &["req"]).unwrap(),
            vec![json!({"a": 1})]
        );
        assert_eq!(packing.unpack(None, &["req"]).unwrap(), vec![Value::Null]);

        assert_eq!(
            packing.pack(vec![json!(5)], &["req"]).unwrap(),
            Some(json!(5))
        );
        assert_eq!(packing.pack(vec![Value::Null], &["req"]).unwrap(), None);
        let err = packing.pack(vec![], &[]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidParams);
    }

    #[test]
    fn test_positional() {
        let packing = ParamsPacking::Positional;
        assert_eq!(
            packing.unpack(Some(json!([1, 2, 3])), &["a", "b"]).unwrap(),
            vec![json!(1), json!(2)]
        );
        assert_eq!(
            packing.unpack(Some(json!([1])), &["a", "b"]).unwrap(),
            vec![json!(1), Value::Null]
        );
        assert_eq!(
            packing.unpack(None, &["a"]).unwrap(),
            vec![Value::Null]
        );
        let err = packing.unpack(Some(json!({"a": 1})), &["a"]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidParams);
        let err = packing.unpack(Some(Value::Null), &["a"]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidParams);

        assert_eq!(
            packing.pack(vec![json!(2), json!(3)], &["a", "b"]).unwrap(),
            Some(json!([2, 3]))
        );
        assert_eq!(packing.pack(vec![], &[]).unwrap(), Some(json!([])));
    }

    #[test]
    fn test_named() {
        let packing = ParamsPacking::Named;
        assert_eq!(
            packing
                .unpack(Some(json!({"b": 2, "a": 1, "c": 3})), &["a", "b"])
                .unwrap(),
            vec![json!(1), json!(2)]
        );
        assert_eq!(
            packing.unpack(Some(json!({"a": 1})), &["a", "b"]).unwrap(),
            vec![json!(1), Value::Null]
        );
        let err = packing.unpack(Some(json!([1])), &["a"]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidParams);
        let err = packing.unpack(Some(Value::Null), &[]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidParams);
        assert_eq!(packing.unpack(None, &["a"]).unwrap(), vec![Value::Null]);

        assert_eq!(
            packing.pack(vec![json!(1), json!(2)], &["a", "b"]).unwrap(),
            Some(json!({"a": 1, "b": 2}))
        );
        assert_eq!(packing.pack(vec![], &[]).unwrap(), None);
    }

    #[test]
    fn test_decode() {
        assert_eq!(decode::<i64>(json!(3), "a").unwrap(), 3);
        assert_eq!(decode::<Option<i64>>(Value::Null, "a").unwrap(), None);
        let err = decode::<i64>(json!("three"), "a").unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidParams);
        assert!(err.msg.contains("`a`"));
    }
}
