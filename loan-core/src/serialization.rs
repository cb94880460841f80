//! Module containing `serde` serialization helpers.

use ethcontract::U256;
use serde::{
    de::{Deserialize, Deserializer, Error, Unexpected},
    ser::{Serialize, Serializer},
};
use std::marker::PhantomData;
use typenum::Unsigned;

/// Layout tag of a store snapshot. Only a snapshot tagged with `T` can be
/// read back.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Version<T>(PhantomData<T>);

impl<T: Unsigned> Serialize for Version<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(T::U32)
    }
}

impl<'de, T: Unsigned> Deserialize<'de> for Version<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match u32::deserialize(deserializer)? {
            version if version == T::U32 => Ok(Version(PhantomData)),
            version => Err(D::Error::invalid_value(
                Unexpected::Unsigned(version.into()),
                &format!("snapshot version {}", T::U32).as_str(),
            )),
        }
    }
}

/// (De)serializes a `U256` as a decimal string. The default `U256` encoding is
/// hex which is not what the indexed entities expose.
pub mod u256_decimal {
    use super::*;

    pub fn serialize<S>(value: &U256, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<U256, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        U256::from_dec_str(&s)
            .map_err(|err| D::Error::custom(format!("{:?}: {}", err, s)))
    }
}
