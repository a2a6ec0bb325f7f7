use num::{BigInt, ToPrimitive};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

pub const PRODUCT_POLICY_TYPE: &str = "product";

#[derive(Debug, Error, PartialEq)]
pub enum PolicyError {
    #[error("unknown token policy type {0:?}")]
    UnknownPolicyType(String),
    #[error("malformed token policy config: {0}")]
    MalformedConfig(String),
    #[error("malformed quota claim argument: {0}")]
    MalformedArgument(String),
    #[error("dimension {0:?} is not positive")]
    NonPositiveDimension(String),
    #[error("total quantity exceeds the signed 64 bit range")]
    Overflow,
}

/// Pluggable cost function mapping a service specific claim argument to a non
/// negative quantity of quota units. The set of policies is closed; loading a
/// persisted service with an unknown policy type fails.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TokenPolicy {
    Product(ProductPolicy),
}

/// Charges `unit_price` per unit of the product of all claim dimensions.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ProductPolicy {
    pub unit_price: i64,
}

impl TokenPolicy {
    pub fn product(unit_price: i64) -> Self {
        Self::Product(ProductPolicy { unit_price })
    }

    pub fn policy_type(&self) -> &'static str {
        match self {
            Self::Product(_) => PRODUCT_POLICY_TYPE,
        }
    }

    /// Serializes the policy configuration for persistence. The policy type is
    /// stored in a separate column.
    pub fn marshal_config(&self) -> String {
        match self {
            // A struct of primitives cannot fail to serialize.
            Self::Product(policy) => serde_json::to_string(policy).unwrap(),
        }
    }

    /// Reconstructs a policy from its persisted `(type, config)` pair.
    pub fn unmarshal_config(policy_type: &str, config: &str) -> Result<Self, PolicyError> {
        match policy_type {
            PRODUCT_POLICY_TYPE => serde_json::from_str::<ProductPolicy>(config)
                .map(Self::Product)
                .map_err(|err| PolicyError::MalformedConfig(err.to_string())),
            other => Err(PolicyError::UnknownPolicyType(other.to_string())),
        }
    }

    /// Computes the quota quantity a claim argument is worth and returns the
    /// parsed dimensions so they can be echoed into the minted token. The
    /// product is taken in arbitrary precision; anything that does not fit a
    /// signed 64 bit integer is rejected rather than wrapped.
    pub fn parse_and_verify_quantity(
        &self,
        arg_json: &str,
    ) -> Result<(i64, BTreeMap<String, i64>), PolicyError> {
        match self {
            Self::Product(policy) => {
                let dimensions: BTreeMap<String, i64> = serde_json::from_str(arg_json)
                    .map_err(|err| PolicyError::MalformedArgument(err.to_string()))?;
                let mut total = BigInt::from(policy.unit_price);
                for (name, dimension) in &dimensions {
                    if *dimension <= 0 {
                        return Err(PolicyError::NonPositiveDimension(name.clone()));
                    }
                    total *= BigInt::from(*dimension);
                }
                let quantity = total.to_i64().ok_or(PolicyError::Overflow)?;
                Ok((quantity, dimensions))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;

    #[test]
    fn config_roundtrip() {
        let policy = TokenPolicy::product(42);
        let config = policy.marshal_config();
        assert_eq!(
            TokenPolicy::unmarshal_config(PRODUCT_POLICY_TYPE, &config).unwrap(),
            policy
        );
    }

    #[test]
    fn unknown_policy_type_fails() {
        assert_eq!(
            TokenPolicy::unmarshal_config("flat-rate", "{}"),
            Err(PolicyError::UnknownPolicyType("flat-rate".to_string()))
        );
    }

    #[test]
    fn quantity_is_the_product_of_dimensions() {
        let policy = TokenPolicy::product(3);
        let (quantity, claims) = policy
            .parse_and_verify_quantity(r#"{"bytes": 5, "requests": 7}"#)
            .unwrap();
        assert_eq!(quantity, 105);
        assert_eq!(claims, btreemap! {"bytes".to_string() => 5, "requests".to_string() => 7});
    }

    #[test]
    fn empty_argument_charges_the_unit_price() {
        let policy = TokenPolicy::product(9);
        let (quantity, claims) = policy.parse_and_verify_quantity("{}").unwrap();
        assert_eq!(quantity, 9);
        assert!(claims.is_empty());
    }

    #[test]
    fn non_positive_dimension_is_rejected() {
        let policy = TokenPolicy::product(1);
        assert_eq!(
            policy.parse_and_verify_quantity(r#"{"bytes": 0}"#),
            Err(PolicyError::NonPositiveDimension("bytes".to_string()))
        );
        assert_eq!(
            policy.parse_and_verify_quantity(r#"{"bytes": -3}"#),
            Err(PolicyError::NonPositiveDimension("bytes".to_string()))
        );
    }

    #[test]
    fn overflowing_product_is_rejected() {
        let policy = TokenPolicy::product(i64::MAX);
        assert_eq!(
            policy.parse_and_verify_quantity(r#"{"bytes": 2}"#),
            Err(PolicyError::Overflow)
        );
        // The intermediate product overflows even though more dimensions follow.
        assert_eq!(
            policy.parse_and_verify_quantity(r#"{"a": 2, "b": 3}"#),
            Err(PolicyError::Overflow)
        );
    }

    #[test]
    fn malformed_argument_is_rejected() {
        let policy = TokenPolicy::product(1);
        assert!(matches!(
            policy.parse_and_verify_quantity(r#"{"bytes": "many"}"#),
            Err(PolicyError::MalformedArgument(_))
        ));
    }
}
