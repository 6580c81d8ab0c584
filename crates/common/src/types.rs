use serde::{Deserialize, Serialize};

/// Declares a database-assigned integer identifier.
///
/// Each identifier wraps an `i64` to keep order, user, product and payment
/// ids from being mixed up at call sites, while serializing as a bare number
/// on the wire.
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Creates an identifier from its raw value.
            pub const fn new(value: i64) -> Self {
                Self(value)
            }

            /// Returns the raw value.
            pub const fn as_i64(&self) -> i64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id!(
    /// Identifier of an order row.
    OrderId
);

define_id!(
    /// Identifier of the user who placed an order.
    UserId
);

define_id!(
    /// Identifier of a catalog product.
    ProductId
);

define_id!(
    /// Identifier of a payment row.
    PaymentId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_preserves_raw_value() {
        let id = OrderId::new(42);
        assert_eq!(id.as_i64(), 42);
        assert_eq!(i64::from(id), 42);
        assert_eq!(OrderId::from(42), id);
    }

    #[test]
    fn id_serializes_as_bare_number() {
        let json = serde_json::to_string(&PaymentId::new(7)).unwrap();
        assert_eq!(json, "7");

        let deserialized: PaymentId = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, PaymentId::new(7));
    }

    #[test]
    fn id_display() {
        assert_eq!(UserId::new(3).to_string(), "3");
        assert_eq!(ProductId::new(10).to_string(), "10");
    }
}
