use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a purchasable variant (SKU), owned by the catalog.
///
/// Variant ids are totally ordered; multi-variant operations acquire their
/// per-variant locks in ascending id order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct VariantId(u64);

impl VariantId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for VariantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for VariantId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Identifier of a coupon.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct CouponId(u64);

impl CouponId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for CouponId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for CouponId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random id.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier of an order.
    OrderId
);

uuid_id!(
    /// Unique identifier of a return request.
    ReturnId
);

uuid_id!(
    /// Unique identifier of an authenticated user.
    UserId
);

/// Identifies who is buying: an authenticated user or a guest.
///
/// Guests are keyed by their session key at the cart level and by the
/// email/phone they check out with at the coupon level.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum CustomerKey {
    User(UserId),
    Guest(String),
}

impl CustomerKey {
    pub fn guest(key: impl Into<String>) -> Self {
        CustomerKey::Guest(key.into())
    }

    pub fn is_guest(&self) -> bool {
        matches!(self, CustomerKey::Guest(_))
    }
}

impl std::fmt::Display for CustomerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CustomerKey::User(id) => write!(f, "user:{id}"),
            CustomerKey::Guest(key) => write!(f, "guest:{key}"),
        }
    }
}

impl From<UserId> for CustomerKey {
    fn from(id: UserId) -> Self {
        CustomerKey::User(id)
    }
}

/// Who performed a state change. Recorded on every ledger and status log entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Actor(String);

impl Actor {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Background jobs, payment callbacks and other non-human callers.
    pub fn system() -> Self {
        Self("system".to_string())
    }

    pub fn staff(name: impl AsRef<str>) -> Self {
        Self(format!("staff:{}", name.as_ref()))
    }

    pub fn customer(key: &CustomerKey) -> Self {
        Self(key.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_ids_order_numerically() {
        let mut ids = vec![VariantId::new(10), VariantId::new(2), VariantId::new(7)];
        ids.sort();
        assert_eq!(ids, vec![VariantId::new(2), VariantId::new(7), VariantId::new(10)]);
    }

    #[test]
    fn order_id_new_creates_unique_ids() {
        assert_ne!(OrderId::new(), OrderId::new());
    }

    #[test]
    fn order_id_from_uuid_preserves_value() {
        let uuid = Uuid::new_v4();
        assert_eq!(OrderId::from_uuid(uuid).as_uuid(), uuid);
    }

    #[test]
    fn customer_key_display() {
        let user = UserId::new();
        assert_eq!(CustomerKey::from(user).to_string(), format!("user:{user}"));
        assert_eq!(CustomerKey::guest("a@b.c").to_string(), "guest:a@b.c");
    }

    #[test]
    fn customer_key_serialization_roundtrip() {
        let key = CustomerKey::guest("01700000001");
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, r#"{"kind":"guest","id":"01700000001"}"#);
        let back: CustomerKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn actor_constructors() {
        assert_eq!(Actor::system().as_str(), "system");
        assert_eq!(Actor::staff("rahim").as_str(), "staff:rahim");
        assert_eq!(
            Actor::customer(&CustomerKey::guest("s1")).as_str(),
            "guest:s1"
        );
    }
}
