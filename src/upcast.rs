// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Upcast Hook
//!
//! Schema evolution is left to the serialization side. The only thing this
//! crate owns is the hook: an upcaster rewrites an old `(name, payload)` pair
//! into its current shape before anything decodes it.

use bytes::Bytes;

use crate::error::Result;

pub trait Upcaster: Send + Sync {
    /// Whether this upcaster handles events called `name`.
    fn can_upcast(&self, name: &str) -> bool;

    /// Rewrite the event. May rename it.
    fn upcast(&self, name: &str, payload: Bytes) -> Result<(String, Bytes)>;
}

/// Upcasters applied in registration order.
///
/// Each one sees the output of the previous one, so `v1 → v2 → v3` chains
/// are registered as two upcasters.
#[derive(Default)]
pub struct UpcasterChain {
    upcasters: Vec<Box<dyn Upcaster>>,
}

impl UpcasterChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, upcaster: impl Upcaster + 'static) {
        self.upcasters.push(Box::new(upcaster));
    }

    pub fn apply(&self, name: &str, payload: Bytes) -> Result<(String, Bytes)> {
        let mut name = name.to_string();
        let mut payload = payload;
        for upcaster in &self.upcasters {
            if upcaster.can_upcast(&name) {
                let (n, p) = upcaster.upcast(&name, payload)?;
                name = n;
                payload = p;
            }
        }
        Ok((name, payload))
    }
}

impl core::fmt::Debug for UpcasterChain {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("UpcasterChain")
            .field("len", &self.upcasters.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;

    struct Rename(&'static str, &'static str);

    impl Upcaster for Rename {
        fn can_upcast(&self, name: &str) -> bool {
            name == self.0
        }

        fn upcast(&self, _name: &str, payload: Bytes) -> Result<(String, Bytes)> {
            Ok((self.1.to_string(), payload))
        }
    }

    struct Reject;

    impl Upcaster for Reject {
        fn can_upcast(&self, name: &str) -> bool {
            name == "Broken"
        }

        fn upcast(&self, name: &str, _payload: Bytes) -> Result<(String, Bytes)> {
            Err(CoreError::Upcast { name: name.to_string(), reason: "unsupported".into() })
        }
    }

    #[test]
    fn test_chain_applies_in_order() {
        let mut chain = UpcasterChain::new();
        chain.push(Rename("DepositedV1", "DepositedV2"));
        chain.push(Rename("DepositedV2", "Deposited"));

        let (name, payload) = chain.apply("DepositedV1", Bytes::from_static(b"1")).unwrap();
        assert_eq!(name, "Deposited");
        assert_eq!(&payload[..], b"1");

        let (untouched, _) = chain.apply("Withdrawn", Bytes::new()).unwrap();
        assert_eq!(untouched, "Withdrawn");
    }

    #[test]
    fn test_chain_surfaces_rejection() {
        let mut chain = UpcasterChain::new();
        chain.push(Reject);
        assert!(chain.apply("Broken", Bytes::new()).is_err());
    }
}
