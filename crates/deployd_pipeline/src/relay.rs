//! The auxiliary (relay) deployable.
//!
//! A relay job has no external artifact: its source is this fixed template,
//! parameterized only through its single constructor argument - the address
//! of an already-deployed contract it binds to.

use alloy_primitives::Address;
use deployd_protocol::defaults::RELAY_ARTIFACT_PREFIX;
use uuid::Uuid;

pub const RELAY_SOURCE: &str = r#"// SPDX-License-Identifier: MIT
pragma solidity ^0.8.19;

contract VerificationRelay {
    address public immutable target;

    event Verified(address indexed target, address indexed by);

    constructor(address target_) {
        require(target_ != address(0), "relay: zero target");
        target = target_;
    }

    function verify() external {
        emit Verified(target, msg.sender);
    }
}
"#;

/// Fresh unique artifact id for a relay deployment.
pub fn synthesize_relay_id() -> String {
    format!("{}{}", RELAY_ARTIFACT_PREFIX, Uuid::new_v4())
}

/// The sole constructor argument: the bound address.
pub fn relay_constructor_args(target: Address) -> Vec<serde_json::Value> {
    vec![serde_json::Value::String(target.to_string())]
}

#[cfg(test)]
mod tests {
    use super::*;
    use deployd_protocol::defaults::RELAY_CONTRACT_NAME;

    #[test]
    fn relay_ids_are_unique_and_prefixed() {
        let a = synthesize_relay_id();
        let b = synthesize_relay_id();
        assert!(a.starts_with(RELAY_ARTIFACT_PREFIX));
        assert!(b.starts_with(RELAY_ARTIFACT_PREFIX));
        assert_ne!(a, b);
    }

    #[test]
    fn template_defines_the_relay_contract() {
        assert!(RELAY_SOURCE.contains(&format!("contract {RELAY_CONTRACT_NAME}")));
        assert!(RELAY_SOURCE.contains("constructor(address"));
    }

    #[test]
    fn constructor_args_carry_exactly_the_bound_address() {
        let target = Address::with_last_byte(0xcd);
        let args = relay_constructor_args(target);
        assert_eq!(args.len(), 1);
        assert_eq!(
            args[0].as_str().unwrap().to_lowercase(),
            format!("{target:?}")
        );
    }
}
