use std::fmt;

use alloy::primitives::{Address, Selector, hex};

/// ABI as emitted by the compiler, one JSON object per fragment.
///
/// Kept untyped until selector extraction so that a malformed fragment can be
/// reported with its position instead of failing the whole artifact.
pub type RawAbi = Vec<serde_json::Value>;

/// Function exposed by a router module.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FunctionSelector {
    contract_name: String,
    name: String,
    signature: String,
    selector: Selector,
}

impl FunctionSelector {
    pub fn new(
        contract_name: impl Into<String>,
        name: impl Into<String>,
        signature: impl Into<String>,
        selector: Selector,
    ) -> Self {
        Self {
            contract_name: contract_name.into(),
            name: name.into(),
            signature: signature.into(),
            selector,
        }
    }

    /// Name of the module contract declaring the function.
    pub fn contract_name(&self) -> &str {
        &self.contract_name
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Canonical signature the selector is derived from, e.g. `foo(uint256)`.
    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn selector(&self) -> Selector {
        self.selector
    }

    /// `0x`-prefixed lowercase hex of the selector.
    pub fn selector_hex(&self) -> String {
        hex::encode_prefixed(self.selector)
    }
}

impl fmt::Display for FunctionSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.contract_name, self.signature)
    }
}

/// Module contract to be placed behind the router.
#[derive(Clone, Debug)]
pub struct ContractData {
    contract_name: String,
    deployed_address: Address,
    abi: RawAbi,
}

impl ContractData {
    pub fn new(contract_name: impl Into<String>, deployed_address: Address, abi: RawAbi) -> Self {
        Self {
            contract_name: contract_name.into(),
            deployed_address,
            abi,
        }
    }

    pub fn contract_name(&self) -> &str {
        &self.contract_name
    }

    pub fn deployed_address(&self) -> Address {
        self.deployed_address
    }

    pub fn abi(&self) -> &RawAbi {
        &self.abi
    }
}
