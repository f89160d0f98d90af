//! Selector extraction from module ABIs.

use std::{fmt, sync::Arc};

use alloy::json_abi::{Function, Param, StateMutability};
use serde::Deserialize;
use serde_json::Value;
use tracing::trace;

use crate::{
    error::{Error, Result},
    types::{ContractData, FunctionSelector},
};

/// Name prefix of the functions injected by solidity-coverage instrumentation.
pub const COVERAGE_PREFIX: &str = "c_0x";

/// Predicate over function names deciding which functions get dispatched.
#[derive(Clone)]
pub struct SelectorFilter(Arc<dyn Fn(&str) -> bool + Send + Sync>);

impl SelectorFilter {
    pub fn new(predicate: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(predicate))
    }

    /// Accepts every function.
    pub fn all() -> Self {
        Self::new(|_| true)
    }

    /// Rejects every function whose name starts with `prefix`.
    pub fn skip_prefix(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self::new(move |name| !name.starts_with(&prefix))
    }

    pub fn accepts(&self, name: &str) -> bool {
        (self.0)(name)
    }
}

impl Default for SelectorFilter {
    /// Skips coverage instrumentation functions, so coverage builds
    /// produce the same dispatch table as regular ones.
    fn default() -> Self {
        Self::skip_prefix(COVERAGE_PREFIX)
    }
}

impl fmt::Debug for SelectorFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SelectorFilter(..)")
    }
}

/// Returns selectors of all functions of the ABI accepted by the filter,
/// in ABI order.
///
/// # Errors
///
/// [`Error::InvalidAbiFragment`] if a fragment is not an object, or a function
/// fragment misses its name or inputs, or has undecodable parameters.
pub fn extract_selectors(
    contract_name: &str,
    abi: &[Value],
    filter: &SelectorFilter,
) -> Result<Vec<FunctionSelector>> {
    let invalid = |index: usize, reason: String| Error::InvalidAbiFragment {
        contract: contract_name.to_string(),
        index,
        reason,
    };

    let mut selectors = Vec::new();
    for (index, fragment) in abi.iter().enumerate() {
        let Some(object) = fragment.as_object() else {
            return Err(invalid(index, "fragment is not an object".to_string()));
        };
        // Fragment type defaults to function when omitted.
        match object.get("type").map(Value::as_str) {
            None | Some(Some("function")) => {}
            Some(Some(_)) => continue,
            Some(None) => return Err(invalid(index, "fragment type is not a string".to_string())),
        }
        let name = object
            .get("name")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| invalid(index, "function has no name".to_string()))?;
        let inputs = object
            .get("inputs")
            .ok_or_else(|| invalid(index, format!("function {name} has no inputs")))?;

        if !filter.accepts(name) {
            trace!(contract_name, name, "function filtered out");
            continue;
        }

        let inputs = Vec::<Param>::deserialize(inputs)
            .map_err(|err| invalid(index, format!("function {name} has invalid inputs: {err}")))?;
        let function = Function {
            name: name.to_string(),
            inputs,
            outputs: vec![],
            state_mutability: StateMutability::NonPayable,
        };
        selectors.push(FunctionSelector::new(
            contract_name,
            name,
            function.signature(),
            function.selector(),
        ));
    }
    Ok(selectors)
}

/// Selectors of all the modules, in module order.
pub fn collect_selectors(
    contracts: &[ContractData],
    filter: &SelectorFilter,
) -> Result<Vec<FunctionSelector>> {
    let mut selectors = Vec::new();
    for contract in contracts {
        selectors.extend(extract_selectors(
            contract.contract_name(),
            contract.abi(),
            filter,
        )?);
    }
    Ok(selectors)
}

#[cfg(test)]
mod tests {
    use alloy::primitives::fixed_bytes;
    use serde_json::json;

    use super::*;
    use crate::testing;

    #[test]
    fn test_extracts_known_selectors() {
        let abi = vec![
            testing::function_fragment("transfer", &["address", "uint256"]),
            testing::function_fragment("balanceOf", &["address"]),
        ];
        let selectors = extract_selectors("Token", &abi, &SelectorFilter::all()).unwrap();

        assert_eq!(selectors.len(), 2);
        assert_eq!(selectors[0].selector(), fixed_bytes!("0xa9059cbb"));
        assert_eq!(selectors[0].signature(), "transfer(address,uint256)");
        assert_eq!(selectors[0].contract_name(), "Token");
        assert_eq!(selectors[1].selector(), fixed_bytes!("0x70a08231"));
        assert_eq!(selectors[1].selector_hex(), "0x70a08231");
    }

    #[test]
    fn test_skips_non_function_fragments() {
        let abi = vec![
            json!({ "type": "event", "name": "Transfer", "inputs": [], "anonymous": false }),
            json!({ "type": "error", "name": "Unauthorized", "inputs": [] }),
            json!({ "type": "constructor", "inputs": [] }),
            json!({ "type": "receive", "stateMutability": "payable" }),
            testing::function_fragment("owner", &[]),
        ];
        let selectors = extract_selectors("Ownable", &abi, &SelectorFilter::all()).unwrap();

        assert_eq!(selectors.len(), 1);
        assert_eq!(selectors[0].name(), "owner");
        assert_eq!(selectors[0].selector(), fixed_bytes!("0x8da5cb5b"));
    }

    #[test]
    fn test_tuple_parameters_are_canonicalized() {
        let abi = vec![json!({
            "type": "function",
            "name": "submit",
            "inputs": [{
                "name": "order",
                "type": "tuple",
                "components": [
                    { "name": "id", "type": "uint256" },
                    { "name": "owner", "type": "address" }
                ]
            }],
            "outputs": [],
            "stateMutability": "nonpayable"
        })];
        let selectors = extract_selectors("Orders", &abi, &SelectorFilter::all()).unwrap();

        assert_eq!(selectors[0].signature(), "submit((uint256,address))");
    }

    #[test]
    fn test_default_filter_skips_coverage_functions() {
        let abi = vec![
            testing::function_fragment("c_0x1f2e3d4c", &["bytes32"]),
            testing::function_fragment("getValue", &[]),
        ];
        let selectors = extract_selectors("Module", &abi, &SelectorFilter::default()).unwrap();

        assert_eq!(selectors.len(), 1);
        assert_eq!(selectors[0].name(), "getValue");
    }

    #[test]
    fn test_function_without_name_is_rejected() {
        let abi = vec![
            testing::function_fragment("ok", &[]),
            json!({ "type": "function", "inputs": [] }),
        ];
        let err = extract_selectors("Broken", &abi, &SelectorFilter::all()).unwrap_err();

        assert!(matches!(
            err,
            Error::InvalidAbiFragment { ref contract, index: 1, .. } if contract == "Broken"
        ));
    }

    #[test]
    fn test_function_without_inputs_is_rejected() {
        let abi = vec![json!({ "type": "function", "name": "noInputs" })];
        let err = extract_selectors("Broken", &abi, &SelectorFilter::all()).unwrap_err();

        assert!(matches!(err, Error::InvalidAbiFragment { index: 0, .. }));
    }

    #[test]
    fn test_non_object_fragment_is_rejected() {
        let abi = vec![json!("function foo()")];
        let err = extract_selectors("Broken", &abi, &SelectorFilter::all()).unwrap_err();

        assert!(matches!(err, Error::InvalidAbiFragment { index: 0, .. }));
    }
}
