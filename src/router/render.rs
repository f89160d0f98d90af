//! Router source rendering.

use std::collections::HashMap;

use alloy::primitives::hex;

use super::{DispatchTree, RouterTemplate};
use crate::{
    error::{Error, Result},
    types::ContractData,
};

const INDENT: &str = "    ";

/// Identifier of the constant holding the module address.
///
/// An underscore is inserted before every uppercase letter not preceded by
/// another uppercase letter, then the name is uppercased:
/// `ERC20Token` becomes `_ERC20_TOKEN`. Module names start with a capital, so
/// generated constants never clash with dispatch identifiers.
pub fn constant_name(contract_name: &str) -> String {
    let mut name = String::with_capacity(contract_name.len() + 4);
    let mut prev_upper = false;
    for c in contract_name.chars() {
        let upper = c.is_ascii_uppercase();
        if upper && !prev_upper {
            name.push('_');
        }
        name.push(c.to_ascii_uppercase());
        prev_upper = upper;
    }
    name
}

/// Renders the router source.
///
/// Output is a pure function of the arguments: equal inputs always render
/// byte-identical sources.
///
/// # Errors
///
/// * [`Error::NoContracts`] if `contracts` is empty.
/// * [`Error::DuplicateModule`] if two modules map to the same constant.
/// * [`Error::UnknownModule`] if the tree dispatches to a contract which is
///   not in `contracts`.
pub fn render_router(
    router_name: &str,
    tree: &DispatchTree,
    contracts: &[ContractData],
    template: &RouterTemplate,
) -> Result<String> {
    if contracts.is_empty() {
        return Err(Error::NoContracts);
    }

    let mut constants = HashMap::with_capacity(contracts.len());
    let mut declared = HashMap::with_capacity(contracts.len());
    for contract in contracts {
        let constant = constant_name(contract.contract_name());
        if declared.insert(constant.clone(), contract.contract_name()).is_some() {
            return Err(Error::DuplicateModule {
                contract: contract.contract_name().to_string(),
                constant,
            });
        }
        constants.insert(contract.contract_name(), constant);
    }
    if let Some(orphan) = tree
        .selectors()
        .find(|s| !constants.contains_key(s.contract_name()))
    {
        return Err(Error::UnknownModule {
            contract: orphan.contract_name().to_string(),
            selector: orphan.selector(),
        });
    }

    let constants_block = render_constants(contracts, template.constants_indent());
    let mut dispatch = Vec::new();
    render_node(tree, &constants, template.dispatch_indent(), &mut dispatch);

    Ok(template.fill(router_name, &constants_block, &dispatch.join("\n")))
}

fn render_constants(contracts: &[ContractData], indent: usize) -> String {
    let pad = INDENT.repeat(indent);
    contracts
        .iter()
        .map(|contract| {
            format!(
                "{pad}address constant {} = {};",
                constant_name(contract.contract_name()),
                contract.deployed_address().to_checksum(None)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_node(
    node: &DispatchTree,
    constants: &HashMap<&str, String>,
    indent: usize,
    lines: &mut Vec<String>,
) {
    let pad = INDENT.repeat(indent);
    match node {
        DispatchTree::Branch { left, right } => {
            // Non-empty by construction, see `DispatchTree::build`.
            let mid = right.min_selector().unwrap_or_default();
            lines.push(format!("{pad}if lt(sig, {}) {{", hex::encode_prefixed(mid)));
            render_node(left, constants, indent + 1, lines);
            lines.push(format!("{pad}}}"));
            render_node(right, constants, indent, lines);
        }
        DispatchTree::Leaf(selectors) => {
            lines.push(format!("{pad}switch sig"));
            for s in selectors {
                lines.push(format!(
                    "{pad}case {} {{ result := {} }} // {}.{}()",
                    s.selector_hex(),
                    constants[s.contract_name()],
                    s.contract_name(),
                    s.name()
                ));
            }
            lines.push(format!("{pad}leave"));
        }
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::{Address, address, fixed_bytes};

    use super::*;
    use crate::types::FunctionSelector;

    #[test]
    fn test_constant_name() {
        assert_eq!(constant_name("ERC20Token"), "_ERC20_TOKEN");
        assert_eq!(constant_name("CoreModule"), "_CORE_MODULE");
        assert_eq!(constant_name("AccountRBACModule"), "_ACCOUNT_RBACMODULE");
        assert_eq!(constant_name("Module2"), "_MODULE2");
        assert_eq!(constant_name("ABC"), "_ABC");
    }

    fn contract(name: &str, address: Address) -> ContractData {
        ContractData::new(name, address, vec![])
    }

    #[test]
    fn test_renders_nested_dispatch() {
        let selectors = (1u32..=3)
            .map(|i| {
                FunctionSelector::new(
                    if i == 2 { "ModuleB" } else { "ModuleA" },
                    format!("f{i}"),
                    format!("f{i}()"),
                    (i * 0x1000_0000).to_be_bytes().into(),
                )
            })
            .collect();
        let tree = DispatchTree::build(selectors, 2).unwrap();
        let template = RouterTemplate::new(
            "{{router_name}}\n{{module_constants}}\n{{dispatch}}",
            0,
            0,
        )
        .unwrap();
        let contracts = vec![
            contract("ModuleA", address!("0x0000000000000000000000000000000000000011")),
            contract("ModuleB", address!("0x0000000000000000000000000000000000000022")),
        ];

        let source = render_router("Router", &tree, &contracts, &template).unwrap();

        let expected = "Router
address constant _MODULE_A = 0x0000000000000000000000000000000000000011;
address constant _MODULE_B = 0x0000000000000000000000000000000000000022;
if lt(sig, 0x30000000) {
    switch sig
    case 0x10000000 { result := _MODULE_A } // ModuleA.f1()
    case 0x20000000 { result := _MODULE_B } // ModuleB.f2()
    leave
}
switch sig
case 0x30000000 { result := _MODULE_A } // ModuleA.f3()
leave";
        assert_eq!(source, expected);
    }

    #[test]
    fn test_rejects_empty_contracts() {
        let tree = DispatchTree::Leaf(vec![]);

        assert!(matches!(
            render_router("Router", &tree, &[], &RouterTemplate::default()),
            Err(Error::NoContracts)
        ));
    }

    #[test]
    fn test_rejects_unknown_module() {
        let tree = DispatchTree::Leaf(vec![FunctionSelector::new(
            "Missing",
            "foo",
            "foo()",
            fixed_bytes!("0xc2985578"),
        )]);
        let contracts = vec![contract("Present", Address::ZERO)];

        assert!(matches!(
            render_router("Router", &tree, &contracts, &RouterTemplate::default()),
            Err(Error::UnknownModule { ref contract, .. }) if contract == "Missing"
        ));
    }

    #[test]
    fn test_rejects_clashing_constants() {
        let tree = DispatchTree::Leaf(vec![]);
        let contracts = vec![
            contract("Erc20Token", Address::ZERO),
            contract("ERC20Token", Address::ZERO),
        ];

        assert!(matches!(
            render_router("Router", &tree, &contracts, &RouterTemplate::default()),
            Err(Error::DuplicateModule { ref constant, .. }) if constant == "_ERC20_TOKEN"
        ));
    }
}
