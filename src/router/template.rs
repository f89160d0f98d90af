//! Router source templates.

use thiserror::Error;

pub const ROUTER_NAME_PLACEHOLDER: &str = "{{router_name}}";
pub const MODULE_CONSTANTS_PLACEHOLDER: &str = "{{module_constants}}";
pub const DISPATCH_PLACEHOLDER: &str = "{{dispatch}}";

/// Indentation of the module constants block in [`DEFAULT_TEMPLATE`].
pub const DEFAULT_CONSTANTS_INDENT: usize = 1;

/// Indentation of the dispatch block in [`DEFAULT_TEMPLATE`].
pub const DEFAULT_DISPATCH_INDENT: usize = 4;

/// Router that delegates every call to the module resolved by the selector
/// lookup, reverting with `UnknownSelector` when none matches.
pub const DEFAULT_TEMPLATE: &str = r#"// SPDX-License-Identifier: MIT
pragma solidity ^0.8.0;

// --------------------------------------------------------------------------------
// GENERATED CODE - do not edit manually!!
// --------------------------------------------------------------------------------

contract {{router_name}} {
    error UnknownSelector(bytes4 sel);

{{module_constants}}

    fallback() external payable {
        _forward();
    }

    receive() external payable {
        _forward();
    }

    function _forward() internal {
        // Lookup table: Function selector => implementation contract
        bytes4 sig4 = msg.sig;
        address implementation;

        assembly {
            let sig32 := shr(224, sig4)

            function findImplementation(sig) -> result {
{{dispatch}}
            }

            implementation := findImplementation(sig32)
        }

        if (implementation == address(0)) {
            revert UnknownSelector(sig4);
        }

        // Delegatecall to the implementation contract
        assembly {
            calldatacopy(0, 0, calldatasize())

            let result := delegatecall(gas(), implementation, 0, calldatasize(), 0, 0)
            returndatacopy(0, 0, returndatasize())

            switch result
            case 0 {
                revert(0, returndatasize())
            }
            default {
                return(0, returndatasize())
            }
        }
    }
}
"#;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("template has no {0} placeholder")]
    MissingPlaceholder(&'static str),
}

/// Router source template with the constants and dispatch placeholders.
///
/// Generated blocks are inserted verbatim, each line prefixed with the
/// configured indentation (4 spaces per level).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouterTemplate {
    source: String,
    constants_indent: usize,
    dispatch_indent: usize,
}

impl RouterTemplate {
    /// Creates a template, checking that all the placeholders are present.
    pub fn new(
        source: impl Into<String>,
        constants_indent: usize,
        dispatch_indent: usize,
    ) -> Result<Self, TemplateError> {
        let source = source.into();
        for placeholder in [
            ROUTER_NAME_PLACEHOLDER,
            MODULE_CONSTANTS_PLACEHOLDER,
            DISPATCH_PLACEHOLDER,
        ] {
            if !source.contains(placeholder) {
                return Err(TemplateError::MissingPlaceholder(placeholder));
            }
        }
        Ok(Self {
            source,
            constants_indent,
            dispatch_indent,
        })
    }

    pub fn constants_indent(&self) -> usize {
        self.constants_indent
    }

    pub fn dispatch_indent(&self) -> usize {
        self.dispatch_indent
    }

    /// Substitutes the placeholders with already indented blocks.
    pub(crate) fn fill(&self, router_name: &str, constants: &str, dispatch: &str) -> String {
        self.source
            .replace(ROUTER_NAME_PLACEHOLDER, router_name)
            .replace(MODULE_CONSTANTS_PLACEHOLDER, constants)
            .replace(DISPATCH_PLACEHOLDER, dispatch)
    }
}

impl Default for RouterTemplate {
    fn default() -> Self {
        Self {
            source: DEFAULT_TEMPLATE.to_string(),
            constants_indent: DEFAULT_CONSTANTS_INDENT,
            dispatch_indent: DEFAULT_DISPATCH_INDENT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_template_is_valid() {
        let template = RouterTemplate::new(
            DEFAULT_TEMPLATE,
            DEFAULT_CONSTANTS_INDENT,
            DEFAULT_DISPATCH_INDENT,
        )
        .unwrap();

        assert_eq!(template, RouterTemplate::default());
    }

    #[test]
    fn test_missing_placeholder() {
        let err = RouterTemplate::new("contract {{router_name}} {}\n{{dispatch}}", 0, 0).unwrap_err();

        assert_eq!(
            err,
            TemplateError::MissingPlaceholder(MODULE_CONSTANTS_PLACEHOLDER)
        );
    }

    #[test]
    fn test_fill() {
        let template = RouterTemplate::new(
            "{{router_name}}|{{module_constants}}|{{dispatch}}",
            0,
            0,
        )
        .unwrap();

        assert_eq!(template.fill("Router", "a", "b"), "Router|a|b");
    }
}
