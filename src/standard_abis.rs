//! Standard ABI Library
//!
//! Ordered table of well-known contract interfaces used when a contract has no
//! user-configured ABI. Searched front to back; the first interface with a
//! matching selector wins, so ERC-20 shadows ERC-721 for the shared
//! `transferFrom`/`approve` selectors.

use alloy::json_abi::{Function, JsonAbi};
use std::sync::LazyLock;

/// A named standard interface
#[derive(Debug, Clone)]
pub struct StandardAbi {
    pub name: &'static str,
    pub abi: JsonAbi,
}

const ERC20: &[&str] = &[
    "function name() view returns (string)",
    "function symbol() view returns (string)",
    "function decimals() view returns (uint8)",
    "function totalSupply() view returns (uint256)",
    "function balanceOf(address account) view returns (uint256)",
    "function transfer(address to, uint256 value) returns (bool)",
    "function allowance(address owner, address spender) view returns (uint256)",
    "function approve(address spender, uint256 value) returns (bool)",
    "function transferFrom(address from, address to, uint256 value) returns (bool)",
];

const ERC721: &[&str] = &[
    "function balanceOf(address owner) view returns (uint256)",
    "function ownerOf(uint256 tokenId) view returns (address)",
    "function safeTransferFrom(address from, address to, uint256 tokenId, bytes data)",
    "function safeTransferFrom(address from, address to, uint256 tokenId)",
    "function transferFrom(address from, address to, uint256 tokenId)",
    "function approve(address to, uint256 tokenId)",
    "function setApprovalForAll(address operator, bool approved)",
    "function getApproved(uint256 tokenId) view returns (address)",
    "function isApprovedForAll(address owner, address operator) view returns (bool)",
];

const ERC1155: &[&str] = &[
    "function balanceOf(address account, uint256 id) view returns (uint256)",
    "function balanceOfBatch(address[] accounts, uint256[] ids) view returns (uint256[])",
    "function setApprovalForAll(address operator, bool approved)",
    "function isApprovedForAll(address account, address operator) view returns (bool)",
    "function safeTransferFrom(address from, address to, uint256 id, uint256 value, bytes data)",
    "function safeBatchTransferFrom(address from, address to, uint256[] ids, uint256[] values, bytes data)",
    "function uri(uint256 id) view returns (string)",
];

const ERC4626: &[&str] = &[
    "function asset() view returns (address)",
    "function totalAssets() view returns (uint256)",
    "function convertToShares(uint256 assets) view returns (uint256)",
    "function convertToAssets(uint256 shares) view returns (uint256)",
    "function maxDeposit(address receiver) view returns (uint256)",
    "function previewDeposit(uint256 assets) view returns (uint256)",
    "function deposit(uint256 assets, address receiver) returns (uint256)",
    "function maxMint(address receiver) view returns (uint256)",
    "function previewMint(uint256 shares) view returns (uint256)",
    "function mint(uint256 shares, address receiver) returns (uint256)",
    "function maxWithdraw(address owner) view returns (uint256)",
    "function previewWithdraw(uint256 assets) view returns (uint256)",
    "function withdraw(uint256 assets, address receiver, address owner) returns (uint256)",
    "function maxRedeem(address owner) view returns (uint256)",
    "function previewRedeem(uint256 shares) view returns (uint256)",
    "function redeem(uint256 shares, address receiver, address owner) returns (uint256)",
];

const ERC20_BURNABLE: &[&str] = &[
    "function burn(uint256 value)",
    "function burnFrom(address account, uint256 value)",
];

const OWNABLE: &[&str] = &[
    "function owner() view returns (address)",
    "function renounceOwnership()",
    "function transferOwnership(address newOwner)",
];

const ACCESS_CONTROL: &[&str] = &[
    "function hasRole(bytes32 role, address account) view returns (bool)",
    "function getRoleAdmin(bytes32 role) view returns (bytes32)",
    "function grantRole(bytes32 role, address account)",
    "function revokeRole(bytes32 role, address account)",
    "function renounceRole(bytes32 role, address callerConfirmation)",
];

/// Static lookup order for selector fallback
pub static STANDARD_ABIS: LazyLock<Vec<StandardAbi>> = LazyLock::new(|| {
    [
        ("ERC20", ERC20),
        ("ERC721", ERC721),
        ("ERC1155", ERC1155),
        ("ERC4626", ERC4626),
        ("ERC20Burnable", ERC20_BURNABLE),
        ("Ownable", OWNABLE),
        ("AccessControl", ACCESS_CONTROL),
    ]
    .into_iter()
    .map(|(name, signatures)| StandardAbi {
        name,
        abi: JsonAbi::parse(signatures.iter().copied())
            .expect("standard ABI signatures are valid"),
    })
    .collect()
});

/// Find a function with the given selector inside one ABI
pub fn find_function<'a>(abi: &'a JsonAbi, selector: &[u8; 4]) -> Option<&'a Function> {
    abi.functions()
        .find(|function| function.selector().as_slice() == selector.as_slice())
}

/// Search the standard library for a selector
///
/// # Arguments
/// * `selector` - The first 4 bytes of the calldata
///
/// # Returns
/// The first standard (in lookup order) that defines the selector, with the matching function
pub fn find_standard_function(
    selector: &[u8; 4],
) -> Option<(&'static StandardAbi, &'static Function)> {
    STANDARD_ABIS
        .iter()
        .find_map(|standard| find_function(&standard.abi, selector).map(|f| (standard, f)))
}

/// Names of the standards in lookup order
pub fn standard_names() -> Vec<&'static str> {
    STANDARD_ABIS.iter().map(|standard| standard.name).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== table tests ====================

    #[test]
    fn test_lookup_order() {
        assert_eq!(
            standard_names(),
            vec![
                "ERC20",
                "ERC721",
                "ERC1155",
                "ERC4626",
                "ERC20Burnable",
                "Ownable",
                "AccessControl"
            ]
        );
    }

    #[test]
    fn test_every_standard_has_functions() {
        for standard in STANDARD_ABIS.iter() {
            assert!(
                standard.abi.functions().next().is_some(),
                "{} has no functions",
                standard.name
            );
        }
    }

    // ==================== selector lookup tests ====================

    #[test]
    fn test_erc20_transfer_selector() {
        // 0xa9059cbb - transfer(address,uint256)
        let (standard, function) = find_standard_function(&[0xa9, 0x05, 0x9c, 0xbb]).unwrap();
        assert_eq!(standard.name, "ERC20");
        assert_eq!(function.name, "transfer");
        assert_eq!(function.inputs.len(), 2);
        assert_eq!(function.inputs[0].name, "to");
    }

    #[test]
    fn test_shared_selector_resolves_to_erc20() {
        // 0x23b872dd - transferFrom(address,address,uint256) in both ERC20 and ERC721
        let (standard, _) = find_standard_function(&[0x23, 0xb8, 0x72, 0xdd]).unwrap();
        assert_eq!(standard.name, "ERC20");
    }

    #[test]
    fn test_erc721_only_selector() {
        // 0xa22cb465 - setApprovalForAll(address,bool)
        let (standard, function) = find_standard_function(&[0xa2, 0x2c, 0xb4, 0x65]).unwrap();
        assert_eq!(standard.name, "ERC721");
        assert_eq!(function.name, "setApprovalForAll");
    }

    #[test]
    fn test_ownable_selector() {
        // 0xf2fde38b - transferOwnership(address)
        let (standard, function) = find_standard_function(&[0xf2, 0xfd, 0xe3, 0x8b]).unwrap();
        assert_eq!(standard.name, "Ownable");
        assert_eq!(function.name, "transferOwnership");
    }

    #[test]
    fn test_unknown_selector() {
        assert!(find_standard_function(&[0x12, 0x34, 0x56, 0x78]).is_none());
    }

    #[test]
    fn test_dex_selector_is_not_standard() {
        // 0x38ed1739 - swapExactTokensForTokens
        assert!(find_standard_function(&[0x38, 0xed, 0x17, 0x39]).is_none());
    }
}
