//! Input validation for names that end up on an external command line
//!
//! Device names come from the CNI network configuration and are passed
//! verbatim to `ip` and `ebtables`, and chain names are derived from them.
//! Both are checked here before anything is spawned.

/// Maximum length of an ebtables chain name (`EBT_CHAIN_MAXNAMELEN - 1`).
pub const MAX_CHAIN_NAME_LEN: usize = 31;

/// Validates a network interface name.
///
/// Linux kernel interface name rules:
/// - Max 15 characters (IFNAMSIZ - 1)
/// - Alphanumeric, dot, dash, underscore only
/// - Cannot be "." or ".."
///
/// # Errors
///
/// Returns `Err` if the name is empty or violates kernel constraints.
///
/// # Examples
///
/// ```
/// use cni_dedup::validators::validate_interface;
///
/// assert!(validate_interface("cbr0").is_ok());
/// assert!(validate_interface("").is_err());
/// assert!(validate_interface("eth0; rm -rf /").is_err());
/// ```
pub fn validate_interface(name: &str) -> Result<String, String> {
    if name.is_empty() {
        return Err("Interface name is empty".to_string());
    }

    if name.len() > 15 {
        return Err("Interface name too long (max 15 characters)".to_string());
    }

    if name == "." || name == ".." {
        return Err("Invalid interface name".to_string());
    }

    // Check for valid characters (ASCII alphanumeric only, plus dot, dash, underscore)
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
    {
        return Err("Interface name contains invalid characters".to_string());
    }

    Ok(name.to_string())
}

/// Validates a user-defined ebtables chain name.
///
/// # Errors
///
/// Returns `Err` if:
/// - Name is empty or longer than 31 characters
/// - Name starts with `-` (would be parsed as an option)
/// - Name contains whitespace or control characters
pub fn validate_chain_name(name: &str) -> Result<String, String> {
    if name.is_empty() {
        return Err("Chain name is empty".to_string());
    }

    if name.len() > MAX_CHAIN_NAME_LEN {
        return Err(format!(
            "Chain name too long (max {MAX_CHAIN_NAME_LEN} characters)"
        ));
    }

    if name.starts_with('-') {
        return Err("Chain name cannot start with '-'".to_string());
    }

    if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err("Chain name contains whitespace or control characters".to_string());
    }

    Ok(name.to_string())
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn test_validate_interface_length_constraint(name in "[a-zA-Z0-9._-]{0,20}") {
            let result = validate_interface(&name);
            if name.is_empty() || name.len() > 15 {
                prop_assert!(result.is_err());
            } else if name != "." && name != ".." {
                prop_assert!(result.is_ok());
            }
        }

        #[test]
        fn test_validate_interface_char_constraint(
            valid_prefix in "[a-zA-Z0-9._-]{1,10}",
            invalid_char in "[^a-zA-Z0-9._-]"
        ) {
            let invalid_name = format!("{valid_prefix}{invalid_char}");
            let result = validate_interface(&invalid_name);
            prop_assert!(result.is_err());
        }
    }
}
