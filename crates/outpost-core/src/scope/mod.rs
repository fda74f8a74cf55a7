//! Derived defaults and naming rules for clusters and machines

mod cluster;
mod machine;

pub use cluster::{API_PORT, DEFAULT_NET_IP_RANGE, DEFAULT_ROUTE};
pub use machine::PROVIDER_ID_PREFIX;

use crate::error::{CoreError, Result};
use std::net::Ipv4Addr;

/// Upper bound the provider puts on client tokens
pub const CLIENT_TOKEN_MAX_LEN: usize = 64;

/// `<name>-<uid>`, keeping the last 64 characters
pub fn client_token(name: &str, uid: &str) -> String {
    let token = format!("{}-{}", name, uid);
    let chars = token.chars().count();
    if chars <= CLIENT_TOKEN_MAX_LEN {
        return token;
    }
    token.chars().skip(chars - CLIENT_TOKEN_MAX_LEN).collect()
}

/// Split `a.b.c.d/n` into its address and prefix length
pub fn parse_ipv4_cidr(cidr: &str) -> Result<(Ipv4Addr, u8)> {
    let invalid = || CoreError::InvalidCidr(cidr.to_string());
    let (ip, prefix) = cidr.split_once('/').ok_or_else(invalid)?;
    let ip: Ipv4Addr = ip.parse().map_err(|_| invalid())?;
    let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
    if prefix > 32 {
        return Err(invalid());
    }
    Ok((ip, prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_token_keeps_tail() {
        assert_eq!(client_token("nat", "uid"), "nat-uid");
        let long = client_token(&"a".repeat(100), "0123");
        assert_eq!(long.len(), 64);
        assert!(long.ends_with("a-0123"));
    }

    #[test]
    fn test_parse_ipv4_cidr() {
        let (ip, prefix) = parse_ipv4_cidr("10.0.0.0/16").unwrap();
        assert_eq!(ip, Ipv4Addr::new(10, 0, 0, 0));
        assert_eq!(prefix, 16);
        assert!(parse_ipv4_cidr("10.0.0.0").is_err());
        assert!(parse_ipv4_cidr("10.0.0/16").is_err());
        assert!(parse_ipv4_cidr("10.0.0.0/40").is_err());
    }
}
