//! Filter and DN value escaping

use std::borrow::Cow;

/// Escape a value for use inside a search filter (RFC 4515)
pub fn escape_value(value: &str) -> String {
    ldap3::ldap_escape(Cow::Borrowed(value)).into_owned()
}

/// Escape a value for use as an RDN value (RFC 4514)
pub fn escape_dn_value(value: &str) -> String {
    ldap3::dn_escape(Cow::Borrowed(value)).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_value() {
        assert_eq!(escape_value("jdoe"), "jdoe");
        assert_eq!(escape_value("*)(uid=*"), "\\2a\\29\\28uid=\\2a");
        assert_eq!(escape_value("a\\b"), "a\\5cb");
    }

    #[test]
    fn test_escape_dn_value() {
        let escaped = escape_dn_value("Doe, Jane");
        assert!(escaped.starts_with("Doe\\"), "{}", escaped);
        assert!(escaped.ends_with(" Jane"), "{}", escaped);
        assert_eq!(escape_dn_value("jdoe"), "jdoe");
    }
}
