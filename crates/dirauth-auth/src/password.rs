//! Password change encoding
//!
//! Active Directory only accepts passwords through `unicodePwd`, as the
//! double-quoted password encoded UTF-16LE. A user changing their own
//! password sends a delete of the old value and an add of the new one in
//! one modify request. Other directories take a plain replace.

use dirauth_core::types::Schema;
use dirauth_directory::Modification;

/// Encode a password for `unicodePwd`
pub fn encode_ad_password(password: &str) -> Vec<u8> {
    format!("\"{}\"", password)
        .encode_utf16()
        .flat_map(u16::to_le_bytes)
        .collect()
}

/// Modifications that change `attribute` from `old` to `new`
pub fn password_modifications(
    schema: &Schema,
    attribute: &str,
    old: &str,
    new: &str,
) -> Vec<Modification> {
    match schema {
        Schema::ActiveDirectory | Schema::IdentityManagementForUnix => vec![
            Modification::Delete {
                attribute: attribute.to_string(),
                values: vec![encode_ad_password(old)],
            },
            Modification::Add {
                attribute: attribute.to_string(),
                values: vec![encode_ad_password(new)],
            },
        ],
        Schema::Rfc2307 | Schema::Custom(_) => vec![Modification::Replace {
            attribute: attribute.to_string(),
            values: vec![new.as_bytes().to_vec()],
        }],
    }
}
