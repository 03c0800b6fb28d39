use data_encoding::HEXLOWER;
use ring::digest;

/// Derives a stable fingerprint from client attributes (user agent,
/// platform, locale, ...). Order-sensitive on purpose: callers pass the
/// attributes in a fixed order.
pub fn fingerprint_from_attributes(attributes: &[&str]) -> String {
    let mut ctx = digest::Context::new(&digest::SHA256);
    for attribute in attributes {
        ctx.update(attribute.as_bytes());
        ctx.update(b"\x1f");
    }
    HEXLOWER.encode(ctx.finish().as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_for_identical_attributes() {
        let a = fingerprint_from_attributes(&["Mozilla/5.0", "MacIntel", "en-US"]);
        let b = fingerprint_from_attributes(&["Mozilla/5.0", "MacIntel", "en-US"]);
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_differs_when_any_attribute_differs() {
        let a = fingerprint_from_attributes(&["Mozilla/5.0", "MacIntel", "en-US"]);
        let b = fingerprint_from_attributes(&["Mozilla/5.0", "Win32", "en-US"]);
        assert_ne!(a, b);
    }
}
