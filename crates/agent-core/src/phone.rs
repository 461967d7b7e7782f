//! Caller-number normalization.
//!
//! Trunk providers hand the bridge caller ids in whatever format the
//! upstream carrier used: `+33611111111`, `0033611111111`, `0611111111`,
//! sometimes with separators. Everything is normalized to E.164 before it
//! touches the API or the blocked list. Local-format numbers (leading zero)
//! are resolved against the country calling code derived from the trunk
//! account number itself.

/// Known ITU country calling codes, 1 to 3 digits. Changes are data.
pub const COUNTRY_CALLING_CODES: &[&str] = &[
    // 1-digit
    "1", "7",
    // 2-digit
    "20", "27", "30", "31", "32", "33", "34", "36", "39", "40", "41", "43",
    "44", "45", "46", "47", "48", "49", "51", "52", "53", "54", "55", "56",
    "57", "58", "60", "61", "62", "63", "64", "65", "66", "81", "82", "84",
    "86", "90", "91", "92", "93", "94", "95", "98",
    // 3-digit
    "211", "212", "213", "216", "218", "220", "221", "222", "223", "224",
    "225", "226", "227", "228", "229", "230", "231", "232", "233", "234",
    "235", "236", "237", "238", "239", "240", "241", "242", "243", "244",
    "245", "246", "248", "249", "250", "251", "252", "253", "254", "255",
    "256", "257", "258", "260", "261", "262", "263", "264", "265", "266",
    "267", "268", "269", "290", "291", "297", "298", "299", "350", "351",
    "352", "353", "354", "355", "356", "357", "358", "359", "370", "371",
    "372", "373", "374", "375", "376", "377", "378", "380", "381", "382",
    "383", "385", "386", "387", "389", "420", "421", "423", "500", "501",
    "502", "503", "504", "505", "506", "507", "508", "509", "590", "591",
    "592", "593", "594", "595", "596", "597", "598", "599", "670", "672",
    "673", "674", "675", "676", "677", "678", "679", "680", "681", "682",
    "683", "685", "686", "687", "688", "689", "690", "691", "692", "850",
    "852", "853", "855", "856", "880", "886", "960", "961", "962", "963",
    "964", "965", "966", "967", "968", "970", "971", "972", "973", "974",
    "975", "976", "977", "992", "993", "994", "995", "996", "998",
];

/// Derive the country calling code from the trunk account number
/// (e.g. `"33491234567"` -> `"33"`). Longest match wins.
pub fn derive_trunk_country_code(trunk_number: &str) -> Option<&'static str> {
    let digits: String = trunk_number.chars().filter(|c| c.is_ascii_digit()).collect();
    for len in (1..=3).rev() {
        if digits.len() < len {
            continue;
        }
        let prefix = &digits[..len];
        if let Some(code) = COUNTRY_CALLING_CODES.iter().copied().find(|c| *c == prefix) {
            return Some(code);
        }
    }
    None
}

/// Normalize `raw` to E.164.
///
/// `+X...` passes through, `00X...` becomes `+X...`, a leading-zero local
/// number is prefixed with `trunk_cc`, and bare international digits get a
/// `+` when they start with a known country code. Anything unrecognizable
/// (anonymous caller ids, sip display junk) is returned stripped but
/// otherwise untouched. Idempotent by construction.
pub fn normalize_e164(raw: &str, trunk_cc: Option<&str>) -> String {
    let trimmed = raw.trim();
    let has_plus = trimmed.starts_with('+');
    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return trimmed.to_string();
    }

    if has_plus {
        return format!("+{digits}");
    }
    if let Some(rest) = digits.strip_prefix("00") {
        if !rest.is_empty() {
            return format!("+{rest}");
        }
    }
    if let Some(rest) = digits.strip_prefix('0') {
        if let Some(cc) = trunk_cc {
            return format!("+{cc}{rest}");
        }
        return digits;
    }
    if starts_with_country_code(&digits) {
        return format!("+{digits}");
    }
    if let Some(cc) = trunk_cc {
        return format!("+{cc}{digits}");
    }
    digits
}

fn starts_with_country_code(digits: &str) -> bool {
    (1..=3).any(|len| digits.len() >= len && COUNTRY_CALLING_CODES.contains(&&digits[..len]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn plus_numbers_pass_through() {
        assert_eq!(normalize_e164("+33611111111", Some("33")), "+33611111111");
        assert_eq!(normalize_e164("+1 415 555 0100", None), "+14155550100");
    }

    #[test]
    fn double_zero_prefix_becomes_plus() {
        assert_eq!(normalize_e164("0033611111111", Some("33")), "+33611111111");
        assert_eq!(normalize_e164("004915112345678", None), "+4915112345678");
    }

    #[test]
    fn local_numbers_take_the_trunk_code() {
        assert_eq!(normalize_e164("0611111111", Some("33")), "+33611111111");
        // No trunk code known: the leading zero is dropped but nothing is
        // invented.
        assert_eq!(normalize_e164("0611111111", None), "0611111111");
    }

    #[test]
    fn bare_international_digits_get_a_plus() {
        assert_eq!(normalize_e164("33611111111", None), "+33611111111");
    }

    #[test]
    fn separators_are_stripped() {
        assert_eq!(normalize_e164("+33 6.11-11(11)11", Some("33")), "+33611111111");
    }

    #[test]
    fn junk_is_returned_untouched() {
        assert_eq!(normalize_e164("anonymous", Some("33")), "anonymous");
        assert_eq!(normalize_e164("", Some("33")), "");
    }

    #[test]
    fn trunk_code_derivation_prefers_longest_match() {
        assert_eq!(derive_trunk_country_code("33491234567"), Some("33"));
        assert_eq!(derive_trunk_country_code("14155550100"), Some("1"));
        // 212 (Morocco) must win over 21 (not a code) and 2 (not a code).
        assert_eq!(derive_trunk_country_code("212612345678"), Some("212"));
        assert_eq!(derive_trunk_country_code(""), None);
    }

    proptest! {
        #[test]
        fn normalization_is_idempotent(raw in "[0-9+ .()-]{0,18}") {
            let once = normalize_e164(&raw, Some("33"));
            let twice = normalize_e164(&once, Some("33"));
            prop_assert_eq!(once, twice);
        }
    }
}
