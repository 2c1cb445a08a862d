use std::borrow::Cow;
use std::collections::HashMap;

use regex::Regex;
use validator::ValidationError;

use models::VoucherCode;

pub fn validate_voucher_code(code: &str) -> Result<(), ValidationError> {
    lazy_static! {
        static ref VOUCHER_CODE_RE: Regex = Regex::new(r"^[A-Z0-9-]+$").unwrap();
    }

    if code.len() < VoucherCode::MIN_LENGTH_CODE || code.len() > VoucherCode::MAX_LENGTH_CODE {
        return Err(ValidationError {
            code: Cow::from("voucher_code"),
            message: Some(Cow::from("Voucher code length must be within 6..50")),
            params: HashMap::new(),
        });
    }

    if VOUCHER_CODE_RE.is_match(code) {
        Ok(())
    } else {
        Err(ValidationError {
            code: Cow::from("voucher_code"),
            message: Some(Cow::from("Voucher code must contain only A-Z, 0-9 and dashes")),
            params: HashMap::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_codes() {
        assert!(validate_voucher_code("SUMMER2024").is_ok());
        assert!(validate_voucher_code("FLASH-20").is_ok());
    }

    #[test]
    fn rejects_short_and_long_codes() {
        assert!(validate_voucher_code("ABC12").is_err());
        let too_long = "A".repeat(51);
        assert!(validate_voucher_code(&too_long).is_err());
    }

    #[test]
    fn rejects_lowercase_and_symbols() {
        assert!(validate_voucher_code("summer2024").is_err());
        assert!(validate_voucher_code("SUMMER_2024").is_err());
        assert!(validate_voucher_code("SUMMER 2024").is_err());
    }
}
